// Domain layer - Plain data types shared by every component
pub mod catalog;
pub mod event;
pub mod frame;
pub mod sample;
pub mod series;
