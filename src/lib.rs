// Brake event analysis for CAN bus logs
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;
