// Infrastructure layer - File formats, settings and reports
pub mod auxiliary_csv;
pub mod blf;
pub mod blf_repository;
pub mod config;
pub mod dbc;
pub mod report;
pub mod table_writer;
