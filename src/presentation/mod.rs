// Presentation layer - Command-line arguments and console output
pub mod cli;
