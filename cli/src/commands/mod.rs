pub mod config;
pub mod generate;
pub mod models;
pub mod pull;
pub mod remove;
