pub mod common;
pub mod config;
pub mod db;
pub mod models;
pub mod services;

pub use common::error::{ApiResponse, AppError, ErrorBody};
pub use config::{AppConfig, AppState};
