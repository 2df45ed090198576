//! Salon Queue Server
//!
//! REST + WebSocket backend for virtual salon queues: customers join a
//! salon's queue, check in on arrival and are served in join order, while
//! every change is pushed live to the salon's dashboard and viewers.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
}
