//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::room::{RoomRegistry, RoomSettings};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rooms: Arc<RoomRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        // Initialize room registry
        let rooms = Arc::new(RoomRegistry::new(RoomSettings::from(&config)));

        Self {
            config: Arc::new(config),
            rooms,
        }
    }
}
