use std::sync::Arc;

use crate::browser::DirectoryBrowser;
use crate::coordinator::Coordinator;

/// Shared state of every handler
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub browser: Arc<dyn DirectoryBrowser>,
}

impl AppState {
    pub fn new(coordinator: Arc<Coordinator>, browser: Arc<dyn DirectoryBrowser>) -> Self {
        Self {
            coordinator,
            browser,
        }
    }
}
