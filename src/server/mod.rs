//! HTTP and WebSocket surface of the coordinator

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::browser::{DirectoryBrowser, FsBrowser};
use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::error::Result;
use crate::git::GitProvisioner;
use crate::reconcile::Reconciler;
use crate::session::{CreationWorkflow, SessionRegistry, WorkflowSettings};
use crate::terminal::{PtySupervisor, TerminalBroker};

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;

/// Wire the production services together and start polling
pub async fn build_state(config: &Config) -> Arc<AppState> {
    let registry = Arc::new(SessionRegistry::new());
    let broker = TerminalBroker::new(Arc::clone(&registry));
    let browser: Arc<dyn DirectoryBrowser> = Arc::new(FsBrowser::new());

    let provisioner = match &config.worktrees_dir {
        Some(dir) => GitProvisioner::with_worktrees_dir(dir),
        None => GitProvisioner::new(),
    };
    let workflow = CreationWorkflow::new(
        Arc::clone(&registry),
        Arc::clone(&browser),
        Arc::new(provisioner),
        WorkflowSettings::from(config),
    );
    let supervisor = Arc::new(PtySupervisor::new(config.pty_settings()));

    let coordinator = Coordinator::new(Arc::clone(&registry), broker, workflow, supervisor);

    let reconciler = Reconciler::new(registry, config.reconciler_settings());
    coordinator.set_reconciler(reconciler.spawn()).await;

    Arc::new(AppState::new(coordinator, browser))
}

/// Serve until Ctrl-C, then shut every session down
pub async fn serve(state: Arc<AppState>, addr: &str) -> Result<()> {
    let app = create_router(Arc::clone(&state));
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.coordinator.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown requested");
    }
}
