//! Client-side polling against a live server

mod common;

use std::sync::Arc;
use std::time::Duration;

use claude_manager::SessionStatus;
use claude_manager::client::ApiClient;
use claude_manager::reconcile::{Reconciler, ReconcilerSettings, SessionChange};
use claude_manager::server::create_router;

use common::Harness;

#[tokio::test]
async fn test_reconciler_tracks_server_sessions() {
    let h = Harness::new();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_router(Arc::clone(&h.state));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let api = ApiClient::new(format!("http://{}", addr), Duration::from_secs(1)).unwrap();
    let settings = ReconcilerSettings::new(Duration::from_secs(5), Duration::from_secs(1));
    let reconciler = Reconciler::new(Arc::new(api), settings);

    assert!(reconciler.tick().await.unwrap().is_empty());

    let id = h.create_active("watched").await;
    let changes = reconciler.tick().await.unwrap();
    assert_eq!(changes.len(), 1);
    assert!(matches!(&changes[0], SessionChange::Added { session } if session.id == id));

    // Unchanged listing yields nothing
    assert!(reconciler.tick().await.unwrap().is_empty());

    let attachment = h.coordinator.select(&id).await.unwrap();
    h.coordinator.deselect(&id, attachment.id).await;
    let changes = reconciler.tick().await.unwrap();
    assert_eq!(
        changes,
        vec![SessionChange::StatusChanged {
            id,
            from: SessionStatus::Active,
            to: SessionStatus::Idle,
        }]
    );

    h.coordinator.kill(&id).await.unwrap();
    let changes = reconciler.tick().await.unwrap();
    assert_eq!(changes, vec![SessionChange::Removed { id }]);
    assert!(reconciler.snapshot().await.is_empty());
}
