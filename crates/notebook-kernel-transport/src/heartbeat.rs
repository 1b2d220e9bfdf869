//! Heartbeat echo.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::endpoint::Endpoint;

/// Echo every frame set received on `endpoint` back unchanged.
///
/// The task ends when the endpoint is closed.
#[must_use]
pub fn spawn_echo(endpoint: Arc<Endpoint>) -> JoinHandle<()> {
    endpoint.set_listening(true);
    tokio::spawn(async move {
        let inbound = endpoint.inbound();
        let mut frames_rx = inbound.lock().await;
        while let Some(frames) = frames_rx.recv().await {
            tracing::trace!(frames = frames.len(), "Heartbeat");
            if endpoint.send(frames).is_err() {
                break;
            }
        }
        tracing::debug!("Heartbeat stopped");
    })
}
