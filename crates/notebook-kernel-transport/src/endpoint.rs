//! Channel endpoint: one socket owned by one driver task.

use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use notebook_kernel_core::ChannelName;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::socket::{EndpointPeer, FrameSocket, Frames, MemorySocket, TransportError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bound transport resource for one channel.
///
/// A driver task owns the socket: inbound frames are queued for whoever
/// holds the inbound receiver, outbound frames are drained from an unbounded
/// queue so sending never waits on the socket. Inbound frames are only
/// queued while a reader has declared itself with [`Endpoint::set_listening`];
/// otherwise they are dropped on arrival.
pub struct Endpoint {
    channel: ChannelName,
    outbound: mpsc::UnboundedSender<Frames>,
    listening: Arc<AtomicBool>,
    inbound: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Frames>>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Endpoint {
    /// Start driving `socket` for `channel`.
    #[must_use]
    pub fn spawn(channel: ChannelName, socket: Box<dyn FrameSocket>) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = oneshot::channel();
        let listening = Arc::new(AtomicBool::new(false));

        let driver = tokio::spawn(drive(
            channel,
            socket,
            outbound_rx,
            Inbound {
                queue: inbound_tx,
                listening: Arc::clone(&listening),
            },
            shutdown_rx,
        ));

        Self {
            channel,
            outbound,
            listening,
            inbound: Arc::new(tokio::sync::Mutex::new(inbound)),
            shutdown: Mutex::new(Some(shutdown)),
            driver: Mutex::new(Some(driver)),
        }
    }

    /// Endpoint backed by an in-process socket, plus its remote peer.
    #[must_use]
    pub fn in_memory(channel: ChannelName) -> (Self, EndpointPeer) {
        let (socket, peer) = MemorySocket::pair(channel);
        (Self::spawn(channel, Box::new(socket)), peer)
    }

    #[must_use]
    pub const fn channel(&self) -> ChannelName {
        self.channel
    }

    /// Queue frames for transmission.
    ///
    /// # Errors
    /// Returns error if the endpoint has been closed.
    pub fn send(&self, frames: Frames) -> Result<(), TransportError> {
        self.outbound
            .send(frames)
            .map_err(|_| TransportError::Closed(self.channel))
    }

    /// Shared handle on the inbound queue. Only one reader holds it at a time.
    #[must_use]
    pub fn inbound(&self) -> Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Frames>>> {
        Arc::clone(&self.inbound)
    }

    /// Whether received frames are queued (`true`) or dropped (`false`).
    pub fn set_listening(&self, listening: bool) {
        self.listening.store(listening, Ordering::Release);
    }

    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    /// Stop the driver and release the socket. Idempotent.
    pub async fn close(&self) {
        if let Some(shutdown) = lock(&self.shutdown).take() {
            let _ = shutdown.send(());
        }
        let driver = lock(&self.driver).take();
        if let Some(driver) = driver {
            if let Err(e) = driver.await {
                tracing::warn!(channel = %self.channel, "Endpoint driver ended abnormally: {e}");
            }
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if let Some(driver) = lock(&self.driver).take() {
            driver.abort();
        }
    }
}

/// Driver side of the inbound queue.
struct Inbound {
    queue: mpsc::UnboundedSender<Frames>,
    listening: Arc<AtomicBool>,
}

async fn drive(
    channel: ChannelName,
    mut socket: Box<dyn FrameSocket>,
    mut outbound: mpsc::UnboundedReceiver<Frames>,
    inbound: Inbound,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            frames = outbound.recv() => {
                let Some(frames) = frames else { break };
                if let Err(e) = socket.send(frames).await {
                    tracing::warn!(%channel, "Failed to send frames: {e}");
                }
            }
            received = socket.recv() => match received {
                Ok(frames) => {
                    if !inbound.listening.load(Ordering::Acquire) {
                        tracing::trace!(%channel, "No listener, dropping frames");
                    } else if inbound.queue.send(frames).is_err() {
                        tracing::trace!(%channel, "Inbound queue gone, dropping frames");
                    }
                }
                Err(TransportError::Closed(_)) => break,
                Err(e) => tracing::warn!(%channel, "Failed to receive frames: {e}"),
            },
        }
    }

    // Close the queue so nothing new is accepted, then flush what was queued.
    outbound.close();
    while let Ok(frames) = outbound.try_recv() {
        if let Err(e) = socket.send(frames).await {
            tracing::debug!(%channel, "Dropping queued frames at close: {e}");
            break;
        }
    }
    socket.close().await;
    tracing::debug!(%channel, "Endpoint closed");
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (endpoint, mut peer) = Endpoint::in_memory(ChannelName::Shell);

        endpoint.send(vec![Bytes::from_static(b"out")]).unwrap();
        assert_eq!(peer.recv().await.unwrap(), vec![Bytes::from_static(b"out")]);

        endpoint.set_listening(true);
        peer.send(vec![Bytes::from_static(b"in")]).unwrap();
        let inbound = endpoint.inbound();
        let received = inbound.lock().await.recv().await.unwrap();
        assert_eq!(received, vec![Bytes::from_static(b"in")]);
    }

    #[tokio::test]
    async fn test_frames_dropped_while_not_listening() {
        let (endpoint, peer) = Endpoint::in_memory(ChannelName::Stdin);
        assert!(!endpoint.is_listening());

        for _ in 0..100 {
            peer.send(vec![Bytes::from_static(b"unread")]).unwrap();
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(endpoint.inbound().lock().await.try_recv().is_err());

        endpoint.set_listening(true);
        peer.send(vec![Bytes::from_static(b"read")]).unwrap();
        let inbound = endpoint.inbound();
        let received = inbound.lock().await.recv().await.unwrap();
        assert_eq!(received, vec![Bytes::from_static(b"read")]);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let (endpoint, _peer) = Endpoint::in_memory(ChannelName::Control);
        endpoint.close().await;
        endpoint.close().await;

        assert!(endpoint.is_closed());
        assert!(matches!(
            endpoint.send(vec![Bytes::from_static(b"late")]),
            Err(TransportError::Closed(ChannelName::Control))
        ));
    }

    #[tokio::test]
    async fn test_inbound_ends_after_close() {
        let (endpoint, _peer) = Endpoint::in_memory(ChannelName::Iopub);
        let inbound = endpoint.inbound();
        endpoint.close().await;
        assert!(inbound.lock().await.recv().await.is_none());
    }
}
