//! Per-channel message bus: multicast inbound envelopes plus an outbound sink.

use std::{
    collections::BTreeMap,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    task::{Context, Poll},
};

use futures::{Stream, StreamExt};
use notebook_kernel_core::{ChannelName, CodecError, Envelope, MessageCodec};
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{endpoint::Endpoint, socket::TransportError};

/// Bus error.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Bus torn down: {0}")]
    Closed(ChannelName),
    #[error("Encode failed: {0}")]
    Codec(#[from] CodecError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

struct Listener {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: BTreeMap<u64, mpsc::UnboundedSender<Envelope>>,
    listener: Option<Listener>,
    closed: bool,
}

struct Inner {
    channel: ChannelName,
    endpoint: Arc<Endpoint>,
    codec: MessageCodec,
    registry: Mutex<Registry>,
}

impl Inner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fan_out(&self, envelope: &Envelope) {
        let mut registry = self.registry();
        registry
            .subscribers
            .retain(|_, tx| tx.send(envelope.clone()).is_ok());
    }

    fn unsubscribe(&self, id: u64) {
        let mut registry = self.registry();
        if registry.subscribers.remove(&id).is_none() || !registry.subscribers.is_empty() {
            return;
        }
        self.endpoint.set_listening(false);
        if let Some(listener) = registry.listener.take() {
            let _ = listener.stop.send(());
            tracing::debug!(channel = %self.channel, "Last subscriber left, listener stopped");
        }
    }
}

/// Endpoint wrapped as a shared inbound stream and an outbound sink.
///
/// All subscribers observe the same ongoing sequence from the point they
/// subscribed; nothing is replayed. One listener task reads the endpoint
/// while at least one subscription is alive.
#[derive(Clone)]
pub struct ChannelBus {
    inner: Arc<Inner>,
}

impl ChannelBus {
    /// Wrap `endpoint`, decoding and encoding with `codec`.
    #[must_use]
    pub fn new(endpoint: Arc<Endpoint>, codec: MessageCodec) -> Self {
        Self {
            inner: Arc::new(Inner {
                channel: endpoint.channel(),
                endpoint,
                codec,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    #[must_use]
    pub fn channel(&self) -> ChannelName {
        self.inner.channel
    }

    /// Attach a subscriber. The first one starts the listener.
    ///
    /// After teardown the returned stream ends immediately.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.inner.registry();

        let id = registry.next_id;
        registry.next_id += 1;

        if !registry.closed {
            registry.subscribers.insert(id, tx);
            if registry.listener.is_none() {
                registry.listener = Some(self.start_listener());
            }
        }

        Subscription {
            id,
            channel: self.inner.channel,
            receiver: UnboundedReceiverStream::new(rx),
            bus: Arc::downgrade(&self.inner),
        }
    }

    fn start_listener(&self) -> Listener {
        let inbound = self.inner.endpoint.inbound();
        // Frames queued while nobody listened predate every subscriber.
        if let Ok(mut queued) = inbound.try_lock() {
            let mut dropped = 0usize;
            while queued.try_recv().is_ok() {
                dropped += 1;
            }
            if dropped > 0 {
                tracing::debug!(channel = %self.inner.channel, dropped, "Discarded unobserved frames");
            }
        }
        self.inner.endpoint.set_listening(true);

        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(listen(Arc::clone(&self.inner), stop_rx));
        tracing::debug!(channel = %self.inner.channel, "Listener started");
        Listener { stop, task }
    }

    /// Encode and queue an envelope. Works with or without subscribers.
    ///
    /// # Errors
    /// Returns error after teardown or if the envelope cannot be encoded.
    pub fn send(&self, envelope: &Envelope) -> Result<(), BusError> {
        if self.inner.registry().closed {
            return Err(BusError::Closed(self.inner.channel));
        }
        let frames = self.inner.codec.encode(envelope)?;
        self.inner.endpoint.send(frames)?;
        Ok(())
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.registry().subscribers.len()
    }

    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.inner.registry().listener.is_some()
    }

    /// Remove every subscriber, stop listening, then close the endpoint.
    pub async fn teardown(&self) {
        let listener = {
            let mut registry = self.inner.registry();
            registry.closed = true;
            registry.subscribers.clear();
            self.inner.endpoint.set_listening(false);
            registry.listener.take()
        };

        if let Some(listener) = listener {
            let _ = listener.stop.send(());
            if let Err(e) = listener.task.await {
                tracing::warn!(channel = %self.inner.channel, "Listener ended abnormally: {e}");
            }
        }

        self.inner.endpoint.close().await;
        tracing::debug!(channel = %self.inner.channel, "Bus torn down");
    }
}

async fn listen(inner: Arc<Inner>, mut stop: oneshot::Receiver<()>) {
    let inbound = inner.endpoint.inbound();
    let mut frames_rx = tokio::select! {
        guard = inbound.lock() => guard,
        _ = &mut stop => return,
    };

    loop {
        tokio::select! {
            _ = &mut stop => break,
            frames = frames_rx.recv() => {
                let Some(frames) = frames else { break };
                match inner.codec.decode(frames) {
                    Ok(envelope) => inner.fan_out(&envelope),
                    Err(CodecError::Authentication) => {
                        tracing::warn!(channel = %inner.channel, "Dropping message with invalid signature");
                    }
                    Err(e) => {
                        tracing::warn!(channel = %inner.channel, "Dropping undecodable message: {e}");
                    }
                }
            }
        }
    }
}

/// Live view of a bus from the moment of subscribing. Unsubscribes on drop.
pub struct Subscription {
    id: u64,
    channel: ChannelName,
    receiver: UnboundedReceiverStream<Envelope>,
    bus: Weak<Inner>,
}

impl Subscription {
    #[must_use]
    pub const fn channel(&self) -> ChannelName {
        self.channel
    }

    /// Next inbound envelope, or `None` once the bus is torn down.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.receiver.next().await
    }
}

impl Stream for Subscription {
    type Item = Envelope;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_next_unpin(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}
