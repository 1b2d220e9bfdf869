//! The set of endpoints a kernel serves, one per channel.

use std::sync::Arc;

use notebook_kernel_core::{ChannelName, ConnectionConfig};

use crate::{
    endpoint::Endpoint,
    socket::{EndpointPeer, TransportError, ZmqFrameSocket},
};

/// One endpoint per channel, fixed for the process lifetime.
pub struct ChannelSet {
    shell: Arc<Endpoint>,
    control: Arc<Endpoint>,
    stdin: Arc<Endpoint>,
    iopub: Arc<Endpoint>,
    heartbeat: Arc<Endpoint>,
}

impl ChannelSet {
    /// Bind every channel at the addresses the config describes.
    ///
    /// Endpoints opened before a failing bind are closed again.
    ///
    /// # Errors
    /// Returns error if any endpoint fails to bind.
    pub async fn open(config: &ConnectionConfig) -> Result<Self, TransportError> {
        let mut opened = Vec::with_capacity(ChannelName::ALL.len());

        for channel in ChannelName::ALL {
            let address = config.address(channel);
            match ZmqFrameSocket::bind(channel, &address).await {
                Ok(socket) => {
                    tracing::info!(%channel, %address, "Endpoint bound");
                    opened.push(Arc::new(Endpoint::spawn(channel, Box::new(socket))));
                }
                Err(e) => {
                    for endpoint in &opened {
                        endpoint.close().await;
                    }
                    return Err(e);
                }
            }
        }

        Self::from_endpoints(opened).ok_or_else(|| TransportError::Socket {
            channel: ChannelName::Shell,
            reason: "endpoint set incomplete".to_string(),
        })
    }

    /// In-process channel set plus the peers a test front-end drives.
    #[must_use]
    pub fn in_memory() -> (Self, ChannelPeers) {
        let (shell, shell_peer) = Endpoint::in_memory(ChannelName::Shell);
        let (control, control_peer) = Endpoint::in_memory(ChannelName::Control);
        let (stdin, stdin_peer) = Endpoint::in_memory(ChannelName::Stdin);
        let (iopub, iopub_peer) = Endpoint::in_memory(ChannelName::Iopub);
        let (heartbeat, heartbeat_peer) = Endpoint::in_memory(ChannelName::Heartbeat);

        let set = Self {
            shell: Arc::new(shell),
            control: Arc::new(control),
            stdin: Arc::new(stdin),
            iopub: Arc::new(iopub),
            heartbeat: Arc::new(heartbeat),
        };
        let peers = ChannelPeers {
            shell: shell_peer,
            control: control_peer,
            stdin: stdin_peer,
            iopub: iopub_peer,
            heartbeat: heartbeat_peer,
        };
        (set, peers)
    }

    fn from_endpoints(endpoints: Vec<Arc<Endpoint>>) -> Option<Self> {
        let find = |name: ChannelName| endpoints.iter().find(|e| e.channel() == name).cloned();
        Some(Self {
            shell: find(ChannelName::Shell)?,
            control: find(ChannelName::Control)?,
            stdin: find(ChannelName::Stdin)?,
            iopub: find(ChannelName::Iopub)?,
            heartbeat: find(ChannelName::Heartbeat)?,
        })
    }

    /// Endpoint serving `channel`.
    #[must_use]
    pub const fn endpoint(&self, channel: ChannelName) -> &Arc<Endpoint> {
        match channel {
            ChannelName::Shell => &self.shell,
            ChannelName::Control => &self.control,
            ChannelName::Stdin => &self.stdin,
            ChannelName::Iopub => &self.iopub,
            ChannelName::Heartbeat => &self.heartbeat,
        }
    }

    /// Close every endpoint. Idempotent.
    pub async fn close(&self) {
        for channel in ChannelName::ALL {
            self.endpoint(channel).close().await;
        }
    }
}

/// Front-end side of an in-memory channel set.
pub struct ChannelPeers {
    pub shell: EndpointPeer,
    pub control: EndpointPeer,
    pub stdin: EndpointPeer,
    pub iopub: EndpointPeer,
    pub heartbeat: EndpointPeer,
}
