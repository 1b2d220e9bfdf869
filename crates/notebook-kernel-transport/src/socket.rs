//! Socket primitives behind the `FrameSocket` seam.

use async_trait::async_trait;
use bytes::Bytes;
use notebook_kernel_core::ChannelName;
use thiserror::Error;
use tokio::sync::mpsc;
use zeromq::{PubSocket, RepSocket, RouterSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

/// One multipart message as raw frames.
pub type Frames = Vec<Bytes>;

/// Transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to bind {channel} endpoint at {address}: {reason}")]
    Bind {
        channel: ChannelName,
        address: String,
        reason: String,
    },
    #[error("Socket error on {channel}: {reason}")]
    Socket { channel: ChannelName, reason: String },
    #[error("Endpoint closed: {0}")]
    Closed(ChannelName),
}

/// Socket pattern a channel is served with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketRole {
    /// Request multiplexing with a reply route per request.
    Router,
    /// Fan-out broadcast, no replies.
    Publisher,
    /// Strict request/reply, used for echo.
    Reply,
}

impl SocketRole {
    #[must_use]
    pub const fn for_channel(channel: ChannelName) -> Self {
        match channel {
            ChannelName::Shell | ChannelName::Control | ChannelName::Stdin => Self::Router,
            ChannelName::Iopub => Self::Publisher,
            ChannelName::Heartbeat => Self::Reply,
        }
    }
}

/// Multipart socket driven by an endpoint task.
#[async_trait]
pub trait FrameSocket: Send + 'static {
    /// Receive the next multipart message.
    async fn recv(&mut self) -> Result<Frames, TransportError>;

    /// Send one multipart message.
    async fn send(&mut self, frames: Frames) -> Result<(), TransportError>;

    /// Release the underlying resource.
    async fn close(self: Box<Self>);
}

enum ZmqSocket {
    Router(RouterSocket),
    Publisher(PubSocket),
    Reply(RepSocket),
}

/// `zeromq` socket bound for one channel.
pub struct ZmqFrameSocket {
    channel: ChannelName,
    socket: ZmqSocket,
}

impl ZmqFrameSocket {
    /// Create the channel's socket and bind it to `address`.
    ///
    /// # Errors
    /// Returns error if the bind fails.
    pub async fn bind(channel: ChannelName, address: &str) -> Result<Self, TransportError> {
        let bind_error = |e: zeromq::ZmqError| TransportError::Bind {
            channel,
            address: address.to_string(),
            reason: e.to_string(),
        };

        let socket = match SocketRole::for_channel(channel) {
            SocketRole::Router => {
                let mut s = RouterSocket::new();
                s.bind(address).await.map_err(bind_error)?;
                ZmqSocket::Router(s)
            }
            SocketRole::Publisher => {
                let mut s = PubSocket::new();
                s.bind(address).await.map_err(bind_error)?;
                ZmqSocket::Publisher(s)
            }
            SocketRole::Reply => {
                let mut s = RepSocket::new();
                s.bind(address).await.map_err(bind_error)?;
                ZmqSocket::Reply(s)
            }
        };

        Ok(Self { channel, socket })
    }

    fn socket_error(&self, e: impl std::fmt::Display) -> TransportError {
        TransportError::Socket {
            channel: self.channel,
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl FrameSocket for ZmqFrameSocket {
    async fn recv(&mut self) -> Result<Frames, TransportError> {
        let message = match &mut self.socket {
            ZmqSocket::Router(s) => s.recv().await,
            ZmqSocket::Reply(s) => s.recv().await,
            // Broadcast sockets never receive.
            ZmqSocket::Publisher(_) => return futures::future::pending().await,
        };
        message
            .map(ZmqMessage::into_vec)
            .map_err(|e| self.socket_error(e))
    }

    async fn send(&mut self, frames: Frames) -> Result<(), TransportError> {
        let message = ZmqMessage::try_from(frames).map_err(|e| self.socket_error(e))?;
        let sent = match &mut self.socket {
            ZmqSocket::Router(s) => s.send(message).await,
            ZmqSocket::Publisher(s) => s.send(message).await,
            ZmqSocket::Reply(s) => s.send(message).await,
        };
        sent.map_err(|e| self.socket_error(e))
    }

    async fn close(self: Box<Self>) {
        match self.socket {
            ZmqSocket::Router(s) => {
                let _ = s.close().await;
            }
            ZmqSocket::Publisher(s) => {
                let _ = s.close().await;
            }
            ZmqSocket::Reply(s) => {
                let _ = s.close().await;
            }
        }
    }
}

/// In-process socket whose other side is an `EndpointPeer`.
pub struct MemorySocket {
    channel: ChannelName,
    from_peer: mpsc::UnboundedReceiver<Frames>,
    to_peer: mpsc::UnboundedSender<Frames>,
}

impl MemorySocket {
    /// Create a socket and the peer that talks to it.
    #[must_use]
    pub fn pair(channel: ChannelName) -> (Self, EndpointPeer) {
        let (to_socket, from_peer) = mpsc::unbounded_channel();
        let (to_peer, from_socket) = mpsc::unbounded_channel();

        let socket = Self {
            channel,
            from_peer,
            to_peer,
        };
        let peer = EndpointPeer {
            channel,
            to_endpoint: to_socket,
            from_endpoint: from_socket,
        };
        (socket, peer)
    }
}

#[async_trait]
impl FrameSocket for MemorySocket {
    async fn recv(&mut self) -> Result<Frames, TransportError> {
        self.from_peer
            .recv()
            .await
            .ok_or(TransportError::Closed(self.channel))
    }

    async fn send(&mut self, frames: Frames) -> Result<(), TransportError> {
        self.to_peer
            .send(frames)
            .map_err(|_| TransportError::Closed(self.channel))
    }

    async fn close(self: Box<Self>) {}
}

/// Remote side of an in-memory endpoint, standing in for a front-end.
pub struct EndpointPeer {
    channel: ChannelName,
    to_endpoint: mpsc::UnboundedSender<Frames>,
    from_endpoint: mpsc::UnboundedReceiver<Frames>,
}

impl EndpointPeer {
    #[must_use]
    pub const fn channel(&self) -> ChannelName {
        self.channel
    }

    /// Deliver frames to the endpoint.
    ///
    /// # Errors
    /// Returns error if the endpoint has been closed.
    pub fn send(&self, frames: Frames) -> Result<(), TransportError> {
        self.to_endpoint
            .send(frames)
            .map_err(|_| TransportError::Closed(self.channel))
    }

    /// Receive frames the endpoint sent.
    pub async fn recv(&mut self) -> Option<Frames> {
        self.from_endpoint.recv().await
    }

    /// Receive without waiting.
    pub fn try_recv(&mut self) -> Option<Frames> {
        self.from_endpoint.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_by_channel() {
        assert_eq!(SocketRole::for_channel(ChannelName::Shell), SocketRole::Router);
        assert_eq!(SocketRole::for_channel(ChannelName::Control), SocketRole::Router);
        assert_eq!(SocketRole::for_channel(ChannelName::Stdin), SocketRole::Router);
        assert_eq!(SocketRole::for_channel(ChannelName::Iopub), SocketRole::Publisher);
        assert_eq!(SocketRole::for_channel(ChannelName::Heartbeat), SocketRole::Reply);
    }

    #[tokio::test]
    async fn test_memory_pair_both_directions() {
        let (mut socket, mut peer) = MemorySocket::pair(ChannelName::Shell);
        peer.send(vec![Bytes::from_static(b"ping")]).unwrap();
        assert_eq!(socket.recv().await.unwrap(), vec![Bytes::from_static(b"ping")]);

        socket.send(vec![Bytes::from_static(b"pong")]).await.unwrap();
        assert_eq!(peer.recv().await.unwrap(), vec![Bytes::from_static(b"pong")]);
    }

    #[tokio::test]
    async fn test_memory_recv_after_peer_dropped() {
        let (mut socket, peer) = MemorySocket::pair(ChannelName::Stdin);
        drop(peer);
        assert!(matches!(
            socket.recv().await,
            Err(TransportError::Closed(ChannelName::Stdin))
        ));
    }
}
