//! Transport layer for the notebook kernel.
//!
//! Provides:
//! - `ChannelSet` - One bound endpoint per channel
//! - `ChannelBus` - Multicast inbound envelopes plus outbound send per channel
//! - Heartbeat echo
//! - In-memory endpoints for driving a kernel without sockets

pub mod bus;
pub mod channels;
pub mod endpoint;
pub mod heartbeat;
pub mod socket;

pub use bus::{BusError, ChannelBus, Subscription};
pub use channels::{ChannelPeers, ChannelSet};
pub use endpoint::Endpoint;
pub use socket::{EndpointPeer, FrameSocket, Frames, SocketRole, TransportError};
