//! Core building blocks of the notebook kernel session engine.
//!
//! This crate provides:
//! - `ConnectionConfig` - Parsed connection descriptor and channel addressing
//! - `Envelope` - Message model with typed contents
//! - `MessageCodec` - Frame encoding with HMAC signatures
//! - `ExecutionEngine` - Contract for pluggable code evaluation

pub mod codec;
pub mod config;
pub mod context;
pub mod message;
pub mod traits;

pub use codec::{CodecError, MessageCodec};
pub use config::{ChannelName, ConfigError, ConnectionConfig, SignatureScheme};
pub use context::EvaluationContext;
pub use message::{Envelope, Header, MessageContent};
pub use traits::{
    DisplayData, DisplayHook, DisplayOptions, Evaluation, ExecutionEngine, ExecutionError,
    InterruptHandle,
};
