//! Session orchestration for a notebook kernel.
//!
//! Provides:
//! - `Kernel` - Serve shell and control requests over a channel set
//! - `Session` - Execution counter, activity state and evaluation context
//! - Request decoding and the per-kind handlers

pub mod handlers;
pub mod kernel;
pub mod request;
pub mod session;

pub use kernel::{KERNEL_USERNAME, Kernel, KernelError, ShutdownHandle};
pub use request::{ContentError, Request};
pub use session::{ActivityState, Session};
