//! Execution engine contract.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use serde_json::{Map, Value};
use thiserror::Error;

use crate::message::LanguageInfo;

/// Engine-reported failure. Reported to the client; the session continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{name}: {message}")]
pub struct ExecutionError {
    /// Error class name (`ename`).
    pub name: String,
    /// Error message (`evalue`).
    pub message: String,
    /// Line-oriented trace, may be empty.
    pub traceback: Vec<String>,
}

impl ExecutionError {
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            traceback: Vec::new(),
        }
    }

    /// Attach a trace. Multi-line strings are split into one entry per line.
    #[must_use]
    pub fn with_trace(mut self, trace: &str) -> Self {
        self.traceback = trace.lines().map(str::to_string).collect();
        self
    }
}

/// Successful evaluation outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// The engine's "no value" sentinel.
    NoValue,
    /// Textual rendering of the resulting value.
    Value(String),
}

/// Data passed to a display call.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayData {
    /// Raw mime-bundle map, forwarded as is.
    Raw(Map<String, Value>),
    /// Single textual representation, sent as `text/plain`.
    Text(String),
}

impl DisplayData {
    /// Mime bundle for the wire.
    #[must_use]
    pub fn into_bundle(self) -> Map<String, Value> {
        match self {
            Self::Raw(map) => map,
            Self::Text(text) => {
                let mut map = Map::new();
                map.insert("text/plain".to_string(), Value::String(text));
                map
            }
        }
    }
}

/// Options of a display call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayOptions {
    /// Tag for later targeted updates.
    pub display_id: Option<String>,
    /// Replace the output previously tagged with `display_id`.
    pub update: bool,
}

/// Request-scoped display capability handed to the engine.
pub trait DisplayHook {
    fn display(&mut self, data: DisplayData, options: DisplayOptions);
}

/// Shared flag an interrupt request trips and the engine polls.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
}

impl InterruptHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the running evaluation stop.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Consume a pending interrupt, if any.
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::SeqCst)
    }

    /// Drop any interrupt that arrived while nothing was running.
    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Evaluates submitted code against a session-owned context.
///
/// Implementations are called in-line by the session: `evaluate` runs to
/// completion before the next request is dispatched.
pub trait ExecutionEngine: Send + 'static {
    /// Persistent binding store, owned by the session.
    type Context: Default + Send;

    /// Evaluate `code`. `display` may be called any number of times before
    /// returning.
    ///
    /// # Errors
    /// Returns the engine-reported failure of the submitted code.
    fn evaluate(
        &mut self,
        code: &str,
        context: &mut Self::Context,
        display: &mut dyn DisplayHook,
    ) -> Result<Evaluation, ExecutionError>;

    /// Language metadata for `kernel_info_reply`.
    fn language_info(&self) -> LanguageInfo;

    /// Banner shown by front-ends.
    fn banner(&self) -> String {
        String::new()
    }

    /// Interrupt hook, if the engine can stop a running evaluation.
    fn interrupt_handle(&self) -> Option<InterruptHandle> {
        None
    }
}
