//! Reference execution engine for the notebook kernel.
//!
//! Provides:
//! - `ExpressionEngine` - Evaluator for the small `calc` expression language
//! - `Value` - Runtime values kept in the session's bindings

pub mod engine;
pub mod lexer;
pub mod parser;
pub mod value;

pub use engine::{Bindings, ExpressionEngine};
pub use value::Value;
