//! Evaluation context shared across execute requests.

use std::collections::HashMap;

/// Binding store an engine evaluates against.
///
/// One context lives for the whole session and is handed to the engine by
/// `&mut` on every execute request, so bindings made by one request are
/// visible to the next.
#[derive(Debug, Clone)]
pub struct EvaluationContext<V> {
    bindings: HashMap<String, V>,
}

impl<V> Default for EvaluationContext<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> EvaluationContext<V> {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bindings: HashMap::new(),
        }
    }

    /// Get a binding by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&V> {
        self.bindings.get(name)
    }

    /// Bind or rebind a name, returning the previous value.
    pub fn set(&mut self, name: impl Into<String>, value: V) -> Option<V> {
        self.bindings.insert(name.into(), value)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
