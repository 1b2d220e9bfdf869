//! Kernel session state.

use uuid::Uuid;

/// Whether an execute request is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivityState {
    #[default]
    Idle,
    Busy,
}

/// State of one kernel session: identity, execution counter, activity and
/// the engine's evaluation context.
///
/// Owned by the kernel task; only execute requests mutate it.
#[derive(Debug)]
pub struct Session<C> {
    id: String,
    execution_count: u32,
    activity: ActivityState,
    context: C,
}

impl<C: Default> Session<C> {
    /// Fresh session with a random id and an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string(), C::default())
    }
}

impl<C: Default> Default for Session<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Session<C> {
    #[must_use]
    pub fn with_id(id: impl Into<String>, context: C) -> Self {
        Self {
            id: id.into(),
            execution_count: 0,
            activity: ActivityState::Idle,
            context,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub const fn execution_count(&self) -> u32 {
        self.execution_count
    }

    #[must_use]
    pub const fn activity(&self) -> ActivityState {
        self.activity
    }

    pub const fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    /// Enter `Busy` and take the next execution number.
    pub fn begin_execute(&mut self) -> u32 {
        debug_assert_eq!(self.activity, ActivityState::Idle, "execute already in flight");
        self.execution_count = self.execution_count.saturating_add(1);
        self.activity = ActivityState::Busy;
        self.execution_count
    }

    /// Return to `Idle`.
    pub fn finish_execute(&mut self) {
        self.activity = ActivityState::Idle;
    }
}
