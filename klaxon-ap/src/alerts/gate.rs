//! Upstream alert gate (quiet hours, profiles)
//!
//! How a veto is decided lives outside this crate; the engine only asks the
//! gate before consulting the cooldown. A veto never touches cooldown state.

use klaxon_common::TransitionEvent;

/// Decides whether a transition may alert at all
pub trait AlertGate: Send + Sync {
    fn permits(&self, event: &TransitionEvent) -> bool;
}

/// Gate that permits every alert
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl AlertGate for AllowAll {
    fn permits(&self, _event: &TransitionEvent) -> bool {
        true
    }
}

impl<F> AlertGate for F
where
    F: Fn(&TransitionEvent) -> bool + Send + Sync,
{
    fn permits(&self, event: &TransitionEvent) -> bool {
        self(event)
    }
}
