//! Bridge lifecycle states.
//!
//! The state machine itself (transition rules, method availability) lives
//! in the `bridge` crate; this is the shared vocabulary other crates use
//! to report and gate on the current state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the bridge is in its hardening progression.
///
/// States are ordered: a bridge only ever moves forward through
/// `Lockdown → Bonding → Configuring → Hardening → Operational`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Fresh start, no admin bonded. Only the admin claim is possible.
    Lockdown,
    /// A claim challenge has been issued and awaits its response.
    Bonding,
    /// Admin bonded; configuration methods are open.
    Configuring,
    /// Configuration complete; hardening checks are running.
    Hardening,
    /// Fully operational; workers may be started.
    Operational,
}

impl LifecycleState {
    /// The wire name of this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Lockdown => "lockdown",
            LifecycleState::Bonding => "bonding",
            LifecycleState::Configuring => "configuring",
            LifecycleState::Hardening => "hardening",
            LifecycleState::Operational => "operational",
        }
    }

    /// The next state in the progression, if any.
    pub fn next(&self) -> Option<LifecycleState> {
        match self {
            LifecycleState::Lockdown => Some(LifecycleState::Bonding),
            LifecycleState::Bonding => Some(LifecycleState::Configuring),
            LifecycleState::Configuring => Some(LifecycleState::Hardening),
            LifecycleState::Hardening => Some(LifecycleState::Operational),
            LifecycleState::Operational => None,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_progress_forward_only() {
        let mut state = LifecycleState::Lockdown;
        let mut seen = vec![state];
        while let Some(next) = state.next() {
            assert!(next > state);
            state = next;
            seen.push(state);
        }
        assert_eq!(seen.len(), 5);
        assert_eq!(state, LifecycleState::Operational);
    }

    #[test]
    fn wire_names() {
        assert_eq!(LifecycleState::Lockdown.as_str(), "lockdown");
        assert_eq!(
            serde_json::to_string(&LifecycleState::Operational).unwrap(),
            "\"operational\""
        );
    }
}
