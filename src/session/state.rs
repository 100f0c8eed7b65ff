//! Session lifecycle states.

use serde::{Deserialize, Serialize};

/// Where a session is in its lifecycle.
///
/// ```text
/// unstarted → starting → started ─┬─ resetting → started
///                                 └─ ending → ended
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    /// Members gather; no executions yet.
    #[default]
    Unstarted,
    /// Target environments are being set up.
    Starting,
    /// Live: nodes open, actions execute.
    Started,
    /// Executions are aborted and the mission is rebuilt.
    Resetting,
    /// Executions are aborted and environments torn down.
    Ending,
    /// Terminal; the session is destroyed right after.
    Ended,
}

impl SessionState {
    /// Wire name of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unstarted => "unstarted",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Resetting => "resetting",
            Self::Ending => "ending",
            Self::Ended => "ended",
        }
    }

    /// Whether the state machine allows moving to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Unstarted, Self::Starting)
                | (Self::Starting | Self::Resetting, Self::Started)
                | (Self::Started, Self::Resetting | Self::Ending)
                | (Self::Ending, Self::Ended)
        )
    }

    /// Whether a lifecycle transition is in progress.
    #[must_use]
    pub const fn is_transitioning(self) -> bool {
        matches!(self, Self::Starting | Self::Resetting | Self::Ending)
    }

    /// Whether members may still join or reconfigure the session.
    #[must_use]
    pub const fn is_open(self) -> bool {
        !matches!(self, Self::Ending | Self::Ended)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [SessionState; 6] = [
        SessionState::Unstarted,
        SessionState::Starting,
        SessionState::Started,
        SessionState::Resetting,
        SessionState::Ending,
        SessionState::Ended,
    ];

    #[test]
    fn allowed_transitions() {
        let allowed: Vec<_> = ALL
            .iter()
            .flat_map(|from| ALL.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| from.can_transition_to(*to))
            .map(|(from, to)| format!("{from}->{to}"))
            .collect();
        assert_eq!(
            allowed,
            [
                "unstarted->starting",
                "starting->started",
                "started->resetting",
                "started->ending",
                "resetting->started",
                "ending->ended",
            ]
        );
    }

    #[test]
    fn serializes_kebab_case() {
        assert_eq!(
            serde_json::to_value(SessionState::Resetting).unwrap(),
            "resetting"
        );
        let parsed: SessionState = serde_json::from_str("\"unstarted\"").unwrap();
        assert_eq!(parsed, SessionState::Unstarted);
    }

    #[test]
    fn ending_states_are_closed() {
        assert!(SessionState::Started.is_open());
        assert!(!SessionState::Ending.is_open());
        assert!(SessionState::Ending.is_transitioning());
        assert!(!SessionState::Ended.is_transitioning());
    }
}
