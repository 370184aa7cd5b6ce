//! Run lifecycle status.

use serde::{Deserialize, Serialize};

/// State machine over a single run.
///
/// `Pending` -> `Running` -> `Completed` | `Failed` | `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Graph validated, run not yet started.
    Pending,
    /// One or more waves executed.
    Running,
    /// Terminal signal reached; final state returned.
    Completed,
    /// A fatal error surfaced.
    Failed,
    /// The cancellation signal was observed.
    Aborted,
}

impl RunStatus {
    /// Whether this status is a terminal disposition.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Aborted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Aborted.is_terminal());
    }

    #[test]
    fn status_serde_snake_case() {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Aborted,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            let parsed: RunStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, status);
        }
        assert_eq!(
            serde_json::to_string(&RunStatus::Aborted).unwrap(),
            "\"aborted\""
        );
    }
}
