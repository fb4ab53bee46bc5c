use serde::{Deserialize, Serialize};

/// Lifecycle state of a compute task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Waiting,
    Running,
    Complete,
    Error,
    Cancelled,
    Invalid,
    Deleted,
}

impl TaskStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Complete | TaskStatus::Cancelled | TaskStatus::Invalid | TaskStatus::Deleted
        )
    }

    /// States a task must currently be in for a transition *to* `self`
    /// to be legal.
    pub fn allowed_from(self) -> &'static [TaskStatus] {
        match self {
            // claim by a worker
            TaskStatus::Running => &[TaskStatus::Waiting],
            // worker reports back
            TaskStatus::Complete | TaskStatus::Error => &[TaskStatus::Running],
            // claim abandoned (lease loss / admin)
            TaskStatus::Waiting => &[TaskStatus::Running],
            // administrative, from any non-terminal state
            TaskStatus::Cancelled | TaskStatus::Invalid | TaskStatus::Deleted => {
                &[TaskStatus::Waiting, TaskStatus::Running, TaskStatus::Error]
            }
        }
    }

    pub fn can_transition_from(self, from: TaskStatus) -> bool {
        self.allowed_from().contains(&from)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Waiting => "waiting",
            TaskStatus::Running => "running",
            TaskStatus::Complete => "complete",
            TaskStatus::Error => "error",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Invalid => "invalid",
            TaskStatus::Deleted => "deleted",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "running" => Ok(Self::Running),
            "complete" => Ok(Self::Complete),
            "error" => Ok(Self::Error),
            "cancelled" => Ok(Self::Cancelled),
            "invalid" => Ok(Self::Invalid),
            "deleted" => Ok(Self::Deleted),
            other => Err(format!("unknown TaskStatus: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TaskStatus::*;

    #[test]
    fn worker_lifecycle_transitions() {
        assert!(Running.can_transition_from(Waiting));
        assert!(Complete.can_transition_from(Running));
        assert!(Error.can_transition_from(Running));
        assert!(Waiting.can_transition_from(Running));
    }

    #[test]
    fn administrative_transitions_from_non_terminal() {
        for admin in [Cancelled, Invalid, Deleted] {
            assert!(admin.can_transition_from(Waiting));
            assert!(admin.can_transition_from(Running));
            assert!(admin.can_transition_from(Error));
        }
    }

    #[test]
    fn terminal_states_are_final() {
        for terminal in [Complete, Cancelled, Invalid, Deleted] {
            assert!(terminal.is_terminal());
            for target in [Waiting, Running, Complete, Error, Cancelled, Invalid, Deleted] {
                assert!(!target.can_transition_from(terminal));
            }
        }
    }

    #[test]
    fn same_state_is_not_a_transition() {
        for status in [Waiting, Running, Complete, Error, Cancelled, Invalid, Deleted] {
            assert!(!status.can_transition_from(status));
        }
    }

    #[test]
    fn waiting_cannot_jump_to_completion() {
        assert!(!Complete.can_transition_from(Waiting));
        assert!(!Error.can_transition_from(Waiting));
        assert!(!Running.can_transition_from(Error));
    }

    #[test]
    fn status_string_round_trip() {
        for status in [Waiting, Running, Complete, Error, Cancelled, Invalid, Deleted] {
            assert_eq!(status.to_string().parse::<super::TaskStatus>(), Ok(status));
        }
    }
}
