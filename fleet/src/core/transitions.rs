//! Daemon-owned worker status transitions.
//!
//! Maps a classified [`WorkerState`] (after any corrective action) to the next
//! [`WorkerStatus`], and decides whether the move raises an alert. Alerts fire
//! only when a worker enters `Escalated` or `Error`, never while it stays there.

use chrono::{DateTime, Duration, Utc};

use crate::core::state::WorkerRecord;
use crate::core::types::{Severity, WorkerState, WorkerStatus};

/// Why a transition raises an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertCause {
    OperatorQuestion,
    UnresolvedConfirmation,
    FatalOutput,
    Stale,
}

impl AlertCause {
    pub fn severity(self) -> Severity {
        match self {
            Self::OperatorQuestion | Self::UnresolvedConfirmation | Self::Stale => {
                Severity::Warning
            }
            Self::FatalOutput => Severity::Critical,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::OperatorQuestion => "worker asked for operator input",
            Self::UnresolvedConfirmation => "confirmation prompt unresolved after retries",
            Self::FatalOutput => "fatal marker in worker output",
            Self::Stale => "no output change past the stale threshold",
        }
    }
}

/// Result of applying an observation to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub status: WorkerStatus,
    pub alert: Option<AlertCause>,
}

impl Transition {
    pub fn changed_from(&self, current: WorkerStatus) -> bool {
        self.status != current
    }
}

/// Next status for a worker currently in `current` that was observed in
/// `observed`. An `AwaitingConfirmation` observation means corrective action
/// already ran and did not clear the prompt.
pub fn next_status(
    current: WorkerStatus,
    observed: WorkerState,
    dependencies_met: bool,
) -> Transition {
    let (status, cause) = match observed {
        WorkerState::Working => (WorkerStatus::Working, None),
        WorkerState::Idle if dependencies_met => (WorkerStatus::Idle, None),
        WorkerState::Idle => (WorkerStatus::Blocked, None),
        WorkerState::Completed => (WorkerStatus::Completed, None),
        WorkerState::AwaitingConfirmation => (
            WorkerStatus::Escalated,
            Some(AlertCause::UnresolvedConfirmation),
        ),
        WorkerState::QuestionForOperator => {
            (WorkerStatus::Escalated, Some(AlertCause::OperatorQuestion))
        }
        WorkerState::ErrorDetected => (WorkerStatus::Error, Some(AlertCause::FatalOutput)),
    };
    let alert = cause.filter(|_| status != current);
    Transition { status, alert }
}

/// How long a worker in `status` has been without activity, if that is at
/// least `threshold` and it has not been flagged yet. Only workers expected
/// to make progress (`Launched`, `Working`, `Idle`) can go stale.
pub fn stale_for(
    record: &WorkerRecord,
    status: WorkerStatus,
    now: DateTime<Utc>,
    threshold: Duration,
) -> Option<Duration> {
    if record.stale
        || !matches!(
            status,
            WorkerStatus::Launched | WorkerStatus::Working | WorkerStatus::Idle
        )
    {
        return None;
    }
    let idle = now - record.last_activity_at?;
    (idle >= threshold).then_some(idle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_states_map_without_alerts() {
        let t = next_status(WorkerStatus::Launched, WorkerState::Working, true);
        assert_eq!(t.status, WorkerStatus::Working);
        assert_eq!(t.alert, None);

        let t = next_status(WorkerStatus::Working, WorkerState::Completed, true);
        assert_eq!(t.status, WorkerStatus::Completed);
        assert_eq!(t.alert, None);
    }

    #[test]
    fn idle_with_unmet_dependencies_is_blocked() {
        let t = next_status(WorkerStatus::Launched, WorkerState::Idle, false);
        assert_eq!(t.status, WorkerStatus::Blocked);
        let t = next_status(WorkerStatus::Blocked, WorkerState::Idle, true);
        assert_eq!(t.status, WorkerStatus::Idle);
    }

    #[test]
    fn escalation_alerts_only_on_entry() {
        let t = next_status(WorkerStatus::Working, WorkerState::QuestionForOperator, true);
        assert_eq!(t.status, WorkerStatus::Escalated);
        assert_eq!(t.alert, Some(AlertCause::OperatorQuestion));

        let t = next_status(
            WorkerStatus::Escalated,
            WorkerState::AwaitingConfirmation,
            true,
        );
        assert_eq!(t.status, WorkerStatus::Escalated);
        assert_eq!(t.alert, None);
        assert!(!t.changed_from(WorkerStatus::Escalated));
    }

    #[test]
    fn fatal_output_is_critical_error() {
        let t = next_status(WorkerStatus::Working, WorkerState::ErrorDetected, true);
        assert_eq!(t.status, WorkerStatus::Error);
        let cause = t.alert.expect("alert");
        assert_eq!(cause.severity(), Severity::Critical);
    }

    #[test]
    fn escalated_worker_resumes_when_working_again() {
        let t = next_status(WorkerStatus::Escalated, WorkerState::Working, true);
        assert_eq!(t.status, WorkerStatus::Working);
        assert_eq!(t.alert, None);
    }

    #[test]
    fn stale_only_once_and_only_for_live_progress() {
        let t0 = Utc::now();
        let threshold = Duration::seconds(300);
        let mut record = WorkerRecord {
            last_activity_at: Some(t0),
            ..WorkerRecord::default()
        };
        let later = t0 + Duration::seconds(301);

        assert_eq!(stale_for(&record, WorkerStatus::Working, t0 + Duration::seconds(299), threshold), None);
        assert_eq!(
            stale_for(&record, WorkerStatus::Working, later, threshold),
            Some(Duration::seconds(301))
        );
        assert_eq!(stale_for(&record, WorkerStatus::Escalated, later, threshold), None);
        assert_eq!(stale_for(&record, WorkerStatus::Blocked, later, threshold), None);

        record.stale = true;
        assert_eq!(stale_for(&record, WorkerStatus::Idle, later, threshold), None);
    }
}
