use crate::entity::EntityId;
use crate::errors::SyncError;
use gateway::GatewayError;

#[derive(Clone, Debug, PartialEq)]
pub struct LoadReport {
    pub seq: u64,
    pub entities: usize,
    /// Entities whose related items could not be fetched and were left empty.
    pub join_failures: Vec<EntityId>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LoadOutcome {
    Applied(LoadReport),
    /// A newer load was dispatched before this one finished. Nothing was
    /// written to the cache.
    Superseded,
}

#[derive(Clone, Debug, PartialEq)]
pub enum MutationOutcome {
    Confirmed,
    RolledBack(GatewayError),
    /// The cache was reloaded or the screen closed while the call was in
    /// flight. The result was dropped.
    Orphaned,
}

impl MutationOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, MutationOutcome::Confirmed)
    }
}

/// Aggregate of a bulk fan-out. Partial failure is a normal outcome.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchSummary {
    pub succeeded: Vec<EntityId>,
    pub failed: Vec<(EntityId, SyncError)>,
    pub orphaned: usize,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len() + self.orphaned
    }

    pub fn is_partial_failure(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn message(&self) -> String {
        format!(
            "{} succeeded, {} failed.",
            self.succeeded.len(),
            self.failed.len()
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Error,
}

/// A user-visible message queued for the presentation layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn success<S: Into<String>>(message: S) -> Self {
        Notice {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn error<S: Into<String>>(message: S) -> Self {
        Notice {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_message() {
        let summary = BatchSummary {
            succeeded: vec!["1".into(), "2".into(), "3".into(), "4".into()],
            failed: vec![(
                "5".into(),
                SyncError::Gateway(GatewayError::Rejected {
                    status: 500,
                    message: None,
                }),
            )],
            orphaned: 0,
        };
        assert_eq!(summary.message(), "4 succeeded, 1 failed.");
        assert_eq!(summary.total(), 5);
        assert!(summary.is_partial_failure());
    }
}
