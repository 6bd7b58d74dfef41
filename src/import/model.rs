use crate::submission::model::ExecutionRequest;
use indexmap::IndexMap;

/// Run-level values copied onto every execution.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunMetadata {
    pub run_name: Option<String>,
    pub external_run_id: Option<String>,
    pub project_id: Option<i32>,
}

/// What happens to a record whose ids do not resolve.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnmappedPolicy {
    Skip,
    Fail,
}

impl UnmappedPolicy {
    /// Skip wins over fail; with neither flag set the record is still skipped.
    pub fn from_flags(skip_unmapped: bool, fail_on_unmapped: bool) -> Self {
        if !skip_unmapped && fail_on_unmapped {
            UnmappedPolicy::Fail
        } else {
            UnmappedPolicy::Skip
        }
    }
}

/// Executions keyed by scenario id, in first-seen order.
pub type ScenarioGroups = IndexMap<i32, Vec<ExecutionRequest>>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunOutcome {
    Clean,
    SkippedUnmapped,
    SubmissionFailed,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Clean => 0,
            RunOutcome::SkippedUnmapped => 2,
            RunOutcome::SubmissionFailed => 3,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunSummary {
    pub files_processed: usize,
    pub records_parsed: usize,
    pub mapped: usize,
    pub skipped_unmapped: usize,
    pub posted: usize,
    pub failed: usize,
}

impl RunSummary {
    /// Failed executions outrank skipped records.
    pub fn outcome(&self) -> RunOutcome {
        if self.failed > 0 {
            RunOutcome::SubmissionFailed
        } else if self.skipped_unmapped > 0 {
            RunOutcome::SkippedUnmapped
        } else {
            RunOutcome::Clean
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_precedence() {
        assert_eq!(UnmappedPolicy::from_flags(true, true), UnmappedPolicy::Skip);
        assert_eq!(UnmappedPolicy::from_flags(true, false), UnmappedPolicy::Skip);
        assert_eq!(UnmappedPolicy::from_flags(false, true), UnmappedPolicy::Fail);
        assert_eq!(UnmappedPolicy::from_flags(false, false), UnmappedPolicy::Skip);
    }

    #[test]
    fn outcome_priority() {
        let mut summary = RunSummary::default();
        assert_eq!(summary.outcome(), RunOutcome::Clean);
        assert_eq!(summary.outcome().exit_code(), 0);

        summary.skipped_unmapped = 1;
        assert_eq!(summary.outcome(), RunOutcome::SkippedUnmapped);
        assert_eq!(summary.outcome().exit_code(), 2);

        summary.failed = 1;
        assert_eq!(summary.outcome(), RunOutcome::SubmissionFailed);
        assert_eq!(summary.outcome().exit_code(), 3);
    }
}
