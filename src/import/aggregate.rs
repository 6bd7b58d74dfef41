use crate::error::{ImportError, ImportResult};
use crate::import::model::{RunMetadata, ScenarioGroups, UnmappedPolicy};
use crate::mapping::resolver::IdentifierResolvers;
use crate::report::model::TestRecord;
use crate::submission::model::{ExecutionRequest, ExecutionStatus};
use tracing::{error, warn};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Placement {
    /// Appended to the group of this scenario.
    Grouped(i32),
    SkippedUnmapped,
}

/// Turns records into executions grouped by scenario id.
pub struct ScenarioAggregator {
    resolvers: IdentifierResolvers,
    policy: UnmappedPolicy,
    metadata: RunMetadata,
    groups: ScenarioGroups,
}

impl ScenarioAggregator {
    pub fn new(resolvers: IdentifierResolvers, policy: UnmappedPolicy, metadata: RunMetadata) -> Self {
        ScenarioAggregator {
            resolvers,
            policy,
            metadata,
            groups: ScenarioGroups::new(),
        }
    }

    /// Fails only for an unmapped record under [`UnmappedPolicy::Fail`].
    pub fn add(&mut self, record: TestRecord) -> ImportResult<Placement> {
        let identifiers = self.resolvers.identify(&record);
        let Some((scenario_id, case_id)) = identifiers.mapped() else {
            return match self.policy {
                UnmappedPolicy::Skip => {
                    warn!(
                        class_name = %record.class_name,
                        name = %record.name,
                        scenario_id = ?identifiers.scenario_id,
                        case_id = ?identifiers.case_id,
                        "unmapped test case skipped"
                    );
                    Ok(Placement::SkippedUnmapped)
                }
                UnmappedPolicy::Fail => {
                    error!(
                        class_name = %record.class_name,
                        name = %record.name,
                        scenario_id = ?identifiers.scenario_id,
                        case_id = ?identifiers.case_id,
                        "unmapped test case and fail-on-unmapped is enabled"
                    );
                    Err(ImportError::UnmappedIdentifier {
                        class_name: record.class_name,
                        name: record.name,
                    })
                }
            };
        };

        let execution = self.execution(record, scenario_id, case_id);
        self.groups.entry(scenario_id).or_default().push(execution);
        Ok(Placement::Grouped(scenario_id))
    }

    pub fn groups(&self) -> &ScenarioGroups {
        &self.groups
    }

    pub fn into_groups(self) -> ScenarioGroups {
        self.groups
    }

    fn execution(&self, record: TestRecord, scenario_id: i32, case_id: i32) -> ExecutionRequest {
        ExecutionRequest::builder()
            .test_case_id(case_id)
            .status(ExecutionStatus::from(record.outcome))
            .maybe_duration_ms(record.duration_seconds.map(duration_ms))
            .maybe_started_at(record.started_at)
            .maybe_finished_at(record.finished_at)
            .maybe_external_run_id(self.metadata.external_run_id.clone())
            .maybe_run_name(self.metadata.run_name.clone())
            .maybe_error_message(record.error_message)
            .maybe_error_details(record.error_details)
            .maybe_project_id(self.metadata.project_id)
            .scenario_id(scenario_id)
            .build()
    }
}

/// Seconds to whole milliseconds, halves rounded away from zero.
pub fn duration_ms(seconds: f64) -> i64 {
    (seconds * 1000.0).round() as i64
}
