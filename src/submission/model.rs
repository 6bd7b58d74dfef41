use crate::report::model::TestOutcome;
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Step status understood by the test management service.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExecutionStatus {
    Pass,
    Failed,
    Incomplete,
    NotRun,
}

impl From<TestOutcome> for ExecutionStatus {
    fn from(outcome: TestOutcome) -> Self {
        match outcome {
            TestOutcome::Passed => ExecutionStatus::Pass,
            TestOutcome::Failed => ExecutionStatus::Failed,
            TestOutcome::Error => ExecutionStatus::Incomplete,
            TestOutcome::Skipped => ExecutionStatus::NotRun,
        }
    }
}

/// One test case execution queued for submission.
#[derive(Clone, Debug, PartialEq, Builder)]
pub struct ExecutionRequest {
    pub test_case_id: i32,
    pub status: ExecutionStatus,
    pub duration_ms: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub external_run_id: Option<String>,
    pub run_name: Option<String>,
    pub error_message: Option<String>,
    pub error_details: Option<String>,
    pub project_id: Option<i32>,
    /// Grouping key only, sent inside `testScenarioInfo`.
    pub scenario_id: i32,
}

/// Outcome of one submit call. A batch succeeds or fails as a whole.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubmitResult {
    pub success: bool,
    pub posted: usize,
    pub failed: usize,
    pub error_message: Option<String>,
}

impl SubmitResult {
    pub fn posted(count: usize) -> Self {
        SubmitResult {
            success: true,
            posted: count,
            failed: 0,
            error_message: None,
        }
    }

    pub fn failed(count: usize, error_message: impl Into<String>) -> Self {
        SubmitResult {
            success: false,
            posted: 0,
            failed: count,
            error_message: Some(error_message.into()),
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExecutionDto<'a> {
    test_case_id: i32,
    steps: [StepDto; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    execution_duration: Option<DurationDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    external_run_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    run_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_details: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    project_id: Option<i32>,
    test_scenario_info: ScenarioInfoDto,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct StepDto {
    index: u32,
    status: ExecutionStatus,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct DurationDto {
    field_value_type: &'static str,
    value: f64,
    unit: &'static str,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ScenarioInfoDto {
    index: usize,
    test_scenario_id: i32,
    test_job_id: usize,
}

impl<'a> ExecutionDto<'a> {
    /// `position` is 1-based within the submitted batch.
    pub(crate) fn new(request: &'a ExecutionRequest, position: usize) -> Self {
        ExecutionDto {
            test_case_id: request.test_case_id,
            steps: [StepDto {
                index: 1,
                status: request.status,
            }],
            execution_duration: request.duration_ms.map(|ms| DurationDto {
                field_value_type: "TimeSpan",
                value: ms as f64 / 1000.0,
                unit: "Second",
            }),
            started_at: request.started_at,
            finished_at: request.finished_at,
            external_run_id: request.external_run_id.as_deref(),
            run_name: request.run_name.as_deref(),
            error_message: request.error_message.as_deref(),
            error_details: request.error_details.as_deref(),
            project_id: request.project_id,
            test_scenario_info: ScenarioInfoDto {
                index: position,
                test_scenario_id: request.scenario_id,
                test_job_id: position,
            },
        }
    }
}

/// Numbers each request by its position in this batch.
pub(crate) fn batch_payload(executions: &[ExecutionRequest]) -> Vec<ExecutionDto<'_>> {
    executions
        .iter()
        .enumerate()
        .map(|(i, request)| ExecutionDto::new(request, i + 1))
        .collect()
}
