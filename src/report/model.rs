use bon::Builder;
use chrono::{DateTime, Utc};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum TestOutcome {
    #[default]
    Passed,
    Failed,
    Error,
    Skipped,
}

/// One `<testcase>` as read from a report.
#[derive(Clone, Debug, PartialEq, Builder)]
pub struct TestRecord {
    #[builder(default)]
    pub class_name: String,
    pub name: String,
    pub duration_seconds: Option<f64>,
    #[builder(default)]
    pub outcome: TestOutcome,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub error_details: Option<String>,
    /// Value of a `case_id` property on the test case, when present.
    pub case_id: Option<i32>,
}

impl TestRecord {
    /// `{class_name}.{name}`, or just the name when the class is blank.
    pub fn qualified_name(&self) -> String {
        if self.class_name.trim().is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.class_name, self.name)
        }
    }
}
