use serde::{Deserialize, Serialize};

/// How test case ids are read from test names. Chosen once per run.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq, Default, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum MappingStrategy {
    /// `TC` followed by 1-10 digits (or a custom pattern).
    #[default]
    Regex,
    /// Configured prefix, optional separators, digits of an optional exact length.
    PrefixSuffix,
    /// `TC` + exactly six digits and `TS` + six or seven digits, zero allowed.
    StrictTsTc,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MappingOptions {
    pub strategy: MappingStrategy,
    /// Custom case id regex; the first capture group holds the id.
    pub pattern: Option<String>,
    /// Custom scenario id regex; the first capture group holds the id.
    pub scenario_pattern: Option<String>,
    pub prefix: Option<String>,
    pub digits_length: Option<usize>,
}

/// Identifiers found for one test record.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ResolvedIdentifiers {
    pub scenario_id: Option<i32>,
    pub case_id: Option<i32>,
}

impl ResolvedIdentifiers {
    /// Scenario ids may be zero, case ids must be positive.
    pub fn mapped(&self) -> Option<(i32, i32)> {
        match (self.scenario_id, self.case_id) {
            (Some(scenario_id), Some(case_id)) if scenario_id >= 0 && case_id > 0 => {
                Some((scenario_id, case_id))
            }
            _ => None,
        }
    }
}
