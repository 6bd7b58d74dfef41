use crate::cancel::Cancellation;
use crate::discovery::InputDiscovery;
use crate::error::{ImportError, ImportResult};
use crate::import::aggregate::{Placement, ScenarioAggregator};
use crate::import::model::{RunMetadata, RunSummary, ScenarioGroups, UnmappedPolicy};
use crate::mapping::resolver::IdentifierResolvers;
use crate::report::parser::ReportParser;
use crate::submission::client::SubmissionClient;
use crate::telemetry::{Clock, Counter, RunCounters};
use bon::Builder;
use std::sync::Arc;
use tracing::{error, info, info_span, Instrument};

/// Runs discovery, parsing, grouping and submission strictly in sequence.
#[derive(Builder)]
pub struct Importer {
    discovery: Arc<dyn InputDiscovery>,
    parser: Arc<dyn ReportParser>,
    /// Absent in dry-run mode.
    client: Option<Arc<dyn SubmissionClient>>,
    resolvers: IdentifierResolvers,
    policy: UnmappedPolicy,
    #[builder(default)]
    metadata: RunMetadata,
    #[builder(default)]
    dry_run: bool,
    counters: Arc<dyn RunCounters>,
    clock: Arc<dyn Clock>,
}

impl Importer {
    pub async fn run(&self, cancel: &Cancellation) -> ImportResult<RunSummary> {
        let span = info_span!(
            "import",
            run_name = self.metadata.run_name.as_deref().unwrap_or_default(),
            external_run_id = self.metadata.external_run_id.as_deref().unwrap_or_default(),
            project_id = self.metadata.project_id,
        );
        self.run_inner(cancel).instrument(span).await
    }

    async fn run_inner(&self, cancel: &Cancellation) -> ImportResult<RunSummary> {
        let started = self.clock.now();
        let files = self.discovery.discover(cancel).await?;

        let mut summary = RunSummary::default();
        let mut aggregator = ScenarioAggregator::new(
            self.resolvers.clone(),
            self.policy,
            self.metadata.clone(),
        );

        for file in &files {
            cancel.check()?;
            summary.files_processed += 1;
            self.counters.increment(Counter::FilesProcessed);

            let records = self.parser.parse(file, cancel).await.inspect_err(|e| {
                if !e.is_cancelled() {
                    error!(file = %file.display(), error = %e, "failed to parse report");
                }
            })?;
            summary.records_parsed += records.len();
            self.counters
                .add(Counter::TestCasesParsed, records.len() as u64);

            for record in records {
                cancel.check()?;
                match aggregator.add(record)? {
                    Placement::Grouped(_) => {
                        summary.mapped += 1;
                        self.counters.increment(Counter::TestCasesMapped);
                    }
                    Placement::SkippedUnmapped => {
                        summary.skipped_unmapped += 1;
                        self.counters.increment(Counter::TestCasesSkippedUnmapped);
                    }
                }
            }
        }

        let groups = aggregator.into_groups();
        if self.dry_run {
            info!(
                groups = groups.len(),
                executions = groups.values().map(Vec::len).sum::<usize>(),
                "dry run, no executions submitted"
            );
        } else {
            self.submit_groups(&groups, &mut summary, cancel).await?;
        }

        let elapsed = self.clock.now() - started;
        info!(
            files = summary.files_processed,
            parsed = summary.records_parsed,
            mapped = summary.mapped,
            skipped_unmapped = summary.skipped_unmapped,
            posted = summary.posted,
            failed = summary.failed,
            outcome = ?summary.outcome(),
            elapsed_ms = elapsed.num_milliseconds(),
            "import finished"
        );
        Ok(summary)
    }

    /// One call per group. A failed group does not stop the others.
    async fn submit_groups(
        &self,
        groups: &ScenarioGroups,
        summary: &mut RunSummary,
        cancel: &Cancellation,
    ) -> ImportResult<()> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| ImportError::config("no submission client configured"))?;

        for (scenario_id, executions) in groups {
            let span = info_span!("scenario", scenario_id, executions = executions.len());
            let result = client.submit(executions, cancel).instrument(span).await?;

            summary.posted += result.posted;
            summary.failed += result.failed;
            self.counters
                .add(Counter::ExecutionsPosted, result.posted as u64);
            self.counters
                .add(Counter::ExecutionsFailed, result.failed as u64);

            if !result.success {
                error!(
                    scenario_id,
                    error = result.error_message.as_deref().unwrap_or("failed"),
                    "submission failed for scenario"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::model::RunOutcome;
    use crate::mapping::model::{MappingOptions, MappingStrategy};
    use crate::report::model::{TestOutcome, TestRecord};
    use crate::submission::model::{ExecutionRequest, SubmitResult};
    use crate::telemetry::{AtomicCounters, SystemClock};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    struct FixedFiles(Vec<PathBuf>);

    #[async_trait]
    impl InputDiscovery for FixedFiles {
        async fn discover(&self, _cancel: &Cancellation) -> ImportResult<Vec<PathBuf>> {
            Ok(self.0.clone())
        }
    }

    /// Returns canned records per file; files without an entry fail to parse.
    struct CannedParser(HashMap<PathBuf, Vec<TestRecord>>);

    #[async_trait]
    impl ReportParser for CannedParser {
        async fn parse(&self, path: &Path, _cancel: &Cancellation) -> ImportResult<Vec<TestRecord>> {
            self.0.get(path).cloned().ok_or_else(|| ImportError::Parse {
                path: path.to_path_buf(),
                source: crate::error::ReportError::UnexpectedEof {
                    element: "testsuite".to_string(),
                },
            })
        }
    }

    #[derive(Default)]
    struct RecordingClient {
        calls: Mutex<Vec<Vec<ExecutionRequest>>>,
        fail_scenario: Option<i32>,
    }

    #[async_trait]
    impl SubmissionClient for RecordingClient {
        async fn submit(
            &self,
            executions: &[ExecutionRequest],
            _cancel: &Cancellation,
        ) -> ImportResult<SubmitResult> {
            self.calls.lock().unwrap().push(executions.to_vec());
            if executions.first().map(|e| e.scenario_id) == self.fail_scenario {
                Ok(SubmitResult::failed(executions.len(), "HTTP 400"))
            } else {
                Ok(SubmitResult::posted(executions.len()))
            }
        }
    }

    fn record(name: &str, outcome: TestOutcome) -> TestRecord {
        TestRecord::builder()
            .class_name("Suite".to_string())
            .name(name.to_string())
            .outcome(outcome)
            .duration_seconds(0.5)
            .build()
    }

    struct Fixture {
        files: Vec<(PathBuf, Vec<TestRecord>)>,
        policy: UnmappedPolicy,
        dry_run: bool,
        client: Arc<RecordingClient>,
        counters: Arc<AtomicCounters>,
    }

    impl Fixture {
        fn new(files: Vec<(&str, Vec<TestRecord>)>) -> Self {
            Fixture {
                files: files
                    .into_iter()
                    .map(|(name, records)| (PathBuf::from(name), records))
                    .collect(),
                policy: UnmappedPolicy::Skip,
                dry_run: false,
                client: Arc::new(RecordingClient::default()),
                counters: Arc::new(AtomicCounters::new()),
            }
        }

        fn importer(&self, extra_files: &[&str]) -> Importer {
            let mut paths: Vec<PathBuf> = self.files.iter().map(|(p, _)| p.clone()).collect();
            paths.extend(extra_files.iter().map(PathBuf::from));
            let resolvers = IdentifierResolvers::from_options(&MappingOptions {
                strategy: MappingStrategy::StrictTsTc,
                ..Default::default()
            })
            .unwrap();
            Importer::builder()
                .discovery(Arc::new(FixedFiles(paths)))
                .parser(Arc::new(CannedParser(self.files.iter().cloned().collect())))
                .client(self.client.clone())
                .resolvers(resolvers)
                .policy(self.policy)
                .metadata(RunMetadata {
                    run_name: Some("nightly".to_string()),
                    external_run_id: None,
                    project_id: Some(4),
                })
                .dry_run(self.dry_run)
                .counters(self.counters.clone())
                .clock(Arc::new(SystemClock))
                .build()
        }

        fn calls(&self) -> Vec<Vec<ExecutionRequest>> {
            self.client.calls.lock().unwrap().clone()
        }
    }

    #[tokio::test]
    async fn groups_across_files_one_call_per_scenario() {
        let fixture = Fixture::new(vec![
            (
                "a.xml",
                vec![
                    record("TS000002 TC000010", TestOutcome::Passed),
                    record("TS000001 TC000011", TestOutcome::Failed),
                ],
            ),
            ("b.xml", vec![record("TS000002 TC000012", TestOutcome::Skipped)]),
        ]);

        let summary = fixture.importer(&[]).run(&Cancellation::new()).await.unwrap();

        assert_eq!(summary.files_processed, 2);
        assert_eq!(summary.records_parsed, 3);
        assert_eq!(summary.mapped, 3);
        assert_eq!(summary.posted, 3);
        assert_eq!(summary.outcome(), RunOutcome::Clean);

        let calls = fixture.calls();
        assert_eq!(calls.len(), 2);
        let first: Vec<i32> = calls[0].iter().map(|e| e.test_case_id).collect();
        assert_eq!(first, vec![10, 12]);
        assert!(calls[0].iter().all(|e| e.scenario_id == 2));
        assert_eq!(calls[1][0].test_case_id, 11);
        assert_eq!(calls[1][0].project_id, Some(4));
        assert_eq!(calls[1][0].duration_ms, Some(500));

        assert_eq!(fixture.counters.get(Counter::FilesProcessed), 2);
        assert_eq!(fixture.counters.get(Counter::ExecutionsPosted), 3);
    }

    #[tokio::test]
    async fn unmapped_records_are_skipped_without_submission() {
        let fixture = Fixture::new(vec![(
            "a.xml",
            vec![
                record("no ids at all", TestOutcome::Passed),
                record("TC000001 only", TestOutcome::Passed),
            ],
        )]);

        let summary = fixture.importer(&[]).run(&Cancellation::new()).await.unwrap();

        assert_eq!(summary.skipped_unmapped, 2);
        assert_eq!(summary.outcome(), RunOutcome::SkippedUnmapped);
        assert_eq!(summary.outcome().exit_code(), 2);
        assert!(fixture.calls().is_empty());
        assert_eq!(fixture.counters.get(Counter::TestCasesSkippedUnmapped), 2);
    }

    #[tokio::test]
    async fn fail_on_unmapped_aborts_the_run() {
        let mut fixture = Fixture::new(vec![(
            "a.xml",
            vec![
                record("TS000001 TC000001", TestOutcome::Passed),
                record("nothing here", TestOutcome::Passed),
            ],
        )]);
        fixture.policy = UnmappedPolicy::Fail;

        let result = fixture.importer(&[]).run(&Cancellation::new()).await;

        assert!(matches!(result, Err(ImportError::UnmappedIdentifier { .. })));
        assert!(fixture.calls().is_empty());
    }

    #[tokio::test]
    async fn parse_failure_aborts_remaining_files() {
        let fixture = Fixture::new(vec![(
            "good.xml",
            vec![record("TS000001 TC000001", TestOutcome::Passed)],
        )]);

        let result = fixture
            .importer(&["broken.xml"])
            .run(&Cancellation::new())
            .await;

        match result {
            Err(err @ ImportError::Parse { .. }) => assert_eq!(err.exit_code(), 2),
            other => panic!("expected parse error, got {other:?}"),
        }
        assert!(fixture.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_group_does_not_stop_the_others() {
        let mut fixture = Fixture::new(vec![(
            "a.xml",
            vec![
                record("TS000001 TC000001", TestOutcome::Passed),
                record("TS000001 TC000002", TestOutcome::Passed),
                record("TS000002 TC000003", TestOutcome::Passed),
            ],
        )]);
        fixture.client = Arc::new(RecordingClient {
            fail_scenario: Some(1),
            ..Default::default()
        });

        let summary = fixture.importer(&[]).run(&Cancellation::new()).await.unwrap();

        assert_eq!(fixture.calls().len(), 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.posted, 1);
        assert_eq!(summary.outcome(), RunOutcome::SubmissionFailed);
        assert_eq!(summary.outcome().exit_code(), 3);
        assert_eq!(fixture.counters.get(Counter::ExecutionsFailed), 2);
    }

    #[tokio::test]
    async fn dry_run_submits_nothing() {
        let mut fixture = Fixture::new(vec![(
            "a.xml",
            vec![
                record("TS000001 TC000001", TestOutcome::Passed),
                record("unmapped", TestOutcome::Passed),
            ],
        )]);
        fixture.dry_run = true;

        let summary = fixture.importer(&[]).run(&Cancellation::new()).await.unwrap();

        assert!(fixture.calls().is_empty());
        assert_eq!(summary.mapped, 1);
        assert_eq!(summary.posted, 0);
        assert_eq!(summary.outcome(), RunOutcome::SkippedUnmapped);
    }

    #[tokio::test]
    async fn cancellation_stops_between_files() {
        let fixture = Fixture::new(vec![(
            "a.xml",
            vec![record("TS000001 TC000001", TestOutcome::Passed)],
        )]);
        let cancel = Cancellation::new();
        cancel.cancel();

        let result = fixture.importer(&[]).run(&cancel).await;

        assert!(matches!(result, Err(ImportError::Cancelled)));
        assert!(fixture.calls().is_empty());
    }
}
