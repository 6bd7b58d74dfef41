use crate::cancel::Cancellation;
use crate::error::{ImportError, ImportResult, ReportError};
use crate::report::model::{TestOutcome, TestRecord};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::path::Path;
use tokio::io::BufReader;
use tracing::debug;

const NAIVE_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

#[async_trait]
pub trait ReportParser: Send + Sync {
    /// Reads every test case of the report at `path`, in document order.
    async fn parse(&self, path: &Path, cancel: &Cancellation) -> ImportResult<Vec<TestRecord>>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct JUnitParser;

#[async_trait]
impl ReportParser for JUnitParser {
    async fn parse(&self, path: &Path, cancel: &Cancellation) -> ImportResult<Vec<TestRecord>> {
        let parse_error = |source: ReportError| ImportError::Parse {
            path: path.to_path_buf(),
            source,
        };

        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| parse_error(e.into()))?;
        let mut reader = Reader::from_reader(BufReader::new(file));
        let mut state = ReportState::default();
        let mut buf = Vec::new();

        loop {
            cancel.check()?;
            let event = reader
                .read_event_into_async(&mut buf)
                .await
                .map_err(|e| parse_error(e.into()))?;
            match event {
                Event::Start(element) => state
                    .open(&element, false)
                    .map_err(|e| parse_error(e.into()))?,
                Event::Empty(element) => state
                    .open(&element, true)
                    .map_err(|e| parse_error(e.into()))?,
                Event::End(_) => state.close(),
                Event::Text(text) => {
                    if state.is_capturing() {
                        let text = text.unescape().map_err(|e| parse_error(e.into()))?;
                        state.append_text(&text);
                    }
                }
                Event::CData(data) => {
                    if state.is_capturing() {
                        state.append_text(&String::from_utf8_lossy(&data.into_inner()));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        let records = state.finish().map_err(parse_error)?;
        debug!(path = %path.display(), records = records.len(), "parsed report");
        Ok(records)
    }
}

enum ChildKind {
    /// `<failure>` / `<error>`: text content becomes the error details.
    Issue(String),
    Properties,
    Ignored,
}

struct Child {
    level: usize,
    kind: ChildKind,
}

struct CaseBuilder {
    level: usize,
    class_name: String,
    name: String,
    duration_seconds: Option<f64>,
    outcome: TestOutcome,
    error_message: Option<String>,
    error_details: Option<String>,
    case_id: Option<i32>,
    child: Option<Child>,
}

impl CaseBuilder {
    fn open(element: &BytesStart<'_>, level: usize) -> quick_xml::Result<Self> {
        let class_name = match attribute(element, "classname")? {
            Some(class_name) => class_name,
            None => attribute(element, "class")?.unwrap_or_default(),
        };
        Ok(Self {
            level,
            class_name,
            name: attribute(element, "name")?.unwrap_or_default(),
            duration_seconds: parse_duration_seconds(attribute(element, "time")?.as_deref()),
            outcome: TestOutcome::Passed,
            error_message: None,
            error_details: None,
            case_id: None,
            child: None,
        })
    }

    fn open_child(&mut self, element: &BytesStart<'_>, level: usize, empty: bool) -> quick_xml::Result<()> {
        let kind = match element.local_name().as_ref() {
            b"failure" => self.issue(TestOutcome::Failed, element)?,
            b"error" => self.issue(TestOutcome::Error, element)?,
            b"skipped" | b"ignored" => {
                self.outcome = TestOutcome::Skipped;
                self.error_message = attribute(element, "message")?;
                self.error_details = None;
                ChildKind::Ignored
            }
            b"properties" => ChildKind::Properties,
            _ => ChildKind::Ignored,
        };
        if !empty {
            self.child = Some(Child { level, kind });
        }
        Ok(())
    }

    fn issue(&mut self, outcome: TestOutcome, element: &BytesStart<'_>) -> quick_xml::Result<ChildKind> {
        self.outcome = outcome;
        self.error_message = attribute(element, "message")?;
        self.error_details = None;
        Ok(ChildKind::Issue(String::new()))
    }

    fn open_nested(&mut self, element: &BytesStart<'_>) -> quick_xml::Result<()> {
        let in_properties = matches!(
            self.child,
            Some(Child {
                kind: ChildKind::Properties,
                ..
            })
        );
        if in_properties && element.local_name().as_ref() == b"property" {
            let name = attribute(element, "name")?;
            let value = attribute(element, "value")?;
            if self.case_id.is_none() && name.as_deref() == Some("case_id") {
                self.case_id = value.and_then(|v| v.trim().parse::<i32>().ok());
            }
        }
        Ok(())
    }

    fn build(self, suite_timestamp: Option<DateTime<Utc>>) -> Option<TestRecord> {
        if self.name.trim().is_empty() {
            return None;
        }
        // Only the suite start time is known, so every case in a suite starts there.
        let finished_at = match (suite_timestamp, self.duration_seconds) {
            (Some(started), Some(seconds)) => {
                started.checked_add_signed(Duration::microseconds((seconds * 1_000_000.0).round() as i64))
            }
            _ => None,
        };
        Some(TestRecord {
            class_name: self.class_name,
            name: self.name,
            duration_seconds: self.duration_seconds,
            outcome: self.outcome,
            started_at: suite_timestamp,
            finished_at,
            error_message: self.error_message,
            error_details: self.error_details,
            case_id: self.case_id,
        })
    }
}

#[derive(Default)]
struct ReportState {
    open_elements: Vec<String>,
    suite_timestamp: Option<DateTime<Utc>>,
    current: Option<CaseBuilder>,
    records: Vec<TestRecord>,
}

impl ReportState {
    fn open(&mut self, element: &BytesStart<'_>, empty: bool) -> quick_xml::Result<()> {
        let level = self.open_elements.len();
        if let Some(case) = self.current.as_mut() {
            if case.child.is_some() {
                case.open_nested(element)?;
            } else {
                case.open_child(element, level, empty)?;
            }
        } else {
            match element.local_name().as_ref() {
                b"testsuite" | b"suite" => {
                    self.suite_timestamp = parse_timestamp(attribute(element, "timestamp")?.as_deref());
                }
                b"testcase" => {
                    let case = CaseBuilder::open(element, level)?;
                    if empty {
                        self.emit(case);
                    } else {
                        self.current = Some(case);
                    }
                }
                _ => {}
            }
        }
        if !empty {
            self.open_elements
                .push(String::from_utf8_lossy(element.local_name().as_ref()).into_owned());
        }
        Ok(())
    }

    fn close(&mut self) {
        self.open_elements.pop();
        let level = self.open_elements.len();
        let Some(case) = self.current.as_mut() else {
            return;
        };
        if let Some(child) = case.child.take() {
            if child.level == level {
                if let ChildKind::Issue(text) = child.kind {
                    case.error_details = (!text.is_empty()).then_some(text);
                }
            } else {
                case.child = Some(child);
            }
        } else if case.level == level {
            if let Some(case) = self.current.take() {
                self.emit(case);
            }
        }
    }

    fn is_capturing(&self) -> bool {
        matches!(
            self.current.as_ref().and_then(|case| case.child.as_ref()),
            Some(Child {
                kind: ChildKind::Issue(_),
                ..
            })
        )
    }

    fn append_text(&mut self, text: &str) {
        // whitespace-only nodes between nested elements carry no content
        if text.trim().is_empty() {
            return;
        }
        if let Some(Child {
            kind: ChildKind::Issue(details),
            ..
        }) = self.current.as_mut().and_then(|case| case.child.as_mut())
        {
            details.push_str(text);
        }
    }

    fn emit(&mut self, case: CaseBuilder) {
        match case.build(self.suite_timestamp) {
            Some(record) => self.records.push(record),
            None => debug!("dropping test case without a name"),
        }
    }

    fn finish(self) -> Result<Vec<TestRecord>, ReportError> {
        match self.open_elements.last() {
            Some(element) => Err(ReportError::UnexpectedEof {
                element: element.clone(),
            }),
            None => Ok(self.records),
        }
    }
}

fn attribute(element: &BytesStart<'_>, name: &str) -> quick_xml::Result<Option<String>> {
    match element.try_get_attribute(name)? {
        Some(attr) => Ok(Some(attr.unescape_value()?.into_owned())),
        None => Ok(None),
    }
}

/// Seconds from a `time` attribute; accepts `0.5` and `0,5`.
pub(crate) fn parse_duration_seconds(raw: Option<&str>) -> Option<f64> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    let seconds = raw
        .parse::<f64>()
        .ok()
        .or_else(|| raw.replace(',', ".").parse::<f64>().ok())?;
    (seconds.is_finite() && seconds >= 0.0).then_some(seconds)
}

/// Suite timestamp as UTC; naive values are taken to be UTC already.
pub(crate) fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(timestamp.with_timezone(&Utc));
    }
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .map(|naive| Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SUREFIRE_SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<testsuites>
  <testsuite name="Sample" tests="4" timestamp="2025-08-20T12:34:56Z">
    <testcase classname="WebTests.LoginTests" name="Should login [TC:123]" time="0.123"/>
    <testcase classname="ApiTests.Health" name="Health check TC-42" time="0.045">
      <failure message="Assertion failed" type="AssertionError">
        Expected 200 OK but was 500 Internal Server Error
      </failure>
      <system-out>ignored output</system-out>
    </testcase>
    <testcase classname="CalcTests.Divide" name="Divide by zero [TC:777]" time="0.001">
      <error message="System.DivideByZeroException: Attempted to divide by zero." type="System.DivideByZeroException"/>
    </testcase>
    <testcase classname="FeatureX.Skips" name="Skipped case TC 999" time="0">
      <skipped message="Flaky test quarantine">not captured</skipped>
    </testcase>
  </testsuite>
</testsuites>
"#;

    fn report_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    async fn parse(content: &str) -> ImportResult<Vec<TestRecord>> {
        let file = report_file(content);
        JUnitParser.parse(file.path(), &Cancellation::new()).await
    }

    fn suite_start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 20, 12, 34, 56).unwrap()
    }

    #[tokio::test]
    async fn parses_surefire_sample() {
        let records = parse(SUREFIRE_SAMPLE).await.unwrap();
        assert_eq!(records.len(), 4);

        let passed = &records[0];
        assert_eq!(passed.class_name, "WebTests.LoginTests");
        assert_eq!(passed.name, "Should login [TC:123]");
        assert_eq!(passed.outcome, TestOutcome::Passed);
        assert!((passed.duration_seconds.unwrap() - 0.123).abs() < 1e-9);
        assert_eq!(passed.error_message, None);
        assert_eq!(passed.error_details, None);
        assert_eq!(passed.started_at, Some(suite_start()));
        assert_eq!(
            passed.finished_at,
            Some(suite_start() + Duration::milliseconds(123))
        );

        let failed = &records[1];
        assert_eq!(failed.outcome, TestOutcome::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("Assertion failed"));
        assert!(failed
            .error_details
            .as_deref()
            .unwrap()
            .contains("Expected 200 OK but was 500 Internal Server Error"));
        assert_eq!(
            failed.finished_at,
            Some(suite_start() + Duration::milliseconds(45))
        );

        let errored = &records[2];
        assert_eq!(errored.outcome, TestOutcome::Error);
        assert!(errored
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("System.DivideByZeroException"));
        assert_eq!(errored.error_details, None);

        let skipped = &records[3];
        assert_eq!(skipped.outcome, TestOutcome::Skipped);
        assert_eq!(skipped.error_message.as_deref(), Some("Flaky test quarantine"));
        assert_eq!(skipped.error_details, None);
        assert_eq!(skipped.duration_seconds, Some(0.0));
        assert_eq!(skipped.finished_at, Some(suite_start()));
    }

    #[tokio::test]
    async fn drops_cases_without_name_and_reads_class_fallback() {
        let records = parse(
            r#"<testsuite>
                 <testcase classname="A" name="" time="1"/>
                 <testcase class="com.example.B" name="kept" time="1,5"/>
                 <testcase classname="C" time="2"/>
               </testsuite>"#,
        )
        .await
        .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].class_name, "com.example.B");
        assert_eq!(records[0].duration_seconds, Some(1.5));
        assert_eq!(records[0].started_at, None);
        assert_eq!(records[0].finished_at, None);
    }

    #[tokio::test]
    async fn captures_cdata_and_nested_text_as_details() {
        let records = parse(
            r#"<testsuite timestamp="2025-08-21T09:00:00">
                 <testcase classname="com.example.ParamTests" name="shouldWork(String)[2] - input=bar" time="0.050">
                   <failure message="expected:&lt;42&gt; but was:&lt;41&gt;"><![CDATA[java.lang.AssertionError: boom]]></failure>
                 </testcase>
               </testsuite>"#,
        )
        .await
        .unwrap();

        let record = &records[0];
        assert_eq!(
            record.error_message.as_deref(),
            Some("expected:<42> but was:<41>")
        );
        assert_eq!(
            record.error_details.as_deref(),
            Some("java.lang.AssertionError: boom")
        );
        assert_eq!(
            record.started_at,
            Some(Utc.with_ymd_and_hms(2025, 8, 21, 9, 0, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn reads_case_id_property() {
        let records = parse(
            r#"<testsuite>
                 <testcase name="with property">
                   <properties>
                     <property name="owner" value="qa"/>
                     <property name="case_id" value="4711"/>
                   </properties>
                 </testcase>
                 <testcase name="bad property">
                   <properties><property name="case_id" value="abc"/></properties>
                 </testcase>
               </testsuite>"#,
        )
        .await
        .unwrap();

        assert_eq!(records[0].case_id, Some(4711));
        assert_eq!(records[0].outcome, TestOutcome::Passed);
        assert_eq!(records[1].case_id, None);
    }

    #[tokio::test]
    async fn each_suite_resets_the_timestamp() {
        let records = parse(
            r#"<testsuites>
                 <testsuite timestamp="2025-01-01T00:00:00Z"><testcase name="first" time="1"/></testsuite>
                 <testsuite><testcase name="second" time="1"/></testsuite>
               </testsuites>"#,
        )
        .await
        .unwrap();

        assert!(records[0].started_at.is_some());
        assert_eq!(records[1].started_at, None);
        assert_eq!(records[1].finished_at, None);
    }

    #[tokio::test]
    async fn malformed_xml_is_a_parse_error() {
        let result = parse("<testsuite><testcase name=\"a\"></testsuite>").await;
        assert!(matches!(
            result,
            Err(ImportError::Parse {
                source: ReportError::Xml(_),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn truncated_document_is_a_parse_error() {
        let result = parse("<testsuite><testcase name=\"a\" time=\"1\"/>").await;
        match result {
            Err(ImportError::Parse {
                source: ReportError::UnexpectedEof { element },
                ..
            }) => assert_eq!(element, "testsuite"),
            other => panic!("expected truncated document error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_file_is_a_parse_error() {
        let result = JUnitParser
            .parse(Path::new("/definitely/not/here.xml"), &Cancellation::new())
            .await;
        assert!(matches!(
            result,
            Err(ImportError::Parse {
                source: ReportError::Io(_),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn cancelled_parse_stops_immediately() {
        let file = report_file(SUREFIRE_SAMPLE);
        let cancel = Cancellation::new();
        cancel.cancel();
        let result = JUnitParser.parse(file.path(), &cancel).await;
        assert!(matches!(result, Err(ImportError::Cancelled)));
    }

    #[test]
    fn duration_parsing_variants() {
        assert_eq!(parse_duration_seconds(Some("0.25")), Some(0.25));
        assert_eq!(parse_duration_seconds(Some(" 2,5 ")), Some(2.5));
        assert_eq!(parse_duration_seconds(Some("")), None);
        assert_eq!(parse_duration_seconds(Some("abc")), None);
        assert_eq!(parse_duration_seconds(Some("-1")), None);
        assert_eq!(parse_duration_seconds(Some("NaN")), None);
        assert_eq!(parse_duration_seconds(None), None);
    }

    #[test]
    fn timestamp_parsing_variants() {
        let expected = Utc.with_ymd_and_hms(2025, 8, 20, 12, 34, 56).unwrap();
        assert_eq!(parse_timestamp(Some("2025-08-20T12:34:56Z")), Some(expected));
        assert_eq!(parse_timestamp(Some("2025-08-20T14:34:56+02:00")), Some(expected));
        assert_eq!(parse_timestamp(Some("2025-08-20T12:34:56")), Some(expected));
        assert_eq!(parse_timestamp(Some("2025-08-20 12:34:56")), Some(expected));
        assert_eq!(
            parse_timestamp(Some("2025-08-20")),
            Some(Utc.with_ymd_and_hms(2025, 8, 20, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_timestamp(Some("yesterday")), None);
    }
}
