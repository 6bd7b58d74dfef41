use crate::error::{ImportError, ImportResult};
use crate::mapping::model::{MappingOptions, MappingStrategy, ResolvedIdentifiers};
use crate::report::model::TestRecord;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

const DEFAULT_PREFIX: &str = "TC";
const MAX_DIGITS: usize = 10;
const MAX_STRICT_CASE_ID: i32 = 999_999;
const MAX_SCENARIO_ID: i32 = 9_999_999;

static DEFAULT_CASE_PATTERN: Lazy<Regex> =
    Lazy::new(|| compile(r"(?:^|\b|\[)TC[:\-\s]?([0-9]{1,10})(?:\b|\])"));

// Letters or digits directly before or after the id disqualify the match.
static STRICT_CASE_PATTERN: Lazy<Regex> =
    Lazy::new(|| compile(r"(?:^|[^\p{L}\p{N}])TC([0-9]{6})(?:[^\p{L}\p{N}]|$)"));
static STRICT_SCENARIO_PATTERN: Lazy<Regex> =
    Lazy::new(|| compile(r"(?:^|[^\p{L}\p{N}])TS([0-9]{6,7})(?:[^\p{L}\p{N}]|$)"));

fn compile(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .expect("built-in id pattern is valid")
}

fn compile_custom(pattern: &str) -> ImportResult<Regex> {
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| ImportError::config(format!("invalid id pattern '{pattern}': {e}")))?;
    if regex.captures_len() < 2 {
        return Err(ImportError::config(format!(
            "id pattern '{pattern}' needs a capture group for the id"
        )));
    }
    Ok(regex)
}

fn first_group<'t>(regex: &Regex, text: &'t str) -> Option<&'t str> {
    regex.captures(text)?.get(1).map(|m| m.as_str())
}

/// Regex whose first group must parse to a strictly positive id.
#[derive(Debug, Clone)]
pub struct PatternResolver {
    regex: Regex,
}

impl PatternResolver {
    /// `TC`, an optional `:`/`-`/whitespace separator and 1-10 digits, anchored at the start,
    /// a word boundary or `[`.
    pub fn default_case() -> Self {
        Self {
            regex: DEFAULT_CASE_PATTERN.clone(),
        }
    }

    pub fn custom(pattern: &str) -> ImportResult<Self> {
        Ok(Self {
            regex: compile_custom(pattern)?,
        })
    }

    pub fn resolve(&self, text: &str) -> Option<i32> {
        if text.trim().is_empty() {
            return None;
        }
        first_group(&self.regex, text)?
            .trim()
            .parse::<i32>()
            .ok()
            .filter(|id| *id > 0)
    }
}

/// Regex whose first group must parse into `0..=max`. Zero is a valid id here.
#[derive(Debug, Clone)]
pub struct BoundedResolver {
    regex: Regex,
    max: i32,
}

impl BoundedResolver {
    /// `TC` followed by exactly six digits.
    pub fn strict_case() -> Self {
        Self {
            regex: STRICT_CASE_PATTERN.clone(),
            max: MAX_STRICT_CASE_ID,
        }
    }

    /// `TS` followed by six or seven digits.
    pub fn strict_scenario() -> Self {
        Self {
            regex: STRICT_SCENARIO_PATTERN.clone(),
            max: MAX_SCENARIO_ID,
        }
    }

    pub fn custom_scenario(pattern: &str) -> ImportResult<Self> {
        Ok(Self {
            regex: compile_custom(pattern)?,
            max: MAX_SCENARIO_ID,
        })
    }

    pub fn resolve(&self, text: &str) -> Option<i32> {
        if text.trim().is_empty() {
            return None;
        }
        first_group(&self.regex, text)?
            .trim()
            .parse::<i32>()
            .ok()
            .filter(|id| (0..=self.max).contains(id))
    }
}

/// Finds `prefix` anywhere (ASCII case-insensitive), skips `:`, `-` and whitespace, then
/// reads the digit run that follows.
#[derive(Debug, Clone)]
pub struct PrefixSuffixResolver {
    prefix: String,
    digits_length: Option<usize>,
}

impl PrefixSuffixResolver {
    pub fn new(prefix: impl Into<String>, digits_length: Option<usize>) -> Self {
        Self {
            prefix: prefix.into(),
            digits_length,
        }
    }

    pub fn resolve(&self, text: &str) -> Option<i32> {
        if text.trim().is_empty() {
            return None;
        }
        let start = find_ignore_ascii_case(text, &self.prefix)? + self.prefix.len();
        let rest = text[start..]
            .trim_start_matches(|c: char| c == ':' || c == '-' || c.is_whitespace());
        let len = rest.bytes().take_while(u8::is_ascii_digit).count();
        if len == 0 || len > MAX_DIGITS {
            return None;
        }
        if self.digits_length.is_some_and(|expected| expected != len) {
            return None;
        }
        rest[..len].parse::<i32>().ok().filter(|id| *id > 0)
    }
}

fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle.as_bytes()))
}

#[derive(Debug, Clone)]
pub enum CaseIdResolver {
    Pattern(PatternResolver),
    PrefixSuffix(PrefixSuffixResolver),
    Strict(BoundedResolver),
}

impl CaseIdResolver {
    pub fn from_options(options: &MappingOptions) -> ImportResult<Self> {
        Ok(match options.strategy {
            MappingStrategy::Regex => match options.pattern.as_deref() {
                Some(pattern) if !pattern.trim().is_empty() => {
                    Self::Pattern(PatternResolver::custom(pattern)?)
                }
                _ => Self::Pattern(PatternResolver::default_case()),
            },
            MappingStrategy::PrefixSuffix => Self::PrefixSuffix(PrefixSuffixResolver::new(
                options.prefix.as_deref().unwrap_or(DEFAULT_PREFIX),
                options.digits_length,
            )),
            MappingStrategy::StrictTsTc => Self::Strict(BoundedResolver::strict_case()),
        })
    }

    pub fn resolve(&self, text: &str) -> Option<i32> {
        match self {
            Self::Pattern(resolver) => resolver.resolve(text),
            Self::PrefixSuffix(resolver) => resolver.resolve(text),
            Self::Strict(resolver) => resolver.resolve(text),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ScenarioIdResolver {
    Strict(BoundedResolver),
    Pattern(BoundedResolver),
}

impl ScenarioIdResolver {
    pub fn from_options(options: &MappingOptions) -> ImportResult<Self> {
        Ok(match options.scenario_pattern.as_deref() {
            Some(pattern) if !pattern.trim().is_empty() => {
                Self::Pattern(BoundedResolver::custom_scenario(pattern)?)
            }
            _ => Self::Strict(BoundedResolver::strict_scenario()),
        })
    }

    pub fn resolve(&self, text: &str) -> Option<i32> {
        match self {
            Self::Strict(resolver) | Self::Pattern(resolver) => resolver.resolve(text),
        }
    }
}

/// The case and scenario resolvers selected for a run.
#[derive(Debug, Clone)]
pub struct IdentifierResolvers {
    pub case: CaseIdResolver,
    pub scenario: ScenarioIdResolver,
}

impl IdentifierResolvers {
    pub fn from_options(options: &MappingOptions) -> ImportResult<Self> {
        Ok(Self {
            case: CaseIdResolver::from_options(options)?,
            scenario: ScenarioIdResolver::from_options(options)?,
        })
    }

    /// Looks in the bare test name first, then in `{class}.{name}`.
    pub fn identify(&self, record: &TestRecord) -> ResolvedIdentifiers {
        let qualified = record.qualified_name();
        let contexts = [record.name.as_str(), qualified.as_str()];
        ResolvedIdentifiers {
            scenario_id: contexts.iter().find_map(|text| self.scenario.resolve(text)),
            case_id: contexts.iter().find_map(|text| self.case.resolve(text)),
        }
    }
}
