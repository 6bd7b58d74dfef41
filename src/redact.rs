use once_cell::sync::Lazy;
use regex::{Captures, Regex};

const MAX_LOGGED_BODY: usize = 500;

static PASSWORD: Lazy<Regex> =
    Lazy::new(|| secret_pattern(r#"(?i)(password|pwd)\s*[:=]\s*([^\s"']+)"#));
static TOKEN: Lazy<Regex> = Lazy::new(|| secret_pattern(r#"(?i)(token)\s*[:=]\s*([^\s"']+)"#));
static BEARER: Lazy<Regex> = Lazy::new(|| {
    secret_pattern(r"(?i)(authorization)\s*[:=]?\s*Bearer\s+([A-Za-z0-9\-._~+/]+=*)")
});
static USERNAME: Lazy<Regex> =
    Lazy::new(|| secret_pattern(r#"(?i)(username|user)\s*[:=]\s*([^\s"']+)"#));

fn secret_pattern(pattern: &str) -> Regex {
    Regex::new(pattern).expect("redaction pattern is valid")
}

/// Replaces password, token, bearer and username values with `<redacted>`.
pub fn redact(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }
    let masked = PASSWORD.replace_all(input, |caps: &Captures| format!("{}: <redacted>", &caps[1]));
    let masked = TOKEN.replace_all(&masked, |caps: &Captures| format!("{}: <redacted>", &caps[1]));
    let masked = BEARER.replace_all(&masked, |caps: &Captures| {
        format!("{}: Bearer <redacted>", &caps[1])
    });
    USERNAME
        .replace_all(&masked, |caps: &Captures| format!("{}: <redacted>", &caps[1]))
        .into_owned()
}

/// Truncated and redacted form of a response body, safe to log.
pub fn loggable_body(body: &str) -> String {
    let truncated = match body.char_indices().nth(MAX_LOGGED_BODY) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    };
    redact(&truncated)
}
