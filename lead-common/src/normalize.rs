//! Scalar normalization helpers shared by the transform and outbound mapping stages.
//!
//! Every function here is total: it accepts any `serde_json::Value` (including `Null`, which
//! stands in for an absent field) and never fails. Values coming out of the CRM are loosely
//! typed, so numbers, booleans and strings are all accepted wherever text is expected.
use std::sync::LazyLock;

use chrono::{
    DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone, Utc,
};
use regex::Regex;
use serde_json::Value;

/// India Standard Time, a fixed UTC+05:30 with no daylight saving.
const IST_OFFSET_SECONDS: i32 = 5 * 3600 + 30 * 60;

/// Country code assumed for phone numbers that are not already in international form.
pub const DEFAULT_COUNTRY_CODE: &str = "+91";

const MOBILE_DIGITS: usize = 10;

/// Returned by lookups of absent keys so callers can treat "missing" and `null` alike.
pub static NULL: Value = Value::Null;

static EMBEDDED_DATE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4}-\d{2}-\d{2})").unwrap());

/// Naive formats accepted after RFC3339 and RFC2822 fail. Naive values are read as UTC.
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

pub fn ist() -> FixedOffset {
    FixedOffset::east_opt(IST_OFFSET_SECONDS).expect("IST offset is within a day")
}

/// Render a scalar the way the CRM export would print it.
///
/// Integral floats print without a fractional part, `null` prints as an empty string and
/// arrays are comma joined. Objects fall back to their JSON text.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => {
                format!("{}", f as i64)
            }
            _ => n.to_string(),
        },
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(stringify).collect::<Vec<_>>().join(","),
        Value::Object(_) => value.to_string(),
    }
}

/// Whether a value counts as "present" in a fallback chain: `null`, `false`, `0` and `""` do not.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub fn digits_only(value: &Value) -> String {
    stringify(value).chars().filter(char::is_ascii_digit).collect()
}

/// Keep the rightmost ten digits, which is the subscriber number for Indian mobiles.
pub fn last_10_digits(value: &Value) -> String {
    if !is_truthy(value) {
        return String::new();
    }

    let digits = digits_only(value);
    if digits.len() > MOBILE_DIGITS {
        digits[digits.len() - MOBILE_DIGITS..].to_owned()
    } else {
        digits
    }
}

/// Normalize a phone number to `+<country><digits>`.
///
/// Numbers already carrying a `+` keep their country code. Anything else loses its leading
/// zeros (trunk prefix) and gets `DEFAULT_COUNTRY_CODE`. Returns `None` when no digits remain.
pub fn canonical_phone(value: &Value) -> Option<String> {
    if value.is_null() {
        return None;
    }

    let text = stringify(value);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    let kept: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();
    let stripped = kept.trim_start_matches('0');

    if stripped.starts_with('+') {
        Some(stripped.to_owned())
    } else if stripped.is_empty() {
        None
    } else {
        Some(format!("{DEFAULT_COUNTRY_CODE}{stripped}"))
    }
}

/// Coerce a flag to "yes" / "no". Unrecognised text is passed through lowercased.
pub fn to_yes_no(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "yes".to_owned(),
        Value::Bool(false) => "no".to_owned(),
        other => {
            let text = stringify(other).trim().to_lowercase();
            match text.as_str() {
                "y" | "yes" | "true" | "1" => "yes".to_owned(),
                "n" | "no" | "false" | "0" => "no".to_owned(),
                _ => text,
            }
        }
    }
}

pub fn to_true_false_string(value: &Value) -> &'static str {
    match value {
        Value::Null => "false",
        Value::Bool(true) => "true",
        Value::Bool(false) => "false",
        other => match stringify(other).trim().to_lowercase().as_str() {
            "y" | "yes" | "true" | "1" => "true",
            _ => "false",
        },
    }
}

/// Tri-state boolean: `null` stays unset, everything else is matched against the truthy flag set.
pub fn to_bool_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(*b),
        other => Some(to_true_false_string(other) == "true"),
    }
}

/// Strip everything but digits and minus signs, then read the leading integer.
pub fn to_integer(value: &Value) -> Option<i64> {
    if value.is_null() || value.as_str() == Some("") {
        return None;
    }

    let cleaned: String = stringify(value)
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '-')
        .collect();

    leading_integer(&cleaned)
}

fn leading_integer(s: &str) -> Option<i64> {
    let (negative, rest) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let digits = &rest[..end];
    if digits.is_empty() {
        return None;
    }

    let n = digits.parse::<i64>().ok()?;
    Some(if negative { -n } else { n })
}

/// Parse anything that looks like a date.
///
/// Tries, in order: RFC3339, ISO 8601 with a compact offset, RFC2822, naive date-times (read as
/// UTC) and bare `YYYY-MM-DD` dates (UTC midnight). Everything else goes through `dateparser`
/// (slash separated, month names, ...), again reading naive values as UTC and dates without a
/// time as midnight. Numbers are epoch milliseconds.
pub fn parse_date_like(value: &Value) -> Option<DateTime<FixedOffset>> {
    match value {
        Value::Number(n) => {
            let millis = n.as_f64()?;
            if !millis.is_finite() {
                return None;
            }
            Utc.timestamp_millis_opt(millis as i64)
                .single()
                .map(DateTime::<FixedOffset>::from)
        }
        Value::String(s) => parse_date_str(s.trim()),
        _ => None,
    }
}

fn parse_date_str(input: &str) -> Option<DateTime<FixedOffset>> {
    if input.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt);
    }

    if let Ok(dt) = DateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt);
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(input) {
        return Some(dt);
    }

    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Some(naive.and_utc().into());
        }
    }

    if let Some(midnight) = NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Some(midnight.and_utc().into());
    }

    dateparser::parse_with(input, &Utc, NaiveTime::MIN)
        .ok()
        .map(DateTime::<FixedOffset>::from)
}

/// Render an instant as an ISO 8601 timestamp at the IST offset, e.g.
/// `2024-01-05T05:30:00.000+05:30`.
pub fn format_ist<Tz: TimeZone>(instant: &DateTime<Tz>) -> String {
    instant
        .with_timezone(&ist())
        .to_rfc3339_opts(SecondsFormat::Millis, false)
}

pub fn to_ist_instant(value: &Value) -> Option<String> {
    if !is_truthy(value) {
        return None;
    }

    parse_date_like(value).map(|dt| format_ist(&dt))
}

/// Reduce a date-like value to `YYYY-MM-DD`, taken in the offset the value was written in.
///
/// Falls back to an embedded `YYYY-MM-DD` substring, then to the text itself.
pub fn date_only(value: &Value) -> String {
    if !is_truthy(value) {
        return String::new();
    }

    if let Some(dt) = parse_date_like(value) {
        return dt.format("%Y-%m-%d").to_string();
    }

    let text = stringify(value);
    match EMBEDDED_DATE_REGEX.captures(&text).and_then(|c| c.get(1)) {
        Some(m) => m.as_str().to_owned(),
        None => text,
    }
}

/// Collapse an array to a `", "`-joined string, dropping empty elements. Other values are
/// returned unchanged.
pub fn array_to_csv(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::String(
            items
                .iter()
                .map(|item| stringify(item).trim().to_owned())
                .filter(|item| !item.is_empty())
                .collect::<Vec<_>>()
                .join(", "),
        ),
        other => other.clone(),
    }
}
