use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};

/// Turn a human age expression into the cutoff instant relative to `now`.
///
/// Accepts empty or `now`, a duration such as `7d`, `2 weeks` or `36h` with an optional
/// trailing `ago`, an RFC 3339 timestamp, or a `YYYY-MM-DD` date (midnight UTC).
pub fn parse_threshold(input: &str, now: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() || input.eq_ignore_ascii_case("now") {
        return Ok(now);
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d")
        && let Some(midnight) = date.and_hms_opt(0, 0, 0)
    {
        return Ok(midnight.and_utc());
    }

    let span = input
        .strip_suffix("ago")
        .map(str::trim_end)
        .unwrap_or(input);
    let duration = humantime::parse_duration(&join_units(span))
        .with_context(|| format!("invalid age '{}'", input))?;
    let duration = chrono::Duration::from_std(duration)
        .with_context(|| format!("age '{}' is out of range", input))?;

    now.checked_sub_signed(duration)
        .with_context(|| format!("age '{}' reaches before the epoch", input))
}

/// `2 weeks 3 days` -> `2weeks 3days`; the duration parser wants units glued to numbers.
fn join_units(span: &str) -> String {
    let mut out = String::with_capacity(span.len());
    let mut after_digit = false;
    for c in span.chars() {
        if c.is_whitespace() && after_digit {
            continue;
        }
        if c.is_whitespace() {
            if !out.ends_with(' ') {
                out.push(' ');
            }
        } else {
            out.push(c);
        }
        after_digit = c.is_ascii_digit();
    }
    out.trim().to_string()
}
