use std::time::Duration;

use anyhow::{bail, Context};
use url::Url;

/// Parses a duration such as `500ms`, `30s`, `15min` or `1h`.
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (value, unit) = s.split_at(split);
    if value.is_empty() {
        bail!("Invalid duration `{s}`: expected a number followed by a unit (ms, s, min, h)");
    }
    let value: u64 = value.parse().with_context(|| format!("Invalid duration value in `{s}`"))?;

    match unit.trim() {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => Ok(Duration::from_secs(value)),
        "min" | "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        other => bail!("Invalid duration unit `{other}` in `{s}`: expected ms, s, min or h"),
    }
}

pub fn parse_url(s: &str) -> anyhow::Result<Url> {
    s.parse().with_context(|| format!("Invalid url `{s}`"))
}
