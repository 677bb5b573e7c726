//! Go-style duration strings: `"500ms"`, `"30s"`, `"5m"`, `"1h30m"`.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

static COMPONENT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)(ns|us|µs|ms|s|m|h)").ok());

/// Parse a duration such as `"1h30m"` or `"2.5s"`. A bare `"0"` is zero.
/// Returns `None` for empty, negative, or malformed input.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let s = value.trim();
    if s.is_empty() {
        return None;
    }
    if s == "0" {
        return Some(Duration::ZERO);
    }

    let component = COMPONENT.as_ref()?;
    let mut consumed = 0usize;
    let mut total = Duration::ZERO;

    for caps in component.captures_iter(s) {
        let whole = caps.get(0)?;
        if whole.start() != consumed {
            return None;
        }
        consumed = whole.end();

        let amount: f64 = caps.get(1)?.as_str().parse().ok()?;
        let unit = match caps.get(2)?.as_str() {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return None,
        };
        let part = Duration::try_from_secs_f64(amount * unit).ok()?;
        total = total.checked_add(part)?;
    }

    (consumed == s.len() && consumed > 0).then_some(total)
}
