use chrono::{DateTime, FixedOffset, Utc};

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Skew window (hours) that flags a `Z`-suffixed stamp as mislabeled
/// device-local time. Bounds are inclusive.
const MISLABEL_SKEW_MIN_HOURS: f64 = 5.0;
const MISLABEL_SKEW_MAX_HOURS: f64 = 6.0;

/// Resolve a device timestamp to a UTC instant.
///
/// The firmware is inconsistent about zones, so three shapes are accepted:
/// an explicit numeric offset is honored as written; a bare local stamp
/// (`2024-06-01 17:30:00`, with or without the `T`) is interpreted in the
/// device zone; a `Z`-suffixed stamp is normally UTC, unless it sits roughly
/// one device offset away from the agent clock, in which case it is treated
/// as device-local time wearing the wrong suffix and reinterpreted.
///
/// Returns `None` for anything unparseable. `now` is a parameter so callers
/// and tests pin the skew comparison to a known instant.
pub fn normalize_timestamp(
    raw: &str,
    now: DateTime<Utc>,
    device_offset: FixedOffset,
) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if has_explicit_zone(trimmed) {
        let parsed = parse_with_zone(trimmed)?.with_timezone(&Utc);

        if trimmed.ends_with('Z') || trimmed.ends_with('z') {
            let skew_hours =
                (now - parsed).num_milliseconds().abs() as f64 / MILLIS_PER_HOUR;
            if (MISLABEL_SKEW_MIN_HOURS..=MISLABEL_SKEW_MAX_HOURS).contains(&skew_hours) {
                // Suffix is one ASCII byte, safe to slice off.
                let base = &trimmed[..trimmed.len() - 1];
                let relabeled = format!("{base}{device_offset}");
                if let Some(reparsed) = parse_with_zone(&relabeled) {
                    return Some(reparsed.with_timezone(&Utc));
                }
            }
        }

        return Some(parsed);
    }

    // No zone at all: device-local wall time.
    let candidate = if trimmed.contains('T') {
        format!("{trimmed}{device_offset}")
    } else {
        format!("{}{}", trimmed.replacen(' ', "T", 1), device_offset)
    };
    parse_with_zone(&candidate).map(|parsed| parsed.with_timezone(&Utc))
}

/// Millisecond sort key for chart ordering. Unparseable stamps sort to the
/// epoch rather than being dropped.
pub fn sort_key_millis(raw: &str, now: DateTime<Utc>, device_offset: FixedOffset) -> i64 {
    normalize_timestamp(raw, now, device_offset)
        .map(|parsed| parsed.timestamp_millis())
        .unwrap_or(0)
}

/// Render a device timestamp as device-local wall time, or `"invalid"`.
pub fn format_device_time(raw: &str, now: DateTime<Utc>, device_offset: FixedOffset) -> String {
    match normalize_timestamp(raw, now, device_offset) {
        Some(parsed) => parsed
            .with_timezone(&device_offset)
            .format("%d %b %H:%M:%S")
            .to_string(),
        None => "invalid".to_string(),
    }
}

/// True when the stamp ends in `Z`/`z` or a numeric offset (`+HH:MM` or
/// `+HHMM`).
fn has_explicit_zone(raw: &str) -> bool {
    if raw.ends_with('Z') || raw.ends_with('z') {
        return true;
    }

    let bytes = raw.as_bytes();
    let len = bytes.len();
    if len >= 6
        && (bytes[len - 6] == b'+' || bytes[len - 6] == b'-')
        && bytes[len - 5].is_ascii_digit()
        && bytes[len - 4].is_ascii_digit()
        && bytes[len - 3] == b':'
        && bytes[len - 2].is_ascii_digit()
        && bytes[len - 1].is_ascii_digit()
    {
        return true;
    }
    if len >= 5
        && (bytes[len - 5] == b'+' || bytes[len - 5] == b'-')
        && bytes[len - 4..].iter().all(u8::is_ascii_digit)
    {
        return true;
    }
    false
}

fn parse_with_zone(raw: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed);
    }

    // A trailing Z on a non-RFC3339 body (e.g. missing seconds) still means
    // UTC; rewrite it so the numeric-offset formats below apply.
    let rewritten;
    let candidate = match raw.strip_suffix('Z').or_else(|| raw.strip_suffix('z')) {
        Some(base) => {
            rewritten = format!("{base}+00:00");
            rewritten.as_str()
        }
        None => raw,
    };

    const FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f%z",
        "%Y-%m-%dT%H:%M%z",
        "%Y-%m-%d %H:%M:%S%.f%z",
        "%Y-%m-%d %H:%M%z",
    ];

    FORMATS
        .iter()
        .find_map(|format| DateTime::parse_from_str(candidate, format).ok())
}
