use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat};

// RFC 3339 without seconds, or with a space separator.
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M%:z",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
];

// Month-first wins for ambiguous numeric dates.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m-%d-%Y",
    "%m/%d/%Y",
    "%Y/%m/%d",
    "%m.%d.%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%b %d %Y",
    "%d %B %Y",
    "%d %b %Y",
];

// `%.f` prints nothing for whole seconds and keeps any fraction otherwise.
const NAIVE_OUTPUT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Best-effort conversion of a report date to ISO-8601.
///
/// Offset-carrying inputs keep their offset; everything else is rendered as a
/// naive `YYYY-MM-DDTHH:MM:SS`. Sub-second precision survives in both cases.
/// Returns `None` for anything unrecognized.
pub fn normalize_date(raw: &str) -> Option<String> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.to_rfc3339_opts(SecondsFormat::AutoSi, false));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.to_rfc3339_opts(SecondsFormat::AutoSi, false));
        }
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.format(NAIVE_OUTPUT).to_string());
        }
    }

    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.format(NAIVE_OUTPUT).to_string());
        }
    }

    None
}

pub fn normalize_opt(raw: Option<&str>) -> Option<String> {
    raw.and_then(normalize_date)
}
