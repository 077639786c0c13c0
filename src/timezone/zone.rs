use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeZoneError {
    #[error("Empty time zone id")]
    Empty,

    #[error("Invalid time zone id '{0}'")]
    Invalid(String),

    #[error("Time zone offset out of range in '{0}'")]
    OffsetOutOfRange(String),
}

/// Legacy three-letter ids and the zones they stand for.
const SHORT_IDS: &[(&str, &str)] = &[
    ("ACT", "Australia/Darwin"),
    ("AET", "Australia/Sydney"),
    ("AGT", "America/Argentina/Buenos_Aires"),
    ("ART", "Africa/Cairo"),
    ("AST", "America/Anchorage"),
    ("BET", "America/Sao_Paulo"),
    ("BST", "Asia/Dhaka"),
    ("CAT", "Africa/Harare"),
    ("CNT", "America/St_Johns"),
    ("CST", "America/Chicago"),
    ("CTT", "Asia/Shanghai"),
    ("EAT", "Africa/Addis_Ababa"),
    ("ECT", "Europe/Paris"),
    ("EST", "-05:00"),
    ("HST", "-10:00"),
    ("IET", "America/Indiana/Indianapolis"),
    ("IST", "Asia/Kolkata"),
    ("JST", "Asia/Tokyo"),
    ("MIT", "Pacific/Apia"),
    ("MST", "-07:00"),
    ("NET", "Asia/Yerevan"),
    ("NST", "Pacific/Auckland"),
    ("PLT", "Asia/Karachi"),
    ("PNT", "America/Phoenix"),
    ("PRT", "America/Puerto_Rico"),
    ("PST", "America/Los_Angeles"),
    ("SST", "Pacific/Guadalcanal"),
    ("VST", "Asia/Ho_Chi_Minh"),
];

/// Maximum offset from UTC, in hours.
const MAX_OFFSET_HOURS: u32 = 18;

/// A syntactically valid time zone identifier.
///
/// Accepted forms:
/// - `UTC`, `GMT`, `UT`, `Z` (normalised to `UTC`)
/// - fixed offsets `+H`, `+HH`, `+HH:MM`, `+HHMM`, optionally prefixed by
///   `UTC`, `GMT` or `UT` (normalised to `+HH:MM`, keeping the prefix)
/// - region ids such as `Europe/Paris` or `America/Argentina/Buenos_Aires`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TimeZoneId(String);

impl TimeZoneId {
    pub fn utc() -> Self {
        Self("UTC".to_string())
    }

    pub fn parse(id: &str) -> Result<Self, TimeZoneError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(TimeZoneError::Empty);
        }

        if id == "Z" {
            return Ok(Self::utc());
        }
        if matches!(id, "UTC" | "GMT" | "UT") {
            return Ok(Self(id.to_string()));
        }

        if id.starts_with(['+', '-']) {
            return parse_offset(id, id).map(Self);
        }
        for prefix in ["UTC", "GMT", "UT"] {
            if let Some(rest) = id.strip_prefix(prefix) {
                if rest.starts_with(['+', '-']) {
                    return parse_offset(rest, id).map(|offset| Self(format!("{prefix}{offset}")));
                }
            }
        }

        if is_region_id(id) {
            Ok(Self(id.to_string()))
        } else {
            Err(TimeZoneError::Invalid(id.to_string()))
        }
    }

    /// Like [`TimeZoneId::parse`], but maps legacy short ids (`PST`, `EST`, ...) first.
    pub fn parse_with_short_ids(id: &str) -> Result<Self, TimeZoneError> {
        let trimmed = id.trim();
        match SHORT_IDS.iter().find(|(short, _)| *short == trimmed) {
            Some((_, zone)) => Self::parse(zone),
            None => Self::parse(trimmed),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TimeZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalise `+H`, `+HH`, `+HH:MM` or `+HHMM` to `+HH:MM`.
fn parse_offset(offset: &str, original: &str) -> Result<String, TimeZoneError> {
    let invalid = || TimeZoneError::Invalid(original.to_string());

    let (sign, digits) = offset.split_at(1);
    let (hours, minutes) = match digits.split_once(':') {
        Some((h, m)) => (h, m),
        None if digits.len() <= 2 => (digits, "0"),
        None if digits.len() == 4 => digits.split_at(2),
        None => return Err(invalid()),
    };

    let all_digits = |s: &str| !s.is_empty() && s.len() <= 2 && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(hours) || !all_digits(minutes) {
        return Err(invalid());
    }

    let hours: u32 = hours.parse().map_err(|_| invalid())?;
    let minutes: u32 = minutes.parse().map_err(|_| invalid())?;
    if minutes >= 60 || hours > MAX_OFFSET_HOURS || (hours == MAX_OFFSET_HOURS && minutes > 0) {
        return Err(TimeZoneError::OffsetOutOfRange(original.to_string()));
    }

    Ok(format!("{sign}{hours:02}:{minutes:02}"))
}

/// `[A-Za-z][A-Za-z0-9~/._+-]+`, with no empty path segments.
fn is_region_id(id: &str) -> bool {
    let mut chars = id.chars();
    let starts_with_letter = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    starts_with_letter
        && id.len() >= 2
        && chars.all(|c| c.is_ascii_alphanumeric() || "~/._+-".contains(c))
        && !id.split('/').any(str::is_empty)
}
