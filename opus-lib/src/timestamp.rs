//! Measurement time derivation.
//!
//! The instrument records the local start date and time of each scan in the
//! `DAT` (`DD/MM/YYYY`) and `TIM` (`HH:MM:SS.ffffff (ZONE)`) data status
//! parameters and the scan duration in the `DUR` instrument parameter.
use std::fmt::Display;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, TimeDelta, TimeZone, Utc};
use regex::Regex;
#[cfg(feature = "serde")]
use serde::Serialize;

use crate::parameter::ParameterBlock;
use crate::{Error, Result};

/// Which end of a scan a measurement timestamp refers to.
#[cfg_attr(feature = "serde", derive(Serialize), serde(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimestampMode {
    #[default]
    Start,
    End,
}

impl FromStr for TimestampMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "end" => Ok(Self::End),
            _ => Err(format!("invalid timestamp mode {s:?}; expected start or end")),
        }
    }
}

impl Display for TimestampMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::End => write!(f, "end"),
        }
    }
}

/// Zone names with a constant UTC offset, in hours.
const FIXED_ZONES: &[(&str, f64)] = &[
    ("UTC", 0.0),
    ("GMT", 0.0),
    ("UCT", 0.0),
    ("Z", 0.0),
    ("Zulu", 0.0),
    ("Universal", 0.0),
    ("Etc/UTC", 0.0),
    ("Etc/GMT", 0.0),
    ("Etc/UCT", 0.0),
    ("Etc/Universal", 0.0),
    ("Etc/Zulu", 0.0),
    ("EST", -5.0),
    ("MST", -7.0),
    ("HST", -10.0),
];

static OFFSET_HOURS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,2}(\.\d)?$").expect("regex to compile"));
static OFFSET_HH_MM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{2}):(\d{2})$").expect("regex to compile"));
static OFFSET_HHMM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{2})(\d{2})$").expect("regex to compile"));

/// Parse a timezone string into its UTC offset in hours.
///
/// Accepts a zone name optionally followed by a signed offset, e.g., `UTC`,
/// `GMT+2`, `UTC+2.0`, `UTC-02:00`, or `UTC+0530`.
///
/// # Errors
/// [Error::Timestamp] if the offset cannot be parsed or the zone is unknown or
/// does not have a constant offset.
pub fn parse_timezone_offset(s: &str) -> Result<f64> {
    let invalid = || Error::Timestamp(format!("invalid timezone string {s:?}"));

    let signs = s.matches(['+', '-']).count();
    let (zone, offset) = match signs {
        0 => (s, 0.0),
        1 => {
            let (idx, sign) = s
                .char_indices()
                .find(|(_, c)| *c == '+' || *c == '-')
                .ok_or_else(invalid)?;
            let (zone, rest) = (&s[..idx], &s[idx + 1..]);
            let hours = parse_offset(rest).ok_or_else(|| {
                Error::Timestamp(format!("invalid offset string {rest:?} in {s:?}"))
            })?;
            (zone, if sign == '-' { -hours } else { hours })
        }
        _ => return Err(invalid()),
    };

    let base = FIXED_ZONES
        .iter()
        .find(|(name, _)| *name == zone)
        .map(|(_, hours)| *hours)
        .ok_or_else(|| Error::Timestamp(format!("unknown time zone {zone:?}")))?;

    Ok(base + offset)
}

fn parse_offset(s: &str) -> Option<f64> {
    if OFFSET_HOURS.is_match(s) {
        return s.parse().ok();
    }
    let cap = OFFSET_HH_MM
        .captures(s)
        .or_else(|| OFFSET_HHMM.captures(s))?;
    let hours: f64 = cap[1].parse().ok()?;
    let minutes: f64 = cap[2].parse().ok()?;
    Some(hours + minutes / 60.0)
}

/// `None` if `secs` is not finite or does not fit a [TimeDelta].
fn duration_from_secs(secs: f64) -> Option<TimeDelta> {
    let micros = (secs * 1_000_000.0).round();
    // i64::MAX is not representable, the nearest f64 is one above it
    if !micros.is_finite() || micros.abs() >= i64::MAX as f64 {
        return None;
    }
    Some(TimeDelta::microseconds(micros as i64))
}

/// Derive the UTC measurement time from a channel's data status (`spectrum`) and
/// instrument parameter blocks.
///
/// The recorded local time is shifted by half the scan duration: forward for
/// [TimestampMode::Start] and backward for [TimestampMode::End].
///
/// # Errors
/// [Error::MissingParameter] if `DAT`, `TIM` or `DUR` are missing, or
/// [Error::Timestamp] if they cannot be parsed or `DUR` is not finite or moves
/// the time out of the representable range.
pub fn measurement_time(
    spectrum: &ParameterBlock,
    instrument: &ParameterBlock,
    mode: TimestampMode,
) -> Result<DateTime<Utc>> {
    let date = spectrum.get_str("spectrum", "DAT")?;
    let time = spectrum.get_str("spectrum", "TIM")?;
    let dur = instrument.get_f64("instrument", "DUR")?;

    let dt = parse_local_time(date, time)?;
    let bad_duration = || Error::Timestamp(format!("invalid scan duration {dur}"));
    let half = duration_from_secs(dur / 2.0).ok_or_else(bad_duration)?;
    match mode {
        TimestampMode::Start => dt.checked_add_signed(half),
        TimestampMode::End => dt.checked_sub_signed(half),
    }
    .ok_or_else(bad_duration)
}

/// Combine `DAT` and `TIM` strings into a UTC timestamp.
///
/// # Errors
/// [Error::Timestamp] if either string is malformed.
pub fn parse_local_time(date: &str, time: &str) -> Result<DateTime<Utc>> {
    let bad_date = || Error::Timestamp(format!("invalid date {date:?}"));
    let bad_time = || Error::Timestamp(format!("invalid time {time:?}"));

    let parts: Vec<&str> = date.trim().split('/').collect();
    let [day, month, year] = parts[..] else {
        return Err(bad_date());
    };
    let day: u32 = day.parse().map_err(|_| bad_date())?;
    let month: u32 = month.parse().map_err(|_| bad_date())?;
    let year: i32 = year.parse().map_err(|_| bad_date())?;

    let (clock, zone) = time.trim().split_once(' ').ok_or_else(bad_time)?;
    let zone = zone.trim().trim_start_matches('(').trim_end_matches(')');
    let parts: Vec<&str> = clock.split(':').collect();
    let [hour, minute, seconds] = parts[..] else {
        return Err(bad_time());
    };
    let hour: u32 = hour.parse().map_err(|_| bad_time())?;
    let minute: u32 = minute.parse().map_err(|_| bad_time())?;
    let seconds: f64 = seconds.parse().map_err(|_| bad_time())?;
    if !(0.0..60.0).contains(&seconds) {
        return Err(bad_time());
    }
    let whole = seconds.floor();
    let micros = ((seconds - whole) * 1_000_000.0).round() as i64;

    let naive = NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(bad_date)?
        .and_hms_opt(hour, minute, whole as u32)
        .ok_or_else(bad_time)?;
    let offset = parse_timezone_offset(zone)?;

    let offset = duration_from_secs(offset * 3600.0).ok_or_else(bad_time)?;

    Utc.from_utc_datetime(&naive)
        .checked_add_signed(TimeDelta::microseconds(micros))
        .and_then(|dt| dt.checked_sub_signed(offset))
        .ok_or_else(bad_time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::tests::record;
    use test_case::test_case;

    #[test_case("UTC", 0.0)]
    #[test_case("GMT", 0.0)]
    #[test_case("GMT+2", 2.0)]
    #[test_case("UTC+2.0", 2.0)]
    #[test_case("UTC-02:00", -2.0)]
    #[test_case("UTC+0530", 5.5)]
    #[test_case("EST", -5.0)]
    #[test_case("EST+1", -4.0)]
    fn timezone_offsets(s: &str, expected: f64) {
        assert_eq!(parse_timezone_offset(s).unwrap(), expected);
    }

    #[test_case("Europe/Berlin"; "variable offset")]
    #[test_case("UTC+2+3"; "two signs")]
    #[test_case("UTC+2:0"; "short minutes")]
    #[test_case("NOPE"; "unknown")]
    fn timezone_invalid(s: &str) {
        assert!(matches!(parse_timezone_offset(s), Err(Error::Timestamp(_))));
    }

    fn blocks(date: &str, time: &str, dur: f64) -> (ParameterBlock, ParameterBlock) {
        let pad = |s: &str| {
            let mut b = s.as_bytes().to_vec();
            b.push(0);
            if b.len() % 2 == 1 {
                b.push(0);
            }
            b
        };
        let mut raw = record("DAT", 2, &pad(date));
        raw.extend(record("TIM", 2, &pad(time)));
        let spectrum = ParameterBlock::decode(raw).unwrap();
        let instrument = ParameterBlock::decode(record("DUR", 1, &dur.to_le_bytes())).unwrap();
        (spectrum, instrument)
    }

    #[test]
    fn start_time_adds_half_duration() {
        let (spectrum, instrument) = blocks("09/04/2022", "00:00:05.5 (UTC)", 2.0);

        let ts = measurement_time(&spectrum, &instrument, TimestampMode::Start).unwrap();

        let expected = DateTime::parse_from_rfc3339("2022-04-09T00:00:06.5+00:00").unwrap();
        assert_eq!(ts, expected);
    }

    #[test]
    fn end_time_subtracts_half_duration() {
        let (spectrum, instrument) = blocks("09/04/2022", "00:00:05.5 (UTC)", 2.0);

        let ts = measurement_time(&spectrum, &instrument, TimestampMode::End).unwrap();

        let expected = DateTime::parse_from_rfc3339("2022-04-09T00:00:04.5+00:00").unwrap();
        assert_eq!(ts, expected);
    }

    #[test_case(1e300; "overflows")]
    #[test_case(-1e300; "underflows")]
    #[test_case(f64::NAN; "nan")]
    #[test_case(f64::INFINITY; "infinite")]
    #[test_case(1.8e13; "beyond the last date")]
    fn invalid_duration(dur: f64) {
        let (spectrum, instrument) = blocks("09/04/2022", "00:00:05.5 (UTC)", dur);

        for mode in [TimestampMode::Start, TimestampMode::End] {
            let zult = measurement_time(&spectrum, &instrument, mode);
            assert!(matches!(zult, Err(Error::Timestamp(_))), "got {zult:?}");
        }
    }

    #[test]
    fn time_at_end_of_range() {
        let zult = parse_local_time("31/12/262143", "23:59:59.5 (UTC-1)");
        assert!(matches!(zult, Err(Error::Timestamp(_))), "got {zult:?}");
    }

    #[test]
    fn local_zone_is_normalized() {
        let ts = parse_local_time("14/05/2024", "01:30:00.250000 (GMT+2)").unwrap();

        let expected = DateTime::parse_from_rfc3339("2024-05-13T23:30:00.25Z").unwrap();
        assert_eq!(ts, expected);
    }

    #[test_case("2022-04-09", "00:00:00 (UTC)"; "iso date")]
    #[test_case("31/02/2022", "00:00:00 (UTC)"; "no such day")]
    #[test_case("09/04/2022", "00:00:00"; "no zone")]
    #[test_case("09/04/2022", "25:00:00 (UTC)"; "bad hour")]
    #[test_case("09/04/2022", "00:00:60.5 (UTC)"; "bad seconds")]
    fn malformed(date: &str, time: &str) {
        assert!(matches!(
            parse_local_time(date, time),
            Err(Error::Timestamp(_))
        ));
    }

    #[test]
    fn mode_strings() {
        assert_eq!("start".parse::<TimestampMode>().unwrap(), TimestampMode::Start);
        assert_eq!("end".parse::<TimestampMode>().unwrap(), TimestampMode::End);
        assert!("middle".parse::<TimestampMode>().is_err());
        assert_eq!(TimestampMode::End.to_string(), "end");
    }
}
