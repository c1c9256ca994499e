//! Wall-clock helpers
//!
//! Time synchronisation lives outside the core; the loop hands in a Unix epoch
//! once the clock is known. This module turns that epoch into local calendar
//! dates for day boundaries, log file names and display labels.
//!
//! The local zone is either a fixed offset or a POSIX `TZ` rule such as
//! `AEST-10AEDT-11,M10.1.0/02:00:00,M4.1.0/03:00:00`, so day boundaries follow
//! daylight saving without a zone database.

use core::fmt::Write;

use chrono::{
    DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, Timelike, Utc, Weekday,
};
use thiserror_no_std::Error;

use crate::config::TimeConfig;

/// `YYYY-MM-DD HH:MM`
pub type LocalLabel = heapless::String<16>;

/// Source of the local UTC offset in effect at a given instant.
///
/// A fixed offset covers most deployments; a DST-aware zone can implement this
/// trait from its own rule table.
pub trait LocalZone {
    fn offset_at(&self, epoch: i64) -> FixedOffset;
}

impl LocalZone for FixedOffset {
    fn offset_at(&self, _epoch: i64) -> FixedOffset {
        *self
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneError {
    #[error("zone names need at least three letters")]
    Name,
    #[error("utc offset out of range")]
    Offset,
    #[error("malformed transition rule")]
    Rule,
    #[error("daylight saving zone has no transition rules")]
    MissingRules,
    #[error("unexpected characters after the zone")]
    Trailing,
}

/// Day of the year a transition happens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleDay {
    /// `Mm.w.d`: weekday `d` (0 = Sunday) of week `w` of month `m`, week 5 is the last
    MonthWeekDay { month: u32, week: u8, weekday: Weekday },
    /// `Jn`: day 1 to 365, February 29 is never counted
    Julian(u16),
    /// `n`: day 0 to 365, counting February 29 in leap years
    ZeroBased(u16),
}

impl RuleDay {
    fn date_in(self, year: i32) -> Option<NaiveDate> {
        match self {
            RuleDay::MonthWeekDay { month, week, weekday } => {
                NaiveDate::from_weekday_of_month_opt(year, month, weekday, week)
                    .or_else(|| NaiveDate::from_weekday_of_month_opt(year, month, weekday, week - 1))
            }
            RuleDay::Julian(day) => {
                let leap_shift = u32::from(day >= 60 && NaiveDate::from_ymd_opt(year, 2, 29).is_some());
                NaiveDate::from_yo_opt(year, u32::from(day) + leap_shift)
            }
            RuleDay::ZeroBased(day) => NaiveDate::from_yo_opt(year, u32::from(day) + 1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Transition {
    day: RuleDay,
    /// Local wall-clock seconds after midnight, in the offset in force before the change
    time: i32,
}

impl Transition {
    fn epoch_in(self, year: i32, offset_before: i32) -> Option<i64> {
        let midnight = self.day.date_in(year)?.and_time(NaiveTime::MIN).and_utc().timestamp();
        Some(midnight + i64::from(self.time) - i64::from(offset_before))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DaylightRule {
    offset: i32,
    start: Transition,
    end: Transition,
}

/// Zone described by a POSIX `TZ` string.
///
/// Offsets are stored as seconds east of UTC; the string itself uses the
/// inverted POSIX sign (`AEST-10` is ten hours east).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PosixZone {
    std_offset: i32,
    daylight: Option<DaylightRule>,
}

impl PosixZone {
    pub fn parse(tz: &str) -> Result<Self, ZoneError> {
        let mut rest = tz.trim().as_bytes();
        skip_name(&mut rest)?;
        let std_offset = -parse_offset(&mut rest)?;
        if rest.is_empty() {
            return Ok(Self {
                std_offset,
                daylight: None,
            });
        }

        skip_name(&mut rest)?;
        let offset = match rest.first().copied() {
            None | Some(b',') => std_offset + 3600,
            Some(_) => -parse_offset(&mut rest)?,
        };
        if rest.is_empty() {
            return Err(ZoneError::MissingRules);
        }
        let start = parse_transition(&mut rest)?;
        let end = parse_transition(&mut rest)?;
        if !rest.is_empty() {
            return Err(ZoneError::Trailing);
        }

        Ok(Self {
            std_offset,
            daylight: Some(DaylightRule { offset, start, end }),
        })
    }

    /// Standard-time offset in seconds east of UTC.
    pub fn std_offset(&self) -> i32 {
        self.std_offset
    }

    fn offset_seconds(&self, epoch: i64) -> i32 {
        let Some(rule) = self.daylight else {
            return self.std_offset;
        };
        let Some(year) = DateTime::from_timestamp(epoch + i64::from(self.std_offset), 0)
            .map(|dt| dt.year())
        else {
            return self.std_offset;
        };
        let (Some(start), Some(end)) = (
            rule.start.epoch_in(year, self.std_offset),
            rule.end.epoch_in(year, rule.offset),
        ) else {
            return self.std_offset;
        };

        // Southern hemisphere rules end before they start within a year
        let in_daylight = if start < end {
            start <= epoch && epoch < end
        } else {
            epoch >= start || epoch < end
        };
        if in_daylight { rule.offset } else { self.std_offset }
    }
}

impl LocalZone for PosixZone {
    fn offset_at(&self, epoch: i64) -> FixedOffset {
        FixedOffset::east_opt(self.offset_seconds(epoch)).unwrap_or_else(|| Utc.fix())
    }
}

const POSIX_WEEKDAYS: [Weekday; 7] = [
    Weekday::Sun,
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
];

fn skip_name(rest: &mut &[u8]) -> Result<(), ZoneError> {
    if let Some(quoted) = rest.strip_prefix(b"<") {
        let close = quoted.iter().position(|b| *b == b'>').ok_or(ZoneError::Name)?;
        if close < 3 {
            return Err(ZoneError::Name);
        }
        *rest = &quoted[close + 1..];
        return Ok(());
    }
    let len = rest.iter().take_while(|b| b.is_ascii_alphabetic()).count();
    if len < 3 {
        return Err(ZoneError::Name);
    }
    *rest = &rest[len..];
    Ok(())
}

fn take_number(rest: &mut &[u8], max_digits: usize) -> Option<u32> {
    let len = rest.iter().take_while(|b| b.is_ascii_digit()).count();
    if len == 0 || len > max_digits {
        return None;
    }
    let value = rest[..len]
        .iter()
        .fold(0u32, |acc, b| acc * 10 + u32::from(b - b'0'));
    *rest = &rest[len..];
    Some(value)
}

fn take_byte(rest: &mut &[u8], byte: u8) -> bool {
    match rest.split_first() {
        Some((first, tail)) if *first == byte => {
            *rest = tail;
            true
        }
        _ => false,
    }
}

/// `[+-]hh[:mm[:ss]]` as signed seconds.
fn parse_hms(rest: &mut &[u8], max_hours: u32) -> Option<i32> {
    let sign = if take_byte(rest, b'-') {
        -1
    } else {
        take_byte(rest, b'+');
        1
    };
    let hours = take_number(rest, 3).filter(|h| *h <= max_hours)?;
    let mut seconds = hours * 3600;
    for scale in [60, 1] {
        if !take_byte(rest, b':') {
            break;
        }
        seconds += take_number(rest, 2).filter(|v| *v < 60)? * scale;
    }
    i32::try_from(seconds).ok().map(|s| sign * s)
}

fn parse_offset(rest: &mut &[u8]) -> Result<i32, ZoneError> {
    parse_hms(rest, 24)
        .filter(|s| s.abs() < 24 * 3600)
        .ok_or(ZoneError::Offset)
}

fn parse_transition(rest: &mut &[u8]) -> Result<Transition, ZoneError> {
    if !take_byte(rest, b',') {
        return Err(ZoneError::Rule);
    }
    let day = if take_byte(rest, b'M') {
        let month = take_number(rest, 2).filter(|m| (1..=12).contains(m));
        let week = take_byte(rest, b'.').then(|| take_number(rest, 1)).flatten();
        let weekday = take_byte(rest, b'.').then(|| take_number(rest, 1)).flatten();
        match (month, week, weekday) {
            (Some(month), Some(week @ 1..=5), Some(weekday @ 0..=6)) => RuleDay::MonthWeekDay {
                month,
                week: week as u8,
                weekday: POSIX_WEEKDAYS[weekday as usize],
            },
            _ => return Err(ZoneError::Rule),
        }
    } else if take_byte(rest, b'J') {
        let day = take_number(rest, 3).filter(|d| (1..=365).contains(d)).ok_or(ZoneError::Rule)?;
        RuleDay::Julian(day as u16)
    } else {
        let day = take_number(rest, 3).filter(|d| *d <= 365).ok_or(ZoneError::Rule)?;
        RuleDay::ZeroBased(day as u16)
    };

    let time = if take_byte(rest, b'/') {
        parse_hms(rest, 167).ok_or(ZoneError::Rule)?
    } else {
        2 * 3600
    };
    Ok(Transition { day, time })
}

/// The zone a station runs in, chosen from [`TimeConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationZone {
    Fixed(FixedOffset),
    Posix(PosixZone),
}

impl StationZone {
    /// A POSIX rule wins over the fixed offset when both are configured.
    pub fn from_config(config: &TimeConfig) -> Result<Self, ZoneError> {
        match config.posix_tz.as_deref().map(str::trim) {
            Some(tz) if !tz.is_empty() => PosixZone::parse(tz).map(StationZone::Posix),
            _ => Ok(StationZone::Fixed(fixed_zone(config.utc_offset_minutes))),
        }
    }
}

impl LocalZone for StationZone {
    fn offset_at(&self, epoch: i64) -> FixedOffset {
        match self {
            StationZone::Fixed(offset) => *offset,
            StationZone::Posix(zone) => zone.offset_at(epoch),
        }
    }
}

/// Build a fixed zone from minutes east of UTC, falling back to UTC.
pub fn fixed_zone(utc_offset_minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(utc_offset_minutes.saturating_mul(60)).unwrap_or_else(|| Utc.fix())
}

/// Local wall-clock time for an epoch, if it is representable.
pub fn local_datetime<Z: LocalZone + ?Sized>(zone: &Z, epoch: i64) -> Option<NaiveDateTime> {
    let utc = DateTime::from_timestamp(epoch, 0)?;
    Some(utc.with_timezone(&zone.offset_at(epoch)).naive_local())
}

/// Local calendar date for an epoch.
pub fn local_date<Z: LocalZone + ?Sized>(zone: &Z, epoch: i64) -> Option<NaiveDate> {
    local_datetime(zone, epoch).map(|dt| dt.date())
}

/// Epoch of the local midnight that starts the day containing `epoch`.
pub fn local_midnight<Z: LocalZone + ?Sized>(zone: &Z, epoch: i64) -> Option<i64> {
    let date = local_date(zone, epoch)?;
    Some(date_start_epoch(zone, date))
}

/// Epoch of local midnight at the start of `date`.
///
/// The offset is looked up twice: once at the naive guess and again at the
/// instant that guess lands on, which settles days that begin near a change.
pub fn date_start_epoch<Z: LocalZone + ?Sized>(zone: &Z, date: NaiveDate) -> i64 {
    let naive = date.and_time(NaiveTime::MIN).and_utc().timestamp();
    let guess = naive - i64::from(zone.offset_at(naive).local_minus_utc());
    naive - i64::from(zone.offset_at(guess).local_minus_utc())
}

/// Format an epoch as `YYYY-MM-DD HH:MM` local time.
pub fn local_label<Z: LocalZone + ?Sized>(zone: &Z, epoch: i64) -> LocalLabel {
    let mut label = LocalLabel::new();
    if let Some(dt) = local_datetime(zone, epoch) {
        let _ = write!(
            label,
            "{:04}-{:02}-{:02} {:02}:{:02}",
            dt.year(),
            dt.month(),
            dt.day(),
            dt.hour(),
            dt.minute()
        );
    }
    label
}

/// Label for the start of a calendar day, always `YYYY-MM-DD 00:00`.
pub fn day_label(date: NaiveDate) -> LocalLabel {
    let mut label = LocalLabel::new();
    let _ = write!(
        label,
        "{:04}-{:02}-{:02} 00:00",
        date.year(),
        date.month(),
        date.day()
    );
    label
}

/// Whole days between two dates (`later - earlier`).
pub fn days_between(earlier: NaiveDate, later: NaiveDate) -> i64 {
    later.signed_duration_since(earlier).num_days()
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2025-12-18 00:00:00 UTC
    const MIDNIGHT_UTC: i64 = 1_766_016_000;

    #[test]
    fn test_local_midnight_with_offset() {
        let zone = fixed_zone(600);
        // 2025-12-18 09:30 UTC is 19:30 local at +10:00
        let epoch = MIDNIGHT_UTC + 9 * 3600 + 30 * 60;
        let midnight = local_midnight(&zone, epoch).unwrap();
        assert_eq!(midnight, MIDNIGHT_UTC - 10 * 3600);
        assert_eq!(local_label(&zone, midnight).as_str(), "2025-12-18 00:00");
        assert_eq!(local_label(&zone, epoch).as_str(), "2025-12-18 19:30");
    }

    #[test]
    fn test_date_start_epoch_matches_midnight() {
        let zone = fixed_zone(-300);
        let date = NaiveDate::from_ymd_opt(2025, 12, 18).unwrap();
        let start = date_start_epoch(&zone, date);
        assert_eq!(start, MIDNIGHT_UTC + 5 * 3600);
        assert_eq!(local_midnight(&zone, start + 4000), Some(start));
    }

    #[test]
    fn test_local_date_crosses_before_utc() {
        let zone = fixed_zone(600);
        // 15:00 UTC is already the next day at +10:00
        let date = local_date(&zone, MIDNIGHT_UTC + 15 * 3600).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2025, 12, 19).unwrap());
    }

    #[test]
    fn test_day_label_and_days_between() {
        let a = NaiveDate::from_ymd_opt(2025, 12, 30).unwrap();
        let b = NaiveDate::from_ymd_opt(2026, 1, 2).unwrap();
        assert_eq!(day_label(a).as_str(), "2025-12-30 00:00");
        assert_eq!(days_between(a, b), 3);
    }

    const SYDNEY: &str = "AEST-10AEDT-11,M10.1.0/02:00:00,M4.1.0/03:00:00";

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> i64 {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
            .and_utc()
            .timestamp()
    }

    fn hours_east(zone: &PosixZone, epoch: i64) -> i32 {
        zone.offset_at(epoch).local_minus_utc() / 3600
    }

    #[test]
    fn test_posix_zone_follows_daylight_saving() {
        let zone = PosixZone::parse(SYDNEY).unwrap();
        assert_eq!(zone.std_offset(), 10 * 3600);
        assert_eq!(hours_east(&zone, utc(2025, 1, 15, 0, 0)), 11);
        assert_eq!(hours_east(&zone, utc(2025, 7, 15, 0, 0)), 10);

        // 2025-04-06 03:00 AEDT falls back to 02:00 AEST
        assert_eq!(hours_east(&zone, utc(2025, 4, 5, 15, 59)), 11);
        assert_eq!(hours_east(&zone, utc(2025, 4, 5, 16, 0)), 10);
        // 2025-10-05 02:00 AEST springs forward to 03:00 AEDT
        assert_eq!(hours_east(&zone, utc(2025, 10, 4, 15, 59)), 10);
        assert_eq!(hours_east(&zone, utc(2025, 10, 4, 16, 0)), 11);
    }

    #[test]
    fn test_daylight_saving_day_boundaries() {
        let zone = PosixZone::parse(SYDNEY).unwrap();
        let fall_back = NaiveDate::from_ymd_opt(2025, 4, 6).unwrap();
        // Midnight is still in AEDT, the next midnight is AEST: a 25 hour day
        let start = date_start_epoch(&zone, fall_back);
        assert_eq!(start, utc(2025, 4, 5, 13, 0));
        let next = date_start_epoch(&zone, fall_back.succ_opt().unwrap());
        assert_eq!(next - start, 25 * 3600);

        let noon = utc(2025, 4, 6, 2, 0);
        assert_eq!(local_label(&zone, noon).as_str(), "2025-04-06 12:00");
        assert_eq!(local_midnight(&zone, noon), Some(start));
        assert_eq!(local_label(&zone, utc(2025, 1, 15, 0, 0)).as_str(), "2025-01-15 11:00");
    }

    #[test]
    fn test_posix_zone_rule_forms() {
        let plain = PosixZone::parse("<+0530>-5:30").unwrap();
        assert_eq!(plain.offset_at(0).local_minus_utc(), 5 * 3600 + 1800);

        // US rules with the default 02:00 change and DST one hour ahead
        let eastern = PosixZone::parse("EST5EDT,M3.2.0,M11.1.0").unwrap();
        assert_eq!(hours_east(&eastern, utc(2025, 3, 9, 6, 59)), -5);
        assert_eq!(hours_east(&eastern, utc(2025, 3, 9, 7, 0)), -4);

        // J60 is March 1 in every year; 59 counts from zero so it is February 29 in 2024
        let julian = PosixZone::parse("AAA0BBB,J60/0,J300/0").unwrap();
        assert_eq!(hours_east(&julian, utc(2024, 3, 1, 0, 0)), 1);
        assert_eq!(hours_east(&julian, utc(2024, 2, 29, 23, 59)), 0);
        let zero_based = PosixZone::parse("AAA0BBB,59/0,300/0").unwrap();
        assert_eq!(hours_east(&zero_based, utc(2024, 2, 29, 0, 0)), 1);

        assert_eq!(PosixZone::parse("X-1"), Err(ZoneError::Name));
        assert_eq!(PosixZone::parse("AEST-25"), Err(ZoneError::Offset));
        assert_eq!(PosixZone::parse("AEST-10AEDT"), Err(ZoneError::MissingRules));
        assert_eq!(PosixZone::parse("AEST-10AEDT,M13.1.0,M4.1.0"), Err(ZoneError::Rule));
        assert_eq!(PosixZone::parse("AEST-10AEDT,M10.1.0,M4.1.0x"), Err(ZoneError::Trailing));
    }

    #[test]
    fn test_station_zone_prefers_posix_rule() {
        let fixed = TimeConfig {
            utc_offset_minutes: 600,
            posix_tz: None,
        };
        assert_eq!(StationZone::from_config(&fixed), Ok(StationZone::Fixed(fixed_zone(600))));

        let posix = TimeConfig {
            utc_offset_minutes: 600,
            posix_tz: Some(SYDNEY.into()),
        };
        let zone = StationZone::from_config(&posix).unwrap();
        assert_eq!(zone.offset_at(utc(2025, 1, 15, 0, 0)).local_minus_utc(), 11 * 3600);
    }

    #[test]
    fn test_invalid_offset_falls_back_to_utc() {
        let zone = fixed_zone(24 * 60);
        assert_eq!(zone.local_minus_utc(), 0);
    }
}
