//! Absolute dates, signed intervals and the range syntax used by `filter`.
//!
//! Dates are UTC with microsecond resolution and serialise as
//! `YYYY-MM-DD.HH:MM:SS.ffffff`. Intervals keep calendar fields (years and
//! months are not converted to days) and serialise as `±YYYYMMDDHHMMSS`.

use std::{
  cmp::Ordering,
  fmt,
  hash::{Hash, Hasher},
  ops::{Add, Sub},
  sync::OnceLock,
};

use chrono::{DateTime, Months, NaiveDate, TimeDelta, TimeZone, Timelike, Utc};
use regex::{Captures, Regex};

use crate::{Error, Result};

// ─── Patterns ────────────────────────────────────────────────────────────────

fn date_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| {
    Regex::new(
      r"^(?P<y>\d{4})(?:-(?P<m>\d{1,2})(?:-(?P<d>\d{1,2}))?)?(?:[.T ](?P<H>\d{1,2}):(?P<M>\d{2})(?::(?P<S>\d{2})(?:\.(?P<f>\d{1,6}))?)?)?(?:\s+(?P<off>[-+].*))?$",
    )
    .expect("date regex must compile")
  })
}

fn time_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| {
    Regex::new(r"^(?P<H>\d{1,2}):(?P<M>\d{2})(?::(?P<S>\d{2}))?(?:\s+(?P<off>[-+].*))?$")
      .expect("time regex must compile")
  })
}

fn compact_date_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| {
    Regex::new(r"^(\d{4})(\d{2})(\d{2})(\d{2})(\d{2})(\d{2})(?:\.(\d+))?$")
      .expect("compact date regex must compile")
  })
}

fn interval_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| {
    Regex::new(
      r"(?i)^(?P<s>[-+])?\s*(?:(?P<y>\d+)\s*y)?\s*(?:(?P<m>\d+)\s*m)?\s*(?:(?P<w>\d+)\s*w)?\s*(?:(?P<d>\d+)\s*d)?\s*(?:(?P<H>\d+):(?P<M>\d{2})(?::(?P<S>\d{2}))?)?$",
    )
    .expect("interval regex must compile")
  })
}

fn serialised_interval_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| {
    Regex::new(r"^(?P<s>[-+])?(?P<y>\d{4,})(?P<m>\d{2})(?P<d>\d{2})(?P<H>\d{2})(?P<M>\d{2})(?P<S>\d{2})$")
      .expect("serialised interval regex must compile")
  })
}

fn range_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| {
    Regex::new(r"(?i)^(?:from\b)?\s*(?P<from>.*?)\s*\bto\b\s*(?P<to>.*)$")
      .expect("range regex must compile")
  })
}

fn open_range_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| {
    Regex::new(r"(?i)^from\b\s*(?P<from>.+)$").expect("open range regex must compile")
  })
}

/// A captured numeric field; `Ok(None)` when the group did not match.
fn num(caps: &Captures<'_>, name: &str) -> Result<Option<u32>> {
  caps
    .name(name)
    .map(|m| {
      m.as_str()
        .parse()
        .map_err(|_| Error::InvalidValue(format!("{:?} is out of range", m.as_str())))
    })
    .transpose()
}

fn out_of_range() -> Error { Error::InvalidValue("interval is out of range".into()) }

// ─── Date ────────────────────────────────────────────────────────────────────

/// An absolute UTC timestamp truncated to microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Date(DateTime<Utc>);

/// Precision of a parsed date spec, used to expand it into a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Precision {
  Year,
  Month,
  Day,
  Minute,
  Second,
  Exact,
}

impl Date {
  pub fn now() -> Self { Date::from_datetime(Utc::now()) }

  pub fn from_datetime(dt: DateTime<Utc>) -> Self {
    let truncated = dt.nanosecond() / 1_000 * 1_000;
    Date(dt.with_nanosecond(truncated).unwrap_or(dt))
  }

  pub fn from_ymd_hms(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
  ) -> Result<Self> {
    Self::build(year, month, day, hour, minute, second, 0).ok_or_else(|| {
      Error::InvalidValue(format!(
        "no such date: {year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
      ))
    })
  }

  fn build(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
    micros: u32,
  ) -> Option<Self> {
    let naive = NaiveDate::from_ymd_opt(year, month, day)?
      .and_hms_micro_opt(hour, minute, second, micros)?;
    Some(Date(Utc.from_utc_datetime(&naive)))
  }

  pub fn as_datetime(&self) -> DateTime<Utc> { self.0 }

  /// Storage form: `YYYY-MM-DD.HH:MM:SS.ffffff`.
  pub fn serialise(&self) -> String { self.0.format("%Y-%m-%d.%H:%M:%S%.6f").to_string() }

  /// Parse a date spec.
  ///
  /// Accepted forms: `YYYY[-MM[-DD]][.HH:MM[:SS[.ffffff]]]`, the compact
  /// `YYYYMMDDHHMMSS[.fff]`, `HH:MM[:SS]` (today), `.` (now), and any of
  /// these followed by an interval offset such as `. -2d` or `2003-02-01 +1m`.
  /// A bare interval (`-1w`) is taken relative to now.
  pub fn parse(spec: &str) -> Result<Self> { Ok(Self::parse_span(spec)?.0) }

  /// Parse a date spec and return the first and last instant it covers:
  /// `2003-02` spans the whole of February 2003.
  pub fn parse_span(spec: &str) -> Result<(Date, Date)> {
    let spec = spec.trim();
    let invalid = || Error::InvalidValue(format!("not a date: {spec:?}"));
    if spec.is_empty() {
      return Err(invalid());
    }

    let relative = |rest: &str| -> Result<(Date, Date)> {
      let now = Date::now();
      let rest = rest.trim();
      if rest.is_empty() {
        return Ok((now, now));
      }
      let offset = Interval::parse(rest).map_err(|_| invalid())?;
      let at = now.checked_add(&offset).ok_or_else(invalid)?;
      Ok((at, at))
    };
    if let Some(rest) = spec.strip_prefix('.') {
      return relative(rest);
    }
    if spec.starts_with(['+', '-']) {
      return relative(spec);
    }

    if let Some(caps) = compact_date_re().captures(spec) {
      let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
      let micros = caps.get(7).map(|m| fraction_micros(m.as_str())).unwrap_or(0);
      let year = field(1).ok_or_else(invalid)? as i32;
      let date = Self::build(
        year,
        field(2).ok_or_else(invalid)?,
        field(3).ok_or_else(invalid)?,
        field(4).ok_or_else(invalid)?,
        field(5).ok_or_else(invalid)?,
        field(6).ok_or_else(invalid)?,
        micros,
      )
      .ok_or_else(invalid)?;
      return Ok((date, date));
    }

    let (start, precision, offset) = if let Some(caps) = date_re().captures(spec) {
      let year = num(&caps, "y")?.ok_or_else(invalid)? as i32;
      let month = num(&caps, "m")?;
      let day = num(&caps, "d")?;
      let hour = num(&caps, "H")?;
      let second = num(&caps, "S")?;
      let micros = caps.name("f").map(|m| fraction_micros(m.as_str()));
      let precision = match (month, day, hour, second, micros) {
        (_, _, _, _, Some(_)) => Precision::Exact,
        (_, _, _, Some(_), None) => Precision::Second,
        (_, _, Some(_), None, None) => Precision::Minute,
        (_, Some(_), None, ..) => Precision::Day,
        (Some(_), None, None, ..) => Precision::Month,
        _ => Precision::Year,
      };
      let start = Self::build(
        year,
        month.unwrap_or(1),
        day.unwrap_or(1),
        hour.unwrap_or(0),
        num(&caps, "M")?.unwrap_or(0),
        second.unwrap_or(0),
        micros.unwrap_or(0),
      )
      .ok_or_else(invalid)?;
      (start, precision, caps.name("off").map(|m| m.as_str().to_owned()))
    } else if let Some(caps) = time_re().captures(spec) {
      let today = Utc::now().date_naive();
      let naive = today
        .and_hms_opt(
          num(&caps, "H")?.ok_or_else(invalid)?,
          num(&caps, "M")?.ok_or_else(invalid)?,
          num(&caps, "S")?.unwrap_or(0),
        )
        .ok_or_else(invalid)?;
      let precision = if caps.name("S").is_some() {
        Precision::Second
      } else {
        Precision::Minute
      };
      (
        Date(Utc.from_utc_datetime(&naive)),
        precision,
        caps.name("off").map(|m| m.as_str().to_owned()),
      )
    } else {
      return Err(invalid());
    };

    let end = start.end_of(precision).ok_or_else(invalid)?;
    match offset {
      Some(offset) => {
        let offset = Interval::parse(&offset).map_err(|_| invalid())?;
        let shift = |d: Date| d.checked_add(&offset).ok_or_else(invalid);
        Ok((shift(start)?, shift(end)?))
      }
      None => Ok((start, end)),
    }
  }

  fn end_of(self, precision: Precision) -> Option<Date> {
    let next = match precision {
      Precision::Exact => return Some(self),
      Precision::Year => self.0.checked_add_months(Months::new(12))?,
      Precision::Month => self.0.checked_add_months(Months::new(1))?,
      Precision::Day => self.0.checked_add_signed(TimeDelta::try_days(1)?)?,
      Precision::Minute => self.0.checked_add_signed(TimeDelta::try_minutes(1)?)?,
      Precision::Second => self.0.checked_add_signed(TimeDelta::try_seconds(1)?)?,
    };
    Some(Date(next.checked_sub_signed(TimeDelta::microseconds(1))?))
  }

  /// Calendar-aware addition: months and years move the month field (the day
  /// is clamped to the end of a shorter month), the rest is absolute time.
  /// `None` when the result leaves the representable range.
  pub fn checked_add(&self, interval: &Interval) -> Option<Date> {
    let months = Months::new(interval.year.checked_mul(12)?.checked_add(interval.month)?);
    let shifted = if interval.negative {
      self.0.checked_sub_months(months)
    } else {
      self.0.checked_add_months(months)
    }?;
    let seconds = interval.clock_seconds();
    let delta = TimeDelta::try_seconds(if interval.negative { -seconds } else { seconds })?;
    shifted.checked_add_signed(delta).map(Date)
  }

  /// Like [`checked_add`](Date::checked_add), saturating at the earliest or
  /// latest representable date.
  pub fn add_interval(&self, interval: &Interval) -> Date {
    self.checked_add(interval).unwrap_or(if interval.negative {
      Date(DateTime::<Utc>::MIN_UTC)
    } else {
      Date(DateTime::<Utc>::MAX_UTC)
    })
  }

  /// Absolute difference `self - earlier` as a day/clock interval.
  pub fn since(&self, earlier: &Date) -> Interval {
    Interval::from_seconds((self.0 - earlier.0).num_seconds())
  }
}

fn fraction_micros(digits: &str) -> u32 {
  let padded = format!("{digits:0<6}");
  padded[..6].parse().unwrap_or(0)
}

impl fmt::Display for Date {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0.format("%Y-%m-%d.%H:%M:%S"))
  }
}

impl Add<Interval> for Date {
  type Output = Date;

  fn add(self, rhs: Interval) -> Date { self.add_interval(&rhs) }
}

impl Sub<Interval> for Date {
  type Output = Date;

  fn sub(self, rhs: Interval) -> Date { self.add_interval(&rhs.negated()) }
}

// ─── Interval ────────────────────────────────────────────────────────────────

/// A signed duration with calendar fields.
///
/// Comparison uses [`as_seconds`](Interval::as_seconds), which counts a month
/// as 30 days and a year as 365 days.
#[derive(Debug, Clone, Copy, Default)]
pub struct Interval {
  negative: bool,
  year:     u32,
  month:    u32,
  day:      u32,
  hour:     u32,
  minute:   u32,
  second:   u32,
}

impl Interval {
  /// Build an interval, carrying overflowing fields upward.
  pub fn from_parts(
    negative: bool,
    year: u32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
  ) -> Result<Self> {
    let minute = minute.checked_add(second / 60).ok_or_else(out_of_range)?;
    let hour = hour.checked_add(minute / 60).ok_or_else(out_of_range)?;
    let day = day.checked_add(hour / 24).ok_or_else(out_of_range)?;
    let year = year.checked_add(month / 12).ok_or_else(out_of_range)?;
    // Calendar months must stay countable for date arithmetic.
    year.checked_mul(12).ok_or_else(out_of_range)?;
    let mut interval = Interval {
      negative,
      year,
      month: month % 12,
      day,
      hour: hour % 24,
      minute: minute % 60,
      second: second % 60,
    };
    if interval.is_zero() {
      interval.negative = false;
    }
    Ok(interval)
  }

  /// A day/clock interval; day counts beyond `u32` saturate.
  pub fn from_seconds(seconds: i64) -> Self {
    let total = seconds.unsigned_abs();
    let rest = (total % 86_400) as u32;
    Interval {
      negative: seconds < 0,
      year:     0,
      month:    0,
      day:      u32::try_from(total / 86_400).unwrap_or(u32::MAX),
      hour:     rest / 3600,
      minute:   rest % 3600 / 60,
      second:   rest % 60,
    }
  }

  pub fn is_zero(&self) -> bool {
    self.year == 0
      && self.month == 0
      && self.day == 0
      && self.hour == 0
      && self.minute == 0
      && self.second == 0
  }

  pub fn is_negative(&self) -> bool { self.negative }

  pub fn negated(&self) -> Self {
    let mut flipped = *self;
    flipped.negative = !self.negative && !self.is_zero();
    flipped
  }

  fn clock_seconds(&self) -> i64 {
    ((i64::from(self.day) * 24 + i64::from(self.hour)) * 60 + i64::from(self.minute)) * 60
      + i64::from(self.second)
  }

  pub fn as_seconds(&self) -> i64 {
    let days = i64::from(self.year) * 365 + i64::from(self.month) * 30 + i64::from(self.day);
    let magnitude =
      ((days * 24 + i64::from(self.hour)) * 60 + i64::from(self.minute)) * 60 + i64::from(self.second);
    if self.negative { -magnitude } else { magnitude }
  }

  /// Storage form: `±YYYYMMDDHHMMSS`.
  pub fn serialise(&self) -> String {
    format!(
      "{}{:04}{:02}{:02}{:02}{:02}{:02}",
      if self.negative { '-' } else { '+' },
      self.year,
      self.month,
      self.day,
      self.hour,
      self.minute,
      self.second
    )
  }

  /// Parse `[+-] [#y] [#m] [#w] [#d] [[H]H:MM[:SS]]` or the serialised form.
  pub fn parse(spec: &str) -> Result<Self> { Ok(Self::parse_span(spec)?.0) }

  /// Parse a spec and return it together with the last instant it covers at
  /// its own precision: `3d` spans `3d` to `3d 23:59:59`.
  pub fn parse_span(spec: &str) -> Result<(Interval, Interval)> {
    let spec = spec.trim();
    let invalid = || {
      Error::InvalidValue(format!(
        "not an interval: {spec:?} (expected [+-] [#y] [#m] [#w] [#d] [[H]H:MM[:SS]])"
      ))
    };

    if let Some(caps) = serialised_interval_re().captures(spec) {
      let interval = Interval::from_parts(
        caps.name("s").is_some_and(|s| s.as_str() == "-"),
        num(&caps, "y")?.ok_or_else(invalid)?,
        num(&caps, "m")?.ok_or_else(invalid)?,
        num(&caps, "d")?.ok_or_else(invalid)?,
        num(&caps, "H")?.ok_or_else(invalid)?,
        num(&caps, "M")?.ok_or_else(invalid)?,
        num(&caps, "S")?.ok_or_else(invalid)?,
      )?;
      return Ok((interval, interval));
    }

    let caps = interval_re().captures(spec).ok_or_else(invalid)?;
    let given = ["y", "m", "w", "d", "H", "S"]
      .iter()
      .any(|name| caps.name(name).is_some());
    if !given {
      return Err(invalid());
    }
    let negative = caps.name("s").is_some_and(|s| s.as_str() == "-");
    let weeks = num(&caps, "w")?.unwrap_or(0);
    let days = num(&caps, "d")?.unwrap_or(0);
    let days = weeks
      .checked_mul(7)
      .and_then(|w| w.checked_add(days))
      .ok_or_else(out_of_range)?;
    let interval = Interval::from_parts(
      negative,
      num(&caps, "y")?.unwrap_or(0),
      num(&caps, "m")?.unwrap_or(0),
      days,
      num(&caps, "H")?.unwrap_or(0),
      num(&caps, "M")?.unwrap_or(0),
      num(&caps, "S")?.unwrap_or(0),
    )?;

    let unit: i64 = if caps.name("S").is_some() {
      1
    } else if caps.name("H").is_some() {
      60
    } else if caps.name("d").is_some() {
      86_400
    } else if caps.name("w").is_some() {
      7 * 86_400
    } else if caps.name("m").is_some() {
      30 * 86_400
    } else {
      365 * 86_400
    };
    let base = interval.as_seconds();
    let span = if negative {
      (Interval::from_seconds(base - (unit - 1)), interval)
    } else {
      (interval, Interval::from_seconds(base + (unit - 1)))
    };
    Ok(span)
  }
}

impl PartialEq for Interval {
  fn eq(&self, other: &Self) -> bool { self.as_seconds() == other.as_seconds() }
}

impl Eq for Interval {}

impl PartialOrd for Interval {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl Ord for Interval {
  fn cmp(&self, other: &Self) -> Ordering { self.as_seconds().cmp(&other.as_seconds()) }
}

impl Hash for Interval {
  fn hash<H: Hasher>(&self, state: &mut H) { self.as_seconds().hash(state) }
}

impl fmt::Display for Interval {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut parts = Vec::new();
    if self.year > 0 {
      parts.push(format!("{}y", self.year));
    }
    if self.month > 0 {
      parts.push(format!("{}m", self.month));
    }
    if self.day > 0 {
      parts.push(format!("{}d", self.day));
    }
    if self.second > 0 {
      parts.push(format!("{}:{:02}:{:02}", self.hour, self.minute, self.second));
    } else if self.hour > 0 || self.minute > 0 {
      parts.push(format!("{}:{:02}", self.hour, self.minute));
    }
    if parts.is_empty() {
      return f.write_str("00:00");
    }
    write!(f, "{} {}", if self.negative { '-' } else { '+' }, parts.join(" "))
  }
}

// ─── Range ───────────────────────────────────────────────────────────────────

/// A value type usable as a [`Range`] bound.
pub trait RangeBound: Sized + Ord + Clone {
  fn parse_bound(spec: &str) -> Result<Self>;

  /// First and last value covered by `spec` at its own precision.
  fn parse_span(spec: &str) -> Result<(Self, Self)>;
}

impl RangeBound for Date {
  fn parse_bound(spec: &str) -> Result<Self> { Date::parse(spec) }

  fn parse_span(spec: &str) -> Result<(Self, Self)> { Date::parse_span(spec) }
}

impl RangeBound for Interval {
  fn parse_bound(spec: &str) -> Result<Self> { Interval::parse(spec) }

  fn parse_span(spec: &str) -> Result<(Self, Self)> { Interval::parse_span(spec) }
}

/// Inclusive range; a missing bound is unbounded on that side.
#[derive(Debug, Clone, PartialEq)]
pub struct Range<T> {
  pub from: Option<T>,
  pub to:   Option<T>,
}

impl<T: RangeBound> Range<T> {
  /// Parse `from X to Y`, `X;Y`, either with one side omitted, or a single
  /// value that is widened to its precision (`2003` is the whole year).
  pub fn parse(spec: &str) -> Result<Self> {
    let spec = spec.trim();
    let bound = |s: &str| -> Result<Option<T>> {
      let s = s.trim();
      if s.is_empty() { Ok(None) } else { T::parse_bound(s).map(Some) }
    };

    if let Some((from, to)) = spec.split_once(';') {
      return Ok(Range {
        from: bound(from)?,
        to:   bound(to)?,
      });
    }
    if let Some(caps) = range_re().captures(spec) {
      return Ok(Range {
        from: bound(caps.name("from").map_or("", |m| m.as_str()))?,
        to:   bound(caps.name("to").map_or("", |m| m.as_str()))?,
      });
    }
    if let Some(caps) = open_range_re().captures(spec) {
      return Ok(Range {
        from: bound(caps.name("from").map_or("", |m| m.as_str()))?,
        to:   None,
      });
    }
    let (from, to) = T::parse_span(spec)?;
    Ok(Range {
      from: Some(from),
      to:   Some(to),
    })
  }

  pub fn contains(&self, value: &T) -> bool {
    self.from.as_ref().is_none_or(|from| value >= from)
      && self.to.as_ref().is_none_or(|to| value <= to)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn date(spec: &str) -> Date { Date::parse(spec).unwrap() }

  // ─── Dates ─────────────────────────────────────────────────────────────────

  #[test]
  fn serialises_with_microseconds() {
    let d = date("2003-02-16.10:11:12.5");
    assert_eq!(d.serialise(), "2003-02-16.10:11:12.500000");
    assert_eq!(Date::parse(&d.serialise()).unwrap(), d);
    assert_eq!(d.to_string(), "2003-02-16.10:11:12");
  }

  #[test]
  fn accepts_compact_legacy_form() {
    assert_eq!(date("20030216101112.250"), date("2003-02-16.10:11:12.25"));
    assert_eq!(date("20030216101112"), date("2003-02-16 10:11:12"));
  }

  #[test]
  fn partial_dates_start_at_the_beginning_of_their_period() {
    assert_eq!(date("2003"), Date::from_ymd_hms(2003, 1, 1, 0, 0, 0).unwrap());
    assert_eq!(date("2003-02"), Date::from_ymd_hms(2003, 2, 1, 0, 0, 0).unwrap());
    assert_eq!(date("2003-02-16.10:11"), Date::from_ymd_hms(2003, 2, 16, 10, 11, 0).unwrap());
  }

  #[test]
  fn spans_cover_the_whole_period() {
    let (start, end) = Date::parse_span("2003-02").unwrap();
    assert_eq!(start, Date::from_ymd_hms(2003, 2, 1, 0, 0, 0).unwrap());
    assert_eq!(end.serialise(), "2003-02-28.23:59:59.999999");

    let (_, end) = Date::parse_span("2003-02-16").unwrap();
    assert_eq!(end.serialise(), "2003-02-16.23:59:59.999999");
  }

  #[test]
  fn offsets_apply_to_explicit_dates() {
    assert_eq!(date("2003-01-31 +1m"), Date::from_ymd_hms(2003, 2, 28, 0, 0, 0).unwrap());
    assert_eq!(date("2003-03-01 -1d"), Date::from_ymd_hms(2003, 2, 28, 0, 0, 0).unwrap());
  }

  #[test]
  fn relative_dates_are_near_now() {
    let before = Date::now();
    let d = date(". -1d");
    let expected = before - Interval::parse("1d").unwrap();
    assert!(d.since(&expected).as_seconds().abs() <= 2);
    assert!(Date::parse(".").unwrap() >= before);
  }

  #[test]
  fn rejects_garbage() {
    for bad in ["", "soon", "2003-13-01", "2003-02-30", "12"] {
      assert!(Date::parse(bad).is_err(), "{bad:?} should not parse");
    }
  }

  #[test]
  fn difference_between_dates() {
    let a = date("2003-02-16.10:00:00");
    let b = date("2003-02-14.08:30:00");
    assert_eq!(a.since(&b).to_string(), "+ 2d 1:30");
    assert_eq!(b.since(&a).to_string(), "- 2d 1:30");
  }

  // ─── Intervals ─────────────────────────────────────────────────────────────

  #[test]
  fn parses_human_interval_syntax() {
    let i = Interval::parse("3w 1d 2:00").unwrap();
    assert_eq!(i.to_string(), "+ 22d 2:00");
    assert_eq!(Interval::parse("- 1y 2m").unwrap().to_string(), "- 1y 2m");
    assert_eq!(Interval::parse("0:00:05").unwrap().as_seconds(), 5);
  }

  #[test]
  fn serialised_form_round_trips() {
    let i = Interval::parse("-1y 2m 3d 4:05:06").unwrap();
    assert_eq!(i.serialise(), "-00010203040506");
    let back = Interval::parse(&i.serialise()).unwrap();
    assert_eq!(back.to_string(), "- 1y 2m 3d 4:05:06");
  }

  #[test]
  fn overflowing_fields_carry() {
    let i = Interval::from_parts(false, 0, 14, 0, 25, 61, 61).unwrap();
    assert_eq!(i.to_string(), "+ 1y 2m 1d 2:02:01");
    assert_eq!(Interval::from_parts(true, 0, 0, 0, 0, 0, 0).unwrap().to_string(), "00:00");
  }

  #[test]
  fn oversized_fields_are_rejected() {
    for bad in ["99999999999d", "1000000000w", "999999999y", "4294967295m 4294967295y"] {
      let err = Interval::parse(bad).unwrap_err();
      assert_eq!(err.kind(), crate::ErrorKind::InvalidValue, "{bad:?}");
    }
    assert!(Interval::from_parts(false, 0, 0, u32::MAX, 24, 0, 0).is_err());
  }

  #[test]
  fn offsets_beyond_the_calendar_are_invalid_dates() {
    for bad in [". +999999999y", "2003-02-16 +300000000y", ". -200000000d"] {
      assert!(Date::parse(bad).is_err(), "{bad:?} should not parse");
    }
    let huge = Interval::from_seconds(i64::MAX);
    assert_eq!(date("2003-02-16") + huge, Date(DateTime::<Utc>::MAX_UTC));
    assert_eq!(date("2003-02-16") - huge, Date(DateTime::<Utc>::MIN_UTC));
  }

  #[test]
  fn intervals_compare_by_seconds() {
    let month = Interval::parse("1m").unwrap();
    let thirty_days = Interval::parse("30d").unwrap();
    assert_eq!(month, thirty_days);
    assert!(Interval::parse("-1d").unwrap() < Interval::parse("1:00").unwrap());
  }

  #[test]
  fn rejects_empty_interval() {
    assert!(Interval::parse("").is_err());
    assert!(Interval::parse("+").is_err());
    assert!(Interval::parse("three days").is_err());
  }

  // ─── Ranges ────────────────────────────────────────────────────────────────

  #[test]
  fn date_range_syntaxes() {
    let r = Range::<Date>::parse("from 2003-02-10 to 2003-02-20").unwrap();
    assert!(r.contains(&date("2003-02-15")));
    assert!(!r.contains(&date("2003-02-21")));

    let r = Range::<Date>::parse("2003-02-10;").unwrap();
    assert!(r.to.is_none());
    assert!(r.contains(&date("2010-01-01")));

    let r = Range::<Date>::parse("; 2003-02-10").unwrap();
    assert!(r.from.is_none());

    let r = Range::<Date>::parse("from 2003-02-16").unwrap();
    assert_eq!(r.from, Some(date("2003-02-16")));
    assert!(r.to.is_none());
  }

  #[test]
  fn single_date_range_uses_granularity() {
    let r = Range::<Date>::parse("2003").unwrap();
    assert!(r.contains(&date("2003-12-31.23:59:59")));
    assert!(!r.contains(&date("2004-01-01")));

    let r = Range::<Date>::parse("2003-02-16").unwrap();
    assert!(r.contains(&date("2003-02-16.18:00")));
    assert!(!r.contains(&date("2003-02-17")));
  }

  #[test]
  fn interval_ranges() {
    let r = Range::<Interval>::parse("from 0:50 to 2:00").unwrap();
    assert!(r.contains(&Interval::parse("1:00").unwrap()));
    assert!(!r.contains(&Interval::parse("2:01").unwrap()));

    let r = Range::<Interval>::parse("3d").unwrap();
    assert!(r.contains(&Interval::parse("3d 12:00").unwrap()));
    assert!(!r.contains(&Interval::parse("4d").unwrap()));
  }
}
