use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::Context;
use chrono::{
  DateTime,
  Datelike,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  TimeZone,
  Timelike,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;

use crate::error::DateError;

const TIMEZONE_CONFIG_FILE: &str =
  "dayline-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "DAYLINE_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "DAYLINE_TIME_CONFIG";
pub const DEFAULT_PLAN_TIMEZONE: &str =
  "America/New_York";

pub const MINUTES_PER_DAY: i64 = 1440;

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
  timezone: Option<String>,
  time:     Option<TimezoneSection>
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
  timezone: Option<String>
}

/// Candidate timezone names, highest
/// priority first. Environment and the
/// `dayline-time.toml` file sit between
/// `payload` and `configured`.
#[derive(Debug, Clone, Default)]
pub struct TimezoneSources<'a> {
  pub cli:        Option<&'a str>,
  pub payload:    Option<&'a str>,
  pub configured: Option<&'a str>
}

/// Picks the first timezone source that
/// is present. A present but invalid
/// source is an error; there is no
/// fallback to the machine's local
/// zone.
#[tracing::instrument(skip(sources))]
pub fn resolve_timezone(
  sources: &TimezoneSources<'_>
) -> anyhow::Result<Tz> {
  if let Some(raw) = sources.cli {
    return Ok(parse_timezone(
      raw, "--tz"
    )?);
  }

  if let Some(raw) = sources.payload {
    return Ok(parse_timezone(
      raw, "plan payload"
    )?);
  }

  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
  {
    return Ok(parse_timezone(
      &raw,
      TIMEZONE_ENV_VAR
    )?);
  }

  if let Some(path) =
    timezone_config_path()
    && let Some(raw) =
      load_timezone_from_file(&path)?
  {
    return Ok(parse_timezone(
      &raw,
      &format!(
        "file:{}",
        path.display()
      )
    )?);
  }

  if let Some(raw) = sources.configured
  {
    return Ok(parse_timezone(
      raw,
      "timezone.default"
    )?);
  }

  Ok(parse_timezone(
    DEFAULT_PLAN_TIMEZONE,
    "built-in default"
  )?)
}

pub fn parse_timezone(
  raw: &str,
  source: &str
) -> Result<Tz, DateError> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return Err(
      DateError::EmptyTimezone(
        source.to_string()
      )
    );
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::info!(
        source,
        timezone = %trimmed,
        "resolved plan timezone"
      );
      Ok(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      Err(DateError::UnknownTimezone {
        value:       trimmed
          .to_string(),
        source_name: source.to_string()
      })
    }
  }
}

fn timezone_config_path()
-> Option<PathBuf> {
  if let Ok(raw) = std::env::var(
    TIMEZONE_CONFIG_ENV_VAR
  ) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
      return Some(PathBuf::from(
        trimmed
      ));
    }
  }

  std::env::current_dir().ok().map(
    |dir| {
      dir.join(TIMEZONE_CONFIG_FILE)
    }
  )
}

fn load_timezone_from_file(
  path: &Path
) -> anyhow::Result<Option<String>> {
  if !path.exists() {
    tracing::debug!(
      file = %path.display(),
      "timezone config file not found"
    );
    return Ok(None);
  }

  let raw = fs::read_to_string(path)
    .with_context(|| {
      format!(
        "failed reading {}",
        path.display()
      )
    })?;

  let parsed =
    toml::from_str::<TimezoneConfig>(
      &raw
    )
    .with_context(|| {
      format!(
        "failed parsing {}",
        path.display()
      )
    })?;

  let timezone =
    parsed.timezone.or_else(|| {
      parsed.time.and_then(|section| {
        section.timezone
      })
    });
  if timezone.is_none() {
    tracing::warn!(
      file = %path.display(),
      "timezone config had no timezone field"
    );
  }

  Ok(timezone)
}

/// Interprets a plan `start` value. Naive
/// forms are wall-clock time in `tz`;
/// RFC 3339 values keep their offset.
#[tracing::instrument(skip(tz), fields(input = raw))]
pub fn parse_plan_start(
  raw: &str,
  tz: Tz
) -> Result<DateTime<Utc>, DateError> {
  let token = raw.trim();
  if token.is_empty() {
    return Err(
      DateError::InvalidTimestamp(
        raw.to_string()
      )
    );
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(dt.with_timezone(&Utc));
  }
  if let Ok(dt) =
    DateTime::parse_from_str(
      token,
      "%Y-%m-%dT%H:%M%:z"
    )
  {
    return Ok(dt.with_timezone(&Utc));
  }

  const NAIVE_FORMATS: [&str; 6] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M"
  ];
  for fmt in NAIVE_FORMATS {
    if let Ok(naive) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return to_utc_from_local(
        naive, tz, token
      );
    }
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
    && let Some(midnight) =
      date.and_hms_opt(0, 0, 0)
  {
    return to_utc_from_local(
      midnight, tz, token
    );
  }

  Err(DateError::InvalidTimestamp(
    token.to_string()
  ))
}

fn to_utc_from_local(
  local_naive: NaiveDateTime,
  tz: Tz,
  context: &str
) -> Result<DateTime<Utc>, DateError> {
  match tz
    .from_local_datetime(&local_naive)
  {
    | LocalResult::Single(local_dt) => {
      Ok(local_dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      tracing::warn!(
        context,
        first = %first,
        second = %second,
        "ambiguous local datetime; using earliest"
      );
      let chosen = if first <= second {
        first
      } else {
        second
      };
      Ok(chosen.with_timezone(&Utc))
    }
    | LocalResult::None => {
      Err(
        DateError::NonexistentLocalTime(
          context.to_string(),
          tz.name().to_string()
        )
      )
    }
  }
}

#[must_use]
pub fn today_in(
  tz: Tz,
  now: DateTime<Utc>
) -> NaiveDate {
  now.with_timezone(&tz).date_naive()
}

/// Wall-clock minutes of `instant`
/// measured from midnight of `day` in
/// `tz`. Earlier days go negative, later
/// days land at or past 1440.
#[must_use]
pub fn minute_of_day(
  instant: DateTime<Utc>,
  day: NaiveDate,
  tz: Tz
) -> i64 {
  let local = instant.with_timezone(&tz);
  let day_offset = local
    .date_naive()
    .signed_duration_since(day)
    .num_days();
  day_offset * MINUTES_PER_DAY
    + i64::from(local.hour()) * 60
    + i64::from(local.minute())
}

#[must_use]
pub fn format_clock(
  instant: DateTime<Utc>,
  tz: Tz
) -> String {
  instant
    .with_timezone(&tz)
    .format("%-I:%M %p")
    .to_string()
}

#[must_use]
pub fn format_hour_label(
  hour: u32
) -> String {
  let (display, suffix) = match hour {
    | 0 | 24 => (12, "AM"),
    | 1..=11 => (hour, "AM"),
    | 12 => (12, "PM"),
    | _ => (hour - 12, "PM")
  };
  format!("{display} {suffix}")
}

/// Resolves the day selector used by
/// `--date`.
#[tracing::instrument(skip(today), fields(input = input))]
pub fn parse_day_expr(
  input: &str,
  today: NaiveDate
) -> Result<NaiveDate, DateError> {
  let token = input.trim();
  let lower = token.to_ascii_lowercase();

  match lower.as_str() {
    | "today" | "now" => {
      return Ok(today);
    }
    | "yesterday" => {
      return Ok(
        today.pred_opt().unwrap_or(today)
      );
    }
    | "tomorrow" => {
      return Ok(
        today.succ_opt().unwrap_or(today)
      );
    }
    | _ => {}
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return Ok(date);
  }

  if let Some(weekday) =
    parse_weekday_name(&lower)
  {
    return Ok(next_weekday_date(
      today, weekday
    ));
  }

  let offset_re =
    Regex::new(r"^(?P<sign>[+-])(?P<days>\d{1,4})d$")
      .map_err(|_| {
        DateError::InvalidDay(
          token.to_string()
        )
      })?;
  if let Some(captures) =
    offset_re.captures(&lower)
  {
    let days = captures
      .name("days")
      .and_then(|m| {
        m.as_str().parse::<i64>().ok()
      })
      .ok_or_else(|| {
        DateError::InvalidDay(
          token.to_string()
        )
      })?;
    let signed = if captures
      .name("sign")
      .is_some_and(|m| m.as_str() == "-")
    {
      -days
    } else {
      days
    };
    return today
      .checked_add_signed(
        Duration::days(signed)
      )
      .ok_or_else(|| {
        DateError::InvalidDay(
          token.to_string()
        )
      });
  }

  Err(DateError::InvalidDay(
    token.to_string()
  ))
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = from
    .weekday()
    .num_days_from_monday()
    as i64;
  let target_idx = target
    .num_days_from_monday()
    as i64;
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  from
    .checked_add_signed(Duration::days(
      delta
    ))
    .unwrap_or(from)
}

/// `HH:MM` (24h) or `h:mm am/pm`.
pub fn parse_clock_time(
  token: &str
) -> Option<(u32, u32)> {
  let clock_re = Regex::new(
    r"(?i)^(?P<hour>\d{1,2}):(?P<minute>\d{2})\s*(?P<ampm>[ap]m)?$",
  )
  .ok()?;
  let captures =
    clock_re.captures(token.trim())?;

  let raw_hour = captures
    .name("hour")?
    .as_str()
    .parse::<u32>()
    .ok()?;
  let minute = captures
    .name("minute")?
    .as_str()
    .parse::<u32>()
    .ok()?;
  if minute > 59 {
    return None;
  }

  let hour = if let Some(ampm_match) =
    captures.name("ampm")
  {
    let ampm = ampm_match
      .as_str()
      .to_ascii_lowercase();
    if raw_hour == 0 || raw_hour > 12 {
      return None;
    }
    match ampm.as_str() {
      | "am" => {
        if raw_hour == 12 {
          0
        } else {
          raw_hour
        }
      }
      | "pm" => {
        if raw_hour == 12 {
          12
        } else {
          raw_hour + 12
        }
      }
      | _ => return None
    }
  } else {
    if raw_hour > 23 {
      return None;
    }
    raw_hour
  };

  Some((hour, minute))
}

#[cfg(test)]
mod tests {
  use chrono::{
    NaiveDate,
    TimeZone,
    Utc
  };
  use chrono_tz::Tz;

  use super::{
    format_clock,
    format_hour_label,
    minute_of_day,
    parse_clock_time,
    parse_day_expr,
    parse_plan_start,
    parse_timezone
  };
  use crate::error::DateError;

  fn new_york() -> Tz {
    parse_timezone(
      "America/New_York",
      "test"
    )
    .expect("valid zone")
  }

  #[test]
  fn naive_start_is_wall_clock_in_zone()
  {
    let start = parse_plan_start(
      "2024-01-01T09:00",
      new_york()
    )
    .expect("parse start");
    assert_eq!(
      start,
      Utc
        .with_ymd_and_hms(
          2024, 1, 1, 14, 0, 0
        )
        .single()
        .expect("valid utc")
    );
  }

  #[test]
  fn offset_start_keeps_its_instant() {
    let start = parse_plan_start(
      "2024-01-01T09:00:00Z",
      new_york()
    )
    .expect("parse start");
    assert_eq!(
      format_clock(start, new_york()),
      "4:00 AM"
    );
  }

  #[test]
  fn spring_forward_gap_is_rejected() {
    let err = parse_plan_start(
      "2024-03-10T02:30",
      new_york()
    )
    .expect_err("gap time");
    assert!(matches!(
      err,
      DateError::NonexistentLocalTime(
        ..
      )
    ));
  }

  #[test]
  fn garbage_start_is_rejected() {
    assert!(
      parse_plan_start(
        "next tuesday-ish",
        new_york()
      )
      .is_err()
    );
  }

  #[test]
  fn unknown_zone_is_an_error() {
    let err = parse_timezone(
      "Mars/Olympus_Mons",
      "test"
    )
    .expect_err("unknown zone");
    assert!(matches!(
      err,
      DateError::UnknownTimezone { .. }
    ));
    assert!(
      parse_timezone("  ", "test")
        .is_err()
    );
  }

  #[test]
  fn minutes_cross_midnight() {
    let tz = new_york();
    let day =
      NaiveDate::from_ymd_opt(2024, 1, 1)
        .expect("valid day");
    let late = parse_plan_start(
      "2024-01-02T00:30",
      tz
    )
    .expect("parse");
    assert_eq!(
      minute_of_day(late, day, tz),
      1440 + 30
    );
    let early = parse_plan_start(
      "2023-12-31T23:00",
      tz
    )
    .expect("parse");
    assert_eq!(
      minute_of_day(early, day, tz),
      -60
    );
  }

  #[test]
  fn day_expressions() {
    let today =
      NaiveDate::from_ymd_opt(2026, 2, 17)
        .expect("valid day");
    let fmt = |raw: &str| {
      parse_day_expr(raw, today)
        .expect("parse day")
        .format("%Y-%m-%d")
        .to_string()
    };
    assert_eq!(fmt("today"), "2026-02-17");
    assert_eq!(
      fmt("tomorrow"),
      "2026-02-18"
    );
    assert_eq!(
      fmt("wednesday"),
      "2026-02-18"
    );
    assert_eq!(fmt("tue"), "2026-02-24");
    assert_eq!(fmt("-3d"), "2026-02-14");
    assert_eq!(
      fmt("2024-01-01"),
      "2024-01-01"
    );
    assert!(
      parse_day_expr("someday", today)
        .is_err()
    );
  }

  #[test]
  fn parses_clock_time() {
    assert_eq!(
      parse_clock_time("3:23pm"),
      Some((15, 23))
    );
    assert_eq!(
      parse_clock_time("12:05 am"),
      Some((0, 5))
    );
    assert_eq!(
      parse_clock_time("09:30"),
      Some((9, 30))
    );
    assert_eq!(
      parse_clock_time("25:00"),
      None
    );
  }

  #[test]
  fn hour_labels() {
    assert_eq!(format_hour_label(0), "12 AM");
    assert_eq!(format_hour_label(9), "9 AM");
    assert_eq!(format_hour_label(12), "12 PM");
    assert_eq!(format_hour_label(22), "10 PM");
    assert_eq!(format_hour_label(24), "12 AM");
  }
}
