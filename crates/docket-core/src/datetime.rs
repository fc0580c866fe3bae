use std::sync::OnceLock;

use anyhow::anyhow;
use chrono::{
  DateTime,
  Datelike,
  Days,
  Local,
  NaiveDate,
  NaiveDateTime,
  NaiveTime,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;

pub const DUE_DISPLAY_FORMAT: &str =
  "%Y-%m-%d";
const PERSISTED_FORMAT: &str =
  "%Y-%m-%dT%H:%M:%S%.f";

static PROJECT_TZ: OnceLock<Option<Tz>> =
  OnceLock::new();

/// Fixes the zone that decides what
/// "today" is. The first call wins;
/// `None` or an unparsable name falls
/// back to the system local zone.
pub fn configure_project_timezone(
  raw: Option<&str>
) {
  let resolved =
    raw.and_then(parse_timezone);
  if PROJECT_TZ.set(resolved).is_err() {
    tracing::debug!(
      "project timezone already \
       configured; ignoring"
    );
  }
}

pub fn project_timezone()
-> Option<&'static Tz> {
  PROJECT_TZ
    .get_or_init(|| None)
    .as_ref()
}

#[must_use]
pub fn project_date(
  now: DateTime<Utc>
) -> NaiveDate {
  match project_timezone() {
    | Some(tz) => {
      now.with_timezone(tz).date_naive()
    }
    | None => {
      now
        .with_timezone(&Local)
        .date_naive()
    }
  }
}

#[must_use]
pub fn today() -> NaiveDate {
  project_date(Utc::now())
}

#[must_use]
pub fn format_due(
  due: NaiveDateTime
) -> String {
  due
    .format(DUE_DISPLAY_FORMAT)
    .to_string()
}

#[must_use]
pub fn start_of_day(
  date: NaiveDate
) -> NaiveDateTime {
  date.and_time(NaiveTime::MIN)
}

fn parse_timezone(
  raw: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      "timezone setting was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::info!(
        timezone = %trimmed,
        "configured project timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id; \
         using system local"
      );
      None
    }
  }
}

/// Parses a due-date expression relative
/// to `today`.
#[tracing::instrument(skip(today), fields(input = input))]
pub fn parse_due_expr(
  input: &str,
  today: NaiveDate
) -> anyhow::Result<NaiveDate> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();

  match lower.as_str() {
    | "today" => return Ok(today),
    | "tomorrow" => {
      return today
        .checked_add_days(Days::new(1))
        .ok_or_else(|| {
          anyhow!("date out of range")
        });
    }
    | "yesterday" => {
      return today
        .checked_sub_days(Days::new(1))
        .ok_or_else(|| {
          anyhow!("date out of range")
        });
    }
    | _ => {}
  }

  if let Some(target) =
    parse_weekday_name(&lower)
  {
    return Ok(next_weekday_date(
      today, target
    ));
  }

  let rel_re = Regex::new(r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dw])$")
        .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;
  if let Some(caps) =
    rel_re.captures(&lower)
  {
    let num: u64 = caps["num"]
      .parse()
      .map_err(|e| {
        anyhow!(
          "invalid offset in \
           {token}: {e}"
        )
      })?;
    let days = match &caps["unit"] {
      | "w" => num.saturating_mul(7),
      | _ => num
    };
    let shifted = if &caps["sign"] == "-"
    {
      today
        .checked_sub_days(Days::new(days))
    } else {
      today
        .checked_add_days(Days::new(days))
    };
    return shifted.ok_or_else(|| {
      anyhow!(
        "date offset out of range: \
         {token}"
      )
    });
  }

  if let Some(parsed) =
    parse_iso_datetime(token)
  {
    return Ok(parsed.date());
  }

  Err(anyhow!(
    "unrecognized date '{token}'; \
     expected today, tomorrow, \
     yesterday, a weekday name, \
     +Nd/-Nd/+Nw, or YYYY-MM-DD"
  ))
}

/// Accepts the persisted form plus the
/// common ISO-8601 variants other
/// writers produce.
pub fn parse_iso_datetime(
  raw: &str
) -> Option<NaiveDateTime> {
  let raw = raw.trim();
  if raw.is_empty() {
    return None;
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(raw)
  {
    return Some(dt.naive_local());
  }

  for fmt in [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M"
  ] {
    if let Ok(dt) =
      NaiveDateTime::parse_from_str(
        raw, fmt
      )
    {
      return Some(dt);
    }
  }

  NaiveDate::parse_from_str(
    raw, "%Y-%m-%d"
  )
  .ok()
  .map(start_of_day)
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
    as u64;
  let target_idx = target
    .num_days_from_monday()
    as u64;
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  from
    .checked_add_days(Days::new(delta))
    .unwrap_or(from)
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;

  use super::{
    format_due,
    parse_due_expr,
    parse_iso_datetime
  };

  fn day(
    y: i32,
    m: u32,
    d: u32
  ) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d)
      .expect("valid date")
  }

  #[test]
  fn parses_relative_words() {
    let today = day(2026, 2, 17);
    assert_eq!(
      parse_due_expr("today", today)
        .unwrap(),
      today
    );
    assert_eq!(
      parse_due_expr("Tomorrow", today)
        .unwrap(),
      day(2026, 2, 18)
    );
    assert_eq!(
      parse_due_expr(
        "yesterday",
        today
      )
      .unwrap(),
      day(2026, 2, 16)
    );
  }

  #[test]
  fn parses_weekday_name() {
    // 2026-02-17 is a Tuesday.
    let today = day(2026, 2, 17);
    assert_eq!(
      parse_due_expr("wednesday", today)
        .unwrap(),
      day(2026, 2, 18)
    );
    assert_eq!(
      parse_due_expr("tue", today)
        .unwrap(),
      day(2026, 2, 24)
    );
  }

  #[test]
  fn parses_offsets() {
    let today = day(2026, 2, 17);
    assert_eq!(
      parse_due_expr("+3d", today)
        .unwrap(),
      day(2026, 2, 20)
    );
    assert_eq!(
      parse_due_expr("-1d", today)
        .unwrap(),
      day(2026, 2, 16)
    );
    assert_eq!(
      parse_due_expr("+2w", today)
        .unwrap(),
      day(2026, 3, 3)
    );
  }

  #[test]
  fn rejects_garbage() {
    assert!(
      parse_due_expr(
        "someday",
        day(2026, 2, 17)
      )
      .is_err()
    );
  }

  #[test]
  fn iso_variants_share_a_date() {
    for raw in [
      "2026-03-01",
      "2026-03-01T00:00:00",
      "2026-03-01T09:30:00.1234567",
      "2026-03-01T09:30:00+02:00",
      "2026-03-01T09:30"
    ] {
      let parsed =
        parse_iso_datetime(raw)
          .unwrap_or_else(|| {
            panic!("failed on {raw}")
          });
      assert_eq!(
        format_due(parsed),
        "2026-03-01"
      );
    }
    assert!(
      parse_iso_datetime("not a date")
        .is_none()
    );
  }
}

pub mod iso_date_serde {
  pub mod option {
    use chrono::NaiveDateTime;
    use serde::{
      Deserialize,
      Deserializer,
      Serializer
    };

    pub fn serialize<S>(
      dt: &Option<NaiveDateTime>,
      serializer: S
    ) -> Result<S::Ok, S::Error>
    where
      S: Serializer
    {
      match dt {
        | Some(value) => {
          serializer.serialize_str(
            &value
              .format(
                super::super::PERSISTED_FORMAT
              )
              .to_string()
          )
        }
        | None => {
          serializer.serialize_none()
        }
      }
    }

    pub fn deserialize<'de, D>(
      deserializer: D
    ) -> Result<
      Option<NaiveDateTime>,
      D::Error
    >
    where
      D: Deserializer<'de>
    {
      let opt =
        Option::<String>::deserialize(
          deserializer
        )?;
      match opt {
        | Some(raw) => {
          super::super::parse_iso_datetime(
            &raw
          )
          .map(Some)
          .ok_or_else(|| {
            serde::de::Error::custom(
              format!(
                "invalid dueDate: {raw}"
              )
            )
          })
        }
        | None => Ok(None)
      }
    }
  }
}
