use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};

/// Funding accrues every 8 hours, at 00:00, 08:00 and 16:00 UTC.
pub const FUNDING_INTERVAL_HOURS: u32 = 8;

/// Start of the funding interval containing `now`.
pub fn funding_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
  let hour = now.hour() - now.hour() % FUNDING_INTERVAL_HOURS;
  Utc
    .with_ymd_and_hms(now.year(), now.month(), now.day(), hour, 0, 0)
    .single()
    .expect("failed to construct funding boundary")
}

/// The next funding boundary strictly after `now`.
pub fn next_funding_at(now: DateTime<Utc>) -> DateTime<Utc> {
  funding_boundary(now) + Duration::hours(FUNDING_INTERVAL_HOURS as i64)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn utc(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, h, m, 0).unwrap()
  }

  #[test]
  fn boundary_floors_to_eight_hour_grid() {
    assert_eq!(funding_boundary(utc(7, 59)), utc(0, 0));
    assert_eq!(funding_boundary(utc(8, 0)), utc(8, 0));
    assert_eq!(funding_boundary(utc(15, 30)), utc(8, 0));
    assert_eq!(funding_boundary(utc(23, 59)), utc(16, 0));
  }

  #[test]
  fn next_boundary_rolls_into_next_day() {
    assert_eq!(next_funding_at(utc(23, 30)), funding_boundary(utc(23, 30)) + Duration::hours(8));
    assert_eq!(
      next_funding_at(utc(23, 30)),
      Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 0).unwrap()
    );
    assert_eq!(next_funding_at(utc(0, 0)), utc(8, 0));
  }
}
