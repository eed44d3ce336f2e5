use anyhow::{Result, anyhow};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};

/// Fires once a day at a fixed wall-clock time in a fixed offset.
#[derive(Debug, Clone)]
pub struct DailyCadence {
    tz: FixedOffset,
    target: NaiveTime,
}

impl DailyCadence {
    /// # Errors
    /// Returns an error when `hour`/`minute` do not form a valid time of day.
    pub fn new(tz: FixedOffset, hour: u32, minute: u32) -> Result<Self> {
        let target = NaiveTime::from_hms_opt(hour, minute, 0)
            .ok_or_else(|| anyhow!("invalid time: {hour:02}:{minute:02}"))?;
        Ok(Self { tz, target })
    }

    /// # Errors
    /// Returns an error when `hour`/`minute` do not form a valid time of day.
    pub fn utc(hour: u32, minute: u32) -> Result<Self> {
        Self::new(Utc.fix(), hour, minute)
    }

    #[must_use]
    pub fn next_run_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let localized_now = now.with_timezone(&self.tz);
        let mut date = localized_now.date_naive();
        if localized_now.time() > self.target {
            date = advance_day(date);
        }

        let local_target = date.and_time(self.target);
        self.tz
            .from_local_datetime(&local_target)
            .earliest()
            .map_or(now, |dt| dt.with_timezone(&Utc))
    }
}

fn advance_day(date: NaiveDate) -> NaiveDate {
    date.succ_opt().unwrap_or(date)
}
