use anyhow::Result;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Seconds since the start of a service day. GTFS allows values past 24:00:00 for trips that run
/// after midnight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeOfDay(u32);

// Service days spilling into a third calendar day are garbage
const MAX_HOURS: u32 = 48;

impl TimeOfDay {
    pub fn from_hms(hours: u32, minutes: u32, seconds: u32) -> Self {
        Self(hours * 3600 + minutes * 60 + seconds)
    }

    /// Accepts "HH:MM:SS" and "HH:MM"; hours may have one digit.
    pub fn parse(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.trim().split(':').collect();
        if parts.len() != 2 && parts.len() != 3 {
            bail!("Bad time {raw:?}");
        }
        let mut values = [0; 3];
        for (idx, part) in parts.iter().enumerate() {
            values[idx] = part
                .parse::<u32>()
                .map_err(|err| anyhow!("Bad time {raw:?}: {err}"))?;
        }
        let [hours, minutes, seconds] = values;
        if hours >= MAX_HOURS || minutes >= 60 || seconds >= 60 {
            bail!("Bad time {raw:?}");
        }
        Ok(Self::from_hms(hours, minutes, seconds))
    }

    /// Anchors this time to a service day.
    pub fn on(self, service_date: NaiveDate) -> NaiveDateTime {
        service_date.and_hms_opt(0, 0, 0).unwrap_or_default() + Duration::seconds(self.0 as i64)
    }
}

impl std::fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}",
            self.0 / 3600,
            (self.0 % 3600) / 60,
            self.0 % 60
        )
    }
}
