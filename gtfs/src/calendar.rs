use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceID(String);

impl ServiceID {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ServiceID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Calendar {
    pub services: BTreeMap<ServiceID, Service>,
    /// Per date, in the order the rows appeared in calendar_dates.txt
    pub exceptions: BTreeMap<NaiveDate, Vec<Exception>>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Service {
    pub service_id: ServiceID,
    pub days_of_week: DaysOfWeek,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Exception {
    pub service_id: ServiceID,
    pub exception_type: ExceptionType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExceptionType {
    Added,
    Removed,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct DaysOfWeek {
    pub monday: bool,
    pub tuesday: bool,
    pub wednesday: bool,
    pub thursday: bool,
    pub friday: bool,
    pub saturday: bool,
    pub sunday: bool,
}

impl Calendar {
    /// Weekly rules in their validity range first, then every exception row for exactly this date
    /// is applied in order.
    pub fn active_services(&self, date: NaiveDate) -> BTreeSet<ServiceID> {
        let mut result: BTreeSet<ServiceID> = self
            .services
            .values()
            .filter(|service| service.runs_weekly_on(date))
            .map(|service| service.service_id.clone())
            .collect();

        for exception in self.exceptions.get(&date).into_iter().flatten() {
            match exception.exception_type {
                ExceptionType::Added => {
                    result.insert(exception.service_id.clone());
                }
                ExceptionType::Removed => {
                    result.remove(&exception.service_id);
                }
            }
        }
        result
    }

    pub fn num_exceptions(&self) -> usize {
        self.exceptions.values().map(|list| list.len()).sum()
    }
}

impl Service {
    /// Ignores exceptions
    pub fn runs_weekly_on(&self, day: NaiveDate) -> bool {
        if day < self.start_date || day > self.end_date {
            return false;
        }
        self.days_of_week.includes(&day)
    }
}

impl DaysOfWeek {
    pub fn describe(&self) -> String {
        let weekdays = [
            self.monday,
            self.tuesday,
            self.wednesday,
            self.thursday,
            self.friday,
        ]
        .into_iter()
        .filter(|x| *x)
        .count();
        let weekends = [self.saturday, self.sunday]
            .into_iter()
            .filter(|x| *x)
            .count();
        if weekdays + weekends == 7 {
            return "every day".to_string();
        }
        if weekdays == 5 && weekends == 0 {
            return "weekdays".to_string();
        }
        if weekdays == 0 && weekends == 2 {
            return "weekends".to_string();
        }
        if weekdays == 0 && weekends == 0 {
            return "only by exception".to_string();
        }
        let mut result = String::new();
        for (day, operates) in [
            ("M", self.monday),
            ("T", self.tuesday),
            ("W", self.wednesday),
            ("Th", self.thursday),
            ("F", self.friday),
            ("Sat", self.saturday),
            ("Sun", self.sunday),
        ] {
            if operates {
                result.push_str(day);
            }
        }
        result
    }

    pub fn includes(&self, day: &NaiveDate) -> bool {
        match day.weekday() {
            Weekday::Mon => self.monday,
            Weekday::Tue => self.tuesday,
            Weekday::Wed => self.wednesday,
            Weekday::Thu => self.thursday,
            Weekday::Fri => self.friday,
            Weekday::Sat => self.saturday,
            Weekday::Sun => self.sunday,
        }
    }
}

/// Reads calendar.txt
pub fn load<R: std::io::Read>(reader: R) -> Result<Calendar> {
    let mut calendar = Calendar::default();
    for rec in csv::Reader::from_reader(reader).deserialize() {
        let rec: Record = rec?;
        if calendar.services.contains_key(&rec.service_id) {
            bail!("Duplicate {:?}", rec.service_id);
        }
        let start_date = parse_date(&rec.start_date)?;
        let end_date = parse_date(&rec.end_date)?;
        if end_date < start_date {
            warn!(
                "{:?} ends ({end_date}) before it starts ({start_date}), it'll never run weekly",
                rec.service_id
            );
        }
        calendar.services.insert(
            rec.service_id.clone(),
            Service {
                service_id: rec.service_id,
                days_of_week: DaysOfWeek {
                    monday: rec.monday,
                    tuesday: rec.tuesday,
                    wednesday: rec.wednesday,
                    thursday: rec.thursday,
                    friday: rec.friday,
                    saturday: rec.saturday,
                    sunday: rec.sunday,
                },
                start_date,
                end_date,
            },
        );
    }
    Ok(calendar)
}

/// Reads calendar_dates.txt
pub fn load_exceptions<R: std::io::Read>(calendar: &mut Calendar, reader: R) -> Result<()> {
    for rec in csv::Reader::from_reader(reader).deserialize() {
        let rec: DateRecord = rec?;
        if !calendar.services.contains_key(&rec.service_id) {
            // Services defined only through calendar_dates.txt are legal
            debug!("Exception for {:?} without a weekly rule", rec.service_id);
        }
        let date = parse_date(&rec.date)?;
        let exception_type = match rec.exception_type {
            1 => ExceptionType::Added,
            2 => ExceptionType::Removed,
            x => bail!("Unknown exception_type {x}"),
        };
        calendar.exceptions.entry(date).or_default().push(Exception {
            service_id: rec.service_id,
            exception_type,
        });
    }
    Ok(())
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y%m%d").map_err(|err| anyhow!("date {raw:?}: {err}"))
}

#[derive(Deserialize)]
struct Record {
    service_id: ServiceID,
    #[serde(deserialize_with = "parse_bool")]
    monday: bool,
    #[serde(deserialize_with = "parse_bool")]
    tuesday: bool,
    #[serde(deserialize_with = "parse_bool")]
    wednesday: bool,
    #[serde(deserialize_with = "parse_bool")]
    thursday: bool,
    #[serde(deserialize_with = "parse_bool")]
    friday: bool,
    #[serde(deserialize_with = "parse_bool")]
    saturday: bool,
    #[serde(deserialize_with = "parse_bool")]
    sunday: bool,
    start_date: String,
    end_date: String,
}

fn parse_bool<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    let n = <u8>::deserialize(d)?;
    if n == 1 {
        return Ok(true);
    }
    if n == 0 {
        return Ok(false);
    }
    Err(serde::de::Error::custom(format!("Unknown bool value {n}")))
}

#[derive(Deserialize)]
struct DateRecord {
    service_id: ServiceID,
    date: String,
    exception_type: u8,
}
