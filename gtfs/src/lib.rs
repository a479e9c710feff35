#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

mod calendar;
mod gzip;
mod ids;
mod realtime;
mod schedule;
mod stops;
mod time;
mod trips;

use std::collections::BTreeMap;
use std::io::Cursor;

use anyhow::Result;
use zip::ZipArchive;

pub use calendar::{Calendar, DaysOfWeek, Exception, ExceptionType, Service, ServiceID};
pub use gzip::maybe_decompress;
pub use ids::{RouteID, StopID, TripID};
pub use realtime::{Prediction, RealtimeFeed, RealtimeUpdate};
pub use schedule::ScheduledArrival;
pub use stops::{LonLat, Stop, StopProperties, UNKNOWN};
pub use time::TimeOfDay;
pub use trips::Trip;

/// The parts of a static GTFS feed needed to decide which trips run on a date.
#[derive(Clone, Default)]
pub struct StaticSchedule {
    pub calendar: Calendar,
    pub trips: BTreeMap<TripID, Trip>,
}

impl StaticSchedule {
    /// Each input may be gzipped. calendar_dates.txt is optional, and so is calendar.txt for feeds
    /// that define every service through exceptions.
    pub fn load(
        calendar: Option<Vec<u8>>,
        calendar_dates: Option<Vec<u8>>,
        trips: Vec<u8>,
    ) -> Result<Self> {
        if calendar.is_none() && calendar_dates.is_none() {
            bail!("Need calendar.txt or calendar_dates.txt");
        }
        let mut result = Self::default();
        if let Some(bytes) = calendar {
            result.calendar = calendar::load(maybe_decompress(bytes)?.as_slice())
                .map_err(|err| anyhow!("calendar.txt: {err}"))?;
        }
        if let Some(bytes) = calendar_dates {
            calendar::load_exceptions(&mut result.calendar, maybe_decompress(bytes)?.as_slice())
                .map_err(|err| anyhow!("calendar_dates.txt: {err}"))?;
        }
        result.trips = trips::load(maybe_decompress(trips)?.as_slice())
            .map_err(|err| anyhow!("trips.txt: {err}"))?;
        result.log_summary();
        Ok(result)
    }

    pub fn load_from_zip(bytes: Vec<u8>) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let mut result = Self::default();

        let has_calendar = archive.file_names().any(|name| name == "calendar.txt");
        let has_dates = archive.file_names().any(|name| name == "calendar_dates.txt");
        if !has_calendar && !has_dates {
            bail!("GTFS zip has neither calendar.txt nor calendar_dates.txt");
        }
        if has_calendar {
            result.calendar = calendar::load(get_zip_file(&mut archive, "calendar.txt")?)?;
        }
        if has_dates {
            calendar::load_exceptions(
                &mut result.calendar,
                get_zip_file(&mut archive, "calendar_dates.txt")?,
            )?;
        }
        result.trips = trips::load(get_zip_file(&mut archive, "trips.txt")?)?;
        result.log_summary();
        Ok(result)
    }

    fn log_summary(&self) {
        info!(
            "Loaded {} services, {} calendar exceptions, {} trips",
            self.calendar.services.len(),
            self.calendar.num_exceptions(),
            self.trips.len()
        );
    }
}

/// Parses the stop geography, compressed or not.
pub fn load_stops(bytes: Vec<u8>, keys: &StopProperties) -> Result<Vec<Stop>> {
    let stops = stops::load(&maybe_decompress(bytes)?, keys)?;
    info!("Loaded {} stops", stops.len());
    Ok(stops)
}

/// Parses one stop's scheduled arrivals, compressed or not.
pub fn load_scheduled_arrivals(stop: &StopID, bytes: Vec<u8>) -> Result<Vec<ScheduledArrival>> {
    schedule::load(stop, &maybe_decompress(bytes)?)
}

pub fn load_realtime(bytes: Vec<u8>) -> Result<RealtimeFeed> {
    let feed = RealtimeFeed::parse(&maybe_decompress(bytes)?)?;
    debug!("Realtime feed covers {} trips", feed.num_trips());
    Ok(feed)
}

// Adds the path in the error message
pub fn get_zip_file<'a, R: std::io::Read + std::io::Seek>(
    archive: &'a mut ZipArchive<R>,
    path: &str,
) -> Result<zip::read::ZipFile<'a>> {
    archive
        .by_name(path)
        .map_err(|err| anyhow!("{path}: {err}"))
}
