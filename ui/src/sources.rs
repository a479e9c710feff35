use std::time::Duration;

use anyhow::Result;

use gtfs::{
    LonLat, RealtimeFeed, ScheduledArrival, StaticSchedule, Stop, StopID, StopProperties,
};
use model::Sources;

use crate::fetch::{is_remote, Fetcher};
use crate::locate::Locator;

const STOP_PLACEHOLDER: &str = "{stop}";

/// Where calendar and trip data comes from
pub enum StaticScheduleSource {
    /// No service-day filtering
    None,
    Zip(String),
    Files {
        calendar: Option<String>,
        calendar_dates: Option<String>,
        trips: String,
    },
}

impl StaticScheduleSource {
    pub async fn load(&self, fetcher: &Fetcher) -> Result<Option<StaticSchedule>> {
        match self {
            StaticScheduleSource::None => Ok(None),
            StaticScheduleSource::Zip(location) => {
                let bytes = fetcher.get(location).await?;
                Ok(Some(StaticSchedule::load_from_zip(bytes)?))
            }
            StaticScheduleSource::Files {
                calendar,
                calendar_dates,
                trips,
            } => {
                let calendar = match calendar {
                    Some(location) => Some(fetcher.get(location).await?),
                    None => None,
                };
                let calendar_dates = match calendar_dates {
                    Some(location) => Some(fetcher.get(location).await?),
                    None => None,
                };
                let trips = fetcher.get(trips).await?;
                Ok(Some(StaticSchedule::load(calendar, calendar_dates, trips)?))
            }
        }
    }
}

/// A URL or path with `{stop}` standing in for the stop code
pub struct ScheduleTemplate(String);

impl ScheduleTemplate {
    pub fn new(template: String) -> Result<Self> {
        if !template.contains(STOP_PLACEHOLDER) {
            bail!("Schedule location {template} must contain {STOP_PLACEHOLDER}");
        }
        Ok(Self(template))
    }

    /// Stop codes are percent-encoded into URLs, but used as-is in local paths.
    pub fn for_stop(&self, stop: &StopID) -> String {
        if is_remote(&self.0) {
            self.0
                .replace(STOP_PLACEHOLDER, &urlencoding::encode(stop.as_str()))
        } else {
            self.0.replace(STOP_PLACEHOLDER, stop.as_str())
        }
    }
}

pub struct RealtimeSource {
    pub location: String,
    pub attempts: usize,
    pub first_backoff: Duration,
}

/// Fetches every input over HTTP or from local files.
pub struct HttpSources {
    pub fetcher: Fetcher,
    pub stops: String,
    pub stop_keys: StopProperties,
    pub schedule: ScheduleTemplate,
    pub static_schedule: StaticScheduleSource,
    pub realtime: Option<RealtimeSource>,
    pub locator: Locator,
}

impl Sources for HttpSources {
    async fn stops(&self) -> Result<Vec<Stop>> {
        let bytes = self.fetcher.get(&self.stops).await?;
        gtfs::load_stops(bytes, &self.stop_keys)
    }

    async fn locate(&self) -> Result<LonLat> {
        self.locator.locate(&self.fetcher).await
    }

    async fn static_schedule(&self) -> Result<Option<StaticSchedule>> {
        self.static_schedule.load(&self.fetcher).await
    }

    async fn realtime(&self) -> Result<Option<RealtimeFeed>> {
        let Some(ref source) = self.realtime else {
            return Ok(None);
        };
        let bytes = self
            .fetcher
            .get_with_retry(&source.location, source.attempts, source.first_backoff)
            .await?;
        Ok(Some(gtfs::load_realtime(bytes)?))
    }

    async fn arrivals(&self, stop: &StopID) -> Result<Vec<ScheduledArrival>> {
        let location = self.schedule.for_stop(stop);
        debug!("Fetching arrivals for {stop} from {location}");
        let bytes = self.fetcher.get(&location).await?;
        gtfs::load_scheduled_arrivals(stop, bytes)
    }
}
