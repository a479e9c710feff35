use std::collections::{BTreeSet, HashSet};

use anyhow::Result;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use serde::Serialize;

use gtfs::{
    Prediction, RealtimeFeed, ScheduledArrival, ServiceID, StaticSchedule, TripID, UNKNOWN,
};

/// How far around "now" arrivals stay on the board. Both ends are inclusive.
#[derive(Clone, Copy, Debug)]
pub struct Window {
    pub before: Duration,
    pub after: Duration,
}

impl Default for Window {
    fn default() -> Self {
        Self {
            before: Duration::minutes(30),
            after: Duration::minutes(60),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Dedupe {
    /// One row per trip, even if it calls at the stop twice
    Trip,
    /// One row per trip and scheduled visit
    #[default]
    TripVisit,
}

impl std::str::FromStr for Dedupe {
    type Err = anyhow::Error;

    fn from_str(x: &str) -> Result<Self> {
        match x {
            "trip" => Ok(Dedupe::Trip),
            "visit" => Ok(Dedupe::TripVisit),
            _ => bail!("Unknown dedupe mode {x}, use trip or visit"),
        }
    }
}

/// Everything the merge needs that's shared across stops during one render. Active services are
/// resolved once here, not per stop.
pub struct BoardContext<'a> {
    /// Local wall-clock time
    pub now: NaiveDateTime,
    pub service_date: NaiveDate,
    pub tz: Tz,
    pub window: Window,
    pub dedupe: Dedupe,
    services: Option<ActiveServices<'a>>,
    realtime: Option<&'a RealtimeFeed>,
}

struct ActiveServices<'a> {
    active: BTreeSet<ServiceID>,
    schedule: &'a StaticSchedule,
}

impl<'a> BoardContext<'a> {
    /// Without calendar data or realtime. Not having a calendar means every trip is assumed to run.
    pub fn new(now: NaiveDateTime, tz: Tz) -> Self {
        Self {
            now,
            service_date: now.date(),
            tz,
            window: Window::default(),
            dedupe: Dedupe::default(),
            services: None,
            realtime: None,
        }
    }

    pub fn with_schedule(mut self, schedule: &'a StaticSchedule) -> Self {
        let active = schedule.calendar.active_services(self.service_date);
        info!(
            "{} services active on {}",
            active.len(),
            self.service_date
        );
        self.services = Some(ActiveServices { active, schedule });
        self
    }

    pub fn with_realtime(mut self, feed: &'a RealtimeFeed) -> Self {
        self.realtime = Some(feed);
        self
    }

    pub fn with_window(mut self, window: Window) -> Self {
        self.window = window;
        self
    }

    pub fn with_dedupe(mut self, dedupe: Dedupe) -> Self {
        self.dedupe = dedupe;
        self
    }

    /// None when the service-day filter is off
    pub fn active_services(&self) -> Option<&BTreeSet<ServiceID>> {
        self.services.as_ref().map(|s| &s.active)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DisplayRow {
    pub trip_id: TripID,
    pub route: String,
    pub headsign: String,
    pub scheduled: NaiveDateTime,
    /// Only set when the realtime feed had a prediction for this visit
    pub realtime: Option<NaiveDateTime>,
    pub vehicle_id: Option<String>,
}

impl DisplayRow {
    pub fn effective(&self) -> NaiveDateTime {
        self.realtime.unwrap_or(self.scheduled)
    }
}

/// Turns one stop's scheduled arrivals into board rows: drop trips not running today, attach
/// realtime, keep what's inside the window, sort by the time people will see, then dedupe.
///
/// Scheduled times are anchored to the calendar date of `now`. Just after midnight, the previous
/// service day's late trips aren't shown.
pub fn merge_arrivals(arrivals: &[ScheduledArrival], ctx: &BoardContext) -> Vec<DisplayRow> {
    let earliest = ctx.now - ctx.window.before;
    let latest = ctx.now + ctx.window.after;

    let mut rows = Vec::new();
    for arrival in arrivals {
        let trip = match &ctx.services {
            Some(services) => match services.schedule.trips.get(&arrival.trip_id) {
                Some(trip) if services.active.contains(&trip.service_id) => Some(trip),
                Some(_) => continue,
                None => {
                    debug!("{} isn't in trips.txt, dropping it", arrival.trip_id);
                    continue;
                }
            },
            None => None,
        };

        let scheduled = arrival.arrival_time.on(ctx.service_date);
        let update = ctx
            .realtime
            .and_then(|feed| feed.lookup(&arrival.trip_id, &arrival.stop_id));
        let realtime = update.and_then(|u| predicted(u.prediction, scheduled, ctx.tz));

        let effective = realtime.unwrap_or(scheduled);
        if effective < earliest || effective > latest {
            continue;
        }

        rows.push(DisplayRow {
            trip_id: arrival.trip_id.clone(),
            route: arrival
                .route
                .clone()
                .or_else(|| trip.map(|t| t.route_id.to_string()))
                .unwrap_or_else(|| UNKNOWN.to_string()),
            headsign: arrival
                .headsign
                .clone()
                .or_else(|| trip.and_then(|t| t.headsign.clone()))
                .unwrap_or_else(|| UNKNOWN.to_string()),
            scheduled,
            realtime,
            vehicle_id: update.and_then(|u| u.vehicle_id.clone()),
        });
    }

    // Sorted first, so per-trip dedupe keeps the soonest visit
    rows.sort_by_key(|row| (row.effective(), row.scheduled));
    let mut seen = HashSet::new();
    rows.retain(|row| {
        let visit = match ctx.dedupe {
            Dedupe::Trip => None,
            Dedupe::TripVisit => Some(row.scheduled),
        };
        seen.insert((row.trip_id.clone(), visit))
    });
    rows
}

fn predicted(prediction: Prediction, scheduled: NaiveDateTime, tz: Tz) -> Option<NaiveDateTime> {
    match prediction {
        Prediction::Delay(secs) => {
            let at = Duration::try_seconds(secs)
                .and_then(|delay| scheduled.checked_add_signed(delay));
            if at.is_none() {
                warn!("Ignoring a delay of {secs}s from {scheduled}");
            }
            at
        }
        Prediction::Arrival(at) => Some(at.with_timezone(&tz).naive_local()),
    }
}
