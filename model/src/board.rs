use anyhow::Result;
use chrono::NaiveDateTime;
use chrono_tz::Tz;
use futures::stream::{self, StreamExt};
use serde::Serialize;

use gtfs::{LonLat, RealtimeFeed, ScheduledArrival, StaticSchedule, Stop, StopID};

use crate::{merge_arrivals, rank_stops, BoardContext, Dedupe, DisplayRow, NearbyStop, Window};

/// Where one render pass gets its inputs from. Implementations decide about HTTP, files, retries,
/// and timeouts; the pipeline only sees results.
#[allow(async_fn_in_trait)]
pub trait Sources {
    /// The stop geography
    async fn stops(&self) -> Result<Vec<Stop>>;
    /// Where the user is
    async fn locate(&self) -> Result<LonLat>;
    /// Calendar and trips. Ok(None) means no calendar data is configured, which turns off the
    /// service-day filter.
    async fn static_schedule(&self) -> Result<Option<StaticSchedule>>;
    /// Ok(None) if there's no realtime feed configured
    async fn realtime(&self) -> Result<Option<RealtimeFeed>>;
    async fn arrivals(&self, stop: &StopID) -> Result<Vec<ScheduledArrival>>;
}

#[derive(Clone, Debug)]
pub struct BoardConfig {
    pub limit: usize,
    /// Most per-stop fetches in flight at once
    pub concurrency: usize,
    pub tz: Tz,
    pub window: Window,
    pub dedupe: Dedupe,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            limit: 5,
            concurrency: 4,
            tz: chrono_tz::Europe::London,
            window: Window::default(),
            dedupe: Dedupe::default(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Board {
    pub location: LonLat,
    pub now: NaiveDateTime,
    pub stops: Vec<StopBoard>,
    pub failures: Vec<StopFailure>,
    /// Degraded but non-fatal conditions, like a missing realtime feed
    pub notices: Vec<String>,
    /// When the realtime feed says it was generated, in local time
    pub realtime_as_of: Option<NaiveDateTime>,
}

#[derive(Debug, Serialize)]
pub struct StopBoard {
    pub nearby: NearbyStop,
    /// None if this stop's schedule couldn't be fetched
    pub arrivals: Option<Vec<DisplayRow>>,
}

#[derive(Debug, Serialize)]
pub struct StopFailure {
    pub stop_id: StopID,
    pub error: String,
}

/// The failures that leave nothing to show
#[derive(Debug)]
pub enum BoardError {
    Geography(anyhow::Error),
    Geolocation(anyhow::Error),
}

impl std::fmt::Display for BoardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoardError::Geography(err) => write!(f, "Couldn't load bus stops: {err:#}"),
            BoardError::Geolocation(err) => write!(f, "Couldn't find your location: {err:#}"),
        }
    }
}

impl std::error::Error for BoardError {}

/// One render pass. `now` is local wall-clock time in `config.tz`.
pub async fn build_board<S: Sources>(
    sources: &S,
    config: &BoardConfig,
    now: NaiveDateTime,
) -> Result<Board, BoardError> {
    // Without stops there's nothing to locate the user against
    let stops = sources.stops().await.map_err(BoardError::Geography)?;
    let location = sources.locate().await.map_err(BoardError::Geolocation)?;

    let mut notices = Vec::new();
    let schedule = match sources.static_schedule().await {
        Ok(Some(schedule)) => Some(schedule),
        Ok(None) => {
            info!("No calendar data configured, showing every scheduled trip");
            None
        }
        Err(err) => {
            warn!("Calendar data unavailable: {err:#}");
            notices.push(format!(
                "Timetable calendar unavailable, trips may not run today: {err:#}"
            ));
            None
        }
    };
    let realtime = match sources.realtime().await {
        Ok(feed) => feed,
        Err(err) => {
            warn!("Realtime feed unavailable: {err:#}");
            notices.push(format!("Real-time data unavailable: {err:#}"));
            None
        }
    };

    let mut ctx = BoardContext::new(now, config.tz)
        .with_window(config.window)
        .with_dedupe(config.dedupe);
    if let Some(ref schedule) = schedule {
        ctx = ctx.with_schedule(schedule);
    }
    if let Some(ref feed) = realtime {
        ctx = ctx.with_realtime(feed);
    }

    let nearby = rank_stops(location, &stops, config.limit);
    info!("{} nearby stops out of {}", nearby.len(), stops.len());

    let fetched: Vec<(NearbyStop, Result<Vec<ScheduledArrival>>)> = stream::iter(nearby)
        .map(|nearby| async move {
            let result = sources.arrivals(&nearby.stop.stop_id).await;
            (nearby, result)
        })
        .buffered(config.concurrency.max(1))
        .collect()
        .await;

    let mut board = Board {
        location,
        now,
        stops: Vec::new(),
        failures: Vec::new(),
        notices,
        realtime_as_of: realtime
            .as_ref()
            .and_then(|feed| feed.timestamp)
            .map(|t| t.with_timezone(&config.tz).naive_local()),
    };
    for (nearby, result) in fetched {
        let arrivals = match result {
            Ok(arrivals) => Some(merge_arrivals(&arrivals, &ctx)),
            Err(err) => {
                warn!("No arrivals for {}: {err:#}", nearby.stop.stop_id);
                board.failures.push(StopFailure {
                    stop_id: nearby.stop.stop_id.clone(),
                    error: format!("{err:#}"),
                });
                None
            }
        };
        board.stops.push(StopBoard { nearby, arrivals });
    }
    Ok(board)
}
