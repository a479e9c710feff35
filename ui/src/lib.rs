#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

mod fetch;
mod locate;
mod render;
mod sources;

use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use structopt::StructOpt;

use gtfs::{LonLat, StopProperties};
use model::{BoardConfig, Dedupe, Window};

use self::fetch::Fetcher;
use self::locate::Locator;
use self::sources::{HttpSources, RealtimeSource, ScheduleTemplate, StaticScheduleSource};

#[derive(StructOpt)]
#[structopt(
    name = "nearby-buses",
    about = "Upcoming buses at the stops closest to you"
)]
enum Command {
    /// Show arrivals at the nearest stops. This is the default.
    Board(BoardArgs),
    /// List the services running on a date
    Services(ServicesArgs),
}

#[derive(StructOpt)]
struct BoardArgs {
    /// URL or path to a GeoJSON FeatureCollection of stops, optionally gzipped
    #[structopt(long)]
    stops: String,
    #[structopt(long, default_value = "AtcoCode")]
    stop_code_key: String,
    #[structopt(long, default_value = "CommonName")]
    stop_name_key: String,
    #[structopt(long, default_value = "Latitude")]
    lat_key: String,
    #[structopt(long, default_value = "Longitude")]
    lon_key: String,
    /// URL or path to one stop's scheduled arrivals, with {stop} replaced by the stop code
    #[structopt(long)]
    schedule: String,
    #[structopt(flatten)]
    static_schedule: StaticScheduleArgs,
    /// URL or path to the realtime arrivals feed
    #[structopt(long)]
    realtime: Option<String>,
    #[structopt(long, allow_hyphen_values = true)]
    lat: Option<f64>,
    #[structopt(long, allow_hyphen_values = true)]
    lon: Option<f64>,
    /// A service answering with the user's latitude and longitude, used instead of --lat/--lon
    #[structopt(long)]
    locate: Option<String>,
    /// How many stops to show
    #[structopt(long, default_value = "5")]
    limit: usize,
    /// How many stops' schedules to fetch at once
    #[structopt(long, default_value = "4")]
    concurrency: usize,
    #[structopt(long, default_value = "Europe/London")]
    timezone: Tz,
    /// Pretend it's this local time, like 2024-07-04T12:00
    #[structopt(long, parse(try_from_str = parse_now))]
    now: Option<NaiveDateTime>,
    /// Collapse repeated rows per "trip" or per "visit" (trip and scheduled time)
    #[structopt(long, default_value = "visit")]
    dedupe: Dedupe,
    /// Seconds before giving up on any one request
    #[structopt(long, default_value = "10")]
    timeout: u64,
    /// Extra attempts for the realtime feed
    #[structopt(long, default_value = "3")]
    realtime_retries: usize,
    /// "text" or "json"
    #[structopt(long, default_value = "text")]
    format: Format,
    /// Redraw every this many seconds
    #[structopt(long)]
    watch: Option<u64>,
}

#[derive(StructOpt)]
struct StaticScheduleArgs {
    /// URL or path to calendar.txt, optionally gzipped
    #[structopt(long)]
    calendar: Option<String>,
    /// URL or path to calendar_dates.txt, optionally gzipped
    #[structopt(long)]
    calendar_dates: Option<String>,
    /// URL or path to trips.txt, optionally gzipped
    #[structopt(long)]
    trips: Option<String>,
    /// URL or path to a GTFS zip, used instead of the individual files
    #[structopt(long)]
    gtfs_zip: Option<String>,
}

#[derive(StructOpt)]
struct ServicesArgs {
    #[structopt(flatten)]
    static_schedule: StaticScheduleArgs,
    /// Defaults to today
    #[structopt(long)]
    date: Option<NaiveDate>,
    #[structopt(long, default_value = "Europe/London")]
    timezone: Tz,
    #[structopt(long, default_value = "10")]
    timeout: u64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Format {
    Text,
    Json,
}

impl FromStr for Format {
    type Err = anyhow::Error;

    fn from_str(x: &str) -> Result<Self> {
        match x {
            "text" => Ok(Format::Text),
            "json" => Ok(Format::Json),
            _ => bail!("Unknown format {x}, use text or json"),
        }
    }
}

fn parse_now(x: &str) -> Result<NaiveDateTime> {
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(x, fmt) {
            return Ok(t);
        }
    }
    bail!("Can't parse time {x}, use something like 2024-07-04T12:00")
}

impl StaticScheduleArgs {
    fn source(&self) -> Result<StaticScheduleSource> {
        if let Some(ref zip) = self.gtfs_zip {
            if self.calendar.is_some() || self.calendar_dates.is_some() || self.trips.is_some() {
                bail!("--gtfs-zip can't be combined with --calendar, --calendar-dates, or --trips");
            }
            return Ok(StaticScheduleSource::Zip(zip.clone()));
        }
        match (&self.calendar, &self.calendar_dates, &self.trips) {
            (None, None, None) => Ok(StaticScheduleSource::None),
            (None, None, Some(_)) => bail!("--trips needs --calendar or --calendar-dates"),
            (_, _, None) => bail!("--calendar and --calendar-dates need --trips"),
            (calendar, calendar_dates, Some(trips)) => Ok(StaticScheduleSource::Files {
                calendar: calendar.clone(),
                calendar_dates: calendar_dates.clone(),
                trips: trips.clone(),
            }),
        }
    }
}

impl BoardArgs {
    fn load(self) -> Result<(HttpSources, BoardConfig)> {
        let locator = match (self.lat, self.lon, self.locate) {
            (Some(lat), Some(lon), None) => Locator::Fixed(LonLat::new(lon, lat)),
            (None, None, Some(url)) => Locator::Service(url),
            (None, None, None) => bail!("Pass --lat and --lon, or --locate"),
            (_, _, Some(_)) => bail!("--locate can't be combined with --lat or --lon"),
            _ => bail!("--lat and --lon go together"),
        };
        if self.limit == 0 {
            bail!("--limit must be at least 1");
        }

        let sources = HttpSources {
            fetcher: Fetcher::new(Duration::from_secs(self.timeout))?,
            stops: self.stops,
            stop_keys: StopProperties {
                code: self.stop_code_key,
                name: self.stop_name_key,
                latitude: self.lat_key,
                longitude: self.lon_key,
            },
            schedule: ScheduleTemplate::new(self.schedule)?,
            static_schedule: self.static_schedule.source()?,
            realtime: self.realtime.map(|location| RealtimeSource {
                location,
                attempts: self.realtime_retries + 1,
                first_backoff: Duration::from_millis(500),
            }),
            locator,
        };
        let config = BoardConfig {
            limit: self.limit,
            concurrency: self.concurrency.max(1),
            tz: self.timezone,
            window: Window::default(),
            dedupe: self.dedupe,
        };
        Ok((sources, config))
    }
}

/// `board` is implied when the first argument isn't a subcommand.
fn with_default_subcommand(mut args: Vec<String>) -> Vec<String> {
    let explicit = matches!(
        args.get(1).map(String::as_str),
        Some("board" | "services" | "help" | "-h" | "--help" | "-V" | "--version")
    );
    if !explicit {
        args.insert(1.min(args.len()), "board".to_string());
    }
    args
}

fn local_now(tz: Tz) -> NaiveDateTime {
    Utc::now().with_timezone(&tz).naive_local()
}

/// Parses the command line and runs it to completion.
pub fn run() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cmd = Command::from_iter(with_default_subcommand(std::env::args().collect()));
    let runtime = tokio::runtime::Runtime::new()?;
    match cmd {
        Command::Board(args) => runtime.block_on(board(args)),
        Command::Services(args) => runtime.block_on(services(args)),
    }
}

async fn board(args: BoardArgs) -> Result<ExitCode> {
    let format = args.format;
    let fixed_now = args.now;
    let watch = args.watch.map(Duration::from_secs);
    let (sources, config) = args.load()?;

    let Some(interval) = watch else {
        let now = fixed_now.unwrap_or_else(|| local_now(config.tz));
        let ok = render_pass(&sources, &config, now, format).await?;
        return Ok(if ok {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    };

    loop {
        let now = fixed_now.unwrap_or_else(|| local_now(config.tz));
        // A failed pass is shown and retried on the next tick
        render_pass(&sources, &config, now, format).await?;
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping");
                return Ok(ExitCode::SUCCESS);
            }
        }
    }
}

/// Prints one board. Returns false if there was nothing to show.
async fn render_pass(
    sources: &HttpSources,
    config: &BoardConfig,
    now: NaiveDateTime,
    format: Format,
) -> Result<bool> {
    match model::build_board(sources, config, now).await {
        Ok(board) => {
            match format {
                Format::Text => print!("{}", render::text(&board)),
                Format::Json => println!("{}", render::json(&board)?),
            }
            Ok(true)
        }
        Err(err) => {
            error!("{err}");
            match format {
                Format::Text => print!("{}", render::error_text(&err)),
                Format::Json => println!("{}", render::error_json(&err)?),
            }
            Ok(false)
        }
    }
}

async fn services(args: ServicesArgs) -> Result<ExitCode> {
    let source = args.static_schedule.source()?;
    if let StaticScheduleSource::None = source {
        bail!("Pass --gtfs-zip, or --trips with --calendar and/or --calendar-dates");
    }
    let fetcher = Fetcher::new(Duration::from_secs(args.timeout))?;
    let Some(schedule) = source.load(&fetcher).await? else {
        bail!("No calendar data loaded");
    };
    let date = args
        .date
        .unwrap_or_else(|| local_now(args.timezone).date());
    print!("{}", render::services(&schedule, date));
    Ok(ExitCode::SUCCESS)
}
