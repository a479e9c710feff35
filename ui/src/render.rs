use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime};

use gtfs::{ExceptionType, LonLat, StaticSchedule};
use model::{Board, BoardError, DisplayRow, StopBoard};

const NO_DATA: &str = "No data available";
const NO_ARRIVALS: &str = "No arrivals in the next hour";

pub fn map_link(pos: LonLat) -> String {
    format!(
        "https://www.openstreetmap.org/?mlat={lat:.5}&mlon={lon:.5}#map=18/{lat:.5}/{lon:.5}",
        lat = pos.latitude,
        lon = pos.longitude
    )
}

pub fn distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{} m", meters.round())
    } else {
        format!("{:.1} km", meters / 1000.0)
    }
}

pub fn text(board: &Board) -> String {
    let mut out = format!(
        "Nearest stops to {:.5}, {:.5} at {}\n",
        board.location.latitude,
        board.location.longitude,
        board.now.format("%H:%M")
    );
    if let Some(as_of) = board.realtime_as_of {
        out.push_str(&format!("Real-time data as of {}\n", hhmm(as_of)));
    }
    if board.stops.is_empty() {
        out.push_str("\nNo stops nearby\n");
    }
    for stop in &board.stops {
        out.push('\n');
        out.push_str(&stop_text(stop));
    }
    if !board.notices.is_empty() {
        out.push('\n');
        for notice in &board.notices {
            out.push_str(&format!("! {notice}\n"));
        }
    }
    out
}

fn stop_text(stop: &StopBoard) -> String {
    let nearby = &stop.nearby;
    let mut out = format!("{} ({})\n", nearby.stop.name, nearby.stop.stop_id);
    out.push_str(&format!(
        "  {} {}  {}\n",
        distance(nearby.distance_m),
        nearby.compass,
        map_link(nearby.pos)
    ));
    match &stop.arrivals {
        None => out.push_str(&format!("  {NO_DATA}\n")),
        Some(rows) if rows.is_empty() => out.push_str(&format!("  {NO_ARRIVALS}\n")),
        Some(rows) => {
            for row in rows {
                out.push_str(&row_text(row));
            }
        }
    }
    out
}

fn row_text(row: &DisplayRow) -> String {
    let mut line = format!(
        "  {:<6} {:<24} {}",
        row.route,
        row.headsign,
        hhmm(row.scheduled)
    );
    if let Some(realtime) = row.realtime {
        line.push_str(&format!("  Real-time {}", hhmm(realtime)));
    }
    line.push('\n');
    line
}

fn hhmm(t: NaiveDateTime) -> String {
    t.format("%H:%M").to_string()
}

pub fn json(board: &Board) -> Result<String> {
    Ok(serde_json::to_string_pretty(board)?)
}

/// What to show when there's nothing to render
pub fn error_text(err: &BoardError) -> String {
    let hint = match err {
        BoardError::Geography(_) => "Check the stops source and try again.",
        BoardError::Geolocation(_) => "Pass --lat and --lon, or check the --locate service.",
    };
    format!("{err}\n{hint}\n")
}

pub fn error_json(err: &BoardError) -> Result<String> {
    let kind = match err {
        BoardError::Geography(_) => "geography",
        BoardError::Geolocation(_) => "geolocation",
    };
    Ok(serde_json::to_string_pretty(&serde_json::json!({
        "error": kind,
        "message": err.to_string(),
    }))?)
}

/// Lists the services running on `date` and why.
pub fn services(schedule: &StaticSchedule, date: NaiveDate) -> String {
    let active = schedule.calendar.active_services(date);
    let mut out = format!(
        "{} services run on {} ({})\n",
        active.len(),
        date,
        date.format("%A")
    );
    for id in &active {
        let added = schedule
            .calendar
            .exceptions
            .get(&date)
            .into_iter()
            .flatten()
            .any(|e| &e.service_id == id && e.exception_type == ExceptionType::Added);
        let reason = match schedule.calendar.services.get(id) {
            Some(service) if !added => format!(
                "{}, {} to {}",
                service.days_of_week.describe(),
                service.start_date,
                service.end_date
            ),
            _ => "added for this date".to_string(),
        };
        let trips = schedule
            .trips
            .values()
            .filter(|trip| &trip.service_id == id)
            .count();
        out.push_str(&format!("  {id}: {reason}, {trips} trips\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use gtfs::{Stop, StopID, TripID};
    use model::rank_stops;

    use super::*;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 7, 4)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn row(trip: &str, scheduled: NaiveDateTime, realtime: Option<NaiveDateTime>) -> DisplayRow {
        DisplayRow {
            trip_id: TripID::new(trip),
            route: "72".to_string(),
            headsign: "Centre".to_string(),
            scheduled,
            realtime,
            vehicle_id: None,
        }
    }

    fn board(arrivals: Vec<Option<Vec<DisplayRow>>>) -> Board {
        let user = LonLat::new(-2.5879, 51.4544);
        let stops: Vec<Stop> = (0..arrivals.len())
            .map(|i| Stop {
                stop_id: StopID::new(format!("S{i}")),
                name: format!("Stop {i}"),
                pos: Some(LonLat::new(-2.5879, 51.4544 + 0.001 * (i + 1) as f64)),
            })
            .collect();
        let stops = rank_stops(user, &stops, 10)
            .into_iter()
            .zip(arrivals)
            .map(|(nearby, arrivals)| StopBoard { nearby, arrivals })
            .collect();
        Board {
            location: user,
            now: at(12, 0),
            stops,
            failures: Vec::new(),
            notices: Vec::new(),
            realtime_as_of: None,
        }
    }

    #[test]
    fn realtime_label_only_with_prediction() {
        let out = text(&board(vec![Some(vec![
            row("T1", at(12, 10), Some(at(12, 12))),
            row("T2", at(12, 25), None),
        ])]));
        let lines: Vec<&str> = out.lines().filter(|l| l.contains("Centre")).collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("12:10") && lines[0].contains("Real-time 12:12"));
        assert!(lines[1].contains("12:25") && !lines[1].contains("Real-time"));
    }

    #[test]
    fn empty_and_failed_stops() {
        let out = text(&board(vec![None, Some(Vec::new())]));
        assert!(out.contains("Stop 0 (S0)\n  111 m N"));
        assert!(out.contains(NO_DATA));
        assert!(out.contains(NO_ARRIVALS));
        assert!(!out.contains("Real-time"));
    }

    #[test]
    fn notices_are_shown() {
        let mut b = board(vec![Some(Vec::new())]);
        b.notices.push("Real-time data unavailable: timed out".to_string());
        assert!(text(&b).ends_with("! Real-time data unavailable: timed out\n"));
    }

    #[test]
    fn feed_age_in_header() {
        let mut b = board(vec![Some(Vec::new())]);
        assert!(!text(&b).contains("as of"));
        b.realtime_as_of = Some(at(11, 58));
        assert!(text(&b).contains("at 12:00\nReal-time data as of 11:58\n"));
    }

    #[test]
    fn links_and_distances() {
        assert_eq!(
            map_link(LonLat::new(-2.5813, 51.4491)),
            "https://www.openstreetmap.org/?mlat=51.44910&mlon=-2.58130#map=18/51.44910/-2.58130"
        );
        assert_eq!(distance(84.6), "85 m");
        assert_eq!(distance(1234.0), "1.2 km");
    }

    #[test]
    fn errors() {
        let err = BoardError::Geolocation(anyhow!("connection refused"));
        let out = error_text(&err);
        assert!(out.starts_with("Couldn't find your location: connection refused\n"));

        let value: serde_json::Value =
            serde_json::from_str(&error_json(&BoardError::Geography(anyhow!("404"))).unwrap())
                .unwrap();
        assert_eq!(value["error"], "geography");
    }

    #[test]
    fn board_json() {
        let b = board(vec![Some(vec![row("T1", at(12, 10), None)])]);
        let value: serde_json::Value = serde_json::from_str(&json(&b).unwrap()).unwrap();
        assert_eq!(value["stops"][0]["arrivals"][0]["route"], "72");
        assert!(value["stops"][0]["arrivals"][0]["realtime"].is_null());
    }

    #[test]
    fn services_on_a_holiday() {
        let schedule = StaticSchedule::load(
            Some(
                b"service_id,monday,tuesday,wednesday,thursday,friday,saturday,sunday,start_date,end_date\n\
                  WD,1,1,1,1,1,0,0,20240101,20241231\n\
                  SU,0,0,0,0,0,0,1,20240101,20241231\n"
                    .to_vec(),
            ),
            Some(b"service_id,date,exception_type\nWD,20240704,2\nSU,20240704,1\n".to_vec()),
            b"route_id,service_id,trip_id\n72,WD,T1\n72,SU,T2\n72,SU,T3\n".to_vec(),
        )
        .unwrap();

        let out = services(&schedule, NaiveDate::from_ymd_opt(2024, 7, 4).unwrap());
        assert!(out.starts_with("1 services run on 2024-07-04 (Thursday)\n"));
        assert!(out.contains("  SU: added for this date, 2 trips\n"));

        let out = services(&schedule, NaiveDate::from_ymd_opt(2024, 7, 5).unwrap());
        assert!(out.contains("  WD: weekdays, 2024-01-01 to 2024-12-31, 1 trips\n"));
    }
}
