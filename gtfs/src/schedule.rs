use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::{StopID, TimeOfDay, TripID};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduledArrival {
    pub trip_id: TripID,
    pub stop_id: StopID,
    /// Missing in the upstream record when None; trips.txt may know the route
    pub route: Option<String>,
    pub headsign: Option<String>,
    pub arrival_time: TimeOfDay,
}

/// Parses one stop's JSON array from the schedule bucket. Records without a trip or a usable
/// arrival time can't be placed, so they're skipped.
pub fn load(stop_id: &StopID, bytes: &[u8]) -> Result<Vec<ScheduledArrival>> {
    let records: Vec<Record> = serde_json::from_slice(bytes)
        .map_err(|err| anyhow!("schedule for {stop_id}: {err}"))?;

    let mut arrivals = Vec::new();
    for rec in records {
        let trip_id = match non_empty(rec.trip_id) {
            Some(x) => TripID::new(x),
            None => {
                warn!("Skipping a {stop_id} arrival with no trip_id");
                continue;
            }
        };
        let arrival_time = match rec.arrival_time.as_deref().map(TimeOfDay::parse) {
            Some(Ok(t)) => t,
            Some(Err(err)) => {
                warn!("Skipping {trip_id} at {stop_id}: {err}");
                continue;
            }
            None => {
                warn!("Skipping {trip_id} at {stop_id}: no arrival_time");
                continue;
            }
        };
        arrivals.push(ScheduledArrival {
            trip_id,
            stop_id: stop_id.clone(),
            route: non_empty(rec.route_short),
            headsign: non_empty(rec.trip_headsign),
            arrival_time,
        });
    }
    Ok(arrivals)
}

fn non_empty(x: Option<String>) -> Option<String> {
    x.map(|x| x.trim().to_string()).filter(|x| !x.is_empty())
}

#[derive(Deserialize)]
struct Record {
    #[serde(default, deserialize_with = "string_or_number")]
    trip_id: Option<String>,
    #[serde(default, alias = "route_short_name", deserialize_with = "string_or_number")]
    route_short: Option<String>,
    #[serde(default)]
    trip_headsign: Option<String>,
    #[serde(default)]
    arrival_time: Option<String>,
}

/// Route names like 72 are sometimes emitted as numbers
fn string_or_number<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<serde_json::Value>::deserialize(d)? {
        Some(serde_json::Value::String(x)) => Some(x),
        Some(serde_json::Value::Number(x)) => Some(x.to_string()),
        _ => None,
    })
}
