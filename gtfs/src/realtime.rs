use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::{StopID, TripID};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Prediction {
    /// An absolute predicted arrival
    Arrival(DateTime<Utc>),
    /// Seconds relative to the scheduled time. Negative means early.
    Delay(i64),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RealtimeUpdate {
    pub trip_id: TripID,
    /// None for trip-level updates that apply to every stop
    pub stop_id: Option<StopID>,
    pub prediction: Prediction,
    pub vehicle_id: Option<String>,
}

/// Realtime predictions from either upstream shape, indexed by trip.
#[derive(Clone, Debug, Default)]
pub struct RealtimeFeed {
    pub timestamp: Option<DateTime<Utc>>,
    by_trip: BTreeMap<TripID, Vec<RealtimeUpdate>>,
}

impl RealtimeFeed {
    pub fn new(timestamp: Option<DateTime<Utc>>, updates: Vec<RealtimeUpdate>) -> Self {
        let mut by_trip: BTreeMap<TripID, Vec<RealtimeUpdate>> = BTreeMap::new();
        for update in updates {
            by_trip
                .entry(update.trip_id.clone())
                .or_default()
                .push(update);
        }
        Self { timestamp, by_trip }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let raw: RawFeed =
            serde_json::from_slice(bytes).map_err(|err| anyhow!("realtime feed: {err}"))?;
        let feed = match raw {
            RawFeed::Arrivals { arrivals } => {
                Self::new(None, arrivals.into_iter().filter_map(normalize_arrival).collect())
            }
            RawFeed::Entities { header, entity } => {
                let mut updates = Vec::new();
                for entity in entity {
                    if entity.is_deleted == Some(true) {
                        continue;
                    }
                    if let Some(trip_update) = entity.trip_update {
                        updates.extend(normalize_trip_update(trip_update));
                    }
                }
                Self::new(header.and_then(|h| to_datetime(h.timestamp?)), updates)
            }
        };
        Ok(feed)
    }

    /// An update for this exact stop wins over a trip-level one.
    pub fn lookup(&self, trip: &TripID, stop: &StopID) -> Option<&RealtimeUpdate> {
        let updates = self.by_trip.get(trip)?;
        updates
            .iter()
            .find(|u| u.stop_id.as_ref() == Some(stop))
            .or_else(|| updates.iter().find(|u| u.stop_id.is_none()))
    }

    pub fn num_trips(&self) -> usize {
        self.by_trip.len()
    }
}

fn normalize_arrival(rec: RawArrival) -> Option<RealtimeUpdate> {
    let trip_id = match rec.trip_id.filter(|x| !x.is_empty()) {
        Some(x) => TripID::new(x),
        None => {
            debug!("Realtime arrival without a trip_id");
            return None;
        }
    };
    let prediction = prediction(rec.expected_arrival, rec.delay)?;
    Some(RealtimeUpdate {
        trip_id,
        stop_id: rec.stop_id.filter(|x| !x.is_empty()).map(StopID::new),
        prediction,
        vehicle_id: rec.vehicle_id,
    })
}

fn normalize_trip_update(update: RawTripUpdate) -> Vec<RealtimeUpdate> {
    let trip_id = match update.trip.trip_id.filter(|x| !x.is_empty()) {
        Some(x) => TripID::new(x),
        None => {
            debug!("Trip update without a trip_id");
            return Vec::new();
        }
    };
    let vehicle_id = update.vehicle.and_then(|v| v.id.or(v.label));

    let mut result = Vec::new();
    for stu in update.stop_time_update.unwrap_or_default() {
        let stop_id = match stu.stop_id.filter(|x| !x.is_empty()) {
            Some(x) => StopID::new(x),
            None => continue,
        };
        let Some(event) = stu.arrival.or(stu.departure) else {
            continue;
        };
        if let Some(prediction) = prediction(event.time, event.delay) {
            result.push(RealtimeUpdate {
                trip_id: trip_id.clone(),
                stop_id: Some(stop_id),
                prediction,
                vehicle_id: vehicle_id.clone(),
            });
        }
    }
    if let Some(prediction) = prediction(None, update.delay) {
        result.push(RealtimeUpdate {
            trip_id,
            stop_id: None,
            prediction,
            vehicle_id,
        });
    }
    result
}

// More than a day early or late isn't a prediction anybody can use
const MAX_DELAY_SECS: i64 = 24 * 60 * 60;

fn prediction(time: Option<i64>, delay: Option<i64>) -> Option<Prediction> {
    if let Some(at) = time.and_then(to_datetime) {
        return Some(Prediction::Arrival(at));
    }
    let delay = delay?;
    if !(-MAX_DELAY_SECS..=MAX_DELAY_SECS).contains(&delay) {
        warn!("Ignoring a realtime delay of {delay}s");
        return None;
    }
    Some(Prediction::Delay(delay))
}

fn to_datetime(epoch: i64) -> Option<DateTime<Utc>> {
    if epoch <= 0 {
        return None;
    }
    // Some proxies send milliseconds
    let secs = if epoch > 100_000_000_000 {
        epoch / 1000
    } else {
        epoch
    };
    DateTime::from_timestamp(secs, 0)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawFeed {
    Arrivals {
        arrivals: Vec<RawArrival>,
    },
    Entities {
        #[serde(default)]
        header: Option<RawHeader>,
        entity: Vec<RawEntity>,
    },
}

#[derive(Deserialize)]
struct RawArrival {
    #[serde(default, alias = "tripId", deserialize_with = "flexible_string")]
    trip_id: Option<String>,
    #[serde(default, alias = "stopId", deserialize_with = "flexible_string")]
    stop_id: Option<String>,
    #[serde(
        default,
        alias = "predicted_arrival",
        alias = "arrival_time",
        alias = "expectedArrival",
        deserialize_with = "flexible_epoch"
    )]
    expected_arrival: Option<i64>,
    #[serde(default, deserialize_with = "flexible_int")]
    delay: Option<i64>,
    #[serde(default, alias = "vehicleId", deserialize_with = "flexible_string")]
    vehicle_id: Option<String>,
}

#[derive(Deserialize)]
struct RawHeader {
    #[serde(default, deserialize_with = "flexible_epoch")]
    timestamp: Option<i64>,
}

#[derive(Deserialize)]
struct RawEntity {
    #[serde(default, alias = "isDeleted")]
    is_deleted: Option<bool>,
    #[serde(default, alias = "tripUpdate")]
    trip_update: Option<RawTripUpdate>,
}

#[derive(Deserialize)]
struct RawTripUpdate {
    trip: RawTripDescriptor,
    #[serde(default)]
    vehicle: Option<RawVehicle>,
    #[serde(default, alias = "stopTimeUpdate")]
    stop_time_update: Option<Vec<RawStopTimeUpdate>>,
    #[serde(default, deserialize_with = "flexible_int")]
    delay: Option<i64>,
}

#[derive(Deserialize)]
struct RawTripDescriptor {
    #[serde(default, alias = "tripId", deserialize_with = "flexible_string")]
    trip_id: Option<String>,
}

#[derive(Deserialize)]
struct RawVehicle {
    #[serde(default, deserialize_with = "flexible_string")]
    id: Option<String>,
    #[serde(default, deserialize_with = "flexible_string")]
    label: Option<String>,
}

#[derive(Deserialize)]
struct RawStopTimeUpdate {
    #[serde(default, alias = "stopId", deserialize_with = "flexible_string")]
    stop_id: Option<String>,
    #[serde(default)]
    arrival: Option<RawStopTimeEvent>,
    #[serde(default)]
    departure: Option<RawStopTimeEvent>,
}

#[derive(Deserialize)]
struct RawStopTimeEvent {
    #[serde(default, deserialize_with = "flexible_epoch")]
    time: Option<i64>,
    #[serde(default, deserialize_with = "flexible_int")]
    delay: Option<i64>,
}

// The protobuf JSON mapping encodes 64-bit ints as strings, other proxies use numbers.
fn flexible_int<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    Ok(match Option::<serde_json::Value>::deserialize(d)? {
        Some(serde_json::Value::Number(x)) => x.as_i64().or_else(|| x.as_f64().map(|f| f as i64)),
        Some(serde_json::Value::String(x)) => x.trim().parse().ok(),
        _ => None,
    })
}

/// Like flexible_int, but also accepts RFC 3339 timestamps
fn flexible_epoch<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    Ok(match Option::<serde_json::Value>::deserialize(d)? {
        Some(serde_json::Value::Number(x)) => x.as_i64().or_else(|| x.as_f64().map(|f| f as i64)),
        Some(serde_json::Value::String(x)) => match x.trim().parse::<i64>() {
            Ok(n) => Some(n),
            Err(_) => DateTime::parse_from_rfc3339(x.trim())
                .ok()
                .map(|dt| dt.timestamp()),
        },
        _ => None,
    })
}

fn flexible_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<serde_json::Value>::deserialize(d)? {
        Some(serde_json::Value::String(x)) => Some(x),
        Some(serde_json::Value::Number(x)) => Some(x.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(epoch: i64) -> Prediction {
        Prediction::Arrival(DateTime::from_timestamp(epoch, 0).unwrap())
    }

    #[test]
    fn arrivals_shape() {
        let input = r#"{"arrivals": [
            {"trip_id": "T1", "stop_id": "S1", "expected_arrival": 1720080000, "vehicle_id": "BUS-1"},
            {"trip_id": "T2", "delay": 120},
            {"trip_id": "T3", "stop_id": "S1", "arrival_time": "2024-07-04T08:00:00Z"},
            {"trip_id": "T4", "stop_id": "S1"},
            {"stop_id": "S1", "delay": 30}
        ]}"#;
        let feed = RealtimeFeed::parse(input.as_bytes()).unwrap();
        assert_eq!(feed.num_trips(), 3);
        assert_eq!(feed.timestamp, None);

        let s1 = StopID::new("S1");
        let t1 = feed.lookup(&TripID::new("T1"), &s1).unwrap();
        assert_eq!(t1.prediction, at(1720080000));
        assert_eq!(t1.vehicle_id.as_deref(), Some("BUS-1"));
        // Only for S1
        assert!(feed.lookup(&TripID::new("T1"), &StopID::new("S2")).is_none());

        // Trip-level applies anywhere
        assert_eq!(
            feed.lookup(&TripID::new("T2"), &StopID::new("S9"))
                .unwrap()
                .prediction,
            Prediction::Delay(120)
        );
        assert_eq!(
            feed.lookup(&TripID::new("T3"), &s1).unwrap().prediction,
            at(1720080000)
        );
        assert!(feed.lookup(&TripID::new("T4"), &s1).is_none());
    }

    #[test]
    fn trip_update_shape() {
        let input = r#"{
            "header": {"gtfs_realtime_version": "2.0", "timestamp": "1720080000"},
            "entity": [
                {"id": "1", "trip_update": {
                    "trip": {"trip_id": "T1"},
                    "vehicle": {"id": "V7"},
                    "stop_time_update": [
                        {"stop_sequence": 3, "stop_id": "S1", "arrival": {"delay": 60}},
                        {"stop_sequence": 4, "stop_id": "S2", "arrival": {"time": "1720080600"}},
                        {"stop_sequence": 5, "stop_id": "S3", "departure": {"time": 1720080900}}
                    ],
                    "delay": 45
                }},
                {"id": "2", "tripUpdate": {
                    "trip": {"tripId": "T2"},
                    "stopTimeUpdate": [{"stopId": "S1", "arrival": {"delay": -30}}]
                }},
                {"id": "3", "is_deleted": true, "trip_update": {"trip": {"trip_id": "T3"}, "delay": 10}},
                {"id": "4", "vehicle": {"position": {"latitude": 51.4, "longitude": -2.5}}}
            ]
        }"#;
        let feed = RealtimeFeed::parse(input.as_bytes()).unwrap();
        assert_eq!(feed.timestamp, DateTime::from_timestamp(1720080000, 0));
        assert_eq!(feed.num_trips(), 2);

        let t1 = TripID::new("T1");
        let s1 = feed.lookup(&t1, &StopID::new("S1")).unwrap();
        assert_eq!(s1.prediction, Prediction::Delay(60));
        assert_eq!(s1.vehicle_id.as_deref(), Some("V7"));
        assert_eq!(
            feed.lookup(&t1, &StopID::new("S2")).unwrap().prediction,
            at(1720080600)
        );
        assert_eq!(
            feed.lookup(&t1, &StopID::new("S3")).unwrap().prediction,
            at(1720080900)
        );
        // Falls back to the trip-level delay
        assert_eq!(
            feed.lookup(&t1, &StopID::new("S4")).unwrap().prediction,
            Prediction::Delay(45)
        );

        assert_eq!(
            feed.lookup(&TripID::new("T2"), &StopID::new("S1"))
                .unwrap()
                .prediction,
            Prediction::Delay(-30)
        );
        assert!(feed
            .lookup(&TripID::new("T3"), &StopID::new("S1"))
            .is_none());
    }

    #[test]
    fn milliseconds_and_garbage() {
        let input = r#"{"arrivals": [{"trip_id": "T1", "expected_arrival": 1720080000000}]}"#;
        let feed = RealtimeFeed::parse(input.as_bytes()).unwrap();
        assert_eq!(
            feed.lookup(&TripID::new("T1"), &StopID::new("S1"))
                .unwrap()
                .prediction,
            at(1720080000)
        );

        assert!(RealtimeFeed::parse(b"[]").is_err());
        assert!(RealtimeFeed::parse(br#"{"unexpected": true}"#).is_err());
    }

    #[test]
    fn absurd_delays_are_dropped() {
        let input = r#"{"arrivals": [
            {"trip_id": "T1", "stop_id": "S1", "delay": 9223372036854775},
            {"trip_id": "T2", "stop_id": "S1", "delay": -9223372036854775808},
            {"trip_id": "T3", "stop_id": "S1", "delay": 86400}
        ]}"#;
        let feed = RealtimeFeed::parse(input.as_bytes()).unwrap();
        let s1 = StopID::new("S1");
        assert!(feed.lookup(&TripID::new("T1"), &s1).is_none());
        assert!(feed.lookup(&TripID::new("T2"), &s1).is_none());
        assert_eq!(
            feed.lookup(&TripID::new("T3"), &s1).unwrap().prediction,
            Prediction::Delay(86400)
        );

        let input = r#"{"entity": [{"trip_update": {"trip": {"trip_id": "T1"}, "delay": "9223372036854775"}}]}"#;
        assert_eq!(RealtimeFeed::parse(input.as_bytes()).unwrap().num_trips(), 0);
    }
}
