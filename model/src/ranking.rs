use serde::Serialize;

use gtfs::{LonLat, Stop};

use crate::geo::{haversine_distance, initial_bearing, Compass};

#[derive(Clone, Debug, Serialize)]
pub struct NearbyStop {
    pub stop: Stop,
    pub pos: LonLat,
    pub distance_m: f64,
    pub bearing: f64,
    pub compass: Compass,
}

/// Sorts stops by distance from the user and keeps the closest `limit`. Stops without a valid
/// position count as infinitely far away and never make the cut.
pub fn rank_stops(user: LonLat, stops: &[Stop], limit: usize) -> Vec<NearbyStop> {
    if !user.is_valid() {
        warn!("Can't rank stops from an invalid position {:?}", user);
        return Vec::new();
    }

    let mut ranked: Vec<(f64, &Stop)> = stops
        .iter()
        .map(|stop| {
            let distance = match stop.pos {
                Some(pos) if pos.is_valid() => haversine_distance(user, pos),
                _ => f64::INFINITY,
            };
            (distance, stop)
        })
        .collect();
    ranked.sort_by(|a, b| a.0.total_cmp(&b.0));

    ranked
        .into_iter()
        .take_while(|(distance, _)| distance.is_finite())
        .take(limit)
        .filter_map(|(distance_m, stop)| {
            let pos = stop.pos?;
            let bearing = initial_bearing(user, pos);
            Some(NearbyStop {
                stop: stop.clone(),
                pos,
                distance_m,
                bearing,
                compass: Compass::from_bearing(bearing),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use gtfs::StopID;

    use super::*;

    fn stop(id: &str, pos: Option<LonLat>) -> Stop {
        Stop {
            stop_id: StopID::new(id),
            name: id.to_string(),
            pos,
        }
    }

    #[test]
    fn closest_first() {
        let user = LonLat::new(0.0, 0.0);
        let stops = vec![
            stop("far", Some(LonLat::new(0.0, 0.05))),
            stop("broken", None),
            stop("nan", Some(LonLat::new(f64::NAN, 0.0))),
            stop("east", Some(LonLat::new(0.001, 0.0))),
            stop("south", Some(LonLat::new(0.0, -0.002))),
            stop("middle", Some(LonLat::new(0.01, 0.01))),
        ];

        let ranked = rank_stops(user, &stops, 5);
        let ids: Vec<&str> = ranked.iter().map(|n| n.stop.stop_id.as_str()).collect();
        assert_eq!(ids, vec!["east", "south", "middle", "far"]);

        assert_eq!(ranked[0].compass, Compass::E);
        assert_eq!(ranked[1].compass, Compass::S);
        assert_eq!(ranked[2].compass, Compass::NE);
        assert_eq!(ranked[3].compass, Compass::N);
        assert!((ranked[0].distance_m - 111.19).abs() < 0.1);
    }

    #[test]
    fn truncates() {
        let user = LonLat::new(-2.58, 51.45);
        let stops: Vec<Stop> = (0..20)
            .map(|i| {
                stop(
                    &format!("s{i}"),
                    Some(LonLat::new(-2.58, 51.45 + 0.001 * (20 - i) as f64)),
                )
            })
            .collect();
        let ranked = rank_stops(user, &stops, 5);
        assert_eq!(ranked.len(), 5);
        assert_eq!(ranked[0].stop.stop_id.as_str(), "s19");
        assert!(ranked.windows(2).all(|w| w[0].distance_m <= w[1].distance_m));
    }

    #[test]
    fn invalid_user() {
        let stops = vec![stop("a", Some(LonLat::new(0.0, 0.0)))];
        assert!(rank_stops(LonLat::new(0.0, 95.0), &stops, 5).is_empty());
    }
}
