use anyhow::Result;
use geojson::{Feature, GeoJson, JsonValue};
use serde::{Deserialize, Serialize};

use super::StopID;

pub const UNKNOWN: &str = "Unknown";

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LonLat {
    pub longitude: f64,
    pub latitude: f64,
}

impl LonLat {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.longitude.is_finite()
            && self.latitude.is_finite()
            && self.latitude.abs() <= 90.0
            && self.longitude.abs() <= 180.0
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Stop {
    pub stop_id: StopID,
    pub name: String,
    /// None when the source coordinates are missing or garbage
    pub pos: Option<LonLat>,
}

/// Which feature properties hold each field. Defaults match the NaPTAN export.
#[derive(Clone, Debug)]
pub struct StopProperties {
    pub code: String,
    pub name: String,
    pub latitude: String,
    pub longitude: String,
}

impl Default for StopProperties {
    fn default() -> Self {
        Self {
            code: "AtcoCode".to_string(),
            name: "CommonName".to_string(),
            latitude: "Latitude".to_string(),
            longitude: "Longitude".to_string(),
        }
    }
}

/// Parses a GeoJSON FeatureCollection of stops. Features without a stop code are skipped; a missing
/// name becomes "Unknown" and bad coordinates leave `pos` empty.
pub fn load(bytes: &[u8], keys: &StopProperties) -> Result<Vec<Stop>> {
    let raw = std::str::from_utf8(bytes).map_err(|err| anyhow!("stops aren't UTF-8: {err}"))?;
    let collection = match raw.parse::<GeoJson>()? {
        GeoJson::FeatureCollection(fc) => fc,
        _ => bail!("stops must be a FeatureCollection"),
    };

    let mut stops = Vec::new();
    let mut skipped = 0;
    for feature in collection.features {
        let stop_id = match string_property(&feature, &keys.code) {
            Some(code) => StopID::new(code),
            None => {
                skipped += 1;
                continue;
            }
        };
        let name = string_property(&feature, &keys.name).unwrap_or_else(|| UNKNOWN.to_string());
        let pos = properties_pos(&feature, keys)
            .or_else(|| geometry_pos(&feature))
            .filter(|pt| pt.is_valid());
        if pos.is_none() {
            debug!("{:?} has no usable position", stop_id);
        }
        stops.push(Stop { stop_id, name, pos });
    }
    if skipped > 0 {
        warn!("Skipped {skipped} stop features without a {:?}", keys.code);
    }
    Ok(stops)
}

fn string_property(feature: &Feature, key: &str) -> Option<String> {
    match feature.property(key)? {
        JsonValue::String(x) if !x.trim().is_empty() => Some(x.trim().to_string()),
        JsonValue::Number(x) => Some(x.to_string()),
        _ => None,
    }
}

fn number_property(feature: &Feature, key: &str) -> Option<f64> {
    match feature.property(key)? {
        JsonValue::String(x) => x.trim().parse().ok(),
        JsonValue::Number(x) => x.as_f64(),
        _ => None,
    }
}

fn properties_pos(feature: &Feature, keys: &StopProperties) -> Option<LonLat> {
    Some(LonLat::new(
        number_property(feature, &keys.longitude)?,
        number_property(feature, &keys.latitude)?,
    ))
}

fn geometry_pos(feature: &Feature) -> Option<LonLat> {
    match &feature.geometry.as_ref()?.value {
        geojson::Value::Point(pt) if pt.len() >= 2 => Some(LonLat::new(pt[0], pt[1])),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STOPS: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    {"type": "Feature", "geometry": null,
     "properties": {"AtcoCode": "0100BRP90310", "CommonName": "Temple Meads", "Latitude": "51.4491", "Longitude": "-2.5813"}},
    {"type": "Feature", "geometry": {"type": "Point", "coordinates": [-2.59, 51.45]},
     "properties": {"AtcoCode": "0100BRP90311", "Latitude": "", "Longitude": "n/a"}},
    {"type": "Feature", "geometry": null,
     "properties": {"AtcoCode": "0100BRP90312", "CommonName": "Nowhere", "Latitude": "123.0", "Longitude": "1.0"}},
    {"type": "Feature", "geometry": null,
     "properties": {"CommonName": "No code"}}
  ]
}"#;

    #[test]
    fn load_stops() {
        let stops = load(STOPS.as_bytes(), &StopProperties::default()).unwrap();
        assert_eq!(stops.len(), 3);

        assert_eq!(stops[0].stop_id, StopID::new("0100BRP90310"));
        assert_eq!(stops[0].name, "Temple Meads");
        assert_eq!(stops[0].pos, Some(LonLat::new(-2.5813, 51.4491)));

        // Falls back to the geometry, and the name is a placeholder
        assert_eq!(stops[1].name, UNKNOWN);
        assert_eq!(stops[1].pos, Some(LonLat::new(-2.59, 51.45)));

        // Latitude out of range
        assert_eq!(stops[2].pos, None);
    }

    #[test]
    fn custom_keys_and_numbers() {
        let input = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "geometry": null, "properties": {"stop_code": 42, "stop_name": "Pier", "lat": 50.1, "lon": -5.5}}
        ]}"#;
        let keys = StopProperties {
            code: "stop_code".to_string(),
            name: "stop_name".to_string(),
            latitude: "lat".to_string(),
            longitude: "lon".to_string(),
        };
        let stops = load(input.as_bytes(), &keys).unwrap();
        assert_eq!(stops[0].stop_id, StopID::new("42"));
        assert_eq!(stops[0].pos, Some(LonLat::new(-5.5, 50.1)));
    }

    #[test]
    fn not_a_collection() {
        let point = r#"{"type": "Point", "coordinates": [0.0, 0.0]}"#;
        assert!(load(point.as_bytes(), &StopProperties::default()).is_err());
        assert!(load(b"{not json", &StopProperties::default()).is_err());
    }
}
