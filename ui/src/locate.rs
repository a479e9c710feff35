use anyhow::Result;
use serde::Deserialize;

use gtfs::LonLat;

use crate::fetch::Fetcher;

/// How to find the user
pub enum Locator {
    Fixed(LonLat),
    /// A service answering with `{"latitude": .., "longitude": ..}`
    Service(String),
}

#[derive(Deserialize)]
struct Position {
    #[serde(alias = "lat")]
    latitude: f64,
    #[serde(alias = "lon", alias = "lng")]
    longitude: f64,
}

impl Locator {
    pub async fn locate(&self, fetcher: &Fetcher) -> Result<LonLat> {
        let pos = match self {
            Locator::Fixed(pos) => *pos,
            Locator::Service(url) => {
                let bytes = fetcher.get(url).await?;
                parse_position(&bytes)?
            }
        };
        if !pos.is_valid() {
            bail!(
                "Location {}, {} is out of range",
                pos.latitude,
                pos.longitude
            );
        }
        debug!("User is at {}, {}", pos.latitude, pos.longitude);
        Ok(pos)
    }
}

fn parse_position(bytes: &[u8]) -> Result<LonLat> {
    let pos: Position =
        serde_json::from_slice(bytes).map_err(|err| anyhow!("Bad location response: {err}"))?;
    Ok(LonLat::new(pos.longitude, pos.latitude))
}
