#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

mod arrivals;
mod board;
mod geo;
mod ranking;

pub use self::arrivals::{merge_arrivals, BoardContext, Dedupe, DisplayRow, Window};
pub use self::board::{
    build_board, Board, BoardConfig, BoardError, Sources, StopBoard, StopFailure,
};
pub use self::geo::{haversine_distance, initial_bearing, Compass, EARTH_RADIUS_M};
pub use self::ranking::{rank_stops, NearbyStop};

pub use gtfs;
