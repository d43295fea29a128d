//! Common types shared across the smoke-forecast services.

pub mod area;
pub mod error;
pub mod tile;
pub mod time;

pub use area::{AreaGrid, TILE_SIZE_PX};
pub use error::{ForecastError, ForecastResult};
pub use tile::{TileCoord, TileOutcome, TileRequest, TileResult};
pub use time::{ForecastRun, HORIZON_HOURS};
