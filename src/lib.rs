//! Turn GPS tracks and waypoints into offline raster maps.
//!
//! Given the coordinates of a track and a set of zoom levels, this crate works
//! out which slippy-map tiles cover the track, downloads the ones that aren't in
//! the local tile cache yet and packs everything into a map file for an offline
//! map app:
//!
//! - **OruxMaps**: a directory with `OruxMapsImages.db` and a `.otrk2.xml`
//!   calibration file.
//! - **BackCountry Navigator**: an RMaps-style `.sqlitedb` plus an `.xml`
//!   descriptor.
//!
//! **Be considerate.** Tile servers are run by volunteers or paid for by
//! someone. Keep the number of parallel fetches low and respect the usage
//! policy of the server you download from.
//!
//! # CLI Example
//!
//! ```bash
//! offline-map-generator \
//!   --url "https://{s}.tile.openstreetmap.de/{z}/{x}/{y}.png" \
//!   --input track.csv \
//!   --zoom 10,12,14 \
//!   --format orux \
//!   --output ./maps/eifel-tour
//! ```
//!
//! # Library Example
//! ```rust,no_run
//! use offline_map_generator::{
//!     generate, Config, Coordinate, Format, HttpFetcher, SilentObserver, TileSource,
//! };
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let source = TileSource::new("OSM", "https://{s}.tile.openstreetmap.de/{z}/{x}/{y}.png")
//!     .with_zoom_range(0, 18);
//! let cfg = Config::new("./maps/aachen", Format::OruxMaps);
//! let track = vec![Coordinate::new(50.7929, 6.0402), Coordinate::new(50.811, 6.1649)];
//! let fetcher = Arc::new(HttpFetcher::new(cfg.timeout)?);
//!
//! generate(&cfg, Arc::new(source), track, &[12, 14], fetcher, &SilentObserver).await?;
//! # Ok(())
//! # }
//! ```

mod bounds;
mod cache;
pub mod catalog;
mod config;
mod error;
mod fetch;
mod map;
mod packager;
mod pipeline;
mod source;
mod tile;

pub use bounds::{normalize_west, Bounds, GeoBox};
pub use cache::{CacheStatus, TileCache};
pub use config::{Config, BACKOFF_DELAY};
pub use error::{InputError, SourceError};
pub use fetch::{fetch_all, FetchOutcome, HttpFetcher, TileFetcher, TooManyRequests};
pub use map::{Layer, Map};
pub use packager::{BCNavPackager, Format, OruxPackager, Packager, TILE_SIZE};
pub use pipeline::{generate, RunObserver, RunOutcome, RunSummary, SilentObserver};
pub use source::{TileSource, UrlFormat};
pub use tile::{is_image, Coordinate, Tile, TileAddress, LAT_LIMIT, MAX_ZOOM};
