//! Writing tiles into the containers offline map apps read.
//!
//! Every format is a SQLite database holding the tile images plus a sibling
//! descriptor file describing the tile grid of each zoom level.

mod bcnav;
mod orux;
mod sqlite;

pub use bcnav::BCNavPackager;
pub use orux::OruxPackager;

use anyhow::Result;
use std::{fmt, path::Path, str::FromStr, sync::Arc};

use crate::bounds::{normalize_west, Bounds};
use crate::map::Map;
use crate::source::TileSource;
use crate::tile::Tile;

/// Edge length of a tile in pixels.
pub const TILE_SIZE: u32 = 256;

/// Serializes tiles into one output container.
///
/// A packager is initialized once, receives tiles in any order and is
/// finalized once, after which it must not be used anymore.
pub trait Packager {
    /// Opens the container and creates its schema.
    fn init(&mut self) -> Result<()>;

    /// Stores a tile. Storing the same address twice keeps a single entry,
    /// and `None` (a tile that could not be fetched) is ignored.
    fn add_tile(&mut self, tile: Option<&Tile>) -> Result<()>;

    /// Writes the descriptor, commits outstanding writes and closes the container.
    fn finalize(&mut self) -> Result<()>;
}

/// The supported output formats.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Format {
    /// OruxMaps: `OruxMapsImages.db` plus an `.otrk2.xml` calibration file,
    /// tile indices relative to each layer's top-left tile.
    OruxMaps,

    /// BackCountry Navigator: an RMaps-style `.sqlitedb` plus an `.xml`
    /// descriptor, global tile indices.
    BCNav,
}

impl Format {
    pub const ALL: [Format; 2] = [Format::OruxMaps, Format::BCNav];

    /// Creates the packager for this format writing to `output`.
    pub fn packager(
        self,
        output: &Path,
        map: Arc<Map>,
        source: &TileSource,
    ) -> Box<dyn Packager + Send> {
        match self {
            Format::OruxMaps => Box::new(OruxPackager::new(output, map)),
            Format::BCNav => Box::new(BCNavPackager::new(output, map, &source.attribution)),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Format::OruxMaps => "orux",
            Format::BCNav => "bcnav",
        })
    }
}

impl FromStr for Format {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "orux" | "oruxmaps" => Ok(Format::OruxMaps),
            "bcnav" | "backcountry" => Ok(Format::BCNav),
            _ => Err("unrecognized format, expected `orux` or `bcnav`"),
        }
    }
}

/// Size and position of one zoom level's tile grid.
#[derive(Clone, Copy, Debug, PartialEq)]
struct LayerGeometry {
    zoom: u8,
    bounds: Bounds,
    pixel_width: u64,
    pixel_height: u64,
    north: f64,
    south: f64,
    west: f64,
    east: f64,
}

impl LayerGeometry {
    fn new(bounds: Bounds) -> Self {
        let geo = bounds.geo_box();

        Self {
            zoom: bounds.zoom,
            bounds,
            pixel_width: bounds.width() as u64 * TILE_SIZE as u64,
            pixel_height: bounds.height() as u64 * TILE_SIZE as u64,
            north: geo.north,
            south: geo.south,
            west: normalize_west(geo.west),
            east: geo.east,
        }
    }
}

/// Geometry of every non-empty layer, by ascending zoom level.
fn layer_geometries(map: &Map) -> impl Iterator<Item = LayerGeometry> + '_ {
    map.layers()
        .filter_map(|(_, layer)| layer.bounds())
        .map(|bounds| LayerGeometry::new(*bounds))
}

/// The map's name: the output's file name without extension.
fn map_name(output: &Path) -> String {
    output
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "map".to_owned())
}

fn escape_xml(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_formats() {
        assert_eq!("Orux".parse(), Ok(Format::OruxMaps));
        assert_eq!("bcnav".parse(), Ok(Format::BCNav));
        assert!("mbtiles".parse::<Format>().is_err());

        for format in Format::ALL {
            assert_eq!(format.to_string().parse(), Ok(format));
        }
    }

    #[test]
    fn skips_empty_layers() {
        let map = Map::build(vec![(0.0, 0.0)], &[0, 2]);
        let empty = Map::build(Vec::<(f64, f64)>::new(), &[0, 2]);

        let zooms: Vec<_> = layer_geometries(&map).map(|g| g.zoom).collect();
        assert_eq!(zooms, vec![0, 2]);
        assert_eq!(layer_geometries(&empty).count(), 0);
    }

    #[test]
    fn geometry_of_world_tile() {
        let map = Map::build(vec![(0.0, 0.0)], &[0]);
        let geometry = layer_geometries(&map).next().unwrap();

        assert_eq!((geometry.pixel_width, geometry.pixel_height), (256, 256));
        assert_eq!((geometry.west, geometry.east), (-180.0, 180.0));
    }

    #[test]
    fn escapes_names() {
        assert_eq!(escape_xml("Tom & Jerry's <map>"), "Tom &amp; Jerry&apos;s &lt;map&gt;");
        assert_eq!(map_name(Path::new("out/trip.sqlitedb")), "trip");
    }
}
