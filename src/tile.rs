use std::{f64::consts::PI, fmt};

/// Northern and southern limit of the Web-Mercator projection in degrees.
pub const LAT_LIMIT: f64 = 85.051_128_779_806_59;

/// Deepest zoom level the tile math supports.
pub const MAX_ZOOM: u8 = 24;

/// A geographic point in degrees, as produced by the track/waypoint parsers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

impl From<(f64, f64)> for Coordinate {
    fn from((lat, lon): (f64, f64)) -> Self {
        Self::new(lat, lon)
    }
}

/// An OSM slippy-map tile address with x, y and z-coordinate.
/// ref: https://wiki.openstreetmap.org/wiki/Slippy_map_tilenames
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TileAddress {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileAddress {
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    /// Computes the address of the tile containing the given point.
    ///
    /// Latitudes beyond the Web-Mercator limit are clamped, and longitudes wrap
    /// around the antimeridian so that +180° lands in the same column as -180°.
    ///
    /// # Panics
    /// Panics if `zoom` exceeds [`MAX_ZOOM`].
    pub fn from_coords_and_zoom(lat_deg: f64, lon_deg: f64, zoom: u8) -> Self {
        assert!(zoom <= MAX_ZOOM);

        // scale factor
        let n = 2_f64.powi(zoom as i32);
        let max_index = (1_u64 << zoom) - 1;

        let lat_rad = lat_deg.clamp(-LAT_LIMIT, LAT_LIMIT).to_radians();

        let x = ((lon_deg + 180_f64) / 360_f64 * n).floor();
        let y = ((1_f64 - lat_rad.tan().asinh() / PI) / 2_f64 * n).floor();

        let x = (x as i64).rem_euclid(1_i64 << zoom) as u32;
        let y = (y.max(0_f64) as u64).min(max_index) as u32;

        Self::new(zoom, x, y)
    }

    /// Latitude and longitude (in degrees) of this tile's north-western corner.
    ///
    /// `x` and `y` may equal `2^z`, which yields the south-eastern edge of the world.
    pub fn nw_corner(&self) -> (f64, f64) {
        let n = 2_f64.powi(self.z as i32);

        let lon = self.x as f64 / n * 360_f64 - 180_f64;
        let lat = (PI * (1_f64 - 2_f64 * self.y as f64 / n))
            .sinh()
            .atan()
            .to_degrees();

        (lat, lon)
    }
}

impl fmt::Display for TileAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// A downloaded (or cached) raster tile on its way into a package.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Tile {
    pub address: TileAddress,
    pub source: String,
    pub image: Vec<u8>,
}

impl Tile {
    pub fn new(address: TileAddress, source: impl Into<String>, image: Vec<u8>) -> Self {
        Self {
            address,
            source: source.into(),
            image,
        }
    }
}

/// Checks whether `data` starts with the signature of a raster format that
/// offline map apps can display.
pub fn is_image(data: &[u8]) -> bool {
    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n";
    const JPEG: &[u8] = b"\xff\xd8\xff";
    const GIF: &[u8] = b"GIF8";

    data.starts_with(PNG)
        || data.starts_with(JPEG)
        || data.starts_with(GIF)
        || (data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP")
}
