use crate::tile::TileAddress;

/// The smallest rectangle of tile indices covering a set of tiles on one zoom level.
///
/// # Example
/// ```rust
/// # use offline_map_generator::{Bounds, TileAddress};
/// let mut bounds = Bounds::new(TileAddress::new(3, 4, 2));
/// bounds.include(&TileAddress::new(3, 6, 1));
/// assert_eq!((bounds.width(), bounds.height()), (3, 2));
/// ```
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct Bounds {
    pub zoom: u8,
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

/// A geographic bounding box in degrees.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GeoBox {
    pub north: f64,
    pub west: f64,
    pub south: f64,
    pub east: f64,
}

impl Bounds {
    /// Creates bounds covering exactly one tile.
    pub fn new(tile: TileAddress) -> Self {
        Self {
            zoom: tile.z,
            min_x: tile.x,
            min_y: tile.y,
            max_x: tile.x,
            max_y: tile.y,
        }
    }

    /// Grows the bounds so they cover `tile` as well.
    ///
    /// # Panics
    /// Panics if `tile` is on a different zoom level.
    pub fn include(&mut self, tile: &TileAddress) {
        assert_eq!(tile.z, self.zoom, "tile is on a different zoom level");

        self.min_x = self.min_x.min(tile.x);
        self.min_y = self.min_y.min(tile.y);
        self.max_x = self.max_x.max(tile.x);
        self.max_y = self.max_y.max(tile.y);
    }

    /// Width in tiles.
    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    /// Height in tiles.
    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    pub fn contains(&self, tile: &TileAddress) -> bool {
        tile.z == self.zoom
            && (self.min_x..=self.max_x).contains(&tile.x)
            && (self.min_y..=self.max_y).contains(&tile.y)
    }

    /// The geographic area covered by the rectangle, from the north-western
    /// corner of the top-left tile to the south-eastern corner of the
    /// bottom-right tile.
    pub fn geo_box(&self) -> GeoBox {
        let (north, west) = TileAddress::new(self.zoom, self.min_x, self.min_y).nw_corner();
        let (south, east) =
            TileAddress::new(self.zoom, self.max_x + 1, self.max_y + 1).nw_corner();

        GeoBox {
            north,
            west,
            south,
            east,
        }
    }

    /// Iterates over every tile inside the rectangle, column by column.
    pub fn tiles(&self) -> impl Iterator<Item = TileAddress> {
        let (zoom, min_y, max_y) = (self.zoom, self.min_y, self.max_y);

        (self.min_x..=self.max_x)
            .flat_map(move |x| (min_y..=max_y).map(move |y| TileAddress::new(zoom, x, y)))
    }
}

/// Maps a longitude of exactly 180° onto -180°, the range the consuming
/// apps expect for the western edge of a map.
pub fn normalize_west(lon: f64) -> f64 {
    if lon == 180_f64 {
        -180_f64
    } else {
        lon
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_tile() {
        let bounds = Bounds::new(TileAddress::new(0, 0, 0));
        assert_eq!((bounds.width(), bounds.height()), (1, 1));
        assert_eq!(bounds.tiles().count(), 1);
    }

    #[test]
    fn grows_in_every_direction() {
        let mut bounds = Bounds::new(TileAddress::new(5, 10, 10));
        bounds.include(&TileAddress::new(5, 8, 12));
        bounds.include(&TileAddress::new(5, 11, 9));

        assert_eq!(
            bounds,
            Bounds {
                zoom: 5,
                min_x: 8,
                min_y: 9,
                max_x: 11,
                max_y: 12,
            }
        );
        assert_eq!((bounds.width(), bounds.height()), (4, 4));
        assert_eq!(bounds.tiles().count(), 16);
        assert!(bounds.contains(&TileAddress::new(5, 9, 10)));
        assert!(!bounds.contains(&TileAddress::new(4, 9, 10)));
    }

    #[test]
    #[should_panic]
    fn rejects_other_zoom() {
        Bounds::new(TileAddress::new(5, 1, 1)).include(&TileAddress::new(6, 1, 1));
    }

    #[test]
    fn whole_world_geo_box() {
        let geo = Bounds::new(TileAddress::new(0, 0, 0)).geo_box();
        assert_eq!((geo.west, geo.east), (-180.0, 180.0));
        assert!(geo.north > 85.0 && geo.south < -85.0);
    }

    #[test]
    fn quarter_geo_box() {
        let geo = Bounds::new(TileAddress::new(1, 1, 0)).geo_box();
        assert_eq!((geo.west, geo.east), (0.0, 180.0));
        assert!(geo.south.abs() < 1e-9);
    }

    #[test]
    fn west_normalization() {
        assert_eq!(normalize_west(180.0), -180.0);
        assert_eq!(normalize_west(12.5), 12.5);
    }
}
