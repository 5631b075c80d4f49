use std::collections::{btree_map, BTreeMap, BTreeSet};

use crate::bounds::Bounds;
use crate::tile::{Coordinate, TileAddress};

/// The tiles requested on one zoom level.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Layer {
    bounds: Option<Bounds>,
    tiles: BTreeSet<TileAddress>,
}

impl Layer {
    fn insert(&mut self, tile: TileAddress) {
        if self.tiles.insert(tile) {
            match &mut self.bounds {
                Some(bounds) => bounds.include(&tile),
                None => self.bounds = Some(Bounds::new(tile)),
            }
        }
    }

    /// The rectangle covering all tiles of this layer, `None` if the layer is empty.
    pub fn bounds(&self) -> Option<&Bounds> {
        self.bounds.as_ref()
    }

    pub fn tiles(&self) -> &BTreeSet<TileAddress> {
        &self.tiles
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }
}

/// Every tile a run has to deliver, grouped by zoom level.
///
/// Read-only once built.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Map {
    layers: BTreeMap<u8, Layer>,
    coordinate_count: usize,
}

impl Map {
    /// Folds the coordinates into one layer per requested zoom level.
    ///
    /// The coordinate sequence is consumed exactly once. Every requested zoom level
    /// gets a layer, even if no tile ends up in it.
    ///
    /// # Example
    /// ```rust
    /// # use offline_map_generator::{Coordinate, Map};
    /// let map = Map::build(vec![Coordinate::new(0.0, 0.0)], &[0, 1]);
    /// assert_eq!(map.tile_count(), 2);
    /// ```
    ///
    /// # Panics
    /// Panics if a zoom level exceeds [`MAX_ZOOM`](crate::MAX_ZOOM).
    pub fn build<I>(coordinates: I, zoom_levels: &[u8]) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Coordinate>,
    {
        let mut layers: BTreeMap<u8, Layer> = zoom_levels
            .iter()
            .map(|&zoom| (zoom, Layer::default()))
            .collect();
        let mut coordinate_count = 0;

        for coordinate in coordinates {
            let Coordinate { lat, lon } = coordinate.into();
            coordinate_count += 1;

            for (&zoom, layer) in layers.iter_mut() {
                layer.insert(TileAddress::from_coords_and_zoom(lat, lon, zoom));
            }
        }

        log::debug!(
            "built map from {} coordinates: {} tiles on {} zoom levels",
            coordinate_count,
            layers.values().map(Layer::len).sum::<usize>(),
            layers.len(),
        );

        Self {
            layers,
            coordinate_count,
        }
    }

    pub fn layer(&self, zoom: u8) -> Option<&Layer> {
        self.layers.get(&zoom)
    }

    pub fn layers(&self) -> btree_map::Iter<'_, u8, Layer> {
        self.layers.iter()
    }

    /// The requested zoom levels in ascending order.
    pub fn zoom_levels(&self) -> impl Iterator<Item = u8> + '_ {
        self.layers.keys().copied()
    }

    /// All tile addresses across all layers, ordered by zoom level.
    pub fn tiles(&self) -> impl Iterator<Item = &TileAddress> + '_ {
        self.layers.values().flat_map(|layer| layer.tiles.iter())
    }

    /// Number of distinct tiles across all layers.
    pub fn tile_count(&self) -> usize {
        self.layers.values().map(Layer::len).sum()
    }

    /// Number of coordinates the map was built from.
    pub fn coordinate_count(&self) -> usize {
        self.coordinate_count
    }
}
