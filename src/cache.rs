use anyhow::{Context, Result};
use std::{collections::HashSet, path::PathBuf};
use tokio::fs;

use crate::map::Map;
use crate::source::TileSource;
use crate::tile::TileAddress;

/// On-disk store of previously downloaded tiles, laid out as
/// `<root>/<source>/<z>/<x>/<y>.<ext>`.
#[derive(Clone, Debug, PartialEq)]
pub struct TileCache {
    root: PathBuf,
}

/// Which tiles of a [`Map`] can be served from the cache.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CacheStatus {
    cached: HashSet<TileAddress>,
    missing: usize,
}

impl CacheStatus {
    /// Number of tiles that have to be downloaded.
    pub fn missing(&self) -> usize {
        self.missing
    }

    /// Number of tiles already on disk.
    pub fn cached(&self) -> usize {
        self.cached.len()
    }

    pub fn is_cached(&self, tile: &TileAddress) -> bool {
        self.cached.contains(tile)
    }
}

impl TileCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Where the given tile of `source` lives on disk.
    pub fn path(&self, source: &TileSource, tile: &TileAddress) -> PathBuf {
        let mut target = self.root.join(&source.cache_dir);
        target.push(tile.z.to_string());
        target.push(tile.x.to_string());
        target.push(format!("{}.{}", tile.y, source.file_extension()));

        target
    }

    pub async fn contains(&self, source: &TileSource, tile: &TileAddress) -> bool {
        // unreadable metadata counts as a miss, the tile is simply fetched again
        fs::metadata(self.path(source, tile))
            .await
            .map(|meta| meta.is_file() && meta.len() > 0)
            .unwrap_or(false)
    }

    /// Determines which tiles of `map` are already cached.
    ///
    /// With `fetch_existing` set every tile is reported missing.
    pub async fn check(&self, source: &TileSource, map: &Map, fetch_existing: bool) -> CacheStatus {
        let mut cached = HashSet::new();
        if !fetch_existing {
            for tile in map.tiles() {
                if self.contains(source, tile).await {
                    cached.insert(*tile);
                }
            }
        }
        let missing = map.tile_count() - cached.len();

        log::debug!(
            "cache {}: {} tiles cached, {} missing",
            self.root.display(),
            cached.len(),
            missing,
        );

        CacheStatus { cached, missing }
    }

    pub async fn read(&self, source: &TileSource, tile: &TileAddress) -> Result<Vec<u8>> {
        let path = self.path(source, tile);

        fs::read(&path)
            .await
            .with_context(|| format!("failed reading cached tile {}", path.display()))
    }

    /// Stores a tile, replacing any previous version.
    ///
    /// The data is written to a temporary sibling first and then renamed into
    /// place, so readers never observe a half-written file.
    pub async fn write(&self, source: &TileSource, tile: &TileAddress, data: &[u8]) -> Result<()> {
        let target = self.path(source, tile);
        let dir = target
            .parent()
            .context("cache path has no parent directory")?;

        fs::create_dir_all(dir).await.with_context(|| {
            format!("failed creating cache directory for tile {}", tile)
        })?;

        let partial = target.with_extension("part");
        fs::write(&partial, data)
            .await
            .with_context(|| format!("failed writing tile {} to cache", tile))?;
        fs::rename(&partial, &target)
            .await
            .with_context(|| format!("failed moving tile {} into cache", tile))?;

        Ok(())
    }
}
