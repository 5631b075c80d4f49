use anyhow::{bail, Context, Result};
use rusqlite::params;
use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use super::{escape_xml, layer_geometries, map_name, sqlite::SqliteStore, Packager};
use crate::map::Map;
use crate::tile::Tile;

/// RMaps stores zoom levels inverted, as `17 - zoom`.
const RMAPS_ZOOM_BASE: i32 = 17;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS tiles (x int, y int, z int, s int, image blob, PRIMARY KEY (x,y,z,s));
    CREATE TABLE IF NOT EXISTS info (minzoom int, maxzoom int);
    CREATE TABLE IF NOT EXISTS android_metadata (locale TEXT);
";

const INSERT_SQL: &str = "INSERT OR IGNORE INTO tiles (x,y,z,s,image) VALUES (?1, ?2, ?3, 0, ?4)";

/// Writes a BackCountry Navigator map: `<output>.sqlitedb` in the RMaps layout
/// and a `<output>.xml` descriptor.
///
/// Tiles keep their global indices. An existing database is extended rather
/// than replaced.
pub struct BCNavPackager {
    output: PathBuf,
    name: String,
    attribution: String,
    map: Arc<Map>,
    store: Option<SqliteStore>,
    finalized: bool,
}

impl BCNavPackager {
    pub fn new(output: &Path, map: Arc<Map>, attribution: &str) -> Self {
        Self {
            output: output.to_owned(),
            name: map_name(output),
            attribution: attribution.to_owned(),
            map,
            store: None,
            finalized: false,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.output.with_extension("sqlitedb")
    }

    pub fn descriptor_path(&self) -> PathBuf {
        self.output.with_extension("xml")
    }

    fn zoom_range(&self) -> Option<(u8, u8)> {
        let mut zooms = layer_geometries(&self.map).map(|g| g.zoom);
        let min = zooms.next()?;
        Some((min, zooms.last().unwrap_or(min)))
    }

    fn descriptor(&self) -> String {
        let mut out = String::new();
        let (min_zoom, max_zoom) = self.zoom_range().unwrap_or((0, 0));

        // writing into a String cannot fail
        let _ = write!(
            out,
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <BCNavMap version=\"1\">\n\
             \x20 <Name>{}</Name>\n\
             \x20 <Attribution>{}</Attribution>\n\
             \x20 <Projection>EPSG:3857</Projection>\n\
             \x20 <TileSize>{}</TileSize>\n\
             \x20 <MinZoom>{}</MinZoom>\n\
             \x20 <MaxZoom>{}</MaxZoom>\n\
             \x20 <Layers>\n",
            escape_xml(&self.name),
            escape_xml(&self.attribution),
            super::TILE_SIZE,
            min_zoom,
            max_zoom,
        );

        for g in layer_geometries(&self.map) {
            let _ = write!(
                out,
                "    <Layer zoom=\"{}\" minX=\"{}\" minY=\"{}\" maxX=\"{}\" maxY=\"{}\" width=\"{}\" height=\"{}\">\n\
                 \x20     <Bounds north=\"{:.8}\" south=\"{:.8}\" west=\"{:.8}\" east=\"{:.8}\" />\n\
                 \x20   </Layer>\n",
                g.zoom,
                g.bounds.min_x,
                g.bounds.min_y,
                g.bounds.max_x,
                g.bounds.max_y,
                g.bounds.width(),
                g.bounds.height(),
                g.north,
                g.south,
                g.west,
                g.east,
            );
        }

        out.push_str("  </Layers>\n</BCNavMap>\n");
        out
    }
}

impl Packager for BCNavPackager {
    fn init(&mut self) -> Result<()> {
        if let Some(dir) = self.output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed creating output directory {}", dir.display()))?;
        }

        let store = SqliteStore::open(&self.db_path())?;
        store.execute_batch(SCHEMA)?;
        self.store = Some(store);

        Ok(())
    }

    fn add_tile(&mut self, tile: Option<&Tile>) -> Result<()> {
        let tile = match tile {
            Some(tile) => tile,
            None => return Ok(()),
        };

        let store = match self.store.as_mut() {
            Some(store) => store,
            None => bail!("BCNav packager used outside of init/finalize"),
        };

        let address = tile.address;
        store.insert(
            INSERT_SQL,
            params![
                address.x,
                address.y,
                RMAPS_ZOOM_BASE - address.z as i32,
                tile.image
            ],
        )?;

        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;

        let descriptor_path = self.descriptor_path();
        let written = fs::write(&descriptor_path, self.descriptor())
            .with_context(|| format!("failed writing {}", descriptor_path.display()));

        let zoom_range = self.zoom_range();
        let committed = match self.store.take() {
            Some(mut store) => store.commit().and_then(|_| match zoom_range {
                Some((min, max)) => write_info(&store, min, max),
                None => Ok(()),
            }),
            None => Ok(()),
        };

        written?;
        committed?;

        log::info!("wrote BCNav map {}", self.db_path().display());
        Ok(())
    }
}

/// Replaces the zoom range in `info` along with the Android locale.
fn write_info(store: &SqliteStore, min_zoom: u8, max_zoom: u8) -> Result<()> {
    let tx = store
        .conn()
        .unchecked_transaction()
        .context("failed starting transaction")?;
    tx.execute_batch(&format!(
        "DELETE FROM info; \
         INSERT INTO info (minzoom, maxzoom) VALUES ({}, {}); \
         DELETE FROM android_metadata; \
         INSERT INTO android_metadata (locale) VALUES ('en_US');",
        RMAPS_ZOOM_BASE - max_zoom as i32,
        RMAPS_ZOOM_BASE - min_zoom as i32,
    ))
    .context("failed writing map info")?;
    tx.commit().context("failed committing map info")
}
