use anyhow::{bail, Context, Result};
use rusqlite::params;
use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use super::{escape_xml, layer_geometries, map_name, sqlite::SqliteStore, LayerGeometry, Packager, TILE_SIZE};
use crate::map::Map;
use crate::tile::Tile;

const DB_FILE_NAME: &str = "OruxMapsImages.db";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS android_metadata (locale TEXT);
    CREATE TABLE IF NOT EXISTS tiles (x int, y int, z int, image blob, PRIMARY KEY (x,y,z));
    CREATE INDEX IF NOT EXISTS IND on tiles (x,y,z);
    INSERT INTO android_metadata (locale) VALUES ('en_US');
";

const INSERT_SQL: &str = "INSERT OR IGNORE INTO tiles (x,y,z,image) VALUES (?1, ?2, ?3, ?4)";

/// Writes an OruxMaps offline map: a directory holding `OruxMapsImages.db` and
/// `<name>.otrk2.xml`.
///
/// Tile indices are stored relative to the top-left tile of their layer, so
/// every zoom level starts at `(0, 0)`. An existing database is replaced.
pub struct OruxPackager {
    dir: PathBuf,
    name: String,
    map: Arc<Map>,
    store: Option<SqliteStore>,
    finalized: bool,
}

impl OruxPackager {
    /// `output` is the map's directory; its last component names the map.
    pub fn new(output: &Path, map: Arc<Map>) -> Self {
        Self {
            dir: output.to_owned(),
            name: map_name(output),
            map,
            store: None,
            finalized: false,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.join(DB_FILE_NAME)
    }

    pub fn descriptor_path(&self) -> PathBuf {
        self.dir.join(format!("{}.otrk2.xml", self.name))
    }

    fn descriptor(&self) -> String {
        let mut layers = String::new();

        for geometry in layer_geometries(&self.map) {
            write_layer(&mut layers, &self.name, &geometry);
        }

        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <OruxTracker xmlns=\"http://oruxtracker.com/app/res/calibration\" versionCode=\"3.0\">\n\
             <MapCalibration layers=\"true\" layerLevel=\"0\">\n\
             <MapName><![CDATA[{name}]]></MapName>\n\
             {layers}\
             </MapCalibration>\n\
             </OruxTracker>\n",
            name = cdata(&self.name),
            layers = layers,
        )
    }
}

/// Keeps `text` from closing the surrounding CDATA section early.
fn cdata(text: &str) -> String {
    text.replace("]]>", "]]]]><![CDATA[>")
}

fn write_layer(out: &mut String, name: &str, g: &LayerGeometry) {
    let x_max = (g.pixel_width + TILE_SIZE as u64 - 1) / TILE_SIZE as u64;
    let y_max = (g.pixel_height + TILE_SIZE as u64 - 1) / TILE_SIZE as u64;

    // writing into a String cannot fail
    let _ = write!(
        out,
        "<OruxTracker versionCode=\"2.1\">\n\
         <MapCalibration layers=\"false\" layerLevel=\"{zoom}\">\n\
         <MapName><![CDATA[{cdata_name} {zoom}]]></MapName>\n\
         <MapChunks xMax=\"{x_max}\" yMax=\"{y_max}\" datum=\"WGS84\" projection=\"Mercator\" \
         img_height=\"{tile}\" img_width=\"{tile}\" file_name=\"{xml_name} {zoom}\" />\n\
         <MapDimensions height=\"{height}\" width=\"{width}\" />\n\
         <MapBounds minLat=\"{south:.8}\" maxLat=\"{north:.8}\" minLon=\"{west:.8}\" maxLon=\"{east:.8}\" />\n\
         <CalibrationPoints>\n\
         <CalibrationPoint corner=\"TL\" lon=\"{west:.8}\" lat=\"{north:.8}\" />\n\
         <CalibrationPoint corner=\"BR\" lon=\"{east:.8}\" lat=\"{south:.8}\" />\n\
         <CalibrationPoint corner=\"TR\" lon=\"{east:.8}\" lat=\"{north:.8}\" />\n\
         <CalibrationPoint corner=\"BL\" lon=\"{west:.8}\" lat=\"{south:.8}\" />\n\
         </CalibrationPoints>\n\
         </MapCalibration>\n\
         </OruxTracker>\n",
        zoom = g.zoom,
        cdata_name = cdata(name),
        xml_name = escape_xml(name),
        x_max = x_max,
        y_max = y_max,
        tile = TILE_SIZE,
        height = g.pixel_height,
        width = g.pixel_width,
        south = g.south,
        north = g.north,
        west = g.west,
        east = g.east,
    );
}

impl Packager for OruxPackager {
    fn init(&mut self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed creating map directory {}", self.dir.display()))?;

        let db_path = self.db_path();
        if db_path.exists() {
            log::debug!("replacing existing database {}", db_path.display());
            fs::remove_file(&db_path)
                .with_context(|| format!("failed removing {}", db_path.display()))?;
        }

        let store = SqliteStore::open(&db_path)?;
        store.execute_batch(SCHEMA)?;
        self.store = Some(store);

        Ok(())
    }

    fn add_tile(&mut self, tile: Option<&Tile>) -> Result<()> {
        let tile = match tile {
            Some(tile) => tile,
            None => return Ok(()),
        };

        let address = tile.address;
        let bounds = match self.map.layer(address.z).and_then(|layer| layer.bounds()) {
            Some(bounds) if bounds.contains(&address) => *bounds,
            _ => bail!("tile {} is not part of the map", address),
        };

        let store = match self.store.as_mut() {
            Some(store) => store,
            None => bail!("OruxMaps packager used outside of init/finalize"),
        };

        store.insert(
            INSERT_SQL,
            params![
                address.x - bounds.min_x,
                address.y - bounds.min_y,
                address.z,
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
        let written = fs::create_dir_all(&self.dir)
            .and_then(|_| fs::write(&descriptor_path, self.descriptor()))
            .with_context(|| format!("failed writing {}", descriptor_path.display()));

        let committed = match self.store.take() {
            Some(mut store) => store.commit(),
            None => Ok(()),
        };

        written?;
        committed?;

        log::info!("wrote OruxMaps map {}", self.dir.display());
        Ok(())
    }
}
