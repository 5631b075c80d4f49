use anyhow::Result;
use futures::prelude::*;
use std::{path::PathBuf, sync::Arc};

use crate::cache::TileCache;
use crate::config::Config;
use crate::error::InputError;
use crate::fetch::{fetch_all, FetchOutcome, TileFetcher};
use crate::map::Map;
use crate::packager::Packager;
use crate::source::TileSource;
use crate::tile::Coordinate;

/// Receives status updates of a run and decides whether downloads may start.
///
/// Methods are called from the thread driving the run; forwarding them to a UI
/// thread is up to the implementor.
pub trait RunObserver: Send + Sync {
    /// The run entered a new phase or made progress worth telling the user.
    fn on_status(&self, message: &str);

    /// Overall progress in percent (0 to 100).
    fn on_progress(&self, percent: u8);

    /// Asked once, before the first download, with the number of tiles that
    /// are not cached yet. Returning `false` aborts the run.
    fn confirm(&self, missing: usize) -> bool;
}

/// An observer that stays quiet and agrees to every download.
#[derive(Clone, Copy, Debug, Default)]
pub struct SilentObserver;

impl RunObserver for SilentObserver {
    fn on_status(&self, _: &str) {}

    fn on_progress(&self, _: u8) {}

    fn confirm(&self, _: usize) -> bool {
        true
    }
}

/// How a run ended.
#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    /// The observer declined to download `missing` tiles; nothing was written.
    Declined { missing: usize },

    /// The package was written.
    Completed(RunSummary),
}

/// Tile counts of a completed run.
#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    /// Distinct tiles across all zoom levels.
    pub requested: usize,

    /// Tiles read from the local cache.
    pub from_cache: usize,

    /// Tiles fetched from the tile server.
    pub downloaded: usize,

    /// Tiles that could not be obtained and are missing from the package.
    pub skipped: usize,

    /// Where the package was written.
    pub output: PathBuf,
}

/// Checks the request before anything touches the disk or network.
fn validate(cfg: &Config, source: &TileSource, zoom_levels: &[u8]) -> Result<()> {
    source.validate()?;

    if cfg.map_name().is_none() {
        return Err(InputError::EmptyOutputName.into());
    }

    if zoom_levels.is_empty() {
        return Err(InputError::NoZoomLevels.into());
    }

    // a valid source never reaches past `MAX_ZOOM`
    if let Some(&zoom) = zoom_levels.iter().find(|&&z| !source.supports_zoom(z)) {
        return Err(InputError::ZoomOutOfRange {
            zoom,
            min: source.min_zoom,
            max: source.max_zoom,
        }
        .into());
    }

    Ok(())
}

/// Builds an offline map from `coordinates`.
///
/// Works out which tiles cover the coordinates on every zoom level, asks the
/// observer for permission to download the ones missing from the cache, then
/// streams all tiles into the package selected by `cfg.format`. Tiles that
/// cannot be fetched are skipped and counted in [`RunSummary::skipped`].
///
/// The package is finalized even if writing a tile fails part way; that error
/// is returned afterwards.
pub async fn generate<I>(
    cfg: &Config,
    source: Arc<TileSource>,
    coordinates: I,
    zoom_levels: &[u8],
    fetcher: Arc<dyn TileFetcher>,
    observer: &dyn RunObserver,
) -> Result<RunOutcome>
where
    I: IntoIterator,
    I::Item: Into<Coordinate>,
{
    validate(cfg, &source, zoom_levels)?;

    observer.on_status("Reading input");
    let map = Map::build(coordinates, zoom_levels);
    if map.coordinate_count() == 0 {
        return Err(InputError::NoCoordinates.into());
    }
    let map = Arc::new(map);
    let total = map.tile_count();

    observer.on_status("Checking cache");
    let cache = TileCache::new(&cfg.cache_folder);
    let status = cache.check(&source, &map, cfg.fetch_existing).await;
    log::info!(
        "{} tiles requested, {} cached, {} to download from {}",
        total,
        status.cached(),
        status.missing(),
        source.name,
    );

    if status.missing() > 0 && !observer.confirm(status.missing()) {
        log::info!("download of {} tiles declined", status.missing());
        observer.on_status("Cancelled");
        return Ok(RunOutcome::Declined {
            missing: status.missing(),
        });
    }

    let mut packager = cfg.format.packager(&cfg.output, map.clone(), &source);
    packager.init()?;

    let mut summary = RunSummary {
        requested: total,
        from_cache: 0,
        downloaded: 0,
        skipped: 0,
        output: cfg.output.clone(),
    };

    let outcomes = fetch_all(fetcher, cache, source.clone(), &map, &status, cfg);
    let packaged = package(packager.as_mut(), outcomes, &mut summary, observer).await;
    let finalized = packager.finalize();

    packaged?;
    finalized?;

    observer.on_progress(100);
    observer.on_status(&format!("Done downloading {} tiles", total));
    if summary.skipped > 0 {
        log::warn!("{} of {} tiles could not be fetched", summary.skipped, total);
    }

    Ok(RunOutcome::Completed(summary))
}

/// Feeds tiles into the packager as they arrive.
async fn package<S>(
    packager: &mut (dyn Packager + Send),
    outcomes: S,
    summary: &mut RunSummary,
    observer: &dyn RunObserver,
) -> Result<()>
where
    S: Stream<Item = FetchOutcome>,
{
    futures::pin_mut!(outcomes);

    let total = summary.requested.max(1);
    let mut current = 0;
    let mut prev_percentage = None;

    while let Some(outcome) = outcomes.next().await {
        match &outcome {
            FetchOutcome::Downloaded(_) => summary.downloaded += 1,
            FetchOutcome::Cached(_) => summary.from_cache += 1,
            FetchOutcome::Failed { address, error } => {
                log::warn!("skipping tile {}: {:#}", address, error);
                summary.skipped += 1;
            }
        }

        packager.add_tile(outcome.tile())?;

        current += 1;
        let percentage = (100 * current / total) as u8;
        if prev_percentage.map_or(true, |prev| percentage > prev) {
            prev_percentage = Some(percentage);
            observer.on_progress(percentage);
            observer.on_status(&format!("{}/{} tiles downloaded", current, summary.requested));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::packager::Format;

    fn source() -> Arc<TileSource> {
        Arc::new(
            TileSource::new("test", "https://example.com/{z}/{x}/{y}.png").with_zoom_range(0, 16),
        )
    }

    #[test]
    fn rejects_missing_zoom_levels() {
        let cfg = Config::new("out/map", Format::OruxMaps);
        let err = validate(&cfg, &source(), &[]).unwrap_err();
        assert_eq!(err.downcast_ref::<InputError>(), Some(&InputError::NoZoomLevels));
    }

    #[test]
    fn rejects_empty_output_name() {
        let cfg = Config::new("", Format::OruxMaps);
        let err = validate(&cfg, &source(), &[3]).unwrap_err();
        assert_eq!(err.downcast_ref::<InputError>(), Some(&InputError::EmptyOutputName));
    }

    #[test]
    fn rejects_unsupported_zoom_levels() {
        let cfg = Config::new("out/map", Format::BCNav);
        let err = validate(&cfg, &source(), &[3, 17]).unwrap_err();
        assert_eq!(
            err.downcast_ref::<InputError>(),
            Some(&InputError::ZoomOutOfRange {
                zoom: 17,
                min: 0,
                max: 16,
            })
        );
    }

    #[test]
    fn rejects_zoom_levels_below_the_source() {
        let cfg = Config::new("out/map", Format::OruxMaps);
        let topo = TileSource::new("topo", "https://example.com/{z}/{x}/{y}.png").with_zoom_range(4, 16);
        let err = validate(&cfg, &topo, &[2, 8]).unwrap_err();
        assert_eq!(
            err.downcast_ref::<InputError>(),
            Some(&InputError::ZoomOutOfRange {
                zoom: 2,
                min: 4,
                max: 16,
            })
        );
    }

    #[test]
    fn rejects_invalid_sources() {
        let cfg = Config::new("out/map", Format::BCNav);
        let broken = TileSource::new("", "https://example.com/{z}/{x}/{y}.png");
        let err = validate(&cfg, &broken, &[3]).unwrap_err();
        assert_eq!(err.downcast_ref::<SourceError>(), Some(&SourceError::EmptyName));
    }

    #[test]
    fn accepts_valid_requests() {
        let cfg = Config::new("out/map", Format::BCNav);
        assert!(validate(&cfg, &source(), &[0, 16]).is_ok());
    }
}
