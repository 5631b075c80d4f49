//! Loading tile sources from a JSON catalog file.
//!
//! A catalog is an array of entries like
//!
//! ```json
//! [
//!   {
//!     "name": "OpenStreetMap",
//!     "url": "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png",
//!     "minZoom": 0,
//!     "maxZoom": 19,
//!     "attribution": "© OpenStreetMap contributors"
//!   }
//! ]
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{fs, path::Path};

use crate::source::TileSource;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogEntry {
    name: String,
    url: String,
    #[serde(default)]
    min_zoom: u8,
    #[serde(default = "default_max_zoom")]
    max_zoom: u8,
    #[serde(default)]
    attribution: String,
    cache_dir: Option<String>,
}

fn default_max_zoom() -> u8 {
    18
}

impl From<CatalogEntry> for TileSource {
    fn from(entry: CatalogEntry) -> Self {
        let source = TileSource::new(entry.name, entry.url)
            .with_zoom_range(entry.min_zoom, entry.max_zoom)
            .with_attribution(entry.attribution);

        match entry.cache_dir {
            Some(dir) => source.with_cache_dir(dir),
            None => source,
        }
    }
}

/// Parses a catalog from its JSON text, validating every entry.
pub fn parse(json: &str) -> Result<Vec<TileSource>> {
    let entries: Vec<CatalogEntry> =
        serde_json::from_str(json).context("malformed source catalog")?;

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            let source = TileSource::from(entry);
            source
                .validate()
                .with_context(|| format!("invalid catalog entry #{}", index + 1))?;
            Ok(source)
        })
        .collect()
}

/// Reads and parses the catalog at `path`.
pub fn load(path: &Path) -> Result<Vec<TileSource>> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("failed reading source catalog {}", path.display()))?;

    let sources = parse(&json)?;
    log::debug!("loaded {} sources from {}", sources.len(), path.display());

    Ok(sources)
}

/// Looks up a source by name, ignoring case.
pub fn find<'a>(sources: &'a [TileSource], name: &str) -> Option<&'a TileSource> {
    sources
        .iter()
        .find(|source| source.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;

    const CATALOG: &str = r#"[
        {
            "name": "OpenStreetMap",
            "url": "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png",
            "maxZoom": 19,
            "attribution": "OSM contributors"
        },
        {
            "name": "Topo",
            "url": "https://tiles.example.com/topo/{z}/{x}/{y}.jpg",
            "minZoom": 4,
            "maxZoom": 16,
            "cacheDir": "topo-cache"
        }
    ]"#;

    #[test]
    fn parses_entries() {
        let sources = parse(CATALOG).unwrap();

        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].min_zoom, 0);
        assert_eq!(sources[0].max_zoom, 19);
        assert_eq!(sources[0].cache_dir, "OpenStreetMap");
        assert_eq!(sources[1].cache_dir, "topo-cache");
        assert_eq!(sources[1].file_extension(), "jpg");
    }

    #[test]
    fn finds_by_name() {
        let sources = parse(CATALOG).unwrap();
        assert_eq!(find(&sources, "topo").unwrap().min_zoom, 4);
        assert!(find(&sources, "bing").is_none());
    }

    #[test]
    fn reports_invalid_entries() {
        let err = parse(r#"[{ "name": "bad", "url": "https://example.com/{z}/{x}" }]"#)
            .unwrap_err();

        assert!(err.to_string().contains("#1"));
        assert!(matches!(
            err.downcast_ref::<SourceError>(),
            Some(SourceError::MissingPlaceholder { placeholder: 'y', .. })
        ));
    }

    #[test]
    fn reports_malformed_json() {
        assert!(parse("{ not json").is_err());
    }
}
