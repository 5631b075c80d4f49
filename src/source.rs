use anyhow::{Context, Result};
use maplit::hashmap;
use std::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};
use strfmt::strfmt;

use crate::error::SourceError;
use crate::tile::{TileAddress, MAX_ZOOM};

const OSM_SERVERS: &[&str] = &["a", "b", "c"];

/// A tile URL template with the replacement specifiers `{x}`, `{y}` and `{z}`,
/// and optionally `{s}` which cycles through the `a`, `b` and `c` subdomains.
pub struct UrlFormat {
    inc: AtomicUsize,
    format_str: String,
}

impl UrlFormat {
    pub fn from_str(format_str: impl Into<String>) -> Self {
        Self {
            inc: AtomicUsize::new(0),
            format_str: format_str.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.format_str
    }

    pub fn tile_url(&self, tile: &TileAddress) -> Result<String> {
        let inc = self.inc.fetch_add(1, Ordering::Relaxed);
        let vars = hashmap! {
            "s".to_owned() => OSM_SERVERS[inc % OSM_SERVERS.len()].to_owned(),
            "x".to_owned() => tile.x.to_string(),
            "y".to_owned() => tile.y.to_string(),
            "z".to_owned() => tile.z.to_string(),
        };

        strfmt(&self.format_str, &vars).context("failed formatting URL")
    }

    /// File extension of the URL's path, e.g. `png` for `.../{y}.png?key=abc`.
    fn extension(&self) -> Option<&str> {
        let path = self.format_str.split(['?', '#']).next()?;
        let (_, ext) = path.rsplit_once('/')?.1.rsplit_once('.')?;

        let plausible = !ext.is_empty()
            && ext.len() <= 4
            && ext.chars().all(|c| c.is_ascii_alphanumeric());
        plausible.then_some(ext)
    }
}

impl Clone for UrlFormat {
    fn clone(&self) -> Self {
        Self::from_str(self.format_str.clone())
    }
}

impl PartialEq for UrlFormat {
    fn eq(&self, other: &Self) -> bool {
        self.format_str == other.format_str
    }
}

impl fmt::Debug for UrlFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlFormat")
            .field("format_str", &self.format_str)
            .finish()
    }
}

/// A remote tile provider.
#[derive(Clone, Debug, PartialEq)]
pub struct TileSource {
    pub name: String,
    pub url: UrlFormat,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub attribution: String,

    /// Directory below the cache root holding this source's tiles.
    pub cache_dir: String,
}

impl TileSource {
    /// Creates a source covering zoom levels 0 to 18 with a cache directory
    /// derived from its name.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        let name = name.into();
        let cache_dir = sanitize(&name);

        Self {
            name,
            url: UrlFormat::from_str(url),
            min_zoom: 0,
            max_zoom: 18,
            attribution: String::new(),
            cache_dir,
        }
    }

    pub fn with_zoom_range(mut self, min_zoom: u8, max_zoom: u8) -> Self {
        self.min_zoom = min_zoom;
        self.max_zoom = max_zoom;
        self
    }

    pub fn with_attribution(mut self, attribution: impl Into<String>) -> Self {
        self.attribution = attribution.into();
        self
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<String>) -> Self {
        self.cache_dir = sanitize(&cache_dir.into());
        self
    }

    /// Makes sure tiles can actually be requested from this source.
    pub fn validate(&self) -> Result<(), SourceError> {
        if self.name.trim().is_empty() {
            return Err(SourceError::EmptyName);
        }

        for placeholder in ['x', 'y', 'z'] {
            if !self.url.as_str().contains(&format!("{{{}}}", placeholder)) {
                return Err(SourceError::MissingPlaceholder {
                    source_name: self.name.clone(),
                    placeholder,
                });
            }
        }

        if self.min_zoom > self.max_zoom || self.max_zoom > MAX_ZOOM {
            return Err(SourceError::InvalidZoomRange {
                source_name: self.name.clone(),
                min: self.min_zoom,
                max: self.max_zoom,
            });
        }

        Ok(())
    }

    /// Whether the source serves tiles on the given zoom level.
    pub fn supports_zoom(&self, zoom: u8) -> bool {
        (self.min_zoom..=self.max_zoom).contains(&zoom)
    }

    /// Extension used for cached tile files.
    pub fn file_extension(&self) -> &str {
        self.url.extension().unwrap_or("png")
    }
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    match cleaned.trim_matches('.') {
        "" => "default".to_owned(),
        s => s.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OSM: &str = "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png";

    #[test]
    fn formats_urls() {
        let url = UrlFormat::from_str(OSM);
        let tile = TileAddress::new(3, 4, 5);

        assert_eq!(
            url.tile_url(&tile).unwrap(),
            "https://a.tile.openstreetmap.org/3/4/5.png"
        );
        assert_eq!(
            url.tile_url(&tile).unwrap(),
            "https://b.tile.openstreetmap.org/3/4/5.png"
        );
    }

    #[test]
    fn rejects_unknown_specifiers() {
        let url = UrlFormat::from_str("https://example.com/{q}/{z}/{x}/{y}");
        assert!(url.tile_url(&TileAddress::new(0, 0, 0)).is_err());
    }

    #[test]
    fn validates_placeholders() {
        let source = TileSource::new("broken", "https://example.com/{z}/{x}.png");
        assert_eq!(
            source.validate(),
            Err(SourceError::MissingPlaceholder {
                source_name: "broken".to_owned(),
                placeholder: 'y',
            })
        );
        assert!(TileSource::new("osm", OSM).validate().is_ok());
    }

    #[test]
    fn validates_zoom_range() {
        let source = TileSource::new("osm", OSM).with_zoom_range(10, 2);
        assert!(matches!(
            source.validate(),
            Err(SourceError::InvalidZoomRange { .. })
        ));
        assert!(!TileSource::new("osm", OSM).supports_zoom(19));
    }

    #[test]
    fn derives_file_extension() {
        assert_eq!(TileSource::new("osm", OSM).file_extension(), "png");
        assert_eq!(
            TileSource::new("sat", "https://example.com/{z}/{y}/{x}.jpg?key=1").file_extension(),
            "jpg"
        );
        assert_eq!(
            TileSource::new("wmts", "https://example.com/tile?z={z}&x={x}&y={y}").file_extension(),
            "png"
        );
    }

    #[test]
    fn sanitizes_cache_dir() {
        assert_eq!(TileSource::new("Open Topo/Map", OSM).cache_dir, "Open_Topo_Map");
        assert_eq!(TileSource::new("osm", OSM).with_cache_dir("..").cache_dir, "default");
    }
}
