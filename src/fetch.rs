use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{prelude::*, stream};
use reqwest::{header::RETRY_AFTER, StatusCode};
use std::{sync::Arc, time::Duration};
use thiserror::Error;

use crate::cache::{CacheStatus, TileCache};
use crate::config::Config;
use crate::map::Map;
use crate::source::TileSource;
use crate::tile::{is_image, Tile, TileAddress};

const ZERO_DURATION: Duration = Duration::from_secs(0);

/// Longest `Retry-After` we obey, in multiples of the configured retry delay.
const MAX_RETRY_AFTER_FACTOR: u32 = 10;

/// The tile server asked us to slow down.
#[derive(Debug, Error)]
#[error("tile server responded with 429 Too Many Requests")]
pub struct TooManyRequests {
    pub retry_after: Option<Duration>,
}

/// Something that can download a single tile image.
#[async_trait]
pub trait TileFetcher: Send + Sync {
    async fn fetch(&self, source: &TileSource, tile: &TileAddress) -> Result<Vec<u8>>;
}

/// Fetches tiles over HTTP(S).
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Creates a fetcher whose requests give up after `timeout`.
    ///
    /// Pass the zero duration to disable the timeout.
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(format!(
            "{}/{}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ));
        if timeout > ZERO_DURATION {
            builder = builder.timeout(timeout);
        }

        let client = builder.build().context("failed creating HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl TileFetcher for HttpFetcher {
    async fn fetch(&self, source: &TileSource, tile: &TileAddress) -> Result<Vec<u8>> {
        let url = source.url.tile_url(tile)?;
        log::trace!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed fetching tile {}", tile))?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|val| val.parse::<u64>().ok())
                .map(Duration::from_secs);

            return Err(TooManyRequests { retry_after }.into());
        }

        let body = response
            .error_for_status()
            .with_context(|| format!("received invalid status code fetching tile {}", tile))?
            .bytes()
            .await
            .with_context(|| format!("failed reading body of tile {}", tile))?;

        Ok(body.to_vec())
    }
}

/// The result of delivering one tile.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Fetched from the tile server (and written to the cache).
    Downloaded(Tile),

    /// Read from the local cache without touching the network.
    Cached(Tile),

    /// Could not be obtained; the tile is left out of the package.
    Failed {
        address: TileAddress,
        error: anyhow::Error,
    },
}

impl FetchOutcome {
    pub fn address(&self) -> &TileAddress {
        match self {
            FetchOutcome::Downloaded(tile) | FetchOutcome::Cached(tile) => &tile.address,
            FetchOutcome::Failed { address, .. } => address,
        }
    }

    pub fn tile(&self) -> Option<&Tile> {
        match self {
            FetchOutcome::Downloaded(tile) | FetchOutcome::Cached(tile) => Some(tile),
            FetchOutcome::Failed { .. } => None,
        }
    }
}

/// Delivers every tile of `map`, reading cached ones from disk and
/// downloading the rest.
///
/// At most `cfg.fetch_rate` tiles are in flight at once. Outcomes are yielded
/// as soon as they complete, so their order is unrelated to the order of the
/// tiles in the map.
pub fn fetch_all(
    fetcher: Arc<dyn TileFetcher>,
    cache: TileCache,
    source: Arc<TileSource>,
    map: &Map,
    status: &CacheStatus,
    cfg: &Config,
) -> impl Stream<Item = FetchOutcome> + Send + 'static {
    let jobs: Vec<(TileAddress, bool)> = map
        .tiles()
        .map(|tile| (*tile, status.is_cached(tile)))
        .collect();

    let retries = cfg.request_retries_amount;
    let retry_delay = cfg.retry_delay;

    stream::iter(jobs)
        .map(move |(tile, cached)| {
            let handle = tokio::spawn(fetch_one(
                fetcher.clone(),
                cache.clone(),
                source.clone(),
                tile,
                cached,
                retries,
                retry_delay,
            ));

            async move {
                handle.await.unwrap_or_else(|e| FetchOutcome::Failed {
                    address: tile,
                    error: anyhow!(e).context(format!("fetch task for tile {} died", tile)),
                })
            }
        })
        .buffer_unordered((cfg.fetch_rate as usize).max(1))
}

async fn fetch_one(
    fetcher: Arc<dyn TileFetcher>,
    cache: TileCache,
    source: Arc<TileSource>,
    tile: TileAddress,
    cached: bool,
    retries: u8,
    retry_delay: Duration,
) -> FetchOutcome {
    if cached {
        match cache.read(&source, &tile).await {
            Ok(image) => return FetchOutcome::Cached(Tile::new(tile, source.name.clone(), image)),
            Err(e) => log::warn!("{:#}, downloading it again", e),
        }
    }

    let mut attempt = 0;
    let image = loop {
        let res = fetcher.fetch(&source, &tile).await.and_then(|data| {
            if is_image(&data) {
                Ok(data)
            } else {
                Err(anyhow!("tile {} is not a valid image ({} bytes)", tile, data.len()))
            }
        });

        match res {
            Ok(data) => break data,
            Err(e) if attempt < retries => {
                attempt += 1;
                let delay = match e.downcast_ref::<TooManyRequests>().and_then(|r| r.retry_after) {
                    Some(wait) => wait.min(retry_delay * MAX_RETRY_AFTER_FACTOR),
                    None => retry_delay * attempt as u32,
                };

                log::debug!(
                    "attempt {} for tile {} failed: {:#}, retrying in {:?}",
                    attempt,
                    tile,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(error) => {
                return FetchOutcome::Failed {
                    address: tile,
                    error,
                }
            }
        }
    };

    if let Err(e) = cache.write(&source, &tile, &image).await {
        log::warn!("{:#}", e);
    }

    FetchOutcome::Downloaded(Tile::new(tile, source.name.clone(), image))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packager::Format;
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\ntile";

    /// Serves PNGs after a per-tile delay, failing the first `failures` requests of a tile.
    #[derive(Default)]
    struct ScriptedFetcher {
        delays: HashMap<TileAddress, Duration>,
        failures: Mutex<HashMap<TileAddress, usize>>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl TileFetcher for ScriptedFetcher {
        async fn fetch(&self, _: &TileSource, tile: &TileAddress) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let delay = self
                .delays
                .get(tile)
                .copied()
                .unwrap_or(Duration::from_millis(5));
            tokio::time::sleep(delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(tile) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    Err(anyhow!("connection reset"))
                }
                _ => Ok(PNG.to_vec()),
            }
        }
    }

    fn source() -> Arc<TileSource> {
        Arc::new(TileSource::new("test", "https://example.com/{z}/{x}/{y}.png"))
    }

    fn config(rate: u8, retries: u8) -> Config {
        let mut cfg = Config::new("out", Format::BCNav);
        cfg.fetch_rate = rate;
        cfg.request_retries_amount = retries;
        cfg.retry_delay = Duration::from_millis(1);
        cfg
    }

    async fn run(
        fetcher: Arc<ScriptedFetcher>,
        cache: &TileCache,
        map: &Map,
        cfg: &Config,
    ) -> Vec<FetchOutcome> {
        let status = cache.check(&source(), map, cfg.fetch_existing).await;
        fetch_all(fetcher, cache.clone(), source(), map, &status, cfg)
            .collect()
            .await
    }

    #[tokio::test]
    async fn yields_in_completion_order() {
        let dir = tempfile::tempdir().unwrap();
        let map = Map::build(vec![(0.0, 0.0)], &[0, 1]);
        let slow = TileAddress::new(0, 0, 0);

        let mut fetcher = ScriptedFetcher::default();
        fetcher.delays.insert(slow, Duration::from_millis(300));

        let outcomes = run(Arc::new(fetcher), &TileCache::new(dir.path()), &map, &config(4, 0)).await;

        let order: Vec<_> = outcomes.iter().map(|o| *o.address()).collect();
        assert_eq!(order, vec![TileAddress::new(1, 1, 1), slow]);
    }

    #[tokio::test]
    async fn limits_parallel_requests() {
        let dir = tempfile::tempdir().unwrap();
        let points = (0..8).map(|i| (0.0, -170.0 + i as f64 * 40.0));
        let map = Map::build(points, &[3]);
        let fetcher = Arc::new(ScriptedFetcher::default());

        let outcomes = run(fetcher.clone(), &TileCache::new(dir.path()), &map, &config(2, 0)).await;

        assert_eq!(outcomes.len(), 8);
        assert!(fetcher.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn cached_tiles_skip_the_network() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TileCache::new(dir.path());
        let map = Map::build(vec![(0.0, 0.0)], &[0]);

        let first = Arc::new(ScriptedFetcher::default());
        let outcomes = run(first.clone(), &cache, &map, &config(1, 0)).await;
        assert!(matches!(outcomes[0], FetchOutcome::Downloaded(_)));
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);

        let second = Arc::new(ScriptedFetcher::default());
        let outcomes = run(second.clone(), &cache, &map, &config(1, 0)).await;
        assert!(matches!(outcomes[0], FetchOutcome::Cached(_)));
        assert_eq!(outcomes[0].tile().unwrap().image, PNG);
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn retries_failed_requests() {
        let dir = tempfile::tempdir().unwrap();
        let map = Map::build(vec![(0.0, 0.0)], &[0]);
        let fetcher = ScriptedFetcher::default();
        fetcher
            .failures
            .lock()
            .unwrap()
            .insert(TileAddress::new(0, 0, 0), 2);
        let fetcher = Arc::new(fetcher);

        let outcomes = run(fetcher.clone(), &TileCache::new(dir.path()), &map, &config(1, 2)).await;

        assert!(matches!(outcomes[0], FetchOutcome::Downloaded(_)));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_retries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TileCache::new(dir.path());
        let map = Map::build(vec![(0.0, 0.0)], &[0]);
        let fetcher = ScriptedFetcher::default();
        fetcher
            .failures
            .lock()
            .unwrap()
            .insert(TileAddress::new(0, 0, 0), 5);

        let outcomes = run(Arc::new(fetcher), &cache, &map, &config(1, 1)).await;

        assert!(matches!(outcomes[0], FetchOutcome::Failed { .. }));
        assert!(!cache.contains(&source(), &TileAddress::new(0, 0, 0)).await);
    }

    #[tokio::test]
    async fn caps_retry_after() {
        #[derive(Default)]
        struct RateLimited {
            calls: AtomicUsize,
        }

        #[async_trait]
        impl TileFetcher for RateLimited {
            async fn fetch(&self, _: &TileSource, _: &TileAddress) -> Result<Vec<u8>> {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(TooManyRequests {
                        retry_after: Some(Duration::from_secs(3600)),
                    }
                    .into())
                } else {
                    Ok(PNG.to_vec())
                }
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let cache = TileCache::new(dir.path());
        let map = Map::build(vec![(0.0, 0.0)], &[0]);
        let status = cache.check(&source(), &map, false).await;
        let fetcher = Arc::new(RateLimited::default());

        let outcomes: Vec<_> = tokio::time::timeout(
            Duration::from_secs(5),
            fetch_all(fetcher.clone(), cache, source(), &map, &status, &config(1, 1)).collect::<Vec<_>>(),
        )
        .await
        .unwrap();

        assert!(matches!(outcomes[0], FetchOutcome::Downloaded(_)));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rejects_non_images() {
        struct HtmlFetcher;

        #[async_trait]
        impl TileFetcher for HtmlFetcher {
            async fn fetch(&self, _: &TileSource, _: &TileAddress) -> Result<Vec<u8>> {
                Ok(b"<html>quota exceeded</html>".to_vec())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let cache = TileCache::new(dir.path());
        let map = Map::build(vec![(0.0, 0.0)], &[0]);
        let status = cache.check(&source(), &map, false).await;

        let outcomes: Vec<_> = fetch_all(
            Arc::new(HtmlFetcher),
            cache,
            source(),
            &map,
            &status,
            &config(1, 0),
        )
        .collect()
        .await;

        assert!(matches!(outcomes[0], FetchOutcome::Failed { .. }));
    }
}
