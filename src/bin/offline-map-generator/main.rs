mod args;
mod input;
mod validators;

use anyhow::{Context, Result};
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;

use args::Args;
use input::CoordinateReader;
use offline_map_generator::{
    generate, Config, HttpFetcher, Map, RunObserver, RunOutcome, TileCache,
};

/// Rough size of a tile, used to estimate download volumes.
const APPROX_TILE_BYTES: f64 = 10_000f64;

fn approx_size(tile_count: usize) -> String {
    pretty_bytes::converter::convert(tile_count as f64 * APPROX_TILE_BYTES)
}

/// Reports progress on the terminal and asks before downloading.
struct CliObserver {
    pb: ProgressBar,
    assume_yes: bool,
}

impl CliObserver {
    fn new(assume_yes: bool) -> Result<Self> {
        let pb = ProgressBar::new(100);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:60.cyan/blue} {pos:>3}% {msg}")
                .context("invalid progress bar template")?
                .progress_chars("##-"),
        );

        Ok(Self { pb, assume_yes })
    }
}

impl RunObserver for CliObserver {
    fn on_status(&self, message: &str) {
        self.pb.set_message(message.to_owned());
    }

    fn on_progress(&self, percent: u8) {
        self.pb.set_position(percent as u64);
    }

    fn confirm(&self, missing: usize) -> bool {
        if self.assume_yes {
            return true;
        }

        self.pb.suspend(|| {
            Confirm::new()
                .with_prompt(format!(
                    "Are you sure you wish to download {} tiles (approx {})?",
                    missing,
                    approx_size(missing)
                ))
                .default(false)
                .interact()
                .unwrap_or(false)
        })
    }
}

fn coordinates(args: &Args) -> Result<impl Iterator<Item = offline_map_generator::Coordinate>> {
    let reader = CoordinateReader::open(&args.inputs)?;
    Ok(args.points.clone().into_iter().chain(reader))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse()?;
    let config: Config = (&args).into();

    if args.dry_run {
        let map = Map::build(coordinates(&args)?, &args.zoom_levels);
        let status = TileCache::new(&config.cache_folder)
            .check(&args.source, &map, config.fetch_existing)
            .await;

        eprintln!(
            "would download {} of {} tiles (approx {}, assuming 10 kb per tile)",
            status.missing(),
            map.tile_count(),
            approx_size(status.missing()),
        );

        return Ok(());
    }

    let observer = CliObserver::new(args.assume_yes)?;
    let fetcher = Arc::new(HttpFetcher::new(config.timeout)?);

    let outcome = generate(
        &config,
        Arc::new(args.source.clone()),
        coordinates(&args)?,
        &args.zoom_levels,
        fetcher,
        &observer,
    )
    .await;
    observer.pb.finish_and_clear();

    match outcome? {
        RunOutcome::Declined { missing } => {
            eprintln!("Not downloading {} tiles, no map was written", missing);
        }
        RunOutcome::Completed(summary) => {
            eprintln!(
                "Wrote {} ({} tiles: {} downloaded, {} from cache, {} skipped)",
                summary.output.display(),
                summary.requested,
                summary.downloaded,
                summary.from_cache,
                summary.skipped,
            );
        }
    }

    Ok(())
}
