use anyhow::{anyhow, bail, Result};
use clap::{command, Arg, ArgAction, ArgMatches};
use std::{collections::BTreeSet, path::PathBuf, time::Duration};

use crate::validators::*;
use offline_map_generator::{catalog, Config, Coordinate, Format, TileSource};

const INPUT_ARG: &str = "input";
const POINT_ARG: &str = "point";
const URL_ARG: &str = "url";
const SOURCE_NAME_ARG: &str = "source_name";
const ATTRIBUTION_ARG: &str = "attribution";
const CATALOG_ARG: &str = "catalog";
const SOURCE_ARG: &str = "source";
const ZOOM_ARG: &str = "zoom";
const MIN_ZOOM_ARG: &str = "min_zoom";
const MAX_ZOOM_ARG: &str = "max_zoom";
const FORMAT_ARG: &str = "format";
const OUTPUT_ARG: &str = "output";
const CACHE_DIR_ARG: &str = "cache_dir";
const TIMEOUT_ARG: &str = "timeout";
const DRY_RUN_ARG: &str = "dry_run";
const ASSUME_YES_ARG: &str = "assume_yes";
const REQUEST_RETRIES_ARG: &str = "num_retries";
const PARALLEL_FETCHES_ARG: &str = "num_parallel";
const FETCH_EXISTING_ARG: &str = "should_fetch_existing";

pub struct Args {
    pub inputs: Vec<PathBuf>,
    pub points: Vec<Coordinate>,
    pub source: TileSource,
    pub zoom_levels: Vec<u8>,
    pub format: Format,
    pub output: PathBuf,
    pub cache_dir: PathBuf,
    pub parallel_fetches: u8,
    pub retries: u8,
    pub timeout: Duration,
    pub fetch_existing: bool,
    pub dry_run: bool,
    pub assume_yes: bool,
}

impl From<&Args> for Config {
    fn from(args: &Args) -> Self {
        let mut config = Config::new(args.output.clone(), args.format);
        config.cache_folder = args.cache_dir.clone();
        config.fetch_existing = args.fetch_existing;
        config.fetch_rate = args.parallel_fetches;
        config.request_retries_amount = args.retries;
        config.timeout = args.timeout;
        config
    }
}

impl Args {
    pub fn parse() -> Result<Self> {
        let matches = get_matches();

        let source = match matches.get_one::<PathBuf>(CATALOG_ARG) {
            // pick the source from a catalog file
            Some(path) => {
                let sources = catalog::load(path)?;
                let name = matches
                    .get_one::<String>(SOURCE_ARG)
                    .ok_or_else(|| anyhow!("--source is required together with --catalog"))?;
                catalog::find(&sources, name)
                    .cloned()
                    .ok_or_else(|| anyhow!("source `{}` not found in {}", name, path.display()))?
            }
            // otherwise, build it from the individual arguments
            None => {
                let url = matches
                    .get_one::<String>(URL_ARG)
                    .ok_or_else(|| anyhow!("either --url or --catalog must be given"))?;
                TileSource::new(required::<String>(&matches, SOURCE_NAME_ARG).clone(), url.clone())
                    .with_attribution(
                        matches
                            .get_one::<String>(ATTRIBUTION_ARG)
                            .cloned()
                            .unwrap_or_default(),
                    )
            }
        };

        let zoom_levels: BTreeSet<u8> = match matches.get_many::<Vec<u8>>(ZOOM_ARG) {
            // explicit zoom levels win over a range
            Some(lists) => lists.flatten().copied().collect(),
            None => {
                let min = matches
                    .get_one::<u8>(MIN_ZOOM_ARG)
                    .copied()
                    .unwrap_or(source.min_zoom);
                let max = matches
                    .get_one::<u8>(MAX_ZOOM_ARG)
                    .copied()
                    .unwrap_or(source.max_zoom);
                if min > max {
                    bail!("--min-zoom {} is larger than --max-zoom {}", min, max);
                }
                (min..=max).collect()
            }
        };

        Ok(Self {
            inputs: matches
                .get_many::<PathBuf>(INPUT_ARG)
                .map(|paths| paths.cloned().collect())
                .unwrap_or_default(),
            points: matches
                .get_many::<Coordinate>(POINT_ARG)
                .map(|points| points.copied().collect())
                .unwrap_or_default(),
            source,
            zoom_levels: zoom_levels.into_iter().collect(),
            format: *required::<Format>(&matches, FORMAT_ARG),
            output: required::<PathBuf>(&matches, OUTPUT_ARG).clone(),
            cache_dir: required::<PathBuf>(&matches, CACHE_DIR_ARG).clone(),
            parallel_fetches: *required::<u8>(&matches, PARALLEL_FETCHES_ARG),
            retries: *required::<u8>(&matches, REQUEST_RETRIES_ARG),
            timeout: Duration::from_secs(*required::<u64>(&matches, TIMEOUT_ARG)),
            fetch_existing: matches.get_flag(FETCH_EXISTING_ARG),
            dry_run: matches.get_flag(DRY_RUN_ARG),
            assume_yes: matches.get_flag(ASSUME_YES_ARG),
        })
    }
}

/// Values of arguments that are required or carry a default.
fn required<'a, T: Clone + Send + Sync + 'static>(matches: &'a ArgMatches, id: &str) -> &'a T {
    matches
        .get_one::<T>(id)
        .unwrap_or_else(|| panic!("argument `{}` has a default value", id))
}

fn get_matches() -> ArgMatches {
    command!()
        .arg(
            Arg::new(INPUT_ARG)
                .help("Text file with one `lat,lon` pair per line. May be given multiple times.")
                .value_parser(clap::value_parser!(PathBuf))
                .action(ArgAction::Append)
                .short('i')
                .long("input"),
        )
        .arg(
            Arg::new(POINT_ARG)
                .help("A single `lat,lon` coordinate (in degrees) to cover. May be given multiple times.")
                .value_parser(is_geo_coord)
                .action(ArgAction::Append)
                .allow_hyphen_values(true)
                .short('p')
                .long("point"),
        )
        .arg(
            Arg::new(URL_ARG)
                .help("The URL with format specifiers `{x}`, `{y}`, `{z}` to fetch the tiles from. Also supports the format specifier `{s}` which is replaced with `a`, `b` or `c` to spread the load between different servers.")
                .required_unless_present(CATALOG_ARG)
                .conflicts_with(CATALOG_ARG)
                .short('u')
                .long("url"),
        )
        .arg(
            Arg::new(SOURCE_NAME_ARG)
                .help("Name of the tile source given by --url, also used as its cache directory")
                .default_value("custom")
                .long("source-name"),
        )
        .arg(
            Arg::new(ATTRIBUTION_ARG)
                .help("Attribution text of the tile source given by --url")
                .long("attribution"),
        )
        .arg(
            Arg::new(CATALOG_ARG)
                .help("JSON file listing the available tile sources")
                .value_parser(clap::value_parser!(PathBuf))
                .requires(SOURCE_ARG)
                .short('c')
                .long("catalog"),
        )
        .arg(
            Arg::new(SOURCE_ARG)
                .help("Name of the catalog source to fetch tiles from")
                .requires(CATALOG_ARG)
                .short('s')
                .long("source"),
        )
        .arg(
            Arg::new(ZOOM_ARG)
                .help("Comma separated zoom levels to include, e.g. `10,12,14` (overrides --min-zoom/--max-zoom)")
                .value_parser(is_zoom_list)
                .action(ArgAction::Append)
                .short('z')
                .long("zoom"),
        )
        .arg(
            Arg::new(MIN_ZOOM_ARG)
                .help("The minimum zoom level to include (defaults to the source's minimum)")
                .value_parser(is_zoom)
                .long("min-zoom"),
        )
        .arg(
            Arg::new(MAX_ZOOM_ARG)
                .help("The maximum zoom level to include (defaults to the source's maximum)")
                .value_parser(is_zoom)
                .long("max-zoom"),
        )
        .arg(
            Arg::new(FORMAT_ARG)
                .help("The map format to produce: `orux` (OruxMaps) or `bcnav` (BackCountry Navigator)")
                .value_parser(is_format)
                .default_value("orux")
                .short('f')
                .long("format"),
        )
        .arg(
            Arg::new(OUTPUT_ARG)
                .help("Where to write the map. Its file name becomes the map's name.")
                .value_parser(clap::value_parser!(PathBuf))
                .required(true)
                .short('o')
                .long("output"),
        )
        .arg(
            Arg::new(CACHE_DIR_ARG)
                .help("The folder downloaded tiles are cached in")
                .value_parser(clap::value_parser!(PathBuf))
                .default_value("cache")
                .long("cache"),
        )
        .arg(
            Arg::new(PARALLEL_FETCHES_ARG)
                .help("The amount of tiles fetched in parallel.")
                .value_parser(is_numeric_min(1u8))
                .default_value("5")
                .short('r')
                .long("rate"),
        )
        .arg(
            Arg::new(REQUEST_RETRIES_ARG)
                .help("The amount of times to retry a failed HTTP request.")
                .value_parser(is_numeric_min(0u8))
                .default_value("2")
                .long("retries"),
        )
        .arg(
            Arg::new(TIMEOUT_ARG)
                .help("The timeout (in seconds) for fetching a single tile. Pass 0 for no timeout.")
                .value_parser(is_numeric_min(0u64))
                .default_value("10")
                .short('t')
                .long("timeout"),
        )
        .arg(
            Arg::new(FETCH_EXISTING_ARG)
                .help("Fetch tiles that we've already downloaded (this usually isn't required)")
                .action(ArgAction::SetTrue)
                .long("fetch-existing"),
        )
        .arg(
            Arg::new(DRY_RUN_ARG)
                .help("Don't actually fetch anything, just determine how many tiles would be fetched.")
                .action(ArgAction::SetTrue)
                .long("dry-run"),
        )
        .arg(
            Arg::new(ASSUME_YES_ARG)
                .help("Start downloading without asking for confirmation")
                .action(ArgAction::SetTrue)
                .short('y')
                .long("yes"),
        )
        .get_matches()
}
