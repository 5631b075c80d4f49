use std::{path::PathBuf, time::Duration};

use crate::packager::Format;

/// Delay before retrying a failed tile request, multiplied by the attempt number.
pub const BACKOFF_DELAY: Duration = Duration::from_secs(2);

/// Map generation configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Where the package is written. Its file name (without extension) becomes
    /// the map's name.
    pub output: PathBuf,

    /// Container format of the package.
    pub format: Format,

    /// Root folder of the local tile cache.
    pub cache_folder: PathBuf,

    /// Whether to download tiles even if they're already cached.
    pub fetch_existing: bool,

    /// Maximum number of parallel downloads.
    pub fetch_rate: u8,

    /// How many times to retry a failed HTTP request.
    pub request_retries_amount: u8,

    /// Base delay between retries of a failed request.
    pub retry_delay: Duration,

    /// Timeout for fetching a single tile.
    ///
    /// Pass the zero duration to disable the timeout.
    pub timeout: Duration,
}

impl Config {
    /// A configuration with the CLI's defaults for the given output.
    pub fn new(output: impl Into<PathBuf>, format: Format) -> Self {
        Self {
            output: output.into(),
            format,
            cache_folder: PathBuf::from("cache"),
            fetch_existing: false,
            fetch_rate: 5,
            request_retries_amount: 2,
            retry_delay: BACKOFF_DELAY,
            timeout: Duration::from_secs(10),
        }
    }

    /// The map's name, taken from the output's file name.
    pub fn map_name(&self) -> Option<String> {
        self.output
            .file_stem()
            .map(|stem| stem.to_string_lossy().trim().to_owned())
            .filter(|name| !name.is_empty())
    }
}
