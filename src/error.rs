use thiserror::Error;

/// Problems with the caller's request, detected before any I/O takes place.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum InputError {
    #[error("no coordinates were supplied")]
    NoCoordinates,

    #[error("no zoom level was selected")]
    NoZoomLevels,

    #[error("the output name is empty")]
    EmptyOutputName,

    #[error("zoom level {zoom} is outside of the source's range {min}..={max}")]
    ZoomOutOfRange { zoom: u8, min: u8, max: u8 },
}

/// A tile source descriptor that cannot be used to fetch tiles.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum SourceError {
    #[error("tile source has no name")]
    EmptyName,

    #[error("URL template of source `{source_name}` lacks the `{{{placeholder}}}` placeholder")]
    MissingPlaceholder {
        source_name: String,
        placeholder: char,
    },

    #[error("source `{source_name}` has an invalid zoom range {min}..={max}")]
    InvalidZoomRange { source_name: String, min: u8, max: u8 },
}
