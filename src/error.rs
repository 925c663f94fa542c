use thiserror::Error;

/// Errors returned by [`RadixMap`](crate::RadixMap) operations and configuration loading.
///
/// Lookup misses are not errors: they are reported as `None`. Races between
/// concurrent callers are resolved inside the map and never surface here.
#[derive(Debug, Error)]
pub enum Error {
    /// The operation requires a non-empty key.
    #[error("{op} requires a non-empty key")]
    EmptyKey { op: &'static str },
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The configuration document could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
