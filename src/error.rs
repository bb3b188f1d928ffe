//! Error types for the processing stage

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure to decode one symbol or one located region.
///
/// These never abort a frame: the decoder adapter logs them and moves on
/// to the next item.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("backend failed to decode symbol: {0}")]
    Backend(String),

    #[error("failed to write crop artifact {path}: {source}")]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to create crop artifact: {0}")]
    ArtifactCreate(#[source] io::Error),

    #[error("failed to read crop artifact {path}: {source}")]
    ArtifactRead {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("no symbol found in {0}")]
    NoSymbol(PathBuf),

    #[error("region ({x_min},{y_min})-({x_max},{y_max}) lies outside the frame")]
    EmptyRegion {
        x_min: i32,
        y_min: i32,
        x_max: i32,
        y_max: i32,
    },
}

/// Persistence failures, logged by the stage and never fatal
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write frame image {path}: {source}")]
    WriteImage {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to append to detection log {path}: {source}")]
    AppendLog {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Setup errors surfaced before any frame is processed
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("failed to load font {path}: {reason}")]
    Font { path: PathBuf, reason: String },

    #[error("failed to prepare scratch directory {path}: {source}")]
    Scratch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
