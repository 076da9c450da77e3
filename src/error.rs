//! Defines [`ClipError`], representing all errors returned by this crate.

use arrow_schema::ArrowError;
use std::fmt::Debug;
use std::path::PathBuf;
use thiserror::Error;

/// Enum with all errors in this crate.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ClipError {
    /// The table has no field matching any known geometry column alias.
    #[error("No geometry column found")]
    MissingGeometryColumn,

    /// Neither the geometry nor the file declared a coordinate reference system we understand.
    #[error("Could not detect the coordinate reference system of {0}")]
    UnknownCrs(PathBuf),

    /// No transformation is available for this EPSG code.
    #[error("Unsupported coordinate reference system: EPSG:{0}")]
    UnsupportedCrs(i32),

    /// The file extension does not name a format we can read or write.
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(PathBuf),

    /// General error.
    #[error("General error: {0}")]
    General(String),

    /// [ArrowError]
    #[error(transparent)]
    Arrow(#[from] ArrowError),

    /// [geozero::error::GeozeroError]
    #[error(transparent)]
    GeozeroError(#[from] geozero::error::GeozeroError),

    /// [flatgeobuf::Error]
    #[error(transparent)]
    FlatgeobufError(#[from] flatgeobuf::Error),

    /// [geojson::Error]
    #[error(transparent)]
    GeoJsonError(#[from] geojson::Error),

    /// [geodesy::Error]
    #[error(transparent)]
    GeodesyError(#[from] geodesy::Error),

    /// [proj::ProjError]
    #[cfg(feature = "proj")]
    #[error(transparent)]
    ProjError(#[from] proj::ProjError),

    /// [proj::ProjCreateError]
    #[cfg(feature = "proj")]
    #[error(transparent)]
    ProjCreateError(#[from] proj::ProjCreateError),

    /// [std::io::Error]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// [serde_json::Error]
    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),

    /// [toml::de::Error]
    #[error(transparent)]
    TomlError(#[from] toml::de::Error),
}

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, ClipError>;

impl From<ClipError> for ArrowError {
    fn from(err: ClipError) -> Self {
        match err {
            ClipError::Arrow(err) => err,
            _ => ArrowError::ExternalError(Box::new(err)),
        }
    }
}
