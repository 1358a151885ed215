use std::path::PathBuf;
use thiserror::Error;

/// Problems found while validating a site configuration before any stage runs.
#[derive(Error, Debug)]
pub enum SiteConfigError {
    #[error("'dates' needs a start and an end, got {0} entry")]
    TooFewDates(usize),

    #[error("unable to parse date '{0}', expected YYYY-MM-DD")]
    BadDate(String),

    #[error("date window is reversed: {start} is after {end}")]
    ReversedDates { start: String, end: String },

    #[error("unknown satellite code '{0}', expected one of L5, L7, L8, L9")]
    UnknownSatellite(String),

    #[error("'sat_list' is empty")]
    NoSatellites,

    #[error("'cloud_thresh' {0} is outside [0, 1]")]
    CloudThreshOutOfRange(f64),

    #[error("'output_epsg' {0} is not a UTM code (EPSG:326xx/327xx) and not 0")]
    UnsupportedEpsg(u32),
}

/// Problems with the reference vector inputs (site polygons, shoreline, transects).
#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("reference file not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("no feature with id '{id}' in {}", .path.display())]
    SiteNotFound { id: String, path: PathBuf },

    #[error("feature {0} has no usable polygon ring")]
    NotAPolygon(String),

    #[error("expected line geometries in {}", .0.display())]
    NotLines(PathBuf),

    #[error("nothing left of '{0}' after clipping to the site rectangle")]
    EmptyClip(String),
}
