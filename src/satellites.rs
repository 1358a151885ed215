//! Landsat platforms known to the workflow.
//!
//! All four missions publish into the same Collection 2 Level-2 STAC
//! collection with harmonized asset keys, so a satellite is the platform
//! filter plus its operational span.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::dates::DateSpec;
use crate::error::SiteConfigError;

/// STAC collection holding Landsat Collection 2 Level-2 scenes.
pub const COLLECTION: &str = "landsat-c2-l2";

/// Asset key of the per-scene MTL metadata file.
pub const MTL_ASSET_KEY: &str = "mtl.xml";

/// Surface-reflectance bands plus the pixel QA layer and MTL metadata,
/// enough for shoreline work on every platform in [`Satellite::ALL`].
pub const DEFAULT_ASSET_KEYS: [&str; 7] =
    ["blue", "green", "red", "nir08", "swir16", "qa_pixel", MTL_ASSET_KEY];

fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid calendar date")
}

/// Landsat 7's scan-line corrector failed on this day; later acquisitions
/// carry data gaps ("SLC-off") and are excluded unless a site opts in.
pub fn slc_failure_date() -> NaiveDate {
    ymd(2003, 5, 31)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Satellite {
    L5,
    L7,
    L8,
    L9,
}

impl Satellite {
    pub const ALL: [Satellite; 4] = [Satellite::L5, Satellite::L7, Satellite::L8, Satellite::L9];

    pub fn code(&self) -> &'static str {
        match self {
            Satellite::L5 => "L5",
            Satellite::L7 => "L7",
            Satellite::L8 => "L8",
            Satellite::L9 => "L9",
        }
    }

    /// Value of the STAC `platform` property.
    pub fn platform(&self) -> &'static str {
        match self {
            Satellite::L5 => "landsat-5",
            Satellite::L7 => "landsat-7",
            Satellite::L8 => "landsat-8",
            Satellite::L9 => "landsat-9",
        }
    }

    pub fn from_platform(platform: &str) -> Option<Satellite> {
        Satellite::ALL
            .into_iter()
            .find(|sat| sat.platform() == platform)
    }

    /// First and (for retired missions) last day with usable acquisitions.
    pub fn span(&self) -> (NaiveDate, Option<NaiveDate>) {
        match self {
            Satellite::L5 => (ymd(1984, 3, 1), Some(ymd(2013, 6, 5))),
            Satellite::L7 => (ymd(1999, 4, 15), Some(ymd(2022, 4, 6))),
            Satellite::L8 => (ymd(2013, 3, 18), None),
            Satellite::L9 => (ymd(2021, 10, 31), None),
        }
    }

    /// Intersect a requested window with the operational span.
    pub fn clamp_window(&self, spec: &DateSpec) -> Option<DateSpec> {
        let (start, end) = self.span();
        spec.clamp(start, end)
    }

    pub fn is_slc_off(&self, acquired: NaiveDate) -> bool {
        *self == Satellite::L7 && acquired > slc_failure_date()
    }

    pub fn asset_keys(&self) -> &'static [&'static str] {
        &DEFAULT_ASSET_KEYS
    }
}

impl fmt::Display for Satellite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Satellite {
    type Err = SiteConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Satellite::ALL
            .into_iter()
            .find(|sat| sat.code() == s)
            .ok_or_else(|| SiteConfigError::UnknownSatellite(s.to_string()))
    }
}
