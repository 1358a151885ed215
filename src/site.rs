//! Per-site workflow configuration.
//!
//! A `SiteConfig` TOML file is the unit of work: every stage (availability
//! check, retrieval, extraction, reporting) takes one. The template mirrors
//! a real New Zealand dune site.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use toml;

use crate::dates::DateSpec;
use crate::error::SiteConfigError;
use crate::geometry::{BoundingBox, Coord};
use crate::project;
use crate::satellites::Satellite;

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct SiteConfig {
    /// Site id; must match a feature id in the site-polygon file.
    pub sitename: String,
    /// Start/end pair, or an explicit list of single days when more than
    /// two entries are given.
    pub dates: Vec<String>,
    pub sat_list: Vec<String>,
    /// Maximum scene cloud fraction, 0..=1.
    #[serde(default = "default_cloud_thresh")]
    pub cloud_thresh: f64,
    /// Projected CRS for exported lines; 0 derives the UTM zone from the
    /// site polygon.
    #[serde(default)]
    pub output_epsg: u32,
    /// Search buffer around the reference shoreline, metres.
    #[serde(default = "default_max_dist_ref")]
    pub max_dist_ref: f64,
    /// Also request the wet/dry waterline from the extractor.
    #[serde(default)]
    pub wetdry: bool,
    /// Keep Landsat 7 scenes acquired after the scan-line-corrector failure.
    #[serde(default)]
    pub include_slc_off: bool,
    #[serde(default)]
    pub detection: DetectionSettings,
}

fn default_cloud_thresh() -> f64 {
    0.5
}

fn default_max_dist_ref() -> f64 {
    80.0
}

/// Tuning payload handed through to the line extractor untouched.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DetectionSettings {
    /// Minimum area (m^2) for an object to be labelled as beach.
    pub min_beach_area: f64,
    /// Buffer radius (m) around shoreline pixels considered in detection.
    pub buffer_size: f64,
    /// Minimum mapped line perimeter (m) to be kept.
    pub min_length_sl: f64,
    pub cloud_mask_issue: bool,
    pub check_detection: bool,
    pub adjust_detection: bool,
    pub save_figure: bool,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            min_beach_area: 200.0,
            buffer_size: 250.0,
            min_length_sl: 500.0,
            cloud_mask_issue: false,
            check_detection: false,
            adjust_detection: false,
            save_figure: true,
        }
    }
}

impl SiteConfig {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let site: Self = toml::from_str(&content)?;
        Ok(site)
    }

    pub fn write<P: AsRef<Path>>(self: &Self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn from_template(table: &toml::Table) -> Self {
        let site: Self =
            toml::from_str(&table.to_string()).expect("Error serializing template");
        site
    }

    /// Reject configurations no stage could act on.
    pub fn validate(self: &Self) -> Result<(), SiteConfigError> {
        self.date_spec()?;
        self.satellites()?;
        if !(0.0..=1.0).contains(&self.cloud_thresh) {
            return Err(SiteConfigError::CloudThreshOutOfRange(self.cloud_thresh));
        }
        if self.output_epsg != 0 && project::epsg_to_zone(self.output_epsg).is_none() {
            return Err(SiteConfigError::UnsupportedEpsg(self.output_epsg));
        }
        Ok(())
    }

    pub fn date_spec(self: &Self) -> Result<DateSpec, SiteConfigError> {
        DateSpec::from_strings(&self.dates)
    }

    pub fn satellites(self: &Self) -> Result<Vec<Satellite>, SiteConfigError> {
        if self.sat_list.is_empty() {
            return Err(SiteConfigError::NoSatellites);
        }
        self.sat_list.iter().map(|code| code.parse()).collect()
    }

    pub fn year_list(self: &Self) -> Result<Vec<i32>, SiteConfigError> {
        Ok(self.date_spec()?.year_list())
    }

    /// The configured output EPSG, or the UTM zone of the site polygon
    /// when left at 0.
    pub fn resolved_epsg(self: &Self, site_ring: &[Coord]) -> Result<u32> {
        if self.output_epsg != 0 {
            return Ok(self.output_epsg);
        }
        let bbox = BoundingBox::of_ring(site_ring)
            .ok_or(anyhow::anyhow!("site polygon is empty"))?;
        let [lon, lat] = bbox.center();
        Ok(project::utm_epsg_for(lon, lat))
    }
}

pub fn site_config_toml() -> toml::Table {
    toml::toml! {
        sitename = "nzd0151"

        // Start and end of the search window. More than two entries turn
        // this into an explicit list of single days.
        dates = ["2010-01-01", "2010-02-01"]

        sat_list = ["L5", "L7", "L8", "L9"]

        // Maximum scene cloud fraction forwarded to the catalog search.
        cloud_thresh = 0.5

        // EPSG code of the projected CRS for exported lines (UTM 60S here);
        // 0 derives the zone from the site polygon.
        output_epsg = 32760

        // Buffer (metres) around the reference shoreline handed to the
        // extractor as its search corridor.
        max_dist_ref = 80.0

        wetdry = false
        include_slc_off = false

        [detection]
        min_beach_area = 200.0
        buffer_size = 250.0
        min_length_sl = 500.0
        cloud_mask_issue = false
        check_detection = false
        adjust_detection = false
        save_figure = true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template() {
        let site = SiteConfig::from_template(&site_config_toml());
        assert_eq!(site.sitename, "nzd0151");
        assert_eq!(site.sat_list.len(), 4);
        assert_eq!(site.detection.buffer_size, 250.0);
        assert!(site.validate().is_ok());
    }

    #[test]
    fn test_write_and_read_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nzd0151.toml");
        let site = SiteConfig::from_template(&site_config_toml());
        site.write(&path).unwrap();

        let site = SiteConfig::read(&path).unwrap();
        assert_eq!(site.sitename, "nzd0151");
        assert_eq!(site.output_epsg, 32760);
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let site: SiteConfig = toml::from_str(
            r#"
            sitename = "nzd0001"
            dates = ["2015-01-01", "2015-12-31"]
            sat_list = ["L8"]
            "#,
        )
        .unwrap();
        assert_eq!(site.cloud_thresh, 0.5);
        assert_eq!(site.max_dist_ref, 80.0);
        assert_eq!(site.detection, DetectionSettings::default());
        assert!(site.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_satellite() {
        let mut site = SiteConfig::from_template(&site_config_toml());
        site.sat_list = vec!["L5".into(), "S2".into()];
        assert!(matches!(
            site.validate(),
            Err(SiteConfigError::UnknownSatellite(code)) if code == "S2"
        ));
    }

    #[test]
    fn test_validate_rejects_bad_threshold_and_epsg() {
        let mut site = SiteConfig::from_template(&site_config_toml());
        site.cloud_thresh = 1.5;
        assert!(matches!(
            site.validate(),
            Err(SiteConfigError::CloudThreshOutOfRange(_))
        ));

        let mut site = SiteConfig::from_template(&site_config_toml());
        site.output_epsg = 2193;
        assert!(matches!(
            site.validate(),
            Err(SiteConfigError::UnsupportedEpsg(2193))
        ));
    }

    #[test]
    fn test_resolved_epsg_derived_from_polygon() {
        let mut site = SiteConfig::from_template(&site_config_toml());
        site.output_epsg = 0;
        let ring = vec![
            [174.7, -36.9],
            [174.8, -36.9],
            [174.8, -36.8],
            [174.7, -36.8],
            [174.7, -36.9],
        ];
        assert_eq!(site.resolved_epsg(&ring).unwrap(), 32760);
    }
}
