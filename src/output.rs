//! Mapped shoreline output: one record per usable scene.
//!
//! The record list is the workflow's end product. Cleaning happens here
//! rather than at extraction time so a reprocessed site can be re-cleaned
//! without touching any imagery.

use anyhow::Result;
use chrono::{DateTime, Datelike, Duration, Utc};
use geojson::{Feature, FeatureCollection, GeoJson, Geometry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::geometry::{line_length_m, line_value, Coord};
use crate::layout::SiteLayout;
use crate::project;
use crate::satellites::Satellite;

/// Two acquisitions by the same satellite closer than this are the same
/// pass seen from overlapping scene footprints.
pub const DUPLICATE_WINDOW_MINUTES: i64 = 5;

/// Scenes with a worse registration error than this are unusable for
/// change analysis.
pub const MAX_GEOACCURACY_M: f64 = 10.0;

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ShorelineRecord {
    pub scene_id: String,
    pub satellite: Satellite,
    pub acquired: DateTime<Utc>,
    /// Percentage, from the scene metadata.
    pub cloud_cover: Option<f64>,
    /// Geometric RMSE of the scene registration, metres.
    pub geoaccuracy: Option<f64>,
    /// Classifier threshold the extractor settled on, when it reports one.
    pub threshold: Option<f64>,
    /// Vegetation edge in lon/lat.
    pub veg_line: Vec<Coord>,
    /// Wet/dry waterline in lon/lat, when requested.
    pub water_line: Option<Vec<Coord>>,
}

#[derive(Deserialize, Serialize, Debug)]
pub struct SiteOutput {
    pub site: String,
    pub output_epsg: u32,
    pub records: Vec<ShorelineRecord>,
}

impl SiteOutput {
    pub fn new(site: &str, output_epsg: u32) -> Self {
        Self {
            site: site.to_string(),
            output_epsg,
            records: Vec::new(),
        }
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let output: Self = serde_json::from_str(&content)?;
        Ok(output)
    }

    pub fn write<P: AsRef<Path>>(self: &Self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn sort_records(&mut self) {
        self.records.sort_by_key(|record| record.acquired);
    }

    /// Collapse same-satellite acquisitions within the duplicate window,
    /// keeping the longer mapped line. Returns how many were dropped.
    pub fn remove_duplicates(&mut self) -> usize {
        self.sort_records();
        let before = self.records.len();
        let mut kept: Vec<ShorelineRecord> = Vec::with_capacity(before);
        for record in self.records.drain(..) {
            match kept.last_mut() {
                Some(last)
                    if last.satellite == record.satellite
                        && record.acquired - last.acquired
                            <= Duration::minutes(DUPLICATE_WINDOW_MINUTES) =>
                {
                    if line_length_m(&record.veg_line) > line_length_m(&last.veg_line) {
                        *last = record;
                    }
                }
                _ => kept.push(record),
            }
        }
        self.records = kept;
        let removed = before - self.records.len();
        if removed > 0 {
            info!(site = %self.site, removed, "removed duplicate acquisitions");
        }
        removed
    }

    /// Drop records whose registration error exceeds `max_rmse` metres.
    /// Records without a known error are kept.
    pub fn filter_inaccurate(&mut self, max_rmse: f64) -> usize {
        let before = self.records.len();
        self.records
            .retain(|record| record.geoaccuracy.map_or(true, |rmse| rmse <= max_rmse));
        let removed = before - self.records.len();
        if removed > 0 {
            info!(site = %self.site, removed, max_rmse, "removed inaccurately registered scenes");
        }
        removed
    }

    fn record_features(&self, record: &ShorelineRecord, latlon: bool) -> Result<Vec<Feature>> {
        let mut features = Vec::new();
        let mut lines = vec![("vegetation", &record.veg_line)];
        if let Some(water_line) = &record.water_line {
            lines.push(("wetdry", water_line));
        }
        for (boundary, line) in lines {
            let coords = if latlon {
                line.clone()
            } else {
                project::project_line(line, self.output_epsg)?
            };
            let mut properties = serde_json::Map::new();
            properties.insert("scene_id".to_string(), serde_json::json!(record.scene_id));
            properties.insert(
                "satellite".to_string(),
                serde_json::json!(record.satellite.code()),
            );
            properties.insert(
                "acquired".to_string(),
                serde_json::json!(record.acquired.to_rfc3339()),
            );
            properties.insert(
                "cloud_cover".to_string(),
                serde_json::json!(record.cloud_cover),
            );
            properties.insert("threshold".to_string(), serde_json::json!(record.threshold));
            properties.insert("boundary".to_string(), serde_json::json!(boundary));
            features.push(Feature {
                bbox: None,
                geometry: Some(Geometry::new(line_value(&coords))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            });
        }
        Ok(features)
    }

    /// All mapped lines as one GeoJSON file, either in lon/lat or in the
    /// site's projected CRS.
    pub fn export_geojson<P: AsRef<Path>>(&self, path: P, latlon: bool) -> Result<()> {
        let mut features = Vec::new();
        for record in &self.records {
            features.extend(self.record_features(record, latlon)?);
        }
        let foreign_members = if latlon {
            None
        } else {
            let mut members = serde_json::Map::new();
            members.insert(
                "crs".to_string(),
                serde_json::json!({
                    "type": "name",
                    "properties": {"name": format!("urn:ogc:def:crs:EPSG::{}", self.output_epsg)}
                }),
            );
            Some(members)
        };
        let collection = FeatureCollection {
            bbox: None,
            features,
            foreign_members,
        };
        let content = serde_json::to_string_pretty(&GeoJson::FeatureCollection(collection))?;
        fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// One projected GeoJSON per acquisition year under `lines/`.
    pub fn export_annual(&self, layout: &SiteLayout) -> Result<Vec<PathBuf>> {
        let mut by_year: BTreeMap<i32, Vec<&ShorelineRecord>> = BTreeMap::new();
        for record in &self.records {
            by_year.entry(record.acquired.year()).or_default().push(record);
        }
        let mut written = Vec::new();
        for (year, records) in by_year {
            let mut features = Vec::new();
            for record in records {
                features.extend(self.record_features(record, false)?);
            }
            let collection = FeatureCollection {
                bbox: None,
                features,
                foreign_members: None,
            };
            let path = layout
                .lines_dir()
                .join(format!("{}_{}_lines.geojson", self.site, year));
            let content = serde_json::to_string_pretty(&GeoJson::FeatureCollection(collection))?;
            fs::write(&path, content)?;
            written.push(path);
        }
        Ok(written)
    }

    pub fn summary(&self) -> String {
        let mut text = String::new();
        let _ = writeln!(text, "Mapped lines for {}: {}", self.site, self.len());
        if let (Some(first), Some(last)) = (self.records.first(), self.records.last()) {
            let _ = writeln!(
                text,
                "  span: {} .. {}",
                first.acquired.date_naive(),
                last.acquired.date_naive()
            );
        }
        let mut by_sat: BTreeMap<&str, usize> = BTreeMap::new();
        for record in &self.records {
            *by_sat.entry(record.satellite.code()).or_default() += 1;
        }
        for (code, count) in by_sat {
            let _ = writeln!(text, "  {}: {}", code, count);
        }
        let covers: Vec<f64> = self.records.iter().filter_map(|r| r.cloud_cover).collect();
        if !covers.is_empty() {
            let mean = covers.iter().sum::<f64>() / covers.len() as f64;
            let _ = writeln!(text, "  mean cloud cover: {:.1}%", mean);
        }
        text.trim_end().to_string()
    }
}

pub fn read_output(layout: &SiteLayout) -> Result<SiteOutput> {
    SiteOutput::read(layout.output_path())
}
