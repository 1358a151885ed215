//! Per-site scene metadata, cached as JSON beside the downloads.
//!
//! Collection is cheap (catalog properties only); the expensive part is
//! re-searching, so `load_or_collect` reuses the cache file until the
//! caller asks for a fresh run. After assets arrive, records are enriched
//! from each scene's MTL metadata file.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stac::Item;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::catalog::{self, Catalog};
use crate::dates::DateSpec;
use crate::geometry::Coord;
use crate::layout::SiteLayout;
use crate::satellites::Satellite;

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SceneRecord {
    pub id: String,
    pub satellite: Satellite,
    pub acquired: DateTime<Utc>,
    /// Percentage, as the catalog reports it.
    pub cloud_cover: Option<f64>,
    pub epsg: Option<u32>,
    pub sun_elevation: Option<f64>,
    pub wrs_path: Option<String>,
    pub wrs_row: Option<String>,
    /// Metres, from the MTL file once assets are on disk.
    pub geometric_rmse: Option<f64>,
}

impl SceneRecord {
    pub fn from_item(item: &Item) -> Option<Self> {
        let satellite = catalog::item_satellite(item)?;
        let acquired = catalog::item_datetime(item)?;
        let (wrs_path, wrs_row) = match catalog::item_wrs_path_row(item) {
            Some((path, row)) => (Some(path), Some(row)),
            None => (None, None),
        };
        Some(Self {
            id: item.id.clone(),
            satellite,
            acquired,
            cloud_cover: catalog::item_cloud_cover(item),
            epsg: catalog::item_epsg(item),
            sun_elevation: catalog::item_sun_elevation(item),
            wrs_path,
            wrs_row,
            geometric_rmse: None,
        })
    }

    /// MTL values win over what the catalog search reported; fields the
    /// MTL does not name keep their current value.
    pub fn apply_mtl(&mut self, summary: &MtlSummary) {
        if summary.cloud_cover.is_some() {
            self.cloud_cover = summary.cloud_cover;
        }
        if summary.sun_elevation.is_some() {
            self.sun_elevation = summary.sun_elevation;
        }
        if summary.geometric_rmse.is_some() {
            self.geometric_rmse = summary.geometric_rmse;
        }
        if self.epsg.is_none() {
            // Collection 2 grids use north-zone UTM codes in both hemispheres
            self.epsg = summary.utm_zone.map(|zone| 32_600 + zone);
        }
    }
}

#[derive(Deserialize, Serialize, Debug)]
pub struct SiteMetadata {
    pub site: String,
    pub collected: DateTime<Utc>,
    /// Scene records keyed by satellite code, chronological within each.
    pub scenes: BTreeMap<String, Vec<SceneRecord>>,
}

impl SiteMetadata {
    pub fn from_items(site: &str, items: &[Item]) -> Self {
        let mut scenes: BTreeMap<String, Vec<SceneRecord>> = BTreeMap::new();
        for item in items {
            let Some(record) = SceneRecord::from_item(item) else {
                warn!(id = %item.id, "item not usable as a scene record, skipping");
                continue;
            };
            scenes
                .entry(record.satellite.code().to_string())
                .or_default()
                .push(record);
        }
        for records in scenes.values_mut() {
            records.sort_by_key(|record| record.acquired);
            records.dedup_by(|a, b| a.id == b.id);
        }
        Self {
            site: site.to_string(),
            collected: Utc::now(),
            scenes,
        }
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let metadata: Self = serde_json::from_str(&content)?;
        Ok(metadata)
    }

    pub fn write<P: AsRef<Path>>(self: &Self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.scenes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every record across satellites, oldest first.
    pub fn all_records(&self) -> Vec<&SceneRecord> {
        let mut records: Vec<&SceneRecord> = self.scenes.values().flatten().collect();
        records.sort_by_key(|record| record.acquired);
        records
    }

    /// Apply MTL fields for scenes whose assets are on disk.
    pub fn refresh_from_mtl(&mut self, layout: &SiteLayout) -> Result<usize> {
        let mut updated = 0;
        for records in self.scenes.values_mut() {
            for record in records.iter_mut() {
                let dir = layout.scene_dir(record.satellite, &record.id);
                let Some(path) = find_mtl(&dir) else {
                    debug!(id = %record.id, "no MTL file on disk yet");
                    continue;
                };
                let content = fs::read_to_string(&path)?;
                let summary = MtlSummary::parse(&content)?;
                record.apply_mtl(&summary);
                updated += 1;
            }
        }
        Ok(updated)
    }
}

fn find_mtl(dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if name.to_string_lossy().ends_with("MTL.xml") {
            return Some(entry.path());
        }
    }
    None
}

/// Reuse the cached metadata file when present, otherwise search the
/// catalog and write it.
pub async fn load_or_collect(
    catalog: &Catalog,
    layout: &SiteLayout,
    region: &[Coord],
    spec: &DateSpec,
    satellites: &[Satellite],
    cloud_thresh: f64,
) -> Result<SiteMetadata> {
    let path = layout.metadata_path();
    if path.exists() {
        info!(path = %path.display(), "using cached site metadata");
        return SiteMetadata::read(&path);
    }
    let items = catalog
        .collect_items(region, spec, satellites, cloud_thresh)
        .await?;
    let metadata = SiteMetadata::from_items(layout.site(), &items);
    metadata.write(&path)?;
    info!(scenes = metadata.len(), "collected site metadata");
    Ok(metadata)
}

/// The handful of MTL fields the workflow cares about.
#[derive(Debug, Default, PartialEq)]
pub struct MtlSummary {
    pub cloud_cover: Option<f64>,
    pub sun_elevation: Option<f64>,
    pub geometric_rmse: Option<f64>,
    pub utm_zone: Option<u32>,
}

impl MtlSummary {
    pub fn parse(content: &str) -> Result<Self> {
        let doc = roxmltree::Document::parse(content)?;
        Ok(Self {
            cloud_cover: tag_value(&doc, "CLOUD_COVER"),
            sun_elevation: tag_value(&doc, "SUN_ELEVATION"),
            geometric_rmse: tag_value(&doc, "GEOMETRIC_RMSE_MODEL"),
            utm_zone: tag_value(&doc, "UTM_ZONE"),
        })
    }
}

fn tag_value<T: FromStr>(doc: &roxmltree::Document, tag: &str) -> Option<T> {
    let node = doc
        .descendants()
        .filter(|n| n.has_tag_name(tag))
        .next()?;
    node.text()?.trim().parse().ok()
}
