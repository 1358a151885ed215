//! Project-level configuration shared by every site.
//!
//! One `vegline.toml` per project directory points at the reference vector
//! files, the imagery catalog, the asset store, and the external line
//! extractor. Site-specific knobs live in `SiteConfig` instead.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use toml;

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct Config {
    pub workspace: WorkspaceSection,
    pub catalog: CatalogSection,
    pub store: StoreSection,
    pub extractor: ExtractorSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: WorkspaceSection::default(),
            catalog: CatalogSection::default(),
            store: StoreSection::default(),
            extractor: ExtractorSection::default(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct WorkspaceSection {
    /// Root for everything the workflow writes.
    pub data_dir: PathBuf,
    /// GeoJSON FeatureCollection of site polygons, one feature per site id.
    pub polygons: PathBuf,
    /// GeoJSON line(s) marking the reference shoreline.
    pub reference_shoreline: PathBuf,
    /// GeoJSON cross-shore transects; optional downstream, clipped and
    /// re-exported per site when present.
    pub transects: Option<PathBuf>,
}

impl Default for WorkspaceSection {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("Data"),
            polygons: PathBuf::from("reference/sites.geojson"),
            reference_shoreline: PathBuf::from("reference/shoreline.geojson"),
            transects: None,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct CatalogSection {
    pub url: String,
    pub collection: String,
    /// File holding a bearer token, for catalogs that require one.
    pub token_file: Option<PathBuf>,
    /// Item page size requested from the catalog.
    pub page_limit: usize,
}

impl Default for CatalogSection {
    fn default() -> Self {
        Self {
            url: "https://earth-search.aws.element84.com/v1".to_string(),
            collection: "landsat-c2-l2".to_string(),
            token_file: None,
            page_limit: 100,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct StoreSection {
    /// AWS profile for the asset bucket; anonymous config when unset.
    pub profile: Option<String>,
    /// The Landsat bucket bills the requester.
    pub requester_pays: bool,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            profile: None,
            requester_pays: true,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct ExtractorSection {
    /// Executable invoked once per scene; scenes are only downloaded when
    /// this is set.
    pub command: Option<String>,
    /// Extra arguments placed before the per-scene ones.
    pub args: Vec<String>,
    /// Concurrent extractor processes.
    pub jobs: usize,
}

impl Default for ExtractorSection {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            jobs: 4,
        }
    }
}

impl Config {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn write<P: AsRef<Path>>(self: &Self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn from_template(table: &toml::Table) -> Self {
        let config: Self =
            toml::from_str(&table.to_string()).expect("Error serializing template");
        config
    }
}

pub fn config_toml() -> toml::Table {
    toml::toml! {
        [workspace]
        data_dir = "Data"
        polygons = "reference/sites.geojson"
        reference_shoreline = "reference/shoreline.geojson"
        transects = "reference/transects.geojson"

        [catalog]
        url = "https://earth-search.aws.element84.com/v1"
        collection = "landsat-c2-l2"
        page_limit = 100

        [store]
        // The Landsat archive bucket is requester-pays; anonymous access
        // works for the catalog but not for asset downloads.
        requester_pays = true

        [extractor]
        // command = "vedge-extract"
        args = []
        jobs = 4
    }
}
