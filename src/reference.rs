//! Reference vectors: site polygons, the reference shoreline, and
//! cross-shore transects.
//!
//! All three arrive as GeoJSON in WGS84. The shoreline and transects are
//! clipped to the site search rectangle and re-exported under
//! `referenceLines/` so downstream tools see only the local pieces.

use anyhow::{Context, Result};
use geojson::{Feature, FeatureCollection, GeoJson, Geometry};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::config::Config;
use crate::error::ReferenceError;
use crate::geometry::{
    self, line_value, lines_from_value, ring_from_value, smallest_rectangle, BoundingBox, Coord,
};
use crate::layout::SiteLayout;
use crate::site::SiteConfig;

#[derive(Clone, Debug)]
pub struct SiteFeature {
    pub id: String,
    pub ring: Vec<Coord>,
}

/// The full set of candidate site polygons, indexed by feature id.
#[derive(Clone, Debug)]
pub struct SitePolygons {
    path: PathBuf,
    features: Vec<SiteFeature>,
}

impl SitePolygons {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(ReferenceError::Missing(path).into());
        }
        let content = fs::read_to_string(&path)?;
        let geojson: GeoJson = content
            .parse()
            .with_context(|| format!("Parsing {}", path.display()))?;
        let GeoJson::FeatureCollection(collection) = geojson else {
            return Err(ReferenceError::NotAPolygon(path.display().to_string()).into());
        };

        let mut features = Vec::new();
        for feature in collection.features {
            let Some(id) = feature_id(&feature) else {
                continue;
            };
            let ring = feature
                .geometry
                .as_ref()
                .and_then(|geometry| ring_from_value(&geometry.value))
                .ok_or_else(|| ReferenceError::NotAPolygon(id.clone()))?;
            features.push(SiteFeature { id, ring });
        }
        Ok(Self { path, features })
    }

    pub fn select(&self, id: &str) -> Result<&SiteFeature, ReferenceError> {
        self.features
            .iter()
            .find(|feature| feature.id == id)
            .ok_or_else(|| ReferenceError::SiteNotFound {
                id: id.to_string(),
                path: self.path.clone(),
            })
    }

    /// Site ids sharing a prefix, for batch runs over one coast.
    pub fn ids_with_prefix(&self, prefix: &str) -> Vec<&str> {
        self.features
            .iter()
            .filter(|feature| feature.id.starts_with(prefix))
            .map(|feature| feature.id.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Feature ids may sit in an `id` property or on the feature itself.
fn feature_id(feature: &Feature) -> Option<String> {
    if let Some(value) = feature.property("id") {
        if let Some(id) = value.as_str() {
            return Some(id.to_string());
        }
        if let Some(id) = value.as_u64() {
            return Some(id.to_string());
        }
    }
    match &feature.id {
        Some(geojson::feature::Id::String(id)) => Some(id.clone()),
        Some(geojson::feature::Id::Number(id)) => Some(id.to_string()),
        None => None,
    }
}

/// Every line in the file, whether stored as LineStrings, a
/// MultiLineString, or spread over several features.
pub fn load_lines<P: AsRef<Path>>(path: P) -> Result<Vec<Vec<Coord>>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ReferenceError::Missing(path.to_path_buf()).into());
    }
    let content = fs::read_to_string(path)?;
    let geojson: GeoJson = content
        .parse()
        .with_context(|| format!("Parsing {}", path.display()))?;

    let mut lines = Vec::new();
    match geojson {
        GeoJson::FeatureCollection(collection) => {
            for feature in &collection.features {
                if let Some(geometry) = &feature.geometry {
                    lines.extend(lines_from_value(&geometry.value).unwrap_or_default());
                }
            }
        }
        GeoJson::Feature(feature) => {
            if let Some(geometry) = &feature.geometry {
                lines.extend(lines_from_value(&geometry.value).unwrap_or_default());
            }
        }
        GeoJson::Geometry(geometry) => {
            lines.extend(lines_from_value(&geometry.value).unwrap_or_default());
        }
    }
    if lines.is_empty() {
        return Err(ReferenceError::NotLines(path.to_path_buf()).into());
    }
    Ok(lines)
}

/// Everything later stages need to know about one site's geography.
#[derive(Clone, Debug)]
pub struct SiteReference {
    pub ring: Vec<Coord>,
    /// Axis-aligned search rectangle enclosing the site polygon.
    pub rect: Vec<Coord>,
    pub bbox: BoundingBox,
    pub shoreline: Vec<Vec<Coord>>,
    pub transects: Vec<Vec<Coord>>,
}

/// Resolve the site polygon, clip the shared references down to it, and
/// write the per-site copies under `referenceLines/`.
pub fn prepare_site_reference(
    config: &Config,
    site: &SiteConfig,
    layout: &SiteLayout,
) -> Result<SiteReference> {
    let polygons = SitePolygons::load(&config.workspace.polygons)?;
    let feature = polygons.select(&site.sitename)?;
    let rect = smallest_rectangle(&feature.ring)?;
    let bbox = BoundingBox::of_ring(&rect)
        .ok_or_else(|| ReferenceError::NotAPolygon(site.sitename.clone()))?;

    let shoreline_lines = load_lines(&config.workspace.reference_shoreline)?;
    let shoreline = geometry::clip_lines(&shoreline_lines, &bbox);
    if shoreline.is_empty() {
        return Err(ReferenceError::EmptyClip(site.sitename.clone()).into());
    }
    write_lines_geojson(layout.refline_path(), &shoreline, layout.site())?;

    let transects = match &config.workspace.transects {
        Some(path) => {
            let all = load_lines(path)?;
            let clipped = geometry::clip_lines(&all, &bbox);
            if clipped.is_empty() {
                warn!(site = layout.site(), "no transects intersect the site rectangle");
            } else {
                write_lines_geojson(layout.transects_path(), &clipped, layout.site())?;
            }
            clipped
        }
        None => Vec::new(),
    };

    Ok(SiteReference {
        ring: feature.ring.clone(),
        rect,
        bbox,
        shoreline,
        transects,
    })
}

pub fn write_lines_geojson<P: AsRef<Path>>(
    path: P,
    lines: &[Vec<Coord>],
    site: &str,
) -> Result<()> {
    let features = lines
        .iter()
        .map(|line| {
            let mut properties = serde_json::Map::new();
            properties.insert("site".to_string(), serde_json::json!(site));
            Feature {
                bbox: None,
                geometry: Some(Geometry::new(line_value(line))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();
    let collection = FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    };
    let content = serde_json::to_string_pretty(&GeoJson::FeatureCollection(collection))?;
    fs::write(path.as_ref(), content)
        .with_context(|| format!("Writing {}", path.as_ref().display()))?;
    Ok(())
}
