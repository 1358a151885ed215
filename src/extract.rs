//! Line extraction over downloaded scenes.
//!
//! The image processing itself lives in an external tool; this module owns
//! the contract with it. Per scene the tool gets the asset directory, the
//! site settings JSON and the clipped reference line, and answers with a
//! GeoJSON FeatureCollection of mapped boundaries (possibly empty, when
//! the scene yields nothing usable).

use anyhow::{anyhow, Context, Result};
use futures_util::stream::{self, StreamExt};
use geojson::GeoJson;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::ExtractorSection;
use crate::geometry::{line_length_m, lines_from_value, Coord};
use crate::layout::SiteLayout;
use crate::metadata::SiteMetadata;
use crate::output::{ShorelineRecord, SiteOutput};
use crate::site::{DetectionSettings, SiteConfig};

/// CRS of the clipped reference line handed to the tool.
pub const REFERENCE_EPSG: u32 = 4326;

/// Everything the extractor needs to know about the site, written once
/// per run as JSON.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ExtractionSettings {
    pub sitename: String,
    pub cloud_thresh: f64,
    pub output_epsg: u32,
    pub reference_epsg: u32,
    pub wetdry: bool,
    pub max_dist_ref: f64,
    pub years: Vec<i32>,
    pub detection: DetectionSettings,
}

impl ExtractionSettings {
    pub fn for_site(site: &SiteConfig, output_epsg: u32) -> Result<Self> {
        Ok(Self {
            sitename: site.sitename.clone(),
            cloud_thresh: site.cloud_thresh,
            output_epsg,
            reference_epsg: REFERENCE_EPSG,
            wetdry: site.wetdry,
            max_dist_ref: site.max_dist_ref,
            years: site.year_list()?,
            detection: site.detection.clone(),
        })
    }

    pub fn write<P: AsRef<Path>>(self: &Self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub scene_id: String,
    pub scene_dir: PathBuf,
    pub settings: PathBuf,
    pub reference: PathBuf,
    /// Where the tool must leave its FeatureCollection.
    pub output: PathBuf,
}

/// One mapped scene: the vegetation edge, optionally a waterline, and the
/// classifier threshold if the tool reports one.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneLines {
    pub veg: Vec<Coord>,
    pub water: Option<Vec<Coord>>,
    pub threshold: Option<f64>,
}

pub trait LineExtractor {
    /// `Ok(None)` means the tool ran fine but found no boundary.
    async fn extract(&self, job: &ExtractionJob) -> Result<Option<SceneLines>>;
}

/// Runs the configured external command once per scene.
pub struct ToolExtractor {
    command: String,
    args: Vec<String>,
}

impl ToolExtractor {
    pub fn from_config(section: &ExtractorSection) -> Option<Self> {
        let command = section.command.clone()?;
        Some(Self {
            command,
            args: section.args.clone(),
        })
    }
}

impl LineExtractor for ToolExtractor {
    async fn extract(&self, job: &ExtractionJob) -> Result<Option<SceneLines>> {
        let output = tokio::process::Command::new(&self.command)
            .args(&self.args)
            .arg("--scene")
            .arg(&job.scene_dir)
            .arg("--settings")
            .arg(&job.settings)
            .arg("--reference")
            .arg(&job.reference)
            .arg("--out")
            .arg(&job.output)
            .output()
            .await
            .with_context(|| format!("Spawning extractor {}", self.command))?;
        if !output.status.success() {
            return Err(anyhow!(
                "Extractor failed for {}: {}",
                job.scene_id,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        if !job.output.exists() {
            debug!(scene = %job.scene_id, "extractor wrote no output file");
            return Ok(None);
        }
        let content = fs::read_to_string(&job.output)?;
        parse_scene_lines(&content)
    }
}

/// Parse the tool's FeatureCollection. Features tagged `wetdry` become the
/// waterline; everything else is the vegetation edge, first one wins.
pub fn parse_scene_lines(content: &str) -> Result<Option<SceneLines>> {
    let geojson: GeoJson = content.parse().context("Parsing extractor output")?;
    let GeoJson::FeatureCollection(collection) = geojson else {
        return Err(anyhow!("Extractor output is not a FeatureCollection"));
    };

    let mut veg: Option<Vec<Coord>> = None;
    let mut water: Option<Vec<Coord>> = None;
    let mut threshold: Option<f64> = None;
    for feature in &collection.features {
        let Some(geometry) = &feature.geometry else {
            continue;
        };
        let Some(lines) = lines_from_value(&geometry.value) else {
            continue;
        };
        // A split detection keeps only its longest part
        let Some(line) = lines
            .into_iter()
            .max_by(|a, b| line_length_m(a).total_cmp(&line_length_m(b)))
        else {
            continue;
        };
        let boundary = feature.property("boundary").and_then(|v| v.as_str());
        if boundary == Some("wetdry") {
            if water.is_none() {
                water = Some(line);
            }
        } else if veg.is_none() {
            veg = Some(line);
        }
        if threshold.is_none() {
            threshold = feature.property("threshold").and_then(|v| v.as_f64());
        }
    }

    match veg {
        Some(veg) => Ok(Some(SceneLines {
            veg,
            water,
            threshold,
        })),
        None => Ok(None),
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct ExtractionOutcome {
    pub mapped: usize,
    pub empty: usize,
    pub skipped_cloud: usize,
    pub skipped_slc: usize,
}

/// Map every eligible scene and write the site output file. Scene order
/// in the output follows acquisition time regardless of job concurrency.
pub async fn run_extraction(
    extractor: &impl LineExtractor,
    site: &SiteConfig,
    layout: &SiteLayout,
    metadata: &SiteMetadata,
    output_epsg: u32,
    jobs: usize,
) -> Result<(SiteOutput, ExtractionOutcome)> {
    let settings = ExtractionSettings::for_site(site, output_epsg)?;
    let settings_path = layout.settings_path();
    settings.write(&settings_path)?;
    let reference = layout.refline_path();

    let mut outcome = ExtractionOutcome::default();
    let mut queue = Vec::new();
    for record in metadata.all_records() {
        if record
            .cloud_cover
            .map_or(false, |cover| cover > site.cloud_thresh * 100.0)
        {
            outcome.skipped_cloud += 1;
            continue;
        }
        if !site.include_slc_off && record.satellite.is_slc_off(record.acquired.date_naive()) {
            outcome.skipped_slc += 1;
            continue;
        }
        let scene_dir = layout.scene_dir(record.satellite, &record.id);
        let job = ExtractionJob {
            scene_id: record.id.clone(),
            scene_dir: scene_dir.clone(),
            settings: settings_path.clone(),
            reference: reference.clone(),
            output: scene_dir.join("lines.geojson"),
        };
        queue.push(((*record).clone(), job));
    }

    let mut results = stream::iter(queue.into_iter().map(|(record, job)| async move {
        let lines = extractor.extract(&job).await;
        (record, lines)
    }))
    .buffered(jobs.max(1));

    let mut output = SiteOutput::new(layout.site(), output_epsg);
    while let Some((record, lines)) = results.next().await {
        match lines? {
            Some(lines) => {
                debug!(scene = %record.id, "mapped boundary");
                output.records.push(ShorelineRecord {
                    scene_id: record.id,
                    satellite: record.satellite,
                    acquired: record.acquired,
                    cloud_cover: record.cloud_cover,
                    geoaccuracy: record.geometric_rmse,
                    threshold: lines.threshold,
                    veg_line: lines.veg,
                    water_line: lines.water,
                });
                outcome.mapped += 1;
            }
            None => outcome.empty += 1,
        }
    }

    output.sort_records();
    output.write(layout.output_path())?;
    info!(
        site = layout.site(),
        mapped = outcome.mapped,
        empty = outcome.empty,
        skipped_cloud = outcome.skipped_cloud,
        skipped_slc = outcome.skipped_slc,
        "extraction finished"
    );
    Ok((output, outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::SceneRecord;
    use crate::satellites::Satellite;
    use chrono::Utc;
    use std::collections::{BTreeMap, HashMap};

    fn lines_fixture(with_water: bool) -> String {
        let mut features = vec![serde_json::json!({
            "type": "Feature",
            "properties": {"boundary": "vegetation", "threshold": 0.12},
            "geometry": {
                "type": "LineString",
                "coordinates": [[174.70, -36.85], [174.71, -36.85], [174.72, -36.85]]
            }
        })];
        if with_water {
            features.push(serde_json::json!({
                "type": "Feature",
                "properties": {"boundary": "wetdry"},
                "geometry": {
                    "type": "LineString",
                    "coordinates": [[174.70, -36.851], [174.71, -36.851]]
                }
            }));
        }
        serde_json::json!({"type": "FeatureCollection", "features": features}).to_string()
    }

    #[test]
    fn test_parse_scene_lines() {
        let lines = parse_scene_lines(&lines_fixture(true)).unwrap().unwrap();
        assert_eq!(lines.veg.len(), 3);
        assert_eq!(lines.water.as_ref().unwrap().len(), 2);
        assert_eq!(lines.threshold, Some(0.12));
    }

    #[test]
    fn test_parse_empty_collection_is_no_detection() {
        let parsed =
            parse_scene_lines(r#"{"type": "FeatureCollection", "features": []}"#).unwrap();
        assert_eq!(parsed, None);
    }

    #[test]
    fn test_parse_multiline_keeps_longest_part() {
        let content = serde_json::json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {"boundary": "vegetation"},
                "geometry": {
                    "type": "MultiLineString",
                    "coordinates": [
                        [[174.70, -36.85], [174.701, -36.85]],
                        [[174.71, -36.85], [174.75, -36.85]]
                    ]
                }
            }]
        })
        .to_string();
        let lines = parse_scene_lines(&content).unwrap().unwrap();
        assert_eq!(lines.veg[0], [174.71, -36.85]);
    }

    struct StubExtractor {
        responses: HashMap<String, Option<SceneLines>>,
    }

    impl LineExtractor for StubExtractor {
        async fn extract(&self, job: &ExtractionJob) -> Result<Option<SceneLines>> {
            self.responses
                .get(&job.scene_id)
                .cloned()
                .ok_or(anyhow!("unexpected scene {}", job.scene_id))
        }
    }

    fn record(id: &str, satellite: Satellite, acquired: &str, cloud: f64) -> SceneRecord {
        SceneRecord {
            id: id.to_string(),
            satellite,
            acquired: acquired.parse().unwrap(),
            cloud_cover: Some(cloud),
            epsg: Some(32760),
            sun_elevation: None,
            wrs_path: None,
            wrs_row: None,
            geometric_rmse: Some(6.2),
        }
    }

    fn site_config() -> SiteConfig {
        toml::from_str(
            r#"
            sitename = "nzd0151"
            dates = ["2021-01-01", "2021-12-31"]
            sat_list = ["L8"]
            cloud_thresh = 0.5
            output_epsg = 32760
            "#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_run_extraction_filters_and_collects() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SiteLayout::new(dir.path(), "nzd0151");
        layout.create(&[Satellite::L8]).unwrap();

        let mut scenes = BTreeMap::new();
        scenes.insert(
            "L8".to_string(),
            vec![
                record("clear", Satellite::L8, "2021-04-02T22:11:40Z", 10.0),
                record("cloudy", Satellite::L8, "2021-05-04T22:11:40Z", 80.0),
                record("nothing_found", Satellite::L8, "2021-06-05T22:11:40Z", 5.0),
            ],
        );
        let metadata = SiteMetadata {
            site: "nzd0151".to_string(),
            collected: Utc::now(),
            scenes,
        };

        let mut responses = HashMap::new();
        responses.insert(
            "clear".to_string(),
            Some(SceneLines {
                veg: vec![[174.70, -36.85], [174.71, -36.85]],
                water: None,
                threshold: Some(0.2),
            }),
        );
        responses.insert("nothing_found".to_string(), None);
        let extractor = StubExtractor { responses };

        let (output, outcome) = run_extraction(
            &extractor,
            &site_config(),
            &layout,
            &metadata,
            32760,
            2,
        )
        .await
        .unwrap();

        assert_eq!(
            outcome,
            ExtractionOutcome {
                mapped: 1,
                empty: 1,
                skipped_cloud: 1,
                skipped_slc: 0,
            }
        );
        assert_eq!(output.len(), 1);
        assert_eq!(output.records[0].scene_id, "clear");
        assert_eq!(output.records[0].geoaccuracy, Some(6.2));
        assert!(layout.output_path().exists());
        assert!(layout.settings_path().exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tool_extractor_runs_command() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-extractor.sh");
        let body = format!(
            "#!/bin/sh\nwhile [ $# -gt 0 ]; do\n  if [ \"$1\" = \"--out\" ]; then out=\"$2\"; fi\n  shift\ndone\ncat > \"$out\" <<'EOF'\n{}\nEOF\n",
            lines_fixture(false)
        );
        fs::write(&script, body).unwrap();
        let mut perms = fs::metadata(&script).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&script, perms).unwrap();

        let extractor = ToolExtractor {
            command: script.to_string_lossy().into_owned(),
            args: vec![],
        };
        let job = ExtractionJob {
            scene_id: "scene".to_string(),
            scene_dir: dir.path().to_path_buf(),
            settings: dir.path().join("settings.json"),
            reference: dir.path().join("refline.geojson"),
            output: dir.path().join("lines.geojson"),
        };
        let lines = extractor.extract(&job).await.unwrap().unwrap();
        assert_eq!(lines.veg.len(), 3);
        assert_eq!(lines.threshold, Some(0.12));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tool_extractor_surfaces_failure() {
        let extractor = ToolExtractor {
            command: "false".to_string(),
            args: vec![],
        };
        let job = ExtractionJob {
            scene_id: "scene".to_string(),
            scene_dir: PathBuf::from("/nonexistent"),
            settings: PathBuf::from("/nonexistent/settings.json"),
            reference: PathBuf::from("/nonexistent/refline.geojson"),
            output: PathBuf::from("/nonexistent/lines.geojson"),
        };
        let err = extractor.extract(&job).await.unwrap_err();
        assert!(err.to_string().contains("scene"));
    }
}
