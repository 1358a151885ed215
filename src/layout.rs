//! On-disk layout for one site.
//!
//! ```text
//! Data/
//!   referenceLines/
//!     <site>_refline.geojson
//!     <site>_transects.geojson
//!   <site>/
//!     L5/ L7/ L8/ L9/        scene directories with downloaded assets
//!     lines/                 per-year exported line files
//!     <site>_metadata.json
//!     <site>_output.json
//!     <site>_download_plan.json
//! ```

use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::satellites::Satellite;

#[derive(Clone, Debug)]
pub struct SiteLayout {
    data_dir: PathBuf,
    site: String,
}

impl SiteLayout {
    pub fn new<P: AsRef<Path>>(data_dir: P, site: &str) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            site: site.to_string(),
        }
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    /// Create every directory a run writes into. Idempotent.
    pub fn create(&self, satellites: &[Satellite]) -> Result<()> {
        for sat in satellites {
            let dir = self.sat_dir(*sat);
            fs::create_dir_all(&dir)
                .with_context(|| format!("Creating {}", dir.display()))?;
        }
        fs::create_dir_all(self.lines_dir())?;
        fs::create_dir_all(self.reference_lines_dir())?;
        Ok(())
    }

    pub fn site_dir(&self) -> PathBuf {
        self.data_dir.join(&self.site)
    }

    pub fn sat_dir(&self, sat: Satellite) -> PathBuf {
        self.site_dir().join(sat.code())
    }

    pub fn scene_dir(&self, sat: Satellite, scene_id: &str) -> PathBuf {
        self.sat_dir(sat).join(scene_id)
    }

    pub fn lines_dir(&self) -> PathBuf {
        self.site_dir().join("lines")
    }

    pub fn reference_lines_dir(&self) -> PathBuf {
        self.data_dir.join("referenceLines")
    }

    pub fn refline_path(&self) -> PathBuf {
        self.reference_lines_dir()
            .join(format!("{}_refline.geojson", self.site))
    }

    pub fn transects_path(&self) -> PathBuf {
        self.reference_lines_dir()
            .join(format!("{}_transects.geojson", self.site))
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.site_dir().join(format!("{}_metadata.json", self.site))
    }

    pub fn output_path(&self) -> PathBuf {
        self.site_dir().join(format!("{}_output.json", self.site))
    }

    pub fn plan_path(&self) -> PathBuf {
        self.site_dir()
            .join(format!("{}_download_plan.json", self.site))
    }

    pub fn settings_path(&self) -> PathBuf {
        self.site_dir().join(format!("{}_settings.json", self.site))
    }

    /// Drop cached per-run products so the next run starts clean. Missing
    /// files are not an error.
    pub fn remove_stale(&self) -> Result<()> {
        for path in [self.metadata_path(), self.output_path(), self.plan_path()] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err).with_context(|| format!("Removing {}", path.display()))
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_builds_expected_tree() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SiteLayout::new(dir.path(), "nzd0151");
        layout
            .create(&[Satellite::L5, Satellite::L8])
            .unwrap();

        assert!(layout.sat_dir(Satellite::L5).is_dir());
        assert!(layout.sat_dir(Satellite::L8).is_dir());
        assert!(layout.lines_dir().is_dir());
        assert!(layout.reference_lines_dir().is_dir());
        assert_eq!(
            layout.metadata_path(),
            dir.path().join("nzd0151").join("nzd0151_metadata.json")
        );

        // Second run over an existing tree is fine.
        layout.create(&[Satellite::L5]).unwrap();
    }

    #[test]
    fn test_remove_stale_ignores_missing() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SiteLayout::new(dir.path(), "nzd0151");
        layout.create(&[Satellite::L8]).unwrap();
        layout.remove_stale().unwrap();

        std::fs::write(layout.metadata_path(), b"{}").unwrap();
        layout.remove_stale().unwrap();
        assert!(!layout.metadata_path().exists());
    }
}
