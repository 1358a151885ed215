//! Download plans: which scene assets to fetch and where to put them.
//!
//! A plan is written next to the site metadata before any transfer starts,
//! so an interrupted run can be resumed from the same file. Transfers
//! append to a `.partial` file and only rename on completion.

use anyhow::{anyhow, Result};
use futures_util::StreamExt;
use reqwest::header::RANGE;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use stac::Item;
use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::catalog::{self, AssetInfo};
use crate::layout::SiteLayout;
use crate::s3::{AssetStore, S3Location};

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum DownloadTask {
    S3 {
        bucket: String,
        key: String,
        output: PathBuf,
    },
    Https {
        url: String,
        /// Catalog-reported `file:size`, checked after the transfer. The
        /// bucket path needs no copy of it; `head_object` is the truth
        /// there.
        size: Option<i64>,
        output: PathBuf,
    },
}

impl DownloadTask {
    pub fn output(&self) -> &Path {
        match self {
            Self::S3 { output, .. } => output,
            Self::Https { output, .. } => output,
        }
    }
}

#[derive(Deserialize, Serialize, Debug)]
pub struct DownloadPlan {
    site: String,
    tasks: Vec<DownloadTask>,
}

impl DownloadPlan {
    pub fn new(site: &str, tasks: Vec<DownloadTask>) -> Self {
        Self {
            site: site.to_string(),
            tasks,
        }
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let plan: Self = serde_json::from_str(&content)?;
        Ok(plan)
    }

    pub fn write<P: AsRef<Path>>(self: &Self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub async fn execute(
        self: &Self,
        store: &impl AssetStore,
        http: &reqwest::Client,
    ) -> Result<()> {
        for task in self.tasks.iter() {
            debug!(?task, "current task");
            match task {
                DownloadTask::S3 {
                    bucket,
                    key,
                    output,
                } => try_download_s3(store, bucket, key, output).await?,
                DownloadTask::Https { url, size, output } => {
                    try_download_https(http, url, *size, output).await?
                }
            }
        }
        Ok(())
    }
}

pub async fn try_download_s3(
    store: &impl AssetStore,
    bucket: &str,
    key: &str,
    output: &Path,
) -> Result<()> {
    // Return early if the output file already exists
    if output.exists() {
        debug!(output = %output.display(), "output file already exists");
        return Ok(());
    }

    // Make parent directories as necessary
    if let Some(parent_dir) = output.parent() {
        if !parent_dir.exists() {
            fs::create_dir_all(parent_dir)?;
        }
    }

    // Check if a partial file exists and get its size
    let partial = partial_path(output);
    let mut partial_file = OpenOptions::new()
        .read(true)
        .create(true)
        .append(true)
        .open(&partial)?;
    let mut byte_count = partial_file.metadata()?.len();

    let head_object = store.head_object(bucket, key).await?;

    let total_size = head_object
        .content_length()
        .ok_or(anyhow!("Error reading size of remote object"))? as u64;

    if byte_count > 0 {
        let progress = (byte_count as f64 / total_size as f64) * 100.;
        info!(
            key,
            "resuming download from {:.2}% completion", progress
        );
    }

    if byte_count < total_size {
        let mut response = store
            .get_object_range(bucket, key, byte_count, total_size - 1)
            .await?;

        while let Some(bytes) = response.body.try_next().await? {
            let bytes_len = bytes.len() as u64;
            partial_file.write_all(&bytes)?;
            byte_count += bytes_len;
        }
    }

    info!(output = %output.display(), bytes = byte_count, "download complete");
    // Rename the file to remove the .partial suffix
    fs::rename(partial, output)?;

    Ok(())
}

pub async fn try_download_https(
    http: &reqwest::Client,
    url: &str,
    expected_size: Option<i64>,
    output: &Path,
) -> Result<()> {
    if output.exists() {
        debug!(output = %output.display(), "output file already exists");
        return Ok(());
    }

    if let Some(parent_dir) = output.parent() {
        if !parent_dir.exists() {
            fs::create_dir_all(parent_dir)?;
        }
    }

    let partial = partial_path(output);
    let mut partial_file = OpenOptions::new()
        .read(true)
        .create(true)
        .append(true)
        .open(&partial)?;
    let byte_count = partial_file.metadata()?.len();

    let mut request = http.get(url);
    if byte_count > 0 {
        request = request.header(RANGE, format!("bytes={}-", byte_count));
    }
    let mut response = request.send().await?;

    // A finished transfer whose rename never happened leaves a full
    // partial behind; resuming it asks for a range past the end.
    if byte_count > 0 && response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
        if expected_size.map_or(false, |size| size as u64 == byte_count) {
            info!(output = %output.display(), bytes = byte_count, "partial file already complete");
            fs::rename(partial, output)?;
            return Ok(());
        }
        response = http.get(url).send().await?;
    }
    let response = response.error_for_status()?;

    // A server that ignores the range restarts the transfer from zero
    let mut written = byte_count;
    if byte_count > 0 && response.status() != StatusCode::PARTIAL_CONTENT {
        partial_file = fs::File::create(&partial)?;
        written = 0;
    }

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let bytes = chunk?;
        partial_file.write_all(&bytes)?;
        written += bytes.len() as u64;
    }

    if let Some(size) = expected_size {
        if written != size as u64 {
            fs::remove_file(&partial)?;
            return Err(anyhow!(
                "Expected {} bytes from {}, got {}",
                size,
                url,
                written
            ));
        }
    }

    info!(output = %output.display(), bytes = written, "download complete");
    fs::rename(partial, output)?;

    Ok(())
}

fn partial_path(output: &Path) -> PathBuf {
    let mut partial = output.as_os_str().to_owned();
    partial.push(".partial");
    PathBuf::from(partial)
}

/// Build the per-site plan from search results. Scene assets land under
/// `Data/<site>/<SAT>/<scene_id>/`, bucket hrefs preferred over https.
pub fn plan_downloads(
    site: &str,
    items: &[Item],
    layout: &SiteLayout,
    include_slc_off: bool,
) -> Result<DownloadPlan> {
    let mut tasks = Vec::new();
    for item in items {
        let Some(sat) = catalog::item_satellite(item) else {
            warn!(id = %item.id, "item has no recognised platform, skipping");
            continue;
        };
        let Some(acquired) = catalog::item_datetime(item) else {
            warn!(id = %item.id, "item carries no acquisition time, skipping");
            continue;
        };
        if !include_slc_off && sat.is_slc_off(acquired.date_naive()) {
            debug!(id = %item.id, "scan-line corrector off, skipping scene");
            continue;
        }

        let scene_dir = layout.scene_dir(sat, &item.id);
        for key in sat.asset_keys() {
            let info = match AssetInfo::from_item(item, key) {
                Ok(info) => info,
                Err(_) => {
                    warn!(id = %item.id, key, "asset missing from item");
                    continue;
                }
            };
            let output = scene_dir.join(output_name(&info));
            let task = match &info.s3_href {
                Some(href) => {
                    let location = S3Location::from_s3_href(href)?;
                    DownloadTask::S3 {
                        bucket: location.bucket,
                        key: location.key,
                        output,
                    }
                }
                None => match S3Location::from_https_url(&info.href) {
                    Ok(location) => DownloadTask::S3 {
                        bucket: location.bucket,
                        key: location.key,
                        output,
                    },
                    Err(_) => DownloadTask::Https {
                        url: info.href.clone(),
                        size: info.size,
                        output,
                    },
                },
            };
            tasks.push(task);
        }
    }
    Ok(DownloadPlan::new(site, tasks))
}

fn output_name(info: &AssetInfo) -> String {
    info.href
        .rsplit('/')
        .next()
        .unwrap_or(info.key.as_str())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::operation::get_object::GetObjectOutput;
    use aws_sdk_s3::operation::head_object::HeadObjectOutput;
    use aws_sdk_s3::primitives::ByteStream;
    use std::collections::HashMap;

    fn mock_download_plan() -> DownloadPlan {
        DownloadPlan::new(
            "nzd0151",
            vec![
                DownloadTask::S3 {
                    bucket: "usgs-landsat".to_string(),
                    key: "collection02/file1.TIF".to_string(),
                    output: PathBuf::from("Data/nzd0151/L8/scene/file1.TIF"),
                },
                DownloadTask::S3 {
                    bucket: "usgs-landsat".to_string(),
                    key: "collection02/file2.TIF".to_string(),
                    output: PathBuf::from("Data/nzd0151/L8/scene/file2.TIF"),
                },
                DownloadTask::Https {
                    url: "https://landsatlook.usgs.gov/data/file_MTL.xml".to_string(),
                    size: Some(61_188),
                    output: PathBuf::from("Data/nzd0151/L8/scene/file_MTL.xml"),
                },
            ],
        )
    }

    #[test]
    fn test_write_and_read_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("download_plan.json");
        let plan = mock_download_plan();
        plan.write(&path).unwrap();
        assert_eq!(path.exists(), true);

        let plan = DownloadPlan::read(&path).unwrap();
        assert_eq!(plan.len(), 3);
        assert!(matches!(plan.tasks[2], DownloadTask::Https { .. }));
    }

    #[test]
    fn test_task_source_tag() {
        let value = serde_json::to_value(&mock_download_plan().tasks[0]).unwrap();
        assert_eq!(value["source"], "s3");
        assert_eq!(value["bucket"], "usgs-landsat");
    }

    struct MemStore {
        objects: HashMap<(String, String), Vec<u8>>,
    }

    impl MemStore {
        fn with_object(bucket: &str, key: &str, data: &[u8]) -> Self {
            let mut objects = HashMap::new();
            objects.insert((bucket.to_string(), key.to_string()), data.to_vec());
            Self { objects }
        }

        fn bytes(&self, bucket: &str, key: &str) -> Result<&Vec<u8>> {
            self.objects
                .get(&(bucket.to_string(), key.to_string()))
                .ok_or(anyhow!("No such object: {}/{}", bucket, key))
        }
    }

    impl AssetStore for MemStore {
        async fn head_object(
            self: &Self,
            bucket: &str,
            key: &str,
        ) -> anyhow::Result<HeadObjectOutput> {
            let data = self.bytes(bucket, key)?;
            Ok(HeadObjectOutput::builder()
                .content_length(data.len() as i64)
                .build())
        }

        async fn get_object(
            self: &Self,
            bucket: &str,
            key: &str,
        ) -> anyhow::Result<GetObjectOutput> {
            let data = self.bytes(bucket, key)?;
            Ok(GetObjectOutput::builder()
                .body(ByteStream::from(data.clone()))
                .build())
        }

        async fn get_object_range(
            self: &Self,
            bucket: &str,
            key: &str,
            start_byte: u64,
            end_byte: u64,
        ) -> anyhow::Result<GetObjectOutput> {
            let data = self.bytes(bucket, key)?;
            let slice = data[start_byte as usize..=end_byte as usize].to_vec();
            Ok(GetObjectOutput::builder()
                .body(ByteStream::from(slice))
                .build())
        }
    }

    #[tokio::test]
    async fn test_download_resumes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("scene").join("band.TIF");
        fs::create_dir_all(output.parent().unwrap()).unwrap();
        fs::write(partial_path(&output), b"01234").unwrap();

        let store = MemStore::with_object("bucket", "scene/band.TIF", b"0123456789");
        try_download_s3(&store, "bucket", "scene/band.TIF", &output)
            .await
            .unwrap();

        assert_eq!(fs::read(&output).unwrap(), b"0123456789");
        assert!(!partial_path(&output).exists());
    }

    #[tokio::test]
    async fn test_download_skips_existing_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("band.TIF");
        fs::write(&output, b"already here").unwrap();

        // The store holds nothing, so any request would fail.
        let store = MemStore {
            objects: HashMap::new(),
        };
        try_download_s3(&store, "bucket", "missing", &output)
            .await
            .unwrap();
        assert_eq!(fs::read(&output).unwrap(), b"already here");
    }

    #[tokio::test]
    async fn test_https_download_writes_file() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/file_MTL.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"<xml/>".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("file_MTL.xml");
        let http = reqwest::Client::new();
        try_download_https(
            &http,
            &format!("{}/data/file_MTL.xml", server.uri()),
            Some(6),
            &output,
        )
        .await
        .unwrap();
        assert_eq!(fs::read(&output).unwrap(), b"<xml/>");
    }

    #[tokio::test]
    async fn test_https_restart_counts_only_fresh_bytes() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        // The server ignores the range header and answers 200 with the
        // whole body; the stale partial must not count toward the total.
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/band.TIF"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"0123456789".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("band.TIF");
        fs::write(partial_path(&output), b"0123").unwrap();

        let http = reqwest::Client::new();
        try_download_https(
            &http,
            &format!("{}/data/band.TIF", server.uri()),
            Some(10),
            &output,
        )
        .await
        .unwrap();
        assert_eq!(fs::read(&output).unwrap(), b"0123456789");
        assert!(!partial_path(&output).exists());
    }

    #[tokio::test]
    async fn test_https_renames_full_length_partial_on_416() {
        use wiremock::matchers::{header_exists, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        // Only the resume request arrives; no full retransfer happens.
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/file_MTL.xml"))
            .and(header_exists("range"))
            .respond_with(ResponseTemplate::new(416))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("file_MTL.xml");
        fs::write(partial_path(&output), b"<xml/>").unwrap();

        let http = reqwest::Client::new();
        try_download_https(
            &http,
            &format!("{}/data/file_MTL.xml", server.uri()),
            Some(6),
            &output,
        )
        .await
        .unwrap();
        assert_eq!(fs::read(&output).unwrap(), b"<xml/>");
        assert!(!partial_path(&output).exists());
    }

    #[tokio::test]
    async fn test_https_rejects_short_body() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/band.TIF"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"0123".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("band.TIF");
        let http = reqwest::Client::new();
        let err = try_download_https(
            &http,
            &format!("{}/data/band.TIF", server.uri()),
            Some(10),
            &output,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("Expected 10 bytes"));
        assert!(!output.exists());
        assert!(!partial_path(&output).exists());
    }

    fn item_with_assets(id: &str, platform: &str, datetime: &str) -> Item {
        serde_json::from_value(serde_json::json!({
            "type": "Feature",
            "stac_version": "1.0.0",
            "id": id,
            "collection": "landsat-c2-l2",
            "geometry": {
                "type": "Polygon",
                "coordinates": [[
                    [174.0, -37.0], [176.0, -37.0], [176.0, -36.0],
                    [174.0, -36.0], [174.0, -37.0]
                ]]
            },
            "properties": {
                "datetime": datetime,
                "platform": platform,
                "eo:cloud_cover": 10.0
            },
            "links": [],
            "assets": {
                "blue": {
                    "href": format!("https://landsatlook.usgs.gov/data/{id}_SR_B2.TIF"),
                    "alternate": {"s3": {"href": format!("s3://usgs-landsat/c02/{id}_SR_B2.TIF")}}
                },
                "green": {
                    "href": format!("https://landsatlook.usgs.gov/data/{id}_SR_B3.TIF"),
                    "alternate": {"s3": {"href": format!("s3://usgs-landsat/c02/{id}_SR_B3.TIF")}}
                },
                "red": {
                    "href": format!("https://landsatlook.usgs.gov/data/{id}_SR_B4.TIF"),
                    "alternate": {"s3": {"href": format!("s3://usgs-landsat/c02/{id}_SR_B4.TIF")}}
                },
                "nir08": {
                    "href": format!("https://landsatlook.usgs.gov/data/{id}_SR_B5.TIF"),
                    "alternate": {"s3": {"href": format!("s3://usgs-landsat/c02/{id}_SR_B5.TIF")}}
                },
                "swir16": {
                    "href": format!("https://landsatlook.usgs.gov/data/{id}_SR_B6.TIF"),
                    "alternate": {"s3": {"href": format!("s3://usgs-landsat/c02/{id}_SR_B6.TIF")}}
                },
                "qa_pixel": {
                    "href": format!("https://landsatlook.usgs.gov/data/{id}_QA_PIXEL.TIF"),
                    "alternate": {"s3": {"href": format!("s3://usgs-landsat/c02/{id}_QA_PIXEL.TIF")}}
                },
                "mtl.xml": {
                    "href": format!("https://landsatlook.usgs.gov/data/{id}_MTL.xml"),
                    "file:size": 61_188
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_plan_prefers_bucket_and_skips_slc_off() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SiteLayout::new(dir.path(), "nzd0151");
        let items = vec![
            item_with_assets(
                "LC08_L2SP_073087_20210402_20210409_02_T1",
                "landsat-8",
                "2021-04-02T22:11:40Z",
            ),
            // After the 2003 scan-line corrector failure
            item_with_assets(
                "LE07_L2SP_073087_20100115_20200911_02_T1",
                "landsat-7",
                "2010-01-15T21:58:02Z",
            ),
        ];

        let plan = plan_downloads("nzd0151", &items, &layout, false).unwrap();
        // One scene, seven assets
        assert_eq!(plan.len(), 7);
        let s3_tasks = plan
            .tasks
            .iter()
            .filter(|task| matches!(task, DownloadTask::S3 { .. }))
            .count();
        assert_eq!(s3_tasks, 6);
        // The MTL file has no bucket alternate and stays https, carrying
        // the catalog size for the post-transfer check
        assert!(plan.tasks.iter().any(|task| matches!(
            task,
            DownloadTask::Https { url, size, .. }
                if url.ends_with("_MTL.xml") && *size == Some(61_188)
        )));
        for task in &plan.tasks {
            assert!(task
                .output()
                .starts_with(layout.scene_dir(crate::satellites::Satellite::L8,
                    "LC08_L2SP_073087_20210402_20210409_02_T1")));
        }

        let plan = plan_downloads("nzd0151", &items, &layout, true).unwrap();
        assert_eq!(plan.len(), 14);
    }
}
