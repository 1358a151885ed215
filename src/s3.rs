//! Utility functions for creating s3 clients and locating scene assets
use anyhow::{anyhow, Result};
use aws_sdk_s3::config::Region;
use aws_sdk_s3::operation::get_object::GetObjectOutput;
use aws_sdk_s3::operation::head_object::HeadObjectOutput;
use aws_sdk_s3::types::RequestPayer;
use aws_sdk_s3::Client;
use regex::Regex;

/// Region of the Landsat Collection 2 archive bucket.
pub const DEFAULT_REGION: &str = "us-west-2";

pub async fn client_from_profile(profile_name: &str) -> Client {
    let base_config = aws_config::from_env()
        .profile_name(profile_name)
        .load()
        .await;

    let s3_config = aws_sdk_s3::config::Builder::from(&base_config)
        .region(Region::new(DEFAULT_REGION))
        .force_path_style(true)
        .build();

    Client::from_conf(s3_config)
}

pub async fn anon_client(region: &str) -> Client {
    let region = Region::new(region.to_string());
    let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .no_credentials()
        .region(region)
        .load()
        .await;
    Client::new(&config)
}

pub trait AssetStore {
    async fn head_object(self: &Self, bucket: &str, key: &str) -> anyhow::Result<HeadObjectOutput>;

    async fn get_object(self: &Self, bucket: &str, key: &str) -> anyhow::Result<GetObjectOutput>;

    async fn get_object_range(
        self: &Self,
        bucket: &str,
        key: &str,
        start_byte: u64,
        end_byte: u64,
    ) -> anyhow::Result<GetObjectOutput>;
}

/// Store for the `usgs-landsat` bucket. Requests carry the requester-pays
/// header when enabled; the bucket rejects anonymous reads without it.
pub struct LandsatStore {
    client: Client,
    requester_pays: bool,
}

impl LandsatStore {
    pub fn new(client: Client, requester_pays: bool) -> Self {
        Self {
            client,
            requester_pays,
        }
    }

    pub async fn from_profile(profile_name: &str, requester_pays: bool) -> Self {
        let client = client_from_profile(profile_name).await;
        Self {
            client,
            requester_pays,
        }
    }

    pub async fn anonymous() -> Self {
        let client = anon_client(DEFAULT_REGION).await;
        Self {
            client,
            requester_pays: false,
        }
    }
}

impl AssetStore for LandsatStore {
    async fn head_object(self: &Self, bucket: &str, key: &str) -> anyhow::Result<HeadObjectOutput> {
        let mut request = self.client.head_object().bucket(bucket).key(key);
        if self.requester_pays {
            request = request.request_payer(RequestPayer::Requester);
        }
        let head = request.send().await?;
        Ok(head)
    }

    async fn get_object(self: &Self, bucket: &str, key: &str) -> anyhow::Result<GetObjectOutput> {
        let mut request = self.client.get_object().bucket(bucket).key(key);
        if self.requester_pays {
            request = request.request_payer(RequestPayer::Requester);
        }
        let object = request.send().await?;
        Ok(object)
    }

    async fn get_object_range(
        self: &Self,
        bucket: &str,
        key: &str,
        start_byte: u64,
        end_byte: u64,
    ) -> anyhow::Result<GetObjectOutput> {
        let range = format!("bytes={}-{}", start_byte, end_byte);
        let mut request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .range(range);
        if self.requester_pays {
            request = request.request_payer(RequestPayer::Requester);
        }
        let object = request.send().await?;
        Ok(object)
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct S3Location {
    pub bucket: String,
    pub key: String,
    pub region: Option<String>,
}

impl S3Location {
    /// Accepts both `s3://bucket/key` hrefs (the catalog's `alternate.s3`
    /// form) and virtual-hosted https URLs.
    pub fn parse(href: &str) -> Result<Self> {
        if href.starts_with("s3://") {
            Self::from_s3_href(href)
        } else {
            Self::from_https_url(href)
        }
    }

    pub fn from_s3_href(href: &str) -> Result<Self> {
        let remainder = href
            .strip_prefix("s3://")
            .ok_or(anyhow!("Not an s3 href: {}", href))?;
        let (bucket, key) = remainder
            .split_once('/')
            .ok_or(anyhow!("Missing key in s3 href: {}", href))?;
        if bucket.is_empty() || key.is_empty() {
            return Err(anyhow!("Missing bucket or key in s3 href: {}", href));
        }
        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            region: None,
        })
    }

    pub fn from_https_url(url: &str) -> Result<Self> {
        let re = Regex::new(
            r"https:\/\/(?<bucket>[\d\w-]+)\.s3\.(?<region>[\d\w-]+)\.amazonaws.com\/(?<key>.+)",
        )
        .expect("Regex pattern should always compile");

        let captures = re
            .captures(url)
            .ok_or(anyhow!("No regex matches found for: {}", url))?;

        let (_, [bucket, region, key]) = captures.extract();

        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            region: Some(region.to_string()),
        })
    }
}
