//! Search client for the imagery catalog, a STAC API.
//!
//! One POST to `/search` per satellite and date interval, filtered
//! server-side by footprint, platform and scene cloud cover. Pagination is
//! deliberately not followed; a truncated page is reported so the caller
//! can narrow the date window instead.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{json, Value};
use stac::{Asset, Item, ItemCollection};
use std::fmt;
use std::fs;
use tracing::{debug, warn};
use url::Url;

use crate::config::CatalogSection;
use crate::dates::{self, DateSpec};
use crate::geometry::{polygon_value, Coord};
use crate::satellites::Satellite;

/// Overrides `catalog.token_file` when set.
pub const TOKEN_ENV: &str = "VEGLINE_CATALOG_TOKEN";

pub struct Catalog {
    http: reqwest::Client,
    root: Url,
    collection: String,
    token: Option<String>,
    page_limit: usize,
}

impl Catalog {
    pub fn from_config(section: &CatalogSection) -> Result<Self> {
        let root = Url::parse(&section.url)
            .with_context(|| format!("Parsing catalog url: {}", section.url))?;
        let token = resolve_token(section)?;
        Ok(Self {
            http: reqwest::Client::new(),
            root,
            collection: section.collection.clone(),
            token,
            page_limit: section.page_limit,
        })
    }

    /// Fail fast before any site work: the landing page must answer.
    pub async fn initialize(&self) -> Result<()> {
        let response = self
            .get(self.root.as_str())
            .send()
            .await
            .context("Reaching the imagery catalog")?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Catalog rejected the landing request: {}", status));
        }
        debug!(url = %self.root, "catalog reachable");
        Ok(())
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.get(url);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    fn search_endpoint(&self) -> String {
        format!("{}/search", self.root.as_str().trim_end_matches('/'))
    }

    fn item_endpoint(&self, id: &str) -> String {
        format!(
            "{}/collections/{}/items/{}",
            self.root.as_str().trim_end_matches('/'),
            self.collection,
            id
        )
    }

    /// One page of search results.
    pub async fn search(&self, query: &SearchQuery<'_>) -> Result<SearchPage> {
        let body = query.body(&self.collection, self.page_limit)?;
        let mut builder = self.http.post(self.search_endpoint()).json(&body);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        let response = builder.send().await.context("Searching the catalog")?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow!("Catalog search failed ({}): {}", status, detail));
        }

        let value: Value = response.json().await?;
        let matched = value
            .get("numberMatched")
            .and_then(Value::as_u64)
            .or_else(|| value.pointer("/context/matched").and_then(Value::as_u64));
        let collection: ItemCollection = serde_json::from_value(value)?;
        Ok(SearchPage {
            items: collection.items,
            matched,
        })
    }

    pub async fn fetch_item(&self, id: &str) -> Result<Item> {
        let item: Item = self
            .get(&self.item_endpoint(id))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(item)
    }

    /// Scene counts per satellite for the requested window, without
    /// touching any assets.
    pub async fn check_images_available(
        &self,
        site: &str,
        region: &[Coord],
        spec: &DateSpec,
        satellites: &[Satellite],
        cloud_thresh: f64,
    ) -> Result<AvailabilityReport> {
        let mut rows = Vec::new();
        for sat in satellites {
            let Some(window) = sat.clamp_window(spec) else {
                rows.push(AvailabilityRow {
                    satellite: *sat,
                    found: 0,
                    matched: Some(0),
                    window: None,
                    note: Some("window is outside the mission span".to_string()),
                });
                continue;
            };
            let page = self
                .search(&SearchQuery {
                    region,
                    start: window.start(),
                    end: window.end(),
                    platform: Some(sat.platform()),
                    max_cloud_fraction: Some(cloud_thresh),
                })
                .await?;
            let found = page.items.len();
            let truncated = page.matched.map_or(false, |m| m > found as u64);
            rows.push(AvailabilityRow {
                satellite: *sat,
                found,
                matched: page.matched,
                window: Some((window.start(), window.end())),
                note: truncated.then(|| "more scenes than one page".to_string()),
            });
        }
        Ok(AvailabilityReport {
            site: site.to_string(),
            rows,
        })
    }

    /// Every matching item for the site, one search per satellite and
    /// date interval.
    pub async fn collect_items(
        &self,
        region: &[Coord],
        spec: &DateSpec,
        satellites: &[Satellite],
        cloud_thresh: f64,
    ) -> Result<Vec<Item>> {
        let mut items = Vec::new();
        for sat in satellites {
            let Some(window) = sat.clamp_window(spec) else {
                debug!(satellite = sat.code(), "window outside mission span, skipping");
                continue;
            };
            for (start, end) in window.intervals() {
                let page = self
                    .search(&SearchQuery {
                        region,
                        start,
                        end,
                        platform: Some(sat.platform()),
                        max_cloud_fraction: Some(cloud_thresh),
                    })
                    .await?;
                if page.matched.map_or(false, |m| m > page.items.len() as u64) {
                    warn!(
                        satellite = sat.code(),
                        %start,
                        %end,
                        matched = page.matched,
                        returned = page.items.len(),
                        "search page truncated, narrow the date window"
                    );
                }
                debug!(
                    satellite = sat.code(),
                    %start,
                    %end,
                    found = page.items.len(),
                    "search interval done"
                );
                items.extend(page.items);
            }
        }
        Ok(items)
    }
}

fn resolve_token(section: &CatalogSection) -> Result<Option<String>> {
    if let Ok(token) = std::env::var(TOKEN_ENV) {
        if !token.trim().is_empty() {
            return Ok(Some(token.trim().to_string()));
        }
    }
    let Some(path) = &section.token_file else {
        return Ok(None);
    };
    let token = fs::read_to_string(path)
        .with_context(|| format!("Reading token file {}", path.display()))?;
    let token = token.trim().to_string();
    if token.is_empty() {
        return Err(anyhow!("Token file {} is empty", path.display()));
    }
    Ok(Some(token))
}

pub struct SearchQuery<'a> {
    /// Polygon ring in lon/lat order.
    pub region: &'a [Coord],
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub platform: Option<&'a str>,
    /// Scene cloud fraction 0..=1; the catalog property is a percentage.
    pub max_cloud_fraction: Option<f64>,
}

impl SearchQuery<'_> {
    fn body(&self, collection: &str, limit: usize) -> Result<Value> {
        let intersects = serde_json::to_value(geojson::Geometry::new(polygon_value(self.region)))?;

        let mut query = serde_json::Map::new();
        if let Some(fraction) = self.max_cloud_fraction {
            query.insert(
                "eo:cloud_cover".to_string(),
                json!({"lt": fraction * 100.0}),
            );
        }
        if let Some(platform) = self.platform {
            query.insert("platform".to_string(), json!({"eq": platform}));
        }

        let mut body = json!({
            "collections": [collection],
            "intersects": intersects,
            "datetime": dates::datetime_interval(self.start, self.end),
            "limit": limit,
        });
        if !query.is_empty() {
            body["query"] = Value::Object(query);
        }
        Ok(body)
    }
}

pub struct SearchPage {
    pub items: Vec<Item>,
    /// Total matches reported by the catalog, when it reports any.
    pub matched: Option<u64>,
}

pub struct AvailabilityRow {
    pub satellite: Satellite,
    pub found: usize,
    pub matched: Option<u64>,
    pub window: Option<(NaiveDate, NaiveDate)>,
    pub note: Option<String>,
}

pub struct AvailabilityReport {
    pub site: String,
    pub rows: Vec<AvailabilityRow>,
}

impl AvailabilityReport {
    pub fn total_found(&self) -> usize {
        self.rows.iter().map(|row| row.found).sum()
    }
}

impl fmt::Display for AvailabilityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Images available for {}:", self.site)?;
        for row in &self.rows {
            let window = match row.window {
                Some((start, end)) => format!("{} .. {}", start, end),
                None => "-".to_string(),
            };
            let matched = match row.matched {
                Some(matched) => matched.to_string(),
                None => "?".to_string(),
            };
            write!(
                f,
                "  {}  {:>4} of {:>4}  {}",
                row.satellite.code(),
                row.found,
                matched,
                window
            )?;
            if let Some(note) = &row.note {
                write!(f, "  ({})", note)?;
            }
            writeln!(f)?;
        }
        write!(f, "  total: {}", self.total_found())
    }
}

fn properties_value(item: &Item) -> Option<Value> {
    serde_json::to_value(&item.properties).ok()
}

pub fn item_datetime(item: &Item) -> Option<DateTime<Utc>> {
    let props = properties_value(item)?;
    let datetime = props.get("datetime")?.as_str()?.to_owned();
    let datetime = DateTime::parse_from_rfc3339(&datetime).ok()?;
    Some(datetime.with_timezone(&Utc))
}

pub fn item_cloud_cover(item: &Item) -> Option<f64> {
    let props = properties_value(item)?;
    let cover = props.get("eo:cloud_cover")?.as_f64()?;
    Some(cover)
}

pub fn item_satellite(item: &Item) -> Option<Satellite> {
    let props = properties_value(item)?;
    let platform = props.get("platform")?.as_str()?.to_owned();
    Satellite::from_platform(&platform)
}

pub fn item_epsg(item: &Item) -> Option<u32> {
    let props = properties_value(item)?;
    let epsg = props.get("proj:epsg")?.as_u64()?;
    Some(epsg as u32)
}

pub fn item_sun_elevation(item: &Item) -> Option<f64> {
    let props = properties_value(item)?;
    let elevation = props.get("view:sun_elevation")?.as_f64()?;
    Some(elevation)
}

pub fn item_wrs_path_row(item: &Item) -> Option<(String, String)> {
    let props = properties_value(item)?;
    let path = props.get("landsat:wrs_path")?.as_str()?.to_owned();
    let row = props.get("landsat:wrs_row")?.as_str()?.to_owned();
    Some((path, row))
}

#[derive(Debug)]
pub struct AssetInfo {
    pub item_id: String,
    pub key: String,
    pub href: String,
    /// Direct bucket href from the asset's `alternate.s3` entry.
    pub s3_href: Option<String>,
    /// Catalog-reported `file:size` in bytes, checked after transfer.
    pub size: Option<i64>,
}

impl AssetInfo {
    pub fn from_item(item: &Item, key: &str) -> Result<Self> {
        let asset = item
            .assets
            .get(key)
            .ok_or(anyhow!("Key not found: {}", key))?;
        Ok(Self {
            item_id: item.id.to_owned(),
            key: key.to_owned(),
            href: asset.href.to_owned(),
            s3_href: Self::extract_s3_alternate(asset),
            size: Self::extract_file_size(asset),
        })
    }

    fn extract_s3_alternate(asset: &Asset) -> Option<String> {
        let href = asset
            .additional_fields
            .get("alternate")?
            .get("s3")?
            .get("href")?
            .as_str()?
            .to_owned();
        Some(href)
    }

    fn extract_file_size(asset: &Asset) -> Option<i64> {
        let size = asset.additional_fields.get("file:size")?.as_i64()?;
        Some(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn section(url: &str) -> CatalogSection {
        CatalogSection {
            url: url.to_string(),
            collection: "landsat-c2-l2".to_string(),
            token_file: None,
            page_limit: 100,
        }
    }

    fn region() -> Vec<Coord> {
        vec![
            [174.70, -36.90],
            [174.80, -36.90],
            [174.80, -36.80],
            [174.70, -36.80],
            [174.70, -36.90],
        ]
    }

    fn item_json(id: &str, platform: &str, datetime: &str, cloud: f64) -> Value {
        json!({
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
                "eo:cloud_cover": cloud,
                "proj:epsg": 32760,
                "view:sun_elevation": 52.31,
                "landsat:wrs_path": "073",
                "landsat:wrs_row": "087"
            },
            "links": [],
            "assets": {
                "green": {
                    "href": format!("https://landsatlook.usgs.gov/data/{id}_SR_B3.TIF"),
                    "type": "image/tiff; application=geotiff",
                    "file:checksum": "1340deadbeef",
                    "file:size": 79_140_813,
                    "alternate": {
                        "s3": {
                            "href": format!("s3://usgs-landsat/collection02/{id}_SR_B3.TIF")
                        }
                    }
                },
                "mtl.xml": {
                    "href": format!("https://landsatlook.usgs.gov/data/{id}_MTL.xml"),
                    "type": "application/xml"
                }
            }
        })
    }

    #[tokio::test]
    async fn test_search_parses_items_and_count() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(body_partial_json(json!({
                "collections": ["landsat-c2-l2"],
                "query": {
                    "eo:cloud_cover": {"lt": 50.0},
                    "platform": {"eq": "landsat-8"}
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "type": "FeatureCollection",
                "features": [item_json(
                    "LC08_L2SP_073087_20210402_20210409_02_T1",
                    "landsat-8",
                    "2021-04-02T22:11:40Z",
                    12.5
                )],
                "numberMatched": 42,
                "numberReturned": 1
            })))
            .expect(1)
            .mount(&server)
            .await;

        let catalog = Catalog::from_config(&section(&server.uri())).unwrap();
        let page = catalog
            .search(&SearchQuery {
                region: &region(),
                start: NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
                end: NaiveDate::from_ymd_opt(2021, 12, 31).unwrap(),
                platform: Some("landsat-8"),
                max_cloud_fraction: Some(0.5),
            })
            .await
            .unwrap();

        assert_eq!(page.matched, Some(42));
        assert_eq!(page.items.len(), 1);

        let item = &page.items[0];
        assert_eq!(item_satellite(item), Some(Satellite::L8));
        assert_eq!(item_cloud_cover(item), Some(12.5));
        assert_eq!(item_epsg(item), Some(32760));
        let acquired = item_datetime(item).unwrap();
        assert_eq!(acquired.date_naive(), NaiveDate::from_ymd_opt(2021, 4, 2).unwrap());

        let info = AssetInfo::from_item(item, "green").unwrap();
        assert!(info.s3_href.unwrap().starts_with("s3://usgs-landsat/"));
        assert_eq!(info.size, Some(79_140_813));
        assert!(AssetInfo::from_item(item, "nope").is_err());
    }

    #[tokio::test]
    async fn test_availability_skips_satellites_outside_span() {
        let server = MockServer::start().await;
        // Only L8 overlaps 2020; L5 must not trigger a request.
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(body_partial_json(json!({
                "query": {"platform": {"eq": "landsat-8"}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "type": "FeatureCollection",
                "features": [],
                "context": {"matched": 7, "returned": 0, "limit": 100}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let catalog = Catalog::from_config(&section(&server.uri())).unwrap();
        let spec = DateSpec::from_strings(&[
            "2020-01-01".to_string(),
            "2020-12-31".to_string(),
        ])
        .unwrap();
        let report = catalog
            .check_images_available(
                "nzd0151",
                &region(),
                &spec,
                &[Satellite::L5, Satellite::L8],
                0.5,
            )
            .await
            .unwrap();

        assert_eq!(report.rows.len(), 2);
        assert!(report.rows[0].note.is_some());
        assert_eq!(report.rows[0].found, 0);
        assert_eq!(report.rows[1].matched, Some(7));
        let rendered = report.to_string();
        assert!(rendered.contains("nzd0151"));
        assert!(rendered.contains("L8"));
    }

    #[tokio::test]
    async fn test_fetch_item_by_id() {
        let server = MockServer::start().await;
        let id = "LE07_L2SP_073087_20100115_20200911_02_T1";
        Mock::given(method("GET"))
            .and(path(format!("/collections/landsat-c2-l2/items/{id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(item_json(
                id,
                "landsat-7",
                "2010-01-15T21:58:02Z",
                3.0,
            )))
            .mount(&server)
            .await;

        let catalog = Catalog::from_config(&section(&server.uri())).unwrap();
        let item = catalog.fetch_item(id).await.unwrap();
        assert_eq!(item.id, id);
        assert_eq!(item_satellite(&item), Some(Satellite::L7));
        assert_eq!(
            item_wrs_path_row(&item),
            Some(("073".to_string(), "087".to_string()))
        );
    }
}
