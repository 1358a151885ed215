use anyhow::Result;

extern crate vegline;
use vegline::catalog::Catalog;
use vegline::config::{self, Config};
use vegline::download;
use vegline::layout::SiteLayout;
use vegline::s3::LandsatStore;
use vegline::site::{self, SiteConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_template(&config::config_toml());
    let site = SiteConfig::from_template(&site::site_config_toml());

    let layout = SiteLayout::new(&config.workspace.data_dir, &site.sitename);
    layout.create(&site.satellites()?)?;

    let catalog = Catalog::from_config(&config.catalog)?;
    catalog.initialize().await?;

    // Search rectangle around the template site, in place of its polygon file
    let region = vec![
        [174.70, -36.90],
        [174.80, -36.90],
        [174.80, -36.80],
        [174.70, -36.80],
        [174.70, -36.90],
    ];
    let items = catalog
        .collect_items(
            &region,
            &site.date_spec()?,
            &site.satellites()?,
            site.cloud_thresh,
        )
        .await?;

    let plan = download::plan_downloads(&site.sitename, &items, &layout, site.include_slc_off)?;
    let _ = plan.write(layout.plan_path())?;

    let store = LandsatStore::anonymous().await;
    let http = reqwest::Client::new();
    let _ = plan.execute(&store, &http).await?;

    Ok(())
}
