//! vegline - coastal vegetation line mapping from Landsat archives
//!
//! Entry point for the command-line workflow driver.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::warn;

use vegline::catalog::Catalog;
use vegline::config::{self, Config};
use vegline::download::{self, DownloadPlan};
use vegline::extract::{self, ToolExtractor};
use vegline::layout::SiteLayout;
use vegline::metadata::{self, SiteMetadata};
use vegline::output::{self, MAX_GEOACCURACY_M};
use vegline::reference::{self, SiteReference};
use vegline::s3::LandsatStore;
use vegline::site::{self, SiteConfig};

/// Map coastal vegetation lines from the Landsat archive.
#[derive(Parser, Debug)]
#[command(name = "vegline")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Project configuration file
    #[arg(short, long, default_value = "vegline.toml", global = true)]
    config: PathBuf,

    /// Enable verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write template project and site configuration files
    Init {
        /// Site TOML to create next to the project file
        site: Option<PathBuf>,
    },
    /// Report how many scenes the catalog holds per satellite
    Check { site: PathBuf },
    /// Search the catalog, plan the downloads and fetch scene assets
    Fetch {
        site: PathBuf,
        /// Ignore cached metadata and download plans
        #[arg(long)]
        fresh: bool,
    },
    /// Run the line extractor over downloaded scenes
    Extract {
        site: PathBuf,
        /// Concurrent extractor processes (defaults to the project setting)
        #[arg(long)]
        jobs: Option<usize>,
    },
    /// Clean the mapped lines and export GeoJSON
    Report {
        site: PathBuf,
        /// Registration error cutoff in metres
        #[arg(long, default_value_t = MAX_GEOACCURACY_M)]
        max_rmse: f64,
        /// Also export a lon/lat file next to the projected one
        #[arg(long)]
        latlon: bool,
    },
    /// Full workflow: check, fetch, extract, report
    Run {
        site: PathBuf,
        #[arg(long)]
        fresh: bool,
        #[arg(long)]
        jobs: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    match &cli.command {
        Commands::Init { site } => cmd_init(&cli.config, site.as_deref()),
        Commands::Check { site } => cmd_check(&load_config(&cli.config)?, site).await,
        Commands::Fetch { site, fresh } => {
            cmd_fetch(&load_config(&cli.config)?, site, *fresh).await
        }
        Commands::Extract { site, jobs } => {
            cmd_extract(&load_config(&cli.config)?, site, *jobs).await
        }
        Commands::Report {
            site,
            max_rmse,
            latlon,
        } => cmd_report(&load_config(&cli.config)?, site, *max_rmse, *latlon),
        Commands::Run { site, fresh, jobs } => {
            let config = load_config(&cli.config)?;
            cmd_check(&config, site).await?;
            cmd_fetch(&config, site, *fresh).await?;
            cmd_extract(&config, site, *jobs).await?;
            cmd_report(&config, site, MAX_GEOACCURACY_M, false)
        }
    }
}

fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Err(anyhow!(
            "{} not found; run `vegline init` to create it",
            path.display()
        ));
    }
    Config::read(path).with_context(|| format!("Reading {}", path.display()))
}

fn cmd_init(config_path: &Path, site_path: Option<&Path>) -> Result<()> {
    if config_path.exists() {
        println!("{} already exists, leaving it alone", config_path.display());
    } else {
        let config = Config::from_template(&config::config_toml());
        config.write(config_path)?;
        println!("Wrote {}", config_path.display());
    }
    if let Some(site_path) = site_path {
        if site_path.exists() {
            println!("{} already exists, leaving it alone", site_path.display());
        } else {
            let site = SiteConfig::from_template(&site::site_config_toml());
            site.write(site_path)?;
            println!("Wrote {}", site_path.display());
        }
    }
    Ok(())
}

fn load_site(path: &Path) -> Result<SiteConfig> {
    let config = SiteConfig::read(path).with_context(|| format!("Reading {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Directories, clipped references, and the search rectangle for one site.
fn prepare_site(config: &Config, site: &SiteConfig) -> Result<(SiteLayout, SiteReference)> {
    let layout = SiteLayout::new(&config.workspace.data_dir, &site.sitename);
    layout.create(&site.satellites()?)?;
    let site_reference = reference::prepare_site_reference(config, site, &layout)?;
    Ok((layout, site_reference))
}

async fn open_store(config: &Config) -> LandsatStore {
    match &config.store.profile {
        Some(profile) => LandsatStore::from_profile(profile, config.store.requester_pays).await,
        None => {
            if config.store.requester_pays {
                warn!("requester-pays downloads need credentials; set store.profile");
            }
            LandsatStore::anonymous().await
        }
    }
}

async fn cmd_check(config: &Config, site_path: &Path) -> Result<()> {
    let site = load_site(site_path)?;
    let (_, site_reference) = prepare_site(config, &site)?;

    let catalog = Catalog::from_config(&config.catalog)?;
    catalog.initialize().await?;

    let report = catalog
        .check_images_available(
            &site.sitename,
            &site_reference.rect,
            &site.date_spec()?,
            &site.satellites()?,
            site.cloud_thresh,
        )
        .await?;
    println!("{report}");
    Ok(())
}

async fn cmd_fetch(config: &Config, site_path: &Path, fresh: bool) -> Result<()> {
    let site = load_site(site_path)?;
    let (layout, site_reference) = prepare_site(config, &site)?;
    if fresh {
        layout.remove_stale()?;
    }

    let metadata_path = layout.metadata_path();
    let plan_path = layout.plan_path();
    let (mut site_metadata, plan) = if metadata_path.exists() && plan_path.exists() {
        println!("Using cached metadata and download plan");
        (SiteMetadata::read(&metadata_path)?, DownloadPlan::read(&plan_path)?)
    } else {
        let catalog = Catalog::from_config(&config.catalog)?;
        catalog.initialize().await?;
        let items = catalog
            .collect_items(
                &site_reference.rect,
                &site.date_spec()?,
                &site.satellites()?,
                site.cloud_thresh,
            )
            .await?;
        let site_metadata = SiteMetadata::from_items(&site.sitename, &items);
        site_metadata.write(&metadata_path)?;
        let plan =
            download::plan_downloads(&site.sitename, &items, &layout, site.include_slc_off)?;
        plan.write(&plan_path)?;
        (site_metadata, plan)
    };

    println!(
        "{} scenes in metadata, {} files in the download plan",
        site_metadata.len(),
        plan.len()
    );

    let store = open_store(config).await;
    let http = reqwest::Client::new();
    plan.execute(&store, &http).await?;

    let refreshed = site_metadata.refresh_from_mtl(&layout)?;
    if refreshed > 0 {
        site_metadata.write(&metadata_path)?;
    }
    println!("Fetch complete ({} records refreshed from MTL)", refreshed);
    Ok(())
}

async fn cmd_extract(config: &Config, site_path: &Path, jobs: Option<usize>) -> Result<()> {
    let site = load_site(site_path)?;
    let (layout, site_reference) = prepare_site(config, &site)?;

    let Some(extractor) = ToolExtractor::from_config(&config.extractor) else {
        return Err(anyhow!(
            "No extractor command configured; set extractor.command in the project file"
        ));
    };

    let catalog = Catalog::from_config(&config.catalog)?;
    let site_metadata = metadata::load_or_collect(
        &catalog,
        &layout,
        &site_reference.rect,
        &site.date_spec()?,
        &site.satellites()?,
        site.cloud_thresh,
    )
    .await?;

    let output_epsg = site.resolved_epsg(&site_reference.ring)?;
    let jobs = jobs.unwrap_or(config.extractor.jobs);
    let (_, outcome) = extract::run_extraction(
        &extractor,
        &site,
        &layout,
        &site_metadata,
        output_epsg,
        jobs,
    )
    .await?;
    println!(
        "Mapped {} scenes ({} empty, {} skipped for cloud, {} skipped for SLC)",
        outcome.mapped, outcome.empty, outcome.skipped_cloud, outcome.skipped_slc
    );
    Ok(())
}

fn cmd_report(config: &Config, site_path: &Path, max_rmse: f64, latlon: bool) -> Result<()> {
    let site = load_site(site_path)?;
    let layout = SiteLayout::new(&config.workspace.data_dir, &site.sitename);

    let mut site_output = output::read_output(&layout)
        .with_context(|| format!("No output for {}; run `vegline extract` first", site.sitename))?;

    let duplicates = site_output.remove_duplicates();
    let inaccurate = site_output.filter_inaccurate(max_rmse);
    site_output.write(layout.output_path())?;

    let lines_path = layout
        .lines_dir()
        .join(format!("{}_lines.geojson", site.sitename));
    site_output.export_geojson(&lines_path, false)?;
    if latlon {
        let latlon_path = layout
            .lines_dir()
            .join(format!("{}_lines_latlon.geojson", site.sitename));
        site_output.export_geojson(&latlon_path, true)?;
    }
    let annual = site_output.export_annual(&layout)?;

    println!("{}", site_output.summary());
    println!(
        "Removed {} duplicates and {} poorly registered scenes; wrote {} and {} annual files",
        duplicates,
        inaccurate,
        lines_path.display(),
        annual.len()
    );
    Ok(())
}
