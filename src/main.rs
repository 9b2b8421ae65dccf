pub mod types;
pub mod config;
pub mod attributes;
pub mod spatial;
pub mod data;
pub mod geocode;
pub mod processing;
pub mod expression;
pub mod filter;
pub mod layers;
pub mod map;
pub mod interaction;
pub mod view;
pub mod render;
pub mod server;

use clap::{Parser, Subcommand};
use geocode::{Geocoder, MapboxGeocoder};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile the datasets and write the map style, sources and icons
    Generate {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Serve the map and its API
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Generate { config } => {
            info!("Generating map with config: {:?}", config);
            let app_config = config::AppConfig::load_from_file(config)?;

            // 1. Load static data and manual addresses
            let datasets = data::load_static_datasets(&app_config)?;
            let addresses = data::load_manual_addresses(&app_config)?;

            // 2. Geocode, one address at a time
            let geocoded = match MapboxGeocoder::from_env(&app_config.geocoder) {
                Some(geocoder) => geocode::geocode_addresses(&geocoder, &addresses).await,
                None => Vec::new(),
            };

            // 3. Reconcile
            let rules = processing::ReconcileRules::from_config(&app_config);
            let layers = processing::reconcile(&datasets, &geocoded, &rules);

            // 4. Compose and write
            let icons = layers::load_icons(&app_config.icons);
            let view = render::build_view(&app_config, &icons, &layers)?;
            let document = view.release();
            render::write_outputs(&app_config, &document, &icons)?;

            info!("Generation complete!");
        }
        Commands::Serve { config } => {
            info!("Serving map with config: {:?}", config);
            let app_config = config::AppConfig::load_from_file(config)?;

            let datasets = data::load_static_datasets(&app_config)?;
            let addresses = data::load_manual_addresses(&app_config)?;
            let icons = layers::load_icons(&app_config.icons);
            let geocoder = MapboxGeocoder::from_env(&app_config.geocoder)
                .map(|g| Arc::new(g) as Arc<dyn Geocoder>);

            server::start_server(app_config, datasets, icons, addresses, geocoder).await?;
        }
    }

    Ok(())
}
