use std::collections::{BTreeMap, BTreeSet};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::fs;
use anyhow::{bail, Context, Result};

use crate::layers::IconId;
use crate::types::FacilityGroup;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub input: InputConfig,
    #[serde(default)]
    pub manual: ManualConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub geocoder: GeocoderConfig,
    #[serde(default)]
    pub deployment: DeploymentConfig,
    pub icons: IconsConfig,
    #[serde(default)]
    pub map: MapConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Static datasets. A missing path means the deployment has no such source.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct InputConfig {
    pub restrooms: Option<PathBuf>,
    pub restrooms_combo: Option<PathBuf>,
    pub hydration: Option<PathBuf>,
    pub hydration_combo: Option<PathBuf>,
    pub water_only: Option<PathBuf>,
    pub districts: Option<PathBuf>, // GeoJSON or shapefile
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ManualConfig {
    #[serde(default)]
    pub addresses: Vec<String>,
    pub addresses_csv: Option<PathBuf>,
    /// Geocoded fine, but no restroom on site.
    #[serde(default)]
    pub without_restroom: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconcileConfig {
    #[serde(default = "default_duplicate_radius")]
    pub duplicate_radius_meters: f64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            duplicate_radius_meters: default_duplicate_radius(),
        }
    }
}

fn default_duplicate_radius() -> f64 {
    80.0
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GeocoderConfig {
    pub endpoint: String,
    pub access_token_env: String,
    pub city_suffix: String,
    pub country: String,
    pub proximity: [f64; 2],
    pub timeout_secs: u64,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.mapbox.com/geocoding/v5/mapbox.places".to_string(),
            access_token_env: "MAPBOX_ACCESS_TOKEN".to_string(),
            city_suffix: ", Los Angeles, CA".to_string(),
            country: "US".to_string(),
            proximity: [-118.242, 34.053],
            timeout_secs: 10,
        }
    }
}

/// Which facility groups exist in this deployment.
#[derive(Debug, Deserialize, Clone)]
pub struct DeploymentConfig {
    #[serde(default = "default_groups")]
    pub groups: BTreeSet<FacilityGroup>,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            groups: default_groups(),
        }
    }
}

fn default_groups() -> BTreeSet<FacilityGroup> {
    FacilityGroup::ALL.into_iter().collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IconsConfig {
    pub dir: PathBuf,
    /// Per-icon file overrides keyed by `restroom`, `fountain`, `baby`, `shower`, `combo`.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    #[serde(default = "default_pixel_ratio")]
    pub pixel_ratio: f32,
}

impl IconsConfig {
    pub fn file_name(&self, icon: IconId) -> &str {
        self.files
            .get(icon.key())
            .map(String::as_str)
            .unwrap_or_else(|| icon.default_file())
    }

    pub fn path(&self, icon: IconId) -> PathBuf {
        self.dir.join(self.file_name(icon))
    }
}

fn default_pixel_ratio() -> f32 {
    2.0
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MapConfig {
    pub name: String,
    pub center: [f64; 2],
    pub zoom: f64,
    pub base_style: String,
    pub base_style_path: Option<PathBuf>,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            name: "Bathrooms and Drinking Fountains".to_string(),
            center: [-118.41, 34.0],
            zoom: 10.0,
            base_style: "mapbox://styles/mapbox/dark-v11".to_string(),
            base_style_path: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: [u8; 4],
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: [127, 0, 0, 1],
            port: 8080,
        }
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)
            .with_context(|| "Failed to parse TOML configuration")?;
        let radius = config.reconcile.duplicate_radius_meters;
        if !radius.is_finite() || radius < 0.0 {
            bail!("reconcile.duplicate_radius_meters must be a finite, non-negative distance, got {radius}");
        }
        Ok(config)
    }
}
