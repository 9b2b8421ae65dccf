use crate::config::AppConfig;
use crate::layers::{self, IconAsset, LayerRegistry};
use crate::map::StyleDocument;
use crate::processing::ReconciledLayers;
use crate::view::MapView;
use anyhow::{Context, Result};
use rayon::prelude::*;
use serde_json::Value;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::{info, warn};

/// Icons are served from this path under the output directory.
pub const ICON_URL_PREFIX: &str = "icons";

/// Empty style for this deployment, with the base style's layers underneath
/// when a local copy is configured.
pub fn new_document(config: &AppConfig) -> Result<StyleDocument> {
    let map = &config.map;
    let mut document = StyleDocument::new(&map.name, map.center, map.zoom, &map.base_style);
    if let Some(path) = &map.base_style_path {
        let mut base_layers = load_base_layers(path)?;
        let boosted = layers::boost_street_labels(&mut base_layers);
        info!(layers = base_layers.len(), boosted, "loaded base style");
        document = document.with_base_layers(base_layers);
    }
    Ok(document)
}

fn load_base_layers(path: &Path) -> Result<Vec<Value>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open base style: {:?}", path))?;
    let style: Value = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse base style: {:?}", path))?;
    match style.get("layers") {
        Some(Value::Array(layers)) => Ok(layers.clone()),
        _ => Ok(Vec::new()),
    }
}

/// Composes a view over a fresh document: icons first, then sources and the
/// layers they allow, then the reset selection.
pub fn build_view(
    config: &AppConfig,
    icons: &[IconAsset],
    layers: &ReconciledLayers,
) -> Result<MapView<StyleDocument>> {
    let registry = LayerRegistry::for_groups(&config.deployment.groups);
    let mut view = MapView::new(new_document(config)?, registry);
    view.register_icons(icons, ICON_URL_PREFIX);
    view.compose(layers);
    Ok(view)
}

/// Writes `style.json`, one `sources/<id>.geojson` per source and the icon
/// files into the output directory.
pub fn write_outputs(config: &AppConfig, document: &StyleDocument, icons: &[IconAsset]) -> Result<()> {
    let out_dir = &config.output.dir;
    let sources_dir = out_dir.join("sources");
    let icons_dir = out_dir.join(ICON_URL_PREFIX);
    fs::create_dir_all(&sources_dir).context("Failed to create sources directory")?;
    fs::create_dir_all(&icons_dir).context("Failed to create icons directory")?;

    write_json(&out_dir.join("style.json"), &document.to_json())?;

    let sources: Vec<_> = document.sources().collect();
    sources.par_iter().try_for_each(|(id, data)| {
        let path = sources_dir.join(format!("{id}.geojson"));
        let file = File::create(&path)
            .with_context(|| format!("Failed to create {:?}", path))?;
        serde_json::to_writer(BufWriter::new(file), data)
            .with_context(|| format!("Failed to write {:?}", path))
    })?;

    for icon in icons {
        let target = icons_dir.join(&icon.file_name);
        if let Err(e) = fs::copy(&icon.path, &target) {
            warn!(icon = icon.id.image_name(), error = %e, "icon not copied");
        }
    }

    info!(
        "Wrote style with {} layers and {} sources to {:?}",
        document.layers().len(),
        sources.len(),
        out_dir
    );
    Ok(())
}

fn write_json(path: &Path, value: &Value) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create {:?}", path))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)
        .with_context(|| format!("Failed to write {:?}", path))
}
