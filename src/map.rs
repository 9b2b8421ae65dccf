//! The map engine as seen from this crate.
//!
//! [`MapSurface`] is the set of calls the composition code makes against a
//! live map (sources, images, layers, filters, visibility). [`StyleDocument`]
//! implements it in memory and serializes to a style document the browser
//! engine loads on top of its base style.

use std::collections::{BTreeMap, BTreeSet};

use geojson::FeatureCollection;
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::expression::Expression;

#[derive(Debug, Error, PartialEq)]
pub enum MapError {
    #[error("source `{0}` is not registered")]
    UnknownSource(String),
    #[error("source `{0}` already exists")]
    DuplicateSource(String),
    #[error("layer `{0}` already exists")]
    DuplicateLayer(String),
    #[error("layer `{0}` does not exist")]
    UnknownLayer(String),
    #[error("image `{0}` is not loaded")]
    MissingImage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Visible,
    None,
}

impl Visibility {
    pub fn from_shown(shown: bool) -> Self {
        if shown {
            Self::Visible
        } else {
            Self::None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerStyle {
    pub id: String,
    #[serde(rename = "type")]
    pub layer_type: String,
    pub source: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub layout: Map<String, Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub paint: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
}

impl LayerStyle {
    fn icon_image(&self) -> Option<&str> {
        self.layout.get("icon-image").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageRef {
    pub url: String,
    #[serde(rename = "pixelRatio")]
    pub pixel_ratio: f32,
    pub width: u32,
    pub height: u32,
}

pub trait MapSurface {
    fn has_image(&self, name: &str) -> bool;
    fn add_image(&mut self, name: &str, image: ImageRef);

    fn has_source(&self, id: &str) -> bool;
    fn add_source(&mut self, id: &str, data: FeatureCollection) -> Result<(), MapError>;
    fn set_source_data(&mut self, id: &str, data: FeatureCollection) -> Result<(), MapError>;

    fn has_layer(&self, id: &str) -> bool;
    /// Rejects layers whose source or icon image is not registered.
    fn add_layer(&mut self, layer: LayerStyle) -> Result<(), MapError>;
    fn set_filter(&mut self, id: &str, filter: Option<&Expression>) -> Result<(), MapError>;
    fn set_visibility(&mut self, id: &str, visibility: Visibility) -> Result<(), MapError>;
}

/// In-memory map state that serializes to a style document.
#[derive(Debug, Clone)]
pub struct StyleDocument {
    name: String,
    center: [f64; 2],
    zoom: f64,
    base_style: String,
    base_layers: Vec<Value>,
    sources: BTreeMap<String, FeatureCollection>,
    images: BTreeMap<String, ImageRef>,
    layers: Vec<LayerStyle>,
}

impl StyleDocument {
    pub fn new(name: impl Into<String>, center: [f64; 2], zoom: f64, base_style: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            center,
            zoom,
            base_style: base_style.into(),
            base_layers: Vec::new(),
            sources: BTreeMap::new(),
            images: BTreeMap::new(),
            layers: Vec::new(),
        }
    }

    /// Layers copied from a local base style, drawn beneath ours.
    pub fn with_base_layers(mut self, layers: Vec<Value>) -> Self {
        self.base_layers = layers;
        self
    }

    pub fn layer(&self, id: &str) -> Option<&LayerStyle> {
        self.layers.iter().find(|layer| layer.id == id)
    }

    pub fn layers(&self) -> &[LayerStyle] {
        &self.layers
    }

    pub fn layer_ids(&self) -> BTreeSet<String> {
        self.layers.iter().map(|layer| layer.id.clone()).collect()
    }

    pub fn source(&self, id: &str) -> Option<&FeatureCollection> {
        self.sources.get(id)
    }

    pub fn sources(&self) -> impl Iterator<Item = (&str, &FeatureCollection)> {
        self.sources.iter().map(|(id, data)| (id.as_str(), data))
    }

    pub fn to_json(&self) -> Value {
        let sources: Map<String, Value> = self
            .sources
            .iter()
            .map(|(id, data)| (id.clone(), json!({ "type": "geojson", "data": data })))
            .collect();
        let mut layers = self.base_layers.clone();
        layers.extend(self.layers.iter().map(|layer| json!(layer)));
        json!({
            "version": 8,
            "name": self.name,
            "center": self.center,
            "zoom": self.zoom,
            "sources": sources,
            "layers": layers,
            "metadata": {
                "base_style": self.base_style,
                "images": self.images,
            },
        })
    }

    fn layer_mut(&mut self, id: &str) -> Result<&mut LayerStyle, MapError> {
        self.layers
            .iter_mut()
            .find(|layer| layer.id == id)
            .ok_or_else(|| MapError::UnknownLayer(id.to_string()))
    }
}

impl MapSurface for StyleDocument {
    fn has_image(&self, name: &str) -> bool {
        self.images.contains_key(name)
    }

    fn add_image(&mut self, name: &str, image: ImageRef) {
        self.images.insert(name.to_string(), image);
    }

    fn has_source(&self, id: &str) -> bool {
        self.sources.contains_key(id)
    }

    fn add_source(&mut self, id: &str, data: FeatureCollection) -> Result<(), MapError> {
        if self.has_source(id) {
            return Err(MapError::DuplicateSource(id.to_string()));
        }
        self.sources.insert(id.to_string(), data);
        Ok(())
    }

    fn set_source_data(&mut self, id: &str, data: FeatureCollection) -> Result<(), MapError> {
        let slot = self
            .sources
            .get_mut(id)
            .ok_or_else(|| MapError::UnknownSource(id.to_string()))?;
        *slot = data;
        Ok(())
    }

    fn has_layer(&self, id: &str) -> bool {
        self.layer(id).is_some()
    }

    fn add_layer(&mut self, layer: LayerStyle) -> Result<(), MapError> {
        if self.has_layer(&layer.id) {
            return Err(MapError::DuplicateLayer(layer.id));
        }
        if !self.has_source(&layer.source) {
            return Err(MapError::UnknownSource(layer.source));
        }
        if let Some(icon) = layer.icon_image() {
            if !self.has_image(icon) {
                return Err(MapError::MissingImage(icon.to_string()));
            }
        }
        self.layers.push(layer);
        Ok(())
    }

    fn set_filter(&mut self, id: &str, filter: Option<&Expression>) -> Result<(), MapError> {
        self.layer_mut(id)?.filter = filter.map(Expression::to_json);
        Ok(())
    }

    fn set_visibility(&mut self, id: &str, visibility: Visibility) -> Result<(), MapError> {
        self.layer_mut(id)?
            .layout
            .insert("visibility".to_string(), json!(visibility));
        Ok(())
    }
}
