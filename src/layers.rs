//! Layer and icon registry.
//!
//! Every visual layer is declared here once: which source it binds, which
//! icon it draws, how the icon scales with zoom, and the structural filter
//! that is part of the layer itself rather than of the user's selection.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::attributes::Field;
use crate::config::IconsConfig;
use crate::expression::Expression;
use crate::map::LayerStyle;
use crate::types::{FacilityGroup, SourceId};

/// Zoom levels at which size curves are pinned.
pub const ZOOM_STOPS: [f64; 3] = [10.0, 14.0, 16.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IconId {
    Restroom,
    Fountain,
    Baby,
    Shower,
    Combo,
}

impl IconId {
    /// Load order. Each icon is loaded only after its predecessor settled.
    pub const ALL: [IconId; 5] = [Self::Restroom, Self::Fountain, Self::Baby, Self::Shower, Self::Combo];

    /// Image name registered with the map.
    pub fn image_name(self) -> &'static str {
        match self {
            Self::Restroom => "restroom-icon",
            Self::Fountain => "fountain-icon",
            Self::Baby => "baby-icon",
            Self::Shower => "shower-icon",
            Self::Combo => "combo-icon",
        }
    }

    /// Key used for per-icon overrides in the config.
    pub fn key(self) -> &'static str {
        match self {
            Self::Restroom => "restroom",
            Self::Fountain => "fountain",
            Self::Baby => "baby",
            Self::Shower => "shower",
            Self::Combo => "combo",
        }
    }

    pub fn default_file(self) -> &'static str {
        match self {
            Self::Restroom => "restroom.png",
            Self::Fountain => "drop.png",
            Self::Baby => "baby.png",
            Self::Shower => "shower.png",
            Self::Combo => "combo.png",
        }
    }
}

/// Linear zoom-to-size curve over [`ZOOM_STOPS`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeCurve {
    sizes: [f64; 3],
}

impl SizeCurve {
    pub const SMALL: SizeCurve = SizeCurve::new(0.12, 0.18, 0.24);
    pub const LARGE: SizeCurve = SizeCurve::new(0.15, 0.22, 0.28);
    pub const BADGE: SizeCurve = SizeCurve::new(0.1, 0.14, 0.18);

    pub const fn new(small: f64, medium: f64, large: f64) -> Self {
        Self {
            sizes: [small, medium, large],
        }
    }

    pub fn to_json(&self) -> Value {
        let mut out = vec![json!("interpolate"), json!(["linear"]), json!(["zoom"])];
        for (zoom, size) in ZOOM_STOPS.iter().zip(self.sizes) {
            out.push(json!(zoom));
            out.push(json!(size));
        }
        Value::Array(out)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayerKind {
    Line { color: &'static str, width: f64 },
    Symbol { icon: IconId, size: SizeCurve, offset: Option<[f64; 2]> },
}

/// How the user's district selection reaches a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistrictScope {
    /// Features carry the district under this attribute.
    Attribute(&'static str),
    /// Features carry no district. Only the explicit-deny (empty) selection
    /// affects them.
    Unassigned,
    /// Never district-filtered.
    Exempt,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerBinding {
    pub id: &'static str,
    pub source: SourceId,
    pub kind: LayerKind,
    pub group: Option<FacilityGroup>,
    pub district_scope: DistrictScope,
    pub structural_filter: Option<Expression>,
    pub interactive: bool,
}

impl LayerBinding {
    fn symbol(id: &'static str, source: SourceId, icon: IconId, size: SizeCurve) -> Self {
        Self {
            id,
            source,
            kind: LayerKind::Symbol { icon, size, offset: None },
            group: source.group(),
            district_scope: DistrictScope::Attribute(Field::CouncilDistrict.key()),
            structural_filter: None,
            interactive: true,
        }
    }

    fn with_offset(mut self, dx: f64, dy: f64) -> Self {
        if let LayerKind::Symbol { offset, .. } = &mut self.kind {
            *offset = Some([dx, dy]);
        }
        self
    }

    fn with_structural(mut self, filter: Expression) -> Self {
        self.structural_filter = Some(filter);
        self
    }

    fn with_scope(mut self, scope: DistrictScope) -> Self {
        self.district_scope = scope;
        self
    }

    pub fn icon(&self) -> Option<IconId> {
        match self.kind {
            LayerKind::Symbol { icon, .. } => Some(icon),
            LayerKind::Line { .. } => None,
        }
    }

    /// Engine layer declaration, with the structural filter baked in.
    pub fn style(&self) -> LayerStyle {
        let mut layout = Map::new();
        let mut paint = Map::new();
        let layer_type = match &self.kind {
            LayerKind::Line { color, width } => {
                paint.insert("line-color".to_string(), json!(color));
                paint.insert("line-width".to_string(), json!(width));
                "line"
            }
            LayerKind::Symbol { icon, size, offset } => {
                layout.insert("icon-image".to_string(), json!(icon.image_name()));
                layout.insert("icon-allow-overlap".to_string(), json!(true));
                layout.insert("icon-anchor".to_string(), json!("bottom"));
                layout.insert("icon-size".to_string(), size.to_json());
                if let Some(offset) = offset {
                    layout.insert("icon-offset".to_string(), json!(offset));
                }
                "symbol"
            }
        };
        LayerStyle {
            id: self.id.to_string(),
            layer_type: layer_type.to_string(),
            source: self.source.name().to_string(),
            layout,
            paint,
            filter: self.structural_filter.as_ref().map(Expression::to_json),
        }
    }
}

/// All layers in draw order.
pub fn default_bindings() -> Vec<LayerBinding> {
    vec![
        LayerBinding {
            id: "cd-boundaries",
            source: SourceId::Districts,
            kind: LayerKind::Line {
                color: "white",
                width: 1.0,
            },
            group: None,
            district_scope: DistrictScope::Exempt,
            structural_filter: None,
            interactive: false,
        },
        LayerBinding::symbol("combo-layer-for-hydration", SourceId::HydrationCombo, IconId::Combo, SizeCurve::SMALL),
        LayerBinding::symbol("hydration", SourceId::Hydration, IconId::Fountain, SizeCurve::LARGE),
        LayerBinding::symbol("water_only_layer", SourceId::WaterOnly, IconId::Fountain, SizeCurve::LARGE),
        LayerBinding::symbol("restrooms-layer", SourceId::Restrooms, IconId::Restroom, SizeCurve::SMALL)
            .with_structural(Expression::count_above_zero(Field::Toilets.key())),
        LayerBinding::symbol("combo-layer", SourceId::RestroomsCombo, IconId::Combo, SizeCurve::LARGE),
        LayerBinding::symbol("restrooms-baby", SourceId::Restrooms, IconId::Baby, SizeCurve::BADGE)
            .with_offset(-12.0, 0.0)
            .with_structural(Expression::count_above_zero(Field::BabyChanging.key())),
        LayerBinding::symbol("restrooms-shower", SourceId::Restrooms, IconId::Shower, SizeCurve::BADGE)
            .with_offset(12.0, 0.0)
            .with_structural(Expression::count_above_zero(Field::Showers.key())),
        LayerBinding::symbol("manual-restrooms-layer", SourceId::ManualRestrooms, IconId::Restroom, SizeCurve::SMALL)
            .with_scope(DistrictScope::Unassigned),
    ]
}

/// The layers a deployment declares, given its capability set.
#[derive(Debug, Clone)]
pub struct LayerRegistry {
    bindings: Vec<LayerBinding>,
}

impl LayerRegistry {
    pub fn for_groups(groups: &BTreeSet<FacilityGroup>) -> Self {
        let bindings = default_bindings()
            .into_iter()
            .filter(|binding| binding.group.map_or(true, |group| groups.contains(&group)))
            .collect();
        Self { bindings }
    }

    pub fn bindings(&self) -> &[LayerBinding] {
        &self.bindings
    }

    pub fn get(&self, id: &str) -> Option<&LayerBinding> {
        self.bindings.iter().find(|binding| binding.id == id)
    }

    pub fn interactive(&self) -> impl Iterator<Item = &LayerBinding> {
        self.bindings.iter().filter(|binding| binding.interactive)
    }
}

#[derive(Debug, Clone)]
pub struct IconAsset {
    pub id: IconId,
    pub path: PathBuf,
    pub file_name: String,
    pub width: u32,
    pub height: u32,
    pub pixel_ratio: f32,
}

/// Decodes icon images one after another. A failed icon is logged and left
/// out, and layers drawing it are never declared.
pub fn load_icons(config: &IconsConfig) -> Vec<IconAsset> {
    let mut loaded = Vec::new();
    for icon in IconId::ALL {
        let path = config.path(icon);
        match image::open(&path) {
            Ok(img) => {
                info!(icon = icon.image_name(), width = img.width(), height = img.height(), "loaded icon");
                loaded.push(IconAsset {
                    id: icon,
                    path: path.clone(),
                    file_name: config.file_name(icon).to_string(),
                    width: img.width(),
                    height: img.height(),
                    pixel_ratio: config.pixel_ratio,
                });
            }
            Err(e) => warn!(icon = icon.image_name(), path = %path.display(), error = %e, "icon failed to load"),
        }
    }
    loaded
}

/// Enlarges road label text in a base style. Returns how many layers changed.
pub fn boost_street_labels(layers: &mut [Value]) -> usize {
    let curve = SizeCurve::new(12.0, 15.0, 18.0).to_json();
    let mut boosted = 0;
    for layer in layers.iter_mut() {
        let Some(layer) = layer.as_object_mut() else { continue };
        let is_symbol = layer.get("type").and_then(Value::as_str) == Some("symbol");
        let id = layer
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();
        let is_road_label =
            id.contains("label") && ["road", "street", "highway", "motorway"].iter().any(|k| id.contains(k));
        if !is_symbol || !is_road_label {
            continue;
        }
        let layout = layer.entry("layout").or_insert_with(|| json!({}));
        if let Some(layout) = layout.as_object_mut() {
            layout.insert("text-size".to_string(), curve.clone());
            boosted += 1;
        }
    }
    boosted
}
