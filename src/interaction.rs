//! Pointer interaction for facility layers.
//!
//! Each interactive layer runs a two-state hover machine
//! (`Idle -> Hovering` on enter, back on leave). A click opens a pinned popup
//! from either state and leaves the hover state alone. Handlers answer with
//! [`PopupCommand`]s for the browser side to carry out.

use std::collections::BTreeMap;

use geo::Point;
use geojson::{Geometry, JsonObject, Value as GeoValue};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::attributes::{self, Field, PLACEHOLDER};
use crate::layers::{IconId, LayerRegistry};
use crate::map::MapSurface;
use crate::spatial::distance_meters;
use crate::types::FacilityGroup;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Cursor {
    Default,
    Pointer,
}

/// A feature as the engine reports it under the pointer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RenderedFeature {
    #[serde(default)]
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub properties: JsonObject,
}

impl RenderedFeature {
    fn point(&self) -> Option<[f64; 2]> {
        match self.geometry.as_ref().map(|g| &g.value) {
            Some(GeoValue::Point(coords)) if coords.len() >= 2 => Some([coords[0], coords[1]]),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointerHit {
    pub position: Point<f64>,
    pub features: Vec<RenderedFeature>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PointerEvent {
    Enter(PointerHit),
    Move(PointerHit),
    Leave,
    Click(PointerHit),
}

/// Event name as the browser reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerEventKind {
    Enter,
    Move,
    Leave,
    Click,
}

impl PointerEvent {
    pub fn new(kind: PointerEventKind, hit: PointerHit) -> Self {
        match kind {
            PointerEventKind::Enter => Self::Enter(hit),
            PointerEventKind::Move => Self::Move(hit),
            PointerEventKind::Leave => Self::Leave,
            PointerEventKind::Click => Self::Click(hit),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum PopupCommand {
    SetCursor { cursor: Cursor },
    ShowHover { anchor: [f64; 2], content: PopupContent },
    MoveHover { anchor: [f64; 2] },
    HideHover,
    OpenPinned { anchor: [f64; 2], content: PopupContent },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HoverState {
    #[default]
    Idle,
    Hovering,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopupRow {
    pub label: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopupContent {
    pub icon: IconId,
    pub rows: Vec<PopupRow>,
}

impl PopupContent {
    /// Rows for every displayed field, resolved through the alias table.
    pub fn build(props: &JsonObject, group: Option<FacilityGroup>) -> Self {
        let rows = Field::DISPLAYED
            .iter()
            .map(|&field| PopupRow {
                label: field.label(),
                value: attributes::resolve_text(props, field).unwrap_or_else(|| PLACEHOLDER.to_string()),
            })
            .collect();
        Self {
            icon: resolve_icon(props, group),
            rows,
        }
    }

    pub fn value(&self, field: Field) -> Option<&str> {
        self.rows
            .iter()
            .find(|row| row.label == field.label())
            .map(|row| row.value.as_str())
    }

    pub fn to_html(&self, icon_url: &str) -> String {
        let mut html = String::from(r#"<div style="font-size:12px;line-height:1.35;">"#);
        html.push_str(&format!(
            r#"<img src="{}" alt="icon" style="width:30px;height:30px;object-fit:contain;" />"#,
            escape_html(icon_url)
        ));
        for row in &self.rows {
            html.push_str(&format!(
                "<div><strong>{}:</strong> {}</div>",
                escape_html(row.label),
                escape_html(&row.value)
            ));
        }
        html.push_str("</div>");
        html
    }
}

/// Combo flag first, then the layer's group.
pub fn resolve_icon(props: &JsonObject, group: Option<FacilityGroup>) -> IconId {
    if attributes::combo_flag(props) {
        return IconId::Combo;
    }
    match group {
        Some(FacilityGroup::Combo) => IconId::Combo,
        Some(FacilityGroup::Bathrooms) => IconId::Restroom,
        Some(FacilityGroup::Fountains) | None => IconId::Fountain,
    }
}

/// Nearest distinct point coordinate among the features, by great-circle
/// distance from the pointer. Ties keep the first seen.
pub fn closest_point(position: Point<f64>, features: &[RenderedFeature]) -> Option<[f64; 2]> {
    let mut best: Option<([f64; 2], f64)> = None;
    for coords in features.iter().filter_map(RenderedFeature::point) {
        let distance = distance_meters(position, Point::new(coords[0], coords[1]));
        if best.map_or(true, |(_, d)| distance < d) {
            best = Some((coords, distance));
        }
    }
    best.map(|(coords, _)| coords)
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct LayerInteraction {
    pub layer_id: String,
    pub group: Option<FacilityGroup>,
    state: HoverState,
}

impl LayerInteraction {
    pub fn new(layer_id: impl Into<String>, group: Option<FacilityGroup>) -> Self {
        Self {
            layer_id: layer_id.into(),
            group,
            state: HoverState::Idle,
        }
    }

    /// Continues from a state the caller kept between events.
    pub fn with_state(mut self, state: HoverState) -> Self {
        self.state = state;
        self
    }

    pub fn state(&self) -> HoverState {
        self.state
    }

    /// Anchor and content for a hit: the closest point feature, or the first
    /// feature at the pointer position when none is a point.
    fn target(&self, hit: &PointerHit) -> Option<([f64; 2], PopupContent)> {
        let first = hit.features.first()?;
        let (anchor, feature) = match closest_point(hit.position, &hit.features) {
            Some(anchor) => {
                let feature = hit.features.iter().find(|f| f.point() == Some(anchor)).unwrap_or(first);
                (anchor, feature)
            }
            None => ([hit.position.x(), hit.position.y()], first),
        };
        Some((anchor, PopupContent::build(&feature.properties, self.group)))
    }

    pub fn handle(&mut self, event: &PointerEvent) -> Vec<PopupCommand> {
        match event {
            PointerEvent::Enter(hit) => {
                self.state = HoverState::Hovering;
                let mut commands = vec![PopupCommand::SetCursor { cursor: Cursor::Pointer }];
                if let Some((anchor, content)) = self.target(hit) {
                    commands.push(PopupCommand::ShowHover { anchor, content });
                }
                commands
            }
            PointerEvent::Move(hit) if self.state == HoverState::Hovering => self
                .target(hit)
                .map(|(anchor, _)| vec![PopupCommand::MoveHover { anchor }])
                .unwrap_or_default(),
            PointerEvent::Move(_) => Vec::new(),
            PointerEvent::Leave => {
                self.state = HoverState::Idle;
                vec![PopupCommand::SetCursor { cursor: Cursor::Default }, PopupCommand::HideHover]
            }
            PointerEvent::Click(hit) => self
                .target(hit)
                .map(|(anchor, content)| vec![PopupCommand::OpenPinned { anchor, content }])
                .unwrap_or_default(),
        }
    }
}

/// Interactive layers a map actually declared, with the group each one
/// falls back to for its popup icon.
#[derive(Debug, Clone, Default)]
pub struct InteractionRegistry {
    layers: BTreeMap<String, Option<FacilityGroup>>,
}

impl InteractionRegistry {
    /// Attaches a handler to every interactive layer present on the map.
    /// Returns how many were newly attached.
    pub fn attach(&mut self, map: &dyn MapSurface, registry: &LayerRegistry) -> usize {
        let mut attached = 0;
        for binding in registry.interactive() {
            if !map.has_layer(binding.id) {
                debug!(layer = binding.id, "layer not declared; no interaction attached");
                continue;
            }
            if self.layers.insert(binding.id.to_string(), binding.group).is_none() {
                attached += 1;
            }
        }
        attached
    }

    /// Handler for an attached layer, resumed from `state`.
    pub fn resume(&self, layer_id: &str, state: HoverState) -> Option<LayerInteraction> {
        let group = *self.layers.get(layer_id)?;
        Some(LayerInteraction::new(layer_id, group).with_state(state))
    }

    pub fn layer_ids(&self) -> impl Iterator<Item = &str> {
        self.layers.keys().map(String::as_str)
    }

    pub fn detach_all(&mut self) {
        self.layers.clear();
    }
}
