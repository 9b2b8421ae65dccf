//! Filter predicate compiler.
//!
//! Turns the viewer's [`FilterSelection`] into per-layer engine instructions.
//! Compilation is a pure function of the selection and the layer bindings,
//! always covers every layer, and always re-emits the layer's structural
//! filter alongside the district predicate.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::debug;

use crate::expression::Expression;
use crate::layers::{DistrictScope, LayerBinding};
use crate::map::{MapSurface, Visibility};
use crate::types::{DistrictId, FacilityGroup};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterSelection {
    pub districts: BTreeSet<DistrictId>,
    pub show_bathrooms: bool,
    pub show_fountains: bool,
    pub show_combo: bool,
}

impl Default for FilterSelection {
    /// Every district selected, every toggle on.
    fn default() -> Self {
        Self {
            districts: DistrictId::all().collect(),
            show_bathrooms: true,
            show_fountains: true,
            show_combo: true,
        }
    }
}

impl FilterSelection {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Replaces the district set from raw UI values such as `["3", "7"]`.
    /// Values that are not a district are ignored.
    pub fn with_district_values<S: AsRef<str>>(mut self, values: &[S]) -> Self {
        self.districts = values
            .iter()
            .filter_map(|raw| match raw.as_ref().parse::<DistrictId>() {
                Ok(id) => Some(id),
                Err(e) => {
                    debug!(error = %e, "ignoring district value");
                    None
                }
            })
            .collect();
        self
    }

    pub fn shows(&self, group: FacilityGroup) -> bool {
        match group {
            FacilityGroup::Bathrooms => self.show_bathrooms,
            FacilityGroup::Fountains => self.show_fountains,
            FacilityGroup::Combo => self.show_combo,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerInstruction {
    pub layer_id: String,
    pub visibility: Visibility,
    /// Full filter to set on the layer; `None` clears it.
    pub filter: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterPlan {
    pub layers: Vec<LayerInstruction>,
}

impl FilterPlan {
    pub fn instruction(&self, layer_id: &str) -> Option<&LayerInstruction> {
        self.layers.iter().find(|layer| layer.layer_id == layer_id)
    }

    /// Drops instructions for layers that were never declared.
    pub fn retain_layers(&mut self, declared: &BTreeSet<String>) {
        self.layers.retain(|layer| declared.contains(&layer.layer_id));
    }

    /// Applies every instruction, skipping layers the map does not have.
    pub fn apply(&self, map: &mut dyn MapSurface) -> usize {
        let mut applied = 0;
        for instruction in &self.layers {
            if !map.has_layer(&instruction.layer_id) {
                continue;
            }
            let result = map
                .set_visibility(&instruction.layer_id, instruction.visibility)
                .and_then(|_| map.set_filter(&instruction.layer_id, instruction.filter.as_ref()));
            match result {
                Ok(()) => applied += 1,
                Err(e) => debug!(layer = %instruction.layer_id, error = %e, "filter not applied"),
            }
        }
        applied
    }
}

/// Membership predicate over a district attribute. An empty selection
/// compiles to a predicate that admits nothing.
pub fn district_predicate(districts: &BTreeSet<DistrictId>, attribute: &str) -> Expression {
    if districts.is_empty() {
        return Expression::never();
    }
    Expression::attribute_in(attribute, districts.iter().map(|d| f64::from(d.get())).collect())
}

pub fn compile_layer(binding: &LayerBinding, selection: &FilterSelection) -> LayerInstruction {
    let visibility = Visibility::from_shown(binding.group.map_or(true, |group| selection.shows(group)));
    let district = match binding.district_scope {
        DistrictScope::Attribute(attribute) => Some(district_predicate(&selection.districts, attribute)),
        DistrictScope::Unassigned if selection.districts.is_empty() => Some(Expression::never()),
        DistrictScope::Unassigned | DistrictScope::Exempt => None,
    };
    LayerInstruction {
        layer_id: binding.id.to_string(),
        visibility,
        filter: Expression::all_of([binding.structural_filter.clone(), district]),
    }
}

pub fn compile(selection: &FilterSelection, bindings: &[LayerBinding]) -> FilterPlan {
    FilterPlan {
        layers: bindings
            .iter()
            .map(|binding| compile_layer(binding, selection))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::LayerRegistry;
    use geojson::JsonObject;
    use serde_json::json;

    fn registry() -> LayerRegistry {
        LayerRegistry::for_groups(&FacilityGroup::ALL.into_iter().collect())
    }

    fn props(value: serde_json::Value) -> JsonObject {
        value.as_object().cloned().unwrap_or_default()
    }

    fn sample_features() -> Vec<JsonObject> {
        vec![
            props(json!({ "Council District": 3, "No. of Toilets": 2 })),
            props(json!({ "Council District": "7", "No. of Toilets": "1" })),
            props(json!({ "Council District": 7.0, "No. of Toilets": 4 })),
            props(json!({ "Council District": "4", "No. of Toilets": 1 })),
            props(json!({ "Council District": 15, "No. of Toilets": 1 })),
            props(json!({ "No. of Toilets": 1 })),
        ]
    }

    #[test]
    fn empty_selection_matches_nothing() {
        let selection = FilterSelection::default().with_district_values::<&str>(&[]);
        let plan = compile(&selection, registry().bindings());
        let features = sample_features();
        for binding in registry().bindings().iter().filter(|b| b.id != "cd-boundaries") {
            let filter = plan.instruction(binding.id).unwrap().filter.as_ref().unwrap();
            assert!(features.iter().all(|f| !filter.matches(f)), "{} admitted a feature", binding.id);
        }
    }

    #[test]
    fn selection_matches_by_parsed_district() {
        let selection = FilterSelection::default().with_district_values(&["3", "7"]);
        let instruction = compile_layer(registry().get("hydration").unwrap(), &selection);
        let filter = instruction.filter.unwrap();
        let admitted: Vec<bool> = sample_features().iter().map(|f| filter.matches(f)).collect();
        assert_eq!(admitted, vec![true, true, true, false, false, false]);
    }

    #[test]
    fn structural_filter_survives_recompilation() {
        let selection = FilterSelection::default().with_district_values(&["3"]);
        let instruction = compile_layer(registry().get("restrooms-layer").unwrap(), &selection);
        assert_eq!(
            serde_json::to_value(&instruction.filter).unwrap(),
            json!([
                "all",
                [">", ["to-number", ["coalesce", ["get", "No. of Toilets"], 0]], 0],
                ["in", ["to-number", ["get", "Council District"]], ["literal", [3.0]]]
            ])
        );

        let hidden_bathrooms = FilterSelection {
            show_bathrooms: false,
            ..selection.clone()
        };
        let toggled = compile_layer(registry().get("restrooms-layer").unwrap(), &hidden_bathrooms);
        assert_eq!(toggled.visibility, Visibility::None);
        assert_eq!(toggled.filter, instruction.filter);

        let zero_toilets = props(json!({ "Council District": 3, "No. of Toilets": 0 }));
        assert!(!instruction.filter.unwrap().matches(&zero_toilets));
    }

    #[test]
    fn toggling_bathrooms_restores_the_same_plan() {
        let selection = FilterSelection::default().with_district_values(&["2", "9"]);
        let before = compile(&selection, registry().bindings());

        let mut toggled = selection.clone();
        toggled.show_bathrooms = false;
        let off = compile(&toggled, registry().bindings());
        toggled.show_bathrooms = true;
        let on = compile(&toggled, registry().bindings());

        assert_eq!(on, before);
        for (a, b) in before.layers.iter().zip(&off.layers) {
            assert_eq!(a.filter, b.filter, "district predicate changed for {}", a.layer_id);
        }
        assert_eq!(off.instruction("restrooms-shower").unwrap().visibility, Visibility::None);
        assert_eq!(off.instruction("hydration").unwrap().visibility, Visibility::Visible);
    }

    #[test]
    fn toggles_map_to_their_layer_groups() {
        let selection = FilterSelection {
            show_fountains: false,
            show_combo: false,
            ..FilterSelection::default()
        };
        let plan = compile(&selection, registry().bindings());
        let visible: Vec<&str> = plan
            .layers
            .iter()
            .filter(|l| l.visibility == Visibility::Visible)
            .map(|l| l.layer_id.as_str())
            .collect();
        assert_eq!(
            visible,
            vec!["cd-boundaries", "restrooms-layer", "restrooms-baby", "restrooms-shower", "manual-restrooms-layer"]
        );
    }

    #[test]
    fn unassigned_layers_only_follow_explicit_deny() {
        let manual = registry().get("manual-restrooms-layer").unwrap().clone();
        let some = FilterSelection::default().with_district_values(&["1"]);
        assert_eq!(compile_layer(&manual, &some).filter, None);

        let none = FilterSelection::default().with_district_values::<&str>(&[]);
        assert_eq!(compile_layer(&manual, &none).filter, Some(Expression::never()));

        let boundaries = registry().get("cd-boundaries").unwrap().clone();
        assert_eq!(compile_layer(&boundaries, &none).filter, None);
    }

    #[test]
    fn invalid_district_values_are_ignored() {
        let selection = FilterSelection::default().with_district_values(&["3", "abc", "16", " 7 "]);
        let ids: Vec<u8> = selection.districts.iter().map(|d| d.get()).collect();
        assert_eq!(ids, vec![3, 7]);
    }

    #[test]
    fn reset_selects_everything() {
        let mut selection = FilterSelection {
            districts: BTreeSet::new(),
            show_bathrooms: false,
            show_fountains: false,
            show_combo: false,
        };
        selection.reset();
        assert_eq!(selection.districts.len(), 15);
        assert!(FacilityGroup::ALL.iter().all(|g| selection.shows(*g)));
    }
}
