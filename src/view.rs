//! Composition of reconciled data, layers, filters and interactions onto a
//! single map.
//!
//! [`MapView`] is the only writer of its map. Composition can run more than
//! once: the static datasets go up first and the reconciled manual layer is
//! added when geocoding finishes. Every pass upserts sources, declares the
//! layers that are still missing and reapplies the current selection.

use tracing::{debug, info, warn};

use crate::filter::{self, FilterPlan, FilterSelection};
use crate::interaction::InteractionRegistry;
use crate::layers::{IconAsset, LayerRegistry};
use crate::map::{ImageRef, MapSurface};
use crate::processing::ReconciledLayers;

pub struct MapView<M: MapSurface> {
    map: M,
    registry: LayerRegistry,
    interactions: InteractionRegistry,
    selection: FilterSelection,
}

impl<M: MapSurface> MapView<M> {
    pub fn new(map: M, registry: LayerRegistry) -> Self {
        Self {
            map,
            registry,
            interactions: InteractionRegistry::default(),
            selection: FilterSelection::default(),
        }
    }

    /// Registers decoded icons under their image names, served from
    /// `url_prefix`.
    pub fn register_icons(&mut self, icons: &[IconAsset], url_prefix: &str) -> usize {
        for icon in icons {
            self.map.add_image(
                icon.id.image_name(),
                ImageRef {
                    url: format!("{}/{}", url_prefix.trim_end_matches('/'), icon.file_name),
                    pixel_ratio: icon.pixel_ratio,
                    width: icon.width,
                    height: icon.height,
                },
            );
        }
        icons.len()
    }

    /// Binds every reconciled collection and declares the layers whose source
    /// and icon are available. Returns how many layers were newly declared.
    pub fn compose(&mut self, layers: &ReconciledLayers) -> usize {
        for (source, collection) in layers.iter() {
            let result = if self.map.has_source(source.name()) {
                self.map.set_source_data(source.name(), collection.clone())
            } else {
                self.map.add_source(source.name(), collection.clone())
            };
            if let Err(e) = result {
                warn!(source = %source, error = %e, "source not bound");
            }
        }

        let mut declared = 0;
        for binding in self.registry.bindings() {
            if self.map.has_layer(binding.id) {
                continue;
            }
            if !self.map.has_source(binding.source.name()) {
                debug!(layer = binding.id, source = %binding.source, "source missing; layer not declared yet");
                continue;
            }
            if let Some(icon) = binding.icon() {
                if !self.map.has_image(icon.image_name()) {
                    warn!(layer = binding.id, icon = icon.image_name(), "icon not loaded; layer skipped");
                    continue;
                }
            }
            match self.map.add_layer(binding.style()) {
                Ok(()) => declared += 1,
                Err(e) => warn!(layer = binding.id, error = %e, "layer not declared"),
            }
        }

        let attached = self.interactions.attach(&self.map, &self.registry);
        info!(declared, attached, "map composed");
        self.reapply();
        declared
    }

    /// Recompiles the whole plan for a new selection and applies it to every
    /// declared layer.
    pub fn apply_selection(&mut self, selection: FilterSelection) -> FilterPlan {
        self.selection = selection;
        self.reapply()
    }

    pub fn selection(&self) -> &FilterSelection {
        &self.selection
    }

    fn reapply(&mut self) -> FilterPlan {
        let mut plan = filter::compile(&self.selection, self.registry.bindings());
        plan.layers.retain(|instruction| self.map.has_layer(&instruction.layer_id));
        let applied = plan.apply(&mut self.map);
        debug!(applied, "filter plan applied");
        plan
    }

    pub fn registry(&self) -> &LayerRegistry {
        &self.registry
    }

    pub fn interactions(&self) -> &InteractionRegistry {
        &self.interactions
    }

    pub fn map(&self) -> &M {
        &self.map
    }

    /// Detaches every pointer handler and hands the map back.
    pub fn release(mut self) -> M {
        self.interactions.detach_all();
        self.map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::StaticDatasets;
    use crate::interaction::HoverState;
    use crate::layers::IconId;
    use crate::map::{StyleDocument, Visibility};
    use crate::processing::{reconcile, ReconcileRules};
    use crate::types::{FacilityGroup, GeocodedAddress, ManualAddress, SourceId};
    use geo::Point;
    use geojson::{Feature, FeatureCollection, Geometry, Value};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn icon(id: IconId) -> IconAsset {
        IconAsset {
            id,
            path: PathBuf::from(id.default_file()),
            file_name: id.default_file().to_string(),
            width: 64,
            height: 64,
            pixel_ratio: 2.0,
        }
    }

    fn point(lon: f64, lat: f64, props: serde_json::Value) -> Feature {
        Feature {
            bbox: None,
            geometry: Some(Geometry::new(Value::Point(vec![lon, lat]))),
            id: None,
            properties: props.as_object().cloned(),
            foreign_members: None,
        }
    }

    fn datasets() -> StaticDatasets {
        let fc = |features| FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        };
        StaticDatasets {
            facilities: BTreeMap::from([
                (
                    SourceId::Restrooms,
                    fc(vec![point(-118.3, 34.1, json!({ "Name": "Hall", "Council District": 4, "No. of Toilets": 2 }))]),
                ),
                (
                    SourceId::Hydration,
                    fc(vec![point(-118.25, 34.0457, json!({ "Name": "Fountain", "No. of Water Fountains": 1 }))]),
                ),
            ]),
            districts: Vec::new(),
        }
    }

    fn view() -> MapView<StyleDocument> {
        let registry = LayerRegistry::for_groups(&FacilityGroup::ALL.into_iter().collect());
        MapView::new(StyleDocument::new("test", [0.0, 0.0], 10.0, "base"), registry)
    }

    #[test]
    fn layers_wait_for_their_source_and_icon() {
        let mut view = view();
        view.register_icons(&[icon(IconId::Restroom), icon(IconId::Baby)], "icons");
        let layers = reconcile(&datasets(), &[], &ReconcileRules::default());

        assert_eq!(view.compose(&layers), 2);
        let ids = view.map().layer_ids();
        assert!(ids.contains("restrooms-layer"));
        assert!(ids.contains("restrooms-baby"));
        assert!(!ids.contains("hydration"), "fountain icon never loaded");
        assert!(!ids.contains("restrooms-shower"));
        assert_eq!(view.interactions().layer_ids().count(), 2);
        assert_eq!(
            view.map().to_json()["metadata"]["images"]["restroom-icon"]["url"],
            json!("icons/restroom.png")
        );
    }

    #[test]
    fn manual_layer_arrives_in_a_later_pass() {
        let mut view = view();
        view.register_icons(&IconId::ALL.map(icon), "icons");
        let rules = ReconcileRules::default();

        view.compose(&reconcile(&datasets(), &[], &rules));
        assert!(!view.map().has_layer("manual-restrooms-layer"));
        assert_eq!(view.map().source("hydration-source").unwrap().features.len(), 1);

        let manual = [GeocodedAddress {
            entry: ManualAddress::new("509 S. San Julian St."),
            location: Point::new(-118.25, 34.045),
        }];
        assert_eq!(view.compose(&reconcile(&datasets(), &manual, &rules)), 1);
        assert!(view.map().has_layer("manual-restrooms-layer"));
        assert_eq!(view.map().source("hydration-source").unwrap().features.len(), 0);
        assert_eq!(view.map().layers().last().unwrap().id, "manual-restrooms-layer");
    }

    #[test]
    fn selection_reaches_every_declared_layer() {
        let mut view = view();
        view.register_icons(&IconId::ALL.map(icon), "icons");
        view.compose(&reconcile(&datasets(), &[], &ReconcileRules::default()));

        let selection = FilterSelection {
            show_fountains: false,
            ..FilterSelection::default().with_district_values(&["4"])
        };
        let plan = view.apply_selection(selection);
        assert!(plan.instruction("combo-layer").is_none());

        let hydration = view.map().layer("hydration").unwrap();
        assert_eq!(hydration.layout["visibility"], json!(Visibility::None));
        assert_eq!(
            hydration.filter,
            Some(json!(["in", ["to-number", ["get", "Council District"]], ["literal", [4.0]]]))
        );
        let restrooms = view.map().layer("restrooms-layer").unwrap();
        assert_eq!(restrooms.filter.as_ref().unwrap()[0], json!("all"));
    }

    #[test]
    fn release_hands_back_the_map() {
        let mut view = view();
        view.register_icons(&IconId::ALL.map(icon), "icons");
        view.compose(&reconcile(&datasets(), &[], &ReconcileRules::default()));

        let attached: Vec<&str> = view.interactions().layer_ids().collect();
        assert_eq!(attached, vec!["hydration", "restrooms-baby", "restrooms-layer", "restrooms-shower"]);
        assert!(view.interactions().resume("cd-boundaries", HoverState::Idle).is_none());

        let map = view.release();
        assert!(map.has_layer("restrooms-layer"));
    }
}
