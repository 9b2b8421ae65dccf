use crate::attributes::FacilityAttributes;
use crate::config::AppConfig;
use crate::data::StaticDatasets;
use crate::spatial::ProximityIndex;
use crate::types::{DistrictBoundary, FacilityGroup, FacilityPoint, GeocodedAddress, SourceId};
use geo::Point;
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, info};

/// Name given to manual pins that carry none of their own.
pub const MANUAL_PIN_NAME: &str = "Restroom";

#[derive(Debug, Clone)]
pub struct ReconcileRules {
    pub duplicate_radius_meters: f64,
    pub without_restroom: Vec<String>,
    pub groups: BTreeSet<FacilityGroup>,
}

impl ReconcileRules {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            duplicate_radius_meters: config.reconcile.duplicate_radius_meters,
            without_restroom: config.manual.without_restroom.clone(),
            groups: config.deployment.groups.clone(),
        }
    }

    fn enabled(&self, source: SourceId) -> bool {
        source.group().map_or(true, |group| self.groups.contains(&group))
    }
}

impl Default for ReconcileRules {
    fn default() -> Self {
        Self {
            duplicate_radius_meters: 80.0,
            without_restroom: Vec::new(),
            groups: FacilityGroup::ALL.into_iter().collect(),
        }
    }
}

/// Final feature collections, one per source, bound to the map verbatim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciledLayers {
    collections: BTreeMap<SourceId, FeatureCollection>,
}

impl ReconciledLayers {
    pub fn get(&self, source: SourceId) -> Option<&FeatureCollection> {
        self.collections.get(&source)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SourceId, &FeatureCollection)> {
        self.collections.iter().map(|(source, fc)| (*source, fc))
    }

    pub fn feature_count(&self, source: SourceId) -> usize {
        self.get(source).map_or(0, |fc| fc.features.len())
    }
}

/// Normalizes an address for exact comparison: trimmed, single-spaced,
/// case-insensitive.
pub fn address_key(address: &str) -> String {
    address.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Manual points that survive the no-restroom exclusion list.
pub fn surviving_manual_points<'a>(
    geocoded: &'a [GeocodedAddress],
    without_restroom: &[String],
) -> Vec<&'a GeocodedAddress> {
    let excluded: HashSet<String> = without_restroom.iter().map(|a| address_key(a)).collect();
    geocoded
        .iter()
        .filter(|g| {
            let keep = !excluded.contains(&address_key(&g.entry.address));
            if !keep {
                debug!(address = %g.entry.address, "manual address listed without restroom");
            }
            keep
        })
        .collect()
}

/// Validated facilities of one dataset. Features without a finite lon/lat
/// point or with malformed attributes are dropped.
pub fn ingest_collection(source: SourceId, collection: &FeatureCollection) -> Vec<FacilityPoint> {
    let points: Vec<FacilityPoint> = collection
        .features
        .par_iter()
        .filter_map(|feature| ingest_feature(source, feature))
        .collect();
    let rejected = collection.features.len() - points.len();
    if rejected > 0 {
        info!(source = %source, rejected, "dropped malformed features");
    }
    points
}

fn ingest_feature(source: SourceId, feature: &Feature) -> Option<FacilityPoint> {
    let location = match feature.geometry.as_ref().map(|g| &g.value) {
        Some(Value::Point(coords)) => match coords.as_slice() {
            [lon, lat, ..] if valid_lon_lat(*lon, *lat) => Point::new(*lon, *lat),
            _ => {
                debug!(source = %source, "invalid point coordinates");
                return None;
            }
        },
        _ => {
            debug!(source = %source, "feature is not a point");
            return None;
        }
    };

    let empty = JsonObject::new();
    let props = feature.properties.as_ref().unwrap_or(&empty);
    match FacilityAttributes::from_properties(props) {
        Ok(attributes) => Some(FacilityPoint { location, attributes }),
        Err(e) => {
            debug!(source = %source, error = %e, "malformed attributes");
            None
        }
    }
}

fn valid_lon_lat(lon: f64, lat: f64) -> bool {
    lon.is_finite() && lat.is_finite() && (-180.0..=180.0).contains(&lon) && (-90.0..=90.0).contains(&lat)
}

/// Merges the static datasets with geocoded manual points.
///
/// Pure in its inputs: the same datasets and geocoding answers always give
/// the same layers. Fountain datasets keep only sites with water, minus
/// anything within the duplicate radius of a surviving manual pin.
pub fn reconcile(datasets: &StaticDatasets, geocoded: &[GeocodedAddress], rules: &ReconcileRules) -> ReconciledLayers {
    let manual = if rules.enabled(SourceId::ManualRestrooms) {
        surviving_manual_points(geocoded, &rules.without_restroom)
    } else {
        Vec::new()
    };
    let centers: Vec<Point<f64>> = manual.iter().map(|g| g.location).collect();
    let index = ProximityIndex::new(&centers);

    let mut collections = BTreeMap::new();
    for (&source, collection) in &datasets.facilities {
        if !rules.enabled(source) {
            continue;
        }
        let mut points = ingest_collection(source, collection);
        if source.is_fountain_dataset() {
            let before = points.len();
            points.retain(|p| p.attributes.has_water() && !index.is_near(p.location, rules.duplicate_radius_meters));
            debug!(source = %source, removed = before - points.len(), "fountain rules applied");
        }
        collections.insert(source, facility_collection(&points));
    }

    if !manual.is_empty() {
        let points: Vec<FacilityPoint> = manual.iter().map(|g| manual_point(g)).collect();
        collections.insert(SourceId::ManualRestrooms, facility_collection(&points));
    }

    if !datasets.districts.is_empty() {
        collections.insert(SourceId::Districts, district_collection(&datasets.districts));
    }

    let layers = ReconciledLayers { collections };
    info!(
        sources = layers.collections.len(),
        manual = layers.feature_count(SourceId::ManualRestrooms),
        "reconciliation complete"
    );
    layers
}

fn manual_point(geocoded: &GeocodedAddress) -> FacilityPoint {
    FacilityPoint {
        location: geocoded.location,
        attributes: FacilityAttributes {
            name: Some(geocoded.entry.name.clone().unwrap_or_else(|| MANUAL_PIN_NAME.to_string())),
            address: Some(geocoded.entry.address.clone()),
            ..FacilityAttributes::default()
        },
    }
}

fn facility_collection(points: &[FacilityPoint]) -> FeatureCollection {
    let features = points
        .iter()
        .map(|p| feature(Geometry::new(Value::Point(vec![p.location.x(), p.location.y()])), p.attributes.to_properties()))
        .collect();
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

fn district_collection(districts: &[DistrictBoundary]) -> FeatureCollection {
    let features = districts
        .iter()
        .map(|d| {
            let mut props = JsonObject::new();
            props.insert("district".to_string(), d.id.get().into());
            props.insert("name".to_string(), d.name.clone().into());
            props.insert("dist_name".to_string(), d.dist_name.clone().into());
            props.insert("objectid".to_string(), d.objectid.into());
            feature(Geometry::new(Value::from(&d.geometry)), props)
        })
        .collect();
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

fn feature(geometry: Geometry, properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(geometry),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::Field;
    use crate::types::{DistrictId, ManualAddress};
    use geo::MultiPolygon;
    use serde_json::json;

    fn point_feature(lon: f64, lat: f64, props: serde_json::Value) -> Feature {
        feature(
            Geometry::new(Value::Point(vec![lon, lat])),
            props.as_object().cloned().unwrap_or_default(),
        )
    }

    fn collection(features: Vec<Feature>) -> FeatureCollection {
        FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }
    }

    fn geocoded(address: &str, lon: f64, lat: f64) -> GeocodedAddress {
        GeocodedAddress {
            entry: ManualAddress::new(address),
            location: Point::new(lon, lat),
        }
    }

    fn names(layers: &ReconciledLayers, source: SourceId) -> Vec<String> {
        layers
            .get(source)
            .map(|fc| {
                fc.features
                    .iter()
                    .filter_map(|f| f.properties.as_ref()?.get("Name")?.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn hydration_datasets() -> StaticDatasets {
        let hydration = collection(vec![
            point_feature(-118.25, 34.0457, json!({ "Name": "near", "No. of Water Fountains": 1 })),
            point_feature(-118.25, 34.046, json!({ "Name": "far", "No. of Hydration Stations": "2" })),
            point_feature(-118.30, 34.10, json!({ "Name": "dry", "No. of Water Fountains": 0, "No. of Hydration Stations": "0" })),
            point_feature(-118.31, 34.11, json!({ "Name": "unknown" })),
        ]);
        StaticDatasets {
            facilities: BTreeMap::from([(SourceId::Hydration, hydration)]),
            districts: Vec::new(),
        }
    }

    #[test]
    fn fountains_near_manual_pins_are_excluded() {
        let layers = reconcile(
            &hydration_datasets(),
            &[geocoded("509 S. San Julian St.", -118.25, 34.045)],
            &ReconcileRules::default(),
        );
        assert_eq!(names(&layers, SourceId::Hydration), vec!["far"]);
        assert_eq!(names(&layers, SourceId::ManualRestrooms), vec![MANUAL_PIN_NAME]);
    }

    #[test]
    fn fountain_just_beyond_radius_is_kept() {
        let datasets = StaticDatasets {
            facilities: BTreeMap::from([(
                SourceId::Hydration,
                collection(vec![point_feature(-118.25, 34.04573, json!({ "Name": "81m", "No. of Water Fountains": 1 }))]),
            )]),
            districts: Vec::new(),
        };
        let layers = reconcile(&datasets, &[geocoded("a", -118.25, 34.045)], &ReconcileRules::default());
        assert_eq!(names(&layers, SourceId::Hydration), vec!["81m"]);
    }

    #[test]
    fn waterless_sites_never_reach_fountain_layers() {
        let layers = reconcile(&hydration_datasets(), &[], &ReconcileRules::default());
        assert_eq!(names(&layers, SourceId::Hydration), vec!["near", "far"]);
        assert!(layers.get(SourceId::ManualRestrooms).is_none());
    }

    #[test]
    fn excluded_addresses_produce_no_manual_pin_and_no_exclusion_zone() {
        let rules = ReconcileRules {
            without_restroom: vec!["509  s. san julian st.".to_string()],
            ..ReconcileRules::default()
        };
        let layers = reconcile(
            &hydration_datasets(),
            &[geocoded("509 S. San Julian St.", -118.25, 34.045), geocoded("814 E. 6th St.", -118.2446, 34.0404)],
            &rules,
        );
        let manual = layers.get(SourceId::ManualRestrooms).unwrap();
        let addresses: Vec<&str> = manual
            .features
            .iter()
            .map(|f| f.properties.as_ref().unwrap()[Field::Address.key()].as_str().unwrap())
            .collect();
        assert_eq!(addresses, vec!["814 E. 6th St."]);
        assert_eq!(names(&layers, SourceId::Hydration), vec!["near", "far"]);
    }

    #[test]
    fn exclusion_requires_the_full_address() {
        let points = [geocoded("5401 La Mirada Avenue", 0.0, 0.0), geocoded("5401 Sunset Blvd", 0.0, 0.0)];
        let survivors = surviving_manual_points(&points, &["5401 La Mirada Avenue".to_string()]);
        let kept: Vec<&str> = survivors.iter().map(|g| g.entry.address.as_str()).collect();
        assert_eq!(kept, vec!["5401 Sunset Blvd"]);
    }

    #[test]
    fn malformed_features_are_dropped() {
        let mut bad_geometry = point_feature(0.0, 0.0, json!({ "Name": "line" }));
        bad_geometry.geometry = Some(Geometry::new(Value::LineString(vec![vec![0.0, 0.0], vec![1.0, 1.0]])));
        let mut no_geometry = point_feature(0.0, 0.0, json!({ "Name": "none" }));
        no_geometry.geometry = None;

        let restrooms = collection(vec![
            bad_geometry,
            no_geometry,
            point_feature(f64::NAN, 34.0, json!({ "Name": "nan" })),
            point_feature(-118.2, 95.0, json!({ "Name": "off-globe" })),
            point_feature(-118.2, 34.0, json!({ "Name": "bad count", "No. of Toilets": "lots" })),
            point_feature(-118.2, 34.0, json!({ "Facility Name": "ok", "Council District": "5", "No. of Toilets": "3" })),
        ]);
        let points = ingest_collection(SourceId::Restrooms, &restrooms);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].attributes.name.as_deref(), Some("ok"));
        assert_eq!(points[0].attributes.council_district, DistrictId::new(5));
    }

    #[test]
    fn reconciliation_is_idempotent() {
        let manual = [geocoded("509 S. San Julian St.", -118.25, 34.045)];
        let first = reconcile(&hydration_datasets(), &manual, &ReconcileRules::default());
        let second = reconcile(&hydration_datasets(), &manual, &ReconcileRules::default());
        assert_eq!(first, second);
    }

    #[test]
    fn disabled_groups_are_left_out() {
        let rules = ReconcileRules {
            groups: [FacilityGroup::Combo].into_iter().collect(),
            ..ReconcileRules::default()
        };
        let layers = reconcile(&hydration_datasets(), &[geocoded("a", 0.0, 0.0)], &rules);
        assert!(layers.get(SourceId::Hydration).is_none());
        assert!(layers.get(SourceId::ManualRestrooms).is_none());
    }

    #[test]
    fn districts_become_a_boundary_source() {
        let square = geo::Polygon::new(
            geo::LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)]),
            vec![],
        );
        let datasets = StaticDatasets {
            facilities: BTreeMap::new(),
            districts: vec![DistrictBoundary {
                id: DistrictId::new(9).unwrap(),
                name: "Nine".to_string(),
                dist_name: None,
                objectid: Some(3),
                geometry: MultiPolygon::new(vec![square]),
            }],
        };
        let layers = reconcile(&datasets, &[], &ReconcileRules::default());
        let boundaries = layers.get(SourceId::Districts).unwrap();
        let props = boundaries.features[0].properties.as_ref().unwrap();
        assert_eq!(props["district"], json!(9));
        assert_eq!(props["objectid"], json!(3));
        assert!(matches!(
            boundaries.features[0].geometry.as_ref().unwrap().value,
            Value::MultiPolygon(_)
        ));
    }
}
