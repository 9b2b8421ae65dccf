use crate::config::AppConfig;
use crate::processing::address_key;
use crate::types::{DistrictBoundary, DistrictId, ManualAddress, SourceId};
use anyhow::{Context, Result, anyhow};
use csv::ReaderBuilder;
use geo::MultiPolygon;
use geojson::{FeatureCollection, GeoJson};
use shapefile::Reader;
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{debug, info, warn};

/// Raw static inputs, before any validation or reconciliation.
#[derive(Debug, Clone, Default)]
pub struct StaticDatasets {
    pub facilities: BTreeMap<SourceId, FeatureCollection>,
    pub districts: Vec<DistrictBoundary>,
}

pub fn load_static_datasets(config: &AppConfig) -> Result<StaticDatasets> {
    info!("Loading static datasets...");
    let input = &config.input;
    let paths = [
        (SourceId::Restrooms, &input.restrooms),
        (SourceId::RestroomsCombo, &input.restrooms_combo),
        (SourceId::Hydration, &input.hydration),
        (SourceId::HydrationCombo, &input.hydration_combo),
        (SourceId::WaterOnly, &input.water_only),
    ];

    let mut facilities = BTreeMap::new();
    for (source, path) in paths {
        let Some(path) = path else { continue };
        let collection = load_feature_collection(path)?;
        info!(source = %source, features = collection.features.len(), "loaded dataset");
        facilities.insert(source, collection);
    }

    let districts = match &input.districts {
        Some(path) => load_districts(path)?,
        None => Vec::new(),
    };
    info!("Loaded {} council district boundaries", districts.len());

    Ok(StaticDatasets { facilities, districts })
}

pub fn load_feature_collection(path: &Path) -> Result<FeatureCollection> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open GeoJSON file: {:?}", path))?;
    let reader = BufReader::new(file);
    let geojson = GeoJson::from_reader(reader)
        .with_context(|| format!("Failed to parse GeoJSON: {:?}", path))?;

    match geojson {
        GeoJson::FeatureCollection(fc) => Ok(fc),
        _ => Err(anyhow!("{:?} must be a FeatureCollection", path)),
    }
}

/// District boundaries from GeoJSON or a shapefile, picked by extension.
pub fn load_districts(path: &Path) -> Result<Vec<DistrictBoundary>> {
    let extension = path.extension()
        .and_then(|e| e.to_str())
        .map(|s: &str| s.to_lowercase())
        .ok_or_else(|| anyhow!("District boundary file has no extension"))?;

    let mut districts = match extension.as_str() {
        "shp" => load_districts_shapefile(path)?,
        "json" | "geojson" => load_districts_geojson(path)?,
        _ => return Err(anyhow!("Unsupported district boundary format: {}", extension)),
    };
    districts.sort_by_key(|d| d.id);
    Ok(districts)
}

fn load_districts_geojson(path: &Path) -> Result<Vec<DistrictBoundary>> {
    let collection = load_feature_collection(path)?;
    let mut districts = Vec::new();

    for feature in collection.features {
        let Some(props) = feature.properties.as_ref() else { continue };
        let Some(id) = props.get("district").and_then(DistrictId::from_json) else {
            debug!("skipping boundary without a valid district id");
            continue;
        };
        let text = |key: &str| match props.get(key) {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        let geometry = match feature.geometry {
            Some(geo) => {
                let valid_geo: geo::Geometry<f64> = geo.value.try_into()
                    .map_err(|e| anyhow!("Failed to convert district {} geometry: {:?}", id, e))?;
                match valid_geo {
                    geo::Geometry::MultiPolygon(mp) => mp,
                    geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
                    _ => continue,
                }
            },
            None => continue,
        };

        districts.push(DistrictBoundary {
            id,
            name: text("name").unwrap_or_else(|| format!("District {id}")),
            dist_name: text("dist_name"),
            objectid: props.get("OBJECTID").or_else(|| props.get("objectid")).and_then(|v| v.as_i64()),
            geometry,
        });
    }

    Ok(districts)
}

fn load_districts_shapefile(path: &Path) -> Result<Vec<DistrictBoundary>> {
    let mut reader = Reader::from_path(path)
        .with_context(|| format!("Failed to open Shapefile: {:?}", path))?;

    let mut districts = Vec::new();

    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result?;

        let id = match record.get("district") {
            Some(shapefile::dbase::FieldValue::Numeric(Some(n))) => DistrictId::from_f64(*n),
            Some(shapefile::dbase::FieldValue::Integer(n)) => u8::try_from(*n).ok().and_then(DistrictId::new),
            Some(shapefile::dbase::FieldValue::Character(Some(s))) => s.parse().ok(),
            _ => None,
        };
        let Some(id) = id else {
            debug!("skipping shapefile record without a valid district id");
            continue;
        };
        let text = |key: &str| match record.get(key) {
            Some(shapefile::dbase::FieldValue::Character(Some(s))) => Some(s.trim().to_string()),
            _ => None,
        };

        let geometry: MultiPolygon<f64> = match shape {
            shapefile::Shape::Polygon(polygon) => polygon.try_into()
                .map_err(|e| anyhow!("Failed to convert polygon: {:?}", e))?,
            shapefile::Shape::PolygonM(polygon) => polygon.try_into()
                .map_err(|e| anyhow!("Failed to convert polygonM: {:?}", e))?,
            shapefile::Shape::PolygonZ(polygon) => polygon.try_into()
                .map_err(|e| anyhow!("Failed to convert polygonZ: {:?}", e))?,
            _ => continue, // Skip non-polygon shapes
        };

        let objectid = match record.get("OBJECTID") {
            Some(shapefile::dbase::FieldValue::Numeric(Some(n))) => Some(*n as i64),
            Some(shapefile::dbase::FieldValue::Integer(n)) => Some(i64::from(*n)),
            _ => None,
        };

        districts.push(DistrictBoundary {
            id,
            name: text("name").unwrap_or_else(|| format!("District {id}")),
            dist_name: text("dist_name"),
            objectid,
            geometry,
        });
    }

    Ok(districts)
}

/// Inline addresses followed by CSV rows, deduplicated by normalized address.
pub fn load_manual_addresses(config: &AppConfig) -> Result<Vec<ManualAddress>> {
    let mut entries: Vec<ManualAddress> = config.manual.addresses.iter()
        .map(ManualAddress::new)
        .collect();

    if let Some(csv_path) = &config.manual.addresses_csv {
        entries.extend(load_address_csv(csv_path)?);
    }

    let mut seen = HashSet::new();
    entries.retain(|entry| {
        let fresh = seen.insert(address_key(&entry.address));
        if !fresh {
            warn!(address = %entry.address, "duplicate manual address ignored");
        }
        fresh
    });
    Ok(entries)
}

fn load_address_csv(path: &Path) -> Result<Vec<ManualAddress>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open CSV file: {:?}", path))?;
    let mut rdr = ReaderBuilder::new().trim(csv::Trim::All).from_reader(file);

    let mut entries = Vec::new();
    for result in rdr.deserialize() {
        let entry: ManualAddress = result
            .with_context(|| format!("Invalid row in {:?}", path))?;
        if entry.address.is_empty() { continue; }
        entries.push(ManualAddress {
            name: entry.name.filter(|n| !n.is_empty()),
            ..entry
        });
    }
    Ok(entries)
}
