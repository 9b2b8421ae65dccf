use geo::{MultiPolygon, Point};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::attributes::FacilityAttributes;

/// Number of council districts in the city.
pub const DISTRICT_COUNT: u8 = 15;

/// Council district identifier, always in `1..=15`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct DistrictId(u8);

impl DistrictId {
    pub fn new(id: u8) -> Option<Self> {
        (1..=DISTRICT_COUNT).contains(&id).then_some(Self(id))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn all() -> impl Iterator<Item = DistrictId> {
        (1..=DISTRICT_COUNT).map(DistrictId)
    }

    /// Reads a district from an attribute value. Source datasets carry it
    /// both as a number and as a numeric string.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        let number = match value {
            serde_json::Value::Number(n) => n.as_f64()?,
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        Self::from_f64(number)
    }

    /// Accepts only whole numbers in range; `7.0` is district 7, `3.7` is not
    /// a district.
    pub fn from_f64(number: f64) -> Option<Self> {
        if number.fract() != 0.0 || !(1.0..=f64::from(DISTRICT_COUNT)).contains(&number) {
            return None;
        }
        Self::new(number as u8)
    }
}

impl TryFrom<u8> for DistrictId {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("council district {value} is outside 1..={DISTRICT_COUNT}"))
    }
}

impl From<DistrictId> for u8 {
    fn from(id: DistrictId) -> Self {
        id.0
    }
}

impl FromStr for DistrictId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_json(&serde_json::Value::String(s.to_string()))
            .ok_or_else(|| format!("invalid council district: {s:?}"))
    }
}

impl fmt::Display for DistrictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User-facing facility type toggles. A deployment declares which of these exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacilityGroup {
    Bathrooms,
    Fountains,
    Combo,
}

impl FacilityGroup {
    pub const ALL: [FacilityGroup; 3] = [Self::Bathrooms, Self::Fountains, Self::Combo];
}

/// Named GeoJSON sources the map binds layers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    Restrooms,
    RestroomsCombo,
    Hydration,
    HydrationCombo,
    WaterOnly,
    ManualRestrooms,
    Districts,
}

impl SourceId {
    /// Pre-classified static facility datasets, in load order.
    pub const STATIC_FACILITIES: [SourceId; 5] = [
        Self::Restrooms,
        Self::RestroomsCombo,
        Self::Hydration,
        Self::HydrationCombo,
        Self::WaterOnly,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Restrooms => "restroom-source",
            Self::RestroomsCombo => "restroom-source-for-combo",
            Self::Hydration => "hydration-source",
            Self::HydrationCombo => "hydration-source-for-combo",
            Self::WaterOnly => "water_only-source",
            Self::ManualRestrooms => "manual-restrooms-source",
            Self::Districts => "cd-boundaries-source",
        }
    }

    /// Group whose toggle owns this source. District boundaries belong to none.
    pub fn group(self) -> Option<FacilityGroup> {
        match self {
            Self::Restrooms | Self::ManualRestrooms => Some(FacilityGroup::Bathrooms),
            Self::Hydration | Self::WaterOnly => Some(FacilityGroup::Fountains),
            Self::RestroomsCombo | Self::HydrationCombo => Some(FacilityGroup::Combo),
            Self::Districts => None,
        }
    }

    /// Fountain-only datasets are subject to the water-count inclusion rule
    /// and to proximity exclusion against manual pins.
    pub fn is_fountain_dataset(self) -> bool {
        matches!(self, Self::Hydration | Self::WaterOnly)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A validated facility: a lon/lat point and its normalized attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct FacilityPoint {
    pub location: Point<f64>,
    pub attributes: FacilityAttributes,
}

#[derive(Debug, Clone)]
pub struct DistrictBoundary {
    pub id: DistrictId,
    pub name: String,
    pub dist_name: Option<String>,
    pub objectid: Option<i64>,
    pub geometry: MultiPolygon<f64>,
}

/// A curated address that has no coordinates of its own.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ManualAddress {
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl ManualAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeocodedAddress {
    pub entry: ManualAddress,
    pub location: Point<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(json!(3), Some(3))]
    #[case(json!("7"), Some(7))]
    #[case(json!(" 12 "), Some(12))]
    #[case(json!(15.0), Some(15))]
    #[case(json!(0), None)]
    #[case(json!(16), None)]
    #[case(json!("3.5"), None)]
    #[case(json!("abc"), None)]
    #[case(json!(null), None)]
    fn district_parses_numbers_and_strings(#[case] value: serde_json::Value, #[case] expected: Option<u8>) {
        assert_eq!(DistrictId::from_json(&value).map(DistrictId::get), expected);
    }

    #[rstest]
    #[case(7.0, Some(7))]
    #[case(15.0, Some(15))]
    #[case(3.7, None)]
    #[case(259.0, None)]
    #[case(-1.0, None)]
    #[case(f64::NAN, None)]
    #[case(f64::INFINITY, None)]
    fn district_from_float_requires_a_whole_number_in_range(#[case] number: f64, #[case] expected: Option<u8>) {
        assert_eq!(DistrictId::from_f64(number).map(DistrictId::get), expected);
    }

    #[test]
    fn all_districts_cover_one_through_fifteen() {
        let ids: Vec<u8> = DistrictId::all().map(DistrictId::get).collect();
        assert_eq!(ids, (1..=15).collect::<Vec<_>>());
    }

    #[test]
    fn district_deserialization_rejects_out_of_range() {
        assert!(serde_json::from_value::<DistrictId>(json!(4)).is_ok());
        assert!(serde_json::from_value::<DistrictId>(json!(40)).is_err());
    }
}
