//! Canonical facility attribute schema.
//!
//! Source datasets name the same logical field differently ("Name",
//! "Facility Name", "name", ...). Every field has an ordered alias list; the
//! first alias is the canonical key written back at ingestion, so normalized
//! features resolve on the first lookup.

use geojson::JsonObject;
use serde_json::Value;
use thiserror::Error;

use crate::types::DistrictId;

/// Shown in popups for absent values.
pub const PLACEHOLDER: &str = "—";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Name,
    CouncilDistrict,
    Address,
    HydrationStations,
    WaterFountains,
    Sinks,
    Women,
    Men,
    GenderNeutral,
    Toilets,
    Urinals,
    BabyChanging,
    Showers,
    Combo,
}

impl Field {
    /// Popup display order.
    pub const DISPLAYED: [Field; 13] = [
        Self::Name,
        Self::CouncilDistrict,
        Self::Address,
        Self::HydrationStations,
        Self::WaterFountains,
        Self::Sinks,
        Self::Women,
        Self::Men,
        Self::GenderNeutral,
        Self::Toilets,
        Self::Urinals,
        Self::BabyChanging,
        Self::Showers,
    ];

    /// Aliases in precedence order. The first entry is the canonical key.
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::Name => &["Name", "Facility Name", "name", "Facility"],
            Self::CouncilDistrict => &["Council District", "CouncilDistrict", "district"],
            Self::Address => &["Address", "Facility Address", "address"],
            Self::HydrationStations => &["No. of Hydration Stations"],
            Self::WaterFountains => &["No. of Water Fountains"],
            Self::Sinks => &["No. of Sinks"],
            Self::Women => &["Women"],
            Self::Men => &["Men"],
            Self::GenderNeutral => &["Gender Neutral"],
            Self::Toilets => &["No. of Toilets"],
            Self::Urinals => &["No. of Urinals"],
            Self::BabyChanging => &["No. of Baby Changing Stations"],
            Self::Showers => &["No. of Showers"],
            Self::Combo => &["Combo", "combo"],
        }
    }

    pub fn key(self) -> &'static str {
        self.aliases()[0]
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Name => "Name",
            Self::CouncilDistrict => "Council District",
            Self::Address => "Address",
            Self::HydrationStations => "No. of Hydration Stations",
            Self::WaterFountains => "No. of Water Fountains",
            Self::Sinks => "No. of Sinks",
            Self::Women => "Women’s Restrooms",
            Self::Men => "Men’s Restrooms",
            Self::GenderNeutral => "Gender Neutral Restrooms",
            Self::Toilets => "No. of Toilets",
            Self::Urinals => "No. of Urinals",
            Self::BabyChanging => "No. of Baby Changing Stations",
            Self::Showers => "No. of Showers",
            Self::Combo => "Combo",
        }
    }
}

/// First non-empty value among the field's aliases.
pub fn resolve(props: &JsonObject, field: Field) -> Option<&Value> {
    field
        .aliases()
        .iter()
        .filter_map(|alias| props.get(*alias))
        .find(|value| !is_blank(value))
}

/// Display text for a field, without the placeholder.
pub fn resolve_text(props: &JsonObject, field: Field) -> Option<String> {
    resolve(props, field).and_then(value_text)
}

/// Boolean-like combo flag: `1`, `"1"`, `true`, `"true"`, `"yes"`.
pub fn combo_flag(props: &JsonObject) -> bool {
    match resolve(props, Field::Combo) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64() == Some(1.0),
        Some(Value::String(s)) => matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes"),
        _ => false,
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum AttributeError {
    #[error("unparseable {field:?} value {value}")]
    Unparseable { field: Field, value: Value },
    #[error("council district {0} is outside 1..=15")]
    DistrictOutOfRange(Value),
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Counts {
    pub toilets: Option<u32>,
    pub urinals: Option<u32>,
    pub sinks: Option<u32>,
    pub water_fountains: Option<u32>,
    pub hydration_stations: Option<u32>,
    pub baby_changing: Option<u32>,
    pub showers: Option<u32>,
}

impl Counts {
    fn entries(&self) -> [(Field, Option<u32>); 7] {
        [
            (Field::HydrationStations, self.hydration_stations),
            (Field::WaterFountains, self.water_fountains),
            (Field::Sinks, self.sinks),
            (Field::Toilets, self.toilets),
            (Field::Urinals, self.urinals),
            (Field::BabyChanging, self.baby_changing),
            (Field::Showers, self.showers),
        ]
    }
}

/// Normalized attribute record, built once per feature at ingestion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FacilityAttributes {
    pub name: Option<String>,
    pub address: Option<String>,
    pub council_district: Option<DistrictId>,
    pub counts: Counts,
    pub women: Option<String>,
    pub men: Option<String>,
    pub gender_neutral: Option<String>,
    pub combo: bool,
}

impl FacilityAttributes {
    /// Strict parse: a count or district that is present but unusable makes
    /// the whole record malformed.
    pub fn from_properties(props: &JsonObject) -> Result<Self, AttributeError> {
        let council_district = match resolve(props, Field::CouncilDistrict) {
            Some(value) => Some(
                DistrictId::from_json(value).ok_or_else(|| AttributeError::DistrictOutOfRange(value.clone()))?,
            ),
            None => None,
        };

        let count = |field: Field| parse_count(props, field);
        let counts = Counts {
            toilets: count(Field::Toilets)?,
            urinals: count(Field::Urinals)?,
            sinks: count(Field::Sinks)?,
            water_fountains: count(Field::WaterFountains)?,
            hydration_stations: count(Field::HydrationStations)?,
            baby_changing: count(Field::BabyChanging)?,
            showers: count(Field::Showers)?,
        };

        Ok(Self {
            name: resolve_text(props, Field::Name),
            address: resolve_text(props, Field::Address),
            council_district,
            counts,
            women: resolve_text(props, Field::Women),
            men: resolve_text(props, Field::Men),
            gender_neutral: resolve_text(props, Field::GenderNeutral),
            combo: combo_flag(props),
        })
    }

    /// True when the site reports at least one fountain or hydration station.
    pub fn has_water(&self) -> bool {
        self.counts.water_fountains.unwrap_or(0) > 0 || self.counts.hydration_stations.unwrap_or(0) > 0
    }

    /// Properties keyed by canonical field names.
    pub fn to_properties(&self) -> JsonObject {
        let mut props = JsonObject::new();
        let mut put_text = |field: Field, value: &Option<String>| {
            if let Some(text) = value {
                props.insert(field.key().to_string(), Value::String(text.clone()));
            }
        };
        put_text(Field::Name, &self.name);
        put_text(Field::Address, &self.address);
        put_text(Field::Women, &self.women);
        put_text(Field::Men, &self.men);
        put_text(Field::GenderNeutral, &self.gender_neutral);

        if let Some(district) = self.council_district {
            props.insert(Field::CouncilDistrict.key().to_string(), Value::from(district.get()));
        }
        for (field, value) in self.counts.entries() {
            if let Some(n) = value {
                props.insert(field.key().to_string(), Value::from(n));
            }
        }
        if self.combo {
            props.insert(Field::Combo.key().to_string(), Value::from(1));
        }
        props
    }
}

fn parse_count(props: &JsonObject, field: Field) -> Result<Option<u32>, AttributeError> {
    let Some(value) = resolve(props, field) else {
        return Ok(None);
    };
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match number {
        Some(n) if n.is_finite() && n >= 0.0 && n.fract() == 0.0 && n <= f64::from(u32::MAX) => Ok(Some(n as u32)),
        _ => Err(AttributeError::Unparseable {
            field,
            value: value.clone(),
        }),
    }
}
