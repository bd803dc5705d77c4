use std::collections::BTreeMap;
use std::fmt;

use compact_str::CompactString;
use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const AGENCY_KEY_FIELD: &str = "agency_key";
pub const LOC_FIELD: &str = "loc";

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("agency key must not be empty")]
    EmptyAgencyKey,
}

/// Partition key under which every record of one import is stored.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgencyKey(CompactString);

impl AgencyKey {
    pub fn new(value: impl AsRef<str>) -> Result<Self, ModelError> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            return Err(ModelError::EmptyAgencyKey);
        }
        Ok(Self(CompactString::from(trimmed)))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for AgencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for AgencyKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// One GTFS table the importer knows about and the collection it loads into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeedFile {
    pub base_name: &'static str,
    pub collection: &'static str,
}

impl FeedFile {
    pub const fn new(base_name: &'static str, collection: &'static str) -> Self {
        Self {
            base_name,
            collection,
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.txt", self.base_name)
    }
}

impl fmt::Display for FeedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.txt", self.base_name)
    }
}

/// A stored field value. Serialized as a bare JSON scalar, or a `[lon, lat]`
/// array for points.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Point([f64; 2]),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Numeric view of the value; integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(value) => Some(*value),
            FieldValue::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_point(&self) -> Option<[f64; 2]> {
        match self {
            FieldValue::Point(point) => Some(*point),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, FieldValue::Text(value) if value.is_empty())
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Text(value) => serializer.serialize_str(value),
            FieldValue::Integer(value) => serializer.serialize_i64(*value),
            FieldValue::Float(value) => serializer.serialize_f64(*value),
            FieldValue::Point(point) => point.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FieldValueVisitor;

        impl<'de> Visitor<'de> for FieldValueVisitor {
            type Value = FieldValue;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a string, a number or a [lon, lat] pair")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<FieldValue, E> {
                Ok(FieldValue::Text(value.to_string()))
            }

            fn visit_string<E: de::Error>(self, value: String) -> Result<FieldValue, E> {
                Ok(FieldValue::Text(value))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<FieldValue, E> {
                Ok(FieldValue::Integer(value))
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<FieldValue, E> {
                i64::try_from(value)
                    .map(FieldValue::Integer)
                    .map_err(|_| E::custom(format!("integer {} out of range", value)))
            }

            fn visit_f64<E: de::Error>(self, value: f64) -> Result<FieldValue, E> {
                Ok(FieldValue::Float(value))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<FieldValue, A::Error> {
                let lon: f64 = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let lat: f64 = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                if seq.next_element::<f64>()?.is_some() {
                    return Err(de::Error::invalid_length(3, &self));
                }
                Ok(FieldValue::Point([lon, lat]))
            }
        }

        deserializer.deserialize_any(FieldValueVisitor)
    }
}

/// One CSV row keyed by column name, values exactly as read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    fields: BTreeMap<String, String>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(column.into(), value.into());
    }

    /// Returns the value of `column`; empty strings count as absent.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .get(column)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn is_blank(&self) -> bool {
        self.fields.values().all(|value| value.is_empty())
    }

    pub fn into_fields(self) -> BTreeMap<String, String> {
        self.fields
    }
}

impl<K, V> FromIterator<(K, V)> for RawRecord
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

/// A typed record as written to a sink.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedRecord {
    fields: BTreeMap<String, FieldValue>,
}

impl NormalizedRecord {
    pub fn from_fields(fields: BTreeMap<String, FieldValue>) -> Self {
        Self { fields }
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_str)
    }

    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(FieldValue::as_f64)
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(FieldValue::as_i64)
    }

    pub fn agency_key(&self) -> Option<&str> {
        self.get_str(AGENCY_KEY_FIELD)
    }

    pub fn loc(&self) -> Option<[f64; 2]> {
        self.get(LOC_FIELD).and_then(FieldValue::as_point)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_fields(self) -> BTreeMap<String, FieldValue> {
        self.fields
    }
}

impl From<RawRecord> for BTreeMap<String, FieldValue> {
    fn from(record: RawRecord) -> Self {
        record
            .into_fields()
            .into_iter()
            .map(|(key, value)| (key, FieldValue::Text(value)))
            .collect()
    }
}

impl From<NormalizedRecord> for BTreeMap<String, FieldValue> {
    fn from(record: NormalizedRecord) -> Self {
        record.into_fields()
    }
}
