//! Conversions between typed property values and SQLite cells.
//!
//! Every transformer maps an absent property to `NULL` and a `NULL` cell to an
//! absent property. Decoding never fails: a cell that cannot be interpreted
//! resolves to absent (booleans, JSON) or to [`Timestamp::INVALID`] (dates).

use crate::value::{format_number, integral, parse_number, AppValue, Timestamp, Value};

/// Declared type of an entity property, used to pick a default transformer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyType {
    Boolean,
    Date,
    Number,
    String,
    Json,
    Unknown,
}

/// SQLite column affinity derived from a declared column type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    Integer,
    Text,
    Blob,
    Real,
    Numeric,
}

impl Affinity {
    /// Applies SQLite's affinity rules to a DDL type fragment such as
    /// `"INTEGER NOT NULL"` or `"VARCHAR(50)"`.
    pub fn of(dbtype: &str) -> Affinity {
        let ty = dbtype.to_ascii_uppercase();
        if ty.contains("INT") {
            Affinity::Integer
        } else if ty.contains("CHAR") || ty.contains("CLOB") || ty.contains("TEXT") {
            Affinity::Text
        } else if ty.contains("BLOB") || ty.trim().is_empty() {
            Affinity::Blob
        } else if ty.contains("REAL") || ty.contains("FLOA") || ty.contains("DOUB") {
            Affinity::Real
        } else {
            Affinity::Numeric
        }
    }
}

/// Closed set of value transformers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Transformer {
    Json,
    BooleanText,
    BooleanNumber,
    DateText,
    DateInteger,
    NumberText,
    NumberDefault,
    StringDefault,
    StringText,
    StringNumber,
    #[default]
    UnknownDefault,
}

impl Transformer {
    /// Picks the transformer for a property of type `ty` stored in a column
    /// declared as `dbtype`.
    pub fn for_property(ty: PropertyType, dbtype: &str) -> Transformer {
        let affinity = Affinity::of(dbtype);
        let text = affinity == Affinity::Text;
        match ty {
            PropertyType::Boolean if text => Transformer::BooleanText,
            PropertyType::Boolean => Transformer::BooleanNumber,
            PropertyType::Date if text => Transformer::DateText,
            PropertyType::Date => Transformer::DateInteger,
            PropertyType::Number if text => Transformer::NumberText,
            PropertyType::Number => Transformer::NumberDefault,
            PropertyType::String => match affinity {
                Affinity::Text => Transformer::StringText,
                Affinity::Integer | Affinity::Real | Affinity::Numeric => {
                    Transformer::StringNumber
                }
                Affinity::Blob => Transformer::StringDefault,
            },
            PropertyType::Json => Transformer::Json,
            PropertyType::Unknown => Transformer::UnknownDefault,
        }
    }

    /// Converts a property value into the cell value to bind.
    ///
    /// Values outside the transformer's domain are written as `NULL`.
    pub fn to_db(&self, value: Option<&AppValue>) -> Value {
        let Some(value) = value else {
            return Value::Null;
        };
        match self {
            Transformer::Json => Value::Text(json_of(value).to_string()),
            Transformer::BooleanText => match truthiness(value) {
                Some(true) => Value::Text("1".to_string()),
                Some(false) => Value::Text("0".to_string()),
                None => Value::Null,
            },
            Transformer::BooleanNumber => match truthiness(value) {
                Some(b) => Value::Integer(b as i64),
                None => Value::Null,
            },
            Transformer::DateText => match value {
                AppValue::Timestamp(ts) => ts.to_iso_string().map_or(Value::Null, Value::Text),
                _ => Value::Null,
            },
            Transformer::DateInteger => match value {
                AppValue::Timestamp(ts) => ts
                    .millis()
                    .map_or(Value::Null, |ms| Value::Integer(ms.div_euclid(1000))),
                _ => Value::Null,
            },
            Transformer::NumberText => match value {
                AppValue::Integer(i) => Value::Text(i.to_string()),
                AppValue::Real(r) => Value::Text(format_number(*r)),
                _ => Value::Null,
            },
            Transformer::NumberDefault => match value {
                AppValue::Integer(i) => Value::Integer(*i),
                AppValue::Real(r) => Value::Real(*r),
                _ => Value::Null,
            },
            Transformer::StringDefault | Transformer::StringText => match value {
                AppValue::Text(s) => Value::Text(s.clone()),
                _ => Value::Null,
            },
            Transformer::StringNumber => match value {
                AppValue::Text(s) => match parse_number(s) {
                    AppValue::Integer(i) => Value::Integer(i),
                    AppValue::Real(r) => Value::Real(r),
                    _ => Value::Null,
                },
                _ => Value::Null,
            },
            Transformer::UnknownDefault => match value {
                AppValue::Bool(b) => Value::Integer(*b as i64),
                AppValue::Integer(i) => Value::Integer(*i),
                AppValue::Real(r) => Value::Real(*r),
                AppValue::Text(s) => Value::Text(s.clone()),
                AppValue::Blob(b) => Value::Blob(b.clone()),
                AppValue::Timestamp(ts) => ts.millis().map_or(Value::Null, Value::Integer),
                AppValue::Json(v) => Value::Text(v.to_string()),
            },
        }
    }

    /// Converts a cell value back into a property value.
    pub fn from_db(&self, value: &Value) -> Option<AppValue> {
        if value.is_null() {
            return None;
        }
        let decoded = match self {
            Transformer::Json => decode_json(value),
            Transformer::BooleanText => match value {
                Value::Text(s) if s == "0" || s == "false" => Some(AppValue::Bool(false)),
                Value::Text(s) if s == "1" || s == "true" => Some(AppValue::Bool(true)),
                _ => None,
            },
            Transformer::BooleanNumber => Some(AppValue::Bool(match value {
                Value::Integer(i) => *i != 0,
                Value::Real(r) => *r != 0.0 && !r.is_nan(),
                Value::Text(s) => !s.is_empty(),
                Value::Blob(_) | Value::Null => true,
            })),
            Transformer::DateText => Some(AppValue::Timestamp(match value {
                Value::Text(s) => Timestamp::parse(s),
                _ => Timestamp::INVALID,
            })),
            Transformer::DateInteger => Some(AppValue::Timestamp(match value {
                Value::Integer(secs) => secs
                    .checked_mul(1000)
                    .map_or(Timestamp::INVALID, Timestamp::from_millis),
                Value::Real(secs) => integral(*secs)
                    .and_then(|secs| secs.checked_mul(1000))
                    .map_or(Timestamp::INVALID, Timestamp::from_millis),
                _ => Timestamp::INVALID,
            })),
            Transformer::NumberText | Transformer::NumberDefault => Some(match value {
                Value::Integer(i) => AppValue::Integer(*i),
                Value::Real(r) => AppValue::Real(*r),
                Value::Text(s) => parse_number(s),
                Value::Blob(b) => parse_number(&String::from_utf8_lossy(b)),
                Value::Null => AppValue::Real(f64::NAN),
            }),
            Transformer::StringDefault | Transformer::StringText | Transformer::StringNumber => {
                Some(AppValue::Text(match value {
                    Value::Integer(i) => i.to_string(),
                    Value::Real(r) => format_number(*r),
                    Value::Text(s) => s.clone(),
                    Value::Blob(b) => String::from_utf8_lossy(b).into_owned(),
                    Value::Null => String::new(),
                }))
            }
            Transformer::UnknownDefault => Some(match value {
                Value::Integer(i) => AppValue::Integer(*i),
                Value::Real(r) => AppValue::Real(*r),
                Value::Text(s) => AppValue::Text(s.clone()),
                Value::Blob(b) => AppValue::Blob(b.clone()),
                Value::Null => return None,
            }),
        };
        if decoded.is_none() {
            tracing::trace!(transformer = ?self, ?value, "cell decoded to absent value");
        }
        decoded
    }
}

fn truthiness(value: &AppValue) -> Option<bool> {
    match value {
        AppValue::Bool(b) => Some(*b),
        AppValue::Integer(i) => Some(*i != 0),
        AppValue::Real(r) => Some(*r != 0.0 && !r.is_nan()),
        _ => None,
    }
}

fn json_of(value: &AppValue) -> serde_json::Value {
    use serde_json::Value as Json;
    match value {
        AppValue::Json(v) => v.clone(),
        AppValue::Bool(b) => Json::Bool(*b),
        AppValue::Integer(i) => Json::from(*i),
        AppValue::Real(r) => serde_json::Number::from_f64(*r).map_or(Json::Null, Json::Number),
        AppValue::Text(s) => Json::String(s.clone()),
        AppValue::Blob(b) => Json::from(b.clone()),
        AppValue::Timestamp(ts) => ts.to_iso_string().map_or(Json::Null, Json::String),
    }
}

fn decode_json(value: &Value) -> Option<AppValue> {
    let parsed = match value {
        Value::Text(s) => serde_json::from_str(s).ok(),
        Value::Blob(b) => serde_json::from_slice(b).ok(),
        Value::Integer(i) => Some(serde_json::Value::from(*i)),
        Value::Real(r) => serde_json::Number::from_f64(*r).map(serde_json::Value::Number),
        Value::Null => None,
    };
    parsed.map(AppValue::Json)
}
