use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use indexmap::IndexMap;
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};

/// Database-native scalar stored in a SQLite cell
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(r) => Value::Real(r),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Real(r) => ToSqlOutput::Borrowed(ValueRef::Real(*r)),
            Value::Text(t) => ToSqlOutput::Borrowed(ValueRef::Text(t.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

/// A point in time with millisecond precision, or the invalid sentinel.
///
/// Decoding malformed date cells yields [`Timestamp::INVALID`] instead of an
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timestamp(Option<i64>);

impl Timestamp {
    pub const INVALID: Timestamp = Timestamp(None);

    pub fn from_millis(millis: i64) -> Self {
        Timestamp(Some(millis))
    }

    pub fn now() -> Self {
        Timestamp(Some(Utc::now().timestamp_millis()))
    }

    pub fn is_valid(&self) -> bool {
        self.0.is_some()
    }

    /// Milliseconds since the Unix epoch; `None` for an invalid timestamp
    pub fn millis(&self) -> Option<i64> {
        self.0
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        self.0.and_then(DateTime::<Utc>::from_timestamp_millis)
    }

    /// ISO-8601 text with millisecond precision, e.g. `2011-10-05T14:48:00.000Z`
    pub fn to_iso_string(&self) -> Option<String> {
        self.to_datetime()
            .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
    }

    /// Parses ISO-8601 text. Datetimes without an offset and bare dates are
    /// taken as UTC. Anything unparseable yields [`Timestamp::INVALID`].
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Timestamp::from_millis(dt.timestamp_millis());
        }
        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
                return Timestamp::from_millis(dt.and_utc().timestamp_millis());
            }
        }
        match NaiveDate::parse_from_str(text, "%Y-%m-%d") {
            Ok(date) => date
                .and_hms_opt(0, 0, 0)
                .map(|dt| Timestamp::from_millis(dt.and_utc().timestamp_millis()))
                .unwrap_or(Timestamp::INVALID),
            Err(_) => Timestamp::INVALID,
        }
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Timestamp::from_millis(value.timestamp_millis())
    }
}

/// Typed application-side value held by an entity property.
///
/// Absence is modelled with `Option::None` wherever an `AppValue` is passed.
/// Equality is numeric across `Integer` and `Real`: `Integer(3) == Real(3.0)`.
#[derive(Debug, Clone)]
pub enum AppValue {
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Timestamp(Timestamp),
    Json(serde_json::Value),
}

impl PartialEq for AppValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (AppValue::Bool(a), AppValue::Bool(b)) => a == b,
            (AppValue::Integer(a), AppValue::Integer(b)) => a == b,
            (AppValue::Real(a), AppValue::Real(b)) => a == b,
            (AppValue::Integer(i), AppValue::Real(r)) | (AppValue::Real(r), AppValue::Integer(i)) => {
                integral(*r) == Some(*i)
            }
            (AppValue::Text(a), AppValue::Text(b)) => a == b,
            (AppValue::Blob(a), AppValue::Blob(b)) => a == b,
            (AppValue::Timestamp(a), AppValue::Timestamp(b)) => a == b,
            (AppValue::Json(a), AppValue::Json(b)) => a == b,
            _ => false,
        }
    }
}

impl AppValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AppValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integral numbers; reals are accepted when they carry no fraction
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AppValue::Integer(i) => Some(*i),
            AppValue::Real(r) => integral(*r),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AppValue::Integer(i) => Some(*i as f64),
            AppValue::Real(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AppValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<Timestamp> {
        match self {
            AppValue::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            AppValue::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_string(self) -> Option<String> {
        match self {
            AppValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for AppValue {
    fn from(value: bool) -> Self {
        AppValue::Bool(value)
    }
}

impl From<i64> for AppValue {
    fn from(value: i64) -> Self {
        AppValue::Integer(value)
    }
}

impl From<i32> for AppValue {
    fn from(value: i32) -> Self {
        AppValue::Integer(value.into())
    }
}

impl From<f64> for AppValue {
    fn from(value: f64) -> Self {
        AppValue::Real(value)
    }
}

impl From<String> for AppValue {
    fn from(value: String) -> Self {
        AppValue::Text(value)
    }
}

impl From<&str> for AppValue {
    fn from(value: &str) -> Self {
        AppValue::Text(value.to_string())
    }
}

impl From<Vec<u8>> for AppValue {
    fn from(value: Vec<u8>) -> Self {
        AppValue::Blob(value)
    }
}

impl From<Timestamp> for AppValue {
    fn from(value: Timestamp) -> Self {
        AppValue::Timestamp(value)
    }
}

impl From<DateTime<Utc>> for AppValue {
    fn from(value: DateTime<Utc>) -> Self {
        AppValue::Timestamp(value.into())
    }
}

impl From<serde_json::Value> for AppValue {
    fn from(value: serde_json::Value) -> Self {
        AppValue::Json(value)
    }
}

/// Named bind parameters, keyed by placeholder (`:COLUMN`)
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Params {
    pub values: IndexMap<String, Value>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named value
    pub fn with_value(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<Value>) {
        self.values.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Borrowed view accepted by rusqlite's named-parameter binding
    pub fn as_named(&self) -> Vec<(&str, &dyn ToSql)> {
        self.values
            .iter()
            .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
            .collect()
    }
}

/// One result row: column name to cell value, in select-list order
pub type Row = IndexMap<String, Value>;

/// `r` as an `i64` when it is integral and within range
pub(crate) fn integral(r: f64) -> Option<i64> {
    // i64::MIN is exactly representable; i64::MAX rounds up to 2^63
    const MIN: f64 = -9_223_372_036_854_775_808.0;
    const MAX: f64 = 9_223_372_036_854_775_808.0;
    if r.fract() == 0.0 && (MIN..MAX).contains(&r) {
        Some(r as i64)
    } else {
        None
    }
}

/// Renders a number as text. Non-finite values print as `NaN`, `Infinity`
/// or `-Infinity`; integral values print without a fraction.
pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n == f64::INFINITY {
        "Infinity".to_string()
    } else if n == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Lenient text-to-number coercion: surrounding whitespace is ignored, empty
/// text is zero and anything unparseable is `NaN`.
pub(crate) fn parse_number(text: &str) -> AppValue {
    let text = text.trim();
    if text.is_empty() {
        return AppValue::Integer(0);
    }
    if let Ok(i) = text.parse::<i64>() {
        return AppValue::Integer(i);
    }
    match text {
        "Infinity" | "+Infinity" => return AppValue::Real(f64::INFINITY),
        "-Infinity" => return AppValue::Real(f64::NEG_INFINITY),
        _ => {}
    }
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16)
            .map(AppValue::Integer)
            .unwrap_or(AppValue::Real(f64::NAN));
    }
    // Rust accepts "inf" and "nan" spellings that are not numbers here
    if text.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return AppValue::Real(f64::NAN);
    }
    text.parse::<f64>()
        .map(AppValue::Real)
        .unwrap_or(AppValue::Real(f64::NAN))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_iso_round_trip() {
        let ts = Timestamp::from_millis(1_318_776_480_000);
        let text = ts.to_iso_string().unwrap();
        assert_eq!(text, "2011-10-16T14:48:00.000Z");
        assert_eq!(Timestamp::parse(&text), ts);
    }

    #[test]
    fn test_timestamp_parse_variants() {
        assert_eq!(Timestamp::parse("1970-01-02"), Timestamp::from_millis(86_400_000));
        assert_eq!(
            Timestamp::parse("1970-01-01T01:00:00+01:00"),
            Timestamp::from_millis(0)
        );
        assert!(!Timestamp::parse("not a date").is_valid());
        assert_eq!(Timestamp::INVALID.to_iso_string(), None);
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(1.5), "1.5");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::INFINITY), "Infinity");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_integral() {
        assert_eq!(integral(3.0), Some(3));
        assert_eq!(integral(-0.0), Some(0));
        assert_eq!(integral(-9_223_372_036_854_775_808.0), Some(i64::MIN));
        assert_eq!(integral(9_223_372_036_854_775_808.0), None);
        assert_eq!(integral(1e300), None);
        assert_eq!(integral(2.5), None);
        assert_eq!(integral(f64::NAN), None);
        assert_eq!(integral(f64::INFINITY), None);
        assert_eq!(AppValue::Real(1e300).as_i64(), None);
        assert_eq!(AppValue::Real(-42.0).as_i64(), Some(-42));
    }

    #[test]
    fn test_numeric_equality() {
        assert_eq!(AppValue::Integer(3), AppValue::Real(3.0));
        assert_eq!(AppValue::Real(0.0), AppValue::Integer(0));
        assert_ne!(AppValue::Integer(3), AppValue::Real(3.5));
        assert_ne!(AppValue::Integer(i64::MAX), AppValue::Real(9_223_372_036_854_775_808.0));
        assert_ne!(AppValue::Real(f64::NAN), AppValue::Real(f64::NAN));
        assert_ne!(AppValue::Integer(1), AppValue::Bool(true));
        assert_ne!(AppValue::Integer(1), AppValue::Text("1".into()));
    }

    #[test]
    fn test_number_parsing() {
        assert_eq!(parse_number(" 42 "), AppValue::Integer(42));
        assert_eq!(parse_number(""), AppValue::Integer(0));
        assert_eq!(parse_number("2.5"), AppValue::Real(2.5));
        assert_eq!(parse_number("0x10"), AppValue::Integer(16));
        assert_eq!(parse_number("-Infinity"), AppValue::Real(f64::NEG_INFINITY));
        assert!(matches!(parse_number("inf"), AppValue::Real(r) if r.is_nan()));
        assert!(matches!(parse_number("abc"), AppValue::Real(r) if r.is_nan()));
    }
}
