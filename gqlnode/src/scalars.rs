//! Codecs for custom scalars.
//!
//! Every custom scalar named by a schema must have a codec. `DateTime`, `Date`, `Time`, `Decimal`
//! and `UUID` have default ones; any other name needs one registered by the embedding
//! application, or a pass-through [`OpaqueCodec`] declared in the configuration.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::DateTime;
use chrono::FixedOffset;
use chrono::NaiveDate;
use chrono::NaiveTime;
use indexmap::IndexMap;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::ScalarError;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";

/// The decoded form of a custom scalar value.
#[derive(Debug, Clone, PartialEq)]
pub enum CustomValue {
    DateTime(DateTime<FixedOffset>),
    Date(NaiveDate),
    Time(NaiveTime),
    Decimal(Decimal),
    Uuid(Uuid),
    /// A value whose codec keeps the JSON representation.
    Opaque(Value),
}

/// Converts one custom scalar between its JSON representation and its native one.
pub trait ScalarCodec: Send + Sync + fmt::Debug {
    /// Name of the native type generated code should use for the scalar.
    fn native_type(&self) -> &str;

    fn deserialize(&self, value: &Value) -> Result<CustomValue, ScalarError>;

    fn serialize(&self, value: &CustomValue) -> Result<Value, ScalarError>;
}

fn invalid(scalar: &str, reason: impl Into<String>) -> ScalarError {
    ScalarError {
        scalar: scalar.to_string(),
        reason: reason.into(),
    }
}

fn expect_str<'a>(scalar: &str, value: &'a Value) -> Result<&'a str, ScalarError> {
    value
        .as_str()
        .ok_or_else(|| invalid(scalar, format!("expected a string, found {}", value.json_kind())))
}

fn mismatch(scalar: &str, value: &CustomValue) -> ScalarError {
    invalid(scalar, format!("cannot serialize {value:?}"))
}

/// RFC 3339 date and time with offset.
#[derive(Debug, Default)]
pub struct DateTimeCodec;

impl ScalarCodec for DateTimeCodec {
    fn native_type(&self) -> &str {
        "DateTime<FixedOffset>"
    }

    fn deserialize(&self, value: &Value) -> Result<CustomValue, ScalarError> {
        DateTime::parse_from_rfc3339(expect_str("DateTime", value)?)
            .map(CustomValue::DateTime)
            .map_err(|error| invalid("DateTime", error.to_string()))
    }

    fn serialize(&self, value: &CustomValue) -> Result<Value, ScalarError> {
        match value {
            CustomValue::DateTime(date_time) => Ok(date_time.to_rfc3339().into()),
            other => Err(mismatch("DateTime", other)),
        }
    }
}

/// `YYYY-MM-DD`
#[derive(Debug, Default)]
pub struct DateCodec;

impl ScalarCodec for DateCodec {
    fn native_type(&self) -> &str {
        "NaiveDate"
    }

    fn deserialize(&self, value: &Value) -> Result<CustomValue, ScalarError> {
        NaiveDate::parse_from_str(expect_str("Date", value)?, DATE_FORMAT)
            .map(CustomValue::Date)
            .map_err(|error| invalid("Date", error.to_string()))
    }

    fn serialize(&self, value: &CustomValue) -> Result<Value, ScalarError> {
        match value {
            CustomValue::Date(date) => Ok(date.format(DATE_FORMAT).to_string().into()),
            other => Err(mismatch("Date", other)),
        }
    }
}

/// `HH:MM:SS` with optional fractional seconds.
#[derive(Debug, Default)]
pub struct TimeCodec;

impl ScalarCodec for TimeCodec {
    fn native_type(&self) -> &str {
        "NaiveTime"
    }

    fn deserialize(&self, value: &Value) -> Result<CustomValue, ScalarError> {
        NaiveTime::parse_from_str(expect_str("Time", value)?, TIME_FORMAT)
            .map(CustomValue::Time)
            .map_err(|error| invalid("Time", error.to_string()))
    }

    fn serialize(&self, value: &CustomValue) -> Result<Value, ScalarError> {
        match value {
            CustomValue::Time(time) => Ok(time.format(TIME_FORMAT).to_string().into()),
            other => Err(mismatch("Time", other)),
        }
    }
}

/// Arbitrary precision decimal, read from a string or a number and written as a string so no
/// precision is lost.
#[derive(Debug, Default)]
pub struct DecimalCodec;

impl ScalarCodec for DecimalCodec {
    fn native_type(&self) -> &str {
        "Decimal"
    }

    fn deserialize(&self, value: &Value) -> Result<CustomValue, ScalarError> {
        let decimal = match value {
            Value::String(s) => Decimal::from_str(s.as_str()),
            Value::Number(n) => Decimal::from_str(&n.to_string()),
            other => {
                return Err(invalid(
                    "Decimal",
                    format!("expected a string or a number, found {}", other.json_kind()),
                ))
            }
        };
        decimal
            .map(CustomValue::Decimal)
            .map_err(|error| invalid("Decimal", error.to_string()))
    }

    fn serialize(&self, value: &CustomValue) -> Result<Value, ScalarError> {
        match value {
            CustomValue::Decimal(decimal) => Ok(decimal.to_string().into()),
            other => Err(mismatch("Decimal", other)),
        }
    }
}

#[derive(Debug, Default)]
pub struct UuidCodec;

impl ScalarCodec for UuidCodec {
    fn native_type(&self) -> &str {
        "Uuid"
    }

    fn deserialize(&self, value: &Value) -> Result<CustomValue, ScalarError> {
        Uuid::parse_str(expect_str("UUID", value)?)
            .map(CustomValue::Uuid)
            .map_err(|error| invalid("UUID", error.to_string()))
    }

    fn serialize(&self, value: &CustomValue) -> Result<Value, ScalarError> {
        match value {
            CustomValue::Uuid(uuid) => Ok(uuid.to_string().into()),
            other => Err(mismatch("UUID", other)),
        }
    }
}

/// Keeps the JSON value as is.
#[derive(Debug)]
pub struct OpaqueCodec {
    native_type: String,
}

impl OpaqueCodec {
    pub fn new(native_type: impl Into<String>) -> Self {
        Self {
            native_type: native_type.into(),
        }
    }
}

impl ScalarCodec for OpaqueCodec {
    fn native_type(&self) -> &str {
        &self.native_type
    }

    fn deserialize(&self, value: &Value) -> Result<CustomValue, ScalarError> {
        Ok(CustomValue::Opaque(value.clone()))
    }

    fn serialize(&self, value: &CustomValue) -> Result<Value, ScalarError> {
        match value {
            CustomValue::Opaque(value) => Ok(value.clone()),
            other => Err(mismatch(&self.native_type, other)),
        }
    }
}

/// Codecs by scalar name.
#[derive(Clone, Debug)]
pub struct ScalarCodecs {
    codecs: IndexMap<String, Arc<dyn ScalarCodec>>,
}

impl Default for ScalarCodecs {
    fn default() -> Self {
        let mut codecs = Self::empty();
        codecs.register("DateTime", Arc::new(DateTimeCodec));
        codecs.register("Date", Arc::new(DateCodec));
        codecs.register("Time", Arc::new(TimeCodec));
        codecs.register("Decimal", Arc::new(DecimalCodec));
        codecs.register("UUID", Arc::new(UuidCodec));
        codecs
    }
}

impl ScalarCodecs {
    /// No codec at all, not even the default ones.
    pub fn empty() -> Self {
        Self {
            codecs: IndexMap::new(),
        }
    }

    /// Registers a codec, replacing any previous one for that name.
    pub fn register(&mut self, name: impl Into<String>, codec: Arc<dyn ScalarCodec>) {
        self.codecs.insert(name.into(), codec);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ScalarCodec>> {
        self.codecs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.codecs.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.codecs.keys().map(String::as_str)
    }

    /// Decodes a value of the named scalar.
    pub fn deserialize(&self, name: &str, value: &Value) -> Result<CustomValue, ScalarError> {
        self.get(name)
            .ok_or_else(|| invalid(name, "no codec registered"))?
            .deserialize(value)
    }

    /// Encodes a value of the named scalar.
    pub fn serialize(&self, name: &str, value: &CustomValue) -> Result<Value, ScalarError> {
        self.get(name)
            .ok_or_else(|| invalid(name, "no codec registered"))?
            .serialize(value)
    }
}
