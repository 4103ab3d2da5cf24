//! Runtime metric values and their kinds.
//!
//! [`ValueKind`] is the caller-supplied type identifier the handler table is
//! keyed by; [`MetricValue`] carries an actual value of one of those kinds.

use serde::{Deserialize, Serialize};

/// Type identifier used to pick a [`TypeHandler`](crate::handler::TypeHandler).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// `bool`, exported as a 32-bit 0/1.
    Bool,
    /// `i32`.
    I32,
    /// `u32`.
    U32,
    /// `i64`.
    I64,
    /// `u64`.
    U64,
    /// `f32`, widened on the wire.
    F32,
    /// `f64`.
    F64,
    /// UTF-8 text.
    Str,
}

/// A runtime metric value.
///
/// Serializes as `{"kind": "i64", "value": 42}` in JSON configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MetricValue {
    /// Boolean flag.
    Bool(bool),
    /// Signed 32-bit integer.
    I32(i32),
    /// Unsigned 32-bit integer.
    U32(u32),
    /// Signed 64-bit integer.
    I64(i64),
    /// Unsigned 64-bit integer.
    U64(u64),
    /// Single precision float.
    F32(f32),
    /// Double precision float.
    F64(f64),
    /// Text.
    Str(String),
}

impl MetricValue {
    /// Returns the kind used for handler lookup.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Bool(_) => ValueKind::Bool,
            Self::I32(_) => ValueKind::I32,
            Self::U32(_) => ValueKind::U32,
            Self::I64(_) => ValueKind::I64,
            Self::U64(_) => ValueKind::U64,
            Self::F32(_) => ValueKind::F32,
            Self::F64(_) => ValueKind::F64,
            Self::Str(_) => ValueKind::Str,
        }
    }
}

macro_rules! impl_from_primitive {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for MetricValue {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

impl_from_primitive! {
    bool => Bool,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    String => Str,
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

/// How a monitoring agent should interpret successive values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Semantics {
    /// Semantics not declared.
    #[default]
    Unspecified,
    /// Monotonically increasing count; rates are meaningful.
    Counter,
    /// Point-in-time reading such as a gauge.
    Instant,
    /// Value that changes rarely, such as a constant or configuration.
    Discrete,
}

impl Semantics {
    /// Returns the MMV numeric code for these semantics.
    pub fn code(self) -> u32 {
        match self {
            Self::Unspecified => 0,
            Self::Counter => 1,
            Self::Instant => 3,
            Self::Discrete => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_follows_variant() {
        assert_eq!(MetricValue::from(3i32).kind(), ValueKind::I32);
        assert_eq!(MetricValue::from(3u64).kind(), ValueKind::U64);
        assert_eq!(MetricValue::from(0.5f32).kind(), ValueKind::F32);
        assert_eq!(MetricValue::from(true).kind(), ValueKind::Bool);
        assert_eq!(MetricValue::from("up").kind(), ValueKind::Str);
    }

    #[test]
    fn test_value_json_shape() {
        let value = MetricValue::I64(12_345_678_901_234);
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"kind":"i64","value":12345678901234}"#);

        let back: MetricValue = serde_json::from_str(r#"{"kind":"str","value":"ok"}"#).unwrap();
        assert_eq!(back, MetricValue::Str("ok".to_string()));
    }

    #[test]
    fn test_semantics_codes() {
        assert_eq!(Semantics::Unspecified.code(), 0);
        assert_eq!(Semantics::Counter.code(), 1);
        assert_eq!(Semantics::Instant.code(), 3);
        assert_eq!(Semantics::Discrete.code(), 4);
    }
}
