use alloc::string::String;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ParameterKind {
    Int,
    Float,
    String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    String(String),
}

impl ParameterValue {
    pub fn kind(&self) -> ParameterKind {
        match self {
            Self::Int(_) => ParameterKind::Int,
            Self::Float(_) => ParameterKind::Float,
            Self::String(_) => ParameterKind::String,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) => Some(*v as i64),
            Self::String(_) => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::String(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }
}

/// Describes one tunable a codec accepts.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ParameterInfo {
    pub name: String,
    #[serde(default)]
    pub label: String,
    pub kind: ParameterKind,
    pub default: ParameterValue,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl ParameterInfo {
    /// Returns true if the value has the declared kind and lies within the declared range.
    pub fn accepts(&self, value: &ParameterValue) -> bool {
        if value.kind() != self.kind {
            return false;
        }
        match value.as_float() {
            Some(v) => self.min.map_or(true, |min| v >= min) && self.max.map_or(true, |max| v <= max),
            None => true,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parameter_accepts() {
        let info = ParameterInfo {
            name: "bitrate".into(),
            label: "Bitrate".into(),
            kind: ParameterKind::Int,
            default: ParameterValue::Int(1_000_000),
            min: Some(0.0),
            max: Some(50_000_000.0),
        };
        assert!(info.accepts(&ParameterValue::Int(5_000_000)));
        assert!(!info.accepts(&ParameterValue::Int(-1)));
        assert!(!info.accepts(&ParameterValue::Float(1.0)));
        assert!(!info.accepts(&ParameterValue::String("fast".into())));
    }
}
