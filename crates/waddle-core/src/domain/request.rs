//! Pipeline run requests and their parameter bag.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How the generation stage is driven.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Preset gaits picked by the generator itself.
    #[default]
    Auto,
    /// Caller supplies the gait parameters.
    Advanced,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Auto => "auto",
            RunMode::Advanced => "advanced",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(RunMode::Auto),
            "advanced" => Ok(RunMode::Advanced),
            other => Err(format!("unknown mode '{other}'; expected 'auto' or 'advanced'")),
        }
    }
}

/// A scalar request parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ParamValue {
    /// Parse a command-line literal, preferring the narrowest scalar type.
    pub fn parse_literal(raw: &str) -> Self {
        if let Ok(b) = raw.parse::<bool>() {
            ParamValue::Bool(b)
        } else if let Ok(i) = raw.parse::<i64>() {
            ParamValue::Int(i)
        } else if let Ok(f) = raw.parse::<f64>() {
            ParamValue::Float(f)
        } else {
            ParamValue::Str(raw.to_string())
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(i) => Some(*i),
            ParamValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            ParamValue::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        match self {
            ParamValue::Int(_) | ParamValue::Float(_) => true,
            ParamValue::Str(s) => s.trim().parse::<f64>().is_ok(),
            ParamValue::Bool(_) => false,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Float(x) => write!(f, "{x}"),
            ParamValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Str(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Str(s)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        ParamValue::Int(i)
    }
}

impl From<f64> for ParamValue {
    fn from(x: f64) -> Self {
        ParamValue::Float(x)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

/// One invocation of a pipeline capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub entity_type: String,

    /// Defaults to the first declared variant of the type.
    #[serde(default)]
    pub variant: Option<String>,

    #[serde(default)]
    pub mode: RunMode,

    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
}

impl RunRequest {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            variant: None,
            mode: RunMode::Auto,
            params: BTreeMap::new(),
        }
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&ParamValue> {
        self.params.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse() {
        assert_eq!("Advanced".parse::<RunMode>().unwrap(), RunMode::Advanced);
        assert!("manual".parse::<RunMode>().is_err());
    }

    #[test]
    fn test_param_literal_parsing() {
        assert_eq!(ParamValue::parse_literal("12"), ParamValue::Int(12));
        assert_eq!(ParamValue::parse_literal("0.15"), ParamValue::Float(0.15));
        assert_eq!(ParamValue::parse_literal("true"), ParamValue::Bool(true));
        assert_eq!(ParamValue::parse_literal("sweep"), ParamValue::Str("sweep".into()));
    }

    #[test]
    fn test_param_display_is_verbatim() {
        assert_eq!(ParamValue::Float(0.05).to_string(), "0.05");
        assert_eq!(ParamValue::Int(-3).to_string(), "-3");
        assert_eq!(ParamValue::Str("0.10".into()).to_string(), "0.10");
    }

    #[test]
    fn test_request_deserializes_untagged_params() {
        let req: RunRequest = serde_json::from_str(
            r#"{"entity_type": "open_duck_mini", "mode": "advanced",
                "params": {"dx": 0.1, "num_motions": 3, "generation_type": "random"}}"#,
        )
        .unwrap();
        assert_eq!(req.mode, RunMode::Advanced);
        assert_eq!(req.variant, None);
        assert_eq!(req.param("dx"), Some(&ParamValue::Float(0.1)));
        assert_eq!(req.param("num_motions").and_then(ParamValue::as_i64), Some(3));
    }
}
