use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CalcError, Result};

/// Declared type of an input signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalType {
    Integer,
    Real,
    Text,
}

impl SignalType {
    /// Parse the `type` token of an input entry.
    ///
    /// Only a fixed set of tokens is accepted; anything else is a configuration error.
    pub fn from_token(token: &str) -> Result<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "i" | "int" | "integer" => Ok(Self::Integer),
            "d" | "f" | "r" | "double" | "float" | "real" => Ok(Self::Real),
            "s" | "t" | "str" | "string" | "text" => Ok(Self::Text),
            other => Err(CalcError::config(format!(
                "unknown signal type token \"{}\"",
                other
            ))),
        }
    }

    pub fn zero(self) -> SignalValue {
        match self {
            Self::Integer => SignalValue::Integer(0),
            Self::Real => SignalValue::Real(0.0),
            Self::Text => SignalValue::Text(String::new()),
        }
    }
}

/// Typed value of a signal or coefficient cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalValue {
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SignalValue {
    pub fn signal_type(&self) -> SignalType {
        match self {
            Self::Integer(_) => SignalType::Integer,
            Self::Real(_) => SignalType::Real,
            Self::Text(_) => SignalType::Text,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(v) => Some(*v as f64),
            Self::Real(v) => Some(*v),
            Self::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Convert a JSON literal from the input value file.
    ///
    /// Returns `None` for booleans, nulls, arrays and objects.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Self::Integer(i))
                } else {
                    n.as_f64().map(Self::Real)
                }
            }
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }

    /// Interpret a cell fetched from the store: leading whitespace is
    /// skipped, an empty cell reads as `0.0` and a remainder that parses
    /// entirely as a real number becomes `Real`. Anything else stays text.
    pub fn from_cell(cell: &str) -> Self {
        let number = cell.trim_start();
        if number.is_empty() {
            return Self::Real(0.0);
        }
        match number.parse::<f64>() {
            Ok(v) => Self::Real(v),
            Err(_) => Self::Text(cell.to_string()),
        }
    }
}

impl Default for SignalValue {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

/// Reals render with six decimals, the format stored output columns carry.
impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{}", v),
            Self::Real(v) => write!(f, "{:.6}", v),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for SignalValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for SignalValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<&str> for SignalValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SignalValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tokens() {
        assert_eq!(SignalType::from_token("i").unwrap(), SignalType::Integer);
        assert_eq!(SignalType::from_token("d").unwrap(), SignalType::Real);
        assert_eq!(SignalType::from_token("Real").unwrap(), SignalType::Real);
        assert_eq!(SignalType::from_token("s").unwrap(), SignalType::Text);
        assert!(SignalType::from_token("x").is_err());
        assert!(SignalType::from_token("").is_err());
    }

    #[test]
    fn test_zero_values() {
        assert_eq!(SignalType::Integer.zero(), SignalValue::Integer(0));
        assert_eq!(SignalType::Real.zero(), SignalValue::Real(0.0));
        assert_eq!(SignalType::Text.zero(), SignalValue::Text(String::new()));
    }

    #[test]
    fn test_cell_parsing() {
        assert_eq!(SignalValue::from_cell("3.14"), SignalValue::Real(3.14));
        assert_eq!(SignalValue::from_cell("42"), SignalValue::Real(42.0));
        assert_eq!(SignalValue::from_cell("N/A"), SignalValue::Text("N/A".into()));
        assert_eq!(SignalValue::from_cell("1.5 kg"), SignalValue::Text("1.5 kg".into()));
        assert_eq!(SignalValue::from_cell(" 3.14"), SignalValue::Real(3.14));
        assert_eq!(SignalValue::from_cell("3.14 "), SignalValue::Text("3.14 ".into()));
        assert_eq!(SignalValue::from_cell(""), SignalValue::Real(0.0));
        assert_eq!(SignalValue::from_cell("  "), SignalValue::Real(0.0));
    }

    #[test]
    fn test_rendering() {
        assert_eq!(SignalValue::Integer(7).to_string(), "7");
        assert_eq!(SignalValue::Real(1.5).to_string(), "1.500000");
        assert_eq!(SignalValue::Text("on".into()).to_string(), "on");
        assert_eq!(SignalValue::default().to_string(), "");
    }

    #[test]
    fn test_from_json() {
        assert_eq!(
            SignalValue::from_json(&serde_json::json!(5)),
            Some(SignalValue::Integer(5))
        );
        assert_eq!(
            SignalValue::from_json(&serde_json::json!(2.5)),
            Some(SignalValue::Real(2.5))
        );
        assert_eq!(
            SignalValue::from_json(&serde_json::json!("x")),
            Some(SignalValue::Text("x".into()))
        );
        assert_eq!(SignalValue::from_json(&serde_json::json!(true)), None);
    }
}
