//! Shapes of a block configuration document.
//!
//! Every field is optional at this level; which ones are required, and how a
//! missing one is treated, is decided by the loader.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockDescriptor {
    #[serde(rename = "Type", alias = "type")]
    pub type_tag: Option<String>,
    #[serde(rename = "Inputs", alias = "inputs")]
    pub inputs: Option<Vec<InputEntry>>,
    #[serde(rename = "Coefficients", alias = "coefficients")]
    pub coefficients: Option<Vec<CoefficientGroup>>,
    #[serde(rename = "Outputs", alias = "outputs")]
    pub outputs: Option<Vec<OutputEntry>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputEntry {
    pub code: Option<String>,
    #[serde(rename = "KKS", alias = "kks")]
    pub kks: Option<String>,
    #[serde(rename = "type")]
    pub signal_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputEntry {
    pub code: Option<String>,
    pub table_col: Option<String>,
    pub table_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoefficientGroup {
    pub table_name: Option<String>,
    pub code_signals: Option<Vec<CoefficientSignal>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoefficientSignal {
    pub code: Option<String>,
    pub row: Option<Vec<String>>,
}
