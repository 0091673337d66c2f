use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Wire/storage form of a version 1 resource description (R).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Rv1Dto {
    pub version: u32,
    pub execution: ExecutionDto,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduling: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ExecutionDto {
    #[serde(rename = "R_lite")]
    pub r_lite: Vec<RLiteDto>,
    #[serde(default)]
    pub starttime: f64,
    #[serde(default)]
    pub expiration: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodelist: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

/// One `R_lite` entry: a rank idset sharing identical children.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RLiteDto {
    pub rank: String,
    pub children: BTreeMap<String, String>,
}
