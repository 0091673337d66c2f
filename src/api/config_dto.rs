use serde::{Deserialize, Serialize};

/// The `resource` configuration table.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourceConfigDto {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub config: Option<Vec<ConfigResourceDto>>,
    #[serde(default)]
    pub exclude: Option<String>,
    #[serde(default)]
    pub noverify: bool,
    #[serde(default)]
    pub norestrict: bool,
    #[serde(default)]
    pub rediscover: bool,
    #[serde(default)]
    pub monitor_force_up: bool,
    #[serde(default)]
    pub journal_max: Option<usize>,
}

/// Inline resource entry: every host in `hosts` gets `cores` (and `gpus`).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfigResourceDto {
    pub hosts: String,
    #[serde(default)]
    pub cores: Option<String>,
    #[serde(default)]
    pub gpus: Option<String>,
    #[serde(default)]
    pub properties: Vec<String>,
}
