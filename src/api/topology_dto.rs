use serde::{Deserialize, Serialize};

/// Local hardware summary as reported by the topology probe.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LocalTopologyDto {
    pub hostname: String,
    pub cores: u32,
    #[serde(default)]
    pub gpus: u32,
}
