use serde::{Deserialize, Serialize};

use crate::api::config_dto::ResourceConfigDto;
use crate::api::rv1_dto::Rv1Dto;

/// A request to the resource service, tagged by method name.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum Command {
    Status,
    SchedStatus,
    Drain {
        targets: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<String>,
    },
    Undrain {
        targets: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Streaming; one session at a time.
    Acquire,
    AcquireCancel {
        matchtag: u32,
    },
    /// Streaming.
    Journal,
    JournalCancel {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        matchtag: Option<u32>,
    },
    ConfigReload {
        config: ResourceConfigDto,
    },
    /// The sender is going away.
    Disconnect,
    /// R, answered once it is defined.
    Get,
    MonitorWaitup {
        up: usize,
    },
    ReslogSync,
    TopoReduce {
        count: usize,
        resources: Rv1Dto,
    },
}

impl Command {
    pub fn method(&self) -> &'static str {
        match self {
            Command::Status => "status",
            Command::SchedStatus => "sched-status",
            Command::Drain { .. } => "drain",
            Command::Undrain { .. } => "undrain",
            Command::Acquire => "acquire",
            Command::AcquireCancel { .. } => "acquire-cancel",
            Command::Journal => "journal",
            Command::JournalCancel { .. } => "journal-cancel",
            Command::ConfigReload { .. } => "config-reload",
            Command::Disconnect => "disconnect",
            Command::Get => "get",
            Command::MonitorWaitup { .. } => "monitor-waitup",
            Command::ReslogSync => "reslog-sync",
            Command::TopoReduce { .. } => "topo-reduce",
        }
    }

    /// Requests answered with a stream of responses.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Command::Acquire | Command::Journal)
    }

    /// Requests that never get a response.
    pub fn is_fire_and_forget(&self) -> bool {
        matches!(self, Command::AcquireCancel { .. } | Command::JournalCancel { .. } | Command::Disconnect)
    }
}
