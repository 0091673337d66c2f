//! Resource eventlog entries and their persisted encoding.
//!
//! The durable log is newline-delimited JSON, one `{timestamp, name,
//! context}` object per line, stored as a single appended value.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::domain::utils::idset::Idset;
use crate::error::{Error, Result};

pub const EVENTLOG_KEY: &str = "resource.eventlog";
pub const R_KEY: &str = "resource.R";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventlogEntry {
    pub timestamp: f64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, Value>,
}

impl EventlogEntry {
    pub fn new(timestamp: f64, name: impl Into<String>, context: Map<String, Value>) -> Self {
        Self { timestamp, name: name.into(), context }
    }

    /// One line of the persisted log, newline included.
    pub fn encode(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_default();
        line.push('\n');
        line
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

pub fn decode_eventlog(s: &str) -> Result<Vec<EventlogEntry>> {
    s.lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(lineno, line)| {
            serde_json::from_str::<EventlogEntry>(line)
                .map_err(|e| Error::Replay(format!("eventlog entry {}: {}", lineno + 1, e)))
        })
        .collect()
}

pub fn encode_eventlog(entries: &[EventlogEntry]) -> String {
    entries.iter().map(EventlogEntry::encode).collect()
}

/// Typed view of the recognized eventlog entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "context", rename_all = "kebab-case")]
pub enum ResourceEvent {
    ResourceDefined {
        method: String,
    },
    /// Live only, never committed to storage.
    Online {
        idset: Idset,
    },
    /// Live only, never committed to storage.
    Offline {
        idset: Idset,
    },
    Drain {
        idset: Idset,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        nodelist: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        /// 0: plain drain, 1: overwrite reason, 2: overwrite reason and timestamp.
        #[serde(default)]
        overwrite: u8,
    },
    Undrain {
        idset: Idset,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        nodelist: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Exclude {
        idset: Idset,
    },
    Unexclude {
        idset: Idset,
    },
}

const KNOWN_NAMES: [&str; 7] = ["resource-defined", "online", "offline", "drain", "undrain", "exclude", "unexclude"];

impl ResourceEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ResourceEvent::ResourceDefined { .. } => "resource-defined",
            ResourceEvent::Online { .. } => "online",
            ResourceEvent::Offline { .. } => "offline",
            ResourceEvent::Drain { .. } => "drain",
            ResourceEvent::Undrain { .. } => "undrain",
            ResourceEvent::Exclude { .. } => "exclude",
            ResourceEvent::Unexclude { .. } => "unexclude",
        }
    }

    /// Live-only events are kept in memory and fanned out but not persisted.
    pub fn is_live_only(&self) -> bool {
        matches!(self, ResourceEvent::Online { .. } | ResourceEvent::Offline { .. })
    }

    pub fn to_entry(&self, timestamp: f64) -> EventlogEntry {
        let context = match serde_json::to_value(self) {
            Ok(Value::Object(mut object)) => match object.remove("context") {
                Some(Value::Object(context)) => context,
                _ => Map::new(),
            },
            _ => Map::new(),
        };
        EventlogEntry::new(timestamp, self.name(), context)
    }

    /// Typed event for `entry`; `Ok(None)` for names this crate does not
    /// interpret, `Err` for a recognized name with a malformed context.
    pub fn from_entry(entry: &EventlogEntry) -> Result<Option<ResourceEvent>> {
        if !KNOWN_NAMES.contains(&entry.name.as_str()) {
            return Ok(None);
        }
        let value = json!({"name": entry.name, "context": entry.context});
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| Error::Replay(format!("malformed {} event at {}: {}", entry.name, entry.timestamp, e)))
    }
}

#[derive(Debug, Deserialize)]
struct LegacyDrainRecord {
    timestamp: f64,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LegacyInitContext {
    #[serde(default)]
    drain: BTreeMap<String, LegacyDrainRecord>,
}

const LEGACY_LIVE_NAMES: [&str; 5] = ["resource-init", "online", "offline", "hwloc-discover-start", "hwloc-discover-finish"];

/// Rewrites a log that still carries legacy `resource-init` summaries into
/// discrete events. Each summary's drain map becomes drain events (with
/// exact timestamps) preceded by an undrain of ranks the summary no longer
/// lists; live-only legacy entries are dropped. Returns `None` when the log
/// needs no upgrade.
pub fn upgrade(entries: &[EventlogEntry]) -> Result<Option<Vec<EventlogEntry>>> {
    if !entries.iter().any(|entry| entry.name == "resource-init") {
        return Ok(None);
    }

    let mut upgraded = Vec::with_capacity(entries.len());
    let mut drained = Idset::new();

    for entry in entries {
        if entry.name == "resource-init" {
            let context: LegacyInitContext = serde_json::from_value(Value::Object(entry.context.clone()))
                .map_err(|e| Error::Replay(format!("malformed resource-init at {}: {}", entry.timestamp, e)))?;

            let mut summary = Idset::new();
            let mut drains = Vec::new();
            for (ids, record) in context.drain {
                let idset = Idset::from_str(&ids)?;
                summary = summary.union(&idset);
                drains.push(ResourceEvent::Drain { idset, nodelist: None, reason: record.reason, overwrite: 2 }.to_entry(record.timestamp));
            }
            let stale = drained.difference(&summary);
            if !stale.is_empty() {
                upgraded.push(ResourceEvent::Undrain { idset: stale, nodelist: None, reason: None }.to_entry(entry.timestamp));
            }
            upgraded.extend(drains);
            drained = summary;
            continue;
        }
        if LEGACY_LIVE_NAMES.contains(&entry.name.as_str()) {
            continue;
        }
        match ResourceEvent::from_entry(entry)? {
            Some(ResourceEvent::Drain { idset, .. }) => drained = drained.union(&idset),
            Some(ResourceEvent::Undrain { idset, .. }) => drained = drained.difference(&idset),
            _ => {}
        }
        upgraded.push(entry.clone());
    }
    Ok(Some(upgraded))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(s: &str) -> Idset {
        Idset::from_str(s).unwrap()
    }

    #[test]
    fn test_event_entry_shape() {
        let event = ResourceEvent::Drain { idset: ids("1-2"), nodelist: Some("node[1-2]".into()), reason: Some("bad fan".into()), overwrite: 0 };
        let entry = event.to_entry(100.5);
        assert_eq!(entry.name, "drain");
        assert_eq!(entry.to_value(), json!({
            "timestamp": 100.5,
            "name": "drain",
            "context": {"idset": "1-2", "nodelist": "node[1-2]", "reason": "bad fan", "overwrite": 0}
        }));
        assert_eq!(ResourceEvent::from_entry(&entry).unwrap(), Some(event));
    }

    #[test]
    fn test_unknown_and_malformed_entries() {
        let unknown = EventlogEntry::new(1.0, "shrink", Map::new());
        assert_eq!(ResourceEvent::from_entry(&unknown).unwrap(), None);

        let mut context = Map::new();
        context.insert("idset".into(), json!("x-y"));
        let malformed = EventlogEntry::new(1.0, "drain", context);
        assert!(matches!(ResourceEvent::from_entry(&malformed), Err(Error::Replay(_))));
    }

    #[test]
    fn test_decode_eventlog_lines() {
        let entries = vec![
            ResourceEvent::ResourceDefined { method: "configuration".into() }.to_entry(1.0),
            ResourceEvent::Exclude { idset: ids("3") }.to_entry(2.0),
        ];
        let text = encode_eventlog(&entries);
        assert_eq!(text.lines().count(), 2);
        assert_eq!(decode_eventlog(&text).unwrap(), entries);
        assert!(decode_eventlog("{not json}\n").is_err());
        assert!(decode_eventlog("").unwrap().is_empty());
    }

    #[test]
    fn test_upgrade_rewrites_summaries() {
        let mut init = Map::new();
        init.insert("restart".into(), json!(true));
        init.insert("online".into(), json!("0-3"));
        init.insert("drain".into(), json!({"2": {"timestamp": 5.0, "reason": "x"}}));
        let log = vec![
            ResourceEvent::Drain { idset: ids("0-1"), nodelist: None, reason: None, overwrite: 0 }.to_entry(1.0),
            EventlogEntry::new(3.0, "online", Map::new()),
            EventlogEntry::new(10.0, "resource-init", init),
            ResourceEvent::Exclude { idset: ids("3") }.to_entry(11.0),
        ];

        let upgraded = upgrade(&log).unwrap().unwrap();
        let names: Vec<&str> = upgraded.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["drain", "undrain", "drain", "exclude"]);
        assert_eq!(upgraded[1].context["idset"], json!("0-1"));
        assert_eq!(upgraded[2].timestamp, 5.0);
        assert_eq!(upgraded[2].context["overwrite"], json!(2));

        assert_eq!(upgrade(&upgraded).unwrap(), None);
    }
}
