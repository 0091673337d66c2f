use std::path::Path;

use crate::api::config_dto::ResourceConfigDto;
use crate::domain::rset::{ResourceSet, local};
use crate::error::{Error, Result};
use crate::loader::parser;

/// Validated `resource` configuration.
#[derive(Debug, Clone, Default)]
pub struct ResourceConfig {
    dto: ResourceConfigDto,
    /// R from `path` or inline `config`, loaded at validation time.
    configured: Option<ResourceSet>,
}

impl ResourceConfig {
    pub fn from_dto(dto: ResourceConfigDto) -> Result<Self> {
        let configured = match (&dto.path, &dto.config) {
            (Some(_), Some(_)) => {
                return Err(Error::InvalidArgument("resource.path and resource.config are mutually exclusive".to_string()));
            }
            (Some(path), None) => Some(parser::parse_resource_file(Path::new(path))?),
            (None, Some(entries)) => Some(local::from_config(entries)?),
            (None, None) => None,
        };
        if let Some(0) = dto.journal_max {
            return Err(Error::InvalidArgument("resource.journalMax must be positive".to_string()));
        }
        Ok(Self { dto, configured })
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_dto(parser::parse_json_file(path)?)
    }

    pub fn dto(&self) -> &ResourceConfigDto {
        &self.dto
    }

    pub fn configured_resources(&self) -> Option<&ResourceSet> {
        self.configured.as_ref()
    }

    pub fn exclude(&self) -> Option<&str> {
        self.dto.exclude.as_deref()
    }

    pub fn noverify(&self) -> bool {
        self.dto.noverify
    }

    pub fn norestrict(&self) -> bool {
        self.dto.norestrict
    }

    pub fn rediscover(&self) -> bool {
        self.dto.rediscover
    }

    pub fn monitor_force_up(&self) -> bool {
        self.dto.monitor_force_up
    }

    pub fn journal_max(&self) -> Option<usize> {
        self.dto.journal_max
    }

    /// R sources cannot change once R is defined.
    pub fn same_source(&self, other: &ResourceConfig) -> bool {
        self.dto.path == other.dto.path && self.dto.config == other.dto.config
    }
}
