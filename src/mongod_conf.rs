//! `mongod.conf` YAML model
//!
//! Only the settings the process workflow writes and reads back are
//! modelled; unknown settings in an existing file are ignored on read.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Top-level `mongod` configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MongodConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_management: Option<ProcessManagement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<Storage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net: Option<Net>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_log: Option<SystemLog>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessManagement {
    #[serde(default)]
    pub fork: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Storage {
    pub db_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wired_tiger: Option<WiredTiger>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WiredTiger {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_config: Option<EngineConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(rename = "cacheSizeGB", default, skip_serializing_if = "Option::is_none")]
    pub cache_size_gb: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Net {
    pub port: u16,
    #[serde(default)]
    pub bind_ip: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemLog {
    pub destination: String,
    pub path: String,
    #[serde(default)]
    pub log_append: bool,
}

impl MongodConfig {
    /// Forking `mongod` on wiredTiger, logging to `log_path`
    pub fn forking(
        db_path: &str,
        port: u16,
        bind_ip: &str,
        log_path: &str,
        cache_size_gb: Option<f64>,
    ) -> Self {
        let wired_tiger = cache_size_gb.filter(|gb| *gb > 0.0).map(|gb| WiredTiger {
            engine_config: Some(EngineConfig {
                cache_size_gb: Some(gb),
            }),
        });

        Self {
            process_management: Some(ProcessManagement { fork: true }),
            storage: Some(Storage {
                db_path: db_path.to_string(),
                engine: Some("wiredTiger".to_string()),
                wired_tiger,
            }),
            net: Some(Net {
                port,
                bind_ip: bind_ip.to_string(),
            }),
            system_log: Some(SystemLog {
                destination: "file".to_string(),
                path: log_path.to_string(),
                log_append: true,
            }),
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }
}
