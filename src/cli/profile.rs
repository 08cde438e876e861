//! Operator profiles and macro files.
//!
//! Both are plain JSON documents with camelCase keys so they stay readable
//! by other tools that share the same files.

use crate::domain::error::{BridgeError, BridgeResult};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Port choice remembered for one session slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortSelection {
    pub selected_port: String,
    pub baud_rate: u32,
}

/// Persisted operator settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorProfile {
    #[serde(default)]
    pub data_prefix: String,
    #[serde(default)]
    pub data_suffix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port1: Option<PortSelection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port2: Option<PortSelection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_forward: Option<bool>,
}

impl OperatorProfile {
    pub fn load(path: &Path) -> BridgeResult<Self> {
        read_json(path)
    }

    pub fn save(&self, path: &Path) -> BridgeResult<()> {
        write_json(path, self)
    }
}

/// Named payload the operator can send with one keystroke
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Macro {
    pub name: String,
    pub data: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MacroSet {
    macros: Vec<Macro>,
}

impl MacroSet {
    pub fn load(path: &Path) -> BridgeResult<Self> {
        read_json(path)
    }

    pub fn save(&self, path: &Path) -> BridgeResult<()> {
        write_json(path, self)
    }

    pub fn get(&self, name: &str) -> Option<&Macro> {
        self.macros.iter().find(|m| m.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.macros.iter().map(|m| m.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }
}

impl FromIterator<Macro> for MacroSet {
    fn from_iter<I: IntoIterator<Item = Macro>>(iter: I) -> Self {
        Self {
            macros: iter.into_iter().collect(),
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> BridgeResult<T> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| BridgeError::Config {
        message: format!("Failed to parse {}: {}", path.display(), e),
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> BridgeResult<()> {
    let content = serde_json::to_string_pretty(value).map_err(|e| BridgeError::Config {
        message: format!("Failed to serialize {}: {}", path.display(), e),
    })?;
    fs::write(path, content)?;
    Ok(())
}
