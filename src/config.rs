//! Ledger configuration

use crate::constants::*;
use crate::error::{ConsensusError, Result};
use crate::types::ScriptContext;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings a [`crate::ledger::Ledger`] is started with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Leading zero hex digits every mined block must carry
    #[serde(default = "default_difficulty")]
    pub difficulty: usize,
    /// Let OPCheckThirdParty perform HTTP lookups
    #[serde(default)]
    pub allow_third_party_scripts: bool,
    #[serde(default = "default_third_party_timeout")]
    pub third_party_timeout_secs: u64,
}

fn default_difficulty() -> usize {
    DEFAULT_DIFFICULTY
}

fn default_third_party_timeout() -> u64 {
    THIRD_PARTY_TIMEOUT_SECS
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: default_difficulty(),
            allow_third_party_scripts: false,
            third_party_timeout_secs: default_third_party_timeout(),
        }
    }
}

impl LedgerConfig {
    /// Parse and validate a JSON document; missing fields take their defaults
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| ConsensusError::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConsensusError::Configuration(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.difficulty > MAX_DIFFICULTY {
            return Err(ConsensusError::Configuration(format!(
                "difficulty {} exceeds {} hex digits",
                self.difficulty, MAX_DIFFICULTY
            )));
        }
        if self.allow_third_party_scripts && self.third_party_timeout_secs == 0 {
            return Err(ConsensusError::Configuration(
                "third party lookups need a non-zero timeout".to_string(),
            ));
        }
        Ok(())
    }

    /// Script flags and limits implied by this configuration
    pub fn script_context(&self) -> ScriptContext {
        let flags = if self.allow_third_party_scripts {
            SCRIPT_ENABLE_THIRD_PARTY
        } else {
            SCRIPT_FLAGS_NONE
        };
        ScriptContext {
            flags,
            third_party_timeout_secs: self.third_party_timeout_secs,
        }
    }
}
