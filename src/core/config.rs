// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Engine configuration
//!
//! Configuration is read from TOML. Every field has a default, so an empty
//! file is a valid configuration:
//!
//! ```toml
//! batch_size = 4096
//! batch_reserved = 16
//! max_relocations = 1024
//! wait_timeout_ms = 5000
//! optimistic_relocations = true
//! default_engine = "blt"
//! trace = false
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::error::{GemError, Result};
use crate::core::exec::Engine;

const PAGE_SIZE: usize = 4096;

/// Batch, relocation and submission settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Capacity of one batch stream in bytes
    pub batch_size: usize,

    /// Bytes kept free at the end of the command region for the
    /// end-of-batch tail
    pub batch_reserved: usize,

    /// Relocations one stream may carry before it is flushed
    pub max_relocations: usize,

    /// Hang window for waits in milliseconds, `None` blocks indefinitely
    pub wait_timeout_ms: Option<u64>,

    /// Patch known addresses locally and ask the kernel to skip relocation
    pub optimistic_relocations: bool,

    /// Engine used by flushes that do not name one
    pub default_engine: Engine,

    /// Capture a trace record per submission
    pub trace: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            batch_size: 4096,
            batch_reserved: 16,
            max_relocations: 1024,
            wait_timeout_ms: None,
            optimistic_relocations: true,
            default_engine: Engine::Blt,
            trace: false,
        }
    }
}

impl Config {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(text).map_err(|e| GemError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&text)?;
        log::debug!("Loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| GemError::Config(e.to_string()))
    }

    /// Check the settings for consistency
    ///
    /// # Errors
    ///
    /// `GemError::Config` if the batch size is not a whole number of pages,
    /// the reserved tail cannot hold the end-of-batch dwords or is not
    /// qword sized, or no relocations are allowed.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.batch_size % PAGE_SIZE != 0 {
            return Err(GemError::Config(format!(
                "batch_size {} is not a multiple of {}",
                self.batch_size, PAGE_SIZE
            )));
        }

        if self.batch_reserved < 8 || self.batch_reserved % 8 != 0 {
            return Err(GemError::Config(format!(
                "batch_reserved {} must be a multiple of 8, at least 8",
                self.batch_reserved
            )));
        }

        if self.batch_reserved >= self.batch_size {
            return Err(GemError::Config(format!(
                "batch_reserved {} leaves no room in a {}-byte batch",
                self.batch_reserved, self.batch_size
            )));
        }

        if self.max_relocations == 0 {
            return Err(GemError::Config(
                "max_relocations must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Hang window as a duration
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_ms.map(Duration::from_millis)
    }

    /// Usable command dwords in an empty batch
    pub fn batch_words(&self) -> usize {
        (self.batch_size - self.batch_reserved) / 4
    }
}
