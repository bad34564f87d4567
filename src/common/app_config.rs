// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<HashAggConfig> = OnceLock::new();

pub const CONFIG_ENV: &str = "NOVAROCKS_HASHAGG_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "novarocks_hashagg.toml";

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static HashAggConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = path.as_ref().to_path_buf();
    let cfg = HashAggConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    CONFIG
        .get()
        .ok_or_else(|| anyhow!("config not initialized after load"))
}

pub fn init_from_env_or_default() -> Result<&'static HashAggConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    init_from_path(path)
}

pub fn config() -> Result<&'static HashAggConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var(CONFIG_ENV) {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }

    let candidates = [PathBuf::from(DEFAULT_CONFIG_FILE)];
    for p in candidates {
        if p.exists() {
            return Ok(p);
        }
    }

    Err(anyhow!(
        "missing config file: set ${CONFIG_ENV} or create ./{DEFAULT_CONFIG_FILE}"
    ))
}

#[derive(Clone, Debug, Deserialize)]
pub struct HashAggConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    /// Example: "novarocks_hashagg=debug"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub hash_table: HashTableConfig,

    #[serde(default)]
    pub memory: MemoryConfig,
}

impl HashAggConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        Self::parse(&s).with_context(|| format!("parse toml: {}", path.display()))
    }

    pub fn parse(s: &str) -> Result<Self> {
        let cfg: HashAggConfig = toml::from_str(s)?;
        cfg.hash_table.validate()?;
        Ok(cfg)
    }

    /// The filter string handed to the logging subscriber.
    pub fn effective_log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(self.log_level.as_str())
    }
}

impl Default for HashAggConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            hash_table: HashTableConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct HashTableConfig {
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,
    #[serde(default = "default_block_size_bytes")]
    pub block_size_bytes: usize,
    #[serde(default = "default_string_heap_block_size_bytes")]
    pub string_heap_block_size_bytes: usize,
    #[serde(default = "default_max_load_factor")]
    pub max_load_factor: f64,
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,
}

fn default_initial_capacity() -> usize {
    4096
}

fn default_block_size_bytes() -> usize {
    262_144
}

fn default_string_heap_block_size_bytes() -> usize {
    65_536
}

fn default_max_load_factor() -> f64 {
    0.5
}

fn default_scan_batch_size() -> usize {
    4096
}

impl HashTableConfig {
    fn validate(&self) -> Result<()> {
        if !(self.max_load_factor > 0.0 && self.max_load_factor < 1.0) {
            return Err(anyhow!(
                "hash_table.max_load_factor must be in (0, 1), got {}",
                self.max_load_factor
            ));
        }
        if self.block_size_bytes == 0 || self.string_heap_block_size_bytes == 0 {
            return Err(anyhow!("hash_table block sizes must be positive"));
        }
        if self.scan_batch_size == 0 {
            return Err(anyhow!("hash_table.scan_batch_size must be positive"));
        }
        Ok(())
    }
}

impl Default for HashTableConfig {
    fn default() -> Self {
        Self {
            initial_capacity: default_initial_capacity(),
            block_size_bytes: default_block_size_bytes(),
            string_heap_block_size_bytes: default_string_heap_block_size_bytes(),
            max_load_factor: default_max_load_factor(),
            scan_batch_size: default_scan_batch_size(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct MemoryConfig {
    /// Byte limit for the default buffer manager. Unset means unlimited.
    #[serde(default)]
    pub limit_bytes: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = HashAggConfig::parse("").unwrap();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.hash_table.initial_capacity, 4096);
        assert_eq!(cfg.hash_table.block_size_bytes, 262_144);
        assert_eq!(cfg.hash_table.max_load_factor, 0.5);
        assert!(cfg.memory.limit_bytes.is_none());
        assert_eq!(cfg.effective_log_filter(), "info");
    }

    #[test]
    fn sections_override_defaults() {
        let cfg = HashAggConfig::parse(
            r#"
log_level = "debug"
log_filter = "novarocks_hashagg=trace"

[hash_table]
initial_capacity = 64
max_load_factor = 0.75

[memory]
limit_bytes = 1048576
"#,
        )
        .unwrap();
        assert_eq!(cfg.hash_table.initial_capacity, 64);
        assert_eq!(cfg.hash_table.max_load_factor, 0.75);
        assert_eq!(cfg.hash_table.scan_batch_size, 4096);
        assert_eq!(cfg.memory.limit_bytes, Some(1_048_576));
        assert_eq!(cfg.effective_log_filter(), "novarocks_hashagg=trace");
    }

    #[test]
    fn load_factor_out_of_range_is_rejected() {
        let err = HashAggConfig::parse("[hash_table]\nmax_load_factor = 1.0\n").unwrap_err();
        assert!(err.to_string().contains("max_load_factor"), "{err}");
    }
}
