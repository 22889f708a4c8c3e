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

static CONFIG: OnceLock<VexecConfig> = OnceLock::new();

pub const CONFIG_ENV: &str = "NOVAROCKS_VEXEC_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "novarocks_vexec.toml";

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static VexecConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let cfg = VexecConfig::load_from_file(path.as_ref())?;
    let _ = CONFIG.set(cfg);
    CONFIG
        .get()
        .ok_or_else(|| anyhow!("config was not installed"))
}

pub fn init_from_env_or_default() -> Result<&'static VexecConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    init_from_path(path)
}

pub fn config() -> Result<&'static VexecConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var(CONFIG_ENV)
        && !p.trim().is_empty()
    {
        return Ok(PathBuf::from(p.trim()));
    }

    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return Ok(local);
    }

    Err(anyhow!(
        "missing config file: set ${} or create ./{}",
        CONFIG_ENV,
        DEFAULT_CONFIG_FILE
    ))
}

#[derive(Clone, Debug, Deserialize)]
pub struct VexecConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    /// Example: "novarocks_vexec=debug"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl VexecConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        Self::parse(&s).with_context(|| format!("parse toml: {}", path.display()))
    }

    pub fn parse(s: &str) -> Result<Self> {
        let cfg: VexecConfig = toml::from_str(s)?;
        cfg.runtime.validate()?;
        Ok(cfg)
    }

    /// Filter expression handed to the tracing subscriber.
    pub fn effective_log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(&self.log_level)
    }
}

impl Default for VexecConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            runtime: RuntimeConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct RuntimeConfig {
    /// Default max rows per chunk when the query does not set a batch size.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Preferred row count of unnest output chunks. 0 means use the chunk size.
    #[serde(default)]
    pub unnest_output_batch_rows: usize,
    /// Byte limit for a single window build's row storage. 0 means unlimited.
    #[serde(default)]
    pub window_build_mem_limit_bytes: u64,
}

fn default_chunk_size() -> usize {
    4096 // rows per chunk pulled from an operator when no batch size is set
}

impl RuntimeConfig {
    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(anyhow!("runtime.chunk_size must be positive"));
        }
        Ok(())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            unnest_output_batch_rows: 0,
            window_build_mem_limit_bytes: 0,
        }
    }
}
