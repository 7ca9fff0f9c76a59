//! Server configuration: loading, defaults, and CLI-flag overrides
//! (spec.md §6), following `spineldb`'s `Config`/`from_file` shape.

use std::fs;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EvictionPolicy {
    #[default]
    NoEviction,
    AllkeysLru,
    VolatileLru,
    AllkeysRandom,
    VolatileRandom,
    VolatileTtl,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum AppendFsync {
    Always,
    #[default]
    EverySec,
    No,
}


#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub log_level: String,
    pub databases: usize,
    pub daemonize: bool,
    pub maxmemory: Option<u64>,
    pub maxmemory_policy: EvictionPolicy,
    pub maxmemory_samples: usize,
    pub appendonly: bool,
    pub appendfsync: AppendFsync,
    pub cluster_enabled: bool,
    /// Cron frequency in Hz (spec.md §4.G, default 10).
    pub hz: u32,
    pub maxidletime_secs: u64,
    pub min_slaves_to_write: usize,
    pub min_slaves_max_lag_secs: u64,
    pub requirepass: Option<String>,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: 6380,
            log_level: "info".to_string(),
            databases: 16,
            daemonize: false,
            maxmemory: None,
            maxmemory_policy: EvictionPolicy::default(),
            maxmemory_samples: 5,
            appendonly: false,
            appendfsync: AppendFsync::default(),
            cluster_enabled: false,
            hz: 10,
            maxidletime_secs: 0,
            min_slaves_to_write: 0,
            min_slaves_max_lag_secs: 10,
            requirepass: None,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.databases == 0 {
            anyhow::bail!("databases must be at least 1");
        }
        if self.hz == 0 {
            anyhow::bail!("hz must be at least 1");
        }
        Ok(())
    }

    /// Applies the `--flag value` overrides named in spec.md §6.
    pub fn apply_cli_overrides(&mut self, args: &[String]) -> Result<()> {
        let get = |flag: &str| -> Option<String> {
            args.iter().position(|a| a == flag).and_then(|i| args.get(i + 1)).cloned()
        };
        if let Some(v) = get("--bind") {
            self.bind = v;
        }
        if let Some(v) = get("--port") {
            self.port = v.parse().context("invalid --port value")?;
        }
        if let Some(v) = get("--maxmemory") {
            self.maxmemory = Some(v.parse().context("invalid --maxmemory value")?);
        }
        if let Some(v) = get("--maxmemory-policy") {
            self.maxmemory_policy = match v.as_str() {
                "noeviction" => EvictionPolicy::NoEviction,
                "allkeys-lru" => EvictionPolicy::AllkeysLru,
                "volatile-lru" => EvictionPolicy::VolatileLru,
                "allkeys-random" => EvictionPolicy::AllkeysRandom,
                "volatile-random" => EvictionPolicy::VolatileRandom,
                "volatile-ttl" => EvictionPolicy::VolatileTtl,
                other => anyhow::bail!("unknown --maxmemory-policy '{other}'"),
            };
        }
        if let Some(v) = get("--dbnum") {
            self.databases = v.parse().context("invalid --dbnum value")?;
        }
        if let Some(v) = get("--daemonize") {
            self.daemonize = v == "yes";
        }
        if let Some(v) = get("--loglevel") {
            self.log_level = v;
        }
        if let Some(v) = get("--appendonly") {
            self.appendonly = v == "yes";
        }
        if let Some(v) = get("--cluster-enabled") {
            self.cluster_enabled = v == "yes";
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_apply_in_order() {
        let mut cfg = Config::default();
        let args = vec!["--port".to_string(), "7000".to_string(), "--appendonly".to_string(), "yes".to_string()];
        cfg.apply_cli_overrides(&args).unwrap();
        assert_eq!(cfg.port, 7000);
        assert!(cfg.appendonly);
    }

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }
}
