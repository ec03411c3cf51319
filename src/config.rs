//! Configuration management for the transaction dispatcher
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    pub chain: ChainConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub accounts: Vec<AccountConfig>,
}

/// Retry policy for `Dispatcher::send`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Total submission attempts per send, first try included
    pub max_attempts: u32,
    /// Gas price multiplier on an underpriced replacement, in percent
    pub gas_bump_percent: u64,
    pub retry_delay_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            gas_bump_percent: 110,
            retry_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_urls: Vec<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub id: String,
    #[serde(default)]
    pub label: String,
    pub private_key: String,
}

impl Settings {
    /// Load settings from the file named by `DISPATCHER_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("DISPATCHER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::parse(&config_str)
    }

    fn parse(raw: &str) -> Result<Self> {
        let config_str = substitute_env_vars(raw);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.chain.rpc_urls.is_empty() {
            anyhow::bail!("Chain {} has no RPC URLs configured", self.chain.name);
        }

        if self.dispatcher.max_attempts == 0 {
            anyhow::bail!("dispatcher.max_attempts must be at least 1");
        }

        if self.dispatcher.gas_bump_percent <= 100 {
            anyhow::bail!(
                "dispatcher.gas_bump_percent must exceed 100, got {}",
                self.dispatcher.gas_bump_percent
            );
        }

        if self.accounts.is_empty() {
            anyhow::bail!("At least one account must be configured");
        }

        let mut seen = HashSet::new();
        for account in &self.accounts {
            if !seen.insert(account.id.as_str()) {
                anyhow::bail!("Duplicate account id {}", account.id);
            }
            if account.private_key.is_empty() {
                tracing::warn!("Account {} has an empty private key", account.id);
            }
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static regex");

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
[chain]
chain_id = 31337
name = "anvil"
rpc_urls = ["http://127.0.0.1:8545"]

[api]
host = "127.0.0.1"
port = 8080

[metrics]
enabled = false
port = 9090

[[accounts]]
id = "testUser1"
private_key = "${DISPATCHER_TEST_KEY}"
"#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn dispatcher_defaults_apply() {
        env::set_var("DISPATCHER_TEST_KEY", "0xabc");
        let settings = Settings::parse(MINIMAL).unwrap();

        assert_eq!(settings.dispatcher.max_attempts, 3);
        assert_eq!(settings.dispatcher.gas_bump_percent, 110);
        assert_eq!(settings.dispatcher.retry_delay_ms, 1000);
        assert_eq!(settings.chain.request_timeout_secs, 60);
        assert_eq!(settings.accounts[0].private_key, "0xabc");
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let raw = format!("{}\n[dispatcher]\nmax_attempts = 5\n", MINIMAL);
        file.write_all(raw.as_bytes()).unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.dispatcher.max_attempts, 5);
        assert_eq!(settings.dispatcher.gas_bump_percent, 110);
    }

    #[test]
    fn rejects_duplicate_accounts() {
        let raw = format!(
            "{}\n[[accounts]]\nid = \"testUser1\"\nprivate_key = \"0x01\"\n",
            MINIMAL
        );
        let err = Settings::parse(&raw).unwrap_err();
        assert!(err.to_string().contains("Duplicate account id"));
    }

    #[test]
    fn rejects_non_increasing_bump() {
        let raw = format!("{}\n[dispatcher]\ngas_bump_percent = 100\n", MINIMAL);
        assert!(Settings::parse(&raw).is_err());
    }
}
