//! TOML configuration, loaded once at startup and passed down explicitly.
//!
//! No global accessor: `main` loads the file, validates it, and hands owned
//! sections to the components that need them.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub wecom: WecomConfig,
    pub ai: AiConfig,
    pub gateway: GatewayConfig,
    pub ledger: LedgerConfig,
    pub ops: OpsConfig,
}

/// App credentials and routing policy for the WeChat Work callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WecomConfig {
    pub corp_id: String,
    pub corp_secret: String,
    pub agent_id: String,
    /// Callback token registered on the platform console.
    pub token: String,
    /// 43-char EncodingAESKey from the platform console.
    pub encoding_aes_key: String,
    /// Senders allowed to trigger keyword commands.
    pub admin_users: Vec<String>,
    /// Keyword prefix rules for text messages, checked in order.
    pub keyword_rules: Vec<KeywordRule>,
}

impl Default for WecomConfig {
    fn default() -> Self {
        Self {
            corp_id: String::new(),
            corp_secret: String::new(),
            agent_id: String::new(),
            token: String::new(),
            encoding_aes_key: String::new(),
            admin_users: Vec::new(),
            keyword_rules: default_keyword_rules(),
        }
    }
}

/// Maps a text-message prefix to a (group, action) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordRule {
    pub prefix: String,
    pub group: u16,
    pub action: u16,
}

fn default_keyword_rules() -> Vec<KeywordRule> {
    vec![
        KeywordRule {
            prefix: "#提问".to_string(),
            group: 0,
            action: 2,
        },
        KeywordRule {
            prefix: "#查询".to_string(),
            group: 0,
            action: 3,
        },
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    /// Per-request timeout; an overrun surfaces as a generic failure reply.
    pub timeout_secs: u64,
    /// Fixed suffix appended to every generated answer.
    pub disclaimer: String,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 60,
            disclaimer: "\n\n(内容由 AI 生成，仅供参考)".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Admission window for duplicate callback deliveries.
    pub dedup_ttl_secs: u64,
    /// Max distinct fingerprints retained by the in-process dedup store.
    pub dedup_max_keys: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8686,
            dedup_ttl_secs: 30,
            dedup_max_keys: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// SQLite path for the processing ledger. Unset = no persistence.
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpsConfig {
    pub host: String,
    pub port: u16,
    /// Service names the restart endpoint may touch. Anything else is refused.
    pub restart_allowlist: Vec<String>,
    /// Command used to restart a service; `{name}` is substituted.
    pub restart_command: String,
    /// Working directory for downloaded/transcoded artifacts.
    pub artifact_dir: PathBuf,
    /// Per-operation timeout for shell and proxy calls.
    pub timeout_secs: u64,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8687,
            restart_allowlist: Vec::new(),
            restart_command: "systemctl restart {name}".to_string(),
            artifact_dir: PathBuf::from("/tmp/wecom-bridge"),
            timeout_secs: 120,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.wecom.encoding_aes_key.is_empty()
            && self.wecom.encoding_aes_key.trim().len() != 43
        {
            anyhow::bail!("wecom.encoding_aes_key must be 43 characters");
        }
        if self.wecom.token.is_empty() && !self.wecom.encoding_aes_key.is_empty() {
            anyhow::bail!("wecom.token is required when encoding_aes_key is set");
        }
        if self.gateway.dedup_ttl_secs == 0 {
            anyhow::bail!("gateway.dedup_ttl_secs must be positive");
        }
        for rule in &self.wecom.keyword_rules {
            if rule.prefix.trim().is_empty() {
                anyhow::bail!("wecom.keyword_rules entries must have a non-empty prefix");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_bad_aes_key_length() {
        let mut config = Config::default();
        config.wecom.encoding_aes_key = "too-short".to_string();
        config.wecom.token = "tok".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_minimal_toml() {
        let raw = r#"
[wecom]
token = "tok"
encoding_aes_key = "abcdefghijklmnopqrstuvwxyz0123456789ABCDEFG"
admin_users = ["alice"]

[gateway]
port = 9000
"#;
        let config: Config = toml::from_str(raw).unwrap();
        config.validate().unwrap();
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.wecom.admin_users, vec!["alice".to_string()]);
        // Keyword defaults survive a partial [wecom] section override.
        assert!(!config.wecom.keyword_rules.is_empty());
    }

    #[test]
    fn zero_dedup_ttl_is_rejected() {
        let mut config = Config::default();
        config.gateway.dedup_ttl_secs = 0;
        assert!(config.validate().is_err());
    }
}
