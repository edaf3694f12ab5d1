use std::time::Duration;

use anyhow::bail;
use serde::Deserialize;

use crate::domain::{PriorityLabel, ScopeMode};

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scope: ScopeMode,
    #[serde(default = "default_threshold")]
    pub threshold: u64,
    #[serde(default = "default_debounce_seconds")]
    pub debounce_seconds: u64,
    #[serde(default = "default_processed_ttl_seconds")]
    pub processed_ttl_seconds: u64,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_dispatch_timeout_seconds")]
    pub dispatch_timeout_seconds: u64,
    #[serde(default)]
    pub intake: IntakeCfg,
    #[serde(default)]
    pub store: StoreCfg,
    #[serde(default)]
    pub queue: QueueCfg,
    #[serde(default)]
    pub classifier: ClassifierCfg,
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub outbox: OutboxCfg,
    pub http: Option<HttpCfg>,
}

#[derive(Debug, Deserialize)]
pub struct IntakeCfg {
    #[serde(default = "default_prefetch")]
    pub prefetch: usize,
    #[serde(default = "default_max_deliveries")]
    pub max_deliveries: u32,
}

impl Default for IntakeCfg {
    fn default() -> Self {
        Self {
            prefetch: default_prefetch(),
            max_deliveries: default_max_deliveries(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreCfg {
    #[default]
    Memory,
    Sqlite {
        url: String,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueueCfg {
    /// JSON lines on stdin, one event per line.
    #[default]
    Stdin,
    Nats {
        url: String,
        #[serde(default = "default_stream")]
        stream: String,
        #[serde(default = "default_subject")]
        subject: String,
        #[serde(default = "default_consumer")]
        consumer: String,
        dead_letter_subject: Option<String>,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassifierCfg {
    Fixed {
        priority: PriorityLabel,
    },
    #[default]
    Keyword,
    Http {
        endpoint: String,
        token: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
pub struct OutboxCfg {
    #[serde(default = "default_outbox_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default = "default_outbox_max_attempts")]
    pub max_attempts: u32,
}

impl Default for OutboxCfg {
    fn default() -> Self {
        Self {
            interval_seconds: default_outbox_interval_seconds(),
            max_attempts: default_outbox_max_attempts(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HttpCfg {
    pub listen: String,
    pub api_token: Option<String>,
}

fn default_threshold() -> u64 {
    10
}
fn default_debounce_seconds() -> u64 {
    60
}
fn default_processed_ttl_seconds() -> u64 {
    24 * 60 * 60
}
fn default_key_prefix() -> String {
    "inboxpulse".to_string()
}
fn default_dispatch_timeout_seconds() -> u64 {
    10
}
fn default_prefetch() -> usize {
    16
}
fn default_max_deliveries() -> u32 {
    5
}
fn default_stream() -> String {
    "EMAILS".to_string()
}
fn default_subject() -> String {
    "email.classified".to_string()
}
fn default_consumer() -> String {
    "inboxpulse".to_string()
}
fn default_outbox_interval_seconds() -> u64 {
    30
}
fn default_outbox_max_attempts() -> u32 {
    10
}

impl Config {
    pub fn load_from_file(path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        let raw = expand_env(raw);
        let mut cfg: Config = serde_yaml::from_str(&raw)?;
        // an unset ${VAR} leaves the key empty rather than absent
        cfg.webhook_url = cfg.webhook_url.filter(|u| !u.trim().is_empty());
        if let Some(http) = cfg.http.as_mut() {
            http.api_token = http.api_token.take().filter(|t| !t.trim().is_empty());
        }
        if let ClassifierCfg::Http { token, .. } = &mut cfg.classifier {
            *token = token.take().filter(|t| !t.trim().is_empty());
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.threshold == 0 {
            bail!("threshold must be at least 1");
        }
        if self.debounce_seconds == 0 {
            bail!("debounce_seconds must be at least 1");
        }
        if self.intake.prefetch == 0 {
            bail!("intake.prefetch must be at least 1");
        }
        if self.intake.max_deliveries == 0 {
            bail!("intake.max_deliveries must be at least 1");
        }
        if self.key_prefix.trim().is_empty() {
            bail!("key_prefix must not be empty");
        }
        Ok(())
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_secs(self.debounce_seconds)
    }

    pub fn processed_ttl(&self) -> Duration {
        Duration::from_secs(self.processed_ttl_seconds)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_seconds)
    }
}

/// very small ${VAR} expansion to keep config simple; unknown vars become ""
fn expand_env(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                out.push_str(&std::env::var(&after[..end]).unwrap_or_default());
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
