use anyhow::{Context, Result, anyhow};
use std::env;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_addr: String,
    pub pagerduty_api_key: String,
    pub pagerduty_api_url: String,
    pub pagerduty_webhook_secret: Option<String>,
    pub pagerduty_enforce_signature: bool,
    pub pagerduty_http_timeout_seconds: u64,
    pub mattermost_url: String,
    pub mattermost_bot_token: String,
    pub mattermost_channel: String,
    pub public_url: String,
    pub store_path: String,
    pub max_payload_bytes: usize,
    pub ip_limit_per_minute: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            bind_addr: env::var("RELAY_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            pagerduty_api_key: required_env("PAGERDUTY_API_KEY")?,
            pagerduty_api_url: env::var("PAGERDUTY_API_URL")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| "https://api.pagerduty.com".to_string()),
            pagerduty_webhook_secret: env::var("PAGERDUTY_WEBHOOK_SECRET")
                .ok()
                .filter(|value| !value.trim().is_empty()),
            pagerduty_enforce_signature: env_bool("PAGERDUTY_ENFORCE_SIGNATURE", false),
            pagerduty_http_timeout_seconds: env_u64("PAGERDUTY_HTTP_TIMEOUT_SECONDS", 30)?,
            mattermost_url: required_env("MATTERMOST_URL")?,
            mattermost_bot_token: required_env("MATTERMOST_BOT_TOKEN")?,
            mattermost_channel: required_env("MATTERMOST_CHANNEL")?,
            public_url: env::var("RELAY_PUBLIC_URL")
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .unwrap_or_default(),
            store_path: env::var("RELAY_STORE_PATH")
                .unwrap_or_else(|_| "data/pagerduty-relay.redb".to_string()),
            max_payload_bytes: env_usize("RELAY_MAX_PAYLOAD_BYTES", 1_048_576)?,
            ip_limit_per_minute: env_u32("RELAY_IP_RATE_PER_MINUTE", 100)?,
        };

        if config.pagerduty_http_timeout_seconds == 0 {
            return Err(anyhow!(
                "PAGERDUTY_HTTP_TIMEOUT_SECONDS must be greater than 0"
            ));
        }

        if config.pagerduty_enforce_signature && config.pagerduty_webhook_secret.is_none() {
            return Err(anyhow!(
                "PAGERDUTY_ENFORCE_SIGNATURE requires PAGERDUTY_WEBHOOK_SECRET"
            ));
        }

        Ok(config)
    }

    /// Names of settings that differ from `other` but are only read at startup.
    pub fn restart_required_changes(&self, other: &Config) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.bind_addr != other.bind_addr {
            changed.push("RELAY_BIND");
        }
        if self.pagerduty_api_key != other.pagerduty_api_key {
            changed.push("PAGERDUTY_API_KEY");
        }
        if self.pagerduty_api_url != other.pagerduty_api_url {
            changed.push("PAGERDUTY_API_URL");
        }
        if self.pagerduty_http_timeout_seconds != other.pagerduty_http_timeout_seconds {
            changed.push("PAGERDUTY_HTTP_TIMEOUT_SECONDS");
        }
        if self.mattermost_url != other.mattermost_url {
            changed.push("MATTERMOST_URL");
        }
        if self.mattermost_bot_token != other.mattermost_bot_token {
            changed.push("MATTERMOST_BOT_TOKEN");
        }
        if self.mattermost_channel != other.mattermost_channel {
            changed.push("MATTERMOST_CHANNEL");
        }
        if self.store_path != other.store_path {
            changed.push("RELAY_STORE_PATH");
        }
        changed
    }
}

/// Shared, atomically replaced configuration snapshot.
///
/// Readers clone the inner `Arc` and keep a complete snapshot for the rest of
/// their request, even if a reload publishes a new one meanwhile.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    current: Arc<RwLock<Arc<Config>>>,
}

impl ConfigHandle {
    pub fn new(config: Config) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    pub fn current(&self) -> Arc<Config> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn replace(&self, config: Config) -> Arc<Config> {
        let next = Arc::new(config);
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, next)
    }
}

fn required_env(name: &str) -> Result<String> {
    let value = env::var(name).with_context(|| format!("missing required env var: {name}"))?;
    if value.trim().is_empty() {
        return Err(anyhow!("required env var {name} cannot be empty"));
    }
    Ok(value)
}

fn env_u32(name: &str, default: u32) -> Result<u32> {
    env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(|value| {
            value
                .parse::<u32>()
                .with_context(|| format!("invalid u32 for {name}"))
        })
        .transpose()
        .map(|value| value.unwrap_or(default))
}

fn env_u64(name: &str, default: u64) -> Result<u64> {
    env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(|value| {
            value
                .parse::<u64>()
                .with_context(|| format!("invalid u64 for {name}"))
        })
        .transpose()
        .map(|value| value.unwrap_or(default))
}

fn env_usize(name: &str, default: usize) -> Result<usize> {
    env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(|value| {
            value
                .parse::<usize>()
                .with_context(|| format!("invalid usize for {name}"))
        })
        .transpose()
        .map(|value| value.unwrap_or(default))
}

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        bind_addr: "127.0.0.1:0".to_string(),
        pagerduty_api_key: "pd-key".to_string(),
        pagerduty_api_url: "http://127.0.0.1:1".to_string(),
        pagerduty_webhook_secret: None,
        pagerduty_enforce_signature: false,
        pagerduty_http_timeout_seconds: 30,
        mattermost_url: "http://127.0.0.1:1".to_string(),
        mattermost_bot_token: "mm-token".to_string(),
        mattermost_channel: "incidents".to_string(),
        public_url: String::new(),
        store_path: "data/test.redb".to_string(),
        max_payload_bytes: 1_048_576,
        ip_limit_per_minute: 100,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readers_keep_their_snapshot_across_replace() {
        let handle = ConfigHandle::new(test_config());
        let before = handle.current();

        let mut next = test_config();
        next.mattermost_channel = "ops".to_string();
        next.pagerduty_webhook_secret = Some("rotated".to_string());
        let previous = handle.replace(next);

        assert_eq!(previous.mattermost_channel, "incidents");
        assert_eq!(before.mattermost_channel, "incidents");
        assert_eq!(before.pagerduty_webhook_secret, None);

        let after = handle.current();
        assert_eq!(after.mattermost_channel, "ops");
        assert_eq!(after.pagerduty_webhook_secret.as_deref(), Some("rotated"));
    }

    #[test]
    fn reports_settings_that_need_a_restart() {
        let current = test_config();
        let mut next = test_config();
        next.pagerduty_api_key = "new-key".to_string();
        next.mattermost_channel = "ops".to_string();

        assert_eq!(
            current.restart_required_changes(&next),
            vec!["PAGERDUTY_API_KEY", "MATTERMOST_CHANNEL"]
        );
    }
}
