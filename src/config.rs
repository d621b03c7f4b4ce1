//! Relay configuration
//!
//! Handles loading configuration from environment variables (and a `.env`
//! file when present) and turning it into a [`ManagerConfig`].

use crate::error::GatewayError;
use crate::manager::{IdentifySettings, ManagerConfig, ShardSelection};
use crate::protocol::CloseCodeTable;
use std::env;
use std::fmt;
use std::path::PathBuf;
use twilight_model::gateway::Intents;

/// Relay configuration
#[derive(Clone)]
pub struct GatewayConfig {
    /// Discord bot token, without any `Bot ` prefix
    pub discord_token: String,

    /// `SHARDS`: `auto`, a shard count, or a comma-separated id list
    pub shards: ShardSelection,

    /// Gateway protocol version
    pub gateway_version: u8,

    /// Request zlib-stream transport compression
    pub compress: bool,

    /// Warm member caches before reporting ready
    pub fetch_all_members: bool,

    pub large_threshold: Option<u32>,

    /// NATS server URL(s) - comma-separated for multiple servers
    pub nats_url: Option<String>,

    /// Health/metrics HTTP port
    pub http_port: u16,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Optional TOML file overriding the close code table
    pub close_codes_file: Option<PathBuf>,
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("discord_token", &"<redacted>")
            .field("shards", &self.shards)
            .field("gateway_version", &self.gateway_version)
            .field("compress", &self.compress)
            .field("fetch_all_members", &self.fetch_all_members)
            .field("large_threshold", &self.large_threshold)
            .field("nats_url", &self.nats_url)
            .field("http_port", &self.http_port)
            .field("log_level", &self.log_level)
            .field("close_codes_file", &self.close_codes_file)
            .finish()
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, GatewayError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, GatewayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let discord_token = lookup("DISCORD_TOKEN")
            .or_else(|| lookup("DISCORD_BOT_TOKEN"))
            .map(|token| strip_token_prefix(&token))
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                GatewayError::Config("DISCORD_TOKEN or DISCORD_BOT_TOKEN must be set".to_string())
            })?;

        let shard_count = lookup("SHARD_COUNT")
            .map(|raw| {
                raw.trim().parse::<u32>().map_err(|e| {
                    GatewayError::Config(format!("SHARD_COUNT must be a valid number: {e}"))
                })
            })
            .transpose()?;
        let shards = parse_shards(lookup("SHARDS").as_deref(), shard_count)?;

        let gateway_version = lookup("GATEWAY_VERSION")
            .unwrap_or_else(|| "10".to_string())
            .trim()
            .parse()
            .map_err(|e| GatewayError::Config(format!("GATEWAY_VERSION must be a valid number: {e}")))?;

        let compress = parse_flag(lookup("GATEWAY_COMPRESS").as_deref());
        let fetch_all_members = parse_flag(lookup("FETCH_ALL_MEMBERS").as_deref());

        let large_threshold = lookup("LARGE_THRESHOLD")
            .map(|raw| {
                raw.trim().parse::<u32>().map_err(|e| {
                    GatewayError::Config(format!("LARGE_THRESHOLD must be a valid number: {e}"))
                })
            })
            .transpose()?;

        let nats_url = lookup("NATS_URL").filter(|url| !url.is_empty());

        let http_port = lookup("HTTP_PORT")
            .or_else(|| lookup("METRICS_PORT"))
            .unwrap_or_else(|| "9090".to_string())
            .trim()
            .parse()
            .map_err(|e| GatewayError::Config(format!("HTTP_PORT must be a valid port number: {e}")))?;

        let log_level = lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        let close_codes_file = lookup("CLOSE_CODES_FILE").map(PathBuf::from);

        Ok(Self {
            discord_token,
            shards,
            gateway_version,
            compress,
            fetch_all_members,
            large_threshold,
            nats_url,
            http_port,
            log_level,
            close_codes_file,
        })
    }

    /// Get configured Discord intents
    ///
    /// Guild lifecycle and member events only; message content is privileged
    /// and not needed by the relay.
    pub fn intents() -> Intents {
        Intents::GUILDS | Intents::GUILD_MEMBERS
    }

    /// Library configuration for the manager, loading the close code table
    pub fn manager_config(&self) -> Result<ManagerConfig, GatewayError> {
        let mut config = ManagerConfig::new(self.discord_token.clone());
        config.shards = self.shards.clone();
        config.identify = IdentifySettings {
            version: self.gateway_version,
            compress: self.compress,
            intents: Self::intents(),
            large_threshold: self.large_threshold,
            ..IdentifySettings::default()
        };
        config.fetch_all_members = self.fetch_all_members;
        config.close_codes = CloseCodeTable::load(self.close_codes_file.as_deref())?;
        Ok(config)
    }
}

fn strip_token_prefix(token: &str) -> String {
    let token = token.trim();
    token
        .strip_prefix("Bot ")
        .or_else(|| token.strip_prefix("Bearer "))
        .unwrap_or(token)
        .trim()
        .to_string()
}

fn parse_flag(raw: Option<&str>) -> bool {
    matches!(
        raw.map(|value| value.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}

fn parse_shards(raw: Option<&str>, shard_count: Option<u32>) -> Result<ShardSelection, GatewayError> {
    let raw = raw.map(str::trim).unwrap_or("auto");
    if raw.is_empty() || raw.eq_ignore_ascii_case("auto") {
        return Ok(match shard_count {
            Some(count) => ShardSelection::Count(count),
            None => ShardSelection::Auto,
        });
    }

    if raw.contains(',') {
        let ids = raw
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| {
                id.parse::<u32>()
                    .map_err(|e| GatewayError::Config(format!("SHARDS id '{id}' is invalid: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if ids.is_empty() {
            return Err(GatewayError::Config("SHARDS id list is empty".to_string()));
        }
        return Ok(ShardSelection::Ids {
            ids,
            total: shard_count,
        });
    }

    raw.parse::<u32>()
        .map(ShardSelection::Count)
        .map_err(|e| GatewayError::Config(format!("SHARDS must be auto, a count or an id list: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_intents_are_minimal() {
        let intents = GatewayConfig::intents();

        assert!(intents.contains(Intents::GUILDS));
        assert!(intents.contains(Intents::GUILD_MEMBERS));
        assert!(!intents.contains(Intents::MESSAGE_CONTENT));
    }

    #[test]
    fn test_default_values() {
        let config = GatewayConfig::from_lookup(lookup(&[("DISCORD_TOKEN", "abc")])).unwrap();

        assert_eq!(config.shards, ShardSelection::Auto);
        assert_eq!(config.gateway_version, 10);
        assert!(!config.compress);
        assert!(!config.fetch_all_members);
        assert_eq!(config.http_port, 9090);
        assert_eq!(config.log_level, "info");
        assert!(config.nats_url.is_none());
    }

    #[test]
    fn test_token_is_required() {
        let err = GatewayConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("DISCORD_TOKEN"));
    }

    #[test]
    fn test_token_prefix_is_stripped() {
        let config =
            GatewayConfig::from_lookup(lookup(&[("DISCORD_BOT_TOKEN", "Bot abc.def")])).unwrap();
        assert_eq!(config.discord_token, "abc.def");
        assert!(!format!("{config:?}").contains("abc.def"));
    }

    #[test]
    fn test_shard_selection_forms() {
        assert_eq!(parse_shards(Some("4"), None).unwrap(), ShardSelection::Count(4));
        assert_eq!(parse_shards(Some("auto"), Some(6)).unwrap(), ShardSelection::Count(6));
        assert_eq!(
            parse_shards(Some("1, 3,"), Some(8)).unwrap(),
            ShardSelection::Ids {
                ids: vec![1, 3],
                total: Some(8)
            }
        );
        assert!(parse_shards(Some(","), None).is_err());
        assert!(parse_shards(Some("many"), None).is_err());
    }

    #[test]
    fn test_flags() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("DISCORD_TOKEN", "abc"),
            ("GATEWAY_COMPRESS", "true"),
            ("FETCH_ALL_MEMBERS", "1"),
            ("LARGE_THRESHOLD", "250"),
        ]))
        .unwrap();
        assert!(config.compress);
        assert!(config.fetch_all_members);
        assert_eq!(config.large_threshold, Some(250));
    }

    #[test]
    fn test_manager_config_carries_identify_settings() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("DISCORD_TOKEN", "abc"),
            ("SHARDS", "2"),
            ("GATEWAY_VERSION", "9"),
        ]))
        .unwrap();
        let manager = config.manager_config().unwrap();

        assert_eq!(manager.token, "abc");
        assert_eq!(manager.shards, ShardSelection::Count(2));
        assert_eq!(manager.identify.version, 9);
        assert_eq!(manager.identify.intents, GatewayConfig::intents());
    }
}
