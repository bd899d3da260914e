use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: Option<u64>,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Audio
    pub default_volume: f32,
    pub max_volume_percent: u32,

    // yt-dlp
    pub ytdlp_path: String,
    pub ytdlp_format: String,
    pub ytdlp_search_prefix: String,
    pub source_address: Option<String>,

    // Sesiones
    pub session_mailbox_size: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,
            application_id: std::env::var("APPLICATION_ID").ok().and_then(|s| s.parse().ok()),
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            // Audio
            default_volume: std::env::var("DEFAULT_VOLUME")
                .unwrap_or_else(|_| "0.5".to_string())
                .parse()?,
            max_volume_percent: std::env::var("MAX_VOLUME_PERCENT")
                .unwrap_or_else(|_| "200".to_string())
                .parse()?,

            // yt-dlp
            ytdlp_path: std::env::var("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),
            ytdlp_format: std::env::var("YTDLP_FORMAT").unwrap_or(defaults.ytdlp_format),
            ytdlp_search_prefix: std::env::var("YTDLP_SEARCH_PREFIX")
                .unwrap_or(defaults.ytdlp_search_prefix),
            // Vacío desactiva el binding; sin variable se usa 0.0.0.0 (fuerza IPv4)
            source_address: match std::env::var("SOURCE_ADDRESS") {
                Ok(val) if val.trim().is_empty() => None,
                Ok(val) => Some(val),
                Err(_) => defaults.source_address,
            },

            // Sesiones
            session_mailbox_size: std::env::var("SESSION_MAILBOX_SIZE")
                .unwrap_or_else(|_| "64".to_string())
                .parse()?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Max volume must be between 1% and 200%
    /// - Default volume must be above 0.0 and not exceed the max volume
    /// - The token and the yt-dlp path must not be empty
    /// - Session mailboxes need room for at least one message
    /// - Discord ids, when set, are never 0
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("DISCORD_TOKEN is empty");
        }

        if self.application_id == Some(0) {
            anyhow::bail!("APPLICATION_ID must not be 0");
        }

        if self.guild_id == Some(0) {
            anyhow::bail!("GUILD_ID must not be 0");
        }

        if self.max_volume_percent == 0 || self.max_volume_percent > 200 {
            anyhow::bail!(
                "Max volume must be between 1 and 200 percent, got: {}",
                self.max_volume_percent
            );
        }

        let max_volume = self.max_volume_percent as f32 / 100.0;
        if self.default_volume <= 0.0 || self.default_volume > max_volume {
            anyhow::bail!(
                "Default volume must be in (0.0, {}], got: {}",
                max_volume,
                self.default_volume
            );
        }

        if self.ytdlp_path.trim().is_empty() {
            anyhow::bail!("YTDLP_PATH is empty");
        }

        if self.session_mailbox_size == 0 {
            anyhow::bail!("Session mailbox size must be greater than 0");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The Discord token is never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Audio: {}% default vol, {}% max\n  \
            yt-dlp: {} -f {} (search: {}, source: {})\n  \
            Sessions: mailbox {}",
            self.application_id.map_or("auto".to_string(), |id| id.to_string()),
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            (self.default_volume * 100.0).round() as u32,
            self.max_volume_percent,
            self.ytdlp_path,
            self.ytdlp_format,
            self.ytdlp_search_prefix,
            self.source_address.as_deref().unwrap_or("default"),
            self.session_mailbox_size,
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: None,
            guild_id: None,

            // Audio defaults
            default_volume: 0.5,
            max_volume_percent: 200,

            // yt-dlp defaults
            ytdlp_path: "yt-dlp".to_string(),
            ytdlp_format: "bestaudio/best".to_string(),
            ytdlp_search_prefix: "ytsearch1".to_string(),
            source_address: Some("0.0.0.0".to_string()),

            session_mailbox_size: 64,
        }
    }
}
