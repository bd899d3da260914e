//! # Sources Module
//!
//! Turns what a user typed into something the voice sink can stream.
//!
//! A [`Locator`] is the raw request (a media URL or free search text). A
//! [`TrackResolver`] turns it into a [`ResolvedTrack`]: a display title plus a
//! direct stream URL. Resolution is stateless and never retried here; the
//! session decides what to do with a failure.
//!
//! The production resolver is [`YtDlpResolver`], which shells out to `yt-dlp`
//! without downloading anything.

pub mod ytdlp;

use async_trait::async_trait;
use std::{collections::HashMap, fmt, time::Duration};
use url::Url;

use crate::error::{PlaybackError, PlaybackResult};

pub use ytdlp::YtDlpResolver;

/// Lo que el usuario pidió: una URL o un texto de búsqueda.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator(String);

impl Locator {
    /// Valida la entrada del usuario. Vacía o sólo espacios es un error del llamador.
    pub fn parse(raw: &str) -> PlaybackResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PlaybackError::InvalidLocator(
                "la búsqueda está vacía".to_string(),
            ));
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` si es una URL http(s); cualquier otra cosa se trata como búsqueda.
    pub fn is_url(&self) -> bool {
        Url::parse(&self.0)
            .map(|url| matches!(url.scheme(), "http" | "https"))
            .unwrap_or(false)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resultado de resolver un [`Locator`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTrack {
    pub title: String,
    /// URL directa del audio, lista para streaming.
    pub stream_url: String,
    /// Página original (YouTube, SoundCloud, ...), si el backend la reporta.
    pub page_url: Option<String>,
    pub duration: Option<Duration>,
    pub thumbnail: Option<String>,
    /// Cabeceras HTTP que el backend exige para leer `stream_url`.
    pub http_headers: HashMap<String, String>,
}

impl ResolvedTrack {
    pub fn new(title: impl Into<String>, stream_url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            stream_url: stream_url.into(),
            page_url: None,
            duration: None,
            thumbnail: None,
            http_headers: HashMap::new(),
        }
    }

    pub fn with_page_url(mut self, page_url: String) -> Self {
        self.page_url = Some(page_url);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: String) -> Self {
        self.thumbnail = Some(thumbnail);
        self
    }

    pub fn with_http_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.http_headers = headers;
        self
    }
}

/// Convierte un [`Locator`] en un stream reproducible.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackResolver: Send + Sync {
    async fn resolve(&self, locator: &Locator) -> PlaybackResult<ResolvedTrack>;
}
