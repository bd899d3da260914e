//! Contracts between a guild session and the voice layer.
//!
//! The session never touches songbird directly. It asks a [`VoiceConnector`]
//! for a connection, hands resolved tracks to the returned [`AudioSink`], and
//! learns about the end of each stream through the [`TrackEndSignal`] it gave
//! the sink. User-facing announcements go through a [`PlaybackNotifier`].

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::debug;

use super::session::SessionCommand;
use crate::{
    error::PlaybackResult,
    sources::{Locator, ResolvedTrack},
};

/// Establece y libera conexiones de voz por guild.
#[async_trait]
pub trait VoiceConnector: Send + Sync {
    /// Conecta o mueve el bot a `channel_id`. Los fallos son `VoiceConnect`.
    async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> PlaybackResult<Arc<dyn AudioSink>>;

    async fn leave(&self, guild_id: GuildId) -> PlaybackResult<()>;
}

/// Una conexión de voz activa capaz de reproducir streams.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Empieza a reproducir `track` con `volume` aplicado desde el primer frame.
    ///
    /// The sink must call exactly one of [`TrackEndSignal::finished`] or
    /// [`TrackEndSignal::failed`] when the stream ends; extra calls are
    /// tolerated and ignored by the session.
    async fn play(
        &self,
        track: &ResolvedTrack,
        volume: f32,
        on_end: TrackEndSignal,
    ) -> PlaybackResult<Box<dyn StreamHandle>>;
}

/// Control sobre un stream en curso.
pub trait StreamHandle: Send + Sync {
    fn set_volume(&self, volume: f32) -> PlaybackResult<()>;

    /// Libera el stream. Debe ser seguro llamarlo sobre un stream ya terminado.
    fn stop(&self);
}

/// Avisa a la sesión de que el stream de una generación concreta terminó.
#[derive(Debug, Clone)]
pub struct TrackEndSignal {
    generation: u64,
    mailbox: mpsc::Sender<SessionCommand>,
}

impl TrackEndSignal {
    pub(crate) fn new(generation: u64, mailbox: mpsc::Sender<SessionCommand>) -> Self {
        Self {
            generation,
            mailbox,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub async fn finished(&self) {
        self.send(None).await;
    }

    pub async fn failed(&self, reason: impl Into<String>) {
        self.send(Some(reason.into())).await;
    }

    async fn send(&self, error: Option<String>) {
        let command = SessionCommand::TrackEnded {
            generation: self.generation,
            error,
        };

        if self.mailbox.send(command).await.is_err() {
            debug!("Sesión cerrada, se ignora el fin de la generación {}", self.generation);
        }
    }
}

/// Eventos que el usuario debe ver en el canal de texto.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    NowPlaying {
        title: String,
        page_url: Option<String>,
        duration: Option<Duration>,
    },
    TrackFailed {
        locator: Locator,
        reason: String,
    },
    QueueFinished,
}

/// Publica [`PlaybackEvent`]s. No debe bloquear: la sesión lo llama desde su tarea.
pub trait PlaybackNotifier: Send + Sync {
    fn announce(&self, guild_id: GuildId, channel_id: ChannelId, event: PlaybackEvent);
}
