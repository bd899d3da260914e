use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::{HttpRequest, Input},
    tracks::{PlayMode, Track, TrackHandle},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::sink::{AudioSink, StreamHandle, TrackEndSignal, VoiceConnector};
use crate::{
    error::{PlaybackError, PlaybackResult},
    sources::ResolvedTrack,
};

/// Conexiones de voz a través del gestor de Songbird.
pub struct SongbirdVoice {
    manager: Arc<Songbird>,
    http_client: reqwest::Client,
}

impl SongbirdVoice {
    pub fn new(manager: Arc<Songbird>, http_client: reqwest::Client) -> Self {
        Self {
            manager,
            http_client,
        }
    }
}

#[async_trait]
impl VoiceConnector for SongbirdVoice {
    async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> PlaybackResult<Arc<dyn AudioSink>> {
        // Si ya hay llamada en la guild, Songbird la mueve de canal
        let call = self.manager.join(guild_id, channel_id).await.map_err(|e| {
            warn!("Error al conectar a {} en guild {}: {:?}", channel_id, guild_id, e);
            PlaybackError::VoiceConnect(e.to_string())
        })?;

        Ok(Arc::new(SongbirdSink {
            call,
            http_client: self.http_client.clone(),
        }))
    }

    async fn leave(&self, guild_id: GuildId) -> PlaybackResult<()> {
        self.manager
            .remove(guild_id)
            .await
            .map_err(|e| PlaybackError::VoiceConnect(e.to_string()))?;

        info!("👋 Desconectado del canal de voz en guild {}", guild_id);
        Ok(())
    }
}

/// Reproduce sobre una llamada de Songbird ya establecida.
pub struct SongbirdSink {
    call: Arc<Mutex<Call>>,
    http_client: reqwest::Client,
}

#[async_trait]
impl AudioSink for SongbirdSink {
    async fn play(
        &self,
        track: &ResolvedTrack,
        volume: f32,
        on_end: TrackEndSignal,
    ) -> PlaybackResult<Box<dyn StreamHandle>> {
        let request = HttpRequest::new_with_headers(
            self.http_client.clone(),
            track.stream_url.clone(),
            header_map(&track.http_headers),
        );
        let input = Input::from(request);

        let handle = {
            let mut call = self.call.lock().await;
            call.play(Track::from(input).volume(volume))
        };

        let generation = on_end.generation();
        let registered = handle
            .add_event(
                Event::Track(TrackEvent::End),
                TrackEndNotifier {
                    signal: on_end.clone(),
                },
            )
            .and_then(|_| {
                handle.add_event(
                    Event::Track(TrackEvent::Error),
                    TrackErrorNotifier { signal: on_end },
                )
            });

        if let Err(e) = registered {
            let _ = handle.stop();
            return Err(PlaybackError::Sink(format!(
                "no se pudo registrar el fin del track: {}",
                e
            )));
        }

        debug!("Stream iniciado (generación {}): {}", generation, track.title);
        Ok(Box::new(SongbirdStream(handle)))
    }
}

struct SongbirdStream(TrackHandle);

impl StreamHandle for SongbirdStream {
    fn set_volume(&self, volume: f32) -> PlaybackResult<()> {
        self.0
            .set_volume(volume)
            .map_err(|e| PlaybackError::Sink(e.to_string()))
    }

    fn stop(&self) {
        // Falla si el track ya terminó; no importa
        let _ = self.0.stop();
    }
}

/// Handler para cuando termina una canción
struct TrackEndNotifier {
    signal: TrackEndSignal,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        self.signal.finished().await;
        None
    }
}

/// Handler para errores de tracks
struct TrackErrorNotifier {
    signal: TrackEndSignal,
}

#[async_trait]
impl VoiceEventHandler for TrackErrorNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let reason = match ctx {
            EventContext::Track(track_list) => track_list
                .first()
                .map(|(state, _)| match &state.playing {
                    PlayMode::Errored(e) => format!("{:?}", e),
                    other => format!("{:?}", other),
                })
                .unwrap_or_else(|| "error desconocido".to_string()),
            _ => "error desconocido".to_string(),
        };

        self.signal.failed(reason).await;
        None
    }
}

fn header_map(headers: &HashMap<String, String>) -> HeaderMap {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let name = HeaderName::from_bytes(name.as_bytes()).ok()?;
            let value = HeaderValue::from_str(value).ok()?;
            Some((name, value))
        })
        .collect()
}
