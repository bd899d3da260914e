//! Per-guild playback session.
//!
//! Each guild gets one [`PlaybackSession`] running as its own task. Every
//! operation (user commands, resolver results, end-of-track signals from the
//! sink) arrives as a [`SessionCommand`] on the session mailbox and is handled
//! to completion before the next one, so the queue and the "is something
//! playing" check can never be observed half-updated.
//!
//! Resolution runs in a separate task and reports back through the mailbox.
//! Every resolve attempt and every started stream gets a new generation
//! number; results and end signals from an older generation are dropped.

use chrono::{DateTime, Utc};
use serenity::model::id::{ChannelId, GuildId};
use std::{collections::VecDeque, ops::ControlFlow, sync::Arc, time::Duration};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::sink::{
    AudioSink, PlaybackEvent, PlaybackNotifier, StreamHandle, TrackEndSignal, VoiceConnector,
};
use crate::{
    error::{PlaybackError, PlaybackResult},
    sources::{Locator, ResolvedTrack, TrackResolver},
};

/// Ajustes compartidos por todas las sesiones.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub default_volume: f32,
    pub max_volume_percent: u32,
    pub mailbox_size: usize,
}

impl From<&crate::config::Config> for SessionSettings {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            default_volume: config.default_volume,
            max_volume_percent: config.max_volume_percent,
            mailbox_size: config.session_mailbox_size,
        }
    }
}

/// Colaboradores externos de una sesión.
#[derive(Clone)]
pub struct SessionDeps {
    pub resolver: Arc<dyn TrackResolver>,
    pub voice: Arc<dyn VoiceConnector>,
    pub notifier: Arc<dyn PlaybackNotifier>,
    pub settings: SessionSettings,
}

/// Vista de la canción actual para la capa de comandos.
#[derive(Debug, Clone, PartialEq)]
pub struct NowPlayingInfo {
    pub locator: Locator,
    pub title: String,
    pub page_url: Option<String>,
    pub duration: Option<Duration>,
    pub thumbnail: Option<String>,
    pub volume_percent: u32,
    pub started_at: DateTime<Utc>,
}

pub(crate) enum SessionCommand {
    Join {
        channel_id: ChannelId,
        reply: oneshot::Sender<PlaybackResult<()>>,
    },
    Enqueue {
        locator: Locator,
        /// Canal de voz del usuario, usado si el bot aún no está conectado
        voice_channel: Option<ChannelId>,
        /// Canal de texto donde anunciar la reproducción
        text_channel: Option<ChannelId>,
        reply: oneshot::Sender<PlaybackResult<usize>>,
    },
    Skip {
        reply: oneshot::Sender<PlaybackResult<String>>,
    },
    SetVolume {
        percent: u32,
        reply: oneshot::Sender<PlaybackResult<u32>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    VoiceDisconnected {
        /// Canal del que salió el bot
        channel_id: ChannelId,
        reply: oneshot::Sender<bool>,
    },
    PeekQueue {
        reply: oneshot::Sender<Vec<Locator>>,
    },
    NowPlaying {
        reply: oneshot::Sender<Option<NowPlayingInfo>>,
    },
    Resolved {
        generation: u64,
        result: PlaybackResult<ResolvedTrack>,
    },
    TrackEnded {
        generation: u64,
        error: Option<String>,
    },
}

struct NowPlaying {
    generation: u64,
    locator: Locator,
    track: ResolvedTrack,
    handle: Box<dyn StreamHandle>,
    started_at: DateTime<Utc>,
}

enum Playback {
    Idle,
    Resolving {
        generation: u64,
        locator: Locator,
        cancel: CancellationToken,
    },
    Playing(NowPlaying),
}

impl Playback {
    fn is_idle(&self) -> bool {
        matches!(self, Playback::Idle)
    }
}

enum Connection {
    Disconnected,
    Connected {
        channel_id: ChannelId,
        sink: Arc<dyn AudioSink>,
    },
}

/// Estado de reproducción de una guild. Sólo lo toca su propia tarea.
pub struct PlaybackSession {
    guild_id: GuildId,
    queue: VecDeque<Locator>,
    playback: Playback,
    volume: f32,
    connection: Connection,
    announce_channel: Option<ChannelId>,
    generation: u64,
    deps: SessionDeps,
    mailbox: mpsc::WeakSender<SessionCommand>,
}

impl PlaybackSession {
    fn new(guild_id: GuildId, deps: SessionDeps, mailbox: mpsc::WeakSender<SessionCommand>) -> Self {
        Self {
            guild_id,
            queue: VecDeque::new(),
            playback: Playback::Idle,
            volume: deps.settings.default_volume,
            connection: Connection::Disconnected,
            announce_channel: None,
            generation: 0,
            deps,
            mailbox,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<SessionCommand>) {
        debug!("Sesión iniciada para guild {}", self.guild_id);

        while let Some(command) = rx.recv().await {
            if self.handle(command).await.is_break() {
                break;
            }
        }

        // Sin remitentes o tras stop: nada debe seguir sonando
        self.release_current();
        debug!("Sesión terminada para guild {}", self.guild_id);
    }

    async fn handle(&mut self, command: SessionCommand) -> ControlFlow<()> {
        match command {
            SessionCommand::Join { channel_id, reply } => {
                let _ = reply.send(self.join(channel_id).await);
            }
            SessionCommand::Enqueue {
                locator,
                voice_channel,
                text_channel,
                reply,
            } => {
                let result = self.enqueue(locator, voice_channel, text_channel).await;
                let _ = reply.send(result);
            }
            SessionCommand::Skip { reply } => {
                let _ = reply.send(self.skip());
            }
            SessionCommand::SetVolume { percent, reply } => {
                let _ = reply.send(self.set_volume(percent));
            }
            SessionCommand::Stop { reply } => {
                self.teardown(true).await;
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
            SessionCommand::VoiceDisconnected { channel_id, reply } => {
                if !self.is_connected_to(channel_id) {
                    // Aviso atrasado de una conexión anterior
                    debug!(
                        "Ignorando desconexión de {} en guild {}: no es el canal actual",
                        channel_id, self.guild_id
                    );
                    let _ = reply.send(false);
                    return ControlFlow::Continue(());
                }

                self.teardown(false).await;
                let _ = reply.send(true);
                return ControlFlow::Break(());
            }
            SessionCommand::PeekQueue { reply } => {
                let _ = reply.send(self.queue.iter().cloned().collect());
            }
            SessionCommand::NowPlaying { reply } => {
                let _ = reply.send(self.now_playing());
            }
            SessionCommand::Resolved { generation, result } => {
                self.on_resolved(generation, result).await;
            }
            SessionCommand::TrackEnded { generation, error } => {
                self.on_track_ended(generation, error);
            }
        }

        ControlFlow::Continue(())
    }

    fn is_connected_to(&self, channel_id: ChannelId) -> bool {
        matches!(
            &self.connection,
            Connection::Connected { channel_id: current, .. } if *current == channel_id
        )
    }

    async fn join(&mut self, channel_id: ChannelId) -> PlaybackResult<()> {
        if let Connection::Connected { channel_id: current, .. } = &self.connection {
            if *current == channel_id {
                debug!("Ya conectado a {} en guild {}", channel_id, self.guild_id);
                return Ok(());
            }
        }

        let sink = self.deps.voice.join(self.guild_id, channel_id).await?;
        info!("🔊 Conectado al canal {} en guild {}", channel_id, self.guild_id);

        self.connection = Connection::Connected { channel_id, sink };
        Ok(())
    }

    async fn enqueue(
        &mut self,
        locator: Locator,
        voice_channel: Option<ChannelId>,
        text_channel: Option<ChannelId>,
    ) -> PlaybackResult<usize> {
        if matches!(self.connection, Connection::Disconnected) {
            let channel_id = voice_channel.ok_or(PlaybackError::NotConnected)?;
            self.join(channel_id).await?;
        }

        if text_channel.is_some() {
            self.announce_channel = text_channel;
        }

        info!("➕ Agregado a la cola de guild {}: {}", self.guild_id, locator);
        self.queue.push_back(locator);

        // Sólo arranca si no hay nada sonando ni resolviéndose
        if self.playback.is_idle() {
            self.advance();
        }

        // 0 = empezó ya; n = n-ésima en espera
        Ok(self.queue.len())
    }

    /// Suelta lo que esté sonando y pasa a la siguiente de la cola.
    ///
    /// Never suspends: the resolve runs on its own task and comes back as
    /// [`SessionCommand::Resolved`].
    fn advance(&mut self) {
        let was_active = !self.playback.is_idle();
        self.release_current();

        if matches!(self.connection, Connection::Disconnected) {
            debug!("Guild {} sin conexión de voz, no se avanza", self.guild_id);
            return;
        }

        match self.queue.pop_front() {
            Some(locator) => self.start_resolve(locator),
            None => {
                info!("📭 Cola vacía en guild {}", self.guild_id);
                if was_active {
                    self.announce(PlaybackEvent::QueueFinished);
                }
            }
        }
    }

    fn start_resolve(&mut self, locator: Locator) {
        let Some(mailbox) = self.mailbox.upgrade() else {
            // La sesión se está cerrando
            self.queue.push_front(locator);
            return;
        };

        self.generation += 1;
        let generation = self.generation;
        let cancel = CancellationToken::new();

        let resolver = self.deps.resolver.clone();
        let token = cancel.clone();
        let target = locator.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => return,
                result = resolver.resolve(&target) => result,
            };

            let _ = mailbox
                .send(SessionCommand::Resolved { generation, result })
                .await;
        });

        debug!("Resolviendo {} (generación {})", locator, generation);
        self.playback = Playback::Resolving {
            generation,
            locator,
            cancel,
        };
    }

    async fn on_resolved(&mut self, generation: u64, result: PlaybackResult<ResolvedTrack>) {
        let locator = match &self.playback {
            Playback::Resolving {
                generation: current,
                locator,
                ..
            } if *current == generation => locator.clone(),
            _ => {
                debug!("Descartando resolución obsoleta (generación {})", generation);
                return;
            }
        };

        match result {
            Ok(track) => self.start_playback(generation, locator, track).await,
            Err(e) => {
                // No se reintenta: se salta y se sigue con la cola
                warn!("❌ No se pudo resolver {}: {}", locator, e);
                self.playback = Playback::Idle;
                self.announce(PlaybackEvent::TrackFailed {
                    locator,
                    reason: e.to_string(),
                });
                self.advance();
            }
        }
    }

    async fn start_playback(&mut self, generation: u64, locator: Locator, track: ResolvedTrack) {
        let sink = match &self.connection {
            Connection::Connected { sink, .. } => sink.clone(),
            Connection::Disconnected => {
                self.playback = Playback::Idle;
                return;
            }
        };

        let Some(mailbox) = self.mailbox.upgrade() else {
            self.playback = Playback::Idle;
            return;
        };

        let signal = TrackEndSignal::new(generation, mailbox);
        match sink.play(&track, self.volume, signal).await {
            Ok(handle) => {
                info!("🎵 Reproduciendo en guild {}: {}", self.guild_id, track.title);
                self.announce(PlaybackEvent::NowPlaying {
                    title: track.title.clone(),
                    page_url: track.page_url.clone(),
                    duration: track.duration,
                });
                self.playback = Playback::Playing(NowPlaying {
                    generation,
                    locator,
                    track,
                    handle,
                    started_at: Utc::now(),
                });
            }
            Err(e) => {
                error!("❌ El sink rechazó {}: {}", track.title, e);
                self.playback = Playback::Idle;
                self.announce(PlaybackEvent::TrackFailed {
                    locator,
                    reason: e.to_string(),
                });
                self.advance();
            }
        }
    }

    fn on_track_ended(&mut self, generation: u64, error: Option<String>) {
        let locator = match &self.playback {
            Playback::Playing(now) if now.generation == generation => now.locator.clone(),
            _ => {
                debug!("Ignorando fin de track obsoleto (generación {})", generation);
                return;
            }
        };

        match error {
            Some(reason) => {
                // Un fallo del sink cuenta como fin de canción
                warn!("⚠️ Error de reproducción en guild {}: {}", self.guild_id, reason);
                self.announce(PlaybackEvent::TrackFailed {
                    locator,
                    reason: PlaybackError::Sink(reason).to_string(),
                });
            }
            None => debug!("Track terminado en guild {}", self.guild_id),
        }

        self.advance();
    }

    fn skip(&mut self) -> PlaybackResult<String> {
        let skipped = match &self.playback {
            Playback::Idle => return Err(PlaybackError::NoActiveTrack),
            Playback::Resolving { locator, .. } => locator.to_string(),
            Playback::Playing(now) => now.track.title.clone(),
        };

        info!("⏭️ Saltando {} en guild {}", skipped, self.guild_id);
        self.advance();
        Ok(skipped)
    }

    fn set_volume(&mut self, percent: u32) -> PlaybackResult<u32> {
        let Playback::Playing(now) = &self.playback else {
            return Err(PlaybackError::NoActiveTrack);
        };

        let clamped = percent.clamp(1, self.deps.settings.max_volume_percent);
        let volume = clamped as f32 / 100.0;
        now.handle.set_volume(volume)?;

        self.volume = volume;
        info!("🔊 Volumen ajustado a {}% en guild {}", clamped, self.guild_id);
        Ok(clamped)
    }

    fn now_playing(&self) -> Option<NowPlayingInfo> {
        let Playback::Playing(now) = &self.playback else {
            return None;
        };

        Some(NowPlayingInfo {
            locator: now.locator.clone(),
            title: now.track.title.clone(),
            page_url: now.track.page_url.clone(),
            duration: now.track.duration,
            thumbnail: now.track.thumbnail.clone(),
            volume_percent: (self.volume * 100.0).round() as u32,
            started_at: now.started_at,
        })
    }

    /// Vacía la cola, corta el stream y suelta la conexión de voz.
    async fn teardown(&mut self, leave_voice: bool) {
        let dropped = self.queue.len();
        self.queue.clear();
        self.release_current();

        let previous = std::mem::replace(&mut self.connection, Connection::Disconnected);
        if leave_voice && matches!(previous, Connection::Connected { .. }) {
            if let Err(e) = self.deps.voice.leave(self.guild_id).await {
                // Se resetea el estado igualmente
                warn!("Error al desconectar de voz en guild {}: {}", self.guild_id, e);
            }
        }

        info!(
            "⏹️ Reproducción detenida en guild {} ({} en cola descartadas)",
            self.guild_id, dropped
        );
    }

    /// Libera el stream actual o cancela la resolución en curso.
    fn release_current(&mut self) {
        match std::mem::replace(&mut self.playback, Playback::Idle) {
            Playback::Idle => {}
            Playback::Resolving {
                locator, cancel, ..
            } => {
                debug!("Cancelando resolución de {}", locator);
                cancel.cancel();
            }
            Playback::Playing(now) => now.handle.stop(),
        }
    }

    fn announce(&self, event: PlaybackEvent) {
        if let Some(channel_id) = self.announce_channel {
            self.deps.notifier.announce(self.guild_id, channel_id, event);
        }
    }
}

/// Referencia clonable al buzón de una sesión.
#[derive(Clone)]
pub struct SessionHandle {
    id: u64,
    guild_id: GuildId,
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// Arranca la tarea de la sesión y devuelve su handle.
    pub fn spawn(id: u64, guild_id: GuildId, deps: SessionDeps) -> Self {
        let (tx, rx) = mpsc::channel(deps.settings.mailbox_size);
        let session = PlaybackSession::new(guild_id, deps, tx.downgrade());
        tokio::spawn(session.run(rx));

        Self { id, guild_id, tx }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub async fn join(&self, channel_id: ChannelId) -> PlaybackResult<()> {
        self.request(|reply| SessionCommand::Join { channel_id, reply })
            .await?
    }

    pub async fn enqueue(
        &self,
        locator: Locator,
        voice_channel: Option<ChannelId>,
        text_channel: Option<ChannelId>,
    ) -> PlaybackResult<usize> {
        self.request(|reply| SessionCommand::Enqueue {
            locator,
            voice_channel,
            text_channel,
            reply,
        })
        .await?
    }

    pub async fn skip(&self) -> PlaybackResult<String> {
        self.request(|reply| SessionCommand::Skip { reply }).await?
    }

    pub async fn set_volume(&self, percent: u32) -> PlaybackResult<u32> {
        self.request(|reply| SessionCommand::SetVolume { percent, reply })
            .await?
    }

    pub async fn stop(&self) -> PlaybackResult<()> {
        self.request(|reply| SessionCommand::Stop { reply }).await
    }

    /// Devuelve `true` si la sesión estaba en `channel_id` y se cerró.
    pub async fn voice_disconnected(&self, channel_id: ChannelId) -> PlaybackResult<bool> {
        self.request(|reply| SessionCommand::VoiceDisconnected { channel_id, reply })
            .await
    }

    pub async fn peek_queue(&self) -> PlaybackResult<Vec<Locator>> {
        self.request(|reply| SessionCommand::PeekQueue { reply }).await
    }

    pub async fn now_playing(&self) -> PlaybackResult<Option<NowPlayingInfo>> {
        self.request(|reply| SessionCommand::NowPlaying { reply })
            .await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> PlaybackResult<T> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| PlaybackError::SessionClosed)?;
        response.await.map_err(|_| PlaybackError::SessionClosed)
    }

    #[cfg(test)]
    pub(crate) async fn inject(&self, command: SessionCommand) {
        let _ = self.tx.send(command).await;
    }
}
