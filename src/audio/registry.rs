use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    future::Future,
    sync::atomic::{AtomicU64, Ordering},
};
use tracing::{debug, info};

use super::session::{NowPlayingInfo, SessionDeps, SessionHandle};
use crate::{
    error::{PlaybackError, PlaybackResult},
    sources::Locator,
};

/// Registro de sesiones de reproducción por guild.
///
/// A session is created by the first `join`/`enqueue` for a guild and removed
/// once it has stopped (explicit stop, external voice disconnect or
/// shutdown). Guilds never share a session, a lock or a mailbox.
pub struct GuildSessions {
    sessions: DashMap<GuildId, SessionHandle>,
    deps: SessionDeps,
    next_id: AtomicU64,
}

impl GuildSessions {
    pub fn new(deps: SessionDeps) -> Self {
        Self {
            sessions: DashMap::new(),
            deps,
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> PlaybackResult<()> {
        self.dispatch(guild_id, |session| async move { session.join(channel_id).await })
            .await
    }

    /// Encola `locator`. `voice_channel` es el canal del usuario, por si hay que unirse.
    pub async fn enqueue(
        &self,
        guild_id: GuildId,
        locator: Locator,
        voice_channel: Option<ChannelId>,
        text_channel: Option<ChannelId>,
    ) -> PlaybackResult<usize> {
        self.dispatch(guild_id, |session| {
            let locator = locator.clone();
            async move { session.enqueue(locator, voice_channel, text_channel).await }
        })
        .await
    }

    pub async fn skip(&self, guild_id: GuildId) -> PlaybackResult<String> {
        match self.existing(guild_id) {
            Some(session) => session.skip().await.map_err(closed_as_idle),
            None => Err(PlaybackError::NoActiveTrack),
        }
    }

    pub async fn set_volume(&self, guild_id: GuildId, percent: u32) -> PlaybackResult<u32> {
        match self.existing(guild_id) {
            Some(session) => session.set_volume(percent).await.map_err(closed_as_idle),
            None => Err(PlaybackError::NoActiveTrack),
        }
    }

    pub async fn peek_queue(&self, guild_id: GuildId) -> Vec<Locator> {
        match self.existing(guild_id) {
            Some(session) => session.peek_queue().await.unwrap_or_default(),
            None => Vec::new(),
        }
    }

    pub async fn now_playing(&self, guild_id: GuildId) -> Option<NowPlayingInfo> {
        match self.existing(guild_id) {
            Some(session) => session.now_playing().await.ok().flatten(),
            None => None,
        }
    }

    /// Detiene la sesión y la elimina del registro. Nunca falla.
    pub async fn stop(&self, guild_id: GuildId) {
        let Some(session) = self.existing(guild_id) else {
            debug!("Stop sin sesión activa en guild {}", guild_id);
            return;
        };

        if let Err(e) = session.stop().await {
            debug!("La sesión de guild {} ya estaba cerrada: {}", guild_id, e);
        }
        self.forget(&session);
    }

    /// El bot salió de `channel_id` por fuera de `/stop`.
    ///
    /// Only the session connected to that channel is torn down; a late notice
    /// about an earlier connection leaves the current session alone.
    pub async fn voice_disconnected(&self, guild_id: GuildId, channel_id: ChannelId) {
        let Some(session) = self.existing(guild_id) else {
            return;
        };

        match session.voice_disconnected(channel_id).await {
            Ok(false) => {
                debug!("Desconexión atrasada de {} en guild {}, se ignora", channel_id, guild_id);
            }
            Ok(true) | Err(_) => {
                info!("🔌 Bot desconectado de voz en guild {}", guild_id);
                self.forget(&session);
            }
        }
    }

    /// Detiene todas las sesiones (apagado del bot).
    pub async fn shutdown(&self) {
        let guilds: Vec<GuildId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        info!("🛑 Cerrando {} sesiones de reproducción", guilds.len());

        futures::future::join_all(guilds.into_iter().map(|guild_id| self.stop(guild_id))).await;
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    fn existing(&self, guild_id: GuildId) -> Option<SessionHandle> {
        self.sessions.get(&guild_id).map(|entry| entry.clone())
    }

    fn get_or_spawn(&self, guild_id: GuildId) -> SessionHandle {
        self.sessions
            .entry(guild_id)
            .or_insert_with(|| {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                debug!("Creando sesión {} para guild {}", id, guild_id);
                SessionHandle::spawn(id, guild_id, self.deps.clone())
            })
            .clone()
    }

    /// Quita la sesión sólo si sigue siendo la misma instancia.
    fn forget(&self, session: &SessionHandle) {
        self.sessions
            .remove_if(&session.guild_id(), |_, current| current.id() == session.id());
    }

    /// Ejecuta `op` sobre la sesión de la guild, creándola si hace falta.
    ///
    /// If the session stopped while the command was in flight, the stale entry
    /// is dropped and the command runs once more on a fresh session.
    async fn dispatch<T, F, Fut>(&self, guild_id: GuildId, op: F) -> PlaybackResult<T>
    where
        F: Fn(SessionHandle) -> Fut,
        Fut: Future<Output = PlaybackResult<T>>,
    {
        let session = self.get_or_spawn(guild_id);
        match op(session.clone()).await {
            Err(PlaybackError::SessionClosed) => {
                self.forget(&session);
                op(self.get_or_spawn(guild_id)).await
            }
            result => result,
        }
    }
}

fn closed_as_idle(error: PlaybackError) -> PlaybackError {
    match error {
        PlaybackError::SessionClosed => PlaybackError::NoActiveTrack,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::{locator, Fakes, CHANNEL_A, CHANNEL_B, GUILD, TEXT_CHANNEL};
    use pretty_assertions::assert_eq;

    const OTHER_GUILD: GuildId = GuildId::new(2);

    fn registry() -> (GuildSessions, Fakes) {
        let fakes = Fakes::new(None);
        (GuildSessions::new(fakes.deps.clone()), fakes)
    }

    #[tokio::test]
    async fn test_sessions_are_created_on_first_enqueue() {
        let (sessions, mut fakes) = registry();
        assert_eq!(sessions.active_sessions(), 0);

        let position = sessions
            .enqueue(GUILD, locator("a"), Some(CHANNEL_A), Some(TEXT_CHANNEL))
            .await;
        assert_eq!(position, Ok(0));
        assert_eq!(sessions.active_sessions(), 1);
        assert_eq!(fakes.next_started().await.title, "a");
    }

    #[tokio::test]
    async fn test_queries_on_unknown_guild_do_not_create_sessions() {
        let (sessions, _fakes) = registry();

        assert_eq!(sessions.peek_queue(GUILD).await, Vec::<Locator>::new());
        assert_eq!(sessions.now_playing(GUILD).await, None);
        assert_eq!(sessions.skip(GUILD).await, Err(PlaybackError::NoActiveTrack));
        assert_eq!(sessions.set_volume(GUILD, 50).await, Err(PlaybackError::NoActiveTrack));
        sessions.stop(GUILD).await;

        assert_eq!(sessions.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_stop_removes_session_and_next_enqueue_starts_fresh() {
        let (sessions, mut fakes) = registry();

        sessions
            .enqueue(GUILD, locator("a"), Some(CHANNEL_A), Some(TEXT_CHANNEL))
            .await
            .unwrap();
        sessions
            .enqueue(GUILD, locator("b"), Some(CHANNEL_A), Some(TEXT_CHANNEL))
            .await
            .unwrap();
        let a = fakes.next_started().await;

        sessions.stop(GUILD).await;
        assert_eq!(sessions.active_sessions(), 0);
        assert!(a.stream.is_stopped());
        assert_eq!(fakes.voice.leaves(), 1);
        assert_eq!(sessions.peek_queue(GUILD).await, Vec::<Locator>::new());

        // Sesión nueva: vuelve a unirse y la cola anterior no existe
        sessions
            .enqueue(GUILD, locator("c"), Some(CHANNEL_A), Some(TEXT_CHANNEL))
            .await
            .unwrap();
        assert_eq!(fakes.next_started().await.title, "c");
        assert_eq!(fakes.voice.joins(), vec![CHANNEL_A, CHANNEL_A]);
        assert_eq!(sessions.peek_queue(GUILD).await, Vec::<Locator>::new());
    }

    #[tokio::test]
    async fn test_guilds_do_not_block_each_other() {
        let (sessions, mut fakes) = registry();
        let _release = fakes.resolver.gate("stuck");

        sessions
            .enqueue(GUILD, locator("stuck"), Some(CHANNEL_A), None)
            .await
            .unwrap();
        fakes.resolver.wait_for_call("stuck").await;

        sessions
            .enqueue(OTHER_GUILD, locator("free"), Some(CHANNEL_A), None)
            .await
            .unwrap();
        assert_eq!(fakes.next_started().await.title, "free");
        assert_eq!(sessions.active_sessions(), 2);
    }

    #[tokio::test]
    async fn test_voice_disconnect_forgets_session() {
        let (sessions, mut fakes) = registry();

        sessions
            .enqueue(GUILD, locator("a"), Some(CHANNEL_A), None)
            .await
            .unwrap();
        let a = fakes.next_started().await;

        sessions.voice_disconnected(GUILD, CHANNEL_A).await;
        assert_eq!(sessions.active_sessions(), 0);
        assert_eq!(fakes.voice.leaves(), 0);

        // El stream se libera cuando la tarea procesa la desconexión
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while !a.stream.is_stopped() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_late_disconnect_does_not_touch_new_session() {
        let (sessions, mut fakes) = registry();

        sessions.join(GUILD, CHANNEL_A).await.unwrap();
        sessions.stop(GUILD).await;

        // Nueva sesión en otro canal antes de que llegue el aviso del anterior
        sessions
            .enqueue(GUILD, locator("a"), Some(CHANNEL_B), None)
            .await
            .unwrap();
        let a = fakes.next_started().await;

        sessions.voice_disconnected(GUILD, CHANNEL_A).await;
        assert_eq!(sessions.active_sessions(), 1);
        assert!(!a.stream.is_stopped());
        assert_eq!(sessions.now_playing(GUILD).await.map(|info| info.title), Some("a".to_string()));
    }

    #[tokio::test]
    async fn test_shutdown_stops_every_session() {
        let (sessions, fakes) = registry();

        sessions.join(GUILD, CHANNEL_A).await.unwrap();
        sessions.join(OTHER_GUILD, CHANNEL_A).await.unwrap();
        assert_eq!(sessions.active_sessions(), 2);

        sessions.shutdown().await;
        assert_eq!(sessions.active_sessions(), 0);
        assert_eq!(fakes.voice.leaves(), 2);
    }
}
