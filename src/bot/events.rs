use serenity::{
    builder::CreateMessage,
    http::Http,
    model::id::{ChannelId, GuildId},
};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::{
    audio::{PlaybackEvent, PlaybackNotifier},
    ui::embeds,
};

/// Publica los eventos de reproducción en el canal de texto de cada sesión.
pub struct ChannelNotifier {
    http: Arc<Http>,
}

impl ChannelNotifier {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

impl PlaybackNotifier for ChannelNotifier {
    fn announce(&self, guild_id: GuildId, channel_id: ChannelId, event: PlaybackEvent) {
        match &event {
            PlaybackEvent::NowPlaying { title, .. } => {
                info!("▶️ Reproduciendo: {} en guild {}", title, guild_id)
            }
            PlaybackEvent::TrackFailed { locator, reason } => {
                info!("⚠️ Falló '{}' en guild {}: {}", locator, guild_id, reason)
            }
            PlaybackEvent::QueueFinished => debug!("Cola terminada en guild {}", guild_id),
        }

        // La sesión no espera al envío
        let http = self.http.clone();
        tokio::spawn(async move {
            let message = CreateMessage::new().embed(embeds::create_event_embed(&event));
            if let Err(e) = channel_id.send_message(&http, message).await {
                error!("Error al enviar anuncio en guild {}: {:?}", guild_id, e);
            }
        });
    }
}
