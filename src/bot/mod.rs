//! # Bot Module
//!
//! Discord side of the bot: slash command registration, interaction
//! dispatch and voice state tracking.
//!
//! The bot owns no playback state of its own. Every command is forwarded to
//! [`GuildSessions`], which routes it to the session of the guild it came
//! from, and playback announcements come back through [`ChannelNotifier`].

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod commands;
pub mod events;
pub mod handlers;

pub use events::ChannelNotifier;

use crate::{audio::GuildSessions, config::Config};

/// Handler de eventos de Discord del bot.
pub struct MusicBot {
    /// Configuración cargada del entorno
    config: Arc<Config>,
    /// Sesiones de reproducción por guild
    sessions: Arc<GuildSessions>,
}

impl MusicBot {
    pub fn new(config: Arc<Config>, sessions: Arc<GuildSessions>) -> Self {
        Self { config, sessions }
    }

    /// Registers slash commands with Discord.
    ///
    /// Commands go to a single guild when `GUILD_ID` is set (they show up
    /// almost immediately, handy in development) and globally otherwise.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");
        let max_volume = self.config.max_volume_percent;

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);

                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id, max_volume).await.map_err(|e| {
                    error!("❌ Error registrando comandos de guild: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild.")
                })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx, max_volume).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for MusicBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command_interaction) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// Detects the bot leaving voice without `/stop` (kicked, channel
    /// deleted, moved out by a moderator) and tears the guild session down.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || new.channel_id.is_some() {
            return;
        }

        let previous_channel = old.and_then(|state| state.channel_id);
        if let (Some(channel_id), Some(guild_id)) = (previous_channel, new.guild_id) {
            self.sessions.voice_disconnected(guild_id, channel_id).await;
        }
    }
}
