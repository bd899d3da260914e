use anyhow::Result;
use serenity::{
    builder::EditInteractionResponse,
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::{info, warn};

use crate::{
    bot::MusicBot,
    error::{PlaybackError, PlaybackResult},
    sources::Locator,
    ui::embeds,
};

/// Maneja comandos slash.
///
/// Every command defers an ephemeral reply first and then edits it with the
/// outcome, errors included.
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &MusicBot,
) -> Result<()> {
    command.defer_ephemeral(&ctx.http).await?;

    let Some(guild_id) = command.guild_id else {
        command
            .edit_response(
                &ctx.http,
                EditInteractionResponse::new().content("❌ Este comando sólo funciona en servidores"),
            )
            .await?;
        return Ok(());
    };

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    let outcome = match command.data.name.as_str() {
        "join" => handle_join(ctx, &command, guild_id, bot).await,
        "play" => handle_play(ctx, &command, guild_id, bot).await,
        "queue" => handle_queue(guild_id, bot).await,
        "skip" => handle_skip(guild_id, bot).await,
        "nowplaying" => handle_nowplaying(guild_id, bot).await,
        "volume" => handle_volume(&command, guild_id, bot).await,
        "stop" => handle_stop(guild_id, bot).await,
        "ping" => Ok(EditInteractionResponse::new().content(format!(
            "🏓 Pong! ({} sesiones activas)",
            bot.sessions.active_sessions()
        ))),
        _ => Ok(EditInteractionResponse::new().content("❌ Comando no reconocido")),
    };

    let response = outcome.unwrap_or_else(|e| {
        warn!("Comando /{} falló en guild {}: {}", command.data.name, guild_id, e);
        EditInteractionResponse::new()
            .embed(embeds::create_error_embed("No se pudo completar", &e.to_string()))
    });

    command.edit_response(&ctx.http, response).await?;

    Ok(())
}

async fn handle_join(
    ctx: &Context,
    command: &CommandInteraction,
    guild_id: GuildId,
    bot: &MusicBot,
) -> PlaybackResult<EditInteractionResponse> {
    let requested = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "channel")
        .and_then(|opt| opt.value.as_channel_id());

    let channel_id = requested
        .or_else(|| get_user_voice_channel(ctx, guild_id, command.user.id))
        .ok_or(PlaybackError::NotConnected)?;

    bot.sessions.join(guild_id, channel_id).await?;

    Ok(EditInteractionResponse::new().content(format!("🔊 Conectado a <#{}>", channel_id)))
}

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    guild_id: GuildId,
    bot: &MusicBot,
) -> PlaybackResult<EditInteractionResponse> {
    let query = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "query")
        .and_then(|opt| opt.value.as_str())
        .unwrap_or_default();
    let locator = Locator::parse(query)?;

    // Sólo se usa si el bot todavía no está conectado
    let voice_channel = get_user_voice_channel(ctx, guild_id, command.user.id);

    let position = bot
        .sessions
        .enqueue(guild_id, locator.clone(), voice_channel, Some(command.channel_id))
        .await?;

    let embed = if position == 0 {
        embeds::create_success_embed("Empezando", &format!("`{}`", locator))
    } else {
        embeds::create_success_embed(
            "Canción Agregada",
            &format!("`{}` está en la posición {} de la cola", locator, position),
        )
    };

    Ok(EditInteractionResponse::new().embed(embed))
}

async fn handle_queue(guild_id: GuildId, bot: &MusicBot) -> PlaybackResult<EditInteractionResponse> {
    let current = bot.sessions.now_playing(guild_id).await;
    let pending = bot.sessions.peek_queue(guild_id).await;

    let embed = embeds::create_queue_embed(current.as_ref(), &pending);
    Ok(EditInteractionResponse::new().embed(embed))
}

async fn handle_skip(guild_id: GuildId, bot: &MusicBot) -> PlaybackResult<EditInteractionResponse> {
    let skipped = bot.sessions.skip(guild_id).await?;

    Ok(EditInteractionResponse::new().content(format!("⏭️ Saltada: **{}**", skipped)))
}

async fn handle_nowplaying(
    guild_id: GuildId,
    bot: &MusicBot,
) -> PlaybackResult<EditInteractionResponse> {
    let info = bot
        .sessions
        .now_playing(guild_id)
        .await
        .ok_or(PlaybackError::NoActiveTrack)?;

    Ok(EditInteractionResponse::new().embed(embeds::create_now_playing_embed(&info)))
}

async fn handle_volume(
    command: &CommandInteraction,
    guild_id: GuildId,
    bot: &MusicBot,
) -> PlaybackResult<EditInteractionResponse> {
    let level = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "level")
        .and_then(|opt| opt.value.as_i64())
        .unwrap_or(100)
        .clamp(0, u32::MAX as i64) as u32;

    let applied = bot.sessions.set_volume(guild_id, level).await?;

    let message = if applied == level {
        format!("🔊 Volumen ajustado a {}%", applied)
    } else {
        format!("🔊 Volumen ajustado a {}% (pediste {}%)", applied, level)
    };
    Ok(EditInteractionResponse::new().content(message))
}

async fn handle_stop(guild_id: GuildId, bot: &MusicBot) -> PlaybackResult<EditInteractionResponse> {
    bot.sessions.stop(guild_id).await;

    Ok(EditInteractionResponse::new().embed(embeds::create_info_embed(
        "Detenido",
        "⏹️ Reproducción detenida, cola limpiada y bot desconectado",
    )))
}

/// Canal de voz del usuario según la caché. `None` si no está en ninguno.
fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;

    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}
