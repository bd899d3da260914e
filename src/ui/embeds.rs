use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::{
    audio::{NowPlayingInfo, PlaybackEvent},
    sources::Locator,
};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Guild Jukebox";

/// Máximo de canciones pendientes listadas en `/queue`
const QUEUE_PAGE_SIZE: usize = 10;

/// Crea un embed para mostrar la canción actual
pub fn create_now_playing_embed(info: &NowPlayingInfo) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("🎵 Reproduciendo Ahora")
        .description(format!("**{}**", info.title))
        .color(colors::SUCCESS_GREEN);

    embed = match info.duration {
        Some(duration) => embed.field("⏱️ Duración", format_duration(duration), true),
        None => embed.field("⏱️ Duración", "🔴 En vivo", true),
    };

    embed = embed
        .field("🔊 Volumen", format!("{}%", info.volume_percent), true)
        .field("🔎 Pedido", format!("`{}`", info.locator), false);

    if let Some(thumbnail) = &info.thumbnail {
        embed = embed.thumbnail(thumbnail);
    }

    if let Some(page_url) = &info.page_url {
        embed = embed.url(page_url);
    }

    let started_at = Timestamp::from_unix_timestamp(info.started_at.timestamp())
        .unwrap_or_else(|_| Timestamp::now());

    embed
        .timestamp(started_at)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed con la canción actual y las pendientes en orden
pub fn create_queue_embed(current: Option<&NowPlayingInfo>, pending: &[Locator]) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .color(colors::MUSIC_PURPLE);

    embed = match current {
        Some(info) => embed.field("▶️ Sonando", format!("**{}**", info.title), false),
        None => embed.field("▶️ Sonando", "Nada", false),
    };

    let description = if pending.is_empty() {
        "La cola está vacía".to_string()
    } else {
        queue_lines(pending, QUEUE_PAGE_SIZE)
    };

    embed
        .description(description)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(format!(
            "{} • {} en cola",
            STANDARD_FOOTER,
            pending.len()
        )))
}

/// Crea el anuncio que se publica en el canal de texto de la sesión
pub fn create_event_embed(event: &PlaybackEvent) -> CreateEmbed {
    let embed = match event {
        PlaybackEvent::NowPlaying {
            title,
            page_url,
            duration,
        } => {
            let mut embed = CreateEmbed::default()
                .title("🎵 Reproduciendo Ahora")
                .description(format!("**{}**", title))
                .color(colors::SUCCESS_GREEN);

            if let Some(duration) = duration {
                embed = embed.field("⏱️ Duración", format_duration(*duration), true);
            }
            if let Some(page_url) = page_url {
                embed = embed.url(page_url);
            }
            embed
        }
        PlaybackEvent::TrackFailed { locator, reason } => CreateEmbed::default()
            .title("❌ No se pudo reproducir")
            .description(format!("`{}`\n{}", locator, reason))
            .color(colors::ERROR_RED),
        PlaybackEvent::QueueFinished => CreateEmbed::default()
            .title("✅ Cola terminada")
            .description("No quedan canciones. Usa `/play` para seguir escuchando.")
            .color(colors::NEUTRAL_GRAY),
    };

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de error
pub fn create_error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de éxito
pub fn create_success_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("✅ {}", title))
        .description(description)
        .color(colors::SUCCESS_GREEN)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de información
pub fn create_info_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("ℹ️ {}", title))
        .description(description)
        .color(colors::INFO_BLUE)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Lista numerada de pendientes, con un resumen de las que no caben
fn queue_lines(pending: &[Locator], limit: usize) -> String {
    let mut lines: Vec<String> = pending
        .iter()
        .take(limit)
        .enumerate()
        .map(|(i, locator)| format!("`{}.` {}", i + 1, locator))
        .collect();

    if pending.len() > limit {
        lines.push(format!("... y {} más", pending.len() - limit));
    }

    lines.join("\n")
}

/// Formatea una duración en formato legible
fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
