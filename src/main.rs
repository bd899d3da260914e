use anyhow::Result;
use serenity::{
    http::Http,
    model::{gateway::GatewayIntents, id::ApplicationId},
    Client,
};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info};

mod audio;
mod bot;
mod config;
mod error;
mod sources;
mod ui;

use crate::audio::{GuildSessions, SessionDeps, SessionSettings, SongbirdVoice};
use crate::bot::{ChannelNotifier, MusicBot};
use crate::config::Config;
use crate::sources::YtDlpResolver;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guild_jukebox=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Guild Jukebox v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    // Sólo hacen falta servidores y estados de voz: todo entra por slash commands
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let songbird = Songbird::serenity();
    let http = Arc::new(Http::new(&config.discord_token));

    let deps = SessionDeps {
        resolver: Arc::new(YtDlpResolver::new(&config)),
        voice: Arc::new(SongbirdVoice::new(songbird.clone(), reqwest::Client::new())),
        notifier: Arc::new(ChannelNotifier::new(http)),
        settings: SessionSettings::from(config.as_ref()),
    };
    let sessions = Arc::new(GuildSessions::new(deps));

    let handler = MusicBot::new(config.clone(), sessions.clone());

    let mut builder = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird);

    // Sin APPLICATION_ID, serenity lo obtiene de Discord al arrancar
    if let Some(application_id) = config.application_id {
        builder = builder.application_id(ApplicationId::new(application_id));
    }

    let mut client = builder.await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        sessions.shutdown().await;
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

/// Comprueba que el backend de extracción se puede ejecutar.
async fn health_check(config: &Config) -> Result<()> {
    let yt_dlp = async_process::Command::new(&config.ytdlp_path)
        .arg("--version")
        .output()
        .await?;

    if yt_dlp.status.success() {
        println!("OK yt-dlp {}", String::from_utf8_lossy(&yt_dlp.stdout).trim());
        Ok(())
    } else {
        anyhow::bail!("yt-dlp no responde en {}", config.ytdlp_path);
    }
}
