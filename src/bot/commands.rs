use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, channel::ChannelType, id::GuildId},
    prelude::Context,
};

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context, max_volume_percent: u32) -> Result<()> {
    for command in all_commands(max_volume_percent) {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(
    ctx: &Context,
    guild_id: GuildId,
    max_volume_percent: u32,
) -> Result<()> {
    guild_id
        .set_commands(&ctx.http, all_commands(max_volume_percent))
        .await?;

    Ok(())
}

/// `max_volume_percent` es el mismo límite con el que la sesión recorta el volumen.
fn all_commands(max_volume_percent: u32) -> Vec<CreateCommand> {
    vec![
        join_command(),
        play_command(),
        queue_command(),
        skip_command(),
        nowplaying_command(),
        volume_command(max_volume_percent),
        stop_command(),
        ping_command(),
    ]
}

fn join_command() -> CreateCommand {
    CreateCommand::new("join")
        .description("Conecta el bot a un canal de voz")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Channel,
                "channel",
                "Canal de voz (por defecto, el tuyo)",
            )
            .channel_types(vec![ChannelType::Voice, ChannelType::Stage]),
        )
}

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Reproduce una canción o la agrega a la cola")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "query",
                "URL o término de búsqueda",
            )
            .required(true),
        )
}

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue").description("Muestra la cola de reproducción")
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Salta a la siguiente canción")
}

fn nowplaying_command() -> CreateCommand {
    CreateCommand::new("nowplaying").description("Muestra la canción actual")
}

fn volume_command(max_volume_percent: u32) -> CreateCommand {
    CreateCommand::new("volume")
        .description("Ajusta el volumen de la canción actual y las siguientes")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Integer,
                "level",
                format!("Nivel de volumen en porcentaje (0-{})", max_volume_percent),
            )
            .required(true)
            .min_int_value(0)
            .max_int_value(max_volume_percent as u64),
        )
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Detiene la reproducción, limpia la cola y sale del canal")
}

fn ping_command() -> CreateCommand {
    CreateCommand::new("ping").description("Comprueba que el bot responde")
}
