use thiserror::Error;

/// Errores del núcleo de reproducción.
///
/// Los errores locales a una canción (`Resolution`, `Sink`) nunca detienen la
/// sesión: la cola avanza sola. Los errores de sesión (`VoiceConnect`,
/// `NotConnected`, `NoActiveTrack`) se devuelven al llamador sin cambiar el
/// estado.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("no se pudo resolver la canción: {0}")]
    Resolution(String),

    #[error("no se pudo conectar al canal de voz: {0}")]
    VoiceConnect(String),

    #[error("el bot no está conectado y no estás en un canal de voz")]
    NotConnected,

    #[error("no hay nada reproduciéndose")]
    NoActiveTrack,

    #[error("error de reproducción: {0}")]
    Sink(String),

    #[error("búsqueda inválida: {0}")]
    InvalidLocator(String),

    #[error("la sesión de reproducción ya terminó")]
    SessionClosed,
}

pub type PlaybackResult<T> = std::result::Result<T, PlaybackError>;
