//! Errores del dominio de reproducción.
//!
//! Los errores de usuario se devuelven al autor del comando y nunca mutan
//! estado; los de transporte se degradan a no-ops en la sesión.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlaybackError {
    /// Porcentaje mal formado, velocidad fuera de rango, filtro ilegal...
    #[error("{0}")]
    UserInput(String),

    #[error("El comando `{0}` no existe")]
    UnknownCommand(String),

    #[error("El SoundFont `{0}` no existe")]
    UnknownSoundfont(String),

    #[error("El archivo ya no existe: {}", .0.display())]
    ResourceMissing(PathBuf),

    #[error("Renderizador no disponible: {0}")]
    RendererUnavailable(String),

    #[error("Solo el autor de `{name}` o un administrador puede modificarlo")]
    PermissionDenied { name: String },

    #[error("Error de almacenamiento: {0}")]
    Storage(#[from] anyhow::Error),

    #[error("La sesión de la guild {0} no está disponible")]
    SessionClosed(serenity::model::id::GuildId),
}

impl PlaybackError {
    pub fn user_input(message: impl Into<String>) -> Self {
        Self::UserInput(message.into())
    }

    /// Errores que se reportan al usuario tal cual.
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, Self::Storage(_) | Self::SessionClosed(_))
    }
}

/// Fallos de la conexión de voz. La sesión los trata como no-ops.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("No hay conexión de voz en la guild")]
    NotConnected,

    #[error("No se pudo conectar al canal de voz: {0}")]
    Join(String),

    #[error("No se pudo reproducir: {0}")]
    Play(String),
}

/// Fallos al lanzar el proceso de renderizado externo.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Ejecutable `{program}` no disponible: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Reproducción MIDI deshabilitada")]
    MidiDisabled,

    #[error("No hay SoundFonts disponibles")]
    NoSoundfont,
}

impl From<RenderError> for PlaybackError {
    fn from(err: RenderError) -> Self {
        PlaybackError::RendererUnavailable(err.to_string())
    }
}
