//! Registro de lo que está sonando, para poder reanudar tras una edición.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::path::PathBuf;

use crate::audio::descriptor::SpeedPercent;

/// Lo que el usuario pidió originalmente.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayRequest {
    /// Un comando por nombre.
    Named(String),
    /// `random` sobre todos los descriptores.
    Random,
    /// El archivo ambiental configurado.
    DefaultFile,
    /// No cambiar lo que está asignado (reanuda si está en pausa).
    KeepCurrent,
}

impl PlayRequest {
    /// Identificador para el log de auditoría.
    pub fn audit_label(&self) -> &str {
        match self {
            PlayRequest::Named(name) => name,
            PlayRequest::Random => "random",
            PlayRequest::DefaultFile => "default",
            PlayRequest::KeepCurrent => "None",
        }
    }
}

/// Quién pidió la reproducción.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub id: UserId,
    pub name: String,
}

/// Información de la reproducción actual de una guild.
///
/// `started_at` no es el instante real de arranque: se corre hacia atrás
/// según el offset de inicio, de modo que `resume_offset` siempre da la
/// posición dentro del archivo a velocidad normal.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayRecord {
    pub guild: GuildId,
    pub channel: ChannelId,
    pub requester: Requester,
    pub descriptor_name: Option<String>,
    pub original_request: PlayRequest,
    pub resolved_file: PathBuf,
    pub started_at: DateTime<Utc>,
    pub speed_at_start: SpeedPercent,
}

impl ReplayRecord {
    /// Crea el registro para un stream que arranca en `now` desde
    /// `start_offset` segundos (a velocidad normal).
    #[allow(clippy::too_many_arguments)]
    pub fn started(
        guild: GuildId,
        channel: ChannelId,
        requester: Requester,
        descriptor_name: Option<String>,
        original_request: PlayRequest,
        resolved_file: PathBuf,
        speed: SpeedPercent,
        start_offset: f64,
        now: DateTime<Utc>,
    ) -> Self {
        let backdate = seconds(start_offset * speed.factor());
        Self {
            guild,
            channel,
            requester,
            descriptor_name,
            original_request,
            resolved_file,
            started_at: now - backdate,
            speed_at_start: speed,
        }
    }

    /// Offset a velocidad normal desde donde reanudar en `now`:
    /// `transcurrido / (velocidad/100)`.
    pub fn resume_offset(&self, now: DateTime<Utc>) -> f64 {
        let elapsed = (now - self.started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        elapsed / self.speed_at_start.factor()
    }
}

fn seconds(value: f64) -> ChronoDuration {
    ChronoDuration::milliseconds((value * 1000.0).round() as i64)
}
