//! Registro de auditoría de reproducciones (CSV separado por `;`).

use chrono::{DateTime, Utc};
use serenity::model::id::GuildId;
use std::path::{Path, PathBuf};
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::Mutex};
use tracing::warn;

use crate::audio::{
    descriptor::SpeedPercent,
    ledger::{PlayRequest, Requester},
};

/// Una línea del log.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub guild: GuildId,
    pub requester: Requester,
    pub request: PlayRequest,
    /// Ruta relativa al directorio de uploads.
    pub file: String,
    pub speed: SpeedPercent,
}

impl AuditEntry {
    pub fn to_line(&self) -> String {
        let sanitize = |s: &str| s.replace([';', '\n', '\r'], " ");
        format!(
            "{};{};{};{};{};{};{}\n",
            self.at.timestamp(),
            self.guild,
            self.requester.id,
            sanitize(&self.requester.name),
            sanitize(self.request.audit_label()),
            sanitize(&self.file),
            self.speed,
        )
    }
}

/// Log de auditoría opcional. Sin ruta configurada no escribe nada.
#[derive(Debug, Default)]
pub struct AuditLog {
    path: Option<PathBuf>,
    gate: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            gate: Mutex::new(()),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    /// Agrega una línea. Los errores de escritura se loguean y se ignoran.
    pub async fn append(&self, entry: &AuditEntry) {
        let Some(path) = &self.path else {
            return;
        };

        let _guard = self.gate.lock().await;
        if let Err(e) = write_line(path, &entry.to_line()).await {
            warn!("📝 No se pudo escribir el log de auditoría {}: {}", path.display(), e);
        }
    }
}

async fn write_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}
