//! Costura hacia la conexión de voz.
//!
//! La sesión solo conoce esta superficie; la implementación real vive en
//! `bot::transport` sobre songbird.

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::debug;

use crate::{audio::session::SessionCommand, error::TransportError};

/// Aviso de fin de pista hacia el actor de la guild.
///
/// Lleva la generación del stream que lo creó; el actor descarta avisos de
/// generaciones viejas. `detach` lo desactiva antes de un `stop` deliberado.
#[derive(Debug, Clone)]
pub struct CompletionHook {
    guild: GuildId,
    generation: u64,
    detached: Arc<AtomicBool>,
    mailbox: flume::Sender<SessionCommand>,
}

impl CompletionHook {
    pub fn new(guild: GuildId, generation: u64, mailbox: flume::Sender<SessionCommand>) -> Self {
        Self {
            guild,
            generation,
            detached: Arc::new(AtomicBool::new(false)),
            mailbox,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    /// Notifica el fin de la pista, salvo que el hook esté desactivado.
    pub fn fire(&self) {
        if self.is_detached() {
            debug!("🔕 Fin de pista ignorado en guild {} (hook desactivado)", self.guild);
            return;
        }
        // El actor puede haber terminado con el runtime
        let _ = self.mailbox.send(SessionCommand::Finished {
            generation: self.generation,
        });
    }
}

/// Capacidades de voz que consume la sesión. Los fallos se degradan a
/// no-ops en el llamador.
#[async_trait]
pub trait VoiceTransport: Send + Sync + 'static {
    type Stream: Send + 'static;

    async fn connect(&self, guild: GuildId, channel: ChannelId) -> Result<(), TransportError>;

    async fn move_to(&self, guild: GuildId, channel: ChannelId) -> Result<(), TransportError>;

    async fn disconnect(&self, guild: GuildId) -> Result<(), TransportError>;

    /// Canal donde está conectado el bot, si lo está.
    fn current_channel(&self, guild: GuildId) -> Option<ChannelId>;

    async fn is_playing(&self, guild: GuildId) -> bool;

    async fn is_paused(&self, guild: GuildId) -> bool;

    /// Reproduce `stream`; `hook` se dispara cuando termina o falla.
    async fn play(
        &self,
        guild: GuildId,
        stream: Self::Stream,
        hook: CompletionHook,
    ) -> Result<(), TransportError>;

    fn pause(&self, guild: GuildId) -> Result<(), TransportError>;

    fn resume(&self, guild: GuildId) -> Result<(), TransportError>;

    /// Detiene la pista actual sin disparar su hook.
    fn stop(&self, guild: GuildId);

    /// `Some("!nombre")` mientras suena un comando, `None` para volver al
    /// nombre base.
    async fn set_nickname(&self, guild: GuildId, label: Option<String>);
}
