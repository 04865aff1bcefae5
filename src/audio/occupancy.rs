//! Temporizadores de entrada y salida automática según la ocupación de los
//! canales de voz.

use async_trait::async_trait;
use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::audio::ledger::Requester;

/// Lo que el scheduler necesita saber y hacer sobre la guild.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OccupancyProbe: Send + Sync + 'static {
    /// Miembros conectados al canal sin contar al bot.
    fn occupants(&self, guild: GuildId, channel: ChannelId) -> usize;

    fn bot_channel(&self, guild: GuildId) -> Option<ChannelId>;

    /// Entra al canal con el archivo ambiental. `true` si empezó a sonar.
    async fn auto_join(&self, guild: GuildId, channel: ChannelId, requester: Requester) -> bool;

    async fn auto_leave(&self, guild: GuildId);
}

#[derive(Debug)]
struct PendingTimer {
    id: u64,
    token: CancellationToken,
}

pub struct OccupancyScheduler<P> {
    probe: Arc<P>,
    fresh_delay: Duration,
    move_delay: Duration,
    timers: Arc<DashMap<ChannelId, PendingTimer>>,
    auto_joined: Arc<DashMap<ChannelId, GuildId>>,
    next_id: AtomicU64,
}

impl<P: OccupancyProbe> OccupancyScheduler<P> {
    pub fn new(probe: Arc<P>, fresh_delay: Duration, move_delay: Duration) -> Self {
        Self {
            probe,
            fresh_delay,
            move_delay,
            timers: Arc::new(DashMap::new()),
            auto_joined: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Un único miembro quedó en `channel`. Reemplaza cualquier timer del
    /// canal y del canal de origen.
    pub fn channel_occupied(
        &self,
        guild: GuildId,
        channel: ChannelId,
        from: Option<ChannelId>,
        requester: Requester,
    ) {
        self.cancel(channel);
        if let Some(from) = from {
            self.cancel(from);
        }

        let delay = if from.is_some() {
            self.move_delay
        } else {
            self.fresh_delay
        };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        if let Some(previous) = self.timers.insert(
            channel,
            PendingTimer {
                id,
                token: token.clone(),
            },
        ) {
            previous.token.cancel();
        }
        debug!("⏲️ Timer {} para canal {} en {:?}", id, channel, delay);

        let probe = Arc::clone(&self.probe);
        let timers = Arc::clone(&self.timers);
        let auto_joined = Arc::clone(&self.auto_joined);

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("⏲️ Timer {} cancelado", id);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            // Otro timer pudo reemplazar a este justo al despertar
            if timers.remove_if(&channel, |_, timer| timer.id == id).is_none() || token.is_cancelled() {
                debug!("⏲️ Timer {} reemplazado", id);
                return;
            }

            // La ocupación pudo cambiar durante la espera
            if probe.occupants(guild, channel) != 1 {
                debug!("⏲️ Canal {} ya no tiene un solo miembro", channel);
                return;
            }
            if probe.auto_join(guild, channel, requester).await {
                info!("🕵️ Entrada automática en canal {} de guild {}", channel, guild);
                auto_joined.insert(channel, guild);
            }
        });
    }

    /// El canal tiene más de un miembro además del bot.
    pub async fn channel_crowded(&self, guild: GuildId, channel: ChannelId) {
        if self.auto_joined.remove(&channel).is_none() {
            return;
        }
        if self.probe.bot_channel(guild) == Some(channel) {
            info!("🚪 Salida automática del canal {} en guild {}", channel, guild);
            self.probe.auto_leave(guild).await;
        }
    }

    /// Cancela el timer del canal. Idempotente.
    pub fn cancel(&self, channel: ChannelId) {
        if let Some((_, timer)) = self.timers.remove(&channel) {
            timer.token.cancel();
        }
    }

    /// El bot salió de la guild: ningún canal queda marcado como automático.
    pub fn forget_guild(&self, guild: GuildId) {
        self.auto_joined.retain(|_, owner| *owner != guild);
    }

    #[cfg(test)]
    fn is_auto_joined(&self, channel: ChannelId) -> bool {
        self.auto_joined.contains_key(&channel)
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.timers.len()
    }
}
