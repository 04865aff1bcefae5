//! Ocupación de canales leída de la cache de serenity.

use async_trait::async_trait;
use serenity::{
    cache::Cache,
    model::id::{ChannelId, GuildId},
};
use std::sync::Arc;
use tracing::warn;

use crate::{
    audio::{
        ledger::Requester, occupancy::OccupancyProbe, session::ResolveOutcome,
        transport::VoiceTransport,
    },
    bot::{Engine, Gateway},
};

/// Miembros que no son bots conectados a `channel`.
pub fn count_humans(cache: &Cache, guild: GuildId, channel: ChannelId) -> usize {
    let Some(guild) = cache.guild(guild) else {
        return 0;
    };
    guild
        .voice_states
        .values()
        .filter(|state| state.channel_id == Some(channel))
        .filter(|state| {
            let is_bot = state
                .member
                .as_ref()
                .map(|member| member.user.bot)
                .or_else(|| guild.members.get(&state.user_id).map(|member| member.user.bot))
                .unwrap_or(false);
            !is_bot
        })
        .count()
}

pub struct GuildPresence {
    gateway: Arc<Gateway>,
    engine: Arc<Engine>,
}

impl GuildPresence {
    pub fn new(gateway: Arc<Gateway>, engine: Arc<Engine>) -> Self {
        Self { gateway, engine }
    }
}

#[async_trait]
impl OccupancyProbe for GuildPresence {
    fn occupants(&self, guild: GuildId, channel: ChannelId) -> usize {
        self.gateway
            .cache()
            .map_or(0, |cache| count_humans(cache, guild, channel))
    }

    fn bot_channel(&self, guild: GuildId) -> Option<ChannelId> {
        self.engine.transport().current_channel(guild)
    }

    async fn auto_join(&self, guild: GuildId, channel: ChannelId, requester: Requester) -> bool {
        match self.engine.auto_join(guild, channel, requester).await {
            Ok(ResolveOutcome::Started { .. }) => true,
            Ok(_) => false,
            Err(e) => {
                warn!("🕵️ Entrada automática fallida en guild {}: {}", guild, e);
                false
            }
        }
    }

    async fn auto_leave(&self, guild: GuildId) {
        if let Err(e) = self.engine.leave(guild).await {
            warn!("🚪 Salida automática fallida en guild {}: {}", guild, e);
        }
    }
}
