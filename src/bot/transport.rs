//! Conexión de voz real sobre songbird.

use async_trait::async_trait;
use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::Input,
    tracks::{PlayMode, TrackHandle},
    Event as VoiceEvent, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::{
    audio::transport::{CompletionHook, VoiceTransport},
    bot::{nickname, Gateway},
    error::TransportError,
};

/// Pista activa de una guild junto al hook que avisa su fin.
struct ActiveTrack {
    handle: TrackHandle,
    hook: CompletionHook,
}

pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    gateway: Arc<Gateway>,
    tracks: Arc<DashMap<GuildId, ActiveTrack>>,
    channels: DashMap<GuildId, ChannelId>,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>, gateway: Arc<Gateway>) -> Self {
        Self {
            manager,
            gateway,
            tracks: Arc::new(DashMap::new()),
            channels: DashMap::new(),
        }
    }

    /// El gateway informó el canal del bot (alguien pudo moverlo).
    pub fn bot_moved(&self, guild: GuildId, channel: Option<ChannelId>) {
        match channel {
            Some(channel) => {
                self.channels.insert(guild, channel);
            }
            None => {
                self.channels.remove(&guild);
                if let Some((_, active)) = self.tracks.remove(&guild) {
                    active.hook.detach();
                    if let Err(e) = active.handle.stop() {
                        debug!("⏹️ La pista de guild {} ya había terminado: {}", guild, e);
                    }
                }
            }
        }
    }

    async fn join(&self, guild: GuildId, channel: ChannelId) -> Result<(), TransportError> {
        self.manager
            .join(guild, channel)
            .await
            .map_err(|e| TransportError::Join(e.to_string()))?;
        self.channels.insert(guild, channel);
        Ok(())
    }

    fn handle(&self, guild: GuildId) -> Option<TrackHandle> {
        self.tracks.get(&guild).map(|active| active.handle.clone())
    }

    async fn play_mode(&self, guild: GuildId) -> Option<PlayMode> {
        let handle = self.handle(guild)?;
        handle.get_info().await.ok().map(|state| state.playing)
    }

    fn current_nickname(&self, guild: GuildId) -> Option<String> {
        let cache = self.gateway.cache()?;
        let me = cache.current_user().clone();
        let nick = cache
            .guild(guild)
            .and_then(|g| g.members.get(&me.id).and_then(|m| m.nick.clone()));
        Some(nick.unwrap_or(me.name.clone()))
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    type Stream = Input;

    async fn connect(&self, guild: GuildId, channel: ChannelId) -> Result<(), TransportError> {
        info!("🔊 Conectando a canal {} en guild {}", channel, guild);
        self.join(guild, channel).await
    }

    async fn move_to(&self, guild: GuildId, channel: ChannelId) -> Result<(), TransportError> {
        info!("🔀 Moviendo al canal {} en guild {}", channel, guild);
        self.join(guild, channel).await
    }

    async fn disconnect(&self, guild: GuildId) -> Result<(), TransportError> {
        self.channels.remove(&guild);
        if let Some((_, active)) = self.tracks.remove(&guild) {
            active.hook.detach();
            let _ = active.handle.stop();
        }
        self.manager
            .remove(guild)
            .await
            .map_err(|e| TransportError::Join(e.to_string()))?;
        info!("👋 Desconectado de guild {}", guild);
        Ok(())
    }

    fn current_channel(&self, guild: GuildId) -> Option<ChannelId> {
        self.channels.get(&guild).map(|channel| *channel)
    }

    async fn is_playing(&self, guild: GuildId) -> bool {
        matches!(self.play_mode(guild).await, Some(PlayMode::Play))
    }

    async fn is_paused(&self, guild: GuildId) -> bool {
        matches!(self.play_mode(guild).await, Some(PlayMode::Pause))
    }

    async fn play(
        &self,
        guild: GuildId,
        stream: Input,
        hook: CompletionHook,
    ) -> Result<(), TransportError> {
        let call = self.manager.get(guild).ok_or(TransportError::NotConnected)?;
        let handle = {
            let mut call = call.lock().await;
            call.play_input(stream)
        };

        for event in [TrackEvent::End, TrackEvent::Error] {
            handle
                .add_event(
                    VoiceEvent::Track(event),
                    TrackFinished {
                        guild,
                        hook: hook.clone(),
                        tracks: Arc::clone(&self.tracks),
                    },
                )
                .map_err(|e| TransportError::Play(e.to_string()))?;
        }

        debug!("🎧 Pista generación {} en guild {}", hook.generation(), guild);
        if let Some(previous) = self.tracks.insert(guild, ActiveTrack { handle, hook }) {
            // No debería pasar: la sesión detiene antes de arrancar
            previous.hook.detach();
            let _ = previous.handle.stop();
        }
        Ok(())
    }

    fn pause(&self, guild: GuildId) -> Result<(), TransportError> {
        let handle = self.handle(guild).ok_or(TransportError::NotConnected)?;
        handle.pause().map_err(|e| TransportError::Play(e.to_string()))
    }

    fn resume(&self, guild: GuildId) -> Result<(), TransportError> {
        let handle = self.handle(guild).ok_or(TransportError::NotConnected)?;
        handle.play().map_err(|e| TransportError::Play(e.to_string()))
    }

    fn stop(&self, guild: GuildId) {
        if let Some((_, active)) = self.tracks.remove(&guild) {
            active.hook.detach();
            if let Err(e) = active.handle.stop() {
                debug!("⏹️ La pista de guild {} ya había terminado: {}", guild, e);
            }
        }
    }

    async fn set_nickname(&self, guild: GuildId, label: Option<String>) {
        let (Some(http), Some(current)) = (self.gateway.http(), self.current_nickname(guild)) else {
            debug!("🏷️ Gateway sin inicializar, no se cambia el apodo");
            return;
        };

        let wanted = nickname::compose(&current, label.as_deref());
        if wanted == current {
            return;
        }
        if let Err(e) = guild.edit_nickname(http, Some(wanted.as_str())).await {
            warn!("🏷️ No se pudo cambiar el apodo en guild {}: {}", guild, e);
        }
    }
}

/// Fin o error de pista: libera el handle y avisa al actor una sola vez.
struct TrackFinished {
    guild: GuildId,
    hook: CompletionHook,
    tracks: Arc<DashMap<GuildId, ActiveTrack>>,
}

#[async_trait]
impl VoiceEventHandler for TrackFinished {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        if let EventContext::Track(track_list) = ctx {
            for (state, _handle) in *track_list {
                if let PlayMode::Errored(e) = &state.playing {
                    error!("❌ Error en pista de guild {}: {:?}", self.guild, e);
                }
            }
        }

        let generation = self.hook.generation();
        self.tracks
            .remove_if(&self.guild, |_, active| active.hook.generation() == generation);

        // End y Error pueden llegar ambos para la misma pista
        self.hook.fire();
        self.hook.detach();
        None
    }
}
