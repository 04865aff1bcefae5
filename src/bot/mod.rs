//! # Bot Module
//!
//! Capa de Discord del bot: eventos de serenity, comandos de chat y la
//! conexión de voz sobre songbird.
//!
//! ## Architecture
//!
//! [`EspionageBot`] implementa el [`EventHandler`] de serenity y traduce
//! cada evento en llamadas al motor de reproducción:
//!
//! - Mensajes con prefijo → [`commands::parse`] y [`handlers::execute`]
//! - Cambios de estado de voz → [`voice_events::classify`], y de ahí al
//!   motor o al [`OccupancyScheduler`]
//!
//! La cache y el cliente HTTP recién existen una vez construido el
//! cliente; [`Gateway`] los guarda para la capa de voz.

use serenity::{
    all::{Context, EditMember, EventHandler, GuildId, Message, Ready, VoiceState},
    async_trait,
    cache::Cache,
    http::Http,
};
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod handlers;
pub mod nickname;
pub mod presence;
pub mod transport;
pub mod voice_events;

use crate::{
    audio::{
        edits::Editor,
        ledger::{PlayRequest, Requester},
        occupancy::OccupancyScheduler,
        renderer::FfmpegRenderer,
        session::PlaybackEngine,
        transport::VoiceTransport,
    },
    bot::{
        commands::BotCommand,
        handlers::Invocation,
        presence::{count_humans, GuildPresence},
        transport::SongbirdTransport,
        voice_events::{classify, VoiceAction, VoiceTransition},
    },
    config::Config,
    error::PlaybackError,
};

/// Motor de reproducción sobre Discord.
pub type Engine = PlaybackEngine<SongbirdTransport, FfmpegRenderer>;

/// Límite de Discord por mensaje, con margen.
const MESSAGE_LIMIT: usize = 1900;

/// Cache y HTTP de serenity, disponibles tras construir el cliente.
#[derive(Default)]
pub struct Gateway {
    http: OnceLock<Arc<Http>>,
    cache: OnceLock<Arc<Cache>>,
}

impl Gateway {
    pub fn attach(&self, http: Arc<Http>, cache: Arc<Cache>) {
        let fresh = self.http.set(http).is_ok() & self.cache.set(cache).is_ok();
        if !fresh {
            debug!("🔗 Gateway ya inicializado");
        }
    }

    pub fn http(&self) -> Option<&Arc<Http>> {
        self.http.get()
    }

    pub fn cache(&self) -> Option<&Arc<Cache>> {
        self.cache.get()
    }
}

/// Handler de eventos del bot.
///
/// Todo el estado de reproducción vive en el motor; el handler solo lee la
/// cache para armar pedidos y despacharlos.
pub struct EspionageBot {
    config: Arc<Config>,
    engine: Arc<Engine>,
    scheduler: Arc<OccupancyScheduler<GuildPresence>>,
}

impl EspionageBot {
    pub fn new(
        config: Arc<Config>,
        engine: Arc<Engine>,
        scheduler: Arc<OccupancyScheduler<GuildPresence>>,
    ) -> Self {
        Self {
            config,
            engine,
            scheduler,
        }
    }

    fn invocation(&self, ctx: &Context, guild: GuildId, msg: &Message) -> Invocation {
        let voice_channel = ctx.cache.guild(guild).and_then(|g| {
            g.voice_states
                .get(&msg.author.id)
                .and_then(|state| state.channel_id)
        });
        let name = msg
            .member
            .as_ref()
            .and_then(|member| member.nick.clone())
            .unwrap_or_else(|| msg.author.name.clone());

        Invocation {
            guild,
            requester: Requester {
                id: msg.author.id,
                name,
            },
            voice_channel,
            editor: Editor {
                user_id: msg.author.id.get(),
                is_admin: self.config.is_admin(msg.author.id.get()),
            },
        }
    }

    async fn dispatch(&self, ctx: &Context, guild: GuildId, action: VoiceAction, requester: Requester) {
        debug!("🎙️ Guild {}: {:?}", guild, action);
        match action {
            VoiceAction::BotDisconnected => {
                self.scheduler.forget_guild(guild);
                self.engine.disconnected(guild);
            }
            VoiceAction::LeaveAlone => {
                info!("🚪 El bot quedó solo en guild {}", guild);
                if let Err(e) = self.engine.leave(guild).await {
                    warn!("🚪 Guild {}: {}", guild, e);
                }
            }
            VoiceAction::Occupied { channel, from } => {
                if self.config.enable_auto_join {
                    self.scheduler.channel_occupied(guild, channel, from, requester);
                }
            }
            VoiceAction::Nudge { channel } => {
                if let Err(e) = self
                    .engine
                    .play(guild, channel, requester, PlayRequest::KeepCurrent)
                    .await
                {
                    warn!("▶️ Reanudación fallida en guild {}: {}", guild, e);
                }
            }
            VoiceAction::Crowded { channel } => self.scheduler.channel_crowded(guild, channel).await,
            VoiceAction::JoinedAfk { channel } => {
                // Sin conexión arranca el ambiental; si no, sigue lo asignado
                let request = match self.engine.transport().current_channel(guild) {
                    None => PlayRequest::DefaultFile,
                    Some(_) => PlayRequest::KeepCurrent,
                };
                info!("💤 Siguiendo a {} al canal AFK en guild {}", requester.name, guild);
                if let Err(e) = self.engine.play(guild, channel, requester, request).await {
                    warn!("💤 Guild {}: {}", guild, e);
                }
            }
            VoiceAction::Unmute => {
                let bot_id = ctx.cache.current_user().id;
                if let Err(e) = guild
                    .edit_member(ctx, bot_id, EditMember::new().mute(false))
                    .await
                {
                    warn!("🔇 No se pudo desilenciar al bot en guild {}: {}", guild, e);
                }
            }
        }
    }
}

#[async_trait]
impl EventHandler for EspionageBot {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("🕵️ {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let Some(guild) = msg.guild_id else {
            return;
        };
        let Some(parsed) = commands::parse(&self.config.command_prefix, &msg.content) else {
            return;
        };

        let result = match parsed {
            Ok(command) => {
                let is_play = matches!(command, BotCommand::Play(_));
                let invocation = self.invocation(&ctx, guild, &msg);
                match handlers::execute(&self.engine, &invocation, command).await {
                    // Cualquier palabra con prefijo parece un comando
                    Err(PlaybackError::UnknownCommand(name)) if is_play => {
                        debug!("❔ Comando desconocido `{}` en guild {}", name, guild);
                        return;
                    }
                    other => other,
                }
            }
            Err(e) => Err(e),
        };

        let reply = match result {
            Ok(Some(reply)) => reply,
            Ok(None) => return,
            Err(e) if e.is_user_facing() => format!("❌ {e}"),
            Err(e) => {
                error!("Error ejecutando comando en guild {}: {:?}", guild, e);
                "❌ Error interno, revisá los logs".to_string()
            }
        };

        for chunk in commands::split_reply(&reply, MESSAGE_LIMIT) {
            if let Err(e) = msg.channel_id.say(&ctx.http, chunk).await {
                warn!("💬 No se pudo responder en guild {}: {}", guild, e);
                break;
            }
        }
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild) = new.guild_id else {
            return;
        };
        let is_self = new.user_id == ctx.cache.current_user().id;
        if is_self {
            self.engine.transport().bot_moved(guild, new.channel_id);
        } else if new.member.as_ref().is_some_and(|member| member.user.bot) {
            return;
        }

        let afk_channel = ctx
            .cache
            .guild(guild)
            .and_then(|g| g.afk_metadata.as_ref().map(|afk| afk.afk_channel_id));
        let transition = VoiceTransition {
            is_self,
            old_channel: old.and_then(|state| state.channel_id),
            new_channel: new.channel_id,
            afk_channel,
            muted: new.mute,
        };
        let bot_channel = self.engine.transport().current_channel(guild);
        let actions = classify(transition, bot_channel, |channel| {
            count_humans(&ctx.cache, guild, channel)
        });

        let requester = Requester {
            id: new.user_id,
            name: new
                .member
                .as_ref()
                .map(|member| member.display_name().to_string())
                .unwrap_or_else(|| new.user_id.to_string()),
        };
        for action in actions {
            self.dispatch(&ctx, guild, action, requester.clone()).await;
        }
    }
}
