//! Ejecución de comandos de chat sobre el motor de reproducción.

use serenity::model::id::{ChannelId, GuildId};
use tracing::debug;

use crate::{
    audio::{
        edits::{self, Editor},
        filters::{EqPresets, FilterEntry},
        ledger::{PlayRequest, Requester},
        renderer::Renderer,
        session::{PlaybackEngine, ResolveOutcome},
        transport::VoiceTransport,
    },
    bot::commands::{BotCommand, EqCommand},
    error::PlaybackError,
};

/// Quién mandó el comando y desde dónde.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub guild: GuildId,
    pub requester: Requester,
    /// Canal de voz del autor, si está en alguno.
    pub voice_channel: Option<ChannelId>,
    pub editor: Editor,
}

/// Ejecuta un comando. `None` cuando no hace falta responder.
pub async fn execute<T, R>(
    engine: &PlaybackEngine<T, R>,
    invocation: &Invocation,
    command: BotCommand,
) -> Result<Option<String>, PlaybackError>
where
    T: VoiceTransport,
    R: Renderer<Stream = T::Stream>,
{
    let guild = invocation.guild;
    debug!("💬 {:?} de {} en guild {}", command, invocation.requester.name, guild);

    match command {
        BotCommand::Play(name) => play(engine, invocation, PlayRequest::Named(name)).await,
        BotCommand::Random => play(engine, invocation, PlayRequest::Random).await,
        BotCommand::Leave => {
            engine.leave(guild).await?;
            Ok(None)
        }
        BotCommand::Rewind => match engine.reload(guild, true).await? {
            ResolveOutcome::NotConnected | ResolveOutcome::Unchanged => {
                Ok(Some("No hay nada sonando".to_string()))
            }
            outcome => Ok(describe(&outcome)),
        },
        BotCommand::Loop(name) => {
            let enabled = edits::toggle_loop(engine.store(), &name).await?;
            let state = if enabled { "activado" } else { "desactivado" };
            Ok(Some(format!("🔁 Loop de `!{name}` {state}")))
        }
        BotCommand::Speed { name, value } => {
            let name = target_name(engine, guild, name).await?;
            let speed = edits::set_speed(engine, guild, &name, &value).await?;
            Ok(Some(format!("⏩ `!{name}` a {speed}")))
        }
        BotCommand::Soundfont {
            name,
            soundfont: Some(soundfont),
        } => {
            let name = target_name(engine, guild, name).await?;
            edits::set_soundfont(engine, guild, &name, &soundfont).await?;
            Ok(Some(format!("🎹 `!{name}` usa el SoundFont `{soundfont}`")))
        }
        BotCommand::Soundfont { soundfont: None, .. } => Ok(Some(list_soundfonts(engine))),
        BotCommand::Eq(eq) => equalizer(engine, guild, eq).await,
        BotCommand::Description { name, text } => {
            edits::set_description(engine.store(), &name, &text, invocation.editor).await?;
            Ok(Some(format!("📝 Descripción de `!{name}` actualizada")))
        }
        BotCommand::Remove(name) => {
            edits::remove(engine.store(), &name, invocation.editor).await?;
            Ok(Some(format!("🗑️ `!{name}` eliminado")))
        }
        BotCommand::List => Ok(Some(list_commands(engine))),
    }
}

async fn play<T, R>(
    engine: &PlaybackEngine<T, R>,
    invocation: &Invocation,
    request: PlayRequest,
) -> Result<Option<String>, PlaybackError>
where
    T: VoiceTransport,
    R: Renderer<Stream = T::Stream>,
{
    let channel = invocation
        .voice_channel
        .ok_or_else(|| PlaybackError::user_input("Tenés que estar en un canal de voz"))?;
    let outcome = engine
        .play(invocation.guild, channel, invocation.requester.clone(), request)
        .await?;
    Ok(describe(&outcome))
}

/// Solo se responde lo que el apodo del bot no muestra.
fn describe(outcome: &ResolveOutcome) -> Option<String> {
    match outcome {
        ResolveOutcome::Skipped(reason) => Some(format!("⚠️ No se pudo reproducir: {reason}")),
        ResolveOutcome::NoCandidates => Some("📁 No hay archivos para reproducir".to_string()),
        _ => None,
    }
}

/// El nombre explícito o, si falta, el comando que suena en la guild.
async fn target_name<T, R>(
    engine: &PlaybackEngine<T, R>,
    guild: GuildId,
    name: Option<String>,
) -> Result<String, PlaybackError>
where
    T: VoiceTransport,
    R: Renderer<Stream = T::Stream>,
{
    if let Some(name) = name {
        return Ok(name);
    }
    engine
        .current(guild)
        .await
        .and_then(|record| record.descriptor_name)
        .ok_or_else(|| PlaybackError::user_input("No hay ningún comando sonando"))
}

async fn equalizer<T, R>(
    engine: &PlaybackEngine<T, R>,
    guild: GuildId,
    eq: EqCommand,
) -> Result<Option<String>, PlaybackError>
where
    T: VoiceTransport,
    R: Renderer<Stream = T::Stream>,
{
    let name = target_name(engine, guild, None).await?;
    let entry = match eq {
        EqCommand::Show => {
            let descriptor = engine
                .store()
                .get(&name)
                .ok_or_else(|| PlaybackError::UnknownCommand(name.clone()))?;
            if descriptor.filters.is_empty() {
                return Ok(Some(format!(
                    "🎚️ `!{name}` no tiene filtros. Presets: {}",
                    EqPresets::list().join(", ")
                )));
            }
            let labels: Vec<String> = descriptor.filters.iter().map(|f| f.label.clone()).collect();
            return Ok(Some(format!("🎚️ `!{name}`: {}", labels.join(", "))));
        }
        EqCommand::Reset => {
            edits::reset_filters(engine, guild, &name).await?;
            return Ok(Some(format!("🎚️ Filtros de `!{name}` borrados")));
        }
        EqCommand::Volume(value) => FilterEntry::volume(&value)?,
        EqCommand::Bass(value) => FilterEntry::bass(&value)?,
        EqCommand::Treble(value) => FilterEntry::treble(&value)?,
        EqCommand::Preset(preset) => FilterEntry::preset(&preset)?,
        EqCommand::Raw(text) => FilterEntry::raw(&text)?,
    };

    let label = entry.label.clone();
    edits::add_filter(engine, guild, &name, entry).await?;
    Ok(Some(format!("🎚️ `{label}` agregado a `!{name}`")))
}

fn list_commands<T, R>(engine: &PlaybackEngine<T, R>) -> String
where
    T: VoiceTransport,
    R: Renderer<Stream = T::Stream>,
{
    let entries = engine.store().snapshot();
    if entries.is_empty() {
        return "No hay comandos subidos".to_string();
    }
    entries
        .iter()
        .map(|(name, descriptor)| format!("`!{name}` {}", descriptor.description()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn list_soundfonts<T, R>(engine: &PlaybackEngine<T, R>) -> String
where
    T: VoiceTransport,
    R: Renderer<Stream = T::Stream>,
{
    let soundfonts = engine.store().soundfonts();
    if soundfonts.is_empty() {
        return "No hay SoundFonts".to_string();
    }
    soundfonts
        .iter()
        .map(|(name, sf)| {
            if sf.help.is_empty() {
                format!("🎹 `{name}`")
            } else {
                format!("🎹 `{name}` {}", sf.help)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::session::test_support::*,
        storage::test_support::{add_file, single, AUTHOR},
    };
    use pretty_assertions::assert_eq;

    fn invocation(in_voice: bool) -> Invocation {
        Invocation {
            guild: GUILD,
            requester: requester(),
            voice_channel: in_voice.then_some(CHANNEL),
            editor: Editor {
                user_id: 100,
                is_admin: false,
            },
        }
    }

    #[tokio::test]
    async fn test_play_requires_voice_channel() {
        let h = harness().await;
        add_file(&h.store, "alarm", single("alarm.mp3")).await;

        let err = execute(&h.engine, &invocation(false), BotCommand::Play("alarm".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, PlaybackError::UserInput(_)));
        assert_eq!(h.transport.started(), 0);

        let reply = execute(&h.engine, &invocation(true), BotCommand::Play("alarm".into()))
            .await
            .unwrap();
        assert_eq!(reply, None);
        assert_eq!(h.transport.started(), 1);
    }

    #[tokio::test]
    async fn test_speed_defaults_to_current_command() {
        let h = harness().await;
        let mut descriptor = single("lofi.mp3");
        descriptor.audio_meta = Some(crate::audio::descriptor::AudioMeta {
            sample_rate: 44_100,
            duration_seconds: 60.0,
            channels: 2,
            codec: "mp3".into(),
        });
        add_file(&h.store, "lofi", descriptor).await;

        let idle = BotCommand::Speed {
            name: None,
            value: "150".into(),
        };
        assert!(execute(&h.engine, &invocation(true), idle.clone()).await.is_err());

        h.play_named("lofi").await.unwrap();
        let reply = execute(&h.engine, &invocation(true), idle).await.unwrap();
        assert_eq!(reply.as_deref(), Some("⏩ `!lofi` a 150%"));
        assert_eq!(h.store.get("lofi").unwrap().speed().get(), 150);
        // La edición recargó la pista
        assert_eq!(h.transport.started(), 2);
    }

    #[tokio::test]
    async fn test_eq_adds_filter_to_playing_command() {
        let h = harness().await;
        add_file(&h.store, "alarm", single("alarm.mp3")).await;
        h.play_named("alarm").await.unwrap();

        let reply = execute(
            &h.engine,
            &invocation(true),
            BotCommand::Eq(EqCommand::Volume("50".into())),
        )
        .await
        .unwrap();
        assert_eq!(reply.as_deref(), Some("🎚️ `50% Volume` agregado a `!alarm`"));

        let shown = execute(&h.engine, &invocation(true), BotCommand::Eq(EqCommand::Show))
            .await
            .unwrap();
        assert_eq!(shown.as_deref(), Some("🎚️ `!alarm`: 50% Volume"));
    }

    #[tokio::test]
    async fn test_remove_needs_author() {
        let h = harness().await;
        add_file(&h.store, "alarm", single("alarm.mp3")).await;

        let err = execute(&h.engine, &invocation(true), BotCommand::Remove("alarm".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, PlaybackError::PermissionDenied { .. }));

        let mut author = invocation(true);
        author.editor.user_id = AUTHOR.id;
        execute(&h.engine, &author, BotCommand::Remove("alarm".into()))
            .await
            .unwrap();
        assert!(!h.store.contains("alarm"));
    }

    #[tokio::test]
    async fn test_list_and_rewind_when_idle() {
        let h = harness().await;
        let empty = execute(&h.engine, &invocation(true), BotCommand::List).await.unwrap();
        assert_eq!(empty.as_deref(), Some("No hay comandos subidos"));

        add_file(&h.store, "alarm", single("alarm.mp3")).await;
        let listed = execute(&h.engine, &invocation(true), BotCommand::List).await.unwrap();
        assert_eq!(listed.as_deref(), Some("`!alarm` Loop alarm.mp3"));

        let rewind = execute(&h.engine, &invocation(true), BotCommand::Rewind).await.unwrap();
        assert_eq!(rewind.as_deref(), Some("No hay nada sonando"));
    }
}
