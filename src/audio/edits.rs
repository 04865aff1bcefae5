//! Ediciones de descriptores desde comandos de chat.
//!
//! Si lo editado es lo que suena en la guild se recarga desde la posición
//! actual.

use serenity::model::id::GuildId;
use tracing::{info, warn};

use crate::{
    audio::{
        descriptor::{parse_percent, DescriptorKind, SpeedPercent},
        filters::FilterEntry,
        probe::probe_async,
        renderer::Renderer,
        session::PlaybackEngine,
        transport::VoiceTransport,
    },
    error::PlaybackError,
    storage::DescriptorStore,
};

/// Quién pide la edición.
#[derive(Debug, Clone, Copy)]
pub struct Editor {
    pub user_id: u64,
    pub is_admin: bool,
}

async fn reload_after_edit<T, R>(engine: &PlaybackEngine<T, R>, guild: GuildId, name: &str)
where
    T: VoiceTransport,
    R: Renderer<Stream = T::Stream>,
{
    if let Err(e) = engine.reload_if_current(guild, name).await {
        warn!("🔄 Recarga tras editar `{}` falló en guild {}: {}", name, guild, e);
    }
}

/// Invierte el loop. Los packs siempre hacen loop.
pub async fn toggle_loop(store: &DescriptorStore, name: &str) -> Result<bool, PlaybackError> {
    store
        .edit(name, |descriptor| {
            if descriptor.is_pack() {
                return Err(PlaybackError::user_input(format!(
                    "`!{name}` es un pack; usá `!random` para reproducirlo al azar"
                )));
            }
            descriptor.loop_enabled = !descriptor.loop_enabled;
            Ok(descriptor.loop_enabled)
        })
        .await
}

pub async fn set_speed<T, R>(
    engine: &PlaybackEngine<T, R>,
    guild: GuildId,
    name: &str,
    input: &str,
) -> Result<SpeedPercent, PlaybackError>
where
    T: VoiceTransport,
    R: Renderer<Stream = T::Stream>,
{
    let store = engine.store();
    let speed = SpeedPercent::new(parse_percent(input)?)?;
    let current = store
        .get(name)
        .ok_or_else(|| PlaybackError::UnknownCommand(name.to_string()))?;

    if current.is_pack() && !current.is_midi() {
        return Err(PlaybackError::user_input(format!(
            "`!{name}` es un pack; no se puede cambiar la velocidad"
        )));
    }

    // Sin sample rate no hay forma de calcular el remuestreo
    let probed = if !current.is_midi() && current.audio_meta.is_none() {
        let path = store.resolve_path(current.location());
        match probe_async(&path).await {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!("🔍 No se pudo analizar {}: {:#}", path.display(), e);
                return Err(PlaybackError::user_input(
                    "No se puede cambiar la velocidad: falta la metadata del archivo",
                ));
            }
        }
    } else {
        None
    };

    store
        .edit(name, |descriptor| {
            if let Some(meta) = probed {
                descriptor.audio_meta = Some(meta);
            }
            descriptor.speed = (!speed.is_normal()).then_some(speed);
            Ok(())
        })
        .await?;

    info!("⏩ Velocidad de `{}` = {}", name, speed);
    reload_after_edit(engine, guild, name).await;
    Ok(speed)
}

pub async fn add_filter<T, R>(
    engine: &PlaybackEngine<T, R>,
    guild: GuildId,
    name: &str,
    entry: FilterEntry,
) -> Result<(), PlaybackError>
where
    T: VoiceTransport,
    R: Renderer<Stream = T::Stream>,
{
    let label = entry.label.clone();
    engine
        .store()
        .edit(name, |descriptor| {
            descriptor.filters.push(entry);
            Ok(())
        })
        .await?;

    info!("🎚️ Filtro `{}` agregado a `{}`", label, name);
    reload_after_edit(engine, guild, name).await;
    Ok(())
}

pub async fn reset_filters<T, R>(
    engine: &PlaybackEngine<T, R>,
    guild: GuildId,
    name: &str,
) -> Result<(), PlaybackError>
where
    T: VoiceTransport,
    R: Renderer<Stream = T::Stream>,
{
    engine
        .store()
        .edit(name, |descriptor| {
            descriptor.filters.clear();
            Ok(())
        })
        .await?;

    reload_after_edit(engine, guild, name).await;
    Ok(())
}

pub async fn set_soundfont<T, R>(
    engine: &PlaybackEngine<T, R>,
    guild: GuildId,
    name: &str,
    soundfont: &str,
) -> Result<(), PlaybackError>
where
    T: VoiceTransport,
    R: Renderer<Stream = T::Stream>,
{
    let store = engine.store();
    if store.soundfont(soundfont).is_none() {
        return Err(PlaybackError::UnknownSoundfont(soundfont.to_string()));
    }

    store
        .edit(name, |descriptor| match &mut descriptor.kind {
            DescriptorKind::Midi { soundfonts, .. } => {
                *soundfonts = vec![soundfont.to_string()];
                Ok(())
            }
            _ => Err(PlaybackError::user_input(format!(
                "`!{name}` no es un MIDI ni contiene MIDIs"
            ))),
        })
        .await?;

    reload_after_edit(engine, guild, name).await;
    Ok(())
}

pub async fn set_description(
    store: &DescriptorStore,
    name: &str,
    text: &str,
    editor: Editor,
) -> Result<(), PlaybackError> {
    store
        .edit(name, |descriptor| {
            if !descriptor.can_modify(editor.user_id, editor.is_admin) {
                return Err(PlaybackError::PermissionDenied {
                    name: name.to_string(),
                });
            }
            descriptor.help = text.trim().to_string();
            Ok(())
        })
        .await
}

/// Borra el descriptor y su archivo (o directorio de pack).
pub async fn remove(store: &DescriptorStore, name: &str, editor: Editor) -> Result<(), PlaybackError> {
    let descriptor = store
        .get(name)
        .ok_or_else(|| PlaybackError::UnknownCommand(name.to_string()))?;
    if !descriptor.can_modify(editor.user_id, editor.is_admin) {
        return Err(PlaybackError::PermissionDenied {
            name: name.to_string(),
        });
    }

    let removed = store.remove(name).await?;
    let path = store.resolve_path(removed.location());
    let result = if path.is_dir() {
        tokio::fs::remove_dir_all(&path).await
    } else {
        tokio::fs::remove_file(&path).await
    };
    if let Err(e) = result {
        warn!("🗑️ No se pudo borrar {}: {}", path.display(), e);
    }

    info!("🗑️ Comando `{}` eliminado", name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{
            descriptor::{AudioMeta, Author, CommandDescriptor, MidiLocation, SoundfontDescriptor},
            session::test_support::*,
        },
        storage::test_support::{add_file, pack, single, AUTHOR},
    };
    use pretty_assertions::assert_eq;

    fn with_meta(mut descriptor: CommandDescriptor) -> CommandDescriptor {
        descriptor.audio_meta = Some(AudioMeta {
            sample_rate: 48_000,
            duration_seconds: 60.0,
            channels: 2,
            codec: "mp3".into(),
        });
        descriptor
    }

    fn midi_pack() -> CommandDescriptor {
        CommandDescriptor::new(
            DescriptorKind::Midi {
                location: MidiLocation::Directory("midis".into()),
                soundfonts: vec![],
            },
            AUTHOR,
        )
    }

    const AUTHOR_EDITOR: Editor = Editor {
        user_id: 1,
        is_admin: false,
    };
    const STRANGER: Editor = Editor {
        user_id: 99,
        is_admin: false,
    };
    const ADMIN: Editor = Editor {
        user_id: 99,
        is_admin: true,
    };

    #[tokio::test]
    async fn test_toggle_loop() {
        let h = harness().await;
        add_file(&h.store, "song", single("song.mp3")).await;
        add_file(&h.store, "lofi", pack("lofi")).await;

        assert!(!toggle_loop(&h.store, "song").await.unwrap());
        assert!(toggle_loop(&h.store, "song").await.unwrap());
        assert!(matches!(
            toggle_loop(&h.store, "lofi").await,
            Err(PlaybackError::UserInput(_))
        ));
    }

    #[tokio::test]
    async fn test_set_speed_rules() {
        let h = harness().await;
        add_file(&h.store, "song", with_meta(single("song.mp3"))).await;
        add_file(&h.store, "raw", single("raw.mp3")).await;
        add_file(&h.store, "lofi", pack("lofi")).await;
        add_file(&h.store, "midis", midi_pack()).await;

        assert_eq!(set_speed(&h.engine, GUILD, "song", "1.5").await.unwrap().get(), 150);
        assert_eq!(h.store.get("song").unwrap().speed().get(), 150);

        set_speed(&h.engine, GUILD, "song", "100%").await.unwrap();
        assert_eq!(h.store.get("song").unwrap().speed, None);

        assert!(matches!(
            set_speed(&h.engine, GUILD, "song", "0").await,
            Err(PlaybackError::UserInput(_))
        ));
        assert!(set_speed(&h.engine, GUILD, "song", "20000%").await.is_err());
        assert!(set_speed(&h.engine, GUILD, "lofi", "150").await.is_err());
        assert!(set_speed(&h.engine, GUILD, "midis", "150").await.is_ok());

        // "raw.mp3" no es audio real: el análisis falla y no se guarda nada
        assert!(set_speed(&h.engine, GUILD, "raw", "150").await.is_err());
        assert_eq!(h.store.get("raw").unwrap().speed, None);

        assert!(matches!(
            set_speed(&h.engine, GUILD, "nope", "150").await,
            Err(PlaybackError::UnknownCommand(_))
        ));
    }

    #[tokio::test]
    async fn test_filters_reload_only_the_playing_descriptor() {
        let h = harness().await;
        add_file(&h.store, "a", single("a.mp3")).await;
        add_file(&h.store, "b", single("b.mp3")).await;
        h.play_named("a").await.unwrap();

        add_filter(&h.engine, GUILD, "b", FilterEntry::volume("50%").unwrap())
            .await
            .unwrap();
        assert_eq!(h.transport.started(), 1);

        add_filter(&h.engine, GUILD, "a", FilterEntry::volume("50%").unwrap())
            .await
            .unwrap();
        assert_eq!(h.transport.started(), 2);
        assert_eq!(
            h.transport.last_request().unwrap().plan.filters,
            vec!["volume=0.50".to_string()]
        );

        reset_filters(&h.engine, GUILD, "a").await.unwrap();
        assert_eq!(h.transport.started(), 3);
        assert!(h.transport.last_request().unwrap().plan.filters.is_empty());
    }

    #[tokio::test]
    async fn test_set_soundfont() {
        let h = harness().await;
        add_file(&h.store, "song", single("song.mp3")).await;
        add_file(&h.store, "midis", midi_pack()).await;
        h.store
            .insert_soundfont(
                "gm",
                SoundfontDescriptor {
                    filename: "gm.sf2".into(),
                    help: "General MIDI".into(),
                    author: Author { id: 1, guild: 1 },
                    version: 1,
                },
            )
            .await
            .unwrap();

        assert!(matches!(
            set_soundfont(&h.engine, GUILD, "midis", "nope").await,
            Err(PlaybackError::UnknownSoundfont(_))
        ));
        assert!(matches!(
            set_soundfont(&h.engine, GUILD, "song", "gm").await,
            Err(PlaybackError::UserInput(_))
        ));

        set_soundfont(&h.engine, GUILD, "midis", "gm").await.unwrap();
        assert_eq!(h.store.get("midis").unwrap().soundfonts(), ["gm".to_string()]);
    }

    #[tokio::test]
    async fn test_description_and_remove_need_permission() {
        let h = harness().await;
        add_file(&h.store, "song", single("song.mp3")).await;
        add_file(&h.store, "lofi", pack("lofi")).await;
        std::fs::write(h.store.resolve_path("lofi/a.mp3"), b"x").unwrap();

        assert!(matches!(
            set_description(&h.store, "song", "nuevo", STRANGER).await,
            Err(PlaybackError::PermissionDenied { .. })
        ));
        set_description(&h.store, "song", " Alarma ", AUTHOR_EDITOR).await.unwrap();
        assert_eq!(h.store.get("song").unwrap().description(), "Alarma");

        assert!(remove(&h.store, "song", STRANGER).await.is_err());
        assert!(h.store.resolve_path("song.mp3").exists());

        remove(&h.store, "song", ADMIN).await.unwrap();
        assert!(h.store.get("song").is_none());
        assert!(!h.store.resolve_path("song.mp3").exists());

        remove(&h.store, "lofi", AUTHOR_EDITOR).await.unwrap();
        assert!(!h.store.resolve_path("lofi").exists());
    }
}
