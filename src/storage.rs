use anyhow::{Context as _, Result};
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::{fs, sync::Mutex};
use tracing::{debug, info, warn};

use crate::{
    audio::descriptor::{CommandDescriptor, SoundfontDescriptor},
    error::PlaybackError,
};

/// Una tabla nombre → entrada respaldada por un archivo JSON.
///
/// Las lecturas van contra la copia en memoria. Las mutaciones toman el
/// `gate`, escriben la tabla completa a disco y recién entonces se
/// publican en memoria.
#[derive(Debug)]
struct JsonTable<T> {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, T>>,
    gate: Mutex<()>,
}

impl<T> JsonTable<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    async fn load(path: PathBuf) -> Result<Self> {
        let entries = match fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("JSON inválido en {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("📂 {} no existe, se usa una tabla vacía", path.display());
                BTreeMap::new()
            }
            Err(e) => return Err(e).with_context(|| format!("No se pudo leer {}", path.display())),
        };

        Ok(Self {
            path,
            entries: RwLock::new(entries),
            gate: Mutex::new(()),
        })
    }

    fn get(&self, name: &str) -> Option<T> {
        self.entries.read().get(name).cloned()
    }

    fn snapshot(&self) -> Vec<(String, T)> {
        self.entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Aplica `change` sobre una copia de la tabla, la persiste y la publica.
    async fn mutate<R>(
        &self,
        change: impl FnOnce(&mut BTreeMap<String, T>) -> Result<R, PlaybackError>,
    ) -> Result<R, PlaybackError> {
        let _guard = self.gate.lock().await;

        let mut next = self.entries.read().clone();
        let result = change(&mut next)?;

        persist(&self.path, &next).await?;
        *self.entries.write() = next;
        Ok(result)
    }
}

/// Escribe a un temporal y renombra: nunca queda un JSON a medias.
async fn persist<T: Serialize>(path: &Path, entries: &BTreeMap<String, T>) -> Result<()> {
    let content = serde_json::to_string_pretty(entries)?;
    let tmp = path.with_extension("json.tmp");

    fs::write(&tmp, content)
        .await
        .with_context(|| format!("No se pudo escribir {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .await
        .with_context(|| format!("No se pudo reemplazar {}", path.display()))?;

    debug!("💾 {} entradas guardadas en {}", entries.len(), path.display());
    Ok(())
}

/// Almacén de descriptores compartido por todas las guilds.
#[derive(Debug)]
pub struct DescriptorStore {
    upload_dir: PathBuf,
    files: JsonTable<CommandDescriptor>,
    soundfonts: JsonTable<SoundfontDescriptor>,
}

impl DescriptorStore {
    pub async fn load(upload_dir: PathBuf, files_json: PathBuf, soundfonts_json: PathBuf) -> Result<Self> {
        let files = JsonTable::load(files_json).await?;
        let soundfonts = JsonTable::load(soundfonts_json).await?;

        info!(
            "📁 {} comandos y {} SoundFonts cargados",
            files.entries.read().len(),
            soundfonts.entries.read().len()
        );

        Ok(Self {
            upload_dir,
            files,
            soundfonts,
        })
    }

    #[cfg(test)]
    fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn resolve_path(&self, relative: &str) -> PathBuf {
        self.upload_dir.join(relative)
    }

    /// Inverso de `resolve_path`, para logs y auditoría.
    pub fn relative_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.upload_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }

    pub fn get(&self, name: &str) -> Option<CommandDescriptor> {
        self.files.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.entries.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.files.entries.read().keys().cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<(String, CommandDescriptor)> {
        self.files.snapshot()
    }

    pub fn soundfont(&self, name: &str) -> Option<SoundfontDescriptor> {
        self.soundfonts.get(name)
    }

    pub fn soundfonts(&self) -> Vec<(String, SoundfontDescriptor)> {
        self.soundfonts.snapshot()
    }

    /// Edita un descriptor existente. Si `change` falla no se persiste nada.
    pub async fn edit<R>(
        &self,
        name: &str,
        change: impl FnOnce(&mut CommandDescriptor) -> Result<R, PlaybackError>,
    ) -> Result<R, PlaybackError> {
        self.files
            .mutate(|table| {
                let descriptor = table
                    .get_mut(name)
                    .ok_or_else(|| PlaybackError::UnknownCommand(name.to_string()))?;
                change(descriptor)
            })
            .await
    }

    /// Quita el descriptor de la tabla y devuelve lo que había.
    pub async fn remove(&self, name: &str) -> Result<CommandDescriptor, PlaybackError> {
        self.files
            .mutate(|table| {
                table
                    .remove(name)
                    .ok_or_else(|| PlaybackError::UnknownCommand(name.to_string()))
            })
            .await
    }

    #[cfg(test)]
    pub async fn insert(&self, name: &str, descriptor: CommandDescriptor) -> Result<(), PlaybackError> {
        self.files
            .mutate(|table| {
                table.insert(name.to_string(), descriptor);
                Ok(())
            })
            .await
    }

    #[cfg(test)]
    pub async fn insert_soundfont(&self, name: &str, soundfont: SoundfontDescriptor) -> Result<(), PlaybackError> {
        self.soundfonts
            .mutate(|table| {
                table.insert(name.to_string(), soundfont);
                Ok(())
            })
            .await
    }

    /// Archivos de un pack (rutas relativas), ordenados. Los MIDI packs solo
    /// aportan `.mid`/`.midi`.
    pub async fn pack_members(&self, descriptor: &CommandDescriptor) -> Result<Vec<String>> {
        let directory = descriptor.location();
        let mut entries = fs::read_dir(self.resolve_path(directory)).await?;
        let mut members = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if descriptor.is_midi() && !is_midi_file(&file_name) {
                continue;
            }
            members.push(format!("{directory}/{file_name}"));
        }

        members.sort();
        Ok(members)
    }
}

fn is_midi_file(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.ends_with(".mid") || lower.ends_with(".midi")
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_missing_files_load_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(dir.path()).await;
        assert!(store.names().is_empty());
        assert!(store.soundfonts().is_empty());
    }

    #[tokio::test]
    async fn test_edit_persists_whole_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(dir.path()).await;
        add_file(&store, "espionage", single("espionage.mp3")).await;
        add_file(&store, "alarm", single("alarm.mp3")).await;

        store
            .edit("alarm", |d| {
                d.loop_enabled = false;
                Ok(())
            })
            .await
            .unwrap();

        let reloaded = DescriptorStore::load(
            store.upload_dir().to_path_buf(),
            dir.path().join("files.json"),
            dir.path().join("soundfonts.json"),
        )
        .await
        .unwrap();
        assert_eq!(reloaded.names(), vec!["alarm".to_string(), "espionage".to_string()]);
        assert!(!reloaded.get("alarm").unwrap().loop_enabled);
        assert!(!dir.path().join("files.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_failed_edit_does_not_mutate() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(dir.path()).await;
        add_file(&store, "a", single("a.mp3")).await;

        let result: Result<(), _> = store
            .edit("a", |d| {
                d.help = "cambiado".into();
                Err(PlaybackError::user_input("no"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(store.get("a").unwrap().help, "");

        let missing = store.edit("nope", |_| Ok(())).await;
        assert!(matches!(missing, Err(PlaybackError::UnknownCommand(_))));
    }

    #[tokio::test]
    async fn test_remove_and_pack_members() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(dir.path()).await;
        add_file(&store, "lofi", pack("lofi")).await;
        for f in ["b.mp3", "a.mp3"] {
            std::fs::write(store.resolve_path(&format!("lofi/{f}")), b"x").unwrap();
        }
        std::fs::create_dir(store.resolve_path("lofi/nested")).unwrap();

        let members = store.pack_members(&store.get("lofi").unwrap()).await.unwrap();
        assert_eq!(members, vec!["lofi/a.mp3".to_string(), "lofi/b.mp3".to_string()]);
        assert_eq!(store.relative_path(&store.resolve_path("lofi/a.mp3")), "lofi/a.mp3");

        let removed = store.remove("lofi").await.unwrap();
        assert!(removed.is_pack());
        assert!(store.get("lofi").is_none());
        assert!(store.remove("lofi").await.is_err());
    }
}
