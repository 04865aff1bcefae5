use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::renderer::MidiRendererKind;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub command_prefix: String,
    pub admin_user_ids: Vec<u64>,

    // Paths
    pub data_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub files_json: PathBuf,
    pub soundfonts_json: PathBuf,
    pub default_file: PathBuf,
    pub log_csv: Option<PathBuf>,

    // Renderizado
    pub ffmpeg_path: String,
    pub fluidsynth_path: String,
    pub timidity_path: String,
    pub midi_impl: MidiRendererKind,
    pub midi_mute_channel: Option<u8>,
    pub opus_bitrate: u32,

    // Ocupación de canales
    pub enable_auto_join: bool,
    #[serde(with = "duration_text")]
    pub auto_join_delay: Duration,
    #[serde(with = "duration_text")]
    pub auto_join_move_delay: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let data_dir: PathBuf = std::env::var("DATA_DIR")
            .unwrap_or_else(|_| "/app/data".to_string())
            .into();
        let upload_dir = data_dir.join(
            std::env::var("UPLOAD_DIR")
                .unwrap_or_else(|_| "uploads".to_string())
                .trim_matches(|c| c == '/' || c == '\\'),
        );

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN").context("DISCORD_TOKEN no definido")?,
            command_prefix: std::env::var("COMMAND_PREFIX").unwrap_or_else(|_| "!".to_string()),
            admin_user_ids: parse_id_list(&std::env::var("ADMIN_USER_IDS").unwrap_or_default())?,

            // Paths
            files_json: data_dir.join(
                std::env::var("FILES_JSON").unwrap_or_else(|_| "files.json".to_string()),
            ),
            soundfonts_json: data_dir.join(
                std::env::var("SOUNDFONTS_JSON").unwrap_or_else(|_| "soundfonts.json".to_string()),
            ),
            default_file: resolve_against(
                &data_dir,
                std::env::var("DEFAULT_FILE").context("DEFAULT_FILE no definido")?,
            ),
            log_csv: std::env::var("LOG_CSV")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(|s| resolve_against(&data_dir, s)),
            upload_dir,
            data_dir,

            // Renderizado
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            fluidsynth_path: std::env::var("FLUIDSYNTH_PATH")
                .unwrap_or_else(|_| "fluidsynth".to_string()),
            timidity_path: std::env::var("TIMIDITY_PATH")
                .unwrap_or_else(|_| "timidity".to_string()),
            midi_impl: std::env::var("MIDI_IMPL")
                .unwrap_or_else(|_| "none".to_string())
                .parse()?,
            midi_mute_channel: match std::env::var("MIDI_MUTE_CHANNEL") {
                Ok(val) if !val.trim().is_empty() => Some(val.trim().parse()?),
                _ => None,
            },
            opus_bitrate: std::env::var("OPUS_BITRATE")
                .unwrap_or_else(|_| "96000".to_string()) // 96kbps (Discord default)
                .parse()?,

            // Ocupación
            enable_auto_join: std::env::var("ENABLE_AUTO_JOIN")
                .unwrap_or_else(|_| "true".to_string())
                .parse()?,
            auto_join_delay: humantime::parse_duration(
                &std::env::var("AUTO_JOIN_DELAY").unwrap_or_else(|_| "180s".to_string()),
            )?,
            auto_join_move_delay: humantime::parse_duration(
                &std::env::var("AUTO_JOIN_MOVE_DELAY").unwrap_or_else(|_| "30s".to_string()),
            )?,
        };

        // Create directories if they don't exist
        std::fs::create_dir_all(&config.data_dir)?;
        std::fs::create_dir_all(&config.upload_dir)?;

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// - Opus bitrate must stay within what Discord accepts (8..=510 kbps)
    /// - The MIDI mute channel, when set, must be a real MIDI channel (1..=16)
    /// - The default ambient file must exist, it is what auto-join plays
    /// - Both auto-join delays must be non-zero
    pub fn validate(&self) -> Result<()> {
        if self.opus_bitrate > 510000 {
            anyhow::bail!("Opus bitrate cannot exceed 510kbps, got: {}", self.opus_bitrate);
        }

        if self.opus_bitrate < 8000 {
            anyhow::bail!("Opus bitrate too low, minimum 8kbps, got: {}", self.opus_bitrate);
        }

        if let Some(channel) = self.midi_mute_channel {
            if !(1..=16).contains(&channel) {
                anyhow::bail!("MIDI mute channel must be between 1 and 16, got: {}", channel);
            }
        }

        if !self.default_file.is_file() {
            anyhow::bail!(
                "Default file does not exist: {}",
                self.default_file.display()
            );
        }

        if self.auto_join_delay.is_zero() || self.auto_join_move_delay.is_zero() {
            anyhow::bail!("Auto-join delays must be greater than 0");
        }

        if self.command_prefix.is_empty() {
            anyhow::bail!("Command prefix must not be empty");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the Discord token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Paths: data {} / uploads {}\n  \
            Default file: {}\n  \
            Audio: {}kbps, MIDI {:?}\n  \
            Auto-join: {} ({}s fresh, {}s moved)\n  \
            Audit log: {}",
            self.data_dir.display(),
            self.upload_dir.display(),
            self.default_file.display(),
            self.opus_bitrate / 1000,
            self.midi_impl,
            self.enable_auto_join,
            self.auto_join_delay.as_secs(),
            self.auto_join_move_delay.as_secs(),
            self.log_csv
                .as_ref()
                .map_or("disabled".to_string(), |p| p.display().to_string()),
        )
    }

    pub fn is_admin(&self, user_id: u64) -> bool {
        self.admin_user_ids.contains(&user_id)
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            command_prefix: "!".to_string(),
            admin_user_ids: Vec::new(),

            data_dir: "/app/data".into(),
            upload_dir: "/app/data/uploads".into(),
            files_json: "/app/data/files.json".into(),
            soundfonts_json: "/app/data/soundfonts.json".into(),
            default_file: "/app/data/espionage.mp3".into(),
            log_csv: None,

            ffmpeg_path: "ffmpeg".to_string(),
            fluidsynth_path: "fluidsynth".to_string(),
            timidity_path: "timidity".to_string(),
            midi_impl: MidiRendererKind::None,
            midi_mute_channel: None,
            opus_bitrate: 96000,

            enable_auto_join: true,
            auto_join_delay: Duration::from_secs(180),
            auto_join_move_delay: Duration::from_secs(30),
        }
    }
}

fn resolve_against(base: &Path, value: String) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

fn parse_id_list(value: &str) -> Result<Vec<u64>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u64>().with_context(|| format!("ID inválido: {s}")))
        .collect()
}

/// Serializa duraciones en formato humantime ("3m", "30s").
mod duration_text {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
