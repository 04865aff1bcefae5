//! Descriptores de comandos de audio.
//!
//! Un descriptor es la metadata persistida de un comando reproducible:
//! un archivo suelto, un pack (directorio de archivos intercambiables) o
//! un MIDI, junto con loop, velocidad y filtros.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{audio::filters::FilterEntry, error::PlaybackError};

/// Versión del formato de descriptor guardado en disco.
pub const DESCRIPTOR_VERSION: u32 = 3;

pub const MIN_SPEED: u32 = 1;
pub const MAX_SPEED: u32 = 10_000;

/// Velocidad de reproducción en porcentaje, siempre en `[1, 10000]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct SpeedPercent(u32);

impl SpeedPercent {
    pub const NORMAL: SpeedPercent = SpeedPercent(100);

    pub fn new(percent: u32) -> Result<Self, PlaybackError> {
        if (MIN_SPEED..=MAX_SPEED).contains(&percent) {
            Ok(Self(percent))
        } else {
            Err(PlaybackError::user_input(format!(
                "La velocidad debe estar en el rango [{MIN_SPEED},{MAX_SPEED}]%"
            )))
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn is_normal(self) -> bool {
        self.0 == 100
    }

    /// Factor multiplicador (150% -> 1.5).
    pub fn factor(self) -> f64 {
        f64::from(self.0) / 100.0
    }
}

impl Default for SpeedPercent {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl TryFrom<u32> for SpeedPercent {
    type Error = PlaybackError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SpeedPercent> for u32 {
    fn from(value: SpeedPercent) -> Self {
        value.0
    }
}

impl fmt::Display for SpeedPercent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Normaliza un porcentaje escrito por el usuario a un entero.
///
/// `"150%"` y `"150"` son porcentajes; `"1.5"` y `"1.5x"` son
/// multiplicadores. El resultado no se limita a ningún rango.
pub fn parse_percent(input: &str) -> Result<u32, PlaybackError> {
    let invalid = || PlaybackError::user_input(format!("Porcentaje inválido: `{input}`"));
    let value = input.trim();

    let (number, multiplier) = if let Some(stripped) = value.strip_suffix('%') {
        (stripped.trim(), false)
    } else if let Some(stripped) = value.strip_suffix(['x', 'X']) {
        (stripped.trim(), true)
    } else {
        (value, value.contains('.'))
    };

    if number.is_empty() {
        return Err(invalid());
    }

    let parsed: f64 = number.parse().map_err(|_| invalid())?;
    if !parsed.is_finite() || parsed < 0.0 {
        return Err(invalid());
    }

    let percent = if multiplier { parsed * 100.0 } else { parsed };
    if percent > f64::from(u32::MAX) {
        return Err(invalid());
    }
    Ok(percent.round() as u32)
}

/// Ubicación de un MIDI: archivo suelto o directorio (pack de MIDIs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MidiLocation {
    File(String),
    Directory(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DescriptorKind {
    Single { filename: String },
    Pack { directory: String },
    Midi { location: MidiLocation, soundfonts: Vec<String> },
}

/// Metadata de audio obtenida al analizar el archivo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioMeta {
    pub sample_rate: u32,
    pub duration_seconds: f64,
    pub channels: u16,
    pub codec: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: u64,
    pub guild: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    #[serde(flatten)]
    pub kind: DescriptorKind,
    #[serde(default)]
    pub help: String,
    #[serde(rename = "loop", default)]
    pub loop_enabled: bool,
    #[serde(default)]
    pub video: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<SpeedPercent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FilterEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_meta: Option<AudioMeta>,
    pub author: Author,
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    DESCRIPTOR_VERSION
}

impl CommandDescriptor {
    pub fn new(kind: DescriptorKind, author: Author) -> Self {
        Self {
            kind,
            help: String::new(),
            loop_enabled: true,
            video: false,
            speed: None,
            filters: Vec::new(),
            audio_meta: None,
            author,
            version: DESCRIPTOR_VERSION,
        }
    }

    /// Ruta relativa al directorio de uploads (archivo o directorio).
    pub fn location(&self) -> &str {
        match &self.kind {
            DescriptorKind::Single { filename } => filename,
            DescriptorKind::Pack { directory } => directory,
            DescriptorKind::Midi { location, .. } => match location {
                MidiLocation::File(name) | MidiLocation::Directory(name) => name,
            },
        }
    }

    pub fn is_pack(&self) -> bool {
        matches!(
            self.kind,
            DescriptorKind::Pack { .. }
                | DescriptorKind::Midi {
                    location: MidiLocation::Directory(_),
                    ..
                }
        )
    }

    pub fn is_midi(&self) -> bool {
        matches!(self.kind, DescriptorKind::Midi { .. })
    }

    pub fn soundfonts(&self) -> &[String] {
        match &self.kind {
            DescriptorKind::Midi { soundfonts, .. } => soundfonts,
            _ => &[],
        }
    }

    pub fn speed(&self) -> SpeedPercent {
        self.speed.unwrap_or_default()
    }

    /// Texto de ayuda mostrado en la lista de comandos.
    pub fn description(&self) -> String {
        let text = if self.help.is_empty() {
            let verb = if self.loop_enabled { "Loop" } else { "Play" };
            format!("{verb} {}", self.location())
        } else {
            self.help.clone()
        };
        if self.is_pack() {
            format!("{PACK_ICON} {text}")
        } else {
            text
        }
    }

    /// El autor o un administrador pueden modificar el descriptor.
    pub fn can_modify(&self, user_id: u64, is_admin: bool) -> bool {
        is_admin || self.author.id == user_id
    }
}

pub const PACK_ICON: &str = "📁";

/// SoundFont disponible para renderizar MIDIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundfontDescriptor {
    pub filename: String,
    #[serde(default)]
    pub help: String,
    pub author: Author,
    #[serde(default = "default_version")]
    pub version: u32,
}
