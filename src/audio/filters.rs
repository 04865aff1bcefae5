//! Construcción de la cadena de filtros para el renderizador (ffmpeg).
//!
//! La ejecución de los filtros la hace el proceso externo; aquí solo se
//! arma la lista ordenada de directivas a partir del descriptor.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::{
    audio::descriptor::{parse_percent, CommandDescriptor, SpeedPercent},
    error::PlaybackError,
};

/// Sample rate asumido cuando el descriptor no tiene metadata (MIDI, packs).
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Fuerza estéreo: los MIDI se renderizan mono o con layout variable.
pub const STEREO_LAYOUT_DIRECTIVE: &str = "aformat=channel_layouts=stereo";

/// Frecuencias centrales para el ecualizador de 10 bandas
const EQ_FREQUENCIES: [f32; 10] = [
    32.0,    // Sub-bass
    64.0,    // Bass
    125.0,   // Low-mid
    250.0,   // Mid
    500.0,   // Upper-mid
    1000.0,  // Presence
    2000.0,  // Brilliance
    4000.0,  // High
    8000.0,  // Very high
    16000.0, // Air
];

/// Ancho de banda Q para cada frecuencia
const EQ_Q: f32 = 1.414;

/// Un filtro guardado en el descriptor: etiqueta visible + directiva.
///
/// Las directivas que empiezan con `-` no son parte del filtergraph sino
/// opciones crudas del renderizador (por ejemplo `-ac 1`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterEntry {
    pub label: String,
    pub directive: String,
}

impl FilterEntry {
    pub fn new(label: impl Into<String>, directive: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            directive: directive.into(),
        }
    }

    pub fn is_raw_option(&self) -> bool {
        self.directive.starts_with('-')
    }

    pub fn volume(input: &str) -> Result<Self, PlaybackError> {
        let percent = parse_percent(input)?;
        Ok(Self::new(
            format!("{percent}% Volume"),
            format!("volume={:.02}", f64::from(percent) / 100.0),
        ))
    }

    pub fn bass(input: &str) -> Result<Self, PlaybackError> {
        let percent = parse_percent(input)?;
        let gain = gain_db(percent)?;
        Ok(Self::new(format!("{percent}% Bass"), format!("bass=g={gain:.02}")))
    }

    pub fn treble(input: &str) -> Result<Self, PlaybackError> {
        let percent = parse_percent(input)?;
        let gain = gain_db(percent)?;
        Ok(Self::new(
            format!("{percent}% Treble"),
            format!("treble=g={gain:.02}"),
        ))
    }

    /// Ecualizador de 10 bandas a partir de un preset con nombre.
    pub fn preset(name: &str) -> Result<Self, PlaybackError> {
        let preset = EqPresets::get(name).ok_or_else(|| {
            PlaybackError::user_input(format!(
                "Preset `{name}` no encontrado. Disponibles: {}",
                EqPresets::list().join(", ")
            ))
        })?;

        let directive = EQ_FREQUENCIES
            .iter()
            .zip(preset.gains.iter())
            .filter(|(_, gain)| **gain != 0.0)
            .map(|(freq, gain)| format!("equalizer=f={freq}:t=q:w={EQ_Q}:g={gain}"))
            .collect::<Vec<_>>()
            .join(",");

        if directive.is_empty() {
            // Preset plano: ganancia unitaria
            return Ok(Self::new(format!("EQ {}", preset.name), "anull"));
        }
        Ok(Self::new(format!("EQ {}", preset.name), directive))
    }

    /// Filtro escrito a mano. Solo se permiten caracteres del filtergraph
    /// que no pueden escapar del argumento.
    pub fn raw(text: &str) -> Result<Self, PlaybackError> {
        let text = text.trim();
        if text.is_empty() || !raw_filter_pattern().is_match(text) {
            return Err(PlaybackError::user_input(format!(
                "Filtro inválido: `{text}`. Solo letras, números, espacios y `=:.,_-`"
            )));
        }
        Ok(Self::new(text, text))
    }
}

/// `10*log10(percent/100)` en decibeles; 0% o menos no tiene sentido.
pub fn gain_db(percent: u32) -> Result<f64, PlaybackError> {
    if percent == 0 {
        return Err(PlaybackError::user_input("El porcentaje debe ser mayor que 0"));
    }
    Ok(10.0 * (f64::from(percent) / 100.0).log10())
}

fn raw_filter_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9=:.,_\- ]+$").expect("patrón de filtro válido"))
}

/// Preset de ecualizador
#[derive(Debug, Clone)]
pub struct EqPreset {
    pub name: &'static str,
    pub gains: [f32; 10], // Ganancias en dB para cada banda
}

/// Presets predefinidos
pub struct EqPresets;

impl EqPresets {
    const ALL: [EqPreset; 8] = [
        EqPreset { name: "normal", gains: [0.0; 10] },
        EqPreset { name: "bass", gains: [6.0, 5.0, 4.0, 2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0] },
        EqPreset { name: "pop", gains: [-1.0, 2.0, 4.0, 5.0, 3.0, 0.0, -1.0, -1.0, 0.0, 0.0] },
        EqPreset { name: "rock", gains: [5.0, 4.0, 3.0, 1.0, -1.0, -1.0, 0.0, 2.0, 3.0, 4.0] },
        EqPreset { name: "jazz", gains: [0.0, 1.0, 2.0, 3.0, 2.0, 1.0, 0.0, 1.0, 2.0, 3.0] },
        EqPreset { name: "classical", gains: [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, -2.0, -2.0, -2.0, -3.0] },
        EqPreset { name: "electronic", gains: [5.0, 4.0, 1.0, 0.0, -2.0, 2.0, 1.0, 0.0, 3.0, 4.0] },
        EqPreset { name: "vocal", gains: [-2.0, -1.0, 0.0, 2.0, 4.0, 3.0, 2.0, 1.0, 0.0, -1.0] },
    ];

    /// Obtiene un preset por nombre
    pub fn get(name: &str) -> Option<EqPreset> {
        let name = name.to_lowercase();
        Self::ALL.iter().find(|p| p.name == name).cloned()
    }

    /// Lista todos los presets disponibles
    pub fn list() -> Vec<&'static str> {
        Self::ALL.iter().map(|p| p.name).collect()
    }
}

/// Resultado de la construcción: lo que el renderizador necesita además
/// del archivo.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderPlan {
    /// Directivas del filtergraph, en orden.
    pub filters: Vec<String>,
    /// Opciones crudas que van fuera del filtergraph.
    pub extra_options: Vec<String>,
    /// Offset de inicio en segundos del stream ya remuestreado.
    pub start_offset: Option<f64>,
}

impl RenderPlan {
    /// Filtergraph listo para `-af`, si hay filtros.
    pub fn filter_graph(&self) -> Option<String> {
        if self.filters.is_empty() {
            None
        } else {
            Some(self.filters.join(","))
        }
    }
}

/// Arma el plan de renderizado de un descriptor.
///
/// `start_offset` ya debe estar expresado en tiempo del stream remuestreado:
/// el llamador divide el offset a velocidad normal por `speed/100`.
/// Sin descriptor (archivo por defecto) no hay filtros.
pub fn build_plan(descriptor: Option<&CommandDescriptor>, start_offset: f64) -> RenderPlan {
    let mut plan = RenderPlan {
        start_offset: (start_offset > 0.0).then_some(start_offset),
        ..RenderPlan::default()
    };

    let Some(descriptor) = descriptor else {
        return plan;
    };

    let speed = descriptor.speed();
    if !speed.is_normal() {
        plan.filters.push(rate_directive(descriptor, speed));
    }

    if descriptor.is_midi() {
        plan.filters.push(STEREO_LAYOUT_DIRECTIVE.to_string());
    }

    // El orden de inserción importa: los filtros no conmutan
    for entry in &descriptor.filters {
        if entry.is_raw_option() {
            plan.extra_options
                .extend(entry.directive.split_whitespace().map(str::to_string));
        } else {
            plan.filters.push(entry.directive.clone());
        }
    }

    plan
}

fn rate_directive(descriptor: &CommandDescriptor, speed: SpeedPercent) -> String {
    let base = descriptor
        .audio_meta
        .as_ref()
        .map(|meta| meta.sample_rate)
        .unwrap_or(DEFAULT_SAMPLE_RATE);
    let rate = u64::from(base) * u64::from(speed.get()) / 100;
    format!("asetrate={rate}")
}
