//! # Audio Module
//!
//! Continuidad de reproducción por guild para el soundboard.
//!
//! ## Architecture
//!
//! ### [`session`] - Sesión de reproducción
//! - Un actor por guild que serializa pedidos, fines de pista y recargas
//! - Decide arrancar, reanudar, repetir o salir
//! - Guarda el [`ledger::ReplayRecord`] para reanudar tras una edición
//!
//! ### [`filters`] y [`renderer`] - Cadena de filtros
//! - Velocidad por remuestreo, filtros del usuario y offset de inicio
//! - ffmpeg (y fluidsynth o timidity para MIDI) produciendo Ogg/Opus
//!
//! ### [`occupancy`] - Entrada y salida automática
//! - Timers por canal que se reemplazan y se revalidan al vencer
//!
//! ## Audio Quality
//!
//! - **Sample Rate**: 48kHz a la salida, 44.1kHz por defecto al remuestrear
//! - **Channels**: Stereo
//! - **Encoding**: Opus (bitrate configurable)

pub mod audit;
pub mod descriptor;
pub mod edits;
pub mod filters;
pub mod ledger;
pub mod occupancy;
pub mod probe;
pub mod renderer;
pub mod selection;
pub mod session;
pub mod transport;
