//! Adaptador del renderizador externo.
//!
//! Convierte archivo + plan de filtros en un stream reproducible lanzando
//! `ffmpeg`. Para MIDI se encadena antes un sintetizador (FluidSynth o
//! TiMidity++) cuya salida PCM entra por el stdin de ffmpeg.

use serde::{Deserialize, Serialize};
use songbird::input::{ChildContainer, Input};
use std::{
    fmt,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    str::FromStr,
};
use tracing::{debug, info};

use crate::{audio::filters::RenderPlan, config::Config, error::RenderError};

/// Sample rate del PCM que producen los sintetizadores MIDI.
pub const MIDI_SAMPLE_RATE: u32 = 44_100;
const MIDI_CHANNELS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MidiRendererKind {
    /// MIDI deshabilitado.
    None,
    FluidSynth,
    Timidity,
}

impl FromStr for MidiRendererKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "fluidsynth" => Ok(Self::FluidSynth),
            "timidity" => Ok(Self::Timidity),
            other => anyhow::bail!("MIDI_IMPL desconocido: {other} (none|fluidsynth|timidity)"),
        }
    }
}

impl fmt::Display for MidiRendererKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::FluidSynth => "fluidsynth",
            Self::Timidity => "timidity",
        };
        f.write_str(name)
    }
}

/// Todo lo que el renderizador necesita para producir un stream.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub path: PathBuf,
    pub plan: RenderPlan,
    /// SoundFont a usar si el archivo es MIDI.
    pub soundfont: Option<PathBuf>,
}

impl RenderRequest {
    pub fn is_midi(&self) -> bool {
        self.soundfont.is_some()
    }
}

/// Costura hacia el proceso externo.
pub trait Renderer: Send + Sync + 'static {
    type Stream: Send + 'static;

    /// ¿Se pueden renderizar MIDIs con la configuración actual?
    fn midi_enabled(&self) -> bool;

    fn render(&self, request: &RenderRequest) -> Result<Self::Stream, RenderError>;
}

/// Programas y opciones del renderizador.
#[derive(Debug, Clone)]
pub struct RendererSettings {
    pub ffmpeg: String,
    pub fluidsynth: String,
    pub timidity: String,
    pub midi: MidiRendererKind,
    pub mute_channel: Option<u8>,
    pub opus_bitrate: u32,
}

impl From<&Config> for RendererSettings {
    fn from(config: &Config) -> Self {
        Self {
            ffmpeg: config.ffmpeg_path.clone(),
            fluidsynth: config.fluidsynth_path.clone(),
            timidity: config.timidity_path.clone(),
            midi: config.midi_impl,
            mute_channel: config.midi_mute_channel,
            opus_bitrate: config.opus_bitrate,
        }
    }
}

impl RendererSettings {
    /// Argumentos de ffmpeg. Con `piped_pcm` la entrada es PCM crudo por stdin.
    pub fn ffmpeg_args(&self, input: &Path, plan: &RenderPlan, piped_pcm: bool) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "warning", "-nostdin"]
            .into_iter()
            .map(String::from)
            .collect();

        if piped_pcm {
            // -nostdin no aplica: la entrada es justamente stdin
            args.pop();
            args.extend(
                [
                    "-f".to_string(),
                    "s16le".to_string(),
                    "-ar".to_string(),
                    MIDI_SAMPLE_RATE.to_string(),
                    "-ac".to_string(),
                    MIDI_CHANNELS.to_string(),
                    "-i".to_string(),
                    "pipe:0".to_string(),
                ],
            );
        } else {
            args.push("-i".to_string());
            args.push(input.to_string_lossy().into_owned());
        }

        args.push("-vn".to_string());
        if let Some(graph) = plan.filter_graph() {
            args.push("-af".to_string());
            args.push(graph);
        }
        args.extend(plan.extra_options.iter().cloned());

        // Seek de salida: aplica sobre el stream ya remuestreado
        if let Some(offset) = plan.start_offset {
            args.push("-ss".to_string());
            args.push(format!("{offset:.3}"));
        }

        args.extend(
            [
                "-ar",
                "48000",
                "-ac",
                "2",
                "-c:a",
                "libopus",
                "-b:a",
            ]
            .into_iter()
            .map(String::from),
        );
        args.push(self.opus_bitrate.to_string());
        args.extend(["-f", "ogg", "pipe:1"].into_iter().map(String::from));
        args
    }

    /// Programa y argumentos del sintetizador MIDI configurado.
    pub fn midi_command(&self, midi: &Path, soundfont: &Path) -> Option<(String, Vec<String>)> {
        let midi = midi.to_string_lossy().into_owned();
        let soundfont = soundfont.to_string_lossy().into_owned();

        match self.midi {
            MidiRendererKind::None => None,
            MidiRendererKind::FluidSynth => {
                if self.mute_channel.is_some() {
                    debug!("FluidSynth no soporta silenciar canales, se ignora MIDI_MUTE_CHANNEL");
                }
                let args = vec![
                    "-q".to_string(),
                    "-n".to_string(),
                    "-i".to_string(),
                    "-T".to_string(),
                    "raw".to_string(),
                    "-O".to_string(),
                    "s16".to_string(),
                    "-E".to_string(),
                    "little".to_string(),
                    "-r".to_string(),
                    MIDI_SAMPLE_RATE.to_string(),
                    "-o".to_string(),
                    format!("audio.output-channels={MIDI_CHANNELS}"),
                    "-F".to_string(),
                    "-".to_string(),
                    soundfont,
                    midi,
                ];
                Some((self.fluidsynth.clone(), args))
            }
            MidiRendererKind::Timidity => {
                let layout = if MIDI_CHANNELS == 1 { "M" } else { "S" };
                let mut args = vec![
                    "-x".to_string(),
                    format!("soundfont {soundfont}"),
                    format!("-Or1sl{layout}"),
                    "-s".to_string(),
                    MIDI_SAMPLE_RATE.to_string(),
                    "-o".to_string(),
                    "-".to_string(),
                ];
                if let Some(channel) = self.mute_channel {
                    args.push(format!("--mute={channel}"));
                }
                args.push(midi);
                Some((self.timidity.clone(), args))
            }
        }
    }
}

/// Renderizador real basado en procesos hijos.
#[derive(Debug, Clone)]
pub struct FfmpegRenderer {
    settings: RendererSettings,
}

impl FfmpegRenderer {
    pub fn new(settings: RendererSettings) -> Self {
        Self { settings }
    }

    fn spawn(program: &str, args: &[String], stdin: Stdio) -> Result<Child, RenderError> {
        debug!("🔧 {} {}", program, args.join(" "));
        Command::new(program)
            .args(args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| RenderError::Spawn {
                program: program.to_string(),
                source,
            })
    }
}

impl Renderer for FfmpegRenderer {
    type Stream = Input;

    fn midi_enabled(&self) -> bool {
        self.settings.midi != MidiRendererKind::None
    }

    fn render(&self, request: &RenderRequest) -> Result<Input, RenderError> {
        let Some(soundfont) = &request.soundfont else {
            let args = self.settings.ffmpeg_args(&request.path, &request.plan, false);
            let ffmpeg = Self::spawn(&self.settings.ffmpeg, &args, Stdio::null())?;
            return Ok(ChildContainer::from(ffmpeg).into());
        };

        let (program, midi_args) = self
            .settings
            .midi_command(&request.path, soundfont)
            .ok_or(RenderError::MidiDisabled)?;

        let mut synth = Self::spawn(&program, &midi_args, Stdio::null())?;
        let pcm = synth
            .stdout
            .take()
            .map(Stdio::from)
            .unwrap_or_else(Stdio::null);

        let args = self.settings.ffmpeg_args(&request.path, &request.plan, true);
        let ffmpeg = match Self::spawn(&self.settings.ffmpeg, &args, pcm) {
            Ok(child) => child,
            Err(e) => {
                let _ = synth.kill();
                let _ = synth.wait();
                return Err(e);
            }
        };

        info!("🎹 MIDI renderizado con {} ({})", self.settings.midi, soundfont.display());
        Ok(ChildContainer::from(vec![synth, ffmpeg]).into())
    }
}
