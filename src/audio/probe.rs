//! Lectura de metadata de audio con symphonia.

use anyhow::{Context as _, Result};
use std::{fs::File, path::Path};
use symphonia::core::{
    formats::FormatOptions, io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
};
use tracing::debug;

use crate::audio::descriptor::AudioMeta;

/// Analiza el contenedor y devuelve sample rate, duración, canales y codec
/// de la pista por defecto. No decodifica audio.
pub fn probe(path: &Path) -> Result<AudioMeta> {
    let file = File::open(path).with_context(|| format!("No se pudo abrir {}", path.display()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .with_context(|| format!("Formato no reconocido: {}", path.display()))?;

    let track = probed
        .format
        .default_track()
        .context("El archivo no tiene pistas de audio")?;
    let params = &track.codec_params;

    let sample_rate = params.sample_rate.context("Sample rate desconocido")?;
    let channels = params.channels.map(|c| c.count() as u16).unwrap_or(2);

    let duration_seconds = match (params.n_frames, params.time_base) {
        (Some(frames), Some(time_base)) => {
            let time = time_base.calc_time(frames);
            time.seconds as f64 + time.frac
        }
        (Some(frames), None) => frames as f64 / f64::from(sample_rate),
        _ => 0.0,
    };

    let codec = symphonia::default::get_codecs()
        .get_codec(params.codec)
        .map(|descriptor| descriptor.short_name.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let meta = AudioMeta {
        sample_rate,
        duration_seconds,
        channels,
        codec,
    };
    debug!("🔍 {}: {:?}", path.display(), meta);
    Ok(meta)
}

/// Versión async: el análisis es IO bloqueante.
pub async fn probe_async(path: &Path) -> Result<AudioMeta> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || probe(&path)).await?
}
