use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info};

mod audio;
mod bot;
mod config;
mod error;
mod storage;

use crate::audio::{
    audit::AuditLog,
    occupancy::OccupancyScheduler,
    renderer::{FfmpegRenderer, MidiRendererKind, RendererSettings},
    selection::RandomSelector,
    session::{PlaybackEngine, SessionContext, SystemClock},
};
use crate::bot::{presence::GuildPresence, transport::SongbirdTransport, EspionageBot, Gateway};
use crate::config::Config;
use crate::storage::DescriptorStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("espionage_bot=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🕵️ Iniciando Espionage Bot v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Arc::new(Config::load()?);

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }
    info!("{}", config.summary());

    // Descriptores de comandos y SoundFonts
    let store = Arc::new(
        DescriptorStore::load(
            config.upload_dir.clone(),
            config.files_json.clone(),
            config.soundfonts_json.clone(),
        )
        .await?,
    );
    info!("📂 {} comandos cargados", store.names().len());

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    // Motor de reproducción
    let songbird = Songbird::serenity();
    let gateway = Arc::new(Gateway::default());
    let transport = Arc::new(SongbirdTransport::new(
        Arc::clone(&songbird),
        Arc::clone(&gateway),
    ));
    let engine = Arc::new(PlaybackEngine::new(SessionContext {
        transport,
        renderer: FfmpegRenderer::new(RendererSettings::from(&*config)),
        store,
        selector: RandomSelector::new(),
        audit: AuditLog::new(config.log_csv.clone()),
        default_file: config.default_file.clone(),
        clock: Arc::new(SystemClock),
    }));

    let scheduler = Arc::new(OccupancyScheduler::new(
        Arc::new(GuildPresence::new(Arc::clone(&gateway), Arc::clone(&engine))),
        config.auto_join_delay,
        config.auto_join_move_delay,
    ));

    // Crear handler del bot
    let handler = EspionageBot::new(Arc::clone(&config), engine, scheduler);

    // Construir cliente
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;
    gateway.attach(Arc::clone(&client.http), Arc::clone(&client.cache));

    // Manejar shutdown graceful
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Error al registrar Ctrl+C");
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        std::process::exit(0);
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check(config: &Config) -> Result<()> {
    // Verificar dependencias críticas
    let mut checks = vec![(config.ffmpeg_path.as_str(), "-version")];
    match config.midi_impl {
        MidiRendererKind::FluidSynth => checks.push((config.fluidsynth_path.as_str(), "--version")),
        MidiRendererKind::Timidity => checks.push((config.timidity_path.as_str(), "--version")),
        MidiRendererKind::None => {}
    }

    let mut missing = Vec::new();
    for (program, flag) in checks {
        let ok = async_process::Command::new(program)
            .arg(flag)
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false);
        if !ok {
            missing.push(program);
        }
    }

    if missing.is_empty() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes: {}", missing.join(", "));
    }
}
