//! Sesión de reproducción por guild.
//!
//! Cada guild tiene un actor propio que procesa sus comandos de a uno por
//! vez: pedidos de reproducción, fines de pista, recargas tras ediciones y
//! salidas. Guilds distintas corren en paralelo.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::seq::SliceRandom;
use serenity::model::id::{ChannelId, GuildId};
use std::{path::PathBuf, sync::Arc};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::{
    audio::{
        audit::{AuditEntry, AuditLog},
        descriptor::{CommandDescriptor, PACK_ICON},
        filters::build_plan,
        ledger::{PlayRequest, ReplayRecord, Requester},
        renderer::{RenderRequest, Renderer},
        selection::{RandomSelector, ScopeKey},
        transport::{CompletionHook, VoiceTransport},
    },
    error::{PlaybackError, RenderError},
    storage::DescriptorStore,
};

/// Fuente de la hora para los registros de reproducción.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// Reloj del sistema.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

type Reply<T> = oneshot::Sender<Result<T, PlaybackError>>;

/// Mensajes que consume el actor de una guild.
#[derive(Debug)]
pub enum SessionCommand {
    /// Conectar (o mover) al canal y resolver el pedido.
    Play {
        channel: ChannelId,
        requester: Requester,
        request: PlayRequest,
        reply: Reply<ResolveOutcome>,
    },
    /// Entrada automática con el archivo ambiental.
    AutoJoin {
        channel: ChannelId,
        requester: Requester,
        reply: Reply<ResolveOutcome>,
    },
    /// Terminó la pista de la generación indicada.
    Finished { generation: u64 },
    /// Reiniciar lo que suena; con `only_if` solo si suena ese comando.
    Reload {
        only_if: Option<String>,
        rewind: bool,
        reply: Reply<ResolveOutcome>,
    },
    Leave { reply: Reply<()> },
    /// El bot fue desconectado por fuera de la sesión.
    Disconnected,
    Inspect(oneshot::Sender<Option<ReplayRecord>>),
}

/// Qué hizo la sesión con un pedido.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveOutcome {
    NotConnected,
    Started {
        descriptor: Option<String>,
        file: PathBuf,
    },
    Resumed,
    Unchanged,
    Left,
    /// No se pudo arrancar el stream nuevo. Si falló el render lo anterior
    /// sigue sonando; si falló el transporte la sesión queda vacía.
    Skipped(String),
    NoCandidates,
}

/// Dependencias compartidas por todos los actores.
pub struct SessionContext<T, R> {
    pub transport: Arc<T>,
    pub renderer: R,
    pub store: Arc<DescriptorStore>,
    pub selector: RandomSelector,
    pub audit: AuditLog,
    pub default_file: PathBuf,
    pub clock: Arc<dyn Clock>,
}

/// Punto de entrada: rutea cada pedido al actor de su guild.
pub struct PlaybackEngine<T, R> {
    context: Arc<SessionContext<T, R>>,
    sessions: DashMap<GuildId, flume::Sender<SessionCommand>>,
}

impl<T, R> PlaybackEngine<T, R>
where
    T: VoiceTransport,
    R: Renderer<Stream = T::Stream>,
{
    pub fn new(context: SessionContext<T, R>) -> Self {
        Self {
            context: Arc::new(context),
            sessions: DashMap::new(),
        }
    }

    /// Tabla de descriptores compartida con los comandos de edición.
    pub fn store(&self) -> &Arc<DescriptorStore> {
        &self.context.store
    }

    /// Conexión de voz, para los eventos que llegan del gateway.
    pub fn transport(&self) -> &Arc<T> {
        &self.context.transport
    }

    fn mailbox(&self, guild: GuildId) -> flume::Sender<SessionCommand> {
        self.sessions
            .entry(guild)
            .or_insert_with(|| {
                let (tx, rx) = flume::unbounded();
                let session = GuildSession::new(guild, Arc::clone(&self.context), tx.clone());
                tokio::spawn(session.run(rx));
                debug!("🧵 Actor de sesión creado para guild {}", guild);
                tx
            })
            .clone()
    }

    async fn request<V>(
        &self,
        guild: GuildId,
        build: impl FnOnce(Reply<V>) -> SessionCommand,
    ) -> Result<V, PlaybackError> {
        let (tx, rx) = oneshot::channel();
        self.mailbox(guild)
            .send_async(build(tx))
            .await
            .map_err(|_| PlaybackError::SessionClosed(guild))?;
        rx.await.map_err(|_| PlaybackError::SessionClosed(guild))?
    }

    pub async fn play(
        &self,
        guild: GuildId,
        channel: ChannelId,
        requester: Requester,
        request: PlayRequest,
    ) -> Result<ResolveOutcome, PlaybackError> {
        self.request(guild, |reply| SessionCommand::Play {
            channel,
            requester,
            request,
            reply,
        })
        .await
    }

    pub async fn auto_join(
        &self,
        guild: GuildId,
        channel: ChannelId,
        requester: Requester,
    ) -> Result<ResolveOutcome, PlaybackError> {
        self.request(guild, |reply| SessionCommand::AutoJoin {
            channel,
            requester,
            reply,
        })
        .await
    }

    /// Reinicia lo que suena: desde el principio con `rewind`, si no desde
    /// la posición actual.
    pub async fn reload(&self, guild: GuildId, rewind: bool) -> Result<ResolveOutcome, PlaybackError> {
        self.request(guild, |reply| SessionCommand::Reload {
            only_if: None,
            rewind,
            reply,
        })
        .await
    }

    /// Recarga tras editar `name`, solo si es lo que suena en la guild.
    pub async fn reload_if_current(
        &self,
        guild: GuildId,
        name: &str,
    ) -> Result<ResolveOutcome, PlaybackError> {
        let only_if = Some(name.to_string());
        self.request(guild, |reply| SessionCommand::Reload {
            only_if,
            rewind: false,
            reply,
        })
        .await
    }

    pub async fn leave(&self, guild: GuildId) -> Result<(), PlaybackError> {
        self.request(guild, |reply| SessionCommand::Leave { reply }).await
    }

    /// El bot quedó fuera del canal. La sesión se descarta; el próximo
    /// pedido de la guild arranca una nueva.
    pub fn disconnected(&self, guild: GuildId) {
        if let Some((_, mailbox)) = self.sessions.remove(&guild) {
            let _ = mailbox.send(SessionCommand::Disconnected);
        }
    }

    /// Registro de lo que suena en la guild. No crea sesión si no existe.
    pub async fn current(&self, guild: GuildId) -> Option<ReplayRecord> {
        let mailbox = self.sessions.get(&guild).map(|entry| entry.value().clone())?;
        let (tx, rx) = oneshot::channel();
        mailbox.send_async(SessionCommand::Inspect(tx)).await.ok()?;
        rx.await.ok().flatten()
    }
}

/// Archivo concreto a reproducir y cómo.
#[derive(Debug, Clone)]
struct Target {
    descriptor_name: Option<String>,
    descriptor: Option<CommandDescriptor>,
    file: PathBuf,
    loop_enabled: bool,
    original: PlayRequest,
}

enum Source {
    Request(PlayRequest),
    /// Mismo descriptor y archivo que el registro (recarga).
    Pinned(ReplayRecord),
}

enum Resolved {
    Target(Target),
    /// No cambiar lo asignado.
    Nothing,
    NoCandidates,
}

struct GuildSession<T, R> {
    guild: GuildId,
    context: Arc<SessionContext<T, R>>,
    mailbox: flume::Sender<SessionCommand>,
    record: Option<ReplayRecord>,
    hook: Option<CompletionHook>,
    generation: u64,
}

impl<T, R> GuildSession<T, R>
where
    T: VoiceTransport,
    R: Renderer<Stream = T::Stream>,
{
    fn new(guild: GuildId, context: Arc<SessionContext<T, R>>, mailbox: flume::Sender<SessionCommand>) -> Self {
        Self {
            guild,
            context,
            mailbox,
            record: None,
            hook: None,
            generation: 0,
        }
    }

    async fn run(mut self, inbox: flume::Receiver<SessionCommand>) {
        while let Ok(command) = inbox.recv_async().await {
            let last = matches!(command, SessionCommand::Disconnected);
            self.handle(command).await;
            if last {
                break;
            }
        }
        debug!("🧵 Actor de sesión terminado para guild {}", self.guild);
    }

    async fn handle(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Play {
                channel,
                requester,
                request,
                reply,
            } => {
                let outcome = self.play(channel, requester, request).await;
                let _ = reply.send(outcome);
            }
            SessionCommand::AutoJoin {
                channel,
                requester,
                reply,
            } => {
                let outcome = self.auto_join(channel, requester).await;
                let _ = reply.send(outcome);
            }
            SessionCommand::Finished { generation } => self.finished(generation).await,
            SessionCommand::Reload {
                only_if,
                rewind,
                reply,
            } => {
                let outcome = self.reload(only_if, rewind).await;
                let _ = reply.send(outcome);
            }
            SessionCommand::Leave { reply } => {
                self.leave().await;
                let _ = reply.send(Ok(()));
            }
            SessionCommand::Disconnected => self.disconnected().await,
            SessionCommand::Inspect(reply) => {
                let _ = reply.send(self.record.clone());
            }
        }
    }

    async fn play(
        &mut self,
        channel: ChannelId,
        requester: Requester,
        request: PlayRequest,
    ) -> Result<ResolveOutcome, PlaybackError> {
        // Validar antes de tocar la conexión
        if let PlayRequest::Named(name) = &request {
            if !self.context.store.contains(name) {
                return Err(PlaybackError::UnknownCommand(name.clone()));
            }
        }

        if !self.connect_to(channel).await {
            return Ok(ResolveOutcome::NotConnected);
        }
        self.resolve(Source::Request(request), requester, false, 0.0).await
    }

    async fn auto_join(&mut self, channel: ChannelId, requester: Requester) -> Result<ResolveOutcome, PlaybackError> {
        let transport = Arc::clone(&self.context.transport);
        if transport.current_channel(self.guild).is_some() && transport.is_playing(self.guild).await {
            debug!("🎧 Auto-join omitido en guild {}: ya hay audio sonando", self.guild);
            return Ok(ResolveOutcome::Unchanged);
        }

        if !self.connect_to(channel).await {
            return Ok(ResolveOutcome::NotConnected);
        }
        self.resolve(Source::Request(PlayRequest::DefaultFile), requester, false, 0.0)
            .await
    }

    /// Conecta si no hay conexión o mueve si está en otro canal.
    async fn connect_to(&mut self, channel: ChannelId) -> bool {
        let transport = Arc::clone(&self.context.transport);
        let result = match transport.current_channel(self.guild) {
            None => transport.connect(self.guild, channel).await,
            Some(current) if current != channel => transport.move_to(self.guild, channel).await,
            Some(_) => Ok(()),
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("🔌 Guild {}: {}", self.guild, e);
                false
            }
        }
    }

    async fn finished(&mut self, generation: u64) {
        if generation != self.generation {
            debug!(
                "⏭️ Fin de pista obsoleto en guild {} (gen {} != {})",
                self.guild, generation, self.generation
            );
            return;
        }
        self.hook = None;

        let Some(record) = self.record.clone() else {
            return;
        };
        let source = Source::Request(record.original_request.clone());
        match self.resolve(source, record.requester, true, 0.0).await {
            Ok(outcome) => debug!("🔁 Continuación en guild {}: {:?}", self.guild, outcome),
            Err(e) => warn!("🔁 Continuación fallida en guild {}: {}", self.guild, e),
        }
    }

    async fn reload(&mut self, only_if: Option<String>, rewind: bool) -> Result<ResolveOutcome, PlaybackError> {
        let Some(record) = self.record.clone() else {
            return Ok(ResolveOutcome::Unchanged);
        };
        if let Some(name) = only_if {
            if record.descriptor_name.as_deref() != Some(name.as_str()) {
                return Ok(ResolveOutcome::Unchanged);
            }
        }

        let start = if rewind {
            0.0
        } else {
            record.resume_offset(self.context.clock.now())
        };
        info!(
            "🔄 Recargando en guild {}: {} a {}, desde {:.02}s",
            self.guild,
            record.resolved_file.display(),
            record.speed_at_start,
            start
        );

        let requester = record.requester.clone();
        self.resolve(Source::Pinned(record), requester, false, start).await
    }

    /// Decide si arrancar, reanudar, dejar como está o salir.
    async fn resolve(
        &mut self,
        source: Source,
        requester: Requester,
        continuation: bool,
        start: f64,
    ) -> Result<ResolveOutcome, PlaybackError> {
        let transport = Arc::clone(&self.context.transport);
        let Some(channel) = transport.current_channel(self.guild) else {
            debug!("🔇 Guild {} sin conexión de voz", self.guild);
            return Ok(ResolveOutcome::NotConnected);
        };

        let target = match self.target(source).await {
            Ok(Resolved::Target(target)) => Some(target),
            Ok(Resolved::Nothing) => None,
            Ok(Resolved::NoCandidates) => {
                debug!("🎲 Sin candidatos en guild {}", self.guild);
                return Ok(ResolveOutcome::NoCandidates);
            }
            Err(PlaybackError::ResourceMissing(path)) => {
                warn!("❌ No existe {} en guild {}", path.display(), self.guild);
                self.leave().await;
                return Err(PlaybackError::ResourceMissing(path));
            }
            Err(e) => return Err(e),
        };
        let loop_enabled = target.as_ref().map_or(true, |t| t.loop_enabled);

        if let Some(target) = &target {
            if !tokio::fs::try_exists(&target.file).await.unwrap_or(false) {
                warn!("❌ No existe {} en guild {}", target.file.display(), self.guild);
                self.leave().await;
                return Err(PlaybackError::ResourceMissing(target.file.clone()));
            }
        }

        // El loop se desactivó mientras sonaba el archivo que terminó
        if continuation && !loop_enabled {
            info!("⏹️ Loop desactivado, saliendo de guild {}", self.guild);
            self.leave().await;
            return Ok(ResolveOutcome::Left);
        }

        // Con algo asignado, el pedido reemplaza lo que suena; `start` corta
        // el stream viejo recién cuando el nuevo está renderizado
        let replacing = target.is_some() && self.record.is_some();
        if replacing {
            // Un pedido más nuevo ganó la carrera contra esta continuación
            if continuation && transport.is_playing(self.guild).await {
                return Ok(ResolveOutcome::Unchanged);
            }
        } else if transport.is_playing(self.guild).await {
            return Ok(ResolveOutcome::Unchanged);
        } else if transport.is_paused(self.guild).await {
            if let Err(e) = transport.resume(self.guild) {
                warn!("⏯️ Guild {}: {}", self.guild, e);
                return Ok(ResolveOutcome::Unchanged);
            }
            info!("⏯️ Reanudado en guild {}", self.guild);
            return Ok(ResolveOutcome::Resumed);
        }

        let Some(target) = target else {
            return Ok(ResolveOutcome::Unchanged);
        };
        self.start(channel, requester, target, start).await
    }

    async fn target(&self, source: Source) -> Result<Resolved, PlaybackError> {
        let store = &self.context.store;

        match source {
            Source::Pinned(record) => {
                let descriptor = record.descriptor_name.as_deref().and_then(|name| store.get(name));
                let loop_enabled = loop_mode(descriptor.as_ref(), &record.original_request);
                Ok(Resolved::Target(Target {
                    descriptor_name: record.descriptor_name,
                    descriptor,
                    file: record.resolved_file,
                    loop_enabled,
                    original: record.original_request,
                }))
            }
            Source::Request(PlayRequest::KeepCurrent) => Ok(Resolved::Nothing),
            Source::Request(PlayRequest::DefaultFile) => Ok(Resolved::Target(Target {
                descriptor_name: None,
                descriptor: None,
                file: self.context.default_file.clone(),
                loop_enabled: true,
                original: PlayRequest::DefaultFile,
            })),
            Source::Request(PlayRequest::Named(name)) => {
                let descriptor = store
                    .get(&name)
                    .ok_or_else(|| PlaybackError::UnknownCommand(name.clone()))?;
                self.descriptor_target(name.clone(), descriptor, PlayRequest::Named(name))
                    .await
            }
            Source::Request(PlayRequest::Random) => {
                let picked = self.context.selector.pick(
                    ScopeKey::Guild(self.guild),
                    store.snapshot(),
                    |(_, descriptor)| store.resolve_path(descriptor.location()).to_string_lossy().into_owned(),
                );
                let Some((name, descriptor)) = picked else {
                    return Ok(Resolved::NoCandidates);
                };
                self.descriptor_target(name, descriptor, PlayRequest::Random).await
            }
        }
    }

    async fn descriptor_target(
        &self,
        name: String,
        descriptor: CommandDescriptor,
        original: PlayRequest,
    ) -> Result<Resolved, PlaybackError> {
        let store = &self.context.store;

        let file = if descriptor.is_pack() {
            let members = store
                .pack_members(&descriptor)
                .await
                .map_err(|_| PlaybackError::ResourceMissing(store.resolve_path(descriptor.location())))?;
            let scope = ScopeKey::Pack {
                guild: self.guild,
                pack: name.clone(),
            };
            let Some(member) = self.context.selector.pick(scope, members, String::clone) else {
                return Ok(Resolved::NoCandidates);
            };
            store.resolve_path(&member)
        } else {
            store.resolve_path(descriptor.location())
        };

        Ok(Resolved::Target(Target {
            loop_enabled: loop_mode(Some(&descriptor), &original),
            descriptor_name: Some(name),
            descriptor: Some(descriptor),
            file,
            original,
        }))
    }

    async fn start(
        &mut self,
        channel: ChannelId,
        requester: Requester,
        target: Target,
        start: f64,
    ) -> Result<ResolveOutcome, PlaybackError> {
        let descriptor = target.descriptor.as_ref();
        let speed = descriptor.map(CommandDescriptor::speed).unwrap_or_default();
        // El seek se hace sobre el stream ya remuestreado
        let plan = build_plan(descriptor, start / speed.factor());

        let soundfont = match descriptor.filter(|d| d.is_midi()) {
            Some(midi) => match self.choose_soundfont(midi) {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!("🎹 MIDI omitido en guild {}: {}", self.guild, e);
                    return Ok(ResolveOutcome::Skipped(e.to_string()));
                }
            },
            None => None,
        };

        let request = RenderRequest {
            path: target.file.clone(),
            plan,
            soundfont,
        };
        let stream = match self.context.renderer.render(&request) {
            Ok(stream) => stream,
            Err(e) => {
                warn!("🎛️ Render omitido en guild {}: {}", self.guild, e);
                return Ok(ResolveOutcome::Skipped(e.to_string()));
            }
        };

        let transport = Arc::clone(&self.context.transport);
        self.stop_current();
        self.generation += 1;
        let hook = CompletionHook::new(self.guild, self.generation, self.mailbox.clone());
        if let Err(e) = transport.play(self.guild, stream, hook.clone()).await {
            warn!("🔊 Guild {}: {}", self.guild, e);
            // El stream anterior ya se cortó: no queda nada asignado
            hook.detach();
            self.generation += 1;
            if self.record.take().is_some() {
                transport.set_nickname(self.guild, None).await;
            }
            return Ok(ResolveOutcome::Skipped(e.to_string()));
        }
        self.hook = Some(hook);

        let now = self.context.clock.now();
        self.record = Some(ReplayRecord::started(
            self.guild,
            channel,
            requester.clone(),
            target.descriptor_name.clone(),
            target.original.clone(),
            target.file.clone(),
            speed,
            start,
            now,
        ));

        self.context
            .audit
            .append(&AuditEntry {
                at: now,
                guild: self.guild,
                requester,
                request: target.original.clone(),
                file: self.context.store.relative_path(&target.file),
                speed,
            })
            .await;

        info!(
            "▶️ Reproduciendo {} en guild {} - inicio: {:.02}s, velocidad: {}",
            target.descriptor_name.as_deref().unwrap_or("(ambiental)"),
            self.guild,
            start,
            speed
        );

        let label = target
            .descriptor_name
            .as_deref()
            .map(|name| status_label(name, descriptor.is_some_and(CommandDescriptor::is_pack)));
        transport.set_nickname(self.guild, label).await;

        Ok(ResolveOutcome::Started {
            descriptor: target.descriptor_name,
            file: target.file,
        })
    }

    /// SoundFont del descriptor o, si no tiene uno válido, uno cualquiera de
    /// la tabla.
    fn choose_soundfont(&self, descriptor: &CommandDescriptor) -> Result<PathBuf, RenderError> {
        if !self.context.renderer.midi_enabled() {
            return Err(RenderError::MidiDisabled);
        }

        let table = self.context.store.soundfonts();
        let mut rng = rand::thread_rng();
        let chosen = descriptor
            .soundfonts()
            .choose(&mut rng)
            .and_then(|name| table.iter().find(|(key, _)| key == name))
            .or_else(|| table.choose(&mut rng))
            .ok_or(RenderError::NoSoundfont)?;

        Ok(self.context.store.resolve_path(&chosen.1.filename))
    }

    /// Detiene el stream actual desactivando antes su hook.
    fn stop_current(&mut self) {
        if let Some(hook) = self.hook.take() {
            hook.detach();
        }
        self.context.transport.stop(self.guild);
    }

    async fn leave(&mut self) {
        self.stop_current();
        self.generation += 1;
        self.record = None;

        let transport = Arc::clone(&self.context.transport);
        if let Err(e) = transport.disconnect(self.guild).await {
            debug!("👋 Guild {}: {}", self.guild, e);
        }
        transport.set_nickname(self.guild, None).await;
        info!("👋 Saliendo del canal de voz en guild {}", self.guild);
    }

    async fn disconnected(&mut self) {
        // El transporte ya soltó la pista; `stop` podría cortar la de una
        // sesión nueva de la misma guild
        if let Some(hook) = self.hook.take() {
            hook.detach();
        }
        self.generation += 1;
        self.record = None;
        self.context.transport.set_nickname(self.guild, None).await;
        debug!("🔌 Sesión limpiada tras desconexión en guild {}", self.guild);
    }
}

/// `loop = descriptor.loop OR random OR pack`; sin descriptor siempre loop.
fn loop_mode(descriptor: Option<&CommandDescriptor>, original: &PlayRequest) -> bool {
    match descriptor {
        Some(descriptor) => {
            descriptor.loop_enabled || descriptor.is_pack() || *original == PlayRequest::Random
        }
        None => true,
    }
}

fn status_label(name: &str, pack: bool) -> String {
    if pack {
        format!("{PACK_ICON} !{name}")
    } else {
        format!("!{name}")
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::error::TransportError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Default)]
    pub struct FakeState {
        pub channel: Option<ChannelId>,
        pub active: Option<(RenderRequest, CompletionHook)>,
        pub paused: bool,
        pub started: Vec<RenderRequest>,
        pub stops: usize,
        pub disconnects: usize,
        pub connects: usize,
        pub nicknames: Vec<Option<String>>,
    }

    /// Transporte en memoria de una sola guild.
    #[derive(Debug, Default)]
    pub struct FakeTransport {
        pub state: Mutex<FakeState>,
        pub refuse_connect: bool,
        pub refuse_play: AtomicBool,
    }

    impl FakeTransport {
        /// Termina la pista activa como lo haría el driver.
        pub fn finish(&self) {
            let active = self.state.lock().active.take();
            if let Some((_, hook)) = active {
                hook.fire();
            }
        }

        /// Desconexión por fuera del bot: el driver suelta la pista sin
        /// avisar el fin.
        pub fn drop_connection(&self) {
            let mut state = self.state.lock();
            state.channel = None;
            state.active = None;
            state.paused = false;
        }

        pub fn started(&self) -> usize {
            self.state.lock().started.len()
        }

        pub fn last_request(&self) -> Option<RenderRequest> {
            self.state.lock().started.last().cloned()
        }

        pub fn active_hook(&self) -> Option<CompletionHook> {
            self.state.lock().active.as_ref().map(|(_, hook)| hook.clone())
        }
    }

    #[async_trait]
    impl VoiceTransport for FakeTransport {
        type Stream = RenderRequest;

        async fn connect(&self, _guild: GuildId, channel: ChannelId) -> Result<(), TransportError> {
            if self.refuse_connect {
                return Err(TransportError::Join("sin permisos".into()));
            }
            let mut state = self.state.lock();
            state.channel = Some(channel);
            state.connects += 1;
            Ok(())
        }

        async fn move_to(&self, _guild: GuildId, channel: ChannelId) -> Result<(), TransportError> {
            self.state.lock().channel = Some(channel);
            Ok(())
        }

        async fn disconnect(&self, _guild: GuildId) -> Result<(), TransportError> {
            let mut state = self.state.lock();
            if state.channel.take().is_none() {
                return Err(TransportError::NotConnected);
            }
            state.disconnects += 1;
            Ok(())
        }

        fn current_channel(&self, _guild: GuildId) -> Option<ChannelId> {
            self.state.lock().channel
        }

        async fn is_playing(&self, _guild: GuildId) -> bool {
            let state = self.state.lock();
            state.active.is_some() && !state.paused
        }

        async fn is_paused(&self, _guild: GuildId) -> bool {
            let state = self.state.lock();
            state.active.is_some() && state.paused
        }

        async fn play(
            &self,
            _guild: GuildId,
            stream: RenderRequest,
            hook: CompletionHook,
        ) -> Result<(), TransportError> {
            if self.refuse_play.load(Ordering::SeqCst) {
                return Err(TransportError::Play("driver caído".into()));
            }
            let mut state = self.state.lock();
            assert!(state.active.is_none(), "dos streams simultáneos en la guild");
            state.started.push(stream.clone());
            state.active = Some((stream, hook));
            state.paused = false;
            Ok(())
        }

        fn pause(&self, _guild: GuildId) -> Result<(), TransportError> {
            let mut state = self.state.lock();
            if state.active.is_none() {
                return Err(TransportError::NotConnected);
            }
            state.paused = true;
            Ok(())
        }

        fn resume(&self, _guild: GuildId) -> Result<(), TransportError> {
            self.state.lock().paused = false;
            Ok(())
        }

        fn stop(&self, _guild: GuildId) {
            let mut state = self.state.lock();
            if state.active.take().is_some() {
                state.stops += 1;
            }
            state.paused = false;
        }

        async fn set_nickname(&self, _guild: GuildId, label: Option<String>) {
            self.state.lock().nicknames.push(label);
        }
    }

    /// Devuelve el pedido como "stream".
    #[derive(Debug, Default)]
    pub struct FakeRenderer {
        pub midi: bool,
        pub broken: bool,
    }

    impl Renderer for FakeRenderer {
        type Stream = RenderRequest;

        fn midi_enabled(&self) -> bool {
            self.midi
        }

        fn render(&self, request: &RenderRequest) -> Result<RenderRequest, RenderError> {
            if self.broken {
                return Err(RenderError::Spawn {
                    program: "ffmpeg".into(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                });
            }
            Ok(request.clone())
        }
    }

    #[derive(Debug)]
    pub struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        pub fn new() -> Self {
            Self(Mutex::new(Utc::now()))
        }

        pub fn advance(&self, seconds: i64) {
            *self.0.lock() += chrono::Duration::seconds(seconds);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock()
        }
    }

    pub struct Harness {
        pub engine: PlaybackEngine<FakeTransport, FakeRenderer>,
        pub transport: Arc<FakeTransport>,
        pub clock: Arc<ManualClock>,
        pub store: Arc<DescriptorStore>,
        pub dir: tempfile::TempDir,
    }

    pub const GUILD: GuildId = GuildId::new(1);
    pub const CHANNEL: ChannelId = ChannelId::new(10);

    pub fn requester() -> Requester {
        Requester {
            id: serenity::model::id::UserId::new(100),
            name: "tester".into(),
        }
    }

    pub async fn harness_with(transport: FakeTransport, renderer: FakeRenderer) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(crate::storage::test_support::empty_store(dir.path()).await);
        let default_file = dir.path().join("espionage.mp3");
        std::fs::write(&default_file, b"ambient").unwrap();

        let transport = Arc::new(transport);
        let clock = Arc::new(ManualClock::new());
        let engine = PlaybackEngine::new(SessionContext {
            transport: Arc::clone(&transport),
            renderer,
            store: Arc::clone(&store),
            selector: RandomSelector::new(),
            audit: AuditLog::disabled(),
            default_file,
            clock: clock.clone(),
        });

        Harness {
            engine,
            transport,
            clock,
            store,
            dir,
        }
    }

    pub async fn harness() -> Harness {
        harness_with(FakeTransport::default(), FakeRenderer::default()).await
    }

    impl Harness {
        pub async fn play(&self, request: PlayRequest) -> Result<ResolveOutcome, PlaybackError> {
            self.engine.play(GUILD, CHANNEL, requester(), request).await
        }

        pub async fn play_named(&self, name: &str) -> Result<ResolveOutcome, PlaybackError> {
            self.play(PlayRequest::Named(name.to_string())).await
        }

        /// Termina la pista y espera a que el actor procese el aviso.
        pub async fn finish(&self) {
            self.transport.finish();
            self.engine.current(GUILD).await;
        }
    }
}
