use crate::address::Addr;
use crate::analysis::{detect_r2dec, AnalysisOutcome};
use crate::arch::{TargetDescription, ToolProfile, OPEN_DEFAULTS};
use crate::cache::AnalysisCache;
use crate::config::{Config, DisplayConfig, DEFAULT_TOOL};
use crate::error::{BrokenReason, Error};
use crate::mapping::{MappedRegion, RangeMapper};
use crate::memory::{MemoryProvider, NoProvider};
use crate::pipe::Pipe;
use crate::pipeline::{self, Job};
use crate::version::{self, Version};
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, SyncSender};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

/// Observer of session events.
///
/// Callbacks arrive outside of any internal lock but possibly from the
/// pipeline thread, implementations decide how to get back to their own
/// thread. All methods default to no-ops.
pub trait SessionHook: Send + Sync {
    /// The connection to the tool stopped working. Fired once per break,
    /// before any reopen attempt.
    fn on_broken(&self, reason: BrokenReason) {
        _ = reason;
    }

    /// A command changed the tool environment.
    fn on_env_changed(&self) {}

    /// A seek triggered analysis finished.
    fn on_analysis(&self, outcome: &AnalysisOutcome) {
        _ = outcome;
    }
}

/// Hook that ignores every event.
pub struct NopHook;

impl SessionHook for NopHook {}

#[derive(Debug, Clone)]
struct CurrentSeek {
    /// Seek position exactly as the tool printed it, used to restore the
    /// position in a freshly spawned process.
    raw: String,
    addr: Option<Addr>,
}

struct PipeSlot {
    pipe: Option<Pipe>,
    broken: Option<BrokenReason>,
}

enum CommandClass {
    Seek,
    EnvSet,
    Plain,
}

/// What a completed command did to the session state.
enum CmdEffect {
    None,
    Seeked(Option<Addr>),
    EnvChanged,
}

fn classify(cmd: &str) -> CommandClass {
    let trimmed = cmd.trim();
    let mut tokens = trimmed.split_whitespace();
    match tokens.next() {
        Some("s") if tokens.next().is_some() => CommandClass::Seek,
        Some("e") if trimmed.contains('=') => CommandClass::EnvSet,
        _ => CommandClass::Plain,
    }
}

/// Numeric target of a seek command. Symbolic seeks (`s main`) return
/// `None`, only the tool can resolve those.
fn seek_target(cmd: &str) -> Option<Addr> {
    cmd.trim().strip_prefix('s')?.trim().parse().ok()
}

fn display_commands(display: &DisplayConfig) -> String {
    format!(
        "e scr.color={}; e scr.html={}; e scr.utf8={};",
        display.color, display.html, display.utf8
    )
}

/// Session state shared between callers and the pipeline thread.
pub(crate) struct SessionCore {
    config: Config,
    target: String,
    tool: PathBuf,
    tool_name: String,
    tool_version: Option<Version>,
    decompile_cmd: &'static str,
    slot: Mutex<PipeSlot>,
    seek: Mutex<Option<CurrentSeek>>,
    profile: Mutex<Option<ToolProfile>>,
    hook: Box<dyn SessionHook>,
    provider: Box<dyn MemoryProvider>,
    pub(crate) mapper: RangeMapper,
    pub(crate) cache: AnalysisCache,
    busy: AtomicBool,
}

impl SessionCore {
    /// Run `f` against the live pipe under the command serializer lock.
    ///
    /// This is the single place where breaks are detected and recorded
    /// and where a recorded break turns into a reopen. Every multi
    /// command sequence that must not interleave with other callers goes
    /// through one `with_pipe` call.
    fn with_pipe<R>(
        &self,
        f: impl FnOnce(&mut Pipe) -> Result<R, BrokenReason>,
    ) -> Result<R, Error> {
        let mut slot = self.lock_slot();
        if let Some(reason) = slot.broken {
            if !reason.should_reopen() {
                return Err(Error::Closed);
            }
            self.reopen(&mut slot)?;
        }

        let pipe = slot.pipe.as_mut().ok_or(Error::Closed)?;
        match f(pipe) {
            Ok(value) => Ok(value),
            Err(reason) => {
                slot.broken = Some(reason);
                slot.pipe = None;
                drop(slot);
                log::warn!(target: "r2bridge", "pipe is broken: {reason}");
                self.hook.on_broken(reason);
                Err(Error::PipeBroken(reason))
            }
        }
    }

    /// Replace a dead tool process and bring the new one up to date:
    /// analysis defaults, display settings, architecture profile, seek
    /// position. Mapped regions are forgotten, the cache is kept.
    fn reopen(&self, slot: &mut PipeSlot) -> Result<(), Error> {
        let reason = slot.broken.take().unwrap_or(BrokenReason::ClosedByTool);
        log::info!(target: "r2bridge", "reopening tool process after break ({reason})");

        let mut pipe = match Pipe::open(
            &self.tool,
            &self.target,
            Duration::from_millis(self.config.read_timeout_ms),
            self.config.read_retry_limit,
        ) {
            Ok(pipe) => pipe,
            Err(e) => {
                slot.broken = Some(reason);
                return Err(e);
            }
        };

        if let Err(new_reason) = self.reinit_pipe(&mut pipe) {
            slot.broken = Some(new_reason);
            return Err(Error::PipeBroken(new_reason));
        }

        slot.pipe = Some(pipe);
        slot.broken = None;
        self.mapper.forget_all();
        Ok(())
    }

    fn reinit_pipe(&self, pipe: &mut Pipe) -> Result<(), BrokenReason> {
        pipe.exchange(OPEN_DEFAULTS)?;
        pipe.exchange(&display_commands(&self.config.display))?;
        if let Some(profile) = self.lock_profile().clone() {
            pipe.exchange(&profile.apply_commands())?;
        }
        if let Some(seek) = self.lock_seek().clone() {
            pipe.exchange(&format!("s {}", seek.raw))?;
        }
        Ok(())
    }

    /// One command, one response.
    pub(crate) fn exchange(&self, cmd: &str) -> Result<String, Error> {
        self.with_pipe(|pipe| pipe.exchange(cmd))
    }

    /// One command with display markup suppressed for the duration, so
    /// the response stays machine parseable whatever the configured
    /// display settings are.
    pub(crate) fn exchange_plain(&self, cmd: &str) -> Result<String, Error> {
        let restore = self.config.display.html;
        self.with_pipe(|pipe| {
            pipe.exchange("e scr.html=0")?;
            let out = pipe.exchange(cmd)?;
            if restore {
                pipe.exchange("e scr.html=1")?;
            }
            Ok(out)
        })
    }

    /// Move the tool seek and confirm where it actually landed. Both
    /// exchanges run in one critical section.
    pub(crate) fn seek_to(&self, addr: Addr) -> Result<(), Error> {
        let confirmed = self.with_pipe(|pipe| {
            pipe.exchange(&format!("s {addr}"))?;
            pipe.exchange("s")
        })?;
        self.record_seek(confirmed);
        Ok(())
    }

    fn run_cmd(&self, cmd: &str) -> Result<(String, CmdEffect), Error> {
        match classify(cmd) {
            CommandClass::Seek => {
                let previous = self.current_seek();
                // seeking to the tracked position is a no-op, the tool is
                // not bothered and no analysis is triggered
                if previous.is_some() && seek_target(cmd) == previous {
                    return Ok((String::new(), CmdEffect::Seeked(None)));
                }
                let (out, confirmed) = self.with_pipe(|pipe| {
                    let out = pipe.exchange(cmd)?;
                    let confirmed = pipe.exchange("s")?;
                    Ok((out, confirmed))
                })?;
                self.record_seek(confirmed);

                let now = self.current_seek();
                let effect = match now {
                    Some(addr) if now != previous => CmdEffect::Seeked(Some(addr)),
                    _ => CmdEffect::Seeked(None),
                };
                Ok((out, effect))
            }
            CommandClass::EnvSet => {
                let out = self.exchange(cmd)?;
                self.hook.on_env_changed();
                Ok((out, CmdEffect::EnvChanged))
            }
            CommandClass::Plain => Ok((self.exchange(cmd)?, CmdEffect::None)),
        }
    }

    fn record_seek(&self, confirmed: String) {
        let raw = confirmed.trim().to_string();
        let addr = raw.parse::<Addr>().ok();
        if addr.is_none() {
            log::warn!(target: "r2bridge", "seek confirmation not an address: `{raw}`");
        }
        *self.lock_seek() = Some(CurrentSeek { raw, addr });
    }

    pub(crate) fn current_seek(&self) -> Option<Addr> {
        self.lock_seek().as_ref().and_then(|seek| seek.addr)
    }

    /// Make sure the region containing `addr` is mapped into the running
    /// tool process.
    pub(crate) fn ensure_mapped(&self, addr: Addr) -> Result<(MappedRegion, bool), Error> {
        self.mapper
            .ensure_mapped(self.provider.as_ref(), addr, |cmd| self.exchange(cmd))
    }

    pub(crate) fn decompile_cmd(&self) -> &'static str {
        self.decompile_cmd
    }

    pub(crate) fn hook(&self) -> &dyn SessionHook {
        self.hook.as_ref()
    }

    pub(crate) fn try_acquire_busy(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release_busy(&self) {
        self.busy.store(false, Ordering::Release);
    }

    fn close(&self) {
        let mut slot = self.lock_slot();
        if slot.broken == Some(BrokenReason::Shutdown) {
            return;
        }
        slot.broken = Some(BrokenReason::Shutdown);
        if let Some(mut pipe) = slot.pipe.take() {
            pipe.shutdown(&self.tool_name);
        }
        drop(slot);
        self.mapper.forget_all();
        self.mapper.remove_dir();
        log::info!(target: "r2bridge", "session closed");
    }

    fn lock_slot(&self) -> MutexGuard<'_, PipeSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_seek(&self) -> MutexGuard<'_, Option<CurrentSeek>> {
        self.seek.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_profile(&self) -> MutexGuard<'_, Option<ToolProfile>> {
        self.profile.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct SessionBuilder {
    target: String,
    config: Config,
    hook: Box<dyn SessionHook>,
    provider: Box<dyn MemoryProvider>,
    profile: Option<ToolProfile>,
}

impl SessionBuilder {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            config: Config::default(),
            hook: Box::new(NopHook),
            provider: Box::new(NoProvider),
            profile: None,
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_hook(mut self, hook: impl SessionHook + 'static) -> Self {
        self.hook = Box::new(hook);
        self
    }

    pub fn with_provider(mut self, provider: impl MemoryProvider + 'static) -> Self {
        self.provider = Box::new(provider);
        self
    }

    /// Architecture profile applied right at open, before any analysis.
    pub fn with_profile(mut self, profile: ToolProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn open(self) -> Result<Session, Error> {
        Session::open(self)
    }
}

/// Long lived connection to one analysis tool subprocess.
///
/// A session serializes commands from any number of threads, tracks the
/// seek position, maps target memory on demand and owns the background
/// analysis pipeline. When the subprocess dies the session records why
/// and, unless it was closed deliberately, respawns it on the next
/// command.
pub struct Session {
    core: Arc<SessionCore>,
    jobs: Sender<Job>,
    worker: Option<JoinHandle<()>>,
}

impl Session {
    pub fn builder(target: impl Into<String>) -> SessionBuilder {
        SessionBuilder::new(target)
    }

    fn open(builder: SessionBuilder) -> Result<Session, Error> {
        let config = builder.config;
        let tool = match &config.tool_path {
            Some(path) => path.clone(),
            None => which::which(DEFAULT_TOOL)?,
        };
        let tool_name = tool
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_TOOL.to_string());

        let mut pipe = Pipe::open(
            &tool,
            &builder.target,
            Duration::from_millis(config.read_timeout_ms),
            config.read_retry_limit,
        )?;

        let report = pipe.exchange("?V").map_err(Error::PipeBroken)?;
        let tool_version = Version::tool_parse(&report);
        match tool_version {
            Some(v) if version::probe_report(&report) => {
                log::info!(target: "r2bridge", "tool version {v}")
            }
            Some(v) => log::warn!(target: "r2bridge", "tool version {v} is older than supported"),
            None => log::warn!(target: "r2bridge", "tool version report not recognized"),
        }

        pipe.exchange(OPEN_DEFAULTS).map_err(Error::PipeBroken)?;
        pipe.exchange(&display_commands(&config.display))
            .map_err(Error::PipeBroken)?;

        let plugins = pipe.exchange("e cmd.pdc=?").map_err(Error::PipeBroken)?;
        let decompile_cmd = config.decompiler.command(detect_r2dec(&plugins));
        log::debug!(target: "r2bridge", "decompile command: {decompile_cmd}");

        if let Some(profile) = &builder.profile {
            pipe.exchange(&profile.apply_commands())
                .map_err(Error::PipeBroken)?;
        }

        let mapper = RangeMapper::new(&config.snapshot_dir())?;

        let core = Arc::new(SessionCore {
            config,
            target: builder.target,
            tool,
            tool_name,
            tool_version,
            decompile_cmd,
            slot: Mutex::new(PipeSlot {
                pipe: Some(pipe),
                broken: None,
            }),
            seek: Mutex::new(None),
            profile: Mutex::new(builder.profile),
            hook: builder.hook,
            provider: builder.provider,
            mapper,
            cache: AnalysisCache::default(),
            busy: AtomicBool::new(false),
        });

        let (jobs, worker) = pipeline::spawn_worker(core.clone());
        Ok(Session {
            core,
            jobs,
            worker: Some(worker),
        })
    }

    /// Execute one command and return its response.
    ///
    /// A seek command additionally re-queries the landed position, and a
    /// position change schedules mapping and analysis in the background.
    /// An environment change notifies the hook.
    pub fn cmd(&self, cmd: &str) -> Result<String, Error> {
        let (out, effect) = self.core.run_cmd(cmd)?;
        if let CmdEffect::Seeked(Some(addr)) = effect {
            self.schedule_analysis(addr);
        }
        Ok(out)
    }

    /// Like [`Session::cmd`], but a triggered analysis is waited out
    /// before returning. For callers that need the mapping visible to
    /// their very next command.
    pub fn cmd_sync(&self, cmd: &str) -> Result<String, Error> {
        let (out, effect) = self.core.run_cmd(cmd)?;
        if let CmdEffect::Seeked(Some(addr)) = effect {
            let rx = self.submit_analysis(addr)?;
            _ = rx.recv();
        }
        Ok(out)
    }

    /// Execute one command and parse its json response. A response that is
    /// not json yields `Value::Null`, structured queries are best effort
    /// inspection; transport failures still error.
    pub fn cmdj(&self, cmd: &str) -> Result<serde_json::Value, Error> {
        let raw = self.core.exchange_plain(cmd)?;
        Ok(serde_json::from_str(&raw).unwrap_or_else(|e| {
            log::warn!(target: "r2bridge", "`{cmd}` response is not json: {e}");
            serde_json::Value::Null
        }))
    }

    /// Execute one command and deserialize its json response, defaulting on
    /// undecodable output like [`Session::cmdj`] does.
    pub fn cmdj_into<T: DeserializeOwned + Default>(&self, cmd: &str) -> Result<T, Error> {
        let raw = self.core.exchange_plain(cmd)?;
        Ok(serde_json::from_str(&raw).unwrap_or_else(|e| {
            log::warn!(target: "r2bridge", "`{cmd}` response is not decodable: {e}");
            T::default()
        }))
    }

    /// Current environment of the tool as a key to value map.
    pub fn list_env(&self) -> Result<serde_json::Map<String, serde_json::Value>, Error> {
        match self.cmdj("ej")? {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(Error::UnexpectedResponse {
                command: "ej".to_string(),
                details: format!("expected an object, got {other}"),
            }),
        }
    }

    /// Translate and apply an architecture profile. The profile survives
    /// tool process reopens.
    pub fn apply_profile(&self, target: &TargetDescription) -> Result<(), Error> {
        let profile = ToolProfile::from_target(target);
        self.core.exchange(&profile.apply_commands())?;
        *self.core.lock_profile() = Some(profile);
        self.core.hook.on_env_changed();
        Ok(())
    }

    /// Analyze the function around `addr`: seek there, map the region,
    /// run the analysis and deliver one [`AnalysisOutcome`] on the
    /// returned channel. Fails with [`Error::Busy`] while another
    /// pipeline request is in flight.
    pub fn analyze_at(&self, addr: Addr) -> Result<Receiver<AnalysisOutcome>, Error> {
        self.submit_analysis(addr)
    }

    /// Basic block graph of the function around `addr`. Delivers an empty
    /// string when the address resolves into no analyzable function.
    pub fn graph_at(&self, addr: Addr) -> Result<Receiver<String>, Error> {
        self.submit(|reply| Job::Graph { addr, reply })
    }

    /// Decompiled listing of the function around `addr`, produced by the
    /// backend selected at open.
    pub fn decompile_at(&self, addr: Addr) -> Result<Receiver<String>, Error> {
        self.submit(|reply| Job::Decompile { addr, reply })
    }

    pub fn current_seek(&self) -> Option<Addr> {
        self.core.current_seek()
    }

    pub fn cache(&self) -> &AnalysisCache {
        &self.core.cache
    }

    pub fn tool_version(&self) -> Option<Version> {
        self.core.tool_version
    }

    pub fn target(&self) -> &str {
        &self.core.target
    }

    /// Close the session for good: kill the tool process and remove the
    /// snapshot directory. Further commands fail with [`Error::Closed`].
    pub fn close(&self) {
        self.core.close();
    }

    fn submit_analysis(&self, addr: Addr) -> Result<Receiver<AnalysisOutcome>, Error> {
        self.submit(|reply| Job::Analyze {
            addr,
            reply: Some(reply),
        })
    }

    fn submit<T>(&self, job: impl FnOnce(SyncSender<T>) -> Job) -> Result<Receiver<T>, Error> {
        if !self.core.try_acquire_busy() {
            return Err(Error::Busy);
        }
        let (tx, rx) = mpsc::sync_channel(1);
        if self.jobs.send(job(tx)).is_err() {
            self.core.release_busy();
            return Err(Error::Disconnected);
        }
        Ok(rx)
    }

    /// Background half of [`Session::cmd`] seek handling: skipped with a
    /// log line instead of an error when the pipeline is occupied.
    fn schedule_analysis(&self, addr: Addr) {
        if !self.core.try_acquire_busy() {
            log::debug!(target: "r2bridge", "pipeline busy, analysis at {addr} skipped");
            return;
        }
        if self.jobs.send(Job::Analyze { addr, reply: None }).is_err() {
            self.core.release_busy();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        _ = self.jobs.send(Job::Shutdown);
        if let Some(worker) = self.worker.take() {
            _ = worker.join();
        }
        self.core.close();
    }
}
