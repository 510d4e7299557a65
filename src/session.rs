// Session controller and pipeline driver.
//
// A `Session` is the station: the selected source, its playback rate, the
// listener registry and (while playing) one driver task. The driver owns the
// pacer and a single upstream slot that is either the direct source reader or
// a running mix. Injecting an effect swaps that slot in one step, so the
// pacer never has two upstreams.
//
//   Direct --inject--> Mixing --mix output ends--> Direct
//
// Everything the driver does happens on its own task; callers talk to it
// through a command channel and a cancellation token.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::broadcaster::Broadcaster;
use crate::config::EngineConfig;
use crate::effects;
use crate::error::{Error, Result};
use crate::listeners::{ListenerChannel, ListenerRegistry};
use crate::pacer::{Pacer, PlaybackRate};
use crate::prober::Prober;
use crate::source::{self, ByteSource};
use crate::tool::{AudioTool, MixProcess};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    /// Never started.
    Idle,
    Direct,
    Mixing,
    /// The source ran out.
    Finished,
    /// Stopped by the operator.
    Stopped,
}

impl PipelineState {
    pub fn is_running(self) -> bool {
        matches!(self, PipelineState::Direct | PipelineState::Mixing)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Finished | PipelineState::Stopped)
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PipelineState::Idle => "idle",
            PipelineState::Direct => "direct",
            PipelineState::Mixing => "mixing",
            PipelineState::Finished => "finished",
            PipelineState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionStatus {
    pub state: PipelineState,
    pub source: String,
    /// Bytes per second of the current (or last) run.
    pub rate: Option<u64>,
    pub listeners: usize,
}

enum Command {
    Inject {
        effect: PathBuf,
        reply: oneshot::Sender<Result<()>>,
    },
}

struct PipelineHandle {
    cancel: CancellationToken,
    commands: mpsc::Sender<Command>,
    task: JoinHandle<PipelineState>,
}

struct Inner {
    config: EngineConfig,
    tool: Arc<dyn AudioTool>,
    prober: Prober,
    broadcaster: Broadcaster,
    source: Mutex<String>,
    rate: Mutex<Option<PlaybackRate>>,
    state: Arc<watch::Sender<PipelineState>>,
    pipeline: Mutex<Option<PipelineHandle>>,
}

#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    pub fn new(config: EngineConfig, tool: Arc<dyn AudioTool>) -> Self {
        let listeners = ListenerRegistry::new(config.listener_buffer);
        let prober = Prober::new(tool.clone(), config.fallback_bit_rate, config.bit_rate_divisor);
        let (state, _) = watch::channel(PipelineState::Idle);
        Self {
            inner: Arc::new(Inner {
                source: Mutex::new(config.source.clone()),
                config,
                tool,
                prober,
                broadcaster: Broadcaster::new(listeners),
                rate: Mutex::new(None),
                state: Arc::new(state),
                pipeline: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        self.inner.broadcaster.listeners()
    }

    pub fn register(&self) -> (Uuid, ListenerChannel) {
        self.listeners().register()
    }

    pub fn unregister(&self, id: &Uuid) -> bool {
        self.listeners().unregister(id)
    }

    pub fn state(&self) -> PipelineState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PipelineState> {
        self.inner.state.subscribe()
    }

    /// Wait until the pipeline reaches `target`.
    pub async fn wait_until(&self, target: PipelineState) {
        let mut rx = self.subscribe_state();
        // The sender lives in `inner`, which we hold, so this can't close.
        let _ = rx.wait_for(|s| *s == target).await;
    }

    pub async fn playback_rate(&self) -> Option<PlaybackRate> {
        *self.inner.rate.lock().await
    }

    pub async fn source(&self) -> String {
        self.inner.source.lock().await.clone()
    }

    /// Pick the source used by the next `start`. A running pipeline keeps
    /// playing what it started with.
    pub async fn set_source(&self, name: impl Into<String>) {
        let name = name.into();
        tracing::info!("source set to {name}");
        *self.inner.source.lock().await = name;
    }

    pub async fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state(),
            source: self.source().await,
            rate: self.playback_rate().await.map(PlaybackRate::bytes_per_sec),
            listeners: self.listeners().len(),
        }
    }

    /// Resolve and probe the current source, then start paced playback to
    /// every listener. Returns the playback rate in use.
    pub async fn start(&self) -> Result<PlaybackRate> {
        if self.is_playing().await {
            return Err(Error::AlreadyRunning);
        }

        // Probing can take up to the probe timeout; keep the pipeline slot
        // free meanwhile so stop and inject stay responsive.
        let cfg = &self.inner.config;
        let name = self.source().await;
        let path = source::resolve(&cfg.audio_dir, &name).await?;
        let rate = self.inner.prober.probe(&path).await;
        let reader = source::open(&path).await?;

        let mut slot = self.inner.pipeline.lock().await;
        if let Some(handle) = slot.take() {
            if !handle.task.is_finished() {
                // Another start won while this one was probing.
                *slot = Some(handle);
                return Err(Error::AlreadyRunning);
            }
            // Previous run ended on its own; reap it.
            let _ = handle.task.await;
        }
        *self.inner.rate.lock().await = Some(rate);

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(8);
        self.inner.state.send_replace(PipelineState::Direct);

        let driver = Driver {
            broadcaster: self.inner.broadcaster.clone(),
            tool: self.inner.tool.clone(),
            state: self.inner.state.clone(),
            source_path: path.clone(),
            rate,
            commands: rx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(driver.run(reader));

        *slot = Some(PipelineHandle {
            cancel,
            commands: tx,
            task,
        });
        tracing::info!("playback start: {} at {rate}", path.display());
        Ok(rate)
    }

    async fn is_playing(&self) -> bool {
        let slot = self.inner.pipeline.lock().await;
        slot.as_ref().is_some_and(|h| !h.task.is_finished())
    }

    /// Stop playback. Listeners get an end-of-stream frame and stay
    /// registered. Returns the state the pipeline ended in; a no-op when
    /// nothing is running.
    pub async fn stop(&self) -> PipelineState {
        let handle = self.inner.pipeline.lock().await.take();
        let Some(handle) = handle else {
            return self.state();
        };

        handle.cancel.cancel();
        match handle.task.await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!("pipeline task failed: {e}");
                self.inner.state.send_replace(PipelineState::Stopped);
                PipelineState::Stopped
            }
        }
    }

    /// Mix the effect matching `name` into the live stream. Returns the
    /// resolved effect path.
    pub async fn inject(&self, name: &str) -> Result<PathBuf> {
        let effect = effects::find_effect(&self.inner.config.fx_dir, name).await?;

        let commands = {
            let slot = self.inner.pipeline.lock().await;
            match slot.as_ref() {
                Some(h) if !h.task.is_finished() => h.commands.clone(),
                _ => return Err(Error::NotRunning),
            }
        };

        let (reply, rx) = oneshot::channel();
        commands
            .send(Command::Inject {
                effect: effect.clone(),
                reply,
            })
            .await
            .map_err(|_| Error::NotRunning)?;
        rx.await.map_err(|_| Error::NotRunning)??;

        tracing::info!("effect injected: {}", effect.display());
        Ok(effect)
    }
}

struct ActiveMix {
    output: ByteSource,
    feeder: JoinHandle<()>,
    child: Option<Child>,
    effect: PathBuf,
}

impl ActiveMix {
    /// Stop feeding the mixer and reap its process.
    async fn teardown(self) {
        self.feeder.abort();
        drop(self.output);
        if let Some(mut child) = self.child {
            let _ = child.kill().await;
            match child.wait().await {
                Ok(status) => tracing::debug!("mixer exited: {status}"),
                Err(e) => tracing::warn!("mixer wait failed: {e}"),
            }
        }
        tracing::info!("mix finished: {}", self.effect.display());
    }
}

enum Upstream {
    Direct(ByteSource),
    Mixing(ActiveMix),
}

impl Upstream {
    fn reader(&mut self) -> &mut ByteSource {
        match self {
            Upstream::Direct(r) => r,
            Upstream::Mixing(m) => &mut m.output,
        }
    }
}

enum Event {
    Cancelled,
    Command(Option<Command>),
    Chunk(std::io::Result<Option<Bytes>>),
}

struct Driver {
    broadcaster: Broadcaster,
    tool: Arc<dyn AudioTool>,
    state: Arc<watch::Sender<PipelineState>>,
    source_path: PathBuf,
    rate: PlaybackRate,
    commands: mpsc::Receiver<Command>,
    cancel: CancellationToken,
}

impl Driver {
    async fn run(mut self, reader: ByteSource) -> PipelineState {
        let mut upstream = Upstream::Direct(reader);
        let mut pacer = Pacer::new(self.rate);

        let outcome = loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Event::Cancelled,
                cmd = self.commands.recv() => Event::Command(cmd),
                res = pacer.next_chunk(upstream.reader()) => Event::Chunk(res),
            };

            match event {
                Event::Cancelled | Event::Command(None) => {
                    if let Upstream::Mixing(mix) = upstream {
                        mix.teardown().await;
                    }
                    break PipelineState::Stopped;
                }
                Event::Command(Some(Command::Inject { effect, reply })) => {
                    let (next, result) = self.begin_mix(upstream, effect, &mut pacer);
                    upstream = next;
                    let _ = reply.send(result);
                }
                Event::Chunk(Ok(Some(chunk))) => {
                    self.broadcaster.broadcast(chunk);
                }
                Event::Chunk(end) => match upstream {
                    Upstream::Direct(_) => {
                        match end {
                            Err(e) => tracing::warn!("source read failed: {e}"),
                            Ok(_) => tracing::info!("source exhausted: {}", self.source_path.display()),
                        }
                        break PipelineState::Finished;
                    }
                    Upstream::Mixing(mix) => {
                        if let Err(e) = end {
                            tracing::warn!("pipe failure: mixer output: {e}");
                        }
                        mix.teardown().await;
                        pacer.switch_upstream();

                        // The source can't resume mid-track after a mix, so
                        // playback restarts it from the top.
                        match source::open(&self.source_path).await {
                            Ok(reader) => {
                                upstream = Upstream::Direct(reader);
                                self.state.send_replace(PipelineState::Direct);
                                tracing::info!("direct playback restored: {}", self.source_path.display());
                            }
                            Err(e) => {
                                tracing::warn!("could not reopen source after mix: {e}");
                                break PipelineState::Finished;
                            }
                        }
                    }
                },
            }
        };

        if let Some(rest) = pacer.terminate() {
            self.broadcaster.broadcast(rest);
        }
        self.broadcaster.end_of_stream();
        self.state.send_replace(outcome);
        tracing::info!("playback end: {outcome}");
        outcome
    }

    fn begin_mix(&self, upstream: Upstream, effect: PathBuf, pacer: &mut Pacer) -> (Upstream, Result<()>) {
        let source = match upstream {
            Upstream::Direct(source) => source,
            mixing @ Upstream::Mixing(_) => return (mixing, Err(Error::AlreadyMixing)),
        };

        let MixProcess { input, output, child } = match self.tool.mix(&effect) {
            Ok(mix) => mix,
            Err(e) => {
                tracing::warn!("mixer spawn failed for {}: {e}", effect.display());
                return (Upstream::Direct(source), Err(Error::Mix(e.to_string())));
            }
        };

        // Source bytes the pacer already holds go out before the mix.
        pacer.switch_upstream();
        let feeder = tokio::spawn(feed_mixer(source, input, effect.clone()));
        self.state.send_replace(PipelineState::Mixing);
        tracing::info!("mixing {} into {}", effect.display(), self.source_path.display());

        let mix = ActiveMix {
            output,
            feeder,
            child,
            effect,
        };
        (Upstream::Mixing(mix), Ok(()))
    }
}

/// Copy the rest of the direct source into the mixer's input. A failure here
/// only ends the feed; the mixer output keeps draining on its own.
async fn feed_mixer(mut source: ByteSource, mut input: Box<dyn AsyncWrite + Send + Unpin>, effect: PathBuf) {
    match tokio::io::copy(&mut source, &mut input).await {
        Ok(n) => tracing::debug!("fed {n} source bytes into mix of {}", effect.display()),
        Err(e) => tracing::warn!("pipe failure: source -> mixer ({}): {e}", effect.display()),
    }
    if let Err(e) = input.shutdown().await {
        tracing::debug!("mixer input close: {e}");
    }
}
