//! Shared fixtures for the integration tests: a station directory on disk
//! and a fake mixing tool that never spawns a process.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use onair_engine::{AudioTool, EngineConfig, ListenerChannel, ListenerFrame, MixProcess, Session};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// How the fake mixer's output behaves.
#[derive(Clone, Debug)]
pub enum MixMode {
    /// Emit the payload, then end.
    Finite(Vec<u8>),
    /// Emit the payload, then stay open.
    Endless(Vec<u8>),
    /// The mixer can't be started.
    Fail,
}

pub struct FakeTool {
    bitrate: Option<String>,
    probe_delay: Duration,
    mode: MixMode,
    mixes: AtomicUsize,
}

impl FakeTool {
    /// `bitrate` of `None` makes every probe fail.
    pub fn new(bitrate: Option<&str>, mode: MixMode) -> Arc<Self> {
        Self::slow_probe(bitrate, Duration::ZERO, mode)
    }

    /// Like `new`, but every probe takes `delay` to answer.
    pub fn slow_probe(bitrate: Option<&str>, delay: Duration, mode: MixMode) -> Arc<Self> {
        Arc::new(Self {
            bitrate: bitrate.map(str::to_string),
            probe_delay: delay,
            mode,
            mixes: AtomicUsize::new(0),
        })
    }

    pub fn mixes(&self) -> usize {
        self.mixes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioTool for FakeTool {
    async fn bitrate(&self, _path: &Path) -> anyhow::Result<String> {
        tokio::time::sleep(self.probe_delay).await;
        self.bitrate.clone().ok_or_else(|| anyhow::anyhow!("no bitrate available"))
    }

    fn mix(&self, _effect: &Path) -> anyhow::Result<MixProcess> {
        let (payload, endless) = match &self.mode {
            MixMode::Finite(p) => (p.clone(), false),
            MixMode::Endless(p) => (p.clone(), true),
            MixMode::Fail => anyhow::bail!("mixer failed to start"),
        };
        self.mixes.fetch_add(1, Ordering::SeqCst);

        let (input, mut sink) = tokio::io::duplex(64 * 1024);
        let (mut writer, output) = tokio::io::duplex(64 * 1024);

        // Swallow whatever the session feeds in.
        tokio::spawn(async move {
            let mut fed = Vec::new();
            let _ = sink.read_to_end(&mut fed).await;
        });
        tokio::spawn(async move {
            let _ = writer.write_all(&payload).await;
            if endless {
                std::future::pending::<()>().await;
            }
        });

        Ok(MixProcess {
            input: Box::new(input),
            output: Box::new(output),
            child: None,
        })
    }
}

/// A temporary station: `audio/` with sources, `audio/fx/` with effects and
/// `public/` with the two pages.
pub struct Station {
    pub dir: TempDir,
}

impl Station {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("audio/fx")).unwrap();
        for page in ["home", "controller"] {
            let p = dir.path().join("public").join(page);
            std::fs::create_dir_all(&p).unwrap();
            std::fs::write(p.join("index.html"), format!("<h1>{page}</h1>")).unwrap();
        }
        Self { dir }
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.dir.path().join("audio")
    }

    pub fn add_source(&self, name: &str, bytes: &[u8]) {
        std::fs::write(self.audio_dir().join(name), bytes).unwrap();
    }

    pub fn add_effect(&self, name: &str) {
        std::fs::write(self.audio_dir().join("fx").join(name), b"fx").unwrap();
    }

    pub fn config(&self, source: &str) -> EngineConfig {
        EngineConfig {
            audio_dir: self.audio_dir(),
            fx_dir: self.audio_dir().join("fx"),
            public_dir: self.dir.path().join("public"),
            source: source.into(),
            ..EngineConfig::default()
        }
    }

    pub fn session(&self, source: &str, tool: Arc<FakeTool>) -> Session {
        Session::new(self.config(source), tool)
    }
}

/// Receive one frame, failing the test if nothing arrives in time.
pub async fn next_frame(rx: &mut ListenerChannel) -> ListenerFrame {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("listener channel closed")
}

/// Collect chunk payloads until end-of-stream.
pub async fn drain_until_end(rx: &mut ListenerChannel) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        match next_frame(rx).await {
            ListenerFrame::Chunk(b) => out.extend_from_slice(&b),
            ListenerFrame::EndOfStream => return out,
        }
    }
}
