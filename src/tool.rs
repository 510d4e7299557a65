// Mixing utility adapter.
//
// Bitrate probing and effect mixing are delegated to an external tool (SoX).
// The engine only talks to the `AudioTool` trait; `SoxTool` is the one place
// that builds command lines and spawns processes.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWrite;
use tokio::process::{Child, Command};

use crate::config::MixSettings;
use crate::source::ByteSource;

/// A running mix: feed the live source into `input`, read the composite
/// from `output`.
pub struct MixProcess {
    pub input: Box<dyn AsyncWrite + Send + Unpin>,
    pub output: ByteSource,
    /// The backing process, if any. Fakes used in tests have none.
    pub child: Option<Child>,
}

#[async_trait]
pub trait AudioTool: Send + Sync {
    /// Raw bitrate string for `path` as reported by the tool (e.g. "128k").
    async fn bitrate(&self, path: &Path) -> anyhow::Result<String>;

    /// Start mixing the effect at `effect` over whatever is written to the
    /// returned input.
    fn mix(&self, effect: &Path) -> anyhow::Result<MixProcess>;
}

pub struct SoxTool {
    program: String,
    mix: MixSettings,
    probe_timeout: Duration,
}

impl SoxTool {
    pub fn new(program: impl Into<String>, mix: MixSettings, probe_timeout: Duration) -> Self {
        Self {
            program: program.into(),
            mix,
            probe_timeout,
        }
    }
}

/// `sox --i -B <file>`: print the bitrate and nothing else.
pub fn info_args(path: &Path) -> Vec<String> {
    vec!["--i".into(), "-B".into(), path.to_string_lossy().to_string()]
}

/// Mix stdin (the live source) with `effect` and write the result to stdout.
///
/// `-m` merges the two inputs; `-` on the input side is stdin and on the
/// output side is stdout.
pub fn mix_args(mix: &MixSettings, effect: &Path) -> Vec<String> {
    vec![
        "-t".into(),
        mix.media_type.clone(),
        "-v".into(),
        mix.song_volume.clone(),
        "-m".into(),
        "-".into(),
        "-t".into(),
        mix.media_type.clone(),
        "-v".into(),
        mix.fx_volume.clone(),
        effect.to_string_lossy().to_string(),
        "-t".into(),
        mix.media_type.clone(),
        "-c".into(),
        mix.channels.to_string(),
        "-".into(),
    ]
}

#[async_trait]
impl AudioTool for SoxTool {
    async fn bitrate(&self, path: &Path) -> anyhow::Result<String> {
        let mut cmd = Command::new(&self.program);
        cmd.args(info_args(path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn()?;
        // wait_with_output drains stdout and stderr together, so neither pipe
        // can fill up and stall the process.
        let out = tokio::time::timeout(self.probe_timeout, child.wait_with_output())
            .await
            .map_err(|_| anyhow::anyhow!("sox info timed out after {:?}", self.probe_timeout))??;

        let stderr = String::from_utf8_lossy(&out.stderr);
        if !stderr.trim().is_empty() {
            anyhow::bail!("sox info: {}", stderr.trim());
        }
        let stdout = String::from_utf8_lossy(&out.stdout).trim().to_string();
        if stdout.is_empty() {
            anyhow::bail!("sox info produced no output ({})", out.status);
        }
        Ok(stdout)
    }

    fn mix(&self, effect: &Path) -> anyhow::Result<MixProcess> {
        let mut cmd = Command::new(&self.program);
        cmd.args(mix_args(&self.mix, effect))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let input = child.stdin.take().ok_or_else(|| anyhow::anyhow!("sox stdin unavailable"))?;
        let output = child.stdout.take().ok_or_else(|| anyhow::anyhow!("sox stdout unavailable"))?;
        tracing::info!("mixer started for {} (pid {:?})", effect.display(), child.id());

        Ok(MixProcess {
            input: Box::new(input),
            output: Box::new(output),
            child: Some(child),
        })
    }
}
