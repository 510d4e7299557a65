//! Bitrate probing with a fallback rate.
//!
//! Probing must never hold up playback: every failure is logged and turned
//! into the configured fallback rate.

use std::path::Path;
use std::sync::Arc;

use crate::pacer::PlaybackRate;
use crate::tool::AudioTool;

pub struct Prober {
    tool: Arc<dyn AudioTool>,
    fallback_bit_rate: u64,
    bit_rate_divisor: u64,
}

impl Prober {
    pub fn new(tool: Arc<dyn AudioTool>, fallback_bit_rate: u64, bit_rate_divisor: u64) -> Self {
        Self {
            tool,
            fallback_bit_rate,
            bit_rate_divisor,
        }
    }

    pub fn fallback(&self) -> PlaybackRate {
        PlaybackRate::from_bits(self.fallback_bit_rate, self.bit_rate_divisor)
    }

    pub async fn probe(&self, path: &Path) -> PlaybackRate {
        let raw = match self.tool.bitrate(path).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("bitrate probe failed for {}: {e}; using fallback", path.display());
                return self.fallback();
            }
        };

        match parse_bitrate(&raw) {
            Some(bits) if bits > 0 => {
                let rate = PlaybackRate::from_bits(bits, self.bit_rate_divisor);
                tracing::info!("probed {} at {raw} ({rate})", path.display());
                rate
            }
            _ => {
                tracing::warn!("unrecognised bitrate {raw:?} for {}; using fallback", path.display());
                self.fallback()
            }
        }
    }
}

/// Parse a bitrate string such as "128k", "1.41M" or "96000" into bits/s.
pub fn parse_bitrate(raw: &str) -> Option<u64> {
    let s = raw.trim();
    let (num, mult) = match s.chars().last()? {
        'k' | 'K' => (&s[..s.len() - 1], 1_000.0),
        'M' => (&s[..s.len() - 1], 1_000_000.0),
        _ => (s, 1.0),
    };
    let v: f64 = num.trim().parse().ok()?;
    if !v.is_finite() || v < 0.0 {
        return None;
    }
    Some((v * mult).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::tool::MixProcess;

    struct Canned(anyhow::Result<String>);

    #[async_trait]
    impl AudioTool for Canned {
        async fn bitrate(&self, _path: &Path) -> anyhow::Result<String> {
            match &self.0 {
                Ok(s) => Ok(s.clone()),
                Err(e) => Err(anyhow::anyhow!("{e}")),
            }
        }

        fn mix(&self, _effect: &Path) -> anyhow::Result<MixProcess> {
            anyhow::bail!("not used")
        }
    }

    fn prober(reply: anyhow::Result<String>) -> Prober {
        Prober::new(Arc::new(Canned(reply)), 128_000, 8)
    }

    #[test]
    fn parses_common_shapes() {
        assert_eq!(parse_bitrate("128k"), Some(128_000));
        assert_eq!(parse_bitrate(" 64K\n"), Some(64_000));
        assert_eq!(parse_bitrate("1.41M"), Some(1_410_000));
        assert_eq!(parse_bitrate("96000"), Some(96_000));
        assert_eq!(parse_bitrate("fast"), None);
        assert_eq!(parse_bitrate("k"), None);
        assert_eq!(parse_bitrate(""), None);
    }

    #[tokio::test]
    async fn valid_output_is_divided() {
        let rate = prober(Ok("128k".into())).probe(Path::new("a.mp3")).await;
        assert_eq!(rate.bytes_per_sec(), 16_000);
    }

    #[tokio::test]
    async fn failures_use_fallback() {
        let fallback = PlaybackRate::new(16_000);
        let p = prober(Err(anyhow::anyhow!("sox FAIL formats: can't open input file")));
        assert_eq!(p.probe(Path::new("a.mp3")).await, fallback);
        assert_eq!(prober(Ok("not-a-rate".into())).probe(Path::new("a.mp3")).await, fallback);
        assert_eq!(prober(Ok("0k".into())).probe(Path::new("a.mp3")).await, fallback);
    }
}
