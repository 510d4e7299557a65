// Engine configuration.
//
// Everything is read from ONAIR_* environment variables with sensible
// defaults, so a bare `onair-engine` starts against ./audio with sox on PATH.
// Numeric values that fail to parse are logged and replaced by the default
// instead of aborting startup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Arguments that shape the mix-mode invocation of the mixing utility.
#[derive(Clone, Debug, PartialEq)]
pub struct MixSettings {
    /// Container/media type passed with `-t` for every stream ("mp3").
    pub media_type: String,
    /// Volume applied to the live source while an effect plays.
    pub song_volume: String,
    /// Volume applied to the effect asset.
    pub fx_volume: String,
    /// Output channel count.
    pub channels: u8,
}

impl Default for MixSettings {
    fn default() -> Self {
        Self {
            media_type: "mp3".into(),
            song_volume: "0.99".into(),
            fx_volume: "0.1".into(),
            channels: 2,
        }
    }
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub bind: SocketAddr,
    /// Directory holding playable sources.
    pub audio_dir: PathBuf,
    /// Directory holding effect assets.
    pub fx_dir: PathBuf,
    /// Web assets (home/controller pages).
    pub public_dir: PathBuf,
    /// Source file name (relative to `audio_dir`) played on start.
    pub source: String,
    /// Path or name of the sox binary.
    pub sox: String,
    pub mix: MixSettings,
    /// Bits per second assumed when probing fails.
    pub fallback_bit_rate: u64,
    /// Bits per byte used to turn a bitrate into a byte rate.
    pub bit_rate_divisor: u64,
    /// Frames a listener channel may hold before chunks are dropped for it.
    pub listener_buffer: usize,
    pub probe_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let audio_dir = PathBuf::from("audio");
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            fx_dir: audio_dir.join("fx"),
            public_dir: PathBuf::from("public"),
            audio_dir,
            source: "conversation.mp3".into(),
            sox: "sox".into(),
            mix: MixSettings::default(),
            fallback_bit_rate: 128_000,
            bit_rate_divisor: 8,
            listener_buffer: 256,
            probe_timeout: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. `from_env` is the only
    /// production caller; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let audio_dir = lookup("ONAIR_AUDIO_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.audio_dir);
        // fx lives under the audio dir unless pointed elsewhere.
        let fx_dir = lookup("ONAIR_FX_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| audio_dir.join("fx"));

        let mix = MixSettings {
            media_type: lookup("ONAIR_MEDIA_TYPE").unwrap_or(defaults.mix.media_type),
            song_volume: lookup("ONAIR_SONG_VOLUME").unwrap_or(defaults.mix.song_volume),
            fx_volume: lookup("ONAIR_FX_VOLUME").unwrap_or(defaults.mix.fx_volume),
            channels: parse_or(&lookup, "ONAIR_CHANNELS", defaults.mix.channels),
        };

        let bit_rate_divisor = match parse_or(&lookup, "ONAIR_BIT_RATE_DIVISOR", defaults.bit_rate_divisor) {
            0 => {
                tracing::warn!("ONAIR_BIT_RATE_DIVISOR must be non-zero; using {}", defaults.bit_rate_divisor);
                defaults.bit_rate_divisor
            }
            v => v,
        };

        Self {
            bind: parse_or(&lookup, "ONAIR_BIND", defaults.bind),
            audio_dir,
            fx_dir,
            public_dir: lookup("ONAIR_PUBLIC_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.public_dir),
            source: lookup("ONAIR_SOURCE").unwrap_or(defaults.source),
            sox: lookup("ONAIR_SOX").unwrap_or(defaults.sox),
            mix,
            fallback_bit_rate: parse_or(&lookup, "ONAIR_FALLBACK_BIT_RATE", defaults.fallback_bit_rate),
            bit_rate_divisor,
            listener_buffer: parse_or(&lookup, "ONAIR_LISTENER_BUFFER", defaults.listener_buffer).max(1),
            probe_timeout: Duration::from_millis(parse_or(
                &lookup,
                "ONAIR_PROBE_TIMEOUT_MS",
                defaults.probe_timeout.as_millis() as u64,
            )),
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!("{key}={raw:?} is not valid; using default {default}");
                default
            }
        },
        None => default,
    }
}
