use std::time::Duration;

use anyhow::{Result, anyhow};
use songbird::driver::MixMode;

pub fn read_discord_token() -> Result<String> {
    const CANDIDATES: &[&str] = &["DISCORD_TOKEN", "DISCORD_BOT_TOKEN", "BOT_TOKEN"];
    for key in CANDIDATES {
        if let Ok(val) = std::env::var(key)
            && !val.is_empty()
        {
            return Ok(val);
        }
    }
    Err(anyhow!(
        "Set one of DISCORD_TOKEN, DISCORD_BOT_TOKEN, or BOT_TOKEN in environment"
    ))
}

/// How long a voice join may stay unconfirmed before the session aborts.
pub fn connect_timeout() -> Duration {
    let ms = std::env::var("CHORUS_CONNECT_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|ms| (1_000..=60_000).contains(ms))
        .unwrap_or(10_000);
    Duration::from_millis(ms)
}

/// Fixed Opus bitrate for voice sends, clamped to a sane range.
pub fn bitrate() -> u32 {
    std::env::var("CHORUS_BITRATE")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .filter(|v| (16_000..=192_000).contains(v))
        .unwrap_or(96_000)
}

/// Channel layout for the voice mixer. Stereo unless asked otherwise.
pub fn mix_mode() -> MixMode {
    parse_mix_mode(&std::env::var("CHORUS_MIX_MODE").unwrap_or_default())
}

fn parse_mix_mode(raw: &str) -> MixMode {
    match raw {
        "mono" => MixMode::Mono,
        _ => MixMode::Stereo,
    }
}

pub fn http_bind() -> String {
    std::env::var("CHORUS_HTTP_BIND").unwrap_or_else(|_| "0.0.0.0:3000".to_string())
}
