use std::{path::PathBuf, process::Stdio};

use anyhow::{Context as AnyhowContext, Result, anyhow};
use once_cell::sync::Lazy;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Deserialize;
use serenity::all::UserId;
use serenity::async_trait;
use tokio::{
    fs,
    io::{AsyncBufReadExt, BufReader},
    process::Command as TokioCommand,
    sync::mpsc,
    task::JoinHandle,
};
use tracing::warn;

use crate::player::{Recommender, Track};

static HTTP: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .user_agent("chorus-bot/0.1 (+https://github.com/)")
        .build()
        .expect("client")
});

const GITHUB_RELEASES_API: &str = "https://api.github.com/repos/yt-dlp/yt-dlp/releases/latest";

#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    name: String,
    browser_download_url: String,
}

#[derive(Debug, Deserialize)]
struct ReleaseInfo {
    assets: Vec<ReleaseAsset>,
}

fn cache_dir() -> Result<PathBuf> {
    let base = dirs::cache_dir().ok_or_else(|| anyhow!("no cache dir available on this system"))?;
    Ok(base.join("chorus").join("yt-dlp"))
}

fn platform_asset_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "yt-dlp.exe"
    } else if cfg!(target_os = "linux") {
        "yt-dlp_linux"
    } else if cfg!(target_os = "macos") {
        "yt-dlp_macos"
    } else {
        "yt-dlp"
    }
}

/// Locates yt-dlp on PATH, or fetches the platform build from the latest
/// GitHub release into the cache dir.
async fn ensure_yt_dlp() -> Result<PathBuf> {
    if let Ok(p) = which::which("yt-dlp") {
        return Ok(p);
    }

    let dir = cache_dir()?;
    fs::create_dir_all(&dir).await.ok();
    let local = dir.join(if cfg!(target_os = "windows") {
        "yt-dlp.exe"
    } else {
        "yt-dlp"
    });
    if fs::try_exists(&local).await.unwrap_or(false) {
        return Ok(local);
    }

    let resp = HTTP
        .get(GITHUB_RELEASES_API)
        .header(ACCEPT, "application/vnd.github+json")
        .send()
        .await?
        .error_for_status()?;
    let rel: ReleaseInfo = resp.json().await?;

    let wanted = platform_asset_name();
    let asset = rel
        .assets
        .into_iter()
        .find(|a| a.name == wanted)
        .ok_or_else(|| anyhow!("no suitable yt-dlp asset for this platform: {}", wanted))?;

    let bytes = HTTP
        .get(asset.browser_download_url)
        .header(USER_AGENT, "chorus-bot/0.1")
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?;

    fs::write(&local, &bytes).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&local).await?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&local, perms).await?;
    }
    Ok(local)
}

fn download_base_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("DOWNLOAD_FOLDER") {
        let p = PathBuf::from(dir);
        if p.is_absolute() {
            Ok(p)
        } else {
            Ok(std::env::current_dir()?.join(p))
        }
    } else {
        Ok(cache_dir()?.join("downloads"))
    }
}

/// Provider-side metadata for one URL, resolved without downloading.
#[derive(Debug, Clone)]
pub struct ProbeInfo {
    pub id: String,
    pub title: String,
    pub duration_secs: Option<u64>,
}

/// One yt-dlp invocation for id, duration, and title. Title goes last in the
/// template because it may contain the separator.
pub async fn probe(url: &str) -> Result<ProbeInfo> {
    let ytdlp = ensure_yt_dlp().await?;
    let out = TokioCommand::new(&ytdlp)
        .arg("--print")
        .arg("%(id)s|%(duration)s|%(title)s")
        .arg("--skip-download")
        .arg("--no-playlist")
        .arg("-q")
        .arg(url)
        .stdin(Stdio::null())
        .output()
        .await
        .context("running yt-dlp to probe url")?;
    if !out.status.success() {
        return Err(anyhow!("yt-dlp probe failed with status: {}", out.status));
    }
    let line = String::from_utf8_lossy(&out.stdout);
    let line = line.trim();
    let mut parts = line.splitn(3, '|');
    let id = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("empty id from yt-dlp"))?
        .to_string();
    let duration_secs = parts
        .next()
        .and_then(|s| s.parse::<f64>().ok())
        .map(|s| s.round() as u64);
    let title = parts.next().unwrap_or("").trim().to_string();
    Ok(ProbeInfo {
        id,
        title,
        duration_secs,
    })
}

#[derive(Clone, Debug)]
pub struct FetchProgress {
    pub percent: u8,
}

/// Downloads the audio as mp3 in the background, streaming progress updates.
/// Results are cached under the source id, so a repeated request is instant.
pub fn spawn_fetch(
    id: String,
    url: String,
) -> (
    mpsc::UnboundedReceiver<FetchProgress>,
    JoinHandle<Result<PathBuf>>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        let ytdlp = ensure_yt_dlp().await?;
        let base = download_base_dir()?;
        fs::create_dir_all(&base).await?;

        let cached = base.join(format!("{id}.mp3"));
        if fs::try_exists(&cached).await.unwrap_or(false) {
            let _ = tx.send(FetchProgress { percent: 100 });
            return Ok(cached);
        }

        // Work in a per-job directory so concurrent fetches never collide.
        let job = base.join(format!(
            "job-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ));
        fs::create_dir_all(&job).await?;

        let mut cmd = TokioCommand::new(&ytdlp);
        cmd.arg("-f")
            .arg("bestaudio/best")
            .arg("-x")
            .arg("--audio-format")
            .arg("mp3")
            .arg("--postprocessor-args")
            .arg("ffmpeg:-ar 48000 -ac 2") // 48kHz stereo, Discord's native format
            .arg("--no-playlist")
            .arg("--newline")
            .arg("-o")
            .arg(job.join("%(id)s.%(ext)s").to_string_lossy().to_string())
            .arg(&url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().context("spawning yt-dlp")?;
        // Progress lines go to stdout with --newline.
        if let Some(stdout) = child.stdout.take() {
            let mut reader = BufReader::new(stdout).lines();
            let mut last_sent = 255u8;
            while let Some(Ok(line)) = reader.next_line().await.transpose() {
                if let Some(pct) = parse_percent(&line)
                    && pct != last_sent
                {
                    let _ = tx.send(FetchProgress { percent: pct });
                    last_sent = pct;
                }
            }
        }
        let status = child.wait().await.context("waiting for yt-dlp")?;
        if !status.success() {
            return Err(anyhow!("yt-dlp failed with status: {status}"));
        }

        let produced = job.join(format!("{id}.mp3"));
        if !fs::try_exists(&produced).await.unwrap_or(false) {
            return Err(anyhow!("no mp3 produced"));
        }
        let final_path = if fs::rename(&produced, &cached).await.is_ok()
            || fs::copy(&produced, &cached).await.is_ok()
        {
            cached
        } else {
            produced.clone()
        };
        let _ = fs::remove_dir_all(&job).await;
        Ok(final_path)
    });

    (rx, handle)
}

/// Fetch without progress reporting, for autoplay lookups.
pub async fn fetch(id: String, url: String) -> Result<PathBuf> {
    let (rx, handle) = spawn_fetch(id, url);
    drop(rx);
    handle.await?
}

/// Finds one track related to the seed through the provider's mix playlist.
pub async fn related(seed: &Track) -> Result<Option<Track>> {
    let ytdlp = ensure_yt_dlp().await?;
    let mix = format!(
        "https://www.youtube.com/watch?v={id}&list=RD{id}",
        id = seed.source_id
    );
    let out = TokioCommand::new(&ytdlp)
        .arg("--flat-playlist")
        .arg("--playlist-items")
        .arg("1-5")
        .arg("--print")
        .arg("%(id)s|%(title)s")
        .arg("-q")
        .arg(&mix)
        .stdin(Stdio::null())
        .output()
        .await
        .context("running yt-dlp for related tracks")?;
    if !out.status.success() {
        return Err(anyhow!(
            "yt-dlp related lookup failed with status: {}",
            out.status
        ));
    }

    let stdout = String::from_utf8_lossy(&out.stdout);
    let Some((id, title)) = stdout
        .lines()
        .filter_map(|line| line.split_once('|'))
        .find(|(id, _)| !id.is_empty() && *id != seed.source_id)
        .map(|(id, title)| (id.to_string(), title.trim().to_string()))
    else {
        return Ok(None);
    };

    let url = format!("https://www.youtube.com/watch?v={id}");
    let media = fetch(id.clone(), url.clone()).await?;
    Ok(Some(Track {
        source_id: id,
        url,
        media: media.to_string_lossy().into_owned(),
        title,
        duration_secs: None,
        requested_by: seed.requested_by,
    }))
}

/// [`Recommender`] backed by the mix-playlist lookup above. Autoplay tracks
/// inherit the seed's requester.
pub struct MixRecommender;

#[async_trait]
impl Recommender for MixRecommender {
    async fn related(&self, seed: &Track) -> Result<Option<Track>> {
        match related(seed).await {
            Ok(found) => Ok(found),
            Err(e) => {
                warn!(seed = %seed.source_id, error = %e, "related lookup failed");
                Ok(None)
            }
        }
    }
}

/// Builds a fully resolved [`Track`] from a URL: probe metadata, then fetch
/// the playable file. Progress goes to the returned receiver.
pub fn spawn_resolve(
    url: String,
    requested_by: UserId,
) -> (
    mpsc::UnboundedReceiver<FetchProgress>,
    JoinHandle<Result<Track>>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        let info = probe(&url).await?;
        let (mut progress, fetch_handle) = spawn_fetch(info.id.clone(), url.clone());
        while let Some(update) = progress.recv().await {
            let _ = tx.send(update);
        }
        let media = fetch_handle.await??;
        Ok(Track {
            source_id: info.id,
            url,
            media: media.to_string_lossy().into_owned(),
            title: info.title,
            duration_secs: info.duration_secs,
            requested_by,
        })
    });
    (rx, handle)
}

fn parse_percent(line: &str) -> Option<u8> {
    // Matches the "[download]  42.3%" lines yt-dlp emits with --newline.
    let idx = line.find('%')?;
    let start = line[..idx].rfind(|c: char| !(c.is_ascii_digit() || c == '.'))? + 1;
    let num = &line[start..idx];
    num.parse::<f32>()
        .ok()
        .map(|val| val.round().clamp(0.0, 100.0) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_progress_lines() {
        assert_eq!(parse_percent("[download]  42.3% of 3.4MiB"), Some(42));
        assert_eq!(parse_percent("[download] 100% of 3.4MiB"), Some(100));
        assert_eq!(parse_percent("[info] writing metadata"), None);
    }
}
