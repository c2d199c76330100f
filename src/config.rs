use std::path::{Path, PathBuf};
use std::time::Duration;
use clap::Parser;
use log::info;

pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 52_428_800; // 50 MB
const DB_FILENAME: &str = "mediavault.db.json";

#[derive(Parser, Debug, Clone)]
pub struct FlatConfig {
    #[arg(long, env = "MEDIAVAULT_ROOT", help = "Media root directory [default: ~/.mediavault]")]
    pub root: Option<PathBuf>,

    #[arg(long, env = "MEDIAVAULT_BIND", default_value = "127.0.0.1:1698", help = "HTTP listen address")]
    pub bind: String,

    #[arg(long, env = "MEDIAVAULT_MAX_UPLOAD_SIZE", default_value_t = DEFAULT_MAX_UPLOAD_SIZE, help = "Maximum upload size in bytes")]
    pub max_upload_size: u64,

    #[arg(long, env = "MEDIAVAULT_FFMPEG", default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,

    #[arg(long, env = "MEDIAVAULT_FFPROBE", default_value = "ffprobe")]
    pub ffprobe: PathBuf,

    #[arg(long, env = "MEDIAVAULT_TRANSCODE_TIMEOUT", default_value = "60s", value_parser = humantime::parse_duration)]
    pub transcode_timeout: Duration,

    #[arg(long, env = "MEDIAVAULT_CACHE_FLUSH_INTERVAL", default_value = "1h", value_parser = humantime::parse_duration)]
    pub cache_flush_interval: Duration,

    #[arg(long, env = "MEDIAVAULT_TAG_REBUILD_INTERVAL", default_value = "60s", value_parser = humantime::parse_duration)]
    pub tag_rebuild_interval: Duration,

    #[arg(long = "api-token", env = "MEDIAVAULT_API_TOKENS", value_delimiter = ',', value_parser = parse_api_token, help = "Writer credentials as user:token")]
    pub api_tokens: Vec<ApiToken>,

    #[arg(long, env = "MEDIAVAULT_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiToken {
    pub user: String,
    pub token: String,
}

fn parse_api_token(value: &str) -> Result<ApiToken, String> {
    let (user, token) = value.split_once(':').ok_or("expected user:token")?;
    let (user, token) = (user.trim(), token.trim());
    if user.is_empty() || token.is_empty() {
        return Err("user and token must not be empty".to_string());
    }
    Ok(ApiToken { user: user.to_string(), token: token.to_string() })
}

/// Layout of the media root.
#[derive(Debug, Clone)]
pub struct MediaDirs {
    pub root: PathBuf,
    pub originals: PathBuf,
    pub thumbnails: PathBuf,
    pub avatars: PathBuf,
    pub moods: PathBuf,
    pub logos: PathBuf,
    pub cache: PathBuf,
    pub tmp: PathBuf,
    pub db_path: PathBuf,
}

impl MediaDirs {
    pub fn create(root: &Path) -> anyhow::Result<Self> {
        let root = get_or_create_dir(root)?;
        let dirs = Self {
            originals: get_or_create_dir(&root.join("originals"))?,
            thumbnails: get_or_create_dir(&root.join("thumbnails"))?,
            avatars: get_or_create_dir(&root.join("avatars"))?,
            moods: get_or_create_dir(&root.join("moods"))?,
            logos: get_or_create_dir(&root.join("logos"))?,
            cache: get_or_create_dir(&root.join("cache"))?,
            tmp: get_or_create_dir(&root.join("tmp"))?,
            db_path: get_or_create_db_path(&root)?,
            root,
        };
        info!("media root: {}", dirs.root.display());
        Ok(dirs)
    }
}

fn get_or_create_dir(dir: &Path) -> anyhow::Result<PathBuf> {
    let dir = if dir.is_absolute() { dir.to_path_buf() } else { std::env::current_dir()?.join(dir) };
    if dir.exists() && !dir.is_dir() {
        anyhow::bail!("{} is not a directory", dir.display());
    }
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir.canonicalize()?)
}

fn get_or_create_db_path(root: &Path) -> anyhow::Result<PathBuf> {
    let db_path = root.join(DB_FILENAME);
    if db_path.exists() && !db_path.is_file() {
        anyhow::bail!("db_path is not a file");
    }
    if !db_path.exists() {
        std::fs::write(&db_path, "")?;
    }
    Ok(db_path)
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub dirs: MediaDirs,
    pub bind: String,
    pub max_upload_size: u64,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub transcode_timeout: Duration,
    pub cache_flush_interval: Duration,
    pub tag_rebuild_interval: Duration,
    pub api_tokens: Vec<ApiToken>,
}

impl AppConfig {
    pub fn new(flat: FlatConfig) -> anyhow::Result<Self> {
        let root = match flat.root {
            Some(root) => root,
            None => home::home_dir()
                .map(|home| home.join(".mediavault"))
                .ok_or_else(|| anyhow::anyhow!("cannot determine home directory, pass --root"))?,
        };
        Ok(Self {
            dirs: MediaDirs::create(&root)?,
            bind: flat.bind,
            max_upload_size: flat.max_upload_size,
            ffmpeg: flat.ffmpeg,
            ffprobe: flat.ffprobe,
            transcode_timeout: flat.transcode_timeout,
            cache_flush_interval: flat.cache_flush_interval,
            tag_rebuild_interval: flat.tag_rebuild_interval,
            api_tokens: flat.api_tokens,
        })
    }

    #[cfg(test)]
    pub(crate) fn for_root(root: &Path) -> Self {
        let flat = FlatConfig::parse_from(["mediavault", "--root", &root.display().to_string(), "--api-token", "alice:secret"]);
        Self::new(flat).expect("test config")
    }
}
