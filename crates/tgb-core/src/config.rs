use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    domain::{BotToken, ChatId},
    errors::Error,
    Result,
};

/// Bot API rejects uploads over 50 MB; stay one MB below it.
pub const MAX_CHUNK_SIZE_MB: u64 = 49;

const MB: u64 = 1024 * 1024;

/// Typed configuration for the relay.
///
/// Everything the orchestrators need beyond the registry: chunk ceiling,
/// endpoints, per-call timeouts and the fallback credential/destination.
#[derive(Clone, Debug)]
pub struct Config {
    // Fallback destination
    pub default_bot_token: Option<BotToken>,
    pub default_chat_id: Option<ChatId>,

    // Chunking
    pub chunk_size_mb: u64,

    // Telegram endpoints
    pub api_base_url: String,
    pub file_base_url: String,

    // Timeouts
    pub api_timeout: Duration,
    pub upload_timeout: Duration,
    pub download_timeout: Duration,

    // Delivery behavior
    pub app_name: String,
    pub upload_retries: u32,
    pub delete_orphaned_parts: bool,
    /// Post an HTML notice to the targets when a send reaches none of them.
    pub notify_on_failure: bool,

    // Local state
    pub store_path: PathBuf,
    pub scratch_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_bot_token: None,
            default_chat_id: None,
            chunk_size_mb: MAX_CHUNK_SIZE_MB,
            api_base_url: "https://api.telegram.org".to_string(),
            file_base_url: "https://api.telegram.org/file".to_string(),
            api_timeout: Duration::from_secs(30),
            upload_timeout: Duration::from_secs(300),
            download_timeout: Duration::from_secs(300),
            app_name: "tgb".to_string(),
            upload_retries: 1,
            delete_orphaned_parts: true,
            notify_on_failure: true,
            store_path: PathBuf::from("telegram-backups.json"),
            scratch_dir: env::temp_dir().join("telegram-backup"),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let defaults = Self::default();

        let default_bot_token = env_str("TELEGRAM_BACKUP_TOKEN")
            .and_then(non_empty)
            .map(BotToken::new);
        let default_chat_id = env_str("TELEGRAM_BACKUP_CHAT_ID")
            .and_then(non_empty)
            .map(|s| ChatId(s.trim().to_string()));

        let chunk_size_mb = env_u64("BACKUP_TELEGRAM_CHUNK_SIZE")?
            .map(clamp_chunk_size_mb)
            .unwrap_or(defaults.chunk_size_mb);

        let api_base_url = env_str("TELEGRAM_API_BASE_URL")
            .and_then(non_empty)
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or(defaults.api_base_url);
        let file_base_url = env_str("TELEGRAM_FILE_BASE_URL")
            .and_then(non_empty)
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("{api_base_url}/file"));

        let api_timeout = env_secs("TELEGRAM_API_TIMEOUT_SECS")?.unwrap_or(defaults.api_timeout);
        let upload_timeout =
            env_secs("TELEGRAM_UPLOAD_TIMEOUT_SECS")?.unwrap_or(defaults.upload_timeout);
        let download_timeout =
            env_secs("TELEGRAM_DOWNLOAD_TIMEOUT_SECS")?.unwrap_or(defaults.download_timeout);

        let app_name = env_str("TELEGRAM_BACKUP_APP_NAME")
            .and_then(non_empty)
            .unwrap_or(defaults.app_name);
        let upload_retries = env_u64("TELEGRAM_BACKUP_UPLOAD_RETRIES")?
            .map(|n| n.min(u32::MAX as u64) as u32)
            .unwrap_or(defaults.upload_retries);
        let delete_orphaned_parts =
            env_bool("TELEGRAM_BACKUP_DELETE_ORPHANS").unwrap_or(defaults.delete_orphaned_parts);
        let notify_on_failure =
            env_bool("TELEGRAM_BACKUP_NOTIFY_FAILURES").unwrap_or(defaults.notify_on_failure);

        let store_path = env_path("TELEGRAM_BACKUP_STORE").unwrap_or(defaults.store_path);
        let scratch_dir = env_path("TELEGRAM_BACKUP_SCRATCH_DIR").unwrap_or(defaults.scratch_dir);

        fs::create_dir_all(&scratch_dir)?;

        Ok(Self {
            default_bot_token,
            default_chat_id,
            chunk_size_mb,
            api_base_url,
            file_base_url,
            api_timeout,
            upload_timeout,
            download_timeout,
            app_name,
            upload_retries,
            delete_orphaned_parts,
            notify_on_failure,
            store_path,
            scratch_dir,
        })
    }

    /// Maximum bytes per uploaded part.
    pub fn chunk_size_bytes(&self) -> u64 {
        clamp_chunk_size_mb(self.chunk_size_mb) * MB
    }
}

/// Keep the ceiling within [1, MAX_CHUNK_SIZE_MB].
pub fn clamp_chunk_size_mb(mb: u64) -> u64 {
    mb.clamp(1, MAX_CHUNK_SIZE_MB)
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, strip_quotes(v.trim()));
    }
}

fn strip_quotes(val: &str) -> &str {
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        &val[1..val.len() - 1]
    } else {
        val
    }
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_u64(key: &str) -> Result<Option<u64>> {
    parse_u64(key, env_str(key))
}

fn env_secs(key: &str) -> Result<Option<Duration>> {
    parse_secs(key, env_str(key))
}

fn parse_u64(key: &str, raw: Option<String>) -> Result<Option<u64>> {
    let Some(raw) = raw.and_then(non_empty) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<u64>()
        .map(Some)
        .map_err(|_| Error::Config(format!("{key} must be a whole number, got {raw:?}")))
}

/// A zero timeout would fail every call before it starts.
fn parse_secs(key: &str, raw: Option<String>) -> Result<Option<Duration>> {
    match parse_u64(key, raw)? {
        Some(0) => Err(Error::Config(format!("{key} must be at least 1 second"))),
        secs => Ok(secs.map(Duration::from_secs)),
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_is_capped_at_provider_limit() {
        let cfg = Config {
            chunk_size_mb: 500,
            ..Config::default()
        };
        assert_eq!(cfg.chunk_size_bytes(), 49 * 1024 * 1024);
    }

    #[test]
    fn chunk_size_never_zero() {
        assert_eq!(clamp_chunk_size_mb(0), 1);
        assert_eq!(clamp_chunk_size_mb(10), 10);
    }

    #[test]
    fn malformed_numbers_are_config_errors() {
        let err = parse_u64("TELEGRAM_BACKUP_UPLOAD_RETRIES", Some("two".into())).unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("TELEGRAM_BACKUP_UPLOAD_RETRIES")));
        assert!(parse_u64("BACKUP_TELEGRAM_CHUNK_SIZE", Some("-5".into())).is_err());
        assert!(matches!(
            parse_secs("TELEGRAM_API_TIMEOUT_SECS", Some("30s".into())),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = parse_secs("TELEGRAM_UPLOAD_TIMEOUT_SECS", Some("0".into())).unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("at least 1 second")));
    }

    #[test]
    fn blank_or_missing_numbers_fall_back() {
        assert_eq!(parse_u64("K", None).unwrap(), None);
        assert_eq!(parse_u64("K", Some("  ".into())).unwrap(), None);
        assert_eq!(parse_u64("K", Some(" 7 ".into())).unwrap(), Some(7));
        assert_eq!(
            parse_secs("K", Some("45".into())).unwrap(),
            Some(Duration::from_secs(45))
        );
    }

    #[test]
    fn strip_quotes_handles_both_styles() {
        assert_eq!(strip_quotes("\"abc\""), "abc");
        assert_eq!(strip_quotes("'abc'"), "abc");
        assert_eq!(strip_quotes("abc"), "abc");
        assert_eq!(strip_quotes("\""), "\"");
    }
}
