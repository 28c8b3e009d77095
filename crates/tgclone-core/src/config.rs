use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    backoff::BackoffPolicy,
    domain::{normalize_channel_id, ChatId},
    errors::Error,
    progress::ReportPolicy,
    Result,
};

/// Typed process configuration, loaded once from the environment (and `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    // Control bot
    pub telegram_bot_token: String,
    pub telegram_allowed_users: Vec<i64>,

    // Channels (validated per run, see `RunConfig::resolve`)
    pub source_channel_id: Option<ChatId>,
    pub target_channel_id: Option<ChatId>,

    // Storage
    pub state_dir: PathBuf,
    pub temp_dir: PathBuf,

    // Pipeline tunables
    pub page_size: usize,
    pub message_delay: Duration,
    pub rate_limit_padding: Duration,
    pub progress_every: usize,
    pub progress_interval: Duration,

    // Bot API provider
    pub source_head_id: Option<i32>,
    pub scratch_chat_id: Option<ChatId>,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        // Required env vars
        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        let telegram_allowed_users = parse_csv_i64(env_str("TELEGRAM_ALLOWED_USERS"));

        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }
        if telegram_allowed_users.is_empty() {
            return Err(Error::Config(
                "TELEGRAM_ALLOWED_USERS environment variable is required".to_string(),
            ));
        }

        let source_channel_id = env_i64("CLONE_SOURCE_CHANNEL_ID").map(normalize_channel_id);
        let target_channel_id = env_i64("CLONE_TARGET_CHANNEL_ID").map(normalize_channel_id);

        let state_dir =
            env_path("CLONE_STATE_DIR").unwrap_or_else(|| PathBuf::from("./clone-state"));
        let temp_dir = env_path("CLONE_TEMP_DIR").unwrap_or_else(|| PathBuf::from("/tmp/tgclone"));
        fs::create_dir_all(&state_dir)?;
        fs::create_dir_all(&temp_dir)?;

        let page_size = env_usize("CLONE_PAGE_SIZE").unwrap_or(100).clamp(1, 100);
        let message_delay =
            Duration::from_millis(env_u64("CLONE_MESSAGE_DELAY_MS").unwrap_or(1000));
        let rate_limit_padding =
            Duration::from_millis(env_u64("CLONE_RATE_LIMIT_PADDING_MS").unwrap_or(0));
        let progress_every = env_usize("CLONE_PROGRESS_EVERY").unwrap_or(10).max(1);
        let progress_interval =
            Duration::from_secs(env_u64("CLONE_PROGRESS_INTERVAL_SECS").unwrap_or(30));

        let source_head_id = env_str("CLONE_SOURCE_HEAD_ID").and_then(|s| s.trim().parse().ok());
        let scratch_chat_id = env_i64("CLONE_SCRATCH_CHAT_ID").map(ChatId);

        Ok(Self {
            telegram_bot_token,
            telegram_allowed_users,
            source_channel_id,
            target_channel_id,
            state_dir,
            temp_dir,
            page_size,
            message_delay,
            rate_limit_padding,
            progress_every,
            progress_interval,
            source_head_id,
            scratch_chat_id,
        })
    }

    /// Per-target directory holding the ledger, checkpoint, progress and lock files.
    pub fn target_state_dir(&self, target: ChatId) -> PathBuf {
        self.state_dir.join(target.0.to_string())
    }
}

/// Immutable view of the configuration for one run.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub source: ChatId,
    pub target: ChatId,
    pub page_size: usize,
    pub backoff: BackoffPolicy,
    pub report: ReportPolicy,
    pub state_dir: PathBuf,
    pub temp_dir: PathBuf,
}

impl RunConfig {
    /// Resolve and validate the run preconditions. Performs no I/O.
    pub fn resolve(cfg: &Config) -> Result<Self> {
        if cfg.telegram_bot_token.trim().is_empty() {
            return Err(Error::Config("provider credentials are missing".to_string()));
        }
        let source = cfg
            .source_channel_id
            .ok_or_else(|| Error::Config("source channel is not configured".to_string()))?;
        let target = cfg
            .target_channel_id
            .ok_or_else(|| Error::Config("target channel is not configured".to_string()))?;
        if source == target {
            return Err(Error::Config(
                "source and target channel must differ".to_string(),
            ));
        }

        Ok(Self {
            source,
            target,
            page_size: cfg.page_size.max(1),
            backoff: BackoffPolicy {
                message_delay: cfg.message_delay,
                rate_limit_padding: cfg.rate_limit_padding,
            },
            report: ReportPolicy {
                every_messages: cfg.progress_every.max(1),
                every_interval: cfg.progress_interval,
            },
            state_dir: cfg.target_state_dir(target),
            temp_dir: cfg.temp_dir.clone(),
        })
    }
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

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_i64(key: &str) -> Option<i64> {
    env_str(key).and_then(|s| s.trim().parse::<i64>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

#[cfg(test)]
pub(crate) fn test_config(state_dir: &Path) -> Config {
    Config {
        telegram_bot_token: "x".to_string(),
        telegram_allowed_users: vec![1],
        source_channel_id: Some(ChatId(-1001)),
        target_channel_id: Some(ChatId(-1002)),
        state_dir: state_dir.to_path_buf(),
        temp_dir: state_dir.join("tmp"),
        page_size: 100,
        message_delay: Duration::from_secs(1),
        rate_limit_padding: Duration::ZERO,
        progress_every: 10,
        progress_interval: Duration::from_secs(30),
        source_head_id: None,
        scratch_chat_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_user_ids_skip_garbage() {
        let ids = parse_csv_i64(Some("1, 2,,abc, 3".to_string()));
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn resolve_rejects_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.source_channel_id = None;
        let err = RunConfig::resolve(&cfg).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("source")));
    }

    #[test]
    fn resolve_rejects_missing_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.telegram_bot_token = " ".to_string();
        assert!(matches!(RunConfig::resolve(&cfg), Err(Error::Config(_))));
    }

    #[test]
    fn resolve_keys_state_by_target() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let run = RunConfig::resolve(&cfg).unwrap();
        assert_eq!(run.state_dir, dir.path().join("-1002"));
        assert_eq!(run.backoff.message_delay, Duration::from_secs(1));
        assert_eq!(run.report.every_messages, 10);
    }
}
