use may::{coroutine, go};
use serde::Deserialize;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{error, trace};

use crate::system::log::{LogFileConfig, LogFilterLevel, LogRolling};

const WATCH_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub listen_port: u16,
    pub workers: usize,
    pub stack_size: usize,
    /// Upper bound on a single inbound frame's payload.
    pub max_frame_size: u64,
    pub log: LogConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_owned(),
            listen_port: 8080,
            workers: 4,
            stack_size: 0x10000,
            max_frame_size: 128 * 1024,
            log: LogConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Re-applies the log filter level from this config. The other
    /// settings need a server restart to take effect.
    pub fn apply_log_filter(&self) -> io::Result<()> {
        crate::system::log::set_filter_level(self.log.filter_level()?);
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    /// File logging is enabled when a directory is set.
    pub dir: Option<String>,
    pub file_name: String,
    pub rolling: String,
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            dir: None,
            file_name: "finbit.log".to_owned(),
            rolling: "daily".to_owned(),
            ansi: true,
        }
    }
}

impl LogConfig {
    pub fn filter_level(&self) -> io::Result<LogFilterLevel> {
        LogFilterLevel::from_name(&self.level).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid logging level: {}", self.level),
            )
        })
    }

    pub fn file_config(&self) -> io::Result<Option<LogFileConfig>> {
        let Some(dir) = &self.dir else {
            return Ok(None);
        };
        let roller = LogRolling::from_name(&self.rolling).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid log rolling: {}", self.rolling),
            )
        })?;
        Ok(Some(LogFileConfig {
            roller,
            dir: dir.clone(),
            file_name: self.file_name.clone(),
            ansi: self.ansi,
        }))
    }
}

pub fn load(path: impl AsRef<Path>) -> io::Result<ServerConfig> {
    let raw = std::fs::read(path.as_ref())?;
    serde_json::from_slice(&raw).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("failed to parse {}: {e}", path.as_ref().display()),
        )
    })
}

/// Polls the config file's mtime twice a second and hands every reloadable
/// parse to `on_reload`. A file that fails to parse is logged and skipped;
/// the previous configuration stays active.
pub fn watch<F>(path: PathBuf, on_reload: F) -> io::Result<coroutine::JoinHandle<()>>
where
    F: Fn(ServerConfig) + Send + 'static,
{
    go!(
        coroutine::Builder::new().name("config-watch".to_owned()),
        move || {
            let mut last = modified(&path);
            loop {
                may::coroutine::sleep(WATCH_INTERVAL);
                let stamp = modified(&path);
                if stamp != last {
                    last = stamp;
                    trace!("configuration file changed");
                    match load(&path) {
                        Ok(config) => on_reload(config),
                        Err(e) => error!("configuration reload failed: {e}"),
                    }
                }
            }
        }
    )
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0");
        assert_eq!(config.listen_port, 8080);
        assert_eq!(config.max_frame_size, 128 * 1024);
        assert_eq!(config.log.level, "info");
        assert!(config.log.dir.is_none());
    }

    #[test]
    fn test_parse_overrides_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("finbit.json");
        std::fs::write(
            &path,
            r#"{
                "listen_port": 9001,
                "max_frame_size": 4096,
                "log": { "level": "debug", "dir": "/tmp/log" }
            }"#,
        )
        .expect("write config");

        let config = load(&path).expect("load");
        assert_eq!(config.listen_port, 9001);
        assert_eq!(config.max_frame_size, 4096);
        assert_eq!(config.listen_addr, "0.0.0.0");
        assert_eq!(
            config.log.filter_level().expect("level"),
            LogFilterLevel::DEBUG
        );
        let file = config.log.file_config().expect("file config").expect("set");
        assert_eq!(file.dir, "/tmp/log");
        assert_eq!(file.roller, LogRolling::DAILY);
    }

    #[test]
    fn test_invalid_level_is_rejected() {
        let config = LogConfig {
            level: "loud".to_owned(),
            ..Default::default()
        };
        let err = config.filter_level().expect_err("invalid level");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_malformed_file_is_invalid_data() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("finbit.json");
        std::fs::write(&path, "{ not json").expect("write config");
        let err = load(&path).expect_err("malformed");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_watch_picks_up_rewrite() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("finbit.json");
        std::fs::write(&path, r#"{ "listen_port": 1 }"#).expect("write config");

        let hits = Arc::new(AtomicUsize::new(0));
        let hits_in_watch = Arc::clone(&hits);
        let _watcher = watch(path.clone(), move |config| {
            assert_eq!(config.listen_port, 2);
            hits_in_watch.fetch_add(1, Ordering::SeqCst);
        })
        .expect("watch");

        // Let the watcher record the initial mtime before rewriting.
        std::thread::sleep(Duration::from_millis(700));
        std::fs::write(&path, r#"{ "listen_port": 2 }"#).expect("rewrite config");
        std::thread::sleep(Duration::from_millis(1500));

        assert!(hits.load(Ordering::SeqCst) >= 1);
    }
}
