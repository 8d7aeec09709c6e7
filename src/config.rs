use std::path::PathBuf;

pub const WORKSPACE_ENV: &str = "TOPPERSD_WORKSPACE";
pub const LOG_ENV: &str = "TOPPERSD_LOG";

/// Startup configuration read from the environment.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Workspace opened before the first request, if set.
    pub workspace: Option<PathBuf>,
    pub log_filter: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            workspace: non_empty(WORKSPACE_ENV).map(PathBuf::from),
            log_filter: non_empty(LOG_ENV).or_else(|| non_empty("RUST_LOG")),
        }
    }
}
