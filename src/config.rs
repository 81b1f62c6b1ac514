//! Startup configuration.
//!
//! Every option can come from a flag or from the environment; flags win.
//! Values are read once and never change while the process runs.

use crate::sandbox::DEFAULT_MAX_FILE_SIZE;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "securefm", version, about = "Sandboxed interactive file manager")]
pub struct Config {
    /// Root directory all file operations are confined to
    #[arg(long, env = "SANDBOX_PATH", default_value = "./sandbox")]
    pub sandbox: PathBuf,

    /// SQLite database for file metadata (":memory:" for a throwaway one)
    #[arg(long, env = "SECUREFM_DB", default_value = "securefm.sqlite")]
    pub db: String,

    /// Name recorded as the owner of files written in this session
    #[arg(long, env = "SECUREFM_USER")]
    pub user: Option<String>,

    /// Largest file the store will write, in bytes
    #[arg(long, env = "SECUREFM_MAX_FILE_SIZE", default_value_t = DEFAULT_MAX_FILE_SIZE)]
    pub max_file_size: u64,

    /// Allow paths that leave the sandbox through a symlink
    #[arg(long, env = "SECUREFM_NO_SYMLINK_CHECK")]
    pub no_symlink_check: bool,
}

impl Config {
    /// Owner name for this session: the configured user, then `$USER`
    pub fn owner(&self) -> String {
        pick_owner(self.user.as_deref(), std::env::var("USER").ok().as_deref())
    }
}

/// First non-blank of the configured and login names, else `anonymous`
fn pick_owner(configured: Option<&str>, login: Option<&str>) -> String {
    [configured, login]
        .into_iter()
        .flatten()
        .find(|name| !name.trim().is_empty())
        .unwrap_or("anonymous")
        .to_string()
}
