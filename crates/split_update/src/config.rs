//! Connection and run configuration.
//!
//! Credentials come either from explicit options (host/port/user/password) or
//! from a MySQL option file such as `~/.my.cnf`, read the way the `mysql`
//! client does: the `[client]` group first, then `[mysql]` on top.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::error::SplitError;

/// Option file used when no host is given.
pub const DEFAULT_OPTION_FILE: &str = "~/.my.cnf";
/// Character set used when none is configured.
pub const DEFAULT_CHARSET: &str = "utf8";
/// MySQL's standard TCP port.
pub const DEFAULT_PORT: u16 = 3306;
/// Default chunk width, below Galera's default `wsrep_max_ws_rows` (131072).
pub const DEFAULT_SPLIT_RANGE: i64 = 100_000;
/// Default parallelism degree.
pub const DEFAULT_PARALLEL: usize = 1;
/// Default retry ceiling.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Option-file groups read, in precedence order (later wins).
const OPTION_GROUPS: &[&str] = &["client", "mysql"];

/// Everything needed to open the connection pool.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    /// Unix socket path; takes precedence over host/port when set.
    pub socket: Option<PathBuf>,
    pub database: String,
    pub charset: String,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("socket", &self.socket)
            .field("database", &self.database)
            .field("charset", &self.charset)
            .finish()
    }
}

impl ConnectionConfig {
    /// Builds a TCP connection config from explicit options.
    pub fn from_options(
        database: &str,
        host: &str,
        port: u16,
        user: &str,
        password: Option<&str>,
        charset: Option<&str>,
    ) -> Self {
        Self {
            host: host.to_string(),
            port,
            user: user.to_string(),
            password: password.map(str::to_string),
            socket: None,
            database: database.to_string(),
            charset: charset
                .filter(|value| !value.trim().is_empty())
                .unwrap_or(DEFAULT_CHARSET)
                .to_string(),
        }
    }

    /// Loads credentials from a MySQL option file.
    ///
    /// A non-empty `database` argument wins over any `database=` entry.
    pub fn from_option_file(path: &Path, database: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read option file {}", path.display()))?;
        let options = parse_option_file(&text);
        let port = options
            .get("port")
            .map(|raw| {
                raw.parse::<u16>()
                    .with_context(|| format!("invalid port value in {}: {raw}", path.display()))
            })
            .transpose()?
            .unwrap_or(DEFAULT_PORT);
        let database = if database.is_empty() {
            options.get("database").cloned().unwrap_or_default()
        } else {
            database.to_string()
        };
        Ok(Self {
            host: options
                .get("host")
                .cloned()
                .unwrap_or_else(|| "localhost".to_string()),
            port,
            user: options.get("user").cloned().unwrap_or_default(),
            password: options.get("password").cloned(),
            socket: options.get("socket").map(PathBuf::from),
            database,
            charset: options
                .get("default-character-set")
                .cloned()
                .unwrap_or_else(|| DEFAULT_CHARSET.to_string()),
        })
    }
}

/// Parses the `[client]` and `[mysql]` groups of an option file into one
/// key/value map. Keys are lower-cased with `_` normalized to `-`; values
/// lose surrounding quotes. Other groups and `!include` directives are
/// ignored.
pub fn parse_option_file(text: &str) -> BTreeMap<String, String> {
    let mut groups: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    let mut current: Option<String> = None;
    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') || line.starts_with('!')
        {
            continue;
        }
        if let Some(group) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            current = Some(group.trim().to_ascii_lowercase());
            continue;
        }
        let Some(group) = current.as_ref() else {
            continue;
        };
        let (key, value) = match line.split_once('=') {
            Some((key, value)) => (key.trim(), unquote(value.trim())),
            None => (line, String::new()),
        };
        groups
            .entry(group.clone())
            .or_default()
            .insert(key.to_ascii_lowercase().replace('_', "-"), value);
    }

    let mut merged = BTreeMap::new();
    for group in OPTION_GROUPS {
        if let Some(values) = groups.remove(*group) {
            merged.extend(values);
        }
    }
    merged
}

fn unquote(value: &str) -> String {
    let stripped = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')));
    stripped.unwrap_or(value).to_string()
}

/// Expands a leading `~` to `$HOME`.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home);
        }
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

/// Engine knobs for one invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunOptions {
    /// Maximum number of range transactions in flight.
    pub parallel: usize,
    /// Maximum number of retry passes over failed ranges.
    pub max_retries: u32,
    /// Chunk width of each range.
    pub split_range: i64,
    /// Randomize the execution order of ranges.
    pub shuffle: bool,
    /// Plan and time the run without sending any update.
    pub dry_run: bool,
    /// Run the statement unsplit when it cannot be split.
    pub fallback: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            parallel: DEFAULT_PARALLEL,
            max_retries: DEFAULT_MAX_RETRIES,
            split_range: DEFAULT_SPLIT_RANGE,
            shuffle: false,
            dry_run: false,
            fallback: false,
        }
    }
}

impl RunOptions {
    /// Rejects knob values the engine cannot honor.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.parallel > 0, "--parallel must be > 0");
        if self.split_range <= 0 {
            return Err(SplitError::InvalidSplitRange {
                value: self.split_range,
            }
            .into());
        }
        Ok(())
    }
}

/// Log verbosity selected on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verbosity {
    /// Results and errors only.
    Suppress,
    /// Warnings plus the progress display.
    Default,
    Verbose,
    Debug,
    Trace,
}

impl Verbosity {
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    pub fn filter_directive(self) -> &'static str {
        match self {
            Self::Suppress => "error",
            Self::Default => "warn",
            Self::Verbose => "split_update=info,warn",
            Self::Debug => "split_update=debug,info",
            Self::Trace => "split_update=trace,sqlx=debug,info",
        }
    }

    /// The progress display is shown only when nothing else is logging.
    pub fn shows_progress(self) -> bool {
        self == Self::Default
    }
}
