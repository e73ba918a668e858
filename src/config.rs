//! Configuration loading: compiled-in defaults < optional TOML file < CLI flags.
//!
//! Grounded on this codebase's `clap::Parser`-driven CLI (`main.rs`'s `Cli`
//! struct), simplified to a single flat command since this system's CLI
//! surface is intentionally thin. The optional TOML overlay and its default
//! location under the user's config directory follow the same `dirs`-based
//! path resolution this codebase uses for its own config file.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::error::ConfigError;

const ENV_PREFIX: &str = "TERMMUX_";
const DEFAULT_BIND: &str = "127.0.0.1:8700";

#[derive(Parser, Debug)]
#[command(name = "termmuxd")]
#[command(about = "PTY-backed terminal multiplexer exposed to browser terminals over WebSockets")]
#[command(version)]
struct Cli {
    /// Address to bind the HTTP/WebSocket server to.
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Path to an optional TOML config file overlay.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Shell command to spawn for each terminal (first word is the
    /// executable; pass repeatedly or quote a single string with spaces).
    #[arg(long)]
    shell: Option<String>,

    /// TERM value exported to spawned shells.
    #[arg(long)]
    term_type: Option<String>,

    /// Optional server URL exported to spawned shells as `TERMMUX_URL`.
    #[arg(long)]
    server_url: Option<String>,

    /// Maximum number of concurrently live terminals, across all policies.
    #[arg(long)]
    max_terminals: Option<usize>,
}

#[derive(Deserialize, Default, Debug)]
struct FileConfig {
    bind: Option<SocketAddr>,
    shell: Option<String>,
    term_type: Option<String>,
    server_url: Option<String>,
    max_terminals: Option<usize>,
    poll_interval_ms: Option<u64>,
    terminate_step_delay_ms: Option<u64>,
}

/// Fully resolved configuration for one running `termmuxd` instance.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub bind_addr: SocketAddr,
    pub shell_command: Vec<String>,
    pub term_type: String,
    pub server_url: Option<String>,
    pub cwd: Option<PathBuf>,
    pub max_terminals: Option<usize>,
    pub poll_interval_ms: u64,
    pub terminate_step_delay_ms: u64,
}

impl ManagerConfig {
    fn defaults() -> Self {
        let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
        Self {
            bind_addr: DEFAULT_BIND.parse().expect("default bind addr is valid"),
            shell_command: vec![shell],
            term_type: "xterm".to_string(),
            server_url: None,
            cwd: None,
            max_terminals: None,
            poll_interval_ms: 10,
            terminate_step_delay_ms: 200,
        }
    }

    /// Builds the environment override map handed to each spawned child,
    /// per `<PREFIX>DIMENSIONS`/`<PREFIX>URL` plus `TERM`/`COLUMNS`/`LINES`.
    pub fn term_env(&self, rows: u16, cols: u16) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert("TERM".to_string(), self.term_type.clone());
        env.insert("COLUMNS".to_string(), cols.to_string());
        env.insert("LINES".to_string(), rows.to_string());
        env.insert(
            format!("{ENV_PREFIX}DIMENSIONS"),
            format!("{cols}x{rows}"),
        );
        if let Some(url) = &self.server_url {
            env.insert(format!("{ENV_PREFIX}URL"), url.clone());
        }
        env
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(v) = file.bind {
            self.bind_addr = v;
        }
        if let Some(v) = file.shell {
            self.shell_command = shell_words(&v);
        }
        if let Some(v) = file.term_type {
            self.term_type = v;
        }
        if let Some(v) = file.server_url {
            self.server_url = Some(v);
        }
        if let Some(v) = file.max_terminals {
            self.max_terminals = Some(v);
        }
        if let Some(v) = file.poll_interval_ms {
            self.poll_interval_ms = v;
        }
        if let Some(v) = file.terminate_step_delay_ms {
            self.terminate_step_delay_ms = v;
        }
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(v) = cli.bind {
            self.bind_addr = v;
        }
        if let Some(v) = &cli.shell {
            self.shell_command = shell_words(v);
        }
        if let Some(v) = &cli.term_type {
            self.term_type = v.clone();
        }
        if let Some(v) = &cli.server_url {
            self.server_url = Some(v.clone());
        }
        if let Some(v) = cli.max_terminals {
            self.max_terminals = Some(v);
        }
    }
}

fn shell_words(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_string).collect()
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        source: e,
    })?;
    toml::from_str(&text).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        source: e,
    })
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("termmux").join("termmux.toml"))
}

/// Loads configuration from defaults, an optional TOML file (explicit
/// `--config` path, or the default config-dir location if it exists), and
/// CLI flags, in that priority order.
pub fn load() -> Result<ManagerConfig, ConfigError> {
    let cli = Cli::parse();
    let mut config = ManagerConfig::defaults();

    let file_path = cli.config.clone().or_else(default_config_path);
    if let Some(path) = file_path {
        if path.exists() {
            let file = read_file_config(&path)?;
            config.apply_file(file);
        } else if cli.config.is_some() {
            return Err(ConfigError::Invalid(format!(
                "config file not found: {}",
                path.display()
            )));
        }
    }

    config.apply_cli(&cli);
    if config.shell_command.is_empty() {
        return Err(ConfigError::Invalid("shell command must not be empty".into()));
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_a_non_empty_shell() {
        let cfg = ManagerConfig::defaults();
        assert!(!cfg.shell_command.is_empty());
    }

    #[test]
    fn term_env_includes_dimensions_and_url() {
        let mut cfg = ManagerConfig::defaults();
        cfg.server_url = Some("http://localhost:8700".to_string());
        let env = cfg.term_env(24, 80);
        assert_eq!(env.get("TERM").unwrap(), "xterm");
        assert_eq!(env.get("COLUMNS").unwrap(), "80");
        assert_eq!(env.get("LINES").unwrap(), "24");
        assert_eq!(env.get("TERMMUX_DIMENSIONS").unwrap(), "80x24");
        assert_eq!(env.get("TERMMUX_URL").unwrap(), "http://localhost:8700");
    }

    #[test]
    fn file_config_overrides_defaults() {
        let mut cfg = ManagerConfig::defaults();
        cfg.apply_file(FileConfig {
            bind: Some("0.0.0.0:9000".parse().unwrap()),
            shell: Some("/bin/bash -l".to_string()),
            term_type: Some("xterm-256color".to_string()),
            server_url: None,
            max_terminals: Some(5),
            poll_interval_ms: None,
            terminate_step_delay_ms: None,
        });
        assert_eq!(cfg.bind_addr.to_string(), "0.0.0.0:9000");
        assert_eq!(cfg.shell_command, vec!["/bin/bash", "-l"]);
        assert_eq!(cfg.max_terminals, Some(5));
    }
}
