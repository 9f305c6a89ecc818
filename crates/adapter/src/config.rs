// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// WebSocket bridge between a tmux control-mode server and many concurrent clients.
#[derive(Debug, Clone, Parser)]
#[command(name = "tmux-adapter", version, about)]
pub struct Config {
    /// Town directory under which agent sessions' working directories must live.
    #[arg(long, env = "TMUX_ADAPTER_GT_DIR")]
    pub gt_dir: Option<PathBuf>,

    /// HTTP/WebSocket port to listen on.
    #[arg(long, env = "TMUX_ADAPTER_PORT", default_value = "8080")]
    pub port: u16,

    /// Bearer token for API authentication. Empty disables auth.
    #[arg(long, env = "TMUX_ADAPTER_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Comma-separated glob patterns for acceptable WebSocket `Origin` headers.
    #[arg(long, env = "TMUX_ADAPTER_ALLOWED_ORIGINS", default_value = "localhost:*")]
    pub allowed_origins: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "TMUX_ADAPTER_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (text or json).
    #[arg(long, env = "TMUX_ADAPTER_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Per-command deadline for the control connection, in milliseconds.
    #[arg(long, env = "TMUX_ADAPTER_COMMAND_TIMEOUT_MS", default_value = "5000")]
    pub command_timeout_ms: u64,

    /// Interval between coalesced registry rescans, in milliseconds.
    #[arg(long, env = "TMUX_ADAPTER_RESCAN_INTERVAL_MS", default_value = "2000")]
    pub rescan_interval_ms: u64,

    /// Path to the tmux binary.
    #[arg(long, env = "TMUX_ADAPTER_TMUX_BIN", default_value = "tmux")]
    pub tmux_bin: String,

    /// `-S` socket path passed through to the control-mode child (test isolation).
    #[arg(long, env = "TMUX_ADAPTER_TMUX_SOCKET")]
    pub tmux_socket: Option<PathBuf>,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        let patterns = self.allowed_origin_patterns();
        if patterns.is_empty() {
            anyhow::bail!("--allowed-origins must contain at least one pattern");
        }

        let gt_dir = self.gt_dir_path()?;
        if !gt_dir.is_absolute() {
            anyhow::bail!("--gt-dir must be an absolute path, got {}", gt_dir.display());
        }

        Ok(())
    }

    /// Resolve the configured town directory, defaulting to `~/gt`.
    pub fn gt_dir_path(&self) -> anyhow::Result<PathBuf> {
        if let Some(ref dir) = self.gt_dir {
            return Ok(dir.clone());
        }
        let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME is not set"))?;
        Ok(PathBuf::from(home).join("gt"))
    }

    /// Split `--allowed-origins` into individual glob patterns.
    pub fn allowed_origin_patterns(&self) -> Vec<String> {
        self.allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect()
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn rescan_interval(&self) -> Duration {
        Duration::from_millis(self.rescan_interval_ms)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
