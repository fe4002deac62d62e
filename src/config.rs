//! Runner configuration
//!
//! Layered load: optional `runner.toml` file, then `RUNNER_`-prefixed
//! environment overrides. Every field carries a default so an empty config
//! still yields a runnable (if console-less) service.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

/// Top-level settings tree.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RunnerSettings {
    /// Consoles to bring up at boot.
    #[serde(default)]
    pub bots: Vec<BotEntry>,
    #[serde(default)]
    pub trade: TradeSettings,
    #[serde(default)]
    pub timings: TimingSettings,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub abuse: AbuseSettings,
    #[serde(default)]
    pub distribution: DistributionSettings,
}

/// One console registration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BotEntry {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Routine the worker starts in.
    #[serde(default)]
    pub routine: crate::types::RoutineKind,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TradeSettings {
    /// Seconds to wait for a partner after entering the code.
    #[serde(default = "default_trade_wait_secs")]
    pub trade_wait_secs: u64,
    /// Seconds to wait for the partner to confirm their half.
    #[serde(default = "default_max_trade_confirm_secs")]
    pub max_trade_confirm_secs: u64,
    /// Press a harmless button while idle so the session stays warm.
    #[serde(default = "default_true")]
    pub anti_idle: bool,
}

impl Default for TradeSettings {
    fn default() -> Self {
        TradeSettings {
            trade_wait_secs: default_trade_wait_secs(),
            max_trade_confirm_secs: default_max_trade_confirm_secs(),
            anti_idle: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimingSettings {
    /// Reconnect attempts before a worker gives up. 0 means never reconnect.
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    /// Extra delay between reconnect attempts.
    #[serde(default = "default_extra_reconnect_delay_ms")]
    pub extra_reconnect_delay_ms: u64,
    /// Per-operation transport timeout.
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,
    /// Turn the console screen off while the session runs.
    #[serde(default)]
    pub screen_off: bool,
}

impl Default for TimingSettings {
    fn default() -> Self {
        TimingSettings {
            reconnect_attempts: default_reconnect_attempts(),
            extra_reconnect_delay_ms: default_extra_reconnect_delay_ms(),
            op_timeout_ms: default_op_timeout_ms(),
            screen_off: false,
        }
    }
}

/// Barrier rendezvous behavior.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncOption {
    /// Workers never wait on each other.
    #[default]
    NoSync,
    /// Synchronized trades rendezvous at the shared barrier.
    LocalSync,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncSettings {
    #[serde(default)]
    pub mode: SyncOption,
    /// Base barrier timeout; doubled after a failed rendezvous.
    #[serde(default = "default_sync_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            mode: SyncOption::NoSync,
            timeout_secs: default_sync_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AbuseSettings {
    /// Partner sync ids refused before any exchange.
    #[serde(default)]
    pub banned_ids: Vec<u64>,
}

impl AbuseSettings {
    pub fn is_banned(&self, sync_id: u64) -> bool {
        self.banned_ids.contains(&sync_id)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DistributionSettings {
    /// Draw a fresh random code for each distribution entry.
    #[serde(default = "default_true")]
    pub random_code: bool,
    /// Code used when `random_code` is off.
    #[serde(default)]
    pub fixed_code: u32,
}

impl Default for DistributionSettings {
    fn default() -> Self {
        DistributionSettings {
            random_code: true,
            fixed_code: 0,
        }
    }
}

fn default_port() -> u16 {
    6000
}

fn default_trade_wait_secs() -> u64 {
    90
}

fn default_max_trade_confirm_secs() -> u64 {
    60
}

fn default_reconnect_attempts() -> u32 {
    30
}

fn default_extra_reconnect_delay_ms() -> u64 {
    1_000
}

fn default_op_timeout_ms() -> u64 {
    5_000
}

fn default_sync_timeout_secs() -> u64 {
    90
}

fn default_true() -> bool {
    true
}

impl RunnerSettings {
    /// Load settings from `runner.toml` (optional) and the environment.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from("runner.toml")
    }

    pub fn load_from(path: &str) -> anyhow::Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("RUNNER").separator("__"))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let settings = RunnerSettings::default();
        assert!(settings.bots.is_empty());
        assert_eq!(settings.trade.trade_wait_secs, 90);
        assert_eq!(settings.sync.mode, SyncOption::NoSync);
        assert!(settings.trade.anti_idle);
        assert!(settings.distribution.random_code);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let settings = RunnerSettings::load_from("does-not-exist").unwrap();
        assert_eq!(
            settings.trade.trade_wait_secs,
            RunnerSettings::default().trade.trade_wait_secs
        );
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runner.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[trade]\ntrade_wait_secs = 30\n\n[[bots]]\nhost = \"10.0.0.5\"\nport = 6001\n\n[abuse]\nbanned_ids = [77]"
        )
        .unwrap();

        let settings =
            RunnerSettings::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(settings.trade.trade_wait_secs, 30);
        assert_eq!(settings.bots.len(), 1);
        assert_eq!(settings.bots[0].port, 6001);
        assert!(settings.abuse.is_banned(77));
        assert!(!settings.abuse.is_banned(78));
    }
}
