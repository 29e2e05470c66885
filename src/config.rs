//! Engine configuration.
//!
//! Loaded from YAML or JSON (picked by file extension) and overridden by CLI
//! flags. Durations are written the human way: `"500ms"`, `"30s"`, `"5m"`,
//! `"1h30m"`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

// =============================================================================
// Sections
// =============================================================================

/// Participant health debouncing and probe schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    #[serde(with = "duration_str")]
    pub probe_interval: Duration,
    /// Consecutive failed probes before Up becomes Suspect
    pub suspect_after: u32,
    /// Consecutive failed probes before Suspect becomes Down
    pub down_after: u32,
    /// Consecutive good probes before Down becomes Up again
    pub recover_after: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(10),
            suspect_after: 1,
            down_after: 3,
            recover_after: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebalanceConfig {
    /// Moves in flight at once; 1 means strictly move-by-move
    pub max_concurrent_moves: usize,
    /// Execute plans produced by topology changes without waiting for an operator
    pub auto_execute: bool,
    #[serde(with = "duration_str")]
    pub reconcile_interval: Duration,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_moves: 1,
            auto_execute: true,
            reconcile_interval: Duration::from_secs(300),
        }
    }
}

/// Hard upper bound on concurrent rebalance moves.
pub const MAX_CONCURRENT_MOVES: usize = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Usage percentage at which `fill` treats a disk as full
    pub fill_threshold_percent: u8,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            fill_threshold_percent: 90,
        }
    }
}

// =============================================================================
// Engine Config
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Where pool definitions and the catalog are persisted
    pub data_dir: PathBuf,
    pub health: HealthConfig,
    pub retry: RetryPolicy,
    pub rebalance: RebalanceConfig,
    pub placement: PlacementConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/shardpool"),
            health: HealthConfig::default(),
            retry: RetryPolicy::default(),
            rebalance: RebalanceConfig::default(),
            placement: PlacementConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load from a `.yaml`/`.yml` or `.json` file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&raw)?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&raw)?,
            other => {
                return Err(Error::Config(format!(
                    "unsupported config extension {:?} for {}",
                    other,
                    path.display()
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let h = &self.health;
        if h.probe_interval.is_zero() {
            return Err(Error::Config("health.probe_interval must be positive".into()));
        }
        if h.suspect_after == 0 || h.down_after < h.suspect_after {
            return Err(Error::Config(
                "health thresholds need 1 <= suspect_after <= down_after".into(),
            ));
        }
        if h.recover_after == 0 {
            return Err(Error::Config("health.recover_after must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 || self.retry.multiplier < 1.0 {
            return Err(Error::Config(
                "retry needs max_attempts >= 1 and multiplier >= 1.0".into(),
            ));
        }
        let moves = self.rebalance.max_concurrent_moves;
        if moves == 0 || moves > MAX_CONCURRENT_MOVES {
            return Err(Error::Config(format!(
                "rebalance.max_concurrent_moves must be within 1..={}",
                MAX_CONCURRENT_MOVES
            )));
        }
        let fill = self.placement.fill_threshold_percent;
        if fill == 0 || fill > 100 {
            return Err(Error::Config(
                "placement.fill_threshold_percent must be within 1..=100".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Durations
// =============================================================================

/// Parse a duration like `"250ms"`, `"30s"`, `"5m"`, `"1h30m"` or `"2d"`.
/// A bare number means seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::DurationParse("empty duration string".to_string()));
    }

    let overflow = || Error::DurationParse(format!("duration out of range: {}", s));
    let mut total_ms: u64 = 0;
    let mut num_buf = String::new();
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            num_buf.push(c);
            continue;
        }

        let num: u64 = num_buf
            .parse()
            .map_err(|_| Error::DurationParse(format!("invalid number in duration: {}", s)))?;
        num_buf.clear();

        let multiplier = match c {
            'm' | 'M' if chars.peek() == Some(&'s') => {
                chars.next();
                1
            }
            'd' | 'D' => 86_400_000,
            'h' | 'H' => 3_600_000,
            'm' | 'M' => 60_000,
            's' | 'S' => 1_000,
            _ => {
                return Err(Error::DurationParse(format!(
                    "unknown duration unit: {}",
                    c
                )))
            }
        };
        total_ms = num
            .checked_mul(multiplier)
            .and_then(|ms| total_ms.checked_add(ms))
            .ok_or_else(overflow)?;
    }

    if !num_buf.is_empty() {
        let num: u64 = num_buf
            .parse()
            .map_err(|_| Error::DurationParse(format!("invalid number in duration: {}", s)))?;
        total_ms = num
            .checked_mul(1_000)
            .and_then(|ms| total_ms.checked_add(ms))
            .ok_or_else(overflow)?;
    }

    Ok(Duration::from_millis(total_ms))
}

/// Render a duration in the form [`parse_duration`] reads back.
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis() as u64;
    if ms == 0 {
        "0s".to_string()
    } else if ms % 3_600_000 == 0 {
        format!("{}h", ms / 3_600_000)
    } else if ms % 60_000 == 0 {
        format!("{}m", ms / 60_000)
    } else if ms % 1_000 == 0 {
        format!("{}s", ms / 1_000)
    } else {
        format!("{}ms", ms)
    }
}

/// `#[serde(with = "duration_str")]` for human-readable durations.
pub mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("1m500ms").unwrap(), Duration::from_millis(60_500));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("s").is_err());
    }

    #[test]
    fn test_parse_duration_out_of_range() {
        assert!(matches!(
            parse_duration("99999999999999d"),
            Err(Error::DurationParse(_))
        ));
        assert!(matches!(
            parse_duration("99999999999999999"),
            Err(Error::DurationParse(_))
        ));
    }

    #[test]
    fn test_format_duration_reads_back() {
        for d in [
            Duration::from_millis(50),
            Duration::from_secs(2),
            Duration::from_secs(300),
            Duration::from_secs(7200),
        ] {
            assert_eq!(parse_duration(&format_duration(d)).unwrap(), d);
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_thresholds() {
        let mut config = EngineConfig::default();
        config.health.down_after = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.rebalance.max_concurrent_moves = MAX_CONCURRENT_MOVES + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_yaml_with_partial_sections() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "data_dir: /tmp/pools\nhealth:\n  probe_interval: 2s\n  down_after: 5\nrebalance:\n  max_concurrent_moves: 2"
        )
        .unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/pools"));
        assert_eq!(config.health.probe_interval, Duration::from_secs(2));
        assert_eq!(config.health.down_after, 5);
        assert_eq!(config.health.suspect_after, 1);
        assert_eq!(config.rebalance.max_concurrent_moves, 2);
        assert_eq!(config.placement.fill_threshold_percent, 90);
    }

    #[test]
    fn test_load_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"retry": {{"max_attempts": 5, "initial_backoff": "10ms"}}}}"#).unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_backoff, Duration::from_millis(10));
    }

    #[test]
    fn test_unknown_extension() {
        let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        assert!(matches!(EngineConfig::load(file.path()), Err(Error::Config(_))));
    }
}
