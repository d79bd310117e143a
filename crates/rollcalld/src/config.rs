use rollcall_core::LedgerScope;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Cosine distance never exceeds this; a threshold at or above it matches everything.
const MAX_COSINE_DISTANCE: f32 = 2.0;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{key}={value:?} is not a valid {expected}")]
    Invalid {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Gallery manifest (JSON).
    pub gallery_path: PathBuf,
    /// Attendance ledger file.
    pub ledger_path: PathBuf,
    pub ledger_scope: LedgerScope,
    /// Maximum distance for a face to count as a known identity.
    pub match_threshold: f32,
    /// Maximum distance for an unknown face to merge into an existing cluster.
    pub unknown_merge_threshold: f32,
    /// Debounce window per identity (and for all unknowns together).
    pub cooldown: chrono::Duration,
    /// Run detection on one frame out of every N.
    pub process_every_n_frames: NonZeroU32,
    /// Sleep after each loop iteration.
    pub loop_interval: Duration,
    /// Number of warmup frames to discard after opening (camera AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Start the pipeline as soon as the daemon is up.
    pub autostart: bool,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    ///
    /// A variable that is set but does not parse, or is out of range, is an
    /// error rather than a silent fallback.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_dir = rollcall_core::data_dir();

        let cooldown_secs = parse_or(&get, "ROLLCALL_COOLDOWN_SECS", 3.0f64, "non-negative number of seconds")?;
        let cooldown = Duration::try_from_secs_f64(cooldown_secs)
            .ok()
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .ok_or(ConfigError::Invalid {
                key: "ROLLCALL_COOLDOWN_SECS",
                value: cooldown_secs.to_string(),
                expected: "non-negative number of seconds",
            })?;

        let every_n: u32 = parse_or(&get, "ROLLCALL_PROCESS_EVERY_N_FRAMES", 3, "positive integer")?;
        let process_every_n_frames = NonZeroU32::new(every_n).ok_or(ConfigError::Invalid {
            key: "ROLLCALL_PROCESS_EVERY_N_FRAMES",
            value: every_n.to_string(),
            expected: "positive integer",
        })?;

        let ledger_scope = match get("ROLLCALL_LEDGER_SCOPE") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                key: "ROLLCALL_LEDGER_SCOPE",
                value: raw,
                expected: "ledger scope (lifetime or daily)",
            })?,
            None => LedgerScope::default(),
        };

        Ok(Self {
            camera_device: get("ROLLCALL_CAMERA_DEVICE").unwrap_or_else(|| "/dev/video0".to_string()),
            model_dir: get("ROLLCALL_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(rollcall_core::default_model_dir),
            gallery_path: get("ROLLCALL_GALLERY_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("gallery").join("gallery.json")),
            ledger_path: get("ROLLCALL_LEDGER_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("attendance.csv")),
            ledger_scope,
            match_threshold: threshold(&get, "ROLLCALL_MATCH_THRESHOLD", 0.50)?,
            unknown_merge_threshold: threshold(&get, "ROLLCALL_UNKNOWN_MERGE_THRESHOLD", 0.60)?,
            cooldown,
            process_every_n_frames,
            loop_interval: Duration::from_millis(parse_or(&get, "ROLLCALL_LOOP_INTERVAL_MS", 33, "number of milliseconds")?),
            warmup_frames: parse_or(&get, "ROLLCALL_WARMUP_FRAMES", 4, "frame count")?,
            autostart: match get("ROLLCALL_AUTOSTART").as_deref() {
                None | Some("0") | Some("false") => false,
                Some("1") | Some("true") => true,
                Some(other) => {
                    return Err(ConfigError::Invalid {
                        key: "ROLLCALL_AUTOSTART",
                        value: other.to_string(),
                        expected: "boolean (0/1)",
                    })
                }
            },
        })
    }
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
    expected: &'static str,
) -> Result<T, ConfigError> {
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key,
            value: raw,
            expected,
        }),
    }
}

fn threshold(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: f32,
) -> Result<f32, ConfigError> {
    const EXPECTED: &str = "cosine distance in [0, 2)";
    let value: f32 = parse_or(get, key, default, EXPECTED)?;
    if !value.is_finite() || !(0.0..MAX_COSINE_DISTANCE).contains(&value) {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            expected: EXPECTED,
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.camera_device, "/dev/video0");
        assert_eq!(config.match_threshold, 0.50);
        assert_eq!(config.unknown_merge_threshold, 0.60);
        assert_eq!(config.cooldown, chrono::Duration::seconds(3));
        assert_eq!(config.process_every_n_frames.get(), 3);
        assert_eq!(config.loop_interval, Duration::from_millis(33));
        assert_eq!(config.warmup_frames, 4);
        assert_eq!(config.ledger_scope, LedgerScope::Lifetime);
        assert!(!config.autostart);
        assert!(config.ledger_path.ends_with("rollcall/attendance.csv"));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("ROLLCALL_CAMERA_DEVICE", "/dev/video2"),
            ("ROLLCALL_COOLDOWN_SECS", "1.5"),
            ("ROLLCALL_LEDGER_SCOPE", "daily"),
            ("ROLLCALL_AUTOSTART", "1"),
            ("ROLLCALL_LEDGER_PATH", "/tmp/a.csv"),
        ])
        .unwrap();
        assert_eq!(config.camera_device, "/dev/video2");
        assert_eq!(config.cooldown, chrono::Duration::milliseconds(1500));
        assert_eq!(config.ledger_scope, LedgerScope::Daily);
        assert!(config.autostart);
        assert_eq!(config.ledger_path, PathBuf::from("/tmp/a.csv"));

        let config = load(&[("ROLLCALL_UNKNOWN_MERGE_THRESHOLD", "1.99")]).unwrap();
        assert_eq!(config.unknown_merge_threshold, 1.99);
    }

    #[test]
    fn test_invalid_values_are_fatal() {
        for (key, value) in [
            ("ROLLCALL_MATCH_THRESHOLD", "abc"),
            ("ROLLCALL_MATCH_THRESHOLD", "-0.1"),
            ("ROLLCALL_UNKNOWN_MERGE_THRESHOLD", "NaN"),
            ("ROLLCALL_UNKNOWN_MERGE_THRESHOLD", "2"),
            ("ROLLCALL_MATCH_THRESHOLD", "2.5"),
            ("ROLLCALL_COOLDOWN_SECS", "-1"),
            ("ROLLCALL_PROCESS_EVERY_N_FRAMES", "0"),
            ("ROLLCALL_LEDGER_SCOPE", "weekly"),
            ("ROLLCALL_AUTOSTART", "maybe"),
        ] {
            let err = load(&[(key, value)]).unwrap_err();
            let ConfigError::Invalid { key: k, .. } = err;
            assert_eq!(k, key);
        }
    }
}
