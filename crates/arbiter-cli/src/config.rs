//! Configuration vault – reads/writes `~/.arbiter/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use arbiter_runtime::EngineConfig;
use arbiter_types::ArbiterError;
use serde::{Deserialize, Serialize};

/// Persisted CLI configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Ticks simulated by `arbiter run` when no count is given.
    pub default_ticks: u64,
    /// Seed of the duel world.
    pub world_seed: u64,
    pub engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_ticks: 3600,
            world_seed: 42,
            engine: EngineConfig::default(),
        }
    }
}

/// `~/.arbiter/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".arbiter").join("config.toml")
}

/// Load the config, `None` when the file does not exist.  Environment
/// overrides are applied on top.
pub fn load() -> Result<Option<Config>, ArbiterError> {
    load_from(&config_path())
}

/// [`load`], falling back to defaults (still env-overridden) when missing.
pub fn load_or_default() -> Result<Config, ArbiterError> {
    match load()? {
        Some(cfg) => Ok(cfg),
        None => {
            let mut cfg = Config::default();
            apply_env_overrides(&mut cfg);
            Ok(cfg)
        }
    }
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, ArbiterError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| ArbiterError::Config(format!("failed to read {}: {e}", path.display())))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| ArbiterError::Config(format!("failed to parse {}: {e}", path.display())))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `ARBITER_*` overrides.  Unparseable values are ignored.
///
/// | Variable | Field |
/// |---|---|
/// | `ARBITER_TICK_RATE` | `engine.tick_rate_hz` |
/// | `ARBITER_MONITOR_INTERVAL` | `engine.monitor.interval_ticks` |
/// | `ARBITER_ANALYSIS_INTERVAL` | `engine.analyzer.interval_ticks` |
/// | `ARBITER_AUTO_OPTIMIZE` | `engine.monitor.auto_optimize` |
/// | `ARBITER_SEED` | `world_seed` and `engine.optimizer.seed` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Some(rate) = env_parse::<f32>("ARBITER_TICK_RATE")
        && rate > 0.0
    {
        cfg.engine.tick_rate_hz = rate;
    }
    if let Some(ticks) = env_parse::<u64>("ARBITER_MONITOR_INTERVAL") {
        cfg.engine.monitor.interval_ticks = ticks;
    }
    if let Some(ticks) = env_parse::<u64>("ARBITER_ANALYSIS_INTERVAL") {
        cfg.engine.analyzer.interval_ticks = ticks;
    }
    if let Ok(v) = std::env::var("ARBITER_AUTO_OPTIMIZE")
        && let Some(flag) = parse_flag(&v)
    {
        cfg.engine.monitor.auto_optimize = flag;
    }
    if let Some(seed) = env_parse::<u64>("ARBITER_SEED") {
        cfg.world_seed = seed;
        cfg.engine.optimizer.seed = Some(seed);
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn save(cfg: &Config) -> Result<(), ArbiterError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), ArbiterError> {
    let io = |what: &str, e: std::io::Error| ArbiterError::Config(format!("failed to {what}: {e}"));
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io("create config directory", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| io("restrict config directory", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| ArbiterError::Config(format!("failed to serialise config: {e}")))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| io(&format!("write {}", path.display()), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| io(&format!("write {}", path.display()), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn config_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&Config::default(), &path).expect("save");

        let file_mode = fs::metadata(&path).expect("file").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = fs::metadata(path.parent().unwrap()).expect("dir").permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn roundtrip_through_toml() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        let mut cfg = Config::default();
        cfg.engine.monitor.min_fps = 45.0;
        cfg.engine.optimizer.max_iterations = 7;
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load").expect("some");
        assert_eq!(loaded.engine.monitor.min_fps, 45.0);
        assert_eq!(loaded.engine.optimizer.max_iterations, 7);
        assert_eq!(loaded.default_ticks, 3600);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "default_ticks = 100\n[engine.monitor]\nauto_optimize = false\n").unwrap();
        let loaded = load_from(&path).expect("load").expect("some");
        assert_eq!(loaded.default_ticks, 100);
        assert!(!loaded.engine.monitor.auto_optimize);
        assert_eq!(loaded.engine.monitor.max_memory_mb, 500.0);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "default_ticks = \"many\"").unwrap();
        assert!(matches!(load_from(&path), Err(ArbiterError::Config(_))));
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn path_points_to_arbiter_dir() {
        let p = config_path_for_home("/home/duelist");
        assert!(p.ends_with(".arbiter/config.toml"));
    }

    #[test]
    fn flags_parse_loosely() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" off "), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    // Every override lives in one test so parallel tests never race on the
    // same variables.
    #[test]
    fn env_overrides_apply() {
        // SAFETY: only this test touches ARBITER_* variables.
        unsafe {
            std::env::set_var("ARBITER_TICK_RATE", "30");
            std::env::set_var("ARBITER_MONITOR_INTERVAL", "120");
            std::env::set_var("ARBITER_ANALYSIS_INTERVAL", "not-a-number");
            std::env::set_var("ARBITER_AUTO_OPTIMIZE", "no");
            std::env::set_var("ARBITER_SEED", "9");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.engine.tick_rate_hz, 30.0);
        assert_eq!(cfg.engine.monitor.interval_ticks, 120);
        assert_eq!(cfg.engine.analyzer.interval_ticks, 300);
        assert!(!cfg.engine.monitor.auto_optimize);
        assert_eq!(cfg.world_seed, 9);
        assert_eq!(cfg.engine.optimizer.seed, Some(9));
        unsafe {
            for name in [
                "ARBITER_TICK_RATE",
                "ARBITER_MONITOR_INTERVAL",
                "ARBITER_ANALYSIS_INTERVAL",
                "ARBITER_AUTO_OPTIMIZE",
                "ARBITER_SEED",
            ] {
                std::env::remove_var(name);
            }
        }
    }
}
