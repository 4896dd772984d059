use std::path::{Path, PathBuf};

use super::types::AppConfig;

/// Get the default teerun data directory: ~/.teerun
pub fn get_teerun_data_dir() -> anyhow::Result<PathBuf> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_err(|_| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(PathBuf::from(home).join(".teerun"))
}

pub fn load_default() -> anyhow::Result<AppConfig> {
    // Priority 1: ~/.teerun/config.toml
    let user_config = get_teerun_data_dir()?.join("config.toml");

    // Priority 2: ./teerun.toml
    let local_config = Path::new("teerun.toml");

    let mut cfg = if user_config.exists() {
        load_from_path(&user_config)?
    } else if local_config.exists() {
        load_from_path(local_config)?
    } else {
        AppConfig::default()
    };

    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok())?;
    Ok(cfg)
}

pub fn load_from_path(path: &Path) -> anyhow::Result<AppConfig> {
    let s = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("read config {}: {e}", path.display()))?;
    let cfg = toml::from_str::<AppConfig>(&s)
        .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?;
    Ok(cfg)
}

/// Environment variable overrides (highest priority). Empty values are
/// ignored.
pub fn apply_env_overrides<F>(cfg: &mut AppConfig, var: F) -> anyhow::Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| var(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = get("TEERUN_CHUNK_SIZE") {
        cfg.runner.chunk_size = v
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("TEERUN_CHUNK_SIZE: {e}"))?;
    }
    if let Some(v) = get("TEERUN_KILL_GRACE_MS") {
        cfg.runner.kill_grace_ms = v
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("TEERUN_KILL_GRACE_MS: {e}"))?;
    }
    if let Some(v) = get("TEERUN_ENCODING") {
        cfg.runner.encoding = v.trim().to_string();
    }
    if let Some(v) = get("TEERUN_LOG_LEVEL") {
        cfg.logging.level = v.trim().to_string();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("teerun.toml");
        std::fs::write(&path, "[runner]\nkill_grace_ms = 50\n").unwrap();

        let cfg = load_from_path(&path).unwrap();
        assert_eq!(cfg.runner.kill_grace_ms, 50);
        assert_eq!(cfg.runner.chunk_size, 32 * 1024);
        assert_eq!(cfg.runner.encoding, "utf-8");
        assert_eq!(cfg.logging.level, "warn");
        assert!(cfg.logging.console);
    }

    #[test]
    fn malformed_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[runner\nchunk_size = ").unwrap();

        let err = load_from_path(&path).unwrap_err().to_string();
        assert!(err.contains("bad.toml"), "{err}");
    }

    #[test]
    fn env_overrides_win_and_blank_values_are_ignored() {
        let vars: HashMap<&str, &str> = [
            ("TEERUN_CHUNK_SIZE", "4096"),
            ("TEERUN_ENCODING", "  "),
            ("TEERUN_LOG_LEVEL", "teerun_core=debug"),
        ]
        .into_iter()
        .collect();

        let mut cfg = AppConfig::default();
        apply_env_overrides(&mut cfg, |k| vars.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(cfg.runner.chunk_size, 4096);
        assert_eq!(cfg.runner.encoding, "utf-8");
        assert_eq!(cfg.runner.kill_grace_ms, 200);
        assert_eq!(cfg.logging.level, "teerun_core=debug");
    }

    #[test]
    fn unparsable_override_is_an_error() {
        let mut cfg = AppConfig::default();
        let res = apply_env_overrides(&mut cfg, |k| {
            (k == "TEERUN_KILL_GRACE_MS").then(|| "soon".to_string())
        });
        assert!(res.is_err());
    }
}
