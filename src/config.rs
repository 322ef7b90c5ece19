use crate::persist::FailurePolicy;
use crate::storage::atomic_rename;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Tunable periods. None of them is correctness-critical.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub decay_period_ms: u64,
    pub debounce_ms: u64,
    pub batch_max: usize,
    pub batch_window_ms: u64,
    pub interaction_display_ms: u64,
    pub earning_display_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            decay_period_ms: 30_000,
            debounce_ms: 500,
            batch_max: 3,
            batch_window_ms: 1_000,
            interaction_display_ms: 1_500,
            earning_display_ms: 2_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteSettings {
    pub url: String,
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub fps_cap: u32,
    pub enable_color: bool,
    /// Signed-in identity; `None` plays as a guest.
    pub user_id: Option<String>,
    pub remote: Option<RemoteSettings>,
    pub failure_policy: FailurePolicy,
    pub timings: Timings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fps_cap: 30,
            enable_color: true,
            user_id: None,
            remote: None,
            failure_policy: FailurePolicy::KeepOptimistic,
            timings: Timings::default(),
        }
    }
}

pub struct Paths {
    pub data_dir: PathBuf,
    pub settings_path: PathBuf,
    pub log_path: PathBuf,
}

impl Paths {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("could not create {}", dir.display()))?;
        Ok(Self {
            settings_path: dir.join("settings.json"),
            log_path: dir.join("petroom.log"),
            data_dir: dir,
        })
    }
}

pub fn project_paths() -> Result<Paths> {
    let proj = ProjectDirs::from("com", "petroom", "Petroom")
        .context("could not resolve project directories")?;
    Paths::in_dir(proj.data_local_dir())
}

pub fn load_settings(path: &Path) -> Settings {
    if let Ok(s) = fs::read_to_string(path) {
        if let Ok(v) = serde_json::from_str::<Settings>(&s) {
            return v;
        }
    }
    Settings::default()
}

pub fn save_settings_atomic(path: &Path, s: &Settings) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let data = serde_json::to_vec_pretty(s)?;
    fs::write(&tmp, data)?;
    atomic_rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_settings_fill_in_defaults() {
        let s: Settings =
            serde_json::from_str(r#"{"user_id":"abc","timings":{"debounce_ms":250}}"#).unwrap();
        assert_eq!(s.user_id.as_deref(), Some("abc"));
        assert_eq!(s.timings.debounce_ms, 250);
        assert_eq!(s.timings.batch_max, 3);
        assert_eq!(s.failure_policy, FailurePolicy::KeepOptimistic);
    }

    #[test]
    fn policy_is_snake_case() {
        let s: Settings = serde_json::from_str(r#"{"failure_policy":"rollback"}"#).unwrap();
        assert_eq!(s.failure_policy, FailurePolicy::Rollback);
    }

    #[test]
    fn settings_survive_an_atomic_save() {
        let dir = std::env::temp_dir().join(format!("petroom-config-{}", std::process::id()));
        let paths = Paths::in_dir(&dir).unwrap();
        let mut s = Settings::default();
        s.user_id = Some("u-42".into());
        save_settings_atomic(&paths.settings_path, &s).unwrap();
        assert_eq!(load_settings(&paths.settings_path), s);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn unreadable_settings_fall_back() {
        let s = load_settings(Path::new("/definitely/not/here/settings.json"));
        assert_eq!(s, Settings::default());
    }
}
