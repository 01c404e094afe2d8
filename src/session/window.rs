use std::io::Write;
use std::path::PathBuf;
use std::{env, fs};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::prelude::*;
use crate::process::Pid;

/// Wall-clock format shared with the analytics layer.
pub const WINDOW_TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// The published scope of one analysis run: when it started and which pids
/// the tracer and the target command ran under.
///
/// Written once per session start as a single JSON record, overwritten by the
/// next session. The dashboard process reads it to scope its queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionWindow {
    #[serde(with = "window_timestamp")]
    pub started_at: DateTime<Utc>,
    pub target_pid: Pid,
    pub tracer_pid: Pid,
}

/// Get the directory where the session window is published
/// If available, uses `$XDG_RUNTIME_DIR/behavior_runner`
/// Otherwise, falls back to `std::env::temp_dir()/behavior_runner`
fn window_root_dir() -> PathBuf {
    let base_dir = if let Some(xdg_runtime_dir) = env::var_os("XDG_RUNTIME_DIR") {
        PathBuf::from(xdg_runtime_dir)
    } else {
        env::temp_dir()
    };

    base_dir.join("behavior_runner")
}

impl SessionWindow {
    pub fn path() -> PathBuf {
        window_root_dir().join("session_window.json")
    }

    /// Publish the window atomically: readers observe either the previous
    /// session's record or this one, never a partial write.
    pub fn publish(&self) -> Result<PathBuf> {
        let dir = window_root_dir();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let mut file = NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut file, self)?;
        file.write_all(b"\n")?;

        let path = Self::path();
        file.persist(&path)
            .context("Failed to publish the session window")?;
        debug!("Session window published to {}", path.display());
        Ok(path)
    }

    pub fn load() -> Result<Self> {
        let path = Self::path();
        let content = fs::read_to_string(&path).with_context(|| {
            format!(
                "No session window found at {}, run a session first",
                path.display()
            )
        })?;
        serde_json::from_str(&content).context("Failed to parse the session window")
    }
}

mod window_timestamp {
    use super::WINDOW_TIMESTAMP_FORMAT;
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        timestamp: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&timestamp.format(WINDOW_TIMESTAMP_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, WINDOW_TIMESTAMP_FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> SessionWindow {
        SessionWindow {
            started_at: chrono::NaiveDateTime::parse_from_str(
                "2024/01/01 00:00:00",
                WINDOW_TIMESTAMP_FORMAT,
            )
            .unwrap()
            .and_utc(),
            target_pid: 50,
            tracer_pid: 999,
        }
    }

    #[test]
    fn test_timestamp_uses_the_shared_wall_clock_format() {
        let json = serde_json::to_value(window()).unwrap();
        assert_eq!(json["started_at"], "2024/01/01 00:00:00");
        assert_eq!(json["target_pid"], 50);
        assert_eq!(json["tracer_pid"], 999);
    }

    #[test]
    fn test_publish_then_load() {
        let runtime_dir = tempfile::tempdir().unwrap();
        temp_env::with_var("XDG_RUNTIME_DIR", Some(runtime_dir.path()), || {
            let published = window();
            let path = published.publish().unwrap();
            assert!(path.starts_with(runtime_dir.path()));
            assert_eq!(SessionWindow::load().unwrap(), published);
        });
    }

    #[test]
    fn test_next_session_overwrites_the_window() {
        let runtime_dir = tempfile::tempdir().unwrap();
        temp_env::with_var("XDG_RUNTIME_DIR", Some(runtime_dir.path()), || {
            window().publish().unwrap();

            let next = SessionWindow {
                target_pid: 51,
                ..window()
            };
            next.publish().unwrap();
            assert_eq!(SessionWindow::load().unwrap(), next);
        });
    }

    #[test]
    fn test_load_without_a_published_window() {
        let runtime_dir = tempfile::tempdir().unwrap();
        temp_env::with_var("XDG_RUNTIME_DIR", Some(runtime_dir.path()), || {
            assert!(SessionWindow::load().is_err());
        });
    }
}
