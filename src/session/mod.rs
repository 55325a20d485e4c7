pub mod recorder;
pub mod registry;
pub mod store;
pub mod time;

use serde::{Deserialize, Serialize};

use crate::pty::supervisor::TitleMode;

/// `status = running ⇒ pid ≠ ∅ ∧ exitCode = ∅`; `status = exited ⇒ pid = ∅ ∧
/// exitCode ≠ ∅` (§3 I1). Modeling this as an enum makes the invariant hold
/// by construction instead of needing to be checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Starting,
    Running { pid: i32 },
    Exited { code: i32 },
}

impl Serialize for SessionStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("SessionStatus", 3)?;
        match self {
            SessionStatus::Starting => {
                s.serialize_field("status", "starting")?;
                s.serialize_field("pid", &None::<i32>)?;
                s.serialize_field("exitCode", &None::<i32>)?;
            }
            SessionStatus::Running { pid } => {
                s.serialize_field("status", "running")?;
                s.serialize_field("pid", &Some(pid))?;
                s.serialize_field("exitCode", &None::<i32>)?;
            }
            SessionStatus::Exited { code } => {
                s.serialize_field("status", "exited")?;
                s.serialize_field("pid", &None::<i32>)?;
                s.serialize_field("exitCode", &Some(code))?;
            }
        }
        s.end()
    }
}

impl<'de> Deserialize<'de> for SessionStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            status: String,
            pid: Option<i32>,
            #[serde(rename = "exitCode")]
            exit_code: Option<i32>,
        }
        let raw = Raw::deserialize(deserializer)?;
        match raw.status.as_str() {
            "starting" => Ok(SessionStatus::Starting),
            "running" => raw
                .pid
                .map(|pid| SessionStatus::Running { pid })
                .ok_or_else(|| serde::de::Error::missing_field("pid")),
            "exited" => raw
                .exit_code
                .map(|code| SessionStatus::Exited { code })
                .ok_or_else(|| serde::de::Error::missing_field("exitCode")),
            other => Err(serde::de::Error::unknown_variant(
                other,
                &["starting", "running", "exited"],
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireTitleMode {
    None,
    Filter,
    Static,
}

impl From<WireTitleMode> for TitleMode {
    fn from(mode: WireTitleMode) -> Self {
        match mode {
            WireTitleMode::None => TitleMode::None,
            WireTitleMode::Filter => TitleMode::Filter,
            WireTitleMode::Static => TitleMode::Static,
        }
    }
}

/// Optional, opaque Git context (§3): the core never computes these, it only
/// carries them through from session creation to the session listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_repo_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_ahead_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_behind_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_has_changes: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_is_worktree: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    pub session_id: String,
    pub command: Vec<String>,
    pub working_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub cols: u16,
    pub rows: u16,
    #[serde(flatten)]
    pub status: SessionStatus,
    pub started_at: String,
    pub last_modified: String,
    pub title_mode: WireTitleMode,
    #[serde(flatten)]
    pub git: GitContext,
}
