use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::credential::ApiCredential;

/// On-disk format of a stored login.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionKind {
    /// Desktop-client directory format.
    #[serde(rename = "tdata")]
    Tdata,
    /// The wrapped client library's own single-file format. The wire
    /// name is historical.
    #[serde(rename = "telethon")]
    Native,
}

/// Storage location and format of one account's session. Built once per
/// incoming request, never persisted.
#[derive(Clone, Debug)]
pub struct SessionDescriptor {
    pub id: String,
    pub path_directory: PathBuf,
    pub kind: SessionKind,
    pub credential: Option<ApiCredential>,
    pub is_upload: bool,
}

impl SessionDescriptor {
    /// Directory holding the desktop-format session.
    pub fn desktop_path(&self) -> PathBuf {
        self.path_directory.join(&self.id)
    }

    /// File holding the native-format session.
    pub fn native_path(&self) -> PathBuf {
        self.path_directory.join(format!("{}.session", self.id))
    }
}

/// Authenticated account identity as reported by the protocol library.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserProfile {
    pub id: i64,
    pub phone: Option<String>,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// A resolved channel, sufficient to address it in follow-up calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelRef {
    pub id: i64,
    pub access_hash: i64,
    pub name: String,
}

/// Launch parameters extracted from a provider's web-view URL.
/// Transient: returned to the caller, never stored.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LaunchPayload {
    pub tg_web_app_data: Option<String>,
    pub auth_url: Option<String>,
}

impl LaunchPayload {
    /// The accepted-but-unhandled case: an unknown provider key yields
    /// an empty payload, not an error.
    pub fn none() -> Self {
        Self::default()
    }
}
