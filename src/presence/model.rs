//! Broadcaster presence snapshot

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Visibility codes
pub const VS_ONLINE: u64 = 0;
pub const VS_AWAY: u64 = 2;
pub const VS_PRIVATE: u64 = 12;
pub const VS_GROUP: u64 = 13;
pub const VS_OFFLINE: u64 = 127;
/// Offline or not disclosed to guests
pub const VS_UNDISCLOSED: u64 = 90;

/// Feature flag bit for HD streams
pub const HD_FLAG: i32 = 1024;

/// Account level of broadcasters
pub const MODEL_LEVEL: i32 = 4;

/// Immutable presence snapshot of one broadcaster
///
/// The tracker replaces snapshots, it never mutates them.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelState {
    pub uid: u64,
    pub name: String,
    /// Visibility status code
    pub visibility: u64,
    /// Camera server id, used to pick the RTMP relay
    pub camserv: i32,
    /// Feature flags
    pub flags: i32,
    /// Account level
    pub level: i32,
    pub session_id: u64,
    pub pid: i64,
    /// The name was non-empty
    pub exists: bool,
    /// When this snapshot was observed
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RawModel {
    lv: i32,
    nm: String,
    pid: i64,
    sid: u64,
    uid: u64,
    vs: u64,
    u: RawUser,
    m: RawModelInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawUser {
    camserv: i32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawModelInfo {
    flags: i32,
}

impl From<RawModel> for ModelState {
    fn from(raw: RawModel) -> Self {
        Self {
            uid: raw.uid,
            exists: !raw.nm.is_empty(),
            name: raw.nm,
            visibility: raw.vs,
            camserv: raw.u.camserv,
            flags: raw.m.flags,
            level: raw.lv,
            session_id: raw.sid,
            pid: raw.pid,
            changed_at: Utc::now(),
        }
    }
}

impl ModelState {
    pub fn is_hd(&self) -> bool {
        self.flags & HD_FLAG != 0
    }

    /// Only a public online show can be recorded
    pub fn is_recordable(&self) -> bool {
        self.visibility == VS_ONLINE
    }

    /// Human readable status
    pub fn status(&self) -> &'static str {
        if !self.exists {
            return "unknown model";
        }
        match self.visibility {
            VS_ONLINE => "online",
            VS_AWAY => "away",
            VS_PRIVATE => "in private",
            VS_GROUP => "in group show",
            VS_OFFLINE | VS_UNDISCLOSED => "off",
            _ => "unknown status",
        }
    }
}

#[cfg(test)]
pub(crate) fn model(uid: u64, name: &str, visibility: u64) -> ModelState {
    ModelState {
        uid,
        name: name.to_string(),
        visibility,
        camserv: 712,
        flags: 0,
        level: MODEL_LEVEL,
        session_id: 1,
        pid: 1,
        exists: !name.is_empty(),
        changed_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        assert_eq!(model(1, "a", VS_ONLINE).status(), "online");
        assert_eq!(model(1, "a", VS_AWAY).status(), "away");
        assert_eq!(model(1, "a", VS_PRIVATE).status(), "in private");
        assert_eq!(model(1, "a", VS_GROUP).status(), "in group show");
        assert_eq!(model(1, "a", VS_OFFLINE).status(), "off");
        assert_eq!(model(1, "a", VS_UNDISCLOSED).status(), "off");
        assert_eq!(model(1, "a", 55).status(), "unknown status");
        assert_eq!(model(1, "", VS_ONLINE).status(), "unknown model");
    }

    #[test]
    fn test_flags() {
        let mut state = model(1, "a", VS_ONLINE);
        assert!(!state.is_hd());
        assert!(state.is_recordable());

        state.flags = HD_FLAG | 1;
        state.visibility = VS_AWAY;
        assert!(state.is_hd());
        assert!(!state.is_recordable());
    }
}
