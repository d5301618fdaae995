//! RTMP target resolution

use super::config::RecorderConfig;
use crate::presence::ModelState;

/// Where and what to play for one recording attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtmpTarget {
    pub url: String,
    pub playpath: String,
    pub session_id: u64,
    pub model_id: u64,
    pub room_id: u64,
}

impl RtmpTarget {
    /// Resolve from the current snapshot
    ///
    /// Two camera server numberings coexist. The primary offset is tried
    /// first; a non-positive relay id selects the fallback offset.
    pub fn resolve(model: &ModelState, config: &RecorderConfig) -> Self {
        let camserv = model.camserv as i64;
        let mut relay = camserv + config.relay_offset;
        if relay <= 0 {
            relay = camserv + config.fallback_relay_offset;
        }

        let room_id = model.uid + config.room_offset;
        let template = if model.is_hd() {
            &config.hd_playpath_template
        } else {
            &config.playpath_template
        };

        Self {
            url: config.url_template.replace("{relay}", &relay.to_string()),
            playpath: template.replace("{room}", &room_id.to_string()),
            session_id: model.session_id,
            model_id: model.uid,
            room_id,
        }
    }
}
