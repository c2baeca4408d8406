//! Hand-off to the external compositor

use crate::peer::PeerId;
use crate::recording::{ClipId, PeerClip, Track};
use crate::state::FocusRecord;
use crate::Result;
use bytes::Bytes;
use serde::Serialize;

/// A clip record paired with its payload when available
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionClip {
    #[serde(flatten)]
    pub clip: PeerClip,
    /// Encoded bytes; not part of the JSON manifest
    #[serde(skip)]
    pub payload: Option<Bytes>,
    pub payload_size: Option<usize>,
    /// SHA-256 of the payload, lowercase hex
    pub payload_hash: Option<String>,
}

impl CompositionClip {
    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }
}

/// Everything the compositor needs to lay out the final video
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositorManifest {
    pub global_clock_start: Option<u64>,
    /// Sorted by global start time
    pub clips: Vec<CompositionClip>,
    pub focus_history: Vec<FocusRecord>,
    pub tile_order: Vec<PeerId>,
    pub screen_share_peer: Option<PeerId>,
}

impl CompositorManifest {
    /// Clips whose payload has not arrived yet
    pub fn missing_payloads(&self) -> Vec<&ClipId> {
        self.clips
            .iter()
            .filter(|c| !c.has_payload())
            .map(|c| &c.clip.clip_id)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.clips.iter().all(CompositionClip::has_payload)
    }

    /// Pairs of clips that overlap on the same peer's track
    ///
    /// Empty for a well-formed session; still-open clips are ignored.
    pub fn overlapping_clips(&self) -> Vec<(&ClipId, &ClipId)> {
        let mut overlaps = Vec::new();
        for (i, a) in self.clips.iter().enumerate() {
            for b in &self.clips[i + 1..] {
                if a.clip.peer_id != b.clip.peer_id
                    || a.clip.source_type.track() != b.clip.source_type.track()
                {
                    continue;
                }
                let (Some(a_end), Some(b_end)) = (a.clip.global_end_time, b.clip.global_end_time)
                else {
                    continue;
                };
                if a.clip.global_start_time < b_end && b.clip.global_start_time < a_end {
                    overlaps.push((&a.clip.clip_id, &b.clip.clip_id));
                }
            }
        }
        overlaps
    }

    /// Clips of one peer on one track, in timeline order
    pub fn track(&self, peer: &PeerId, track: Track) -> Vec<&CompositionClip> {
        self.clips
            .iter()
            .filter(|c| &c.clip.peer_id == peer && c.clip.source_type.track() == track)
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
