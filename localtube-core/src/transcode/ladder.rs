use crate::catalog::{QualityProfile, STANDARD_LADDER};

use super::types::ProbeInfo;

/// Decides which renditions to produce for a probed source.
#[derive(Debug, Clone)]
pub struct QualityLadder {
    enabled: Vec<QualityProfile>,
}

impl QualityLadder {
    /// `enabled` is reordered to ladder order.
    pub fn new(enabled: &[QualityProfile]) -> Self {
        let enabled = STANDARD_LADDER
            .iter()
            .filter(|profile| enabled.iter().any(|item| item.label == profile.label))
            .copied()
            .collect();
        Self { enabled }
    }

    pub fn enabled(&self) -> &[QualityProfile] {
        &self.enabled
    }

    /// The floor rung is produced for every source, upscaling if needed. Higher rungs
    /// require a source at least as tall as the rung.
    pub fn plan(&self, info: &ProbeInfo) -> Vec<QualityProfile> {
        let floor = STANDARD_LADDER[0].label;
        self.enabled
            .iter()
            .filter(|profile| profile.label == floor || info.height >= profile.height)
            .copied()
            .collect()
    }
}
