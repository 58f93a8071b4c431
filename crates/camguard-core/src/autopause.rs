//! Pause the stream when the last camera-on viewer leaves

use tracing::info;

/// Watches the compliant audience count.
///
/// A pause is issued on the transition from at least one viewer to none.
/// Further zero readings do nothing until the audience refills.
#[derive(Debug)]
pub struct AutoPauseController {
    enabled: bool,
    last_count: usize,
    paused: bool,
}

impl AutoPauseController {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            last_count: 0,
            paused: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Feed the current audience count; returns true if a pause is due
    pub fn observe(&mut self, count: usize) -> bool {
        let previous = std::mem::replace(&mut self.last_count, count);
        if count > 0 {
            self.paused = false;
            return false;
        }
        if !self.enabled || previous == 0 || self.paused {
            return false;
        }
        info!(previous, "Camera-on audience emptied, pausing stream");
        self.paused = true;
        true
    }
}
