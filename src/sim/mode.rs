// where each frame's timestep comes from
use crate::sim::record::Recording;
use crate::sim::settings::MAX_DELTA_TIME;

/// Playback position inside a loaded trace.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplayCursor {
    delta_times: Vec<f32>,
    uvs: Vec<[f32; 2]>,
    next: usize,
}

impl ReplayCursor {
    pub fn new(recording: &Recording) -> Self {
        Self {
            delta_times: recording.delta_times.clone(),
            uvs: recording.uvs.clone(),
            next: 0,
        }
    }

    pub fn frame(&self) -> usize {
        self.next
    }

    pub fn len(&self) -> usize {
        self.delta_times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delta_times.is_empty()
    }

    pub fn is_exhausted(&self) -> bool {
        self.next >= self.delta_times.len()
    }

    /// Final per-particle texture coordinates stored with the trace.
    pub fn uvs(&self) -> &[[f32; 2]] {
        &self.uvs
    }

    fn advance(&mut self) -> Option<f32> {
        let dt = self.delta_times.get(self.next).copied()?;
        self.next += 1;
        Some(dt)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum OperatingMode {
    #[default]
    Live,
    Replay(ReplayCursor),
}

impl OperatingMode {
    /// The timestep for this frame. Live clamps the wall-clock delta;
    /// replay yields recorded deltas and `None` once they run out.
    pub fn next_delta(&mut self, wall_delta: f32) -> Option<f32> {
        match self {
            OperatingMode::Live => Some(wall_delta.min(MAX_DELTA_TIME)),
            OperatingMode::Replay(cursor) => cursor.advance(),
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, OperatingMode::Replay(_))
    }

    pub fn replay_uvs(&self) -> Option<&[[f32; 2]]> {
        match self {
            OperatingMode::Replay(cursor) => Some(cursor.uvs()),
            OperatingMode::Live => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::record::TraceHeader;
    use crate::sim::settings::GeneralSettings;
    use crate::sim::spawner::ParticleSpawner;

    #[test]
    fn live_clamps_to_max_delta() {
        let mut mode = OperatingMode::Live;
        assert_eq!(mode.next_delta(0.1), Some(MAX_DELTA_TIME));
        assert_eq!(mode.next_delta(0.002), Some(0.002));
    }

    #[test]
    fn replay_yields_recorded_deltas_then_stops() {
        let recording = Recording {
            header: TraceHeader {
                settings: GeneralSettings::initial(1),
                spawner: ParticleSpawner::default(),
            },
            delta_times: vec![0.5, 0.25],
            uvs: vec![[0.0, 1.0]],
        };
        let mut mode = OperatingMode::Replay(ReplayCursor::new(&recording));
        // recorded values pass through unclamped
        assert_eq!(mode.next_delta(0.001), Some(0.5));
        assert_eq!(mode.next_delta(0.001), Some(0.25));
        assert_eq!(mode.next_delta(0.001), None);
        assert_eq!(mode.replay_uvs(), Some(&[[0.0, 1.0]][..]));
    }
}
