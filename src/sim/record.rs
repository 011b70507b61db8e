//! Recording trace format and the record/replay state.
//!
//! Layout (little-endian):
//! `GeneralSettings` (88 bytes) | `ParticleSpawner` (32 bytes) |
//! `f32` delta time per frame ... | `f32` 0.0 | `u64` particle count |
//! `count` x `[f32; 2]` final particle uvs.
use std::io::{self, Read, Write};

use thiserror::Error;

use crate::sim::settings::{GeneralSettings, POSITION_FACTOR, SETTINGS_WIRE_SIZE};
use crate::sim::spawner::{ParticleSpawner, SPAWNER_WIRE_SIZE};

pub const HEADER_SIZE: usize = SETTINGS_WIRE_SIZE + SPAWNER_WIRE_SIZE;
/// Default cap on how much trace body a replay reads.
pub const DEFAULT_READ_LIMIT: usize = 50 * 1024 * 1024;
/// Frames recorded after the target count is reached, letting the fluid settle.
pub const DEFAULT_SETTLE_FRAMES: u32 = 3000;

const END_OF_TRACE: f32 = 0.0;

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("recording i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("recording header is truncated")]
    ShortHeader,
    #[error("no end-of-trace marker within the first {scanned} bytes of the trace")]
    MissingSentinel { scanned: usize },
    #[error("particle count missing after the end-of-trace marker")]
    MissingCount,
    #[error("trace declares {expected} particle uvs but only {available} are present")]
    TruncatedUvs { expected: u64, available: usize },
    #[error("recording is not waiting for final positions")]
    NotAwaitingPositions,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TraceHeader {
    pub settings: GeneralSettings,
    pub spawner: ParticleSpawner,
}

impl TraceHeader {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..SETTINGS_WIRE_SIZE].copy_from_slice(&self.settings.encode());
        out[SETTINGS_WIRE_SIZE..].copy_from_slice(&self.spawner.encode());
        out
    }

    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Self {
        let mut settings = [0u8; SETTINGS_WIRE_SIZE];
        let mut spawner = [0u8; SPAWNER_WIRE_SIZE];
        settings.copy_from_slice(&bytes[..SETTINGS_WIRE_SIZE]);
        spawner.copy_from_slice(&bytes[SETTINGS_WIRE_SIZE..]);
        Self {
            settings: GeneralSettings::decode(&settings),
            spawner: ParticleSpawner::decode(&spawner),
        }
    }
}

/// A fully parsed trace.
#[derive(Clone, Debug, PartialEq)]
pub struct Recording {
    pub header: TraceHeader,
    pub delta_times: Vec<f32>,
    pub uvs: Vec<[f32; 2]>,
}

pub struct TraceWriter<W: Write> {
    out: W,
    frames: u64,
}

impl<W: Write> TraceWriter<W> {
    pub fn begin(mut out: W, header: &TraceHeader) -> Result<Self, RecordError> {
        out.write_all(&header.encode())?;
        Ok(Self { out, frames: 0 })
    }

    /// Appends one frame. Zero deltas are skipped since 0.0 ends the trace;
    /// such a frame moves nothing, so dropping it keeps replay faithful.
    pub fn push_delta(&mut self, delta_time: f32) -> Result<bool, RecordError> {
        if delta_time == END_OF_TRACE {
            return Ok(false);
        }
        self.out.write_all(&delta_time.to_le_bytes())?;
        self.frames += 1;
        Ok(true)
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn finish(mut self, uvs: &[[f32; 2]]) -> Result<W, RecordError> {
        self.out.write_all(&END_OF_TRACE.to_le_bytes())?;
        self.out.write_all(&(uvs.len() as u64).to_le_bytes())?;
        for uv in uvs {
            self.out.write_all(&uv[0].to_le_bytes())?;
            self.out.write_all(&uv[1].to_le_bytes())?;
        }
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Parses a trace, reading at most `read_limit` bytes past the header.
pub fn read_trace<R: Read>(mut reader: R, read_limit: usize) -> Result<Recording, RecordError> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => RecordError::ShortHeader,
        _ => RecordError::Io(e),
    })?;
    let header = TraceHeader::decode(&header);

    let mut body = Vec::new();
    reader.take(read_limit as u64).read_to_end(&mut body)?;

    let mut delta_times = Vec::new();
    let mut cursor = None;
    for (i, chunk) in body.chunks_exact(4).enumerate() {
        let dt = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        if dt == END_OF_TRACE {
            cursor = Some((i + 1) * 4);
            break;
        }
        delta_times.push(dt);
    }
    let Some(mut at) = cursor else {
        return Err(RecordError::MissingSentinel { scanned: body.len() });
    };

    let count_bytes = body.get(at..at + 8).ok_or(RecordError::MissingCount)?;
    let mut count = [0u8; 8];
    count.copy_from_slice(count_bytes);
    let count = u64::from_le_bytes(count);
    at += 8;

    let available = (body.len() - at) / 8;
    if (available as u64) < count {
        return Err(RecordError::TruncatedUvs {
            expected: count,
            available,
        });
    }
    let uvs = body[at..at + count as usize * 8]
        .chunks_exact(8)
        .map(|c| {
            [
                f32::from_le_bytes([c[0], c[1], c[2], c[3]]),
                f32::from_le_bytes([c[4], c[5], c[6], c[7]]),
            ]
        })
        .collect();

    Ok(Recording {
        header,
        delta_times,
        uvs,
    })
}

/// Maps final world positions onto [0, 1]^2 texture coordinates.
pub fn uv_from_positions(positions: &[[f32; 2]], aspect_ratio: f32) -> Vec<[f32; 2]> {
    positions
        .iter()
        .map(|p| {
            let ndc_x = p[0] / POSITION_FACTOR / aspect_ratio;
            let ndc_y = p[1] / POSITION_FACTOR;
            [(ndc_x + 1.0) * 0.5, (ndc_y + 1.0) * 0.5]
        })
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecorderState {
    Recording,
    Settling { remaining: u32 },
    AwaitingPositions,
    Finished,
}

/// Drives a `TraceWriter` across frames until the particle target is met
/// and the fluid has settled.
pub struct Recorder<W: Write> {
    writer: Option<TraceWriter<W>>,
    state: RecorderState,
    target_count: u32,
    settle_frames: u32,
}

impl<W: Write> Recorder<W> {
    pub fn new(writer: TraceWriter<W>, target_count: u32, settle_frames: u32) -> Self {
        Self {
            writer: Some(writer),
            state: RecorderState::Recording,
            target_count,
            settle_frames,
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn frames(&self) -> u64 {
        self.writer.as_ref().map_or(0, |w| w.frames())
    }

    pub fn on_frame(&mut self, delta_time: f32, particle_count: u32) -> Result<RecorderState, RecordError> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(self.state);
        };
        match self.state {
            RecorderState::Recording => {
                writer.push_delta(delta_time)?;
                if particle_count >= self.target_count {
                    self.state = match self.settle_frames {
                        0 => RecorderState::AwaitingPositions,
                        n => RecorderState::Settling { remaining: n },
                    };
                }
            }
            RecorderState::Settling { remaining } => {
                writer.push_delta(delta_time)?;
                self.state = match remaining - 1 {
                    0 => RecorderState::AwaitingPositions,
                    n => RecorderState::Settling { remaining: n },
                };
            }
            RecorderState::AwaitingPositions | RecorderState::Finished => {}
        }
        Ok(self.state)
    }

    /// Closes the trace with uvs derived from the final positions.
    pub fn finish(&mut self, positions: &[[f32; 2]], aspect_ratio: f32) -> Result<W, RecordError> {
        if self.state != RecorderState::AwaitingPositions {
            return Err(RecordError::NotAwaitingPositions);
        }
        let writer = self.writer.take().ok_or(RecordError::NotAwaitingPositions)?;
        let out = writer.finish(&uv_from_positions(positions, aspect_ratio))?;
        self.state = RecorderState::Finished;
        Ok(out)
    }
}
