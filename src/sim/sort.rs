// spatial hashing, bitonic sort schedule and cell offset table
//
// The device runs the same network: one dispatch per `SortStep`, each
// thread performing the compare-exchange `compare_exchange_pair` names,
// followed by a single boundary scan that fills the offset table.
use bytemuck::{Pod, Zeroable};
use glam::{IVec2, Vec2};
use thiserror::Error;

/// Offset-table value of a cell no particle hashes to.
pub const EMPTY_OFFSET: u32 = u32::MAX;

const HASH_K1: u32 = 15823;
const HASH_K2: u32 = 9737333;

#[derive(Error, Debug, PartialEq)]
pub enum SortError {
    #[error("{entries} entries exceed the allocated sort capacity of {capacity}")]
    CapacityExceeded { entries: u32, capacity: u32 },
}

/// One row of the spatial index: which particle, its cell hash, and the
/// table key (`hash % entry_count`) it is sorted by.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SpatialEntry {
    pub index: u32,
    pub hash: u32,
    pub key: u32,
}

/// Uniform payload of one sort dispatch.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SortStep {
    pub num_entries: u32,
    pub group_width: u32,
    pub group_height: u32,
    pub step_index: u32,
}

#[inline]
pub fn cell_of(position: Vec2, radius: f32) -> IVec2 {
    (position / radius).floor().as_ivec2()
}

#[inline]
pub fn hash_cell(cell: IVec2) -> u32 {
    let a = (cell.x as u32).wrapping_mul(HASH_K1);
    let b = (cell.y as u32).wrapping_mul(HASH_K2);
    a.wrapping_add(b)
}

#[inline]
pub fn key_from_hash(hash: u32, table_size: u32) -> u32 {
    hash % table_size
}

// ordering used by the network; equal keys fall back to particle index
#[inline]
fn sorts_after(a: &SpatialEntry, b: &SpatialEntry) -> bool {
    (a.key, a.index) > (b.key, b.index)
}

/// The full dispatch sequence for sorting `num_entries` entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BitonicSchedule {
    num_entries: u32,
    padded: u32,
}

impl BitonicSchedule {
    pub fn new(num_entries: u32, capacity: u32) -> Result<Self, SortError> {
        if num_entries > capacity {
            return Err(SortError::CapacityExceeded {
                entries: num_entries,
                capacity,
            });
        }
        Ok(Self {
            num_entries,
            padded: num_entries.max(1).next_power_of_two(),
        })
    }

    pub fn num_entries(&self) -> u32 {
        self.num_entries
    }

    /// Next power of two >= the entry count.
    pub fn padded_len(&self) -> u32 {
        self.padded
    }

    pub fn stage_count(&self) -> u32 {
        self.padded.trailing_zeros()
    }

    pub fn step_count(&self) -> u32 {
        let s = self.stage_count();
        s * (s + 1) / 2
    }

    /// Compare-exchange threads per step.
    pub fn threads_per_step(&self) -> u32 {
        self.padded / 2
    }

    pub fn steps(&self) -> impl Iterator<Item = SortStep> + '_ {
        (0..self.stage_count()).flat_map(move |stage| {
            (0..=stage).map(move |step| {
                let group_width = 1u32 << (stage - step);
                SortStep {
                    num_entries: self.num_entries,
                    group_width,
                    group_height: 2 * group_width - 1,
                    step_index: step,
                }
            })
        })
    }
}

/// Indices compared by `thread` during `step`, or `None` when the right
/// slot lies in the padding (treated as the maximum key, so never swapped).
#[inline]
pub fn compare_exchange_pair(step: &SortStep, thread: u32) -> Option<(usize, usize)> {
    let h = thread & (step.group_width - 1);
    let left = h + (step.group_height + 1) * (thread / step.group_width);
    let right_step = if step.step_index == 0 {
        step.group_height - 2 * h
    } else {
        (step.group_height + 1) / 2
    };
    let right = left + right_step;
    if right >= step.num_entries {
        return None;
    }
    Some((left as usize, right as usize))
}

/// Host execution of the sort network (what the device does, step by step).
pub fn sort_entries(entries: &mut [SpatialEntry]) {
    let Ok(schedule) = BitonicSchedule::new(entries.len() as u32, u32::MAX) else {
        return;
    };
    for step in schedule.steps() {
        for thread in 0..schedule.threads_per_step() {
            if let Some((l, r)) = compare_exchange_pair(&step, thread) {
                if sorts_after(&entries[l], &entries[r]) {
                    entries.swap(l, r);
                }
            }
        }
    }
}

/// Boundary scan: `offsets[key]` = first sorted position of `key`.
pub fn build_offsets(sorted: &[SpatialEntry], offsets: &mut [u32]) {
    offsets.fill(EMPTY_OFFSET);
    for (i, entry) in sorted.iter().enumerate() {
        let prev = if i == 0 { EMPTY_OFFSET } else { sorted[i - 1].key };
        if entry.key != prev {
            if let Some(slot) = offsets.get_mut(entry.key as usize) {
                *slot = i as u32;
            }
        }
    }
}
