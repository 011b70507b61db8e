use bevy_sph_fluid::sim::sort::{
    BitonicSchedule, EMPTY_OFFSET, SpatialEntry, build_offsets, compare_exchange_pair, sort_entries,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_entries(rng: &mut StdRng, n: u32) -> Vec<SpatialEntry> {
    (0..n)
        .map(|index| {
            let hash = rng.gen_range(0..u32::MAX);
            SpatialEntry {
                index,
                hash,
                key: hash % n,
            }
        })
        .collect()
}

#[test]
fn sorted_output_is_an_ordered_permutation() {
    let mut rng = StdRng::seed_from_u64(7);
    for n in [1, 2, 3, 17, 128, 1000, 4099] {
        let entries = random_entries(&mut rng, n);
        let mut sorted = entries.clone();
        sort_entries(&mut sorted);

        let mut expected = entries;
        expected.sort_by_key(|e| (e.key, e.index));
        assert_eq!(sorted, expected, "n = {n}");
    }
}

#[test]
fn offsets_point_at_the_first_entry_of_each_key() {
    let mut rng = StdRng::seed_from_u64(42);
    let n = 777;
    let mut entries = random_entries(&mut rng, n);
    sort_entries(&mut entries);
    let mut offsets = vec![0; n as usize];
    build_offsets(&entries, &mut offsets);

    for key in 0..n {
        let first = entries.iter().position(|e| e.key == key);
        match first {
            Some(i) => assert_eq!(offsets[key as usize], i as u32),
            None => assert_eq!(offsets[key as usize], EMPTY_OFFSET),
        }
    }
}

#[test]
fn every_pair_of_a_step_is_disjoint() {
    // one dispatch may not touch the same slot from two threads
    let schedule = BitonicSchedule::new(300, 300).unwrap();
    for step in schedule.steps() {
        let mut touched = vec![false; schedule.padded_len() as usize];
        for thread in 0..schedule.threads_per_step() {
            if let Some((l, r)) = compare_exchange_pair(&step, thread) {
                assert!(l < r);
                assert!(!touched[l] && !touched[r], "step {step:?} thread {thread}");
                touched[l] = true;
                touched[r] = true;
            }
        }
    }
}

#[test]
fn duplicate_keys_sort_by_particle_index() {
    let mut entries: Vec<SpatialEntry> = (0..64u32)
        .rev()
        .map(|index| SpatialEntry {
            index,
            hash: index % 3,
            key: index % 3,
        })
        .collect();
    sort_entries(&mut entries);
    for pair in entries.windows(2) {
        assert!((pair[0].key, pair[0].index) < (pair[1].key, pair[1].index));
    }
}
