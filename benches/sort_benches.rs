use bevy_sph_fluid::cpu::reference;
use bevy_sph_fluid::gpu::ffi::FrameParams;
use bevy_sph_fluid::sim::particles::ParticleArrays;
use bevy_sph_fluid::sim::settings::GeneralSettings;
use bevy_sph_fluid::sim::sort::{SpatialEntry, build_offsets, sort_entries};
use criterion::{Criterion, criterion_group, criterion_main};

fn scrambled(n: u32) -> Vec<SpatialEntry> {
    (0..n)
        .map(|index| {
            let hash = index.wrapping_mul(2_654_435_761);
            SpatialEntry {
                index,
                hash,
                key: hash % n,
            }
        })
        .collect()
}

fn bench_sort(c: &mut Criterion) {
    let entries = scrambled(25_000);
    let mut offsets = vec![0; entries.len()];

    c.bench_function("bitonic_sort_25k", |b| {
        b.iter(|| {
            let mut sorted = entries.clone();
            sort_entries(&mut sorted);
            build_offsets(&sorted, &mut offsets);
        })
    });
}

fn bench_reference_step(c: &mut Criterion) {
    let n = 5_000;
    let mut settings = GeneralSettings::initial(n);
    settings.delta_time = 0.005;
    let params = FrameParams::new(settings, 16.0 / 9.0, 1.0, [0, 0]);
    let mut arrays = ParticleArrays::initial_block(n as usize);

    c.bench_function("reference_step_5k", |b| {
        b.iter(|| reference::step(&mut arrays, &params, &[]))
    });
}

criterion_group!(benches, bench_sort, bench_reference_step);
criterion_main!(benches);
