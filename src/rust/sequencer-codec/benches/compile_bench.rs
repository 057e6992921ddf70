// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use sequencer_codec::bits::track_bits;
use sequencer_codec::{Phase, compile, decompile};
use std::hint::black_box;

/// Two integration pulses separated by a flattop, as on the SwitchIn line.
fn integration_phases(cycle_length: u32) -> Vec<Phase> {
    let total = cycle_length * 7;
    let integration = 100.min(total / 4);
    let flattop = 20;
    let last = 21;
    vec![
        Phase::low(total - 2 * integration - flattop - last),
        Phase::high(integration),
        Phase::low(flattop),
        Phase::high(integration),
        Phase::low(last),
    ]
}

fn bench_compile(c: &mut Criterion) {
    let cycle_lengths = [35, 100, 1000];

    let mut group = c.benchmark_group("compile");

    for &cycle_length in &cycle_lengths {
        let phases = integration_phases(cycle_length);
        group.bench_with_input(
            BenchmarkId::new("integration", cycle_length),
            &cycle_length,
            |b, &cycle_length| {
                b.iter(|| black_box(compile(black_box(&phases), cycle_length)));
            },
        );
    }

    group.finish();
}

fn bench_decompile(c: &mut Criterion) {
    let mut group = c.benchmark_group("decompile");

    for &cycle_length in &[35, 100, 1000] {
        let Ok(slots) = compile(&integration_phases(cycle_length), cycle_length) else {
            continue;
        };
        group.bench_with_input(
            BenchmarkId::new("integration", cycle_length),
            &slots,
            |b, slots| {
                b.iter(|| black_box(decompile(black_box(slots))));
            },
        );
        group.bench_with_input(BenchmarkId::new("bits", cycle_length), &slots, |b, slots| {
            b.iter(|| black_box(track_bits(black_box(slots))));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_compile, bench_decompile);
criterion_main!(benches);
