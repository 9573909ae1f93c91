use auris_core::TurnLedger;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_ledger(c: &mut Criterion) {
    c.bench_function("record_full_turn_lifecycle", |b| {
        b.iter(|| {
            let mut ledger = TurnLedger::new();
            for i in 0..black_box(100) {
                let turn_id = format!("turn-{}", i);
                ledger.record_speech_stopped(&turn_id, 1000);
                ledger.record_first_audio_delta(&turn_id, 1100, Some(i as u64));
                ledger.record_play_started(i as u64, 1250);
            }
        });
    });

    c.bench_function("record_first_audio_delta_repeat_no_op", |b| {
        let mut ledger = TurnLedger::new();
        ledger.record_speech_stopped("turn-1", 1000);
        ledger.record_first_audio_delta("turn-1", 1100, Some(1));
        b.iter(|| {
            black_box(ledger.record_first_audio_delta("turn-1", 1200, Some(2)));
        });
    });
}

criterion_group!(benches, bench_ledger);
criterion_main!(benches);
