use crate::{BenchResult, compute_stats};
use quarry_perf_recorder::{ALL_STAGES, PerfRecorder, PerfStage};

/// Receiver-side stages, outermost last.
pub const RECEIVE_STAGES: [PerfStage; 5] = [
    PerfStage::ReceiveBatch,
    PerfStage::Validate,
    PerfStage::Store,
    PerfStage::ReplySend,
    PerfStage::HandleBatch,
];

pub const SEND_STAGES: [PerfStage; 2] = [PerfStage::Generate, PerfStage::SendBatch];

/// Every non-empty stage of `recorder` as a result row.
pub fn stage_results(prefix: &str, recorder: &PerfRecorder) -> Vec<BenchResult> {
    ALL_STAGES
        .iter()
        .filter_map(|&stage| {
            let mut samples = recorder.samples(stage).to_vec();
            compute_stats(&mut samples).map(|stats| BenchResult {
                name: format!("{prefix}/{}", stage.name()),
                unit: "ns".to_string(),
                stats,
            })
        })
        .collect()
}

fn p50_of(recorder: &PerfRecorder, stage: PerfStage) -> u64 {
    let mut v = recorder.samples(stage).to_vec();
    compute_stats(&mut v).map_or(0, |s| s.p50)
}

/// Per-stage table; `% tot` is relative to the p50 of `total_stage`.
pub fn print_stage_table(recorder: &PerfRecorder, stages: &[PerfStage], total_stage: PerfStage) {
    println!(
        "  {:<16} {:>8} {:>8} {:>8} {:>8} {:>10} {:>8}  {:>6}",
        "Stage", "p50", "p90", "p99", "p99.9", "max", "count", "% tot"
    );
    println!("  {}", "\u{2500}".repeat(88));

    let total_p50 = p50_of(recorder, total_stage);
    for &stage in stages {
        let mut v = recorder.samples(stage).to_vec();
        let Some(stats) = compute_stats(&mut v) else {
            continue;
        };
        let pct = if stage == total_stage {
            "100%".to_string()
        } else if total_p50 > 0 {
            format!("{:.0}%", stats.p50 as f64 / total_p50 as f64 * 100.0)
        } else {
            "-".to_string()
        };
        println!(
            "  {:<16} {:>8} {:>8} {:>8} {:>8} {:>10} {:>8}  {:>6}",
            stage.name(),
            stats.p50,
            stats.p90,
            stats.p99,
            stats.p999,
            stats.max,
            stats.count,
            pct
        );
    }
}

pub fn print_receive_report(receiver: &PerfRecorder, handler: &PerfRecorder) {
    println!("\n  Receive path per-stage timing (ns):\n");
    print_stage_table(receiver, &RECEIVE_STAGES[..1], PerfStage::ReceiveBatch);
    print_stage_table(handler, &RECEIVE_STAGES[1..], PerfStage::HandleBatch);
}

pub fn print_send_report(sender: &PerfRecorder) {
    println!("\n  Send path per-stage timing (ns):\n");
    print_stage_table(sender, &SEND_STAGES, PerfStage::SendBatch);
}

/// Which handler stage dominates a buffer pass, at p50.
pub fn handler_bottleneck(handler: &PerfRecorder) -> Option<(&'static str, f64)> {
    let total = p50_of(handler, PerfStage::HandleBatch);
    if total == 0 {
        return None;
    }
    [PerfStage::Validate, PerfStage::Store, PerfStage::ReplySend]
        .into_iter()
        .map(|s| (s.name(), p50_of(handler, s)))
        .max_by_key(|(_, v)| *v)
        .map(|(name, v)| (name, v as f64 / total as f64 * 100.0))
}
