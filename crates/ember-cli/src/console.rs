//! Console output: the interactive sink and result formatting

use ember_host::{BatchResult, ExecutionOutcome, ScriptResult};
use ember_logs::{LogRecord, LogSink};

/// Sink that prints coalesced record batches to the terminal, prefixed by
/// their source
pub struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn on_batch_ready(&mut self, records: Vec<LogRecord>) {
        for record in records {
            if record.is_error() {
                eprintln!("[{}] {}", record.source, record.message);
            } else {
                println!("[{}] {}", record.source, record.message);
            }
        }
    }
}

pub fn print_outcome(name: &str, outcome: &ExecutionOutcome) {
    println!("  {}: {}", name, outcome);
}

pub fn print_batch(batch: &BatchResult) {
    for result in &batch.results {
        print_script_result(result);
    }

    let metrics = batch.metrics();
    println!();
    println!("Batch metrics:");
    println!("  Total:   {}", metrics.total);
    println!("  Success: {}", metrics.succeeded);
    println!("  Failed:  {}", metrics.failed);
}

fn print_script_result(result: &ScriptResult) {
    println!(
        "  {}: {} ({}ms)",
        result.display_name(),
        result.outcome,
        result.duration.as_millis()
    );
}
