use shop_tunnel_summary_model::{MetricsSummary, ThresholdResult};
use tabled::settings::Style;
use tabled::{Table, Tabled};

#[derive(Tabled)]
struct OperationRow {
    operation_id: String,
    total: u64,
    failed: u64,
    #[tabled(display = "float2")]
    avg_time_ms: f64,
    #[tabled(display = "float2")]
    min_time_ms: f64,
    #[tabled(display = "float2")]
    med_time_ms: f64,
    #[tabled(display = "float2")]
    max_time_ms: f64,
    #[tabled(display = "float2")]
    p95_time_ms: f64,
}

#[derive(Tabled)]
struct CheckRow {
    check: String,
    passes: u64,
    fails: u64,
}

#[derive(Tabled)]
struct ThresholdRow {
    metric: String,
    threshold: String,
    #[tabled(display = "float4")]
    observed: f64,
    result: &'static str,
}

fn float2(n: &f64) -> String {
    format!("{:.2}", n)
}

fn float4(n: &f64) -> String {
    format!("{:.4}", n)
}

/// Print the end of run summary to stdout.
pub fn print_summary(metrics: &MetricsSummary, thresholds: &[ThresholdResult]) {
    println!("\nSummary of operations");
    let rows = metrics
        .operations
        .iter()
        .map(|op| OperationRow {
            operation_id: op.operation_id.clone(),
            total: op.total,
            failed: op.failed,
            avg_time_ms: op.duration.avg,
            min_time_ms: op.duration.min,
            med_time_ms: op.duration.med,
            max_time_ms: op.duration.max,
            p95_time_ms: op.duration.p95,
        })
        .collect::<Vec<_>>();
    let mut table = Table::new(rows);
    table.with(Style::modern());
    println!("{table}");

    if !metrics.check_results.is_empty() {
        println!("\nChecks");
        let rows = metrics
            .check_results
            .iter()
            .map(|c| CheckRow {
                check: c.name.clone(),
                passes: c.passes,
                fails: c.fails,
            })
            .collect::<Vec<_>>();
        let mut table = Table::new(rows);
        table.with(Style::modern());
        println!("{table}");
    }

    println!(
        "\nhttp_reqs: {} ({:.2}/s), http_req_failed: {:.4}%, checks: {:.4}%",
        metrics.http_reqs.count,
        metrics.http_reqs.rate,
        metrics.http_req_failed.rate * 100.0,
        metrics.checks.rate * 100.0,
    );
    println!(
        "iterations: {} ({:.2}/s), interrupted: {}, aborted: {}, failed: {}",
        metrics.iterations.count,
        metrics.iterations.rate,
        metrics.interrupted_iterations.count,
        metrics.aborted_iterations.count,
        metrics.failed_iterations.count,
    );
    println!(
        "vus_max: {}, peak_in_flight: {}",
        metrics.vus_max, metrics.peak_in_flight
    );
    if metrics.dropped_iterations.count > 0 {
        println!(
            "dropped_iterations: {} ({:.2}/s), the virtual user pool was exhausted so the runner could not keep up with the arrival rate",
            metrics.dropped_iterations.count, metrics.dropped_iterations.rate,
        );
    }

    if !thresholds.is_empty() {
        println!("\nThresholds");
        let rows = thresholds
            .iter()
            .map(|t| ThresholdRow {
                metric: t.metric.clone(),
                threshold: t.predicate.clone(),
                observed: t.observed,
                result: if t.passed { "PASS" } else { "FAIL" },
            })
            .collect::<Vec<_>>();
        let mut table = Table::new(rows);
        table.with(Style::modern());
        println!("{table}");
    }
}
