use std::sync::Arc;
use std::time::Duration;

use shop_tunnel_core::prelude::ShutdownListener;
use shop_tunnel_instruments::Reporter;
use sysinfo::System;

const CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Monitor the load generator itself and report anything that might make the results misleading.
///
/// Note that this won't stop the run, it just logs warnings so the user knows that their results
/// might be affected.
///
/// Global CPU usage is sampled every second and a warning is
/// logged if it is above 90%. Iterations dropped because the pool was exhausted are reported once
/// for every interval in which new drops happened.
pub(crate) fn start_monitor(
    reporter: Arc<Reporter>,
    shutdown_listener: ShutdownListener,
) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("monitor".to_string())
        .spawn(move || {
            let mut sys = System::new();
            sys.refresh_cpu_all();
            let cpu_count = sys.cpus().len();

            let mut last_dropped = 0;
            loop {
                if shutdown_listener.should_shutdown() {
                    break;
                }

                std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL.max(CHECK_INTERVAL));

                sys.refresh_cpu_all();
                let usage = sys.global_cpu_usage();
                if usage > 90.0 {
                    log::warn!(
                        "High CPU usage detected. The host is at {:.2}% across {} cores, latency figures may be inflated",
                        usage,
                        cpu_count
                    );
                }

                let dropped = reporter.dropped_iterations();
                if dropped > last_dropped {
                    log::warn!(
                        "{} iterations dropped in the last interval, {} in total. Raise max VUs to keep up with the arrival rate",
                        dropped - last_dropped,
                        dropped
                    );
                    last_dropped = dropped;
                }
            }
        })?;

    Ok(())
}
