use std::cmp::min;
use std::fmt::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressState, ProgressStyle};
use shop_tunnel_core::prelude::ShutdownListener;
use shop_tunnel_instruments::Reporter;

/// Displays a progress bar while the scenario is running to show the user how long is left and
/// how many iterations have run so far.
pub(crate) fn start_progress(
    planned_runtime: Duration,
    reporter: Arc<Reporter>,
    shutdown_listener: ShutdownListener,
) -> anyhow::Result<()> {
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{wide_bar:.cyan/blue}] [{elapsed_precise} / {planned_runtime}] {msg}",
    )?
    .with_key("planned_runtime", {
        let hours = planned_runtime.as_secs() / 3600;
        let minutes = (planned_runtime.as_secs() % 3600) / 60;
        let seconds = planned_runtime.as_secs() % 60;
        move |_state: &ProgressState, w: &mut dyn Write| {
            let _ = write!(w, "{:02}:{:02}:{:02}", hours, minutes, seconds);
        }
    })
    .progress_chars("#>-");

    std::thread::Builder::new()
        .name("progress".to_string())
        .spawn(move || {
            let start_time = Instant::now();
            let pb = ProgressBar::new(planned_runtime.as_secs());
            pb.set_style(style);

            loop {
                if shutdown_listener.should_shutdown() {
                    log::trace!("Progress thread shutting down");
                    pb.finish_and_clear();
                    break;
                }

                let counters = reporter.live_counters();
                pb.set_message(format!(
                    "{} iterations, {} dropped, {} VUs",
                    counters.iterations, counters.dropped_iterations, counters.vus
                ));
                pb.set_position(min(
                    start_time.elapsed().as_secs(),
                    planned_runtime.as_secs(),
                ));

                std::thread::sleep(Duration::from_millis(500));
            }
        })?;

    Ok(())
}
