//! Queue files and forecasts.
//!
//! A queue file lists one entry per line in the bulk load format with
//! times, `target start end [hard] [plan=N]`; `-` leaves a time open and
//! `#` starts a comment.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use skyq_core::{Observatory, QueueConfig, QueuePolicy, SkyqConfig};
use skyq_queue::{ExecutorQueue, ForecastEntry, Station};

/// Read a queue file into bulk load parameters.
pub fn load_queue_file(path: &Path) -> anyhow::Result<String> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading queue file {}", path.display()))?;
    let params: Vec<&str> = content
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .collect();
    Ok(params.join(" "))
}

/// One executor queue per `[[queue]]` section, or a single default
/// queue named `plan` when none is configured.
pub fn build_queues(
    config: &SkyqConfig,
    observatory: Arc<dyn Observatory>,
    station: Arc<dyn Station>,
) -> Vec<ExecutorQueue> {
    if config.queues.is_empty() {
        let default = QueueConfig {
            name: "plan".to_string(),
            policy: QueuePolicy::default(),
        };
        return vec![ExecutorQueue::from_config(&default, observatory, station)];
    }
    config
        .queues
        .iter()
        .map(|q| {
            info!(queue = %q.name, policy = %q.policy, "queue configured");
            ExecutorQueue::from_config(q, observatory.clone(), station.clone())
        })
        .collect()
}

/// Forecast `queue` from `from` over `hours`, or the configured horizon.
pub fn forecast(
    queue: &ExecutorQueue,
    config: &SkyqConfig,
    from: f64,
    hours: Option<f64>,
) -> Vec<ForecastEntry> {
    let span = hours
        .map(|h| h * 3600.0)
        .unwrap_or(config.simulation.horizon_secs);
    let mut sim = queue.simulation(config.simulation.clone());
    let plan = sim.forecast(queue, from, from + span);
    info!(queue = %queue.name(), planned = plan.len(), dropped = sim.removed().len(), "forecast done");
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn queue_file_strips_comments() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# tonight").unwrap();
        writeln!(file, "1000 - -   # M31").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "1001 1700000000 1700003600 hard plan=4").unwrap();
        let params = load_queue_file(file.path()).unwrap();
        assert_eq!(params, "1000 - - 1001 1700000000 1700003600 hard plan=4");
    }

    #[test]
    fn missing_queue_file_is_an_error() {
        let err = load_queue_file(Path::new("/nonexistent/tonight.queue")).unwrap_err();
        assert!(err.to_string().contains("reading queue file"));
    }
}
