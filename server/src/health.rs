use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::error;

/// Watchdog over the worker pool: every worker reports a heartbeat after
/// each processed event; a worker silent past the stall threshold is
/// reported as a data point for the operator, processing itself is left
/// to the queue's redelivery.
pub struct HealthMonitor {
    sender: mpsc::UnboundedSender<String>,
}

impl HealthMonitor {
    pub fn new(stall_after: Duration) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let mut map: HashMap<String, Instant> = HashMap::new();
            let mut interval = tokio::time::interval(Duration::from_secs(15));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        for (task_name, last_heartbeat) in &map {
                            if last_heartbeat.elapsed() > stall_after {
                                error!(task = %task_name, "no heartbeats past the stall threshold");
                            }
                        }
                    }
                    Some(task_name) = receiver.recv() => {
                        map.insert(task_name, Instant::now());
                    }
                }
            }
        });

        Self { sender }
    }

    pub fn im_alive(&self, task_name: &str) {
        let _ = self.sender.send(task_name.to_string());
    }
}
