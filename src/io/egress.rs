//! Event log egress - appends stable beacon events to a file
//!
//! Events are written in JSONL format (one `EventPayload` per line) to the
//! file specified in config.

use crate::domain::event::BeaconEvent;
use crate::io::event_channel::EventPayload;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

/// JSONL writer for beacon events
pub struct EventLog {
    file_path: String,
    site_id: String,
}

impl EventLog {
    pub fn new(file_path: &str, site_id: &str) -> Self {
        info!(file_path = %file_path, "event_log_initialized");
        Self { file_path: file_path.to_string(), site_id: site_id.to_string() }
    }

    /// Append one event; returns true if it was written
    pub fn write_event(&self, event: &BeaconEvent) -> bool {
        let payload = EventPayload::from_event(event, &self.site_id);
        let line = match serde_json::to_string(&payload) {
            Ok(line) => line,
            Err(e) => {
                error!(region = %payload.region, error = %e, "event_log_encode_failed");
                return false;
            }
        };

        match self.append_line(&line) {
            Ok(()) => true,
            Err(e) => {
                error!(
                    region = %payload.region,
                    kind = %payload.t,
                    error = %e,
                    "event_log_write_failed"
                );
                false
            }
        }
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        debug!(file = %self.file_path, bytes = %line.len(), "event_log_written");

        Ok(())
    }

    /// Drain `rx` into the file until shutdown or the router goes away
    pub async fn run(self, mut rx: mpsc::Receiver<BeaconEvent>, mut shutdown: watch::Receiver<bool>) {
        info!(file_path = %self.file_path, "event_log_started");
        let mut written = 0u64;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        while let Ok(event) = rx.try_recv() {
                            written += u64::from(self.write_event(&event));
                        }
                        break;
                    }
                }
                event = rx.recv() => {
                    match event {
                        Some(event) => written += u64::from(self.write_event(&event)),
                        None => break,
                    }
                }
            }
        }

        info!(file_path = %self.file_path, written = %written, "event_log_stopped");
    }
}
