//! Result sinks: every observable event is recorded, one JSON object at a
//! time, either to a local file or to an HTTP collector.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("http error: {0}")]
    Http(String),
}

pub trait ResultWriter: Send {
    fn write_json(&mut self, record: &Value) -> Result<(), SinkError>;
    fn close(&mut self) -> Result<(), SinkError>;
}

/// Append one JSON object per line.
pub struct FileResultWriter {
    path: PathBuf,
    file: BufWriter<File>,
}

impl FileResultWriter {
    pub fn new(path: &Path) -> Result<Self, SinkError> {
        Ok(Self {
            path: path.to_owned(),
            file: BufWriter::new(File::create(path)?),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultWriter for FileResultWriter {
    fn write_json(&mut self, record: &Value) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.file, record)?;
        self.file.write_all(b"\n")?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.file.flush()?;
        Ok(())
    }
}

/// Discard everything (for probes and dry runs).
#[derive(Debug, Default)]
pub struct NullResultWriter;

impl ResultWriter for NullResultWriter {
    fn write_json(&mut self, _record: &Value) -> Result<(), SinkError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HttpSinkConfig {
    /// Back-pressure threshold: producers wait while the queue is fuller.
    pub high_water: usize,
    /// Polling interval for the worker and for back-pressure waits.
    pub poll_interval: Duration,
}

impl Default for HttpSinkConfig {
    fn default() -> Self {
        Self {
            high_water: 1000,
            poll_interval: Duration::from_millis(200),
        }
    }
}

#[derive(Default)]
struct SinkQueue {
    records: VecDeque<Value>,
}

struct Shared {
    queue: Mutex<SinkQueue>,
    wakeup: Condvar,
    closed: AtomicBool,
}

/// Batch queue drained to an HTTP endpoint by a background worker. Records
/// are wrapped as `{seqno, data}` with a monotonic sequence number; on
/// close, remaining entries are flushed before returning.
pub struct HttpResultWriter {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    config: HttpSinkConfig,
}

impl HttpResultWriter {
    pub fn new(url: &str, config: HttpSinkConfig) -> Result<Self, SinkError> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(SinkQueue::default()),
            wakeup: Condvar::new(),
            closed: AtomicBool::new(false),
        });
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| SinkError::Http(e.to_string()))?;
        let worker = std::thread::spawn({
            let shared = Arc::clone(&shared);
            let url = url.to_owned();
            let poll_interval = config.poll_interval;
            move || worker_loop(&shared, &client, &url, poll_interval)
        });
        Ok(Self {
            shared,
            worker: Some(worker),
            config,
        })
    }
}

fn pop_batch(shared: &Shared) -> Vec<Value> {
    let mut queue = match shared.queue.lock() {
        Ok(queue) => queue,
        Err(_) => return Vec::new(),
    };
    queue.records.drain(..).collect()
}

fn worker_loop(
    shared: &Shared,
    client: &reqwest::blocking::Client,
    url: &str,
    poll_interval: Duration,
) {
    let mut seqno: u64 = 0;
    loop {
        let batch = pop_batch(shared);
        if batch.is_empty() {
            if shared.closed.load(Ordering::SeqCst) {
                return;
            }
            if let Ok(queue) = shared.queue.lock() {
                let _ = shared.wakeup.wait_timeout(queue, poll_interval);
            }
            continue;
        }

        let payload: Vec<Value> = batch
            .iter()
            .map(|record| {
                let entry = serde_json::json!({ "seqno": seqno, "data": record });
                seqno += 1;
                entry
            })
            .collect();

        let sent = client
            .post(url)
            .json(&payload)
            .send()
            .map(|response| response.status().is_success())
            .unwrap_or(false);
        if !sent {
            if shared.closed.load(Ordering::SeqCst) {
                warn!(
                    dropped = payload.len(),
                    "result collector unreachable at close; dropping remaining records"
                );
                return;
            }
            warn!("result collector unreachable; requeueing batch");
            seqno -= payload.len() as u64;
            if let Ok(mut queue) = shared.queue.lock() {
                for record in batch.into_iter().rev() {
                    queue.records.push_front(record);
                }
            }
            std::thread::sleep(poll_interval);
        }
    }
}

impl ResultWriter for HttpResultWriter {
    fn write_json(&mut self, record: &Value) -> Result<(), SinkError> {
        loop {
            let len = self
                .shared
                .queue
                .lock()
                .map(|queue| queue.records.len())
                .unwrap_or(0);
            if len <= self.config.high_water {
                break;
            }
            warn!(queue_size = len, high_water = self.config.high_water, "result sink back-pressure");
            std::thread::sleep(self.config.poll_interval);
        }
        if let Ok(mut queue) = self.shared.queue.lock() {
            queue.records.push_back(record.clone());
        }
        self.shared.wakeup.notify_one();
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.wakeup.notify_one();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                return Err(SinkError::Http("sink worker panicked".into()));
            }
        }
        info!("result sink closed");
        Ok(())
    }
}

impl Drop for HttpResultWriter {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn file_writer_appends_one_json_object_per_line() {
        let dir = std::env::temp_dir().join("tandem_sink_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("events.jsonl");
        let mut writer = FileResultWriter::new(&path).unwrap();
        writer.write_json(&json!({ "eventType": "DEPARTED", "time": 1.0 })).unwrap();
        writer.write_json(&json!({ "eventType": "ARRIVED", "time": 2.0 })).unwrap();
        writer.close().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["eventType"], "DEPARTED");
        std::fs::remove_file(&path).ok();
    }
}
