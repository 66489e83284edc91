use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing_subscriber::fmt::MakeWriter;

use crate::heartbeat::{HeartbeatTick, TickError, TickHandler};

/// In-memory log sink, for asserting on what the JSON subscriber wrote.
#[derive(Clone, Default)]
pub struct BufferWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl BufferWriter {
    pub fn contents(&self) -> String {
        let buf = self.buf.lock().expect("poisoned log buffer");
        String::from_utf8_lossy(&buf).into_owned()
    }

    pub fn json_lines(&self) -> Vec<Value> {
        self.contents()
            .lines()
            .map(|line| serde_json::from_str(line).expect("log line is not JSON"))
            .collect()
    }

    /// The `message` field of every line, in order.
    pub fn messages(&self) -> Vec<String> {
        self.json_lines()
            .iter()
            .filter_map(|line| line["fields"]["message"].as_str().map(str::to_owned))
            .collect()
    }

    pub fn count(&self, message: &str) -> usize {
        self.messages().iter().filter(|m| *m == message).count()
    }
}

impl io::Write for BufferWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf
            .lock()
            .expect("poisoned log buffer")
            .extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for BufferWriter {
    type Writer = BufferWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Tick handler that counts calls and can be told to fail or to take its time.
#[derive(Default)]
pub struct CountingHandler {
    calls: AtomicU64,
    in_flight: AtomicU64,
    max_in_flight: AtomicU64,
    work: Duration,
    fail: bool,
    panic: bool,
}

impl CountingHandler {
    pub fn slow(work: Duration) -> Self {
        Self {
            work,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Panics on every tick, like a handler with a bug in it.
    pub fn panicking() -> Self {
        Self {
            panic: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of overlapping `on_tick` calls observed.
    pub fn max_in_flight(&self) -> u64 {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TickHandler for CountingHandler {
    async fn on_tick(&self, _tick: &HeartbeatTick) -> Result<(), TickError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.work.is_zero() {
            tokio::time::sleep(self.work).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.panic {
            panic!("tick handler panicked");
        }
        if self.fail {
            Err(TickError::failed("injected failure"))
        } else {
            Ok(())
        }
    }
}
