/*!
 * Progress-tracking reader
 *
 * Wraps the byte stream feeding an upload or download. Every successful
 * read advances a shared running total and posts the new count to the
 * unit's Task through the UI dispatcher, so the copy loop never has to
 * interleave progress bookkeeping with I/O. The reader knows nothing about
 * resume decisions or persistence; it counts on from whatever offset its
 * `UnitCounter` was started at.
 */

use std::io::{self, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::dispatch::UiDispatcher;
use super::task::TaskHandle;
use super::unit::Direction;

/// Worker-side byte counts for the unit in flight
///
/// The Task is only current on the UI context; the worker reads these when it
/// records the unit's outcome.
#[derive(Debug, Default)]
pub struct UnitCounter {
    bytes: AtomicU64,
    total: AtomicU64,
}

impl UnitCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reset to a starting offset and expected size
    pub fn start(&self, offset: u64, total: u64) {
        self.bytes.store(offset, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
    }

    fn add(&self, n: u64) -> u64 {
        self.bytes.fetch_add(n, Ordering::SeqCst) + n
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::SeqCst)
    }

    /// Expected size, 0 while unknown
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }
}

/// Byte-counting decorator around any reader
pub struct ProgressReader<R> {
    inner: R,
    counter: Arc<UnitCounter>,
    task: TaskHandle,
    dispatcher: Arc<dyn UiDispatcher>,
    direction: Direction,
}

impl<R: Read> ProgressReader<R> {
    /// Count into `counter`, which already holds the start offset and total
    pub fn new(
        inner: R,
        counter: Arc<UnitCounter>,
        direction: Direction,
        task: TaskHandle,
        dispatcher: Arc<dyn UiDispatcher>,
    ) -> Self {
        Self {
            inner,
            counter,
            task,
            dispatcher,
            direction,
        }
    }

    fn publish(&self, position: u64) {
        let direction = self.direction;
        let total = self.counter.total();
        self.task.post(self.dispatcher.as_ref(), move |task| {
            task.set_bytes_transferred(position);
            task.set_status(format_status(direction, position, total));
        });
    }
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            let position = self.counter.add(n as u64);
            self.publish(position);
        }
        Ok(n)
    }
}

/// Status line shown while bytes flow: a percentage when the size is known
pub fn format_status(direction: Direction, bytes: u64, total: u64) -> String {
    if total > 0 {
        let pct = (bytes as f64 / total as f64) * 100.0;
        format!("{}... {:.1}%", direction, pct)
    } else {
        format!("{}... {} bytes", direction, bytes)
    }
}
