//! Background resolution passes and the published location table

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::channel::{mpsc, oneshot};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::locations::LocationTable;
use crate::process::ProcessMemory;
use crate::region::enumerate_regions;
use crate::resolver::resolve;
use crate::signature::Signature;

/// What a successful pass did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    /// Generation of the table this pass published
    pub generation: u64,
    /// Scannable regions in the snapshot
    pub regions: usize,
    /// Regions read before every signature was resolved
    pub regions_read: usize,
    pub resolved: usize,
    pub missing: usize,
    pub invalid: usize,
    pub elapsed: Duration,
}

/// Events a subscriber may hold before further events are dropped for it
pub const SUBSCRIBER_BUFFER: usize = 16;

/// Sent to every subscriber when a pass ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassCompleted {
    Published(PassSummary),
    Failed(String),
}

/// Owns a memory source and the addresses last resolved from it.
///
/// Only one pass runs at a time. A pass publishes its table in one step on
/// success and leaves the previous table alone on failure.
#[derive(Clone)]
pub struct SigFinder {
    inner: Arc<Inner>,
}

struct Inner {
    source: Arc<dyn ProcessMemory>,
    locations: RwLock<LocationTable>,
    busy: AtomicBool,
    generation: AtomicU64,
    subscribers: Mutex<Vec<mpsc::Sender<PassCompleted>>>,
}

/// Clears the busy flag however the pass thread exits
struct BusyGuard(Arc<Inner>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.busy.store(false, Ordering::Release);
    }
}

impl SigFinder {
    pub fn new<P: ProcessMemory + 'static>(source: P) -> Self {
        Self::with_source(Arc::new(source))
    }

    pub fn with_source(source: Arc<dyn ProcessMemory>) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                locations: Default::default(),
                busy: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                subscribers: Default::default(),
            }),
        }
    }

    /// Start a pass over `signatures` on a background thread.
    ///
    /// Fails with [`Error::PassInProgress`] while another pass is running.
    /// Dropping the returned handle does not stop the pass.
    pub fn load_offsets(&self, signatures: Vec<Signature>) -> Result<PassHandle> {
        if self
            .inner
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::PassInProgress);
        }
        let guard = BusyGuard(self.inner.clone());

        let (tx, rx) = oneshot::channel();
        let inner = self.inner.clone();
        std::thread::Builder::new()
            .name("sigfinder-pass".to_string())
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| inner.run_pass(&signatures)))
                    .unwrap_or_else(|_| {
                        error!("pass panicked, keeping previous locations");
                        Err(Error::PassAborted)
                    });
                drop(guard);
                inner.notify(&result);
                let _ = tx.send(result);
            })?;

        Ok(PassHandle { rx })
    }

    /// Copy of the last published table
    pub fn locations(&self) -> LocationTable {
        self.inner.locations.read().clone()
    }

    pub fn location(&self, key: &str) -> Option<u32> {
        self.inner.locations.read().get(key)
    }

    /// Number of tables published so far
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire)
    }

    /// Receive a [`PassCompleted`] event for every pass that ends from now on.
    ///
    /// Holds up to [`SUBSCRIBER_BUFFER`] undelivered events. A subscriber that
    /// stops draining misses later events until it catches up.
    pub fn subscribe(&self) -> mpsc::Receiver<PassCompleted> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.inner.subscribers.lock().push(tx);
        rx
    }
}

impl Inner {
    #[tracing::instrument(
        name = "pass",
        level = "info",
        skip_all,
        fields(signatures = signatures.len())
    )]
    fn run_pass(&self, signatures: &[Signature]) -> Result<PassSummary> {
        let start = Instant::now();

        let regions = enumerate_regions(self.source.as_ref());
        let resolution = match resolve(signatures, &regions, self.source.as_ref()) {
            Ok(resolution) => resolution,
            Err(e) => {
                warn!("pass failed, keeping previous locations: {e}");
                return Err(e);
            }
        };

        let table = resolution.locations;
        let resolved = table.found();
        let missing = table.len() - resolved;

        let generation = {
            let mut locations = self.locations.write();
            *locations = table;
            self.generation.fetch_add(1, Ordering::AcqRel) + 1
        };

        let summary = PassSummary {
            generation,
            regions: regions.len(),
            regions_read: resolution.regions_read,
            resolved,
            missing,
            invalid: resolution.invalid,
            elapsed: start.elapsed(),
        };
        info!(
            generation,
            resolved,
            missing,
            invalid = summary.invalid,
            "finished loading offsets in {:.2?}",
            summary.elapsed
        );
        Ok(summary)
    }

    fn notify(&self, result: &Result<PassSummary>) {
        let event = match result {
            Ok(summary) => PassCompleted::Published(*summary),
            Err(e) => PassCompleted::Failed(e.to_string()),
        };
        self.subscribers
            .lock()
            .retain_mut(|tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(e) if e.is_full() => {
                    warn!("subscriber is not draining pass events, dropping one");
                    true
                }
                Err(_) => false,
            });
    }
}

/// Completion of a pass started by [`SigFinder::load_offsets`]
#[must_use = "dropping the handle detaches the pass"]
pub struct PassHandle {
    rx: oneshot::Receiver<Result<PassSummary>>,
}

impl PassHandle {
    /// Block the current thread until the pass ends
    pub fn wait(self) -> Result<PassSummary> {
        futures::executor::block_on(self)
    }
}

impl Future for PassHandle {
    type Output = Result<PassSummary>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.rx
            .poll_unpin(cx)
            .map(|r| r.unwrap_or_else(|_| Err(Error::PassAborted)))
    }
}

#[cfg(test)]
mod test {
    use std::sync::mpsc as std_mpsc;

    use futures::executor::block_on;
    use futures::StreamExt;

    use super::*;
    use crate::process::MemoryImage;
    use crate::region::MemoryRegion;

    /// Blocks the first region read until released, fails reads on demand
    struct Gated {
        image: MemoryImage,
        gate: Mutex<Option<std_mpsc::Receiver<()>>>,
        fail: AtomicBool,
        panic: AtomicBool,
    }

    impl Gated {
        fn new(image: MemoryImage) -> Self {
            Self {
                image,
                gate: Mutex::new(None),
                fail: AtomicBool::new(false),
                panic: AtomicBool::new(false),
            }
        }
    }

    impl ProcessMemory for Gated {
        fn query_region(&self, address: u32) -> Result<Option<MemoryRegion>> {
            self.image.query_region(address)
        }

        fn read_bytes(&self, address: u32, size: u32) -> Result<Vec<u8>> {
            if let Some(gate) = self.gate.lock().as_ref() {
                let _ = gate.recv();
            }
            if self.panic.load(Ordering::SeqCst) {
                panic!("target went away");
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::MemoryRead {
                    address,
                    size,
                    code: 5,
                });
            }
            self.image.read_bytes(address, size)
        }
    }

    fn image() -> MemoryImage {
        MemoryImage::new()
            .with_data(0x1000, vec![0x00, 0xAA, 0x5E, 0xCC])
            .unwrap()
            .with_data(0x3000, vec![0x11, 0x22, 0x33])
            .unwrap()
    }

    fn signatures() -> Vec<Signature> {
        vec![
            Signature::new("Foo", "AA??CC", 0),
            Signature::new("Bar", "2233", 0),
            Signature::new("Nope", "DEAD", 0),
            Signature::new("Bad", "ZZ", 0),
        ]
    }

    #[test]
    fn test_pass_publishes() {
        let finder = SigFinder::new(image());
        assert_eq!(finder.generation(), 0);
        assert!(finder.locations().is_empty());

        let summary = finder.load_offsets(signatures()).unwrap().wait().unwrap();
        assert_eq!(summary.generation, 1);
        assert_eq!(summary.regions, 2);
        assert_eq!(summary.regions_read, 2);
        assert_eq!((summary.resolved, summary.missing, summary.invalid), (2, 1, 1));

        assert_eq!(finder.location("Foo"), Some(0x1001));
        assert_eq!(finder.location("Bar"), Some(0x3001));
        assert_eq!(finder.location("Nope"), Some(0));
        assert_eq!(finder.location("Bad"), None);
        assert_eq!(finder.generation(), 1);
        assert!(!finder.is_busy());
    }

    #[test]
    fn test_second_pass_rejected() {
        let (release, gate) = std_mpsc::channel();
        let source = Gated::new(image());
        *source.gate.lock() = Some(gate);
        let finder = SigFinder::new(source);

        let first = finder.load_offsets(signatures()).unwrap();
        assert!(finder.is_busy());
        assert!(matches!(
            finder.load_offsets(signatures()),
            Err(Error::PassInProgress)
        ));

        release.send(()).unwrap();
        drop(release);
        block_on(first).unwrap();

        // the guard is released before the result is delivered
        let second = finder.load_offsets(signatures()).unwrap();
        assert_eq!(block_on(second).unwrap().generation, 2);
    }

    #[test]
    fn test_failed_pass_keeps_table() {
        let source = Arc::new(Gated::new(image()));
        let finder = SigFinder::with_source(source.clone());
        finder.load_offsets(signatures()).unwrap().wait().unwrap();
        let before = finder.locations();

        source.fail.store(true, Ordering::SeqCst);
        let err = finder.load_offsets(signatures()).unwrap().wait().unwrap_err();
        assert!(matches!(err, Error::MemoryRead { address: 0x1000, code: 5, .. }));
        assert_eq!(finder.locations(), before);
        assert_eq!(finder.generation(), 1);
    }

    #[test]
    fn test_panicking_pass() {
        let source = Arc::new(Gated::new(image()));
        source.panic.store(true, Ordering::SeqCst);
        let finder = SigFinder::with_source(source.clone());
        let mut events = finder.subscribe();

        let err = finder.load_offsets(signatures()).unwrap().wait().unwrap_err();
        assert!(matches!(err, Error::PassAborted));
        assert!(!finder.is_busy());
        assert_eq!(finder.generation(), 0);
        assert_eq!(
            block_on(events.next()),
            Some(PassCompleted::Failed(Error::PassAborted.to_string()))
        );

        source.panic.store(false, Ordering::SeqCst);
        assert!(finder.load_offsets(signatures()).unwrap().wait().is_ok());
    }

    #[test]
    fn test_subscribe() {
        let source = Arc::new(Gated::new(image()));
        let finder = SigFinder::with_source(source.clone());
        let mut events = finder.subscribe();

        let summary = finder.load_offsets(signatures()).unwrap().wait().unwrap();
        assert_eq!(
            block_on(events.next()),
            Some(PassCompleted::Published(summary))
        );

        source.fail.store(true, Ordering::SeqCst);
        let _ = finder.load_offsets(signatures()).unwrap().wait();
        assert!(matches!(
            block_on(events.next()),
            Some(PassCompleted::Failed(message)) if message.contains("0x00001000")
        ));

        // closed receivers are dropped from the list
        drop(events);
        source.fail.store(false, Ordering::SeqCst);
        finder.load_offsets(signatures()).unwrap().wait().unwrap();
        assert!(finder.inner.subscribers.lock().is_empty());
    }

    #[test]
    fn test_slow_subscriber_is_bounded() {
        let finder = SigFinder::new(image());
        let mut events = finder.subscribe();

        for _ in 0..SUBSCRIBER_BUFFER + 8 {
            finder.load_offsets(signatures()).unwrap().wait().unwrap();
        }

        let mut held = 0;
        while let Ok(Some(_)) = events.try_next() {
            held += 1;
        }
        // one extra slot per sender
        assert!(held >= SUBSCRIBER_BUFFER && held <= SUBSCRIBER_BUFFER + 1);
        assert_eq!(finder.inner.subscribers.lock().len(), 1);

        // a drained subscriber receives events again
        let summary = finder.load_offsets(signatures()).unwrap().wait().unwrap();
        assert_eq!(
            block_on(events.next()),
            Some(PassCompleted::Published(summary))
        );
    }
}
