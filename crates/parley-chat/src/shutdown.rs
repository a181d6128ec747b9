//! Cooperative shutdown flag shared by an endpoint's workers.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// One-way flag polled by the reader and writer loops.
///
/// Not preemptive: a worker notices the flag at its next loop iteration or
/// retry, which the socket read timeout bounds.
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    /// Create an untriggered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every holder to stop.
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// True once any holder triggered the flag.
    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
