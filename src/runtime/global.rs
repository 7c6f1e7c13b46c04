use crate::error::{Result, RuntimeError};
use crate::runtime::{Builder, Node};
use crate::utils::ScopeGuard;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread;

// Lifecycle of the process-wide slot. Readers spin through the two
// transitional states instead of blocking, keeping the fast path a single
// well-predicted atomic load.
const UNINIT: u8 = 0;
const INITIALIZING: u8 = 1;
const READY: u8 = 2;
const FINALIZING: u8 = 3;

static STATE: AtomicU8 = AtomicU8::new(UNINIT);
static SLOT: Mutex<Option<Arc<Node>>> = Mutex::new(None);

/// Domain and node identifiers used when the `auto-init` feature initializes
/// the runtime implicitly.
#[cfg(feature = "auto-init")]
const AUTOMATIC_DOMAIN_ID: u32 = 1;
#[cfg(feature = "auto-init")]
const AUTOMATIC_NODE_ID: u32 = 1;

impl Node {
    /// Performs exactly-once process-wide setup with default attributes.
    ///
    /// Fails with [`RuntimeError::AlreadyInitialized`] if the runtime is
    /// already initialized (or mid-initialization) without an intervening
    /// [`Node::finalize`].
    pub fn initialize(domain_id: u32, node_id: u32) -> Result<()> {
        Self::initialize_with(domain_id, node_id, Builder::new())
    }

    /// Fully parameterized variant of [`Node::initialize`].
    pub fn initialize_with(domain_id: u32, node_id: u32, builder: Builder) -> Result<()> {
        STATE
            .compare_exchange(UNINIT, INITIALIZING, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| RuntimeError::AlreadyInitialized)?;

        // If construction fails below, the slot must go back to UNINIT or
        // every later initialize would report AlreadyInitialized forever.
        let mut rollback = ScopeGuard::new(|| STATE.store(UNINIT, Ordering::Release));

        let node = builder.build(domain_id, node_id)?;
        *SLOT.lock() = Some(node);

        rollback.disarm();
        STATE.store(READY, Ordering::Release);
        Ok(())
    }

    /// Whether the process-wide runtime is currently initialized.
    pub fn is_initialized() -> bool {
        STATE.load(Ordering::Acquire) == READY
    }

    /// Returns the process-wide runtime.
    ///
    /// Requires a prior [`Node::initialize`] and fails with
    /// [`RuntimeError::NotInitialized`] otherwise. With the `auto-init`
    /// feature enabled, a first access lazily initializes the runtime with
    /// default attributes instead; such an instance lives until an explicit
    /// [`Node::finalize`] or process exit.
    ///
    /// Accesses racing an in-flight initialize or finalize spin-yield until
    /// the transition settles rather than blocking on a lock.
    pub fn instance() -> Result<Arc<Node>> {
        loop {
            match STATE.load(Ordering::Acquire) {
                READY => {
                    // Double-check under the slot lock; a finalize may have
                    // won the race since the load.
                    if let Some(node) = SLOT.lock().clone() {
                        return Ok(node);
                    }
                }
                INITIALIZING | FINALIZING => {
                    std::hint::spin_loop();
                    thread::yield_now();
                }
                _ => {
                    #[cfg(feature = "auto-init")]
                    match Self::initialize(AUTOMATIC_DOMAIN_ID, AUTOMATIC_NODE_ID) {
                        // Lost the race to another initializer: retry the load.
                        Ok(()) | Err(RuntimeError::AlreadyInitialized) => {}
                        Err(err) => return Err(err),
                    }

                    #[cfg(not(feature = "auto-init"))]
                    return Err(RuntimeError::NotInitialized);
                }
            }
        }
    }

    /// Tears the process-wide runtime down: waits for in-flight tasks to
    /// drain, destroys all owned queues and groups, stops the worker pool
    /// and empties the slot, after which [`Node::initialize`] may be called
    /// again.
    ///
    /// Fails with [`RuntimeError::NotInitialized`] when no instance exists.
    pub fn finalize() -> Result<()> {
        STATE
            .compare_exchange(READY, FINALIZING, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| RuntimeError::NotInitialized)?;

        let node = SLOT.lock().take();
        debug_assert!(node.is_some(), "initialized runtime slot was empty");
        if let Some(node) = node {
            node.shutdown();
        }

        STATE.store(UNINIT, Ordering::Release);
        Ok(())
    }
}
