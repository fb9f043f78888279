//! Scope-aware memory manager (SAMM).
//!
//! A process-wide stack of scopes. Every tracked allocation joins the top
//! scope; `exit_scope` hands the popped scope's allocations to a
//! background worker for release. `retain_parent` moves a single tracked
//! allocation into the enclosing scope, extending its lifetime by one
//! frame — used when a method returns a string or class instance that
//! must outlive the method's own scope.
//!
//! This is the core's narrow view of the runtime collaborator described
//! in SPEC_FULL.md §4.B: the code generator only ever calls `enter_scope`,
//! `exit_scope`, `retain_parent`, and (at program start/end) `init` /
//! `shutdown`.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use thiserror::Error;

use crate::pool::SlabPool;

/// Object size tiers, mirroring the runtime's fixed-size descriptor
/// pools. `samm_size_to_class` below maps a byte size to one of these,
/// or to [`TrackedClass::Overflow`] when it exceeds the largest tier.
const OBJECT_SIZE_CLASSES: [usize; 6] = [32, 64, 128, 256, 512, 1024];

/// Which pool (if any) a tracked allocation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedClass {
    StringDescriptor,
    ListHeader,
    ListAtom,
    ObjectSizeClass(u8),
    /// Larger than the largest object size-class tier; allocated (and
    /// released) directly through the system allocator.
    Overflow,
}

/// Map a requested object size to a size-class tier, or `None` if it
/// must overflow to the system allocator. Mirrors
/// `samm_size_to_class`/`SAMM_SIZE_CLASS_NONE` in the runtime this was
/// grown from.
pub fn size_to_class(size: usize) -> Option<u8> {
    OBJECT_SIZE_CLASSES
        .iter()
        .position(|&tier| size <= tier)
        .map(|idx| idx as u8)
}

#[derive(Debug, Error)]
pub enum SammError {
    #[error("no scope to exit (root scope is never popped)")]
    NoActiveScope,
    #[error("pointer was not tracked in the current scope")]
    NotTracked,
}

struct TrackedAlloc {
    class: TrackedClass,
    ptr: NonNull<u8>,
    overflow_layout: Option<Layout>,
}

// Tracked pointers are only ever touched through `SammPools::release`,
// which runs on the background worker after being handed off by value.
unsafe impl Send for TrackedAlloc {}

struct SammPools {
    string_pool: SlabPool,
    list_header_pool: SlabPool,
    list_atom_pool: SlabPool,
    object_pools: [SlabPool; 6],
}

impl SammPools {
    fn new() -> Self {
        SammPools {
            string_pool: SlabPool::new(32, 256, "samm.string").expect("string pool init"),
            list_header_pool: SlabPool::new(16, 256, "samm.list_header").expect("list header pool init"),
            list_atom_pool: SlabPool::new(32, 256, "samm.list_atom").expect("list atom pool init"),
            object_pools: OBJECT_SIZE_CLASSES.map(|sz| {
                SlabPool::new(sz, 128, format!("samm.object.{sz}")).expect("object pool init")
            }),
        }
    }

    fn alloc(&self, class: TrackedClass) -> NonNull<u8> {
        match class {
            TrackedClass::StringDescriptor => self.string_pool.alloc(),
            TrackedClass::ListHeader => self.list_header_pool.alloc(),
            TrackedClass::ListAtom => self.list_atom_pool.alloc(),
            TrackedClass::ObjectSizeClass(tier) => self.object_pools[tier as usize].alloc(),
            TrackedClass::Overflow => unreachable!("overflow allocations bypass the pools"),
        }
    }

    fn release(&self, alloc: TrackedAlloc) {
        match alloc.class {
            TrackedClass::StringDescriptor => self.string_pool.free(alloc.ptr),
            TrackedClass::ListHeader => self.list_header_pool.free(alloc.ptr),
            TrackedClass::ListAtom => self.list_atom_pool.free(alloc.ptr),
            TrackedClass::ObjectSizeClass(tier) => self.object_pools[tier as usize].free(alloc.ptr),
            TrackedClass::Overflow => {
                let layout = alloc.overflow_layout.expect("overflow alloc carries its layout");
                unsafe { dealloc(alloc.ptr.as_ptr(), layout) };
            }
        }
    }
}

enum Job {
    Release(Vec<TrackedAlloc>),
    Stop,
}

fn spawn_worker(rx: crossbeam_channel::Receiver<Job>, pools: Arc<SammPools>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while let Ok(job) = rx.recv() {
            match job {
                Job::Release(allocs) => {
                    for alloc in allocs {
                        pools.release(alloc);
                    }
                }
                Job::Stop => break,
            }
        }
    })
}

pub struct Samm {
    pools: Arc<SammPools>,
    /// Scope stack; index 0 is the root scope and is never popped by
    /// `exit_scope` (only released at `shutdown`).
    scopes: Mutex<Vec<Vec<TrackedAlloc>>>,
    job_tx: Sender<Job>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Samm {
    pub fn init() -> Self {
        let pools = Arc::new(SammPools::new());
        let (tx, rx) = unbounded();
        let worker = spawn_worker(rx, pools.clone());
        Samm {
            pools,
            scopes: Mutex::new(vec![Vec::new()]),
            job_tx: tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn enter_scope(&self) {
        self.scopes.lock().push(Vec::new());
    }

    pub fn exit_scope(&self) -> Result<(), SammError> {
        let mut scopes = self.scopes.lock();
        if scopes.len() <= 1 {
            return Err(SammError::NoActiveScope);
        }
        let popped = scopes.pop().expect("checked len > 1 above");
        drop(scopes);
        let _ = self.job_tx.send(Job::Release(popped));
        Ok(())
    }

    pub fn alloc(&self, class: TrackedClass) -> NonNull<u8> {
        let ptr = self.pools.alloc(class);
        self.track(class, ptr, None);
        ptr
    }

    /// Allocate a byte size that overflows every fixed tier, via the
    /// system allocator. Still tracked by the current scope.
    pub fn alloc_overflow(&self, size: usize) -> NonNull<u8> {
        let layout = Layout::from_size_align(size, std::mem::align_of::<usize>())
            .expect("invalid overflow layout");
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).expect("system allocator returned null");
        self.track(TrackedClass::Overflow, ptr, Some(layout));
        ptr
    }

    /// Allocate `size` bytes, selecting a fixed tier or overflowing as
    /// needed. Returns the tracked pointer.
    pub fn alloc_object(&self, size: usize) -> NonNull<u8> {
        match size_to_class(size) {
            Some(tier) => self.alloc(TrackedClass::ObjectSizeClass(tier)),
            None => self.alloc_overflow(size),
        }
    }

    fn track(&self, class: TrackedClass, ptr: NonNull<u8>, overflow_layout: Option<Layout>) {
        let mut scopes = self.scopes.lock();
        let top = scopes.last_mut().expect("root scope always present");
        top.push(TrackedAlloc { class, ptr, overflow_layout });
    }

    /// Move a tracked pointer from the current scope to its parent,
    /// extending its lifetime by one frame. If there is no parent (the
    /// current scope is the root), the pointer becomes permanently
    /// retained — see SPEC_FULL.md §9 open question 1.
    pub fn retain_parent(&self, ptr: NonNull<u8>) -> Result<(), SammError> {
        let mut scopes = self.scopes.lock();
        let top_idx = scopes.len() - 1;
        let addr = ptr.as_ptr() as usize;
        let pos = scopes[top_idx]
            .iter()
            .position(|a| a.ptr.as_ptr() as usize == addr)
            .ok_or(SammError::NotTracked)?;
        let alloc = scopes[top_idx].remove(pos);
        let parent_idx = top_idx.saturating_sub(1);
        scopes[parent_idx].push(alloc);
        Ok(())
    }

    pub fn scope_depth(&self) -> usize {
        self.scopes.lock().len()
    }

    /// Drain every remaining scope (including the root), join the
    /// background worker, and print a leak summary.
    pub fn shutdown(&self) {
        let mut scopes = self.scopes.lock();
        let remaining: usize = scopes.iter().map(|s| s.len()).sum();
        let drained: Vec<TrackedAlloc> = scopes.drain(..).flatten().collect();
        drop(scopes);

        if remaining > 0 {
            eprintln!("fbc-slab: samm shutdown releasing {remaining} still-tracked allocation(s)");
        }
        let _ = self.job_tx.send(Job::Release(drained));
        let _ = self.job_tx.send(Job::Stop);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_to_class_picks_smallest_fitting_tier() {
        assert_eq!(size_to_class(1), Some(0));
        assert_eq!(size_to_class(32), Some(0));
        assert_eq!(size_to_class(33), Some(1));
        assert_eq!(size_to_class(1024), Some(5));
        assert_eq!(size_to_class(1025), None);
    }

    #[test]
    fn enter_exit_scope_balances() {
        let samm = Samm::init();
        assert_eq!(samm.scope_depth(), 1);
        samm.enter_scope();
        assert_eq!(samm.scope_depth(), 2);
        samm.exit_scope().unwrap();
        assert_eq!(samm.scope_depth(), 1);
        assert!(matches!(samm.exit_scope(), Err(SammError::NoActiveScope)));
        samm.shutdown();
    }

    #[test]
    fn retain_parent_survives_scope_exit() {
        let samm = Samm::init();
        samm.enter_scope();
        let ptr = samm.alloc(TrackedClass::StringDescriptor);
        samm.retain_parent(ptr).unwrap();
        // Now tracked by root; exiting the child scope must not release it.
        samm.exit_scope().unwrap();
        assert_eq!(samm.scope_depth(), 1);
        samm.shutdown();
    }

    #[test]
    fn retain_parent_with_no_parent_stays_in_root() {
        let samm = Samm::init();
        let ptr = samm.alloc(TrackedClass::ListHeader);
        // Already in root; retaining again should still succeed per the
        // "becomes permanently retained" decision.
        samm.retain_parent(ptr).unwrap();
        samm.shutdown();
    }

    #[test]
    fn object_alloc_overflow_roundtrips() {
        let samm = Samm::init();
        let ptr = samm.alloc_object(4096);
        samm.retain_parent(ptr).unwrap();
        samm.shutdown();
    }
}
