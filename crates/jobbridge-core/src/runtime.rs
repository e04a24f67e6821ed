//! The managed runtime that hosts event handlers.
//!
//! Handler objects may only be touched from a thread attached to their
//! runtime. `RuntimeEnv` is the attachment scope: it attaches on creation and
//! detaches on exit, but only if it was the one that attached.

use std::any::Any;
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::error::{HandlerFault, RuntimeFault};
use crate::types::{EventKind, JobHandle};

/// Opaque user object handed back to the handler unchanged.
pub type ClientData = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    AlreadyAttached,
    Attached,
}

pub trait ManagedRuntime: Send + Sync {
    fn attach_current_thread(&self) -> Result<AttachOutcome, RuntimeFault>;

    fn detach_current_thread(&self) -> Result<(), RuntimeFault>;

    /// Receives a handler failure after it has been caught at the boundary.
    fn report_handler_fault(&self, fault: &HandlerFault) {
        warn!(%fault, "event handler failed");
    }
}

pub struct RuntimeEnv<'r> {
    runtime: &'r dyn ManagedRuntime,
    attached_here: bool,
}

impl<'r> RuntimeEnv<'r> {
    pub fn attach(runtime: &'r dyn ManagedRuntime) -> Result<Self, RuntimeFault> {
        let outcome = runtime.attach_current_thread()?;
        Ok(Self {
            runtime,
            attached_here: outcome == AttachOutcome::Attached,
        })
    }

    pub fn runtime(&self) -> &'r dyn ManagedRuntime {
        self.runtime
    }

    pub fn attached_here(&self) -> bool {
        self.attached_here
    }

    /// Ends the scope and surfaces a detach failure instead of logging it.
    pub fn detach(mut self) -> Result<(), RuntimeFault> {
        let attached_here = std::mem::replace(&mut self.attached_here, false);
        if attached_here {
            self.runtime.detach_current_thread()?;
        }
        Ok(())
    }
}

impl Drop for RuntimeEnv<'_> {
    fn drop(&mut self) {
        if self.attached_here {
            if let Err(fault) = self.runtime.detach_current_thread() {
                tracing::error!(%fault, "detach on scope exit failed");
            }
        }
    }
}

/// The single callback method of a managed event handler.
pub trait JobEventHandler: Send + Sync {
    fn callback(
        &self,
        env: &RuntimeEnv<'_>,
        job: JobHandle,
        event: EventKind,
        more_info: JobHandle,
        client_data: Option<&ClientData>,
    ) -> Result<(), HandlerFault>;
}

impl<F> JobEventHandler for F
where
    F: Fn(&RuntimeEnv<'_>, JobHandle, EventKind, JobHandle, Option<&ClientData>) -> Result<(), HandlerFault>
        + Send
        + Sync,
{
    fn callback(
        &self,
        env: &RuntimeEnv<'_>,
        job: JobHandle,
        event: EventKind,
        more_info: JobHandle,
        client_data: Option<&ClientData>,
    ) -> Result<(), HandlerFault> {
        self(env, job, event, more_info, client_data)
    }
}

/// Wraps a closure as a shareable handler.
pub fn handler_fn<F>(f: F) -> Arc<dyn JobEventHandler>
where
    F: Fn(&RuntimeEnv<'_>, JobHandle, EventKind, JobHandle, Option<&ClientData>) -> Result<(), HandlerFault>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static ATTACHED: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// In-process runtime: attachment is per-thread bookkeeping.
pub struct LocalRuntime {
    id: u64,
    attaches: AtomicU64,
    detaches: AtomicU64,
    faults: Mutex<Vec<HandlerFault>>,
}

impl LocalRuntime {
    pub fn new() -> Self {
        Self {
            id: NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed),
            attaches: AtomicU64::new(0),
            detaches: AtomicU64::new(0),
            faults: Mutex::new(Vec::new()),
        }
    }

    pub fn is_current_thread_attached(&self) -> bool {
        ATTACHED.with(|a| a.borrow().contains(&self.id))
    }

    pub fn attach_count(&self) -> u64 {
        self.attaches.load(Ordering::SeqCst)
    }

    pub fn detach_count(&self) -> u64 {
        self.detaches.load(Ordering::SeqCst)
    }

    pub fn recorded_faults(&self) -> Vec<HandlerFault> {
        self.faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for LocalRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ManagedRuntime for LocalRuntime {
    fn attach_current_thread(&self) -> Result<AttachOutcome, RuntimeFault> {
        let newly = ATTACHED.with(|a| {
            let mut a = a.borrow_mut();
            if a.contains(&self.id) {
                false
            } else {
                a.push(self.id);
                true
            }
        });
        if !newly {
            return Ok(AttachOutcome::AlreadyAttached);
        }
        self.attaches.fetch_add(1, Ordering::SeqCst);
        Ok(AttachOutcome::Attached)
    }

    fn detach_current_thread(&self) -> Result<(), RuntimeFault> {
        let removed = ATTACHED.with(|a| {
            let mut a = a.borrow_mut();
            match a.iter().position(|id| *id == self.id) {
                Some(pos) => {
                    a.swap_remove(pos);
                    true
                }
                None => false,
            }
        });
        if !removed {
            return Err(RuntimeFault::Detach {
                reason: "thread is not attached".to_string(),
            });
        }
        self.detaches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn report_handler_fault(&self, fault: &HandlerFault) {
        warn!(%fault, "event handler failed");
        self.faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(fault.clone());
    }
}
