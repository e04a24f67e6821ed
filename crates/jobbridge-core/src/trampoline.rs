//! The fixed native entry point for job events.
//!
//! The native library calls `job_event_trampoline` with whatever client-data
//! word it was given at registration. That word carries an
//! `AssociationToken` into the process-wide table.

use std::ffi::{c_int, c_void};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{debug, error};

use crate::association::{AssociationTable, AssociationToken, Dispatch};
use crate::config::config;
use crate::error::{Result, RuntimeFault};
use crate::native::EventProc;
use crate::runtime::{ClientData, JobEventHandler, ManagedRuntime};
use crate::types::{EventKind, JobHandle, RawHandle};

static TABLE: OnceCell<AssociationTable> = OnceCell::new();

pub fn global_table() -> &'static AssociationTable {
    TABLE.get_or_init(|| AssociationTable::new(config().clone()))
}

/// What to pass to the native start call for one registered handler.
#[derive(Debug, Clone, Copy)]
pub struct Registration {
    pub token: AssociationToken,
    pub callback: EventProc,
}

impl Registration {
    pub fn client_data(&self) -> *mut c_void {
        self.token.to_client_data()
    }
}

/// Registers `handler` in the global table.
///
/// Returns `None` without touching the table when there is no handler; the
/// operation then runs without a callback.
pub fn register_callback(
    runtime: Arc<dyn ManagedRuntime>,
    handler: Option<Arc<dyn JobEventHandler>>,
    client_data: Option<ClientData>,
) -> Result<Option<Registration>> {
    let Some(handler) = handler else {
        return Ok(None);
    };
    let token = global_table().register(runtime, handler, client_data)?;
    Ok(Some(Registration {
        token,
        callback: job_event_trampoline,
    }))
}

/// # Safety
///
/// Only the native library calls this, with a `client_data` word produced by
/// `Registration::client_data`. Any other word is treated as stale.
pub unsafe extern "C" fn job_event_trampoline(
    job: RawHandle,
    event_type: c_int,
    more_info: RawHandle,
    client_data: *mut c_void,
) {
    let job = JobHandle::from_raw(job);
    let event = EventKind::from_raw(event_type);
    let Some(token) = AssociationToken::from_client_data(client_data) else {
        error!(%job, %event, "job event without client data");
        return;
    };
    match global_table().dispatch(token, job, event, JobHandle::from_raw(more_info)) {
        Ok(Dispatch::Delivered { completed, .. }) => {
            debug!(%token, %job, %event, completed, "job event delivered");
        }
        Ok(Dispatch::Stale) => {}
        Err(fault) => trap(fault),
    }
}

// No caller on this stack can receive the fault.
fn trap(fault: RuntimeFault) -> ! {
    error!(%fault, "fatal runtime fault in job event callback");
    std::process::abort()
}
