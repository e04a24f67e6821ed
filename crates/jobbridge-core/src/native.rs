//! The contract a native job system exposes to the bridge.
//!
//! Implementations wrap a real library (see the vix crate) or simulate one.
//! Every call is synchronous from the caller's side; asynchronous progress is
//! reported only through the `EventProc` handed to `start_operation`.

use std::ffi::{c_char, c_int, c_void};
use std::fmt;

use crate::codes;
use crate::error::NativeError;
use crate::ops::Operation;
use crate::types::{JobHandle, PropertyId, PropertyType, RawHandle};

/// Upper bound on properties per batched fetch, fixed by the native call shape.
pub const MAX_PROPERTIES: usize = 6;

/// Native callback signature: `(job, event_type, more_event_info, client_data)`.
pub type EventProc =
    unsafe extern "C" fn(job: RawHandle, event_type: c_int, more_info: RawHandle, client_data: *mut c_void);

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawBlob {
    pub size: c_int,
    pub value: *mut c_char,
}

/// One output slot of a batched fetch, laid out as the native union.
#[repr(C)]
#[derive(Clone, Copy)]
pub union RawPropertyValue {
    pub int_value: c_int,
    pub string_value: *mut c_char,
    pub bool_value: c_char,
    pub handle_value: RawHandle,
    pub int64_value: i64,
    pub blob_value: RawBlob,
}

impl RawPropertyValue {
    pub fn zeroed() -> Self {
        // SAFETY: every field of the union is valid when all bits are zero.
        unsafe { std::mem::zeroed() }
    }
}

impl Default for RawPropertyValue {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl fmt::Debug for RawPropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RawPropertyValue { .. }")
    }
}

/// Which batched native call a fetch goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchTarget {
    /// Read properties of any handle.
    Properties(JobHandle),
    /// Block until the job completes, then read its result properties.
    Wait(JobHandle),
    /// Read the `index`-th result item of a multi-result job.
    NthItem { job: JobHandle, index: c_int },
}

impl FetchTarget {
    pub fn handle(self) -> JobHandle {
        match self {
            FetchTarget::Properties(h) | FetchTarget::Wait(h) => h,
            FetchTarget::NthItem { job, .. } => job,
        }
    }

    pub fn call_name(self) -> &'static str {
        match self {
            FetchTarget::Properties(_) => "get_properties",
            FetchTarget::Wait(_) => "job_wait",
            FetchTarget::NthItem { .. } => "job_get_nth_properties",
        }
    }
}

/// Arity of a batched native call: the number of (id, out-slot) pairs passed
/// before the terminating `PropertyId::NONE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallShape {
    Pairs0,
    Pairs1,
    Pairs2,
    Pairs3,
    Pairs4,
    Pairs5,
    Pairs6,
}

pub const CALL_SHAPES: [CallShape; MAX_PROPERTIES + 1] = [
    CallShape::Pairs0,
    CallShape::Pairs1,
    CallShape::Pairs2,
    CallShape::Pairs3,
    CallShape::Pairs4,
    CallShape::Pairs5,
    CallShape::Pairs6,
];

impl CallShape {
    pub fn for_count(count: usize) -> Option<CallShape> {
        CALL_SHAPES.get(count).copied()
    }

    pub fn arity(self) -> usize {
        match self {
            CallShape::Pairs0 => 0,
            CallShape::Pairs1 => 1,
            CallShape::Pairs2 => 2,
            CallShape::Pairs3 => 3,
            CallShape::Pairs4 => 4,
            CallShape::Pairs5 => 5,
            CallShape::Pairs6 => 6,
        }
    }
}

pub trait NativeJobApi: Send + Sync {
    /// Starts `op` and returns its job handle immediately.
    ///
    /// With a callback, the library calls it with `client_data` on a thread
    /// of its choosing until it reports job completion. Without one, the job
    /// can only be polled or waited on.
    fn start_operation(
        &self,
        op: &Operation,
        callback: Option<EventProc>,
        client_data: *mut c_void,
    ) -> JobHandle;

    fn get_property_type(
        &self,
        handle: JobHandle,
        id: PropertyId,
    ) -> Result<PropertyType, NativeError>;

    /// Runs the batched call selected by `target` with exactly
    /// `shape.arity()` pairs. `ids` and `out` both have that length.
    ///
    /// On success, string and blob slots point at buffers the caller must
    /// hand back through `free_buffer`. On failure nothing is allocated.
    fn batch_fetch(
        &self,
        target: FetchTarget,
        shape: CallShape,
        ids: &[PropertyId],
        out: &mut [RawPropertyValue],
    ) -> Result<(), NativeError>;

    /// Non-blocking completion poll.
    fn check_completion(&self, job: JobHandle) -> Result<bool, NativeError>;

    /// Number of result items carrying `id` on a completed job.
    fn get_num_properties(&self, job: JobHandle, id: PropertyId) -> Result<c_int, NativeError>;

    /// # Safety
    ///
    /// `buffer` must have been returned by this library through a fetch and
    /// must not have been freed already.
    unsafe fn free_buffer(&self, buffer: *mut c_void);

    fn release_handle(&self, handle: JobHandle);

    fn disconnect_host(&self, host: JobHandle);

    fn get_num_root_snapshots(&self, vm: JobHandle) -> Result<c_int, NativeError> {
        let _ = vm;
        Err(NativeError::new(codes::E_NOT_SUPPORTED))
    }

    /// A new handle to the `index`-th root snapshot; release it when done.
    fn get_root_snapshot(&self, vm: JobHandle, index: c_int) -> Result<JobHandle, NativeError> {
        let _ = (vm, index);
        Err(NativeError::new(codes::E_NOT_SUPPORTED))
    }

    fn get_current_snapshot(&self, vm: JobHandle) -> Result<JobHandle, NativeError> {
        let _ = vm;
        Err(NativeError::new(codes::E_NOT_SUPPORTED))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_shape_table_covers_zero_through_max() {
        for count in 0..=MAX_PROPERTIES {
            let shape = CallShape::for_count(count).expect("shape in range");
            assert_eq!(shape.arity(), count);
        }
        assert_eq!(CallShape::for_count(MAX_PROPERTIES + 1), None);
    }

    #[test]
    fn zeroed_slot_reads_as_zero() {
        let v = RawPropertyValue::zeroed();
        unsafe {
            assert_eq!(v.int64_value, 0);
            assert!(v.string_value.is_null());
        }
    }
}
