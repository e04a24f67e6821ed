use std::ffi::{c_int, c_void};
use std::sync::Arc;

use jobbridge_core::codes;
use jobbridge_core::marshal;
use jobbridge_core::native::{FetchTarget, NativeJobApi};
use jobbridge_core::ops::Operation;
use jobbridge_core::{
    global_table, register_callback, AssociationStats, AssociationToken, BridgeError, ClientData,
    JobEventHandler, JobHandle, LocalRuntime, ManagedRuntime, PropertyId, PropertyValue, Result,
    RuntimeEnv,
};
use tracing::{debug, warn};

/// Caller-facing entry point: start operations, poll or wait on them and
/// read typed results.
pub struct JobBridge<A: NativeJobApi> {
    api: Arc<A>,
    runtime: Arc<dyn ManagedRuntime>,
}

impl<A: NativeJobApi> JobBridge<A> {
    pub fn new(api: A, runtime: Arc<dyn ManagedRuntime>) -> Self {
        Self {
            api: Arc::new(api),
            runtime,
        }
    }

    pub fn with_local_runtime(api: A) -> Self {
        Self::new(api, Arc::new(LocalRuntime::new()))
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// An owned handle on the native API, for handlers that read event
    /// properties from the callback thread.
    pub fn shared_api(&self) -> Arc<A> {
        Arc::clone(&self.api)
    }

    pub fn runtime(&self) -> &Arc<dyn ManagedRuntime> {
        &self.runtime
    }

    pub fn invoke(
        &self,
        op: &Operation,
        handler: Option<Arc<dyn JobEventHandler>>,
        client_data: Option<ClientData>,
    ) -> Result<JobHandle> {
        self.invoke_with_registration(op, handler, client_data)
            .map(|(job, _)| job)
    }

    /// Like `invoke`, also returning the association token when a handler
    /// was registered, for use with `cancel_association`.
    pub fn invoke_with_registration(
        &self,
        op: &Operation,
        handler: Option<Arc<dyn JobEventHandler>>,
        client_data: Option<ClientData>,
    ) -> Result<(JobHandle, Option<AssociationToken>)> {
        let registration = register_callback(Arc::clone(&self.runtime), handler, client_data)?;
        let (callback, data) = match &registration {
            Some(reg) => (Some(reg.callback), reg.client_data()),
            None => (None, std::ptr::null_mut::<c_void>()),
        };
        debug!(op = op.name(), callback = callback.is_some(), "invoke begin");

        let job = self.api.start_operation(op, callback, data);
        if !job.is_valid() {
            // No job, so no completion event will ever arrive.
            if let Some(reg) = registration {
                if let Err(e) = global_table().cancel(reg.token) {
                    warn!(token = %reg.token, %e, "cancel after failed start");
                }
            }
            debug!(op = op.name(), "invoke failed: no job handle");
            return Err(BridgeError::native(codes::E_INVALID_HANDLE));
        }
        debug!(op = op.name(), %job, "invoke end");
        Ok((job, registration.map(|r| r.token)))
    }

    pub fn fetch_properties(
        &self,
        handle: JobHandle,
        ids: &[PropertyId],
    ) -> Result<Vec<PropertyValue>> {
        marshal::fetch_properties(&*self.api, FetchTarget::Properties(handle), ids)
    }

    /// Non-blocking; safe to call while the job's callback is firing.
    pub fn check_completion(&self, job: JobHandle) -> Result<bool> {
        debug!(%job, "check completion");
        Ok(self.api.check_completion(job)?)
    }

    /// Blocks until `job` completes, then reads its result properties.
    ///
    /// A job that completed with an error yields that error.
    pub fn wait_for_completion(
        &self,
        job: JobHandle,
        ids: &[PropertyId],
    ) -> Result<Vec<PropertyValue>> {
        marshal::fetch_properties(&*self.api, FetchTarget::Wait(job), ids)
    }

    pub fn get_nth_properties(
        &self,
        job: JobHandle,
        index: usize,
        ids: &[PropertyId],
    ) -> Result<Vec<PropertyValue>> {
        let index = c_int::try_from(index).map_err(|_| BridgeError::native(codes::E_INVALID_ARG))?;
        marshal::fetch_properties(&*self.api, FetchTarget::NthItem { job, index }, ids)
    }

    pub fn get_num_properties(&self, job: JobHandle, id: PropertyId) -> Result<usize> {
        let n = self.api.get_num_properties(job, id)?;
        debug!(%job, %id, n, "result item count");
        Ok(usize::try_from(n).unwrap_or(0))
    }

    pub fn release_handle(&self, handle: JobHandle) {
        if handle.is_valid() {
            debug!(%handle, "release handle");
            self.api.release_handle(handle);
        }
    }

    /// Tears down an association whose job will never complete.
    pub fn cancel_association(&self, token: AssociationToken) -> Result<()> {
        global_table().cancel(token)
    }

    pub fn association_stats(&self) -> AssociationStats {
        global_table().stats()
    }

    /// Runs `f` on the calling thread attached to the runtime. The thread is
    /// detached afterwards only if this call attached it.
    pub fn with_attached<T>(&self, f: impl FnOnce(&RuntimeEnv<'_>) -> T) -> Result<T> {
        let env = RuntimeEnv::attach(self.runtime.as_ref())?;
        let value = f(&env);
        env.detach()?;
        Ok(value)
    }

    /// Runs `op` without a callback, waits for it and reads `ids`. The job
    /// handle is released on every path.
    pub fn run(&self, op: &Operation, ids: &[PropertyId]) -> Result<Vec<PropertyValue>> {
        let job = JobGuard::new(self, self.invoke(op, None, None)?);
        self.wait_for_completion(job.handle(), ids)
    }

    /// Runs `op`, waits for it, and reads `ids` from each of its result
    /// items. Items are counted by `ids[0]`.
    pub fn run_items(
        &self,
        op: &Operation,
        ids: &[PropertyId],
    ) -> Result<Vec<Vec<PropertyValue>>> {
        let job = JobGuard::new(self, self.invoke(op, None, None)?);
        self.wait_for_completion(job.handle(), &[])?;
        let Some(&counted) = ids.first() else {
            return Ok(Vec::new());
        };
        let n = self.get_num_properties(job.handle(), counted)?;
        (0..n)
            .map(|i| self.get_nth_properties(job.handle(), i, ids))
            .collect()
    }
}

/// Releases a job handle on drop.
pub struct JobGuard<'b, A: NativeJobApi> {
    bridge: &'b JobBridge<A>,
    job: JobHandle,
}

impl<'b, A: NativeJobApi> JobGuard<'b, A> {
    pub fn new(bridge: &'b JobBridge<A>, job: JobHandle) -> Self {
        Self { bridge, job }
    }

    pub fn handle(&self) -> JobHandle {
        self.job
    }
}

impl<A: NativeJobApi> Drop for JobGuard<'_, A> {
    fn drop(&mut self) {
        self.bridge.release_handle(self.job);
    }
}

/// Typed accessors over a fetched result row.
pub(crate) fn value_at(values: &[PropertyValue], i: usize) -> Result<&PropertyValue> {
    values
        .get(i)
        .ok_or(BridgeError::native(codes::E_MISSING_REQUIRED_PROPERTY))
}

fn mismatch() -> BridgeError {
    BridgeError::native(codes::E_PROPERTY_TYPE_MISMATCH)
}

pub(crate) fn int_at(values: &[PropertyValue], i: usize) -> Result<i32> {
    value_at(values, i)?.as_i32().ok_or_else(mismatch)
}

pub(crate) fn i64_at(values: &[PropertyValue], i: usize) -> Result<i64> {
    value_at(values, i)?.as_i64().ok_or_else(mismatch)
}

pub(crate) fn bool_at(values: &[PropertyValue], i: usize) -> Result<bool> {
    value_at(values, i)?.as_bool().ok_or_else(mismatch)
}

pub(crate) fn string_at(values: &[PropertyValue], i: usize) -> Result<String> {
    value_at(values, i)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(mismatch)
}

pub(crate) fn handle_at(values: &[PropertyValue], i: usize) -> Result<JobHandle> {
    value_at(values, i)?.as_handle().ok_or_else(mismatch)
}
