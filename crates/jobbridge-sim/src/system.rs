//! An in-process job system with the same threading contract as a real
//! native library: operations return a handle at once, and each job runs on
//! a thread the system owns, calling back from there.

use std::collections::{BTreeMap, HashMap};
use std::ffi::{c_char, c_int, c_void};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use jobbridge_core::codes;
use jobbridge_core::native::{CallShape, EventProc, FetchTarget, NativeJobApi, RawPropertyValue};
use jobbridge_core::ops::Operation;
use jobbridge_core::{
    EventKind, JobHandle, NativeError, PropertyId, PropertyType, PropertyValue, RawHandle,
};
use tracing::{debug, warn};

use crate::config::SimConfig;
use crate::guest::{Outcome, VmModel};
use crate::ledger::{BufferLedger, LedgerStats};
use crate::script::{JobScript, ScriptProperty, ScriptedOutcome};

pub(crate) type Props = BTreeMap<PropertyId, PropertyValue>;

pub(crate) struct JobState {
    completed: bool,
    error: u16,
    items: Vec<Props>,
    item_handles: Vec<RawHandle>,
}

pub(crate) enum ObjectKind {
    Job(JobState),
    Host,
    Vm { path: String },
    Snapshot { path: String, id: u32 },
    Item,
}

pub(crate) struct Object {
    pub(crate) kind: ObjectKind,
    pub(crate) props: Props,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    pub jobs_started: u64,
    pub type_queries: u64,
    pub batch_fetches: u64,
    pub live_handles: usize,
    pub releases: u64,
    pub bad_releases: u64,
    pub disconnects: u64,
    pub buffers: LedgerStats,
}

pub(crate) struct State {
    pub(crate) objects: HashMap<RawHandle, Object>,
    pub(crate) vms: BTreeMap<String, VmModel>,
    next_handle: RawHandle,
    script: JobScript,
    ledger: BufferLedger,
    stats: SimStats,
}

impl State {
    /// Handles are never reused within one system.
    pub(crate) fn alloc(&mut self, object: Object) -> JobHandle {
        let raw = self.next_handle;
        self.next_handle += 1;
        self.objects.insert(raw, object);
        JobHandle::from_raw(raw)
    }

    fn job(&self, job: JobHandle) -> Result<&JobState, NativeError> {
        match self.objects.get(&job.raw()).map(|o| &o.kind) {
            Some(ObjectKind::Job(state)) => Ok(state),
            Some(_) => Err(NativeError::new(codes::E_NOT_SUPPORTED_ON_HANDLE_TYPE)),
            None => Err(NativeError::new(codes::E_INVALID_HANDLE)),
        }
    }

    fn read_props(&self, handle: JobHandle) -> Result<Props, NativeError> {
        let object = self
            .objects
            .get(&handle.raw())
            .ok_or(NativeError::new(codes::E_INVALID_HANDLE))?;
        match &object.kind {
            ObjectKind::Vm { path } => self
                .vms
                .get(path)
                .map(|vm| vm.properties(path))
                .ok_or(NativeError::new(codes::E_VM_NOT_FOUND)),
            ObjectKind::Snapshot { path, id } => self
                .vms
                .get(path)
                .and_then(|vm| vm.snapshot_properties(*id))
                .ok_or(NativeError::new(codes::E_SNAPSHOT_NOTFOUND)),
            _ => Ok(object.props.clone()),
        }
    }

    fn vm_for(&self, vm: JobHandle) -> Result<(&String, &VmModel), NativeError> {
        match self.objects.get(&vm.raw()).map(|o| &o.kind) {
            Some(ObjectKind::Vm { path }) => self
                .vms
                .get_key_value(path)
                .ok_or(NativeError::new(codes::E_VM_NOT_FOUND)),
            Some(_) => Err(NativeError::new(codes::E_NOT_SUPPORTED_ON_HANDLE_TYPE)),
            None => Err(NativeError::new(codes::E_INVALID_HANDLE)),
        }
    }

    fn snapshot_handle(&mut self, path: String, id: u32) -> JobHandle {
        self.alloc(Object {
            kind: ObjectKind::Snapshot { path, id },
            props: Props::new(),
        })
    }
}

/// Type of a job result property that the job did not produce, as the
/// native library declares it.
fn declared_type(id: PropertyId) -> Option<PropertyType> {
    let kind = match id {
        PropertyId::JOB_RESULT_ERROR_CODE
        | PropertyId::JOB_RESULT_PROCESS_ID => PropertyType::Int64,
        PropertyId::JOB_RESULT_EXIT_CODE
        | PropertyId::JOB_RESULT_GUEST_PROGRAM_ELAPSED_TIME
        | PropertyId::JOB_RESULT_GUEST_PROGRAM_EXIT_CODE
        | PropertyId::JOB_RESULT_FILE_FLAGS
        | PropertyId::JOB_RESULT_PROCESS_START_TIME => PropertyType::Integer,
        PropertyId::JOB_RESULT_USER_MESSAGE
        | PropertyId::JOB_RESULT_COMMAND_OUTPUT
        | PropertyId::JOB_RESULT_ITEM_NAME
        | PropertyId::JOB_RESULT_FOUND_ITEM_DESCRIPTION
        | PropertyId::JOB_RESULT_PROCESS_OWNER
        | PropertyId::JOB_RESULT_PROCESS_COMMAND
        | PropertyId::FOUND_ITEM_LOCATION => PropertyType::String,
        PropertyId::JOB_RESULT_HANDLE => PropertyType::Handle,
        PropertyId::JOB_RESULT_GUEST_OBJECT_EXISTS
        | PropertyId::JOB_RESULT_PROCESS_BEING_DEBUGGED => PropertyType::Bool,
        _ => return None,
    };
    Some(kind)
}

fn encode(ledger: &mut BufferLedger, value: &PropertyValue) -> RawPropertyValue {
    let mut raw = RawPropertyValue::zeroed();
    match value {
        PropertyValue::Integer(v) => raw.int_value = *v,
        PropertyValue::String(s) => raw.string_value = ledger.alloc_string(s),
        PropertyValue::Bool(b) => raw.bool_value = *b as c_char,
        PropertyValue::Handle(h) => raw.handle_value = h.raw(),
        PropertyValue::Int64(v) => raw.int64_value = *v,
        PropertyValue::Blob(b) => raw.blob_value = ledger.alloc_blob(b),
    }
    raw
}

fn props_of(list: Vec<ScriptProperty>) -> Props {
    list.into_iter().map(|p| (p.id, p.value)).collect()
}

impl From<ScriptedOutcome> for Outcome {
    fn from(s: ScriptedOutcome) -> Self {
        Outcome {
            error: s.error,
            props: props_of(s.properties),
            items: s.items.into_iter().map(props_of).collect(),
            progress_events: s.progress_events,
        }
    }
}

struct Shared {
    state: Mutex<State>,
    completed: Condvar,
    config: SimConfig,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct SimJobSystem {
    shared: Arc<Shared>,
}

impl SimJobSystem {
    pub fn new(config: SimConfig) -> Self {
        Self::with_script(config, JobScript::default())
    }

    pub fn with_script(config: SimConfig, script: JobScript) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    objects: HashMap::new(),
                    vms: BTreeMap::new(),
                    next_handle: 1,
                    script,
                    ledger: BufferLedger::default(),
                    stats: SimStats::default(),
                }),
                completed: Condvar::new(),
                config,
                workers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn from_env() -> Self {
        Self::new(SimConfig::from_env())
    }

    /// Adds a powered-off, registered VM at `vmx_path`.
    pub fn add_vm(&self, vmx_path: &str) {
        self.shared
            .lock()
            .vms
            .insert(vmx_path.to_string(), VmModel::new());
    }

    pub fn push_outcome(&self, outcome: ScriptedOutcome) {
        self.shared.lock().script.push(outcome);
    }

    pub fn guest_file(&self, vmx_path: &str, guest_path: &str) -> Option<Vec<u8>> {
        self.shared
            .lock()
            .vms
            .get(vmx_path)
            .and_then(|vm| vm.file(guest_path).map(<[u8]>::to_vec))
    }

    pub fn put_guest_file(&self, vmx_path: &str, guest_path: &str, contents: &[u8]) -> bool {
        match self.shared.lock().vms.get_mut(vmx_path) {
            Some(vm) => {
                vm.put_file(guest_path, contents);
                true
            }
            None => false,
        }
    }

    pub fn vm_power_state(&self, vmx_path: &str) -> Option<c_int> {
        self.shared.lock().vms.get(vmx_path).map(VmModel::power_state)
    }

    pub fn stats(&self) -> SimStats {
        let state = self.shared.lock();
        SimStats {
            live_handles: state.objects.len(),
            buffers: state.ledger.stats(),
            ..state.stats
        }
    }

    /// Blocks until every job thread started so far has finished, including
    /// its final callback.
    pub fn join_workers(&self) {
        let workers = std::mem::take(
            &mut *self
                .shared
                .workers
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
        );
        for worker in workers {
            if worker.join().is_err() {
                warn!("sim job thread panicked");
            }
        }
    }

    fn wait_completed<'a>(
        &'a self,
        mut state: MutexGuard<'a, State>,
        job: JobHandle,
    ) -> Result<MutexGuard<'a, State>, NativeError> {
        loop {
            if state.job(job)?.completed {
                return Ok(state);
            }
            state = self
                .shared
                .completed
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}

impl Default for SimJobSystem {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

struct Worker {
    job: JobHandle,
    callback: Option<EventProc>,
    // The client-data word is opaque here; it is only handed back.
    client_data: usize,
    progress_events: u32,
    items: Vec<RawHandle>,
}

impl Worker {
    fn fire(&self, shared: &Shared, event: EventKind, more_info: RawHandle) {
        if !shared.config.step_delay.is_zero() {
            std::thread::sleep(shared.config.step_delay);
        }
        if let Some(callback) = self.callback {
            // SAFETY: the callback and its client data were supplied
            // together to start_operation.
            unsafe {
                callback(
                    self.job.raw(),
                    event.raw(),
                    more_info,
                    self.client_data as *mut c_void,
                )
            };
        }
    }

    fn run(self, shared: &Shared) {
        for _ in 0..self.progress_events {
            self.fire(shared, EventKind::JobProgress, 0);
        }
        for item in &self.items {
            self.fire(shared, EventKind::FindItem, *item);
        }
        {
            let mut state = shared.lock();
            if let Some(Object {
                kind: ObjectKind::Job(job),
                ..
            }) = state.objects.get_mut(&self.job.raw())
            {
                job.completed = true;
            }
        }
        shared.completed.notify_all();
        self.fire(shared, EventKind::JobCompleted, 0);
        debug!(job = %self.job, "sim job finished");
    }
}

impl NativeJobApi for SimJobSystem {
    fn start_operation(
        &self,
        op: &Operation,
        callback: Option<EventProc>,
        client_data: *mut c_void,
    ) -> JobHandle {
        let worker = {
            let mut state = self.shared.lock();
            state.stats.jobs_started += 1;
            let outcome = match state.script.take(op.name()) {
                Some(scripted) => Outcome::from(scripted),
                None => state.respond(op),
            };
            let progress_events = outcome
                .progress_events
                .unwrap_or(self.shared.config.progress_events);

            // Found items are delivered only as find-item events, each with
            // its own handle; the job itself carries no result items.
            let finds_items = matches!(op, Operation::HostFindItems { .. });
            let item_handles = if finds_items && outcome.error == codes::OK {
                outcome
                    .items
                    .iter()
                    .map(|props| {
                        state
                            .alloc(Object {
                                kind: ObjectKind::Item,
                                props: props.clone(),
                            })
                            .raw()
                    })
                    .collect()
            } else {
                Vec::new()
            };

            let mut props = if outcome.error == codes::OK {
                outcome.props
            } else {
                Props::new()
            };
            props.insert(
                PropertyId::JOB_RESULT_ERROR_CODE,
                PropertyValue::Int64(i64::from(outcome.error)),
            );
            let items = if outcome.error == codes::OK && !finds_items {
                outcome.items
            } else {
                Vec::new()
            };
            let job = state.alloc(Object {
                kind: ObjectKind::Job(JobState {
                    completed: false,
                    error: outcome.error,
                    items,
                    item_handles: item_handles.clone(),
                }),
                props,
            });
            debug!(op = op.name(), %job, error = outcome.error, "sim job started");
            Worker {
                job,
                callback,
                client_data: client_data as usize,
                progress_events,
                items: item_handles,
            }
        };

        let job = worker.job;
        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name(format!("sim-job-{}", job.raw()))
            .spawn(move || worker.run(&shared));
        match spawned {
            Ok(handle) => self
                .shared
                .workers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(handle),
            Err(err) => {
                warn!(%job, %err, "failed to spawn sim job thread");
                let mut state = self.shared.lock();
                if let Some(Object {
                    kind: ObjectKind::Job(failed),
                    ..
                }) = state.objects.get_mut(&job.raw())
                {
                    failed.completed = true;
                    failed.error = codes::E_OUT_OF_MEMORY;
                }
                drop(state);
                self.shared.completed.notify_all();
            }
        }
        job
    }

    fn get_property_type(
        &self,
        handle: JobHandle,
        id: PropertyId,
    ) -> Result<PropertyType, NativeError> {
        let mut state = self.shared.lock();
        state.stats.type_queries += 1;
        let props = state.read_props(handle)?;
        if let Some(value) = props.get(&id) {
            return Ok(value.kind());
        }
        let is_job = state.job(handle).is_ok();
        match (is_job, declared_type(id)) {
            (true, Some(kind)) => Ok(kind),
            _ => Err(NativeError::new(codes::E_UNRECOGNIZED_PROPERTY)),
        }
    }

    fn batch_fetch(
        &self,
        target: FetchTarget,
        shape: CallShape,
        ids: &[PropertyId],
        out: &mut [RawPropertyValue],
    ) -> Result<(), NativeError> {
        if shape.arity() != ids.len() || ids.len() != out.len() {
            return Err(NativeError::new(codes::E_INVALID_ARG));
        }
        let mut state = self.shared.lock();
        state.stats.batch_fetches += 1;
        let props = match target {
            FetchTarget::Properties(handle) => state.read_props(handle)?,
            FetchTarget::Wait(job) => {
                state = self.wait_completed(state, job)?;
                let error = state.job(job)?.error;
                if let Some(e) = NativeError::from_status(u64::from(error)) {
                    return Err(e);
                }
                state.read_props(job)?
            }
            FetchTarget::NthItem { job, index } => {
                let index =
                    usize::try_from(index).map_err(|_| NativeError::new(codes::E_INVALID_ARG))?;
                state
                    .job(job)?
                    .items
                    .get(index)
                    .cloned()
                    .ok_or(NativeError::new(codes::E_INVALID_ARG))?
            }
        };

        let values = ids
            .iter()
            .map(|id| {
                props
                    .get(id)
                    .ok_or(NativeError::new(codes::E_UNRECOGNIZED_PROPERTY))
            })
            .collect::<Result<Vec<_>, _>>()?;
        for (slot, value) in out.iter_mut().zip(values) {
            *slot = encode(&mut state.ledger, value);
        }
        Ok(())
    }

    fn check_completion(&self, job: JobHandle) -> Result<bool, NativeError> {
        Ok(self.shared.lock().job(job)?.completed)
    }

    fn get_num_properties(&self, job: JobHandle, id: PropertyId) -> Result<c_int, NativeError> {
        let state = self.shared.lock();
        let count = state
            .job(job)?
            .items
            .iter()
            .filter(|item| item.contains_key(&id))
            .count();
        Ok(count as c_int)
    }

    unsafe fn free_buffer(&self, buffer: *mut c_void) {
        self.shared.lock().ledger.free(buffer);
    }

    fn release_handle(&self, handle: JobHandle) {
        let mut state = self.shared.lock();
        match state.objects.remove(&handle.raw()) {
            Some(Object {
                kind: ObjectKind::Job(job),
                ..
            }) => {
                for item in job.item_handles {
                    state.objects.remove(&item);
                }
                state.stats.releases += 1;
            }
            Some(_) => state.stats.releases += 1,
            None => {
                state.stats.bad_releases += 1;
                warn!(%handle, "release of unknown handle");
            }
        }
    }

    fn disconnect_host(&self, host: JobHandle) {
        let mut state = self.shared.lock();
        let is_host = matches!(
            state.objects.get(&host.raw()).map(|o| &o.kind),
            Some(ObjectKind::Host)
        );
        if !is_host {
            warn!(%host, "disconnect of non-host handle");
            return;
        }
        state.objects.remove(&host.raw());
        state.stats.disconnects += 1;
    }

    fn get_num_root_snapshots(&self, vm: JobHandle) -> Result<c_int, NativeError> {
        let state = self.shared.lock();
        let (_, model) = state.vm_for(vm)?;
        Ok(model.root_snapshots().len() as c_int)
    }

    fn get_root_snapshot(&self, vm: JobHandle, index: c_int) -> Result<JobHandle, NativeError> {
        let mut state = self.shared.lock();
        let (path, model) = state.vm_for(vm)?;
        let id = usize::try_from(index)
            .ok()
            .and_then(|i| model.root_snapshots().get(i).copied())
            .ok_or(NativeError::new(codes::E_SNAPSHOT_NOTFOUND))?;
        let path = path.clone();
        Ok(state.snapshot_handle(path, id))
    }

    fn get_current_snapshot(&self, vm: JobHandle) -> Result<JobHandle, NativeError> {
        let mut state = self.shared.lock();
        let (path, model) = state.vm_for(vm)?;
        let id = model
            .current_snapshot()
            .ok_or(NativeError::new(codes::E_SNAPSHOT_NOTFOUND))?;
        let path = path.clone();
        Ok(state.snapshot_handle(path, id))
    }
}
