//! `NativeJobApi` over the VMware VIX C library.
//!
//! Batched fetches are variadic on the C side, so each `CallShape` maps to
//! one call with exactly that many (id, out-pointer) pairs followed by the
//! terminating `PropertyId::NONE`.

#![allow(clippy::missing_safety_doc)]

use std::ffi::{c_char, c_int, c_void, CStr, CString, NulError};
use std::ptr;

use jobbridge_core::codes;
use jobbridge_core::native::{CallShape, EventProc, FetchTarget, NativeJobApi, RawPropertyValue};
use jobbridge_core::ops::Operation;
use jobbridge_core::{JobHandle, NativeError, PropertyId, PropertyType, RawHandle};
use tracing::{debug, warn};

type VixError = u64;

/// Ask the library for its newest API.
const VIX_API_VERSION: c_int = -1;

#[allow(non_snake_case)]
#[link(name = "vixAllProducts")]
extern "C" {
    fn Vix_GetPropertyType(handle: RawHandle, id: c_int, out: *mut c_int) -> VixError;
    fn Vix_ReleaseHandle(handle: RawHandle);
    fn Vix_FreeBuffer(p: *mut c_void);
    fn Vix_GetProperties(handle: RawHandle, first: c_int, ...) -> VixError;

    fn VixJob_Wait(job: RawHandle, first: c_int, ...) -> VixError;
    fn VixJob_CheckCompletion(job: RawHandle, complete: *mut c_char) -> VixError;
    fn VixJob_GetNumProperties(job: RawHandle, id: c_int) -> c_int;
    fn VixJob_GetNthProperties(job: RawHandle, index: c_int, first: c_int, ...) -> VixError;

    fn VixHost_Connect(
        api_version: c_int,
        host_type: c_int,
        host_name: *const c_char,
        port: c_int,
        user: *const c_char,
        password: *const c_char,
        options: c_int,
        property_list: RawHandle,
        callback: Option<EventProc>,
        client_data: *mut c_void,
    ) -> RawHandle;
    fn VixHost_Disconnect(host: RawHandle);
    fn VixHost_FindItems(
        host: RawHandle,
        search_type: c_int,
        criteria: RawHandle,
        timeout: i32,
        callback: Option<EventProc>,
        client_data: *mut c_void,
    ) -> RawHandle;
    fn VixHost_RegisterVM(
        host: RawHandle,
        vmx: *const c_char,
        callback: Option<EventProc>,
        client_data: *mut c_void,
    ) -> RawHandle;
    fn VixHost_UnregisterVM(
        host: RawHandle,
        vmx: *const c_char,
        callback: Option<EventProc>,
        client_data: *mut c_void,
    ) -> RawHandle;

    fn VixVM_Open(
        host: RawHandle,
        vmx: *const c_char,
        callback: Option<EventProc>,
        client_data: *mut c_void,
    ) -> RawHandle;
    fn VixVM_PowerOn(
        vm: RawHandle,
        options: c_int,
        property_list: RawHandle,
        callback: Option<EventProc>,
        client_data: *mut c_void,
    ) -> RawHandle;
    fn VixVM_PowerOff(
        vm: RawHandle,
        options: c_int,
        callback: Option<EventProc>,
        client_data: *mut c_void,
    ) -> RawHandle;
    fn VixVM_Reset(
        vm: RawHandle,
        options: c_int,
        callback: Option<EventProc>,
        client_data: *mut c_void,
    ) -> RawHandle;
    fn VixVM_Suspend(
        vm: RawHandle,
        options: c_int,
        callback: Option<EventProc>,
        client_data: *mut c_void,
    ) -> RawHandle;
    fn VixVM_Delete(
        vm: RawHandle,
        options: c_int,
        callback: Option<EventProc>,
        client_data: *mut c_void,
    ) -> RawHandle;
    fn VixVM_WaitForToolsInGuest(
        vm: RawHandle,
        timeout: c_int,
        callback: Option<EventProc>,
        client_data: *mut c_void,
    ) -> RawHandle;
    fn VixVM_LoginInGuest(
        vm: RawHandle,
        user: *const c_char,
        password: *const c_char,
        options: c_int,
        callback: Option<EventProc>,
        client_data: *mut c_void,
    ) -> RawHandle;
    fn VixVM_LogoutFromGuest(
        vm: RawHandle,
        callback: Option<EventProc>,
        client_data: *mut c_void,
    ) -> RawHandle;
    fn VixVM_RunProgramInGuest(
        vm: RawHandle,
        program: *const c_char,
        args: *const c_char,
        options: c_int,
        property_list: RawHandle,
        callback: Option<EventProc>,
        client_data: *mut c_void,
    ) -> RawHandle;
    fn VixVM_KillProcessInGuest(
        vm: RawHandle,
        pid: u64,
        options: c_int,
        callback: Option<EventProc>,
        client_data: *mut c_void,
    ) -> RawHandle;
    fn VixVM_ListProcessesInGuest(
        vm: RawHandle,
        options: c_int,
        callback: Option<EventProc>,
        client_data: *mut c_void,
    ) -> RawHandle;
    fn VixVM_FileExistsInGuest(
        vm: RawHandle,
        path: *const c_char,
        callback: Option<EventProc>,
        client_data: *mut c_void,
    ) -> RawHandle;
    fn VixVM_DirectoryExistsInGuest(
        vm: RawHandle,
        path: *const c_char,
        callback: Option<EventProc>,
        client_data: *mut c_void,
    ) -> RawHandle;
    fn VixVM_CreateDirectoryInGuest(
        vm: RawHandle,
        path: *const c_char,
        property_list: RawHandle,
        callback: Option<EventProc>,
        client_data: *mut c_void,
    ) -> RawHandle;
    fn VixVM_DeleteDirectoryInGuest(
        vm: RawHandle,
        path: *const c_char,
        options: c_int,
        callback: Option<EventProc>,
        client_data: *mut c_void,
    ) -> RawHandle;
    fn VixVM_DeleteFileInGuest(
        vm: RawHandle,
        path: *const c_char,
        callback: Option<EventProc>,
        client_data: *mut c_void,
    ) -> RawHandle;
    fn VixVM_ListDirectoryInGuest(
        vm: RawHandle,
        path: *const c_char,
        options: c_int,
        callback: Option<EventProc>,
        client_data: *mut c_void,
    ) -> RawHandle;
    fn VixVM_CreateTempFileInGuest(
        vm: RawHandle,
        options: c_int,
        property_list: RawHandle,
        callback: Option<EventProc>,
        client_data: *mut c_void,
    ) -> RawHandle;
    fn VixVM_CopyFileFromHostToGuest(
        vm: RawHandle,
        host_path: *const c_char,
        guest_path: *const c_char,
        options: c_int,
        property_list: RawHandle,
        callback: Option<EventProc>,
        client_data: *mut c_void,
    ) -> RawHandle;
    fn VixVM_CopyFileFromGuestToHost(
        vm: RawHandle,
        guest_path: *const c_char,
        host_path: *const c_char,
        options: c_int,
        property_list: RawHandle,
        callback: Option<EventProc>,
        client_data: *mut c_void,
    ) -> RawHandle;
    fn VixVM_CreateSnapshot(
        vm: RawHandle,
        name: *const c_char,
        description: *const c_char,
        options: c_int,
        property_list: RawHandle,
        callback: Option<EventProc>,
        client_data: *mut c_void,
    ) -> RawHandle;
    fn VixVM_RevertToSnapshot(
        vm: RawHandle,
        snapshot: RawHandle,
        options: c_int,
        property_list: RawHandle,
        callback: Option<EventProc>,
        client_data: *mut c_void,
    ) -> RawHandle;
    fn VixVM_RemoveSnapshot(
        vm: RawHandle,
        snapshot: RawHandle,
        options: c_int,
        callback: Option<EventProc>,
        client_data: *mut c_void,
    ) -> RawHandle;
    fn VixVM_GetNumRootSnapshots(vm: RawHandle, result: *mut c_int) -> VixError;
    fn VixVM_GetRootSnapshot(vm: RawHandle, index: c_int, snapshot: *mut RawHandle) -> VixError;
    fn VixVM_GetCurrentSnapshot(vm: RawHandle, snapshot: *mut RawHandle) -> VixError;
}

const NO_HANDLE: RawHandle = 0;

fn status(err: VixError) -> Result<(), NativeError> {
    match NativeError::from_status(err) {
        None => Ok(()),
        Some(e) => Err(e),
    }
}

fn cstring(s: &str) -> Result<CString, NulError> {
    CString::new(s)
}

fn opt_ptr(s: &Option<CString>) -> *const c_char {
    s.as_deref().map_or(ptr::null(), CStr::as_ptr)
}

/// The VIX library as a native job system.
#[derive(Debug, Default, Clone, Copy)]
pub struct VixApi;

impl VixApi {
    pub fn new() -> Self {
        VixApi
    }

    fn start(
        &self,
        op: &Operation,
        cb: Option<EventProc>,
        cd: *mut c_void,
    ) -> Result<RawHandle, NulError> {
        let job = match op {
            Operation::HostConnect {
                host_type,
                host_name,
                port,
                user,
                password,
            } => {
                let host_name = host_name.as_deref().map(cstring).transpose()?;
                let user = user.as_deref().map(cstring).transpose()?;
                let password = password.as_deref().map(cstring).transpose()?;
                unsafe {
                    VixHost_Connect(
                        VIX_API_VERSION,
                        *host_type,
                        opt_ptr(&host_name),
                        *port,
                        opt_ptr(&user),
                        opt_ptr(&password),
                        0,
                        NO_HANDLE,
                        cb,
                        cd,
                    )
                }
            }
            Operation::HostFindItems {
                host,
                search_type,
                timeout_secs,
            } => unsafe {
                VixHost_FindItems(host.raw(), *search_type, NO_HANDLE, *timeout_secs, cb, cd)
            },
            Operation::HostRegisterVm { host, vmx_path } => {
                let vmx = cstring(vmx_path)?;
                unsafe { VixHost_RegisterVM(host.raw(), vmx.as_ptr(), cb, cd) }
            }
            Operation::HostUnregisterVm { host, vmx_path } => {
                let vmx = cstring(vmx_path)?;
                unsafe { VixHost_UnregisterVM(host.raw(), vmx.as_ptr(), cb, cd) }
            }
            Operation::VmOpen { host, vmx_path } => {
                let vmx = cstring(vmx_path)?;
                unsafe { VixVM_Open(host.raw(), vmx.as_ptr(), cb, cd) }
            }
            Operation::VmPowerOn { vm, options } => unsafe {
                VixVM_PowerOn(vm.raw(), *options, NO_HANDLE, cb, cd)
            },
            Operation::VmPowerOff { vm, options } => unsafe {
                VixVM_PowerOff(vm.raw(), *options, cb, cd)
            },
            Operation::VmReset { vm, options } => unsafe { VixVM_Reset(vm.raw(), *options, cb, cd) },
            Operation::VmSuspend { vm, options } => unsafe {
                VixVM_Suspend(vm.raw(), *options, cb, cd)
            },
            Operation::VmDelete { vm, options } => unsafe {
                VixVM_Delete(vm.raw(), *options, cb, cd)
            },
            Operation::VmWaitForToolsInGuest { vm, timeout_secs } => unsafe {
                VixVM_WaitForToolsInGuest(vm.raw(), *timeout_secs, cb, cd)
            },
            Operation::VmLoginInGuest {
                vm,
                user,
                password,
                options,
            } => {
                let user = cstring(user)?;
                let password = cstring(password)?;
                unsafe {
                    VixVM_LoginInGuest(vm.raw(), user.as_ptr(), password.as_ptr(), *options, cb, cd)
                }
            }
            Operation::VmLogoutFromGuest { vm } => unsafe {
                VixVM_LogoutFromGuest(vm.raw(), cb, cd)
            },
            Operation::VmRunProgramInGuest {
                vm,
                program,
                args,
                options,
            } => {
                let program = cstring(program)?;
                let args = cstring(args)?;
                unsafe {
                    VixVM_RunProgramInGuest(
                        vm.raw(),
                        program.as_ptr(),
                        args.as_ptr(),
                        *options,
                        NO_HANDLE,
                        cb,
                        cd,
                    )
                }
            }
            Operation::VmKillProcessInGuest { vm, pid } => unsafe {
                VixVM_KillProcessInGuest(vm.raw(), *pid, 0, cb, cd)
            },
            Operation::VmListProcessesInGuest { vm } => unsafe {
                VixVM_ListProcessesInGuest(vm.raw(), 0, cb, cd)
            },
            Operation::VmFileExistsInGuest { vm, path } => {
                let path = cstring(path)?;
                unsafe { VixVM_FileExistsInGuest(vm.raw(), path.as_ptr(), cb, cd) }
            }
            Operation::VmDirectoryExistsInGuest { vm, path } => {
                let path = cstring(path)?;
                unsafe { VixVM_DirectoryExistsInGuest(vm.raw(), path.as_ptr(), cb, cd) }
            }
            Operation::VmCreateDirectoryInGuest { vm, path } => {
                let path = cstring(path)?;
                unsafe { VixVM_CreateDirectoryInGuest(vm.raw(), path.as_ptr(), NO_HANDLE, cb, cd) }
            }
            Operation::VmDeleteDirectoryInGuest { vm, path } => {
                let path = cstring(path)?;
                unsafe { VixVM_DeleteDirectoryInGuest(vm.raw(), path.as_ptr(), 0, cb, cd) }
            }
            Operation::VmDeleteFileInGuest { vm, path } => {
                let path = cstring(path)?;
                unsafe { VixVM_DeleteFileInGuest(vm.raw(), path.as_ptr(), cb, cd) }
            }
            Operation::VmListDirectoryInGuest { vm, path } => {
                let path = cstring(path)?;
                unsafe { VixVM_ListDirectoryInGuest(vm.raw(), path.as_ptr(), 0, cb, cd) }
            }
            Operation::VmCreateTempFileInGuest { vm } => unsafe {
                VixVM_CreateTempFileInGuest(vm.raw(), 0, NO_HANDLE, cb, cd)
            },
            Operation::VmCopyFileFromHostToGuest {
                vm,
                host_path,
                guest_path,
            } => {
                let host_path = cstring(host_path)?;
                let guest_path = cstring(guest_path)?;
                unsafe {
                    VixVM_CopyFileFromHostToGuest(
                        vm.raw(),
                        host_path.as_ptr(),
                        guest_path.as_ptr(),
                        0,
                        NO_HANDLE,
                        cb,
                        cd,
                    )
                }
            }
            Operation::VmCopyFileFromGuestToHost {
                vm,
                guest_path,
                host_path,
            } => {
                let guest_path = cstring(guest_path)?;
                let host_path = cstring(host_path)?;
                unsafe {
                    VixVM_CopyFileFromGuestToHost(
                        vm.raw(),
                        guest_path.as_ptr(),
                        host_path.as_ptr(),
                        0,
                        NO_HANDLE,
                        cb,
                        cd,
                    )
                }
            }
            Operation::VmCreateSnapshot {
                vm,
                name,
                description,
                options,
            } => {
                let name = cstring(name)?;
                let description = cstring(description)?;
                unsafe {
                    VixVM_CreateSnapshot(
                        vm.raw(),
                        name.as_ptr(),
                        description.as_ptr(),
                        *options,
                        NO_HANDLE,
                        cb,
                        cd,
                    )
                }
            }
            Operation::VmRevertToSnapshot {
                vm,
                snapshot,
                options,
            } => unsafe {
                VixVM_RevertToSnapshot(vm.raw(), snapshot.raw(), *options, NO_HANDLE, cb, cd)
            },
            Operation::VmRemoveSnapshot {
                vm,
                snapshot,
                options,
            } => unsafe { VixVM_RemoveSnapshot(vm.raw(), snapshot.raw(), *options, cb, cd) },
        };
        Ok(job)
    }

    /// The variadic calls take two out-pointers for a blob, which no fixed
    /// call shape can express.
    fn refuse_blobs(&self, handle: JobHandle, ids: &[PropertyId]) -> Result<(), NativeError> {
        for id in ids {
            if self.get_property_type(handle, *id)? == PropertyType::Blob {
                warn!(%handle, %id, "blob property in batched fetch");
                return Err(NativeError::new(codes::E_NOT_SUPPORTED));
            }
        }
        Ok(())
    }
}

macro_rules! batched {
    ($target:expr, $ids:expr, $slots:expr; $($i:literal),*) => {
        match $target {
            FetchTarget::Properties(h) => {
                Vix_GetProperties(h.raw(), $($ids[$i].raw(), $slots.add($i).cast::<c_void>(),)* PropertyId::NONE.raw())
            }
            FetchTarget::Wait(h) => {
                VixJob_Wait(h.raw(), $($ids[$i].raw(), $slots.add($i).cast::<c_void>(),)* PropertyId::NONE.raw())
            }
            FetchTarget::NthItem { job, index } => VixJob_GetNthProperties(
                job.raw(),
                index,
                $($ids[$i].raw(), $slots.add($i).cast::<c_void>(),)*
                PropertyId::NONE.raw()
            ),
        }
    };
}

/// # Safety
///
/// `ids` and `slots` must both hold `shape.arity()` entries.
unsafe fn call_batched(
    target: FetchTarget,
    shape: CallShape,
    ids: &[PropertyId],
    slots: *mut RawPropertyValue,
) -> VixError {
    match shape {
        CallShape::Pairs0 => batched!(target, ids, slots;),
        CallShape::Pairs1 => batched!(target, ids, slots; 0),
        CallShape::Pairs2 => batched!(target, ids, slots; 0, 1),
        CallShape::Pairs3 => batched!(target, ids, slots; 0, 1, 2),
        CallShape::Pairs4 => batched!(target, ids, slots; 0, 1, 2, 3),
        CallShape::Pairs5 => batched!(target, ids, slots; 0, 1, 2, 3, 4),
        CallShape::Pairs6 => batched!(target, ids, slots; 0, 1, 2, 3, 4, 5),
    }
}

impl NativeJobApi for VixApi {
    fn start_operation(
        &self,
        op: &Operation,
        callback: Option<EventProc>,
        client_data: *mut c_void,
    ) -> JobHandle {
        match self.start(op, callback, client_data) {
            Ok(job) => JobHandle::from_raw(job),
            Err(e) => {
                warn!(op = op.name(), %e, "string argument has an interior NUL");
                JobHandle::INVALID
            }
        }
    }

    fn get_property_type(
        &self,
        handle: JobHandle,
        id: PropertyId,
    ) -> Result<PropertyType, NativeError> {
        let mut raw: c_int = 0;
        status(unsafe { Vix_GetPropertyType(handle.raw(), id.raw(), &mut raw) })?;
        Ok(PropertyType::from_raw(raw))
    }

    fn batch_fetch(
        &self,
        target: FetchTarget,
        shape: CallShape,
        ids: &[PropertyId],
        out: &mut [RawPropertyValue],
    ) -> Result<(), NativeError> {
        if ids.len() != shape.arity() || out.len() != shape.arity() {
            return Err(NativeError::new(codes::E_INVALID_ARG));
        }
        self.refuse_blobs(target.handle(), ids)?;
        debug!(call = target.call_name(), n = ids.len(), "vix batched fetch");
        // SAFETY: both slices were checked against the shape above.
        status(unsafe { call_batched(target, shape, ids, out.as_mut_ptr()) })
    }

    fn check_completion(&self, job: JobHandle) -> Result<bool, NativeError> {
        let mut done: c_char = 0;
        status(unsafe { VixJob_CheckCompletion(job.raw(), &mut done) })?;
        Ok(done != 0)
    }

    fn get_num_properties(&self, job: JobHandle, id: PropertyId) -> Result<c_int, NativeError> {
        Ok(unsafe { VixJob_GetNumProperties(job.raw(), id.raw()) })
    }

    unsafe fn free_buffer(&self, buffer: *mut c_void) {
        Vix_FreeBuffer(buffer)
    }

    fn release_handle(&self, handle: JobHandle) {
        unsafe { Vix_ReleaseHandle(handle.raw()) }
    }

    fn disconnect_host(&self, host: JobHandle) {
        unsafe { VixHost_Disconnect(host.raw()) }
    }

    fn get_num_root_snapshots(&self, vm: JobHandle) -> Result<c_int, NativeError> {
        let mut n: c_int = 0;
        status(unsafe { VixVM_GetNumRootSnapshots(vm.raw(), &mut n) })?;
        Ok(n)
    }

    fn get_root_snapshot(&self, vm: JobHandle, index: c_int) -> Result<JobHandle, NativeError> {
        let mut snapshot: RawHandle = NO_HANDLE;
        status(unsafe { VixVM_GetRootSnapshot(vm.raw(), index, &mut snapshot) })?;
        Ok(JobHandle::from_raw(snapshot))
    }

    fn get_current_snapshot(&self, vm: JobHandle) -> Result<JobHandle, NativeError> {
        let mut snapshot: RawHandle = NO_HANDLE;
        status(unsafe { VixVM_GetCurrentSnapshot(vm.raw(), &mut snapshot) })?;
        Ok(JobHandle::from_raw(snapshot))
    }
}
