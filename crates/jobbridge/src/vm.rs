//! Host, VM and snapshot objects over the bridge.
//!
//! Each method runs one operation in polling mode, waits for it and reads
//! typed results. The find methods are the exception: found items only
//! arrive as enumeration events, so they register a handler. Object handles
//! are released when the wrapper drops.

use std::ffi::c_int;
use std::sync::{Arc, Mutex};

use jobbridge_core::native::{FetchTarget, NativeJobApi};
use jobbridge_core::ops::{
    self, Operation, FILE_ATTRIBUTES_DIRECTORY, FIND_REGISTERED_VMS, FIND_RUNNING_VMS,
    POWERSTATE_POWERED_ON,
};
use jobbridge_core::{fetch_properties, handler_fn, EventKind, JobHandle, PropertyId, Result};
use tracing::debug;

use crate::bridge::{bool_at, handle_at, i64_at, int_at, string_at, JobBridge, JobGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub host_type: c_int,
    pub host_name: Option<String>,
    pub port: c_int,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl ConnectParams {
    /// The local workstation product, no credentials.
    pub fn local_workstation() -> Self {
        Self {
            host_type: ops::SERVICEPROVIDER_VMWARE_WORKSTATION,
            host_name: None,
            port: 0,
            user: None,
            password: None,
        }
    }
}

pub struct Host<'b, A: NativeJobApi> {
    bridge: &'b JobBridge<A>,
    handle: JobHandle,
}

impl<'b, A: NativeJobApi> Host<'b, A> {
    pub fn connect(bridge: &'b JobBridge<A>, params: ConnectParams) -> Result<Self> {
        let op = Operation::HostConnect {
            host_type: params.host_type,
            host_name: params.host_name,
            port: params.port,
            user: params.user,
            password: params.password,
        };
        let values = bridge.run(&op, &[PropertyId::JOB_RESULT_HANDLE])?;
        let handle = handle_at(&values, 0)?;
        debug!(%handle, "host connected");
        Ok(Self { bridge, handle })
    }

    pub fn handle(&self) -> JobHandle {
        self.handle
    }

    pub fn api_version(&self) -> Result<i32> {
        let values = self
            .bridge
            .fetch_properties(self.handle, &[PropertyId::HOST_API_VERSION])?;
        int_at(&values, 0)
    }

    pub fn find_running_vms(&self, timeout_secs: c_int) -> Result<Vec<String>>
    where
        A: 'static,
    {
        self.find_items(FIND_RUNNING_VMS, timeout_secs)
    }

    pub fn find_registered_vms(&self, timeout_secs: c_int) -> Result<Vec<String>>
    where
        A: 'static,
    {
        self.find_items(FIND_REGISTERED_VMS, timeout_secs)
    }

    /// The job carries no result items; each location is read from the
    /// `more_info` handle of a find-item event, which is only valid while
    /// the event is being delivered.
    fn find_items(&self, search_type: c_int, timeout_secs: c_int) -> Result<Vec<String>>
    where
        A: 'static,
    {
        let op = Operation::HostFindItems {
            host: self.handle,
            search_type,
            timeout_secs,
        };
        let found: Arc<Mutex<Vec<Result<String>>>> = Arc::default();
        let handler = {
            let api = self.bridge.shared_api();
            let found = Arc::clone(&found);
            handler_fn(move |_env, _job, event, more_info, _data| {
                if event == EventKind::FindItem {
                    let location = fetch_properties(
                        &*api,
                        FetchTarget::Properties(more_info),
                        &[PropertyId::FOUND_ITEM_LOCATION],
                    )
                    .and_then(|values| string_at(&values, 0));
                    found
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push(location);
                }
                Ok(())
            })
        };

        let job = JobGuard::new(self.bridge, self.bridge.invoke(&op, Some(handler), None)?);
        self.bridge.wait_for_completion(job.handle(), &[])?;
        drop(job);
        let found = std::mem::take(&mut *found.lock().unwrap_or_else(|e| e.into_inner()));
        debug!(search_type, found = found.len(), "find items done");
        found.into_iter().collect()
    }

    pub fn register_vm(&self, vmx_path: &str) -> Result<()> {
        let op = Operation::HostRegisterVm {
            host: self.handle,
            vmx_path: vmx_path.to_string(),
        };
        self.bridge.run(&op, &[]).map(drop)
    }

    pub fn unregister_vm(&self, vmx_path: &str) -> Result<()> {
        let op = Operation::HostUnregisterVm {
            host: self.handle,
            vmx_path: vmx_path.to_string(),
        };
        self.bridge.run(&op, &[]).map(drop)
    }

    pub fn open_vm(&self, vmx_path: &str) -> Result<Vm<'b, A>> {
        let op = Operation::VmOpen {
            host: self.handle,
            vmx_path: vmx_path.to_string(),
        };
        let values = self.bridge.run(&op, &[PropertyId::JOB_RESULT_HANDLE])?;
        Ok(Vm {
            bridge: self.bridge,
            handle: handle_at(&values, 0)?,
        })
    }

    pub fn disconnect(self) {
        drop(self);
    }
}

impl<A: NativeJobApi> Drop for Host<'_, A> {
    fn drop(&mut self) {
        debug!(handle = %self.handle, "host disconnect");
        self.bridge.api().disconnect_host(self.handle);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramResult {
    pub pid: i64,
    pub exit_code: i32,
    pub elapsed_secs: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestProcessInfo {
    pub name: String,
    pub pid: i64,
    pub owner: String,
    pub command: String,
    pub being_debugged: bool,
    pub start_time: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

pub struct Vm<'b, A: NativeJobApi> {
    bridge: &'b JobBridge<A>,
    handle: JobHandle,
}

impl<'b, A: NativeJobApi> Vm<'b, A> {
    pub fn handle(&self) -> JobHandle {
        self.handle
    }

    fn run(&self, op: Operation) -> Result<()> {
        self.bridge.run(&op, &[]).map(drop)
    }

    pub fn vmx_path(&self) -> Result<String> {
        let values = self
            .bridge
            .fetch_properties(self.handle, &[PropertyId::VM_VMX_PATHNAME])?;
        string_at(&values, 0)
    }

    pub fn power_state(&self) -> Result<c_int> {
        let values = self
            .bridge
            .fetch_properties(self.handle, &[PropertyId::VM_POWER_STATE])?;
        int_at(&values, 0)
    }

    pub fn is_running(&self) -> Result<bool> {
        Ok(self.power_state()? & POWERSTATE_POWERED_ON != 0)
    }

    pub fn power_on(&self, options: c_int) -> Result<()> {
        self.run(Operation::VmPowerOn {
            vm: self.handle,
            options,
        })
    }

    pub fn power_off(&self, options: c_int) -> Result<()> {
        self.run(Operation::VmPowerOff {
            vm: self.handle,
            options,
        })
    }

    pub fn reset(&self, options: c_int) -> Result<()> {
        self.run(Operation::VmReset {
            vm: self.handle,
            options,
        })
    }

    pub fn suspend(&self, options: c_int) -> Result<()> {
        self.run(Operation::VmSuspend {
            vm: self.handle,
            options,
        })
    }

    /// Deletes the VM; the handle is released either way.
    pub fn delete(self, options: c_int) -> Result<()> {
        self.run(Operation::VmDelete {
            vm: self.handle,
            options,
        })
    }

    pub fn wait_for_tools(&self, timeout_secs: c_int) -> Result<()> {
        self.run(Operation::VmWaitForToolsInGuest {
            vm: self.handle,
            timeout_secs,
        })
    }

    pub fn login(&self, user: &str, password: &str) -> Result<()> {
        self.run(Operation::VmLoginInGuest {
            vm: self.handle,
            user: user.to_string(),
            password: password.to_string(),
            options: 0,
        })
    }

    pub fn logout(&self) -> Result<()> {
        self.run(Operation::VmLogoutFromGuest { vm: self.handle })
    }

    pub fn run_program(&self, program: &str, args: &str, options: c_int) -> Result<ProgramResult> {
        let op = Operation::VmRunProgramInGuest {
            vm: self.handle,
            program: program.to_string(),
            args: args.to_string(),
            options,
        };
        let values = self.bridge.run(
            &op,
            &[
                PropertyId::JOB_RESULT_PROCESS_ID,
                PropertyId::JOB_RESULT_GUEST_PROGRAM_EXIT_CODE,
                PropertyId::JOB_RESULT_GUEST_PROGRAM_ELAPSED_TIME,
            ],
        )?;
        Ok(ProgramResult {
            pid: i64_at(&values, 0)?,
            exit_code: int_at(&values, 1)?,
            elapsed_secs: int_at(&values, 2)?,
        })
    }

    pub fn kill_process(&self, pid: u64) -> Result<()> {
        self.run(Operation::VmKillProcessInGuest {
            vm: self.handle,
            pid,
        })
    }

    pub fn list_processes(&self) -> Result<Vec<GuestProcessInfo>> {
        let op = Operation::VmListProcessesInGuest { vm: self.handle };
        let rows = self.bridge.run_items(
            &op,
            &[
                PropertyId::JOB_RESULT_ITEM_NAME,
                PropertyId::JOB_RESULT_PROCESS_ID,
                PropertyId::JOB_RESULT_PROCESS_OWNER,
                PropertyId::JOB_RESULT_PROCESS_COMMAND,
                PropertyId::JOB_RESULT_PROCESS_BEING_DEBUGGED,
                PropertyId::JOB_RESULT_PROCESS_START_TIME,
            ],
        )?;
        rows.iter()
            .map(|row| {
                Ok(GuestProcessInfo {
                    name: string_at(row, 0)?,
                    pid: i64_at(row, 1)?,
                    owner: string_at(row, 2)?,
                    command: string_at(row, 3)?,
                    being_debugged: bool_at(row, 4)?,
                    start_time: int_at(row, 5)?,
                })
            })
            .collect()
    }

    fn exists(&self, op: Operation) -> Result<bool> {
        let values = self
            .bridge
            .run(&op, &[PropertyId::JOB_RESULT_GUEST_OBJECT_EXISTS])?;
        bool_at(&values, 0)
    }

    pub fn file_exists(&self, path: &str) -> Result<bool> {
        self.exists(Operation::VmFileExistsInGuest {
            vm: self.handle,
            path: path.to_string(),
        })
    }

    pub fn directory_exists(&self, path: &str) -> Result<bool> {
        self.exists(Operation::VmDirectoryExistsInGuest {
            vm: self.handle,
            path: path.to_string(),
        })
    }

    pub fn create_temp_file(&self) -> Result<String> {
        let op = Operation::VmCreateTempFileInGuest { vm: self.handle };
        let values = self.bridge.run(&op, &[PropertyId::JOB_RESULT_ITEM_NAME])?;
        string_at(&values, 0)
    }

    pub fn delete_file(&self, path: &str) -> Result<()> {
        self.run(Operation::VmDeleteFileInGuest {
            vm: self.handle,
            path: path.to_string(),
        })
    }

    pub fn create_directory(&self, path: &str) -> Result<()> {
        self.run(Operation::VmCreateDirectoryInGuest {
            vm: self.handle,
            path: path.to_string(),
        })
    }

    pub fn delete_directory(&self, path: &str) -> Result<()> {
        self.run(Operation::VmDeleteDirectoryInGuest {
            vm: self.handle,
            path: path.to_string(),
        })
    }

    pub fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>> {
        let op = Operation::VmListDirectoryInGuest {
            vm: self.handle,
            path: path.to_string(),
        };
        let rows = self.bridge.run_items(
            &op,
            &[
                PropertyId::JOB_RESULT_ITEM_NAME,
                PropertyId::JOB_RESULT_FILE_FLAGS,
            ],
        )?;
        rows.iter()
            .map(|row| {
                Ok(DirEntry {
                    name: string_at(row, 0)?,
                    is_dir: int_at(row, 1)? & FILE_ATTRIBUTES_DIRECTORY != 0,
                })
            })
            .collect()
    }

    pub fn copy_file_from_host_to_guest(&self, host_path: &str, guest_path: &str) -> Result<()> {
        self.run(Operation::VmCopyFileFromHostToGuest {
            vm: self.handle,
            host_path: host_path.to_string(),
            guest_path: guest_path.to_string(),
        })
    }

    pub fn copy_file_from_guest_to_host(&self, guest_path: &str, host_path: &str) -> Result<()> {
        self.run(Operation::VmCopyFileFromGuestToHost {
            vm: self.handle,
            guest_path: guest_path.to_string(),
            host_path: host_path.to_string(),
        })
    }

    pub fn create_snapshot(
        &self,
        name: &str,
        description: &str,
        options: c_int,
    ) -> Result<Snapshot<'b, A>> {
        let op = Operation::VmCreateSnapshot {
            vm: self.handle,
            name: name.to_string(),
            description: description.to_string(),
            options,
        };
        let values = self.bridge.run(&op, &[PropertyId::JOB_RESULT_HANDLE])?;
        Ok(Snapshot {
            bridge: self.bridge,
            handle: handle_at(&values, 0)?,
        })
    }

    pub fn revert_to_snapshot(&self, snapshot: &Snapshot<'_, A>, options: c_int) -> Result<()> {
        self.run(Operation::VmRevertToSnapshot {
            vm: self.handle,
            snapshot: snapshot.handle,
            options,
        })
    }

    pub fn remove_snapshot(&self, snapshot: Snapshot<'_, A>, options: c_int) -> Result<()> {
        self.run(Operation::VmRemoveSnapshot {
            vm: self.handle,
            snapshot: snapshot.handle,
            options,
        })
    }

    pub fn current_snapshot(&self) -> Result<Snapshot<'b, A>> {
        let handle = self.bridge.api().get_current_snapshot(self.handle)?;
        Ok(Snapshot {
            bridge: self.bridge,
            handle,
        })
    }

    pub fn root_snapshots(&self) -> Result<Vec<Snapshot<'b, A>>> {
        let n = self.bridge.api().get_num_root_snapshots(self.handle)?;
        (0..n)
            .map(|i| {
                let handle = self.bridge.api().get_root_snapshot(self.handle, i)?;
                Ok(Snapshot {
                    bridge: self.bridge,
                    handle,
                })
            })
            .collect()
    }
}

impl<A: NativeJobApi> Drop for Vm<'_, A> {
    fn drop(&mut self) {
        self.bridge.release_handle(self.handle);
    }
}

pub struct Snapshot<'b, A: NativeJobApi> {
    bridge: &'b JobBridge<A>,
    handle: JobHandle,
}

impl<A: NativeJobApi> Snapshot<'_, A> {
    pub fn handle(&self) -> JobHandle {
        self.handle
    }

    pub fn display_name(&self) -> Result<String> {
        let values = self
            .bridge
            .fetch_properties(self.handle, &[PropertyId::SNAPSHOT_DISPLAYNAME])?;
        string_at(&values, 0)
    }

    pub fn description(&self) -> Result<String> {
        let values = self
            .bridge
            .fetch_properties(self.handle, &[PropertyId::SNAPSHOT_DESCRIPTION])?;
        string_at(&values, 0)
    }

    pub fn power_state(&self) -> Result<c_int> {
        let values = self
            .bridge
            .fetch_properties(self.handle, &[PropertyId::SNAPSHOT_POWERSTATE])?;
        int_at(&values, 0)
    }
}

impl<A: NativeJobApi> Drop for Snapshot<'_, A> {
    fn drop(&mut self) {
        self.bridge.release_handle(self.handle);
    }
}
