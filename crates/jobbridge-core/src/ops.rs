use std::ffi::c_int;

use serde::{Deserialize, Serialize};

use crate::types::JobHandle;

pub const API_VERSION: c_int = 2;

pub const SERVICEPROVIDER_DEFAULT: c_int = 1;
pub const SERVICEPROVIDER_VMWARE_SERVER: c_int = 2;
pub const SERVICEPROVIDER_VMWARE_WORKSTATION: c_int = 3;

pub const FIND_RUNNING_VMS: c_int = 1;
pub const FIND_REGISTERED_VMS: c_int = 4;

pub const VMPOWEROP_NORMAL: c_int = 0;
pub const VMPOWEROP_SUPPRESS_SNAPSHOT_POWERON: c_int = 0x0080;
pub const VMPOWEROP_LAUNCH_GUI: c_int = 0x0200;

pub const POWERSTATE_POWERING_OFF: c_int = 0x0001;
pub const POWERSTATE_POWERED_OFF: c_int = 0x0002;
pub const POWERSTATE_POWERING_ON: c_int = 0x0004;
pub const POWERSTATE_POWERED_ON: c_int = 0x0008;
pub const POWERSTATE_SUSPENDING: c_int = 0x0010;
pub const POWERSTATE_SUSPENDED: c_int = 0x0020;
pub const POWERSTATE_TOOLS_RUNNING: c_int = 0x0040;

pub const TOOLSSTATE_UNKNOWN: c_int = 0x0001;
pub const TOOLSSTATE_RUNNING: c_int = 0x0002;
pub const TOOLSSTATE_NOT_INSTALLED: c_int = 0x0004;

pub const VMDELETE_DISK_FILES: c_int = 0x0002;

pub const RUNPROGRAM_RETURN_IMMEDIATELY: c_int = 0x0001;

pub const FILE_ATTRIBUTES_DIRECTORY: c_int = 0x0001;
pub const FILE_ATTRIBUTES_SYMLINK: c_int = 0x0002;

/// An asynchronous native operation. Each one yields a job handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    HostConnect {
        host_type: c_int,
        host_name: Option<String>,
        port: c_int,
        user: Option<String>,
        password: Option<String>,
    },
    HostFindItems {
        host: JobHandle,
        search_type: c_int,
        timeout_secs: c_int,
    },
    HostRegisterVm {
        host: JobHandle,
        vmx_path: String,
    },
    HostUnregisterVm {
        host: JobHandle,
        vmx_path: String,
    },
    VmOpen {
        host: JobHandle,
        vmx_path: String,
    },
    VmPowerOn {
        vm: JobHandle,
        options: c_int,
    },
    VmPowerOff {
        vm: JobHandle,
        options: c_int,
    },
    VmReset {
        vm: JobHandle,
        options: c_int,
    },
    VmSuspend {
        vm: JobHandle,
        options: c_int,
    },
    VmDelete {
        vm: JobHandle,
        options: c_int,
    },
    VmWaitForToolsInGuest {
        vm: JobHandle,
        timeout_secs: c_int,
    },
    VmLoginInGuest {
        vm: JobHandle,
        user: String,
        password: String,
        options: c_int,
    },
    VmLogoutFromGuest {
        vm: JobHandle,
    },
    VmRunProgramInGuest {
        vm: JobHandle,
        program: String,
        args: String,
        options: c_int,
    },
    VmKillProcessInGuest {
        vm: JobHandle,
        pid: u64,
    },
    VmListProcessesInGuest {
        vm: JobHandle,
    },
    VmFileExistsInGuest {
        vm: JobHandle,
        path: String,
    },
    VmDirectoryExistsInGuest {
        vm: JobHandle,
        path: String,
    },
    VmCreateDirectoryInGuest {
        vm: JobHandle,
        path: String,
    },
    VmDeleteDirectoryInGuest {
        vm: JobHandle,
        path: String,
    },
    VmDeleteFileInGuest {
        vm: JobHandle,
        path: String,
    },
    VmListDirectoryInGuest {
        vm: JobHandle,
        path: String,
    },
    VmCreateTempFileInGuest {
        vm: JobHandle,
    },
    VmCopyFileFromHostToGuest {
        vm: JobHandle,
        host_path: String,
        guest_path: String,
    },
    VmCopyFileFromGuestToHost {
        vm: JobHandle,
        guest_path: String,
        host_path: String,
    },
    VmCreateSnapshot {
        vm: JobHandle,
        name: String,
        description: String,
        options: c_int,
    },
    VmRevertToSnapshot {
        vm: JobHandle,
        snapshot: JobHandle,
        options: c_int,
    },
    VmRemoveSnapshot {
        vm: JobHandle,
        snapshot: JobHandle,
        options: c_int,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::HostConnect { .. } => "host_connect",
            Operation::HostFindItems { .. } => "host_find_items",
            Operation::HostRegisterVm { .. } => "host_register_vm",
            Operation::HostUnregisterVm { .. } => "host_unregister_vm",
            Operation::VmOpen { .. } => "vm_open",
            Operation::VmPowerOn { .. } => "vm_power_on",
            Operation::VmPowerOff { .. } => "vm_power_off",
            Operation::VmReset { .. } => "vm_reset",
            Operation::VmSuspend { .. } => "vm_suspend",
            Operation::VmDelete { .. } => "vm_delete",
            Operation::VmWaitForToolsInGuest { .. } => "vm_wait_for_tools_in_guest",
            Operation::VmLoginInGuest { .. } => "vm_login_in_guest",
            Operation::VmLogoutFromGuest { .. } => "vm_logout_from_guest",
            Operation::VmRunProgramInGuest { .. } => "vm_run_program_in_guest",
            Operation::VmKillProcessInGuest { .. } => "vm_kill_process_in_guest",
            Operation::VmListProcessesInGuest { .. } => "vm_list_processes_in_guest",
            Operation::VmFileExistsInGuest { .. } => "vm_file_exists_in_guest",
            Operation::VmDirectoryExistsInGuest { .. } => "vm_directory_exists_in_guest",
            Operation::VmCreateDirectoryInGuest { .. } => "vm_create_directory_in_guest",
            Operation::VmDeleteDirectoryInGuest { .. } => "vm_delete_directory_in_guest",
            Operation::VmDeleteFileInGuest { .. } => "vm_delete_file_in_guest",
            Operation::VmListDirectoryInGuest { .. } => "vm_list_directory_in_guest",
            Operation::VmCreateTempFileInGuest { .. } => "vm_create_temp_file_in_guest",
            Operation::VmCopyFileFromHostToGuest { .. } => "vm_copy_file_from_host_to_guest",
            Operation::VmCopyFileFromGuestToHost { .. } => "vm_copy_file_from_guest_to_host",
            Operation::VmCreateSnapshot { .. } => "vm_create_snapshot",
            Operation::VmRevertToSnapshot { .. } => "vm_revert_to_snapshot",
            Operation::VmRemoveSnapshot { .. } => "vm_remove_snapshot",
        }
    }

    /// The handle the operation acts on; `INVALID` for host connect.
    pub fn target(&self) -> JobHandle {
        match self {
            Operation::HostConnect { .. } => JobHandle::INVALID,
            Operation::HostFindItems { host, .. }
            | Operation::HostRegisterVm { host, .. }
            | Operation::HostUnregisterVm { host, .. }
            | Operation::VmOpen { host, .. } => *host,
            Operation::VmPowerOn { vm, .. }
            | Operation::VmPowerOff { vm, .. }
            | Operation::VmReset { vm, .. }
            | Operation::VmSuspend { vm, .. }
            | Operation::VmDelete { vm, .. }
            | Operation::VmWaitForToolsInGuest { vm, .. }
            | Operation::VmLoginInGuest { vm, .. }
            | Operation::VmLogoutFromGuest { vm }
            | Operation::VmRunProgramInGuest { vm, .. }
            | Operation::VmKillProcessInGuest { vm, .. }
            | Operation::VmListProcessesInGuest { vm }
            | Operation::VmFileExistsInGuest { vm, .. }
            | Operation::VmDirectoryExistsInGuest { vm, .. }
            | Operation::VmCreateDirectoryInGuest { vm, .. }
            | Operation::VmDeleteDirectoryInGuest { vm, .. }
            | Operation::VmDeleteFileInGuest { vm, .. }
            | Operation::VmListDirectoryInGuest { vm, .. }
            | Operation::VmCreateTempFileInGuest { vm }
            | Operation::VmCopyFileFromHostToGuest { vm, .. }
            | Operation::VmCopyFileFromGuestToHost { vm, .. }
            | Operation::VmCreateSnapshot { vm, .. }
            | Operation::VmRevertToSnapshot { vm, .. }
            | Operation::VmRemoveSnapshot { vm, .. } => *vm,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_json_uses_op_tag() {
        let op = Operation::VmPowerOn {
            vm: JobHandle::from_raw(12),
            options: VMPOWEROP_LAUNCH_GUI,
        };
        let json = serde_json::to_value(&op).expect("serialize");
        assert_eq!(json["op"], "vm_power_on");
        assert_eq!(json["vm"], 12);
        assert_eq!(op.name(), "vm_power_on");
        assert_eq!(op.target(), JobHandle::from_raw(12));
    }
}
