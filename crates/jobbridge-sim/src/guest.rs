//! The simulated guest world and the default outcome of every operation.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::c_int;

use jobbridge_core::codes;
use jobbridge_core::ops::{
    self, Operation, FILE_ATTRIBUTES_DIRECTORY, FIND_REGISTERED_VMS, FIND_RUNNING_VMS,
    POWERSTATE_POWERED_OFF, POWERSTATE_POWERED_ON, POWERSTATE_SUSPENDED,
    POWERSTATE_TOOLS_RUNNING, RUNPROGRAM_RETURN_IMMEDIATELY, TOOLSSTATE_NOT_INSTALLED,
    TOOLSSTATE_RUNNING,
};
use jobbridge_core::{JobHandle, PropertyId, PropertyValue};

use crate::system::{Object, ObjectKind, Props, State};

type Step<T> = std::result::Result<T, u16>;

#[derive(Debug, Clone, Default)]
pub(crate) struct Outcome {
    pub error: u16,
    pub props: Props,
    pub items: Vec<Props>,
    pub progress_events: Option<u32>,
}

impl Outcome {
    fn ok() -> Self {
        Self::default()
    }

    fn err(code: u16) -> Self {
        Self {
            error: code,
            ..Self::default()
        }
    }

    fn with(mut self, id: PropertyId, value: PropertyValue) -> Self {
        self.props.insert(id, value);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct GuestFs {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

impl GuestFs {
    fn fresh() -> Self {
        let mut fs = GuestFs::default();
        fs.dirs.insert("/".to_string());
        fs.dirs.insert("/tmp".to_string());
        fs
    }

    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path) || self.dirs.contains(path)
    }

    fn parent_exists(&self, path: &str) -> bool {
        match parent_of(path) {
            Some(parent) => self.dirs.contains(parent),
            None => false,
        }
    }

    fn children(&self, dir: &str) -> Vec<(String, bool)> {
        let mut out: Vec<(String, bool)> = self
            .dirs
            .iter()
            .filter(|d| d.as_str() != "/" && parent_of(d) == Some(dir))
            .map(|d| (leaf_of(d).to_string(), true))
            .chain(
                self.files
                    .keys()
                    .filter(|f| parent_of(f) == Some(dir))
                    .map(|f| (leaf_of(f).to_string(), false)),
            )
            .collect();
        out.sort();
        out
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn parent_of(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rsplit_once('/') {
        Some(("", _)) => Some("/"),
        Some((parent, _)) => Some(parent),
        None => None,
    }
}

fn leaf_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(_, leaf)| leaf).unwrap_or(path)
}

#[derive(Debug, Clone)]
pub(crate) struct GuestProcess {
    name: String,
    owner: String,
    command: String,
    start_time: i32,
}

#[derive(Debug, Clone)]
pub(crate) struct SnapshotModel {
    id: u32,
    parent: Option<u32>,
    name: String,
    description: String,
    power_state: c_int,
    fs: GuestFs,
}

#[derive(Debug, Clone)]
pub(crate) struct VmModel {
    power_state: c_int,
    tools_running: bool,
    registered: bool,
    user: Option<String>,
    fs: GuestFs,
    processes: BTreeMap<u64, GuestProcess>,
    next_pid: u64,
    temp_seq: u32,
    clock: i32,
    snapshots: Vec<SnapshotModel>,
    current: Option<u32>,
    next_snapshot_id: u32,
}

impl VmModel {
    pub(crate) fn new() -> Self {
        Self {
            power_state: POWERSTATE_POWERED_OFF,
            tools_running: false,
            registered: true,
            user: None,
            fs: GuestFs::fresh(),
            processes: BTreeMap::new(),
            next_pid: 100,
            temp_seq: 0,
            clock: 0,
            snapshots: Vec::new(),
            current: None,
            next_snapshot_id: 1,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.power_state == POWERSTATE_POWERED_ON
    }

    pub(crate) fn power_state(&self) -> c_int {
        self.power_state
    }

    pub(crate) fn file(&self, path: &str) -> Option<&[u8]> {
        self.fs.files.get(&normalize(path)).map(Vec::as_slice)
    }

    pub(crate) fn put_file(&mut self, path: &str, contents: &[u8]) {
        self.fs.files.insert(normalize(path), contents.to_vec());
    }

    pub(crate) fn properties(&self, vmx_path: &str) -> Props {
        let mut power = self.power_state;
        if self.tools_running {
            power |= POWERSTATE_TOOLS_RUNNING;
        }
        let tools = if self.tools_running {
            TOOLSSTATE_RUNNING
        } else {
            TOOLSSTATE_NOT_INSTALLED
        };
        let mut props = Props::new();
        props.insert(
            PropertyId::VM_VMX_PATHNAME,
            PropertyValue::String(vmx_path.to_string()),
        );
        props.insert(PropertyId::VM_POWER_STATE, PropertyValue::Integer(power));
        props.insert(PropertyId::VM_TOOLS_STATE, PropertyValue::Integer(tools));
        props.insert(PropertyId::VM_IS_RUNNING, PropertyValue::Bool(self.is_running()));
        props.insert(PropertyId::VM_NUM_VCPUS, PropertyValue::Integer(1));
        props.insert(PropertyId::VM_MEMORY_SIZE, PropertyValue::Integer(512));
        props.insert(PropertyId::VM_READ_ONLY, PropertyValue::Bool(false));
        props
    }

    pub(crate) fn snapshot_properties(&self, id: u32) -> Option<Props> {
        let snap = self.snapshots.iter().find(|s| s.id == id)?;
        let mut props = Props::new();
        props.insert(
            PropertyId::SNAPSHOT_DISPLAYNAME,
            PropertyValue::String(snap.name.clone()),
        );
        props.insert(
            PropertyId::SNAPSHOT_DESCRIPTION,
            PropertyValue::String(snap.description.clone()),
        );
        props.insert(
            PropertyId::SNAPSHOT_POWERSTATE,
            PropertyValue::Integer(snap.power_state),
        );
        Some(props)
    }

    pub(crate) fn root_snapshots(&self) -> Vec<u32> {
        self.snapshots
            .iter()
            .filter(|s| s.parent.is_none())
            .map(|s| s.id)
            .collect()
    }

    pub(crate) fn current_snapshot(&self) -> Option<u32> {
        self.current
    }

    fn boot(&mut self) {
        self.power_state = POWERSTATE_POWERED_ON;
        self.tools_running = true;
        self.user = None;
        self.processes.clear();
        self.processes.insert(
            1,
            GuestProcess {
                name: "init".to_string(),
                owner: "root".to_string(),
                command: "/sbin/init".to_string(),
                start_time: self.clock,
            },
        );
    }

    fn halt(&mut self, state: c_int) {
        self.power_state = state;
        self.tools_running = false;
        self.user = None;
        self.processes.clear();
    }

    fn tick(&mut self) -> i32 {
        self.clock += 1;
        self.clock
    }
}

impl State {
    fn vm_path(&self, vm: JobHandle) -> Step<String> {
        match self.objects.get(&vm.raw()).map(|o| &o.kind) {
            Some(ObjectKind::Vm { path }) => Ok(path.clone()),
            Some(_) => Err(codes::E_NOT_SUPPORTED_ON_HANDLE_TYPE),
            None => Err(codes::E_INVALID_HANDLE),
        }
    }

    pub(crate) fn vm_model(&mut self, vm: JobHandle) -> Step<&mut VmModel> {
        let path = self.vm_path(vm)?;
        self.vms.get_mut(&path).ok_or(codes::E_VM_NOT_FOUND)
    }

    fn require_host(&self, host: JobHandle) -> Step<()> {
        match self.objects.get(&host.raw()).map(|o| &o.kind) {
            Some(ObjectKind::Host) => Ok(()),
            Some(_) => Err(codes::E_NOT_SUPPORTED_ON_HANDLE_TYPE),
            None => Err(codes::E_INVALID_HANDLE),
        }
    }

    /// A VM that is running, has tools up and a guest login.
    fn guest(&mut self, vm: JobHandle) -> Step<&mut VmModel> {
        let model = self.vm_model(vm)?;
        if !model.is_running() {
            return Err(codes::E_VM_NOT_RUNNING);
        }
        if !model.tools_running {
            return Err(codes::E_TOOLS_NOT_RUNNING);
        }
        if model.user.is_none() {
            return Err(codes::E_CANNOT_AUTHENTICATE_WITH_GUEST);
        }
        Ok(model)
    }

    fn snapshot_ref(&self, snapshot: JobHandle) -> Step<(String, u32)> {
        match self.objects.get(&snapshot.raw()).map(|o| &o.kind) {
            Some(ObjectKind::Snapshot { path, id }) => Ok((path.clone(), *id)),
            Some(_) => Err(codes::E_NOT_SUPPORTED_ON_HANDLE_TYPE),
            None => Err(codes::E_INVALID_HANDLE),
        }
    }

    pub(crate) fn respond(&mut self, op: &Operation) -> Outcome {
        self.try_respond(op).unwrap_or_else(Outcome::err)
    }

    fn try_respond(&mut self, op: &Operation) -> Step<Outcome> {
        match op {
            Operation::HostConnect { host_type, .. } => {
                if !matches!(
                    *host_type,
                    ops::SERVICEPROVIDER_DEFAULT
                        | ops::SERVICEPROVIDER_VMWARE_SERVER
                        | ops::SERVICEPROVIDER_VMWARE_WORKSTATION
                ) {
                    return Err(codes::E_WRAPPER_SERVICEPROVIDER_NOT_FOUND);
                }
                let mut props = Props::new();
                props.insert(PropertyId::HOST_HOSTTYPE, PropertyValue::Integer(*host_type));
                props.insert(
                    PropertyId::HOST_API_VERSION,
                    PropertyValue::Integer(ops::API_VERSION),
                );
                let host = self.alloc(Object {
                    kind: ObjectKind::Host,
                    props,
                });
                Ok(Outcome::ok().with(PropertyId::JOB_RESULT_HANDLE, PropertyValue::Handle(host)))
            }
            Operation::HostFindItems {
                host, search_type, ..
            } => {
                self.require_host(*host)?;
                let found: Vec<&String> = match *search_type {
                    FIND_RUNNING_VMS => self
                        .vms
                        .iter()
                        .filter(|(_, vm)| vm.is_running())
                        .map(|(p, _)| p)
                        .collect(),
                    FIND_REGISTERED_VMS => self
                        .vms
                        .iter()
                        .filter(|(_, vm)| vm.registered)
                        .map(|(p, _)| p)
                        .collect(),
                    _ => return Err(codes::E_INVALID_ARG),
                };
                let items = found
                    .into_iter()
                    .map(|path| {
                        let mut item = Props::new();
                        item.insert(
                            PropertyId::FOUND_ITEM_LOCATION,
                            PropertyValue::String(path.clone()),
                        );
                        item
                    })
                    .collect();
                Ok(Outcome {
                    items,
                    ..Outcome::ok()
                })
            }
            Operation::HostRegisterVm { host, vmx_path }
            | Operation::HostUnregisterVm { host, vmx_path } => {
                self.require_host(*host)?;
                let register = matches!(op, Operation::HostRegisterVm { .. });
                let vm = self.vms.get_mut(vmx_path).ok_or(codes::E_FILE_NOT_FOUND)?;
                vm.registered = register;
                Ok(Outcome::ok())
            }
            Operation::VmOpen { host, vmx_path } => {
                self.require_host(*host)?;
                if !self.vms.contains_key(vmx_path) {
                    return Err(codes::E_FILE_NOT_FOUND);
                }
                let vm = self.alloc(Object {
                    kind: ObjectKind::Vm {
                        path: vmx_path.clone(),
                    },
                    props: Props::new(),
                });
                Ok(Outcome::ok().with(PropertyId::JOB_RESULT_HANDLE, PropertyValue::Handle(vm)))
            }
            Operation::VmPowerOn { vm, .. } => {
                let model = self.vm_model(*vm)?;
                if !model.is_running() {
                    model.boot();
                }
                Ok(Outcome::ok())
            }
            Operation::VmPowerOff { vm, .. } => {
                self.vm_model(*vm)?.halt(POWERSTATE_POWERED_OFF);
                Ok(Outcome::ok())
            }
            Operation::VmReset { vm, .. } => {
                let model = self.vm_model(*vm)?;
                if !model.is_running() {
                    return Err(codes::E_VM_NOT_RUNNING);
                }
                model.boot();
                Ok(Outcome::ok())
            }
            Operation::VmSuspend { vm, .. } => {
                let model = self.vm_model(*vm)?;
                if !model.is_running() {
                    return Err(codes::E_VM_NOT_RUNNING);
                }
                model.halt(POWERSTATE_SUSPENDED);
                Ok(Outcome::ok())
            }
            Operation::VmDelete { vm, .. } => {
                let path = self.vm_path(*vm)?;
                let model = self.vms.get(&path).ok_or(codes::E_VM_NOT_FOUND)?;
                if model.is_running() {
                    return Err(codes::E_VM_IS_RUNNING);
                }
                self.vms.remove(&path);
                Ok(Outcome::ok())
            }
            Operation::VmWaitForToolsInGuest { vm, .. } => {
                let model = self.vm_model(*vm)?;
                if !model.is_running() {
                    return Err(codes::E_VM_NOT_RUNNING);
                }
                if !model.tools_running {
                    return Err(codes::E_TIMEOUT_WAITING_FOR_TOOLS);
                }
                Ok(Outcome::ok())
            }
            Operation::VmLoginInGuest {
                vm, user, password, ..
            } => {
                let model = self.vm_model(*vm)?;
                if !model.is_running() {
                    return Err(codes::E_VM_NOT_RUNNING);
                }
                if !model.tools_running {
                    return Err(codes::E_TOOLS_NOT_RUNNING);
                }
                if user.is_empty() || password.is_empty() {
                    return Err(codes::E_CANNOT_AUTHENTICATE_WITH_GUEST);
                }
                model.user = Some(user.clone());
                Ok(Outcome::ok())
            }
            Operation::VmLogoutFromGuest { vm } => {
                self.vm_model(*vm)?.user = None;
                Ok(Outcome::ok())
            }
            Operation::VmRunProgramInGuest {
                vm,
                program,
                args,
                options,
            } => {
                let model = self.guest(*vm)?;
                if program.trim().is_empty() {
                    return Err(codes::E_PROGRAM_NOT_STARTED);
                }
                let pid = model.next_pid;
                model.next_pid += 1;
                let start_time = model.tick();
                let exit_code = if leaf_of(program) == "false" { 1 } else { 0 };
                if options & RUNPROGRAM_RETURN_IMMEDIATELY != 0 {
                    let owner = model.user.clone().unwrap_or_default();
                    let command = if args.is_empty() {
                        program.clone()
                    } else {
                        format!("{program} {args}")
                    };
                    model.processes.insert(
                        pid,
                        GuestProcess {
                            name: leaf_of(program).to_string(),
                            owner,
                            command,
                            start_time,
                        },
                    );
                }
                Ok(Outcome::ok()
                    .with(PropertyId::JOB_RESULT_PROCESS_ID, PropertyValue::Int64(pid as i64))
                    .with(
                        PropertyId::JOB_RESULT_GUEST_PROGRAM_EXIT_CODE,
                        PropertyValue::Integer(exit_code),
                    )
                    .with(
                        PropertyId::JOB_RESULT_GUEST_PROGRAM_ELAPSED_TIME,
                        PropertyValue::Integer(0),
                    ))
            }
            Operation::VmKillProcessInGuest { vm, pid } => {
                let model = self.guest(*vm)?;
                model
                    .processes
                    .remove(pid)
                    .ok_or(codes::E_NO_SUCH_PROCESS)?;
                Ok(Outcome::ok())
            }
            Operation::VmListProcessesInGuest { vm } => {
                let model = self.guest(*vm)?;
                let items = model
                    .processes
                    .iter()
                    .map(|(pid, p)| {
                        let mut item = Props::new();
                        item.insert(
                            PropertyId::JOB_RESULT_ITEM_NAME,
                            PropertyValue::String(p.name.clone()),
                        );
                        item.insert(
                            PropertyId::JOB_RESULT_PROCESS_ID,
                            PropertyValue::Int64(*pid as i64),
                        );
                        item.insert(
                            PropertyId::JOB_RESULT_PROCESS_OWNER,
                            PropertyValue::String(p.owner.clone()),
                        );
                        item.insert(
                            PropertyId::JOB_RESULT_PROCESS_COMMAND,
                            PropertyValue::String(p.command.clone()),
                        );
                        item.insert(
                            PropertyId::JOB_RESULT_PROCESS_BEING_DEBUGGED,
                            PropertyValue::Bool(false),
                        );
                        item.insert(
                            PropertyId::JOB_RESULT_PROCESS_START_TIME,
                            PropertyValue::Integer(p.start_time),
                        );
                        item
                    })
                    .collect();
                Ok(Outcome {
                    items,
                    ..Outcome::ok()
                })
            }
            Operation::VmFileExistsInGuest { vm, path } => {
                let model = self.guest(*vm)?;
                let exists = model.fs.files.contains_key(&normalize(path));
                Ok(Outcome::ok().with(
                    PropertyId::JOB_RESULT_GUEST_OBJECT_EXISTS,
                    PropertyValue::Bool(exists),
                ))
            }
            Operation::VmDirectoryExistsInGuest { vm, path } => {
                let model = self.guest(*vm)?;
                let exists = model.fs.dirs.contains(&normalize(path));
                Ok(Outcome::ok().with(
                    PropertyId::JOB_RESULT_GUEST_OBJECT_EXISTS,
                    PropertyValue::Bool(exists),
                ))
            }
            Operation::VmCreateDirectoryInGuest { vm, path } => {
                let model = self.guest(*vm)?;
                let path = normalize(path);
                if model.fs.exists(&path) {
                    return Err(codes::E_FILE_ALREADY_EXISTS);
                }
                if !model.fs.parent_exists(&path) {
                    return Err(codes::E_FILE_NOT_FOUND);
                }
                model.fs.dirs.insert(path);
                Ok(Outcome::ok())
            }
            Operation::VmDeleteDirectoryInGuest { vm, path } => {
                let model = self.guest(*vm)?;
                let path = normalize(path);
                if !model.fs.dirs.contains(&path) {
                    return Err(if model.fs.files.contains_key(&path) {
                        codes::E_NOT_A_DIRECTORY
                    } else {
                        codes::E_FILE_NOT_FOUND
                    });
                }
                let prefix = format!("{}/", path.trim_end_matches('/'));
                model
                    .fs
                    .dirs
                    .retain(|d| d != &path && !d.starts_with(&prefix));
                model.fs.files.retain(|f, _| !f.starts_with(&prefix));
                Ok(Outcome::ok())
            }
            Operation::VmDeleteFileInGuest { vm, path } => {
                let model = self.guest(*vm)?;
                let path = normalize(path);
                if model.fs.files.remove(&path).is_none() {
                    return Err(if model.fs.dirs.contains(&path) {
                        codes::E_NOT_A_FILE
                    } else {
                        codes::E_FILE_NOT_FOUND
                    });
                }
                Ok(Outcome::ok())
            }
            Operation::VmListDirectoryInGuest { vm, path } => {
                let model = self.guest(*vm)?;
                let path = normalize(path);
                if !model.fs.dirs.contains(&path) {
                    return Err(codes::E_NOT_A_DIRECTORY);
                }
                let items = model
                    .fs
                    .children(&path)
                    .into_iter()
                    .map(|(name, is_dir)| {
                        let mut item = Props::new();
                        item.insert(PropertyId::JOB_RESULT_ITEM_NAME, PropertyValue::String(name));
                        let flags = if is_dir { FILE_ATTRIBUTES_DIRECTORY } else { 0 };
                        item.insert(PropertyId::JOB_RESULT_FILE_FLAGS, PropertyValue::Integer(flags));
                        item
                    })
                    .collect();
                Ok(Outcome {
                    items,
                    ..Outcome::ok()
                })
            }
            Operation::VmCreateTempFileInGuest { vm } => {
                let model = self.guest(*vm)?;
                model.temp_seq += 1;
                let path = format!("/tmp/vmware{}", model.temp_seq);
                model.fs.files.insert(path.clone(), Vec::new());
                Ok(Outcome::ok().with(PropertyId::JOB_RESULT_ITEM_NAME, PropertyValue::String(path)))
            }
            Operation::VmCopyFileFromHostToGuest {
                vm,
                host_path,
                guest_path,
            } => {
                let model = self.guest(*vm)?;
                let guest_path = normalize(guest_path);
                if !model.fs.parent_exists(&guest_path) {
                    return Err(codes::E_FILE_NOT_FOUND);
                }
                let bytes = std::fs::read(host_path).map_err(|_| codes::E_FILE_NOT_FOUND)?;
                model.fs.files.insert(guest_path, bytes);
                Ok(Outcome::ok())
            }
            Operation::VmCopyFileFromGuestToHost {
                vm,
                guest_path,
                host_path,
            } => {
                let model = self.guest(*vm)?;
                let bytes = model
                    .fs
                    .files
                    .get(&normalize(guest_path))
                    .ok_or(codes::E_FILE_NOT_FOUND)?;
                std::fs::write(host_path, bytes).map_err(|_| codes::E_FILE_ERROR)?;
                Ok(Outcome::ok())
            }
            Operation::VmCreateSnapshot {
                vm,
                name,
                description,
                ..
            } => {
                let path = self.vm_path(*vm)?;
                let model = self.vm_model(*vm)?;
                let id = model.next_snapshot_id;
                model.next_snapshot_id += 1;
                let snapshot = SnapshotModel {
                    id,
                    parent: model.current,
                    name: name.clone(),
                    description: description.clone(),
                    power_state: model.power_state,
                    fs: model.fs.clone(),
                };
                model.snapshots.push(snapshot);
                model.current = Some(id);
                let handle = self.alloc(Object {
                    kind: ObjectKind::Snapshot { path, id },
                    props: Props::new(),
                });
                Ok(Outcome::ok().with(PropertyId::JOB_RESULT_HANDLE, PropertyValue::Handle(handle)))
            }
            Operation::VmRevertToSnapshot { vm, snapshot, .. } => {
                let (snap_path, id) = self.snapshot_ref(*snapshot)?;
                let path = self.vm_path(*vm)?;
                if snap_path != path {
                    return Err(codes::E_SNAPSHOT_NOTFOUND);
                }
                let model = self.vm_model(*vm)?;
                let snap = model
                    .snapshots
                    .iter()
                    .find(|s| s.id == id)
                    .cloned()
                    .ok_or(codes::E_SNAPSHOT_NOTFOUND)?;
                model.fs = snap.fs;
                if snap.power_state == POWERSTATE_POWERED_ON {
                    model.boot();
                } else {
                    model.halt(snap.power_state);
                }
                model.current = Some(id);
                Ok(Outcome::ok())
            }
            Operation::VmRemoveSnapshot { vm, snapshot, .. } => {
                let (snap_path, id) = self.snapshot_ref(*snapshot)?;
                let path = self.vm_path(*vm)?;
                if snap_path != path {
                    return Err(codes::E_SNAPSHOT_NOTFOUND);
                }
                let model = self.vm_model(*vm)?;
                let pos = model
                    .snapshots
                    .iter()
                    .position(|s| s.id == id)
                    .ok_or(codes::E_SNAPSHOT_NOTFOUND)?;
                let removed = model.snapshots.remove(pos);
                for child in model.snapshots.iter_mut() {
                    if child.parent == Some(id) {
                        child.parent = removed.parent;
                    }
                }
                if model.current == Some(id) {
                    model.current = removed.parent;
                }
                Ok(Outcome::ok())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_helpers() {
        assert_eq!(parent_of("/tmp/a"), Some("/tmp"));
        assert_eq!(parent_of("/tmp"), Some("/"));
        assert_eq!(parent_of("/"), None);
        assert_eq!(leaf_of("/usr/bin/false"), "false");
        assert_eq!(normalize("/tmp/"), "/tmp");
        assert_eq!(normalize("/"), "/");
    }

    #[test]
    fn listing_includes_dirs_and_files_once() {
        let mut fs = GuestFs::fresh();
        fs.dirs.insert("/tmp/sub".to_string());
        fs.files.insert("/tmp/a.txt".to_string(), b"x".to_vec());
        fs.files.insert("/tmp/sub/deep.txt".to_string(), Vec::new());
        assert_eq!(
            fs.children("/tmp"),
            vec![("a.txt".to_string(), false), ("sub".to_string(), true)]
        );
        assert_eq!(fs.children("/"), vec![("tmp".to_string(), true)]);
    }
}
