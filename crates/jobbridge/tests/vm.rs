use jobbridge::ops::{
    POWERSTATE_POWERED_OFF, POWERSTATE_POWERED_ON, POWERSTATE_SUSPENDED, RUNPROGRAM_RETURN_IMMEDIATELY,
    VMPOWEROP_NORMAL,
};
use jobbridge::{codes, ConnectParams, DirEntry, Host, JobBridge};
use jobbridge_sim::{ScriptedOutcome, SimConfig, SimJobSystem};

const VMX: &str = "/vms/build/build.vmx";
const OTHER: &str = "/vms/idle/idle.vmx";

fn bridge() -> JobBridge<SimJobSystem> {
    let sim = SimJobSystem::new(SimConfig::quiet());
    sim.add_vm(VMX);
    sim.add_vm(OTHER);
    JobBridge::with_local_runtime(sim)
}

#[test]
fn power_cycle_and_discovery() {
    let bridge = bridge();
    {
        let host = Host::connect(&bridge, ConnectParams::local_workstation()).expect("connect");
        assert_eq!(host.api_version().expect("api version"), 2);
        assert_eq!(
            host.find_registered_vms(0).expect("registered"),
            vec![VMX.to_string(), OTHER.to_string()]
        );
        assert!(host.find_running_vms(0).expect("running").is_empty());

        let vm = host.open_vm(VMX).expect("open");
        assert_eq!(vm.vmx_path().expect("path"), VMX);
        assert!(!vm.is_running().expect("state"));
        vm.power_on(VMPOWEROP_NORMAL).expect("power on");
        assert!(vm.is_running().expect("state"));
        assert_eq!(host.find_running_vms(0).expect("running"), vec![VMX.to_string()]);

        vm.suspend(VMPOWEROP_NORMAL).expect("suspend");
        assert_eq!(bridge.api().vm_power_state(VMX), Some(POWERSTATE_SUSPENDED));
        let err = vm.reset(VMPOWEROP_NORMAL).expect_err("reset needs a running vm");
        assert_eq!(err.code(), codes::E_VM_NOT_RUNNING);

        host.unregister_vm(OTHER).expect("unregister");
        assert_eq!(host.find_registered_vms(0).expect("registered"), vec![VMX.to_string()]);

        let missing = host.open_vm("/vms/nope.vmx").err().expect("missing vm");
        assert_eq!(missing.code(), codes::E_FILE_NOT_FOUND);
        host.disconnect();
    }
    let stats = bridge.api().stats();
    assert_eq!(stats.live_handles, 0);
    assert_eq!(stats.disconnects, 1);
    assert_eq!(stats.bad_releases, 0);
    assert_eq!(stats.buffers.live, 0);
}

#[test]
fn guest_operations_need_tools_and_login() {
    let bridge = bridge();
    let host = Host::connect(&bridge, ConnectParams::local_workstation()).expect("connect");
    let vm = host.open_vm(VMX).expect("open");

    let err = vm.wait_for_tools(10).expect_err("powered off");
    assert_eq!(err.code(), codes::E_VM_NOT_RUNNING);
    vm.power_on(VMPOWEROP_NORMAL).expect("power on");
    vm.wait_for_tools(10).expect("tools");

    let err = vm.file_exists("/etc/passwd").expect_err("not logged in");
    assert_eq!(err.code(), codes::E_CANNOT_AUTHENTICATE_WITH_GUEST);
    let err = vm.login("builder", "").expect_err("empty password");
    assert_eq!(err.code(), codes::E_CANNOT_AUTHENTICATE_WITH_GUEST);
    vm.login("builder", "secret").expect("login");

    vm.create_directory("/work").expect("mkdir");
    assert!(vm.directory_exists("/work").expect("dir exists"));
    let err = vm.create_directory("/work").expect_err("exists");
    assert_eq!(err.code(), codes::E_FILE_ALREADY_EXISTS);

    let temp = vm.create_temp_file().expect("temp");
    assert!(temp.starts_with("/tmp/"));
    assert!(vm.file_exists(&temp).expect("file exists"));
    vm.delete_file(&temp).expect("delete");
    assert!(!vm.file_exists(&temp).expect("file exists"));
    let err = vm.delete_file(&temp).expect_err("gone");
    assert_eq!(err.code(), codes::E_FILE_NOT_FOUND);

    vm.create_directory("/work/out").expect("mkdir nested");
    assert!(bridge.api().put_guest_file(VMX, "/work/log.txt", b"ok"));
    assert_eq!(
        vm.list_directory("/work").expect("ls"),
        vec![
            DirEntry {
                name: "log.txt".to_string(),
                is_dir: false
            },
            DirEntry {
                name: "out".to_string(),
                is_dir: true
            },
        ]
    );
    vm.delete_directory("/work").expect("rm -r");
    assert!(!vm.directory_exists("/work/out").expect("dir exists"));

    vm.logout().expect("logout");
    let err = vm.create_temp_file().expect_err("logged out");
    assert_eq!(err.code(), codes::E_CANNOT_AUTHENTICATE_WITH_GUEST);
}

#[test]
fn programs_and_processes() {
    let bridge = bridge();
    let host = Host::connect(&bridge, ConnectParams::local_workstation()).expect("connect");
    let vm = host.open_vm(VMX).expect("open");
    vm.power_on(VMPOWEROP_NORMAL).expect("power on");
    vm.login("builder", "secret").expect("login");

    let done = vm.run_program("/bin/true", "", 0).expect("run");
    assert_eq!(done.exit_code, 0);
    let failed = vm.run_program("/usr/bin/false", "", 0).expect("run");
    assert_eq!(failed.exit_code, 1);
    assert!(failed.pid > done.pid);

    let daemon = vm
        .run_program("/usr/sbin/sshd", "-D", RUNPROGRAM_RETURN_IMMEDIATELY)
        .expect("spawn");
    let procs = vm.list_processes().expect("ps");
    assert_eq!(procs.len(), 2);
    assert_eq!(procs[0].name, "init");
    let sshd = procs.iter().find(|p| p.pid == daemon.pid).expect("sshd listed");
    assert_eq!(sshd.owner, "builder");
    assert_eq!(sshd.command, "/usr/sbin/sshd -D");
    assert!(!sshd.being_debugged);

    vm.kill_process(daemon.pid as u64).expect("kill");
    let err = vm.kill_process(daemon.pid as u64).expect_err("already dead");
    assert_eq!(err.code(), codes::E_NO_SUCH_PROCESS);
    assert_eq!(vm.list_processes().expect("ps").len(), 1);

    let err = vm.run_program(" ", "", 0).expect_err("nothing to run");
    assert_eq!(err.code(), codes::E_PROGRAM_NOT_STARTED);
}

#[test]
fn scripted_failure_reaches_the_wrapper() {
    let bridge = bridge();
    bridge
        .api()
        .push_outcome(ScriptedOutcome::failure("vm_power_on", codes::E_CANNOT_POWER_ON_VM));
    let host = Host::connect(&bridge, ConnectParams::local_workstation()).expect("connect");
    let vm = host.open_vm(VMX).expect("open");
    let err = vm.power_on(VMPOWEROP_NORMAL).expect_err("scripted");
    assert_eq!(err.code(), codes::E_CANNOT_POWER_ON_VM);
    assert_eq!(err.code_name(), "VIX_E_CANNOT_POWER_ON_VM");
    vm.power_on(VMPOWEROP_NORMAL).expect("second attempt uses the guest model");
}

#[test]
fn copy_files_between_host_and_guest() {
    let dir = tempfile::tempdir().expect("tempdir");
    let src = dir.path().join("in.txt");
    let dst = dir.path().join("out.txt");
    std::fs::write(&src, b"payload").expect("write");

    let bridge = bridge();
    let host = Host::connect(&bridge, ConnectParams::local_workstation()).expect("connect");
    let vm = host.open_vm(VMX).expect("open");
    vm.power_on(VMPOWEROP_NORMAL).expect("power on");
    vm.login("builder", "secret").expect("login");

    vm.copy_file_from_host_to_guest(&src.to_string_lossy(), "/tmp/in.txt")
        .expect("to guest");
    assert_eq!(
        bridge.api().guest_file(VMX, "/tmp/in.txt").as_deref(),
        Some(&b"payload"[..])
    );
    vm.copy_file_from_guest_to_host("/tmp/in.txt", &dst.to_string_lossy())
        .expect("to host");
    assert_eq!(std::fs::read(&dst).expect("read"), b"payload");

    let err = vm
        .copy_file_from_host_to_guest(&dir.path().join("absent").to_string_lossy(), "/tmp/x")
        .expect_err("no source");
    assert_eq!(err.code(), codes::E_FILE_NOT_FOUND);
}

#[test]
fn snapshots_capture_and_restore_guest_state() {
    let bridge = bridge();
    {
        let host = Host::connect(&bridge, ConnectParams::local_workstation()).expect("connect");
        let vm = host.open_vm(VMX).expect("open");
        vm.power_on(VMPOWEROP_NORMAL).expect("power on");
        vm.login("builder", "secret").expect("login");
        assert_eq!(
            vm.current_snapshot().err().expect("none yet").code(),
            codes::E_SNAPSHOT_NOTFOUND
        );

        let clean = vm.create_snapshot("clean", "fresh boot", 0).expect("snapshot");
        assert_eq!(clean.display_name().expect("name"), "clean");
        assert_eq!(clean.description().expect("description"), "fresh boot");
        assert_eq!(clean.power_state().expect("power"), POWERSTATE_POWERED_ON);

        vm.create_directory("/dirty").expect("mkdir");
        let dirty = vm.create_snapshot("dirty", "", 0).expect("snapshot");
        assert_eq!(
            vm.current_snapshot().expect("current").display_name().expect("name"),
            "dirty"
        );
        let roots = vm.root_snapshots().expect("roots");
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].display_name().expect("name"), "clean");
        drop(roots);

        vm.revert_to_snapshot(&clean, 0).expect("revert");
        // Reverting logs the guest out.
        vm.login("builder", "secret").expect("login");
        assert!(!vm.directory_exists("/dirty").expect("dir exists"));

        vm.remove_snapshot(clean, 0).expect("remove clean");
        let roots = vm.root_snapshots().expect("roots");
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].display_name().expect("name"), "dirty");
        drop(roots);

        vm.power_off(VMPOWEROP_NORMAL).expect("power off");
        vm.revert_to_snapshot(&dirty, 0).expect("revert");
        assert!(vm.is_running().expect("state"));
        drop(dirty);

        vm.power_off(VMPOWEROP_NORMAL).expect("power off");
        assert_eq!(bridge.api().vm_power_state(VMX), Some(POWERSTATE_POWERED_OFF));
    }
    let stats = bridge.api().stats();
    assert_eq!(stats.live_handles, 0);
    assert_eq!(stats.bad_releases, 0);
}

#[test]
fn deleting_a_running_vm_is_refused() {
    let bridge = bridge();
    let host = Host::connect(&bridge, ConnectParams::local_workstation()).expect("connect");
    let vm = host.open_vm(OTHER).expect("open");
    vm.power_on(VMPOWEROP_NORMAL).expect("power on");
    let err = host
        .open_vm(OTHER)
        .expect("second handle")
        .delete(0)
        .expect_err("running");
    assert_eq!(err.code(), codes::E_VM_IS_RUNNING);
    vm.power_off(VMPOWEROP_NORMAL).expect("power off");
    vm.delete(0).expect("delete");
    assert_eq!(bridge.api().vm_power_state(OTHER), None);
}
