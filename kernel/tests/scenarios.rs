//! End-to-end scenarios driven through the public kernel API and the
//! system-call boundary

mod common;

use common::{System, CPU};
use keel_kernel::ipc::IpcStatus;
use keel_kernel::objects::{Blocked, EndpointRights, MemoryFlags, TaskState};
use keel_kernel::syscall::numbers;
use keel_kernel::{Error, MessageBuffer, SyscallArgs, TaskArgs};

fn args(a: &[u64]) -> [u64; 6] {
    let mut out = [0; 6];
    out[..a.len()].copy_from_slice(a);
    out
}

/// A client calls a server that is not yet receiving, the server picks the
/// call up, replies, and the client resumes with the reply words
#[test]
fn test_call_receive_reply() {
    let mut sys = System::boot();
    let ep = sys.endpoint();
    let (server, _) = sys.spawn();
    let server_ep = sys.share(server, ep);
    sys.kernel.resume(server).unwrap();
    let client = sys.root();

    sys.kernel.set_message(client, MessageBuffer::from_data(&[10, 20]).unwrap()).unwrap();
    let call = sys.kernel.dispatch(CPU, SyscallArgs::new(numbers::IPC_CALL, args(&[ep as u64])));
    assert!(call.is_ok());
    assert_eq!(call.switch.and_then(|s| s.to), Some(server));
    assert_eq!(sys.kernel.task_state(client), Ok(TaskState::Waiting));

    let recv = sys.kernel.dispatch(CPU, SyscallArgs::new(numbers::IPC_RECEIVE, args(&[server_ep as u64, 1])));
    assert!(recv.is_ok());
    assert_eq!(recv.value, MessageBuffer::from_data(&[10, 20]).unwrap().header());
    assert_eq!(sys.kernel.message(server).unwrap().data(), &[10, 20]);
    // Linked as the server's caller, not runnable yet
    assert_eq!(sys.kernel.task_state(client), Ok(TaskState::Waiting));
    assert_eq!(sys.kernel.task(client).unwrap().blocked(), Some(Blocked::Reply { callee: server }));

    sys.kernel.set_message(server, MessageBuffer::from_data(&[30]).unwrap()).unwrap();
    let reply = sys.kernel.dispatch(CPU, SyscallArgs::new(numbers::IPC_REPLY, args(&[server_ep as u64])));
    assert!(reply.is_ok());
    assert_eq!(sys.kernel.task_state(client), Ok(TaskState::Ready));
    assert_eq!(sys.kernel.message(client).unwrap().data(), &[30]);
}

/// A sender arriving at a parked receiver hands the message over without
/// the receiver queueing again
#[test]
fn test_rendezvous_fast_path() {
    let mut sys = System::boot();
    let ep = sys.endpoint();
    let (peer, _) = sys.spawn();
    let theirs = sys.share(peer, ep);
    sys.kernel.resume(peer).unwrap();
    sys.kernel.switch_to(CPU, peer).unwrap();
    let parked = sys.kernel.receive(CPU, theirs, true).unwrap();
    assert_eq!(parked.status, IpcStatus::Blocked);

    sys.kernel.set_message(sys.root(), MessageBuffer::from_data(&[99]).unwrap()).unwrap();
    let sent = sys.kernel.send(CPU, ep, true).unwrap();
    assert_eq!(sent.status, IpcStatus::Delivered);
    assert_eq!(sys.kernel.current(CPU), Some(peer));
    assert_eq!(sys.kernel.message(peer).unwrap().data(), &[99]);
    let endpoint = sys.kernel.capability(sys.root(), ep).unwrap().as_endpoint().unwrap().endpoint();
    assert!(!sys.kernel.endpoint(endpoint).unwrap().has_waiters());
}

/// One page of memory funds exactly one task
#[test]
fn test_task_from_single_page() {
    let mut sys = System::boot();
    let root = sys.root();
    let page = sys.free();
    sys.kernel
        .create_memory_object(root, page, sys.boot.memory, 4096, 4096, MemoryFlags::RWX)
        .unwrap();

    let make_args = |sys: &mut System| {
        let memory = sys.boot.memory;
        let cap_space = sys.free();
        sys.kernel.create_cap_space_object(root, cap_space, memory).unwrap();
        let root_table = sys.free();
        sys.kernel.create_page_table_object(root, root_table, memory, 2).unwrap();
        let window_table = sys.free();
        sys.kernel.create_page_table_object(root, window_table, memory, 0).unwrap();
        TaskArgs { cap_space, root_table, window_table }
    };

    let first = make_args(&mut sys);
    let dest = sys.free();
    sys.kernel.create_task_object(root, dest, page, first).unwrap();
    let second = make_args(&mut sys);
    let dest = sys.free();
    assert_eq!(sys.kernel.create_task_object(root, dest, page, second), Err(Error::Exhausted));
    assert!(sys.kernel.capability(root, dest).unwrap().is_null());
}

/// Capabilities handed to a child are gone after the parent revokes
#[test]
fn test_revoke_reaches_delegated_capabilities() {
    let mut sys = System::boot();
    let root = sys.root();
    let region = sys.free();
    sys.kernel
        .create_memory_object(root, region, sys.boot.memory, 1 << 16, 4096, MemoryFlags::RWX)
        .unwrap();
    let ep = sys.free();
    sys.kernel.create_endpoint_object(root, ep, region).unwrap();
    let (child, _) = sys.spawn();
    let given = sys.kernel.delegate(child, root, ep).unwrap();
    assert!(sys.kernel.capability(child, given).unwrap().as_endpoint().is_ok());

    let ret = sys.kernel.dispatch(CPU, SyscallArgs::new(numbers::CAP_REVOKE, args(&[region as u64])));
    assert!(ret.is_ok());
    assert!(sys.kernel.capability(child, given).unwrap().is_null());
    assert!(sys.kernel.capability(root, ep).unwrap().is_null());
    assert!(sys.kernel.capability(root, region).unwrap().as_memory().is_ok());
}

/// Attenuated endpoint copies only allow what they kept
#[test]
fn test_send_only_endpoint() {
    let mut sys = System::boot();
    let ep = sys.endpoint();
    let send_only = sys
        .kernel
        .dispatch(
            CPU,
            SyscallArgs::new(numbers::CAP_COPY, args(&[ep as u64, EndpointRights::SEND.bits() as u64])),
        )
        .value;
    let recv = sys.kernel.dispatch(CPU, SyscallArgs::new(numbers::IPC_RECEIVE, args(&[send_only, 0])));
    assert_eq!(recv.error(), Some(Error::PermissionDenied));
    let send = sys.kernel.dispatch(CPU, SyscallArgs::new(numbers::IPC_SEND, args(&[send_only, 0])));
    assert_eq!(send.error(), Some(Error::WouldBlock));
}

/// Lookups through a task entry that was never used always fail
#[test]
fn test_lookup_on_unused_task() {
    let sys = System::boot();
    let unused = keel_kernel::objects::TaskId::new(7, 0);
    for index in [0usize, 1, 2, 63, 64, 1 << 20] {
        assert_eq!(sys.kernel.lookup(unused, index), Err(Error::NotFound));
    }
}
