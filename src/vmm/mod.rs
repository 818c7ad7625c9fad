pub mod kvm_ctx;
pub mod session;
pub mod event_loop;
pub mod run;
#[cfg(test)] pub(crate) mod stub;


use kvm_bindings::{kvm_regs, kvm_sregs};
use vmm_sys_util::errno;


/// Outcome of blocking for the next trap on a vCPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wait {
    /// A trap fired; the vCPU is halted until resumed.
    Trap(i32),
    /// The wait was interrupted (EINTR) before any trap; nothing to resume.
    Interrupted,
}


/// Primitives of the hypervisor-control backend the monitor drives.
///
/// Every call blocks until it completes. Only `wait_event` may block
/// indefinitely.
pub trait Hypervisor {
    /// Allocate the KVM context.
    fn init(&mut self) -> Result<(), errno::Error>;
    /// Bind the context to the VM hosted by `pid`.
    fn attach_vm(&mut self, pid: i32) -> Result<(), errno::Error>;
    /// Bind every vCPU of the attached VM; returns how many were found.
    fn attach_vcpus(&mut self) -> Result<usize, errno::Error>;
    /// Install or remove the syscall trap on all bound vCPUs.
    fn set_syscall_trap(&mut self, enabled: bool) -> Result<(), errno::Error>;
    fn wait_event(&mut self, vcpu: usize) -> Result<Wait, errno::Error>;
    fn get_regs(&self, vcpu: usize) -> Result<kvm_regs, errno::Error>;
    fn get_sregs(&self, vcpu: usize) -> Result<kvm_sregs, errno::Error>;
    fn resume(&mut self, vcpu: usize) -> Result<(), errno::Error>;
    /// Release everything. Safe to call in any state, any number of times.
    fn close(&mut self);
}
