//! Scripted hypervisor for tests: replays a fixed trap sequence and journals
//! every primitive it receives.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use kvm_bindings::{kvm_regs, kvm_sregs};
use vmm_sys_util::errno;

use super::event_loop::CancelToken;
use super::{Hypervisor, Wait};


#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Init,
    AttachVm(i32),
    AttachVcpus,
    SetTrap(bool),
    Wait(usize),
    GetRegs(usize),
    GetSregs(usize),
    Resume(usize),
    Close,
    /// Pushed by test consumers when they receive an event.
    Delivered(String),
}


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailAt {
    Init,
    AttachVm,
    AttachVcpus,
    TrapOn,
    TrapOff,
    Regs,
    Sregs,
    Wait,
    Resume,
}


/// One scripted step returned by `wait_event`.
#[derive(Clone, Copy, Debug)]
pub enum Step {
    Trap { tag: i32, rax: u64, cr3: u64 },
    Interrupt,
}


pub type Journal = Rc<RefCell<Vec<Call>>>;


pub struct StubHypervisor {
    pub journal: Journal,
    pub fail_at: Option<FailAt>,
    pub vcpu_count: usize,
    script: VecDeque<Step>,
    current: Option<(u64, u64)>,
    on_exhausted: Option<CancelToken>,
}


impl StubHypervisor {
    pub fn new(script: impl IntoIterator<Item = Step>) -> Self {
        Self {
            journal: Rc::new(RefCell::new(Vec::new())),
            fail_at: None,
            vcpu_count: 1,
            script: script.into_iter().collect(),
            current: None,
            on_exhausted: None,
        }
    }

    /// Once the script runs dry, fire `cancel` and report an interrupted
    /// wait, like an operator hitting Ctrl-C while the guest is idle.
    pub fn cancel_when_exhausted(mut self, cancel: CancelToken) -> Self {
        self.on_exhausted = Some(cancel);
        self
    }

    pub fn failing_at(mut self, at: FailAt) -> Self {
        self.fail_at = Some(at);
        self
    }

    fn record(&self, call: Call) { self.journal.borrow_mut().push(call); }

    fn check(&self, at: FailAt, errno: i32) -> Result<(), errno::Error> {
        if self.fail_at == Some(at) { Err(errno::Error::new(errno)) } else { Ok(()) }
    }
}


impl Hypervisor for StubHypervisor {
    fn init(&mut self) -> Result<(), errno::Error> {
        self.record(Call::Init);
        self.check(FailAt::Init, libc::ENOENT)
    }

    fn attach_vm(&mut self, pid: i32) -> Result<(), errno::Error> {
        self.record(Call::AttachVm(pid));
        self.check(FailAt::AttachVm, libc::ESRCH)
    }

    fn attach_vcpus(&mut self) -> Result<usize, errno::Error> {
        self.record(Call::AttachVcpus);
        self.check(FailAt::AttachVcpus, libc::ENOENT)?;
        Ok(self.vcpu_count)
    }

    fn set_syscall_trap(&mut self, enabled: bool) -> Result<(), errno::Error> {
        self.record(Call::SetTrap(enabled));
        self.check(if enabled { FailAt::TrapOn } else { FailAt::TrapOff }, libc::EOPNOTSUPP)
    }

    fn wait_event(&mut self, vcpu: usize) -> Result<Wait, errno::Error> {
        self.record(Call::Wait(vcpu));
        self.check(FailAt::Wait, libc::EIO)?;
        match self.script.pop_front() {
            Some(Step::Trap { tag, rax, cr3 }) => {
                self.current = Some((rax, cr3));
                Ok(Wait::Trap(tag))
            }
            Some(Step::Interrupt) => Ok(Wait::Interrupted),
            None => match &self.on_exhausted {
                Some(cancel) => {
                    cancel.cancel();
                    Ok(Wait::Interrupted)
                }
                None => Err(errno::Error::new(libc::EIO)),
            },
        }
    }

    fn get_regs(&self, vcpu: usize) -> Result<kvm_regs, errno::Error> {
        self.record(Call::GetRegs(vcpu));
        self.check(FailAt::Regs, libc::EINVAL)?;
        let (rax, _) = self.current.unwrap_or_default();
        Ok(kvm_regs { rax, ..Default::default() })
    }

    fn get_sregs(&self, vcpu: usize) -> Result<kvm_sregs, errno::Error> {
        self.record(Call::GetSregs(vcpu));
        self.check(FailAt::Sregs, libc::EINVAL)?;
        let (_, cr3) = self.current.unwrap_or_default();
        Ok(kvm_sregs { cr3, ..Default::default() })
    }

    fn resume(&mut self, vcpu: usize) -> Result<(), errno::Error> {
        self.record(Call::Resume(vcpu));
        self.check(FailAt::Resume, libc::EIO)?;
        self.current = None;
        Ok(())
    }

    fn close(&mut self) { self.record(Call::Close); }
}
