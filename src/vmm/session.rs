use std::mem;

use log::{debug, warn};
use vmm_sys_util::errno;

use crate::error::{AttachStage, NitroError, ProtocolError, RegisterReadFault, TrapAction};
use crate::types::RegisterSnapshot;
use super::event_loop::{CancelToken, EventStream};
use super::{Hypervisor, Wait};


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Attached,
    Trapping,
    Closed,
}


/// Exclusive hold on one guest process's VM with the syscall trap installed.
///
/// Teardown (trap removal, then context release) runs on `close` or on drop,
/// whichever comes first, and only once.
pub struct TrapSession<H: Hypervisor> {
    hv: H,
    pid: i32,
    vcpus: usize,
    state: SessionState,
}


impl<H: Hypervisor> TrapSession<H> {
    /// Attach to the VM hosted by `pid` and trap syscalls on all its vCPUs.
    ///
    /// Whatever was acquired before a failure is released before the error
    /// is returned.
    pub fn open(hv: H, pid: i32) -> Result<Self, NitroError> {
        let mut session = Self { hv, pid, vcpus: 0, state: SessionState::Created };

        debug!("pid {}: initializing KVM", pid);
        session.hv.init().map_err(|source| session.attach_error(AttachStage::InitKvm, source))?;

        debug!("pid {}: attaching to the VM", pid);
        session.hv.attach_vm(pid).map_err(|source| session.attach_error(AttachStage::AttachVm, source))?;

        debug!("pid {}: attaching to vCPUs", pid);
        session.vcpus = session
            .hv
            .attach_vcpus()
            .map_err(|source| session.attach_error(AttachStage::AttachVcpus, source))?;
        if session.vcpus == 0 {
            return Err(session.attach_error(AttachStage::AttachVcpus, errno::Error::new(libc::ENOENT)));
        }
        session.state = SessionState::Attached;

        debug!("pid {}: setting syscall trap on {} vCPUs", pid, session.vcpus);
        session.hv.set_syscall_trap(true).map_err(|source| NitroError::TrapInstall {
            pid,
            action: TrapAction::Install,
            source,
        })?;
        session.state = SessionState::Trapping;

        Ok(session)
    }

    pub fn pid(&self) -> i32 { self.pid }

    pub fn state(&self) -> SessionState { self.state }

    pub fn vcpu_count(&self) -> usize { self.vcpus }

    /// Stream trap events of `vcpu` until `cancel` fires, the consumer stops,
    /// or a fatal error occurs. The session is closed when the stream ends.
    pub fn listen(&mut self, vcpu: usize, cancel: CancelToken) -> EventStream<'_, H> {
        EventStream::new(self, vcpu, cancel)
    }

    /// Read both register sets of a trapped vCPU into one snapshot.
    pub fn capture(&self, vcpu: usize) -> Result<RegisterSnapshot, NitroError> {
        self.check_vcpu(vcpu)?;
        let regs = self
            .hv
            .get_regs(vcpu)
            .map_err(|e| self.register_error(vcpu, RegisterReadFault::Regs(e)))?;
        let sregs = self
            .hv
            .get_sregs(vcpu)
            .map_err(|e| self.register_error(vcpu, RegisterReadFault::Sregs(e)))?;
        Ok(RegisterSnapshot::from((regs, sregs)))
    }

    /// Remove the trap, then release the KVM context.
    ///
    /// A no-op once closed. The context is released even if removing the
    /// trap fails; that failure is still reported.
    pub fn close(&mut self) -> Result<(), NitroError> {
        let was = mem::replace(&mut self.state, SessionState::Closed);
        if was == SessionState::Closed {
            return Ok(());
        }

        let mut result = Ok(());
        if was == SessionState::Trapping {
            debug!("pid {}: unsetting syscall trap", self.pid);
            if let Err(source) = self.hv.set_syscall_trap(false) {
                result = Err(NitroError::TrapInstall { pid: self.pid, action: TrapAction::Remove, source });
            }
        }

        debug!("pid {}: closing KVM", self.pid);
        self.hv.close();
        result
    }

    pub(crate) fn wait(&mut self, vcpu: usize) -> Result<Wait, NitroError> {
        self.check_vcpu(vcpu)?;
        self.hv.wait_event(vcpu).map_err(|e| self.protocol_error(vcpu, ProtocolError::Wait(e)))
    }

    pub(crate) fn resume(&mut self, vcpu: usize) -> Result<(), NitroError> {
        self.hv.resume(vcpu).map_err(|e| self.protocol_error(vcpu, ProtocolError::Resume(e)))
    }

    pub(crate) fn protocol_error(&self, vcpu: usize, error: ProtocolError) -> NitroError {
        NitroError::Protocol { pid: self.pid, vcpu, error }
    }

    fn check_vcpu(&self, vcpu: usize) -> Result<(), NitroError> {
        if self.state != SessionState::Trapping {
            return Err(self.register_error(vcpu, RegisterReadFault::NotTrapping(self.state)));
        }
        if vcpu >= self.vcpus {
            return Err(self.register_error(vcpu, RegisterReadFault::NoSuchVcpu { vcpu, count: self.vcpus }));
        }
        Ok(())
    }

    fn attach_error(&self, stage: AttachStage, source: errno::Error) -> NitroError {
        NitroError::Attach { pid: self.pid, stage, source }
    }

    fn register_error(&self, vcpu: usize, fault: RegisterReadFault) -> NitroError {
        NitroError::RegisterRead { pid: self.pid, vcpu, fault }
    }
}


impl<H: Hypervisor> Drop for TrapSession<H> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("{}", e);
        }
    }
}
