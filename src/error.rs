use std::fmt;

use thiserror::Error;
use vmm_sys_util::errno;

use crate::vmm::session::SessionState;


/// Step of session setup that failed to bind to the target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachStage {
    InitKvm,
    AttachVm,
    AttachVcpus,
}

impl fmt::Display for AttachStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachStage::InitKvm => write!(f, "initializing KVM"),
            AttachStage::AttachVm => write!(f, "attaching to the VM"),
            AttachStage::AttachVcpus => write!(f, "attaching to the vCPUs"),
        }
    }
}


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrapAction {
    Install,
    Remove,
}

impl fmt::Display for TrapAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrapAction::Install => write!(f, "install"),
            TrapAction::Remove => write!(f, "remove"),
        }
    }
}


/// Why a trap's register context could not be read.
#[derive(Debug, Error)]
pub enum RegisterReadFault {
    #[error("session is {0:?}, not trapping")]
    NotTrapping(SessionState),
    #[error("no vCPU {vcpu} (session has {count})")]
    NoSuchVcpu { vcpu: usize, count: usize },
    #[error("general registers: {0}")]
    Regs(#[source] errno::Error),
    #[error("system registers: {0}")]
    Sregs(#[source] errno::Error),
}


/// Violations of the trap protocol between the monitor and the hypervisor.
///
/// None of these leave a safe decision about resuming the vCPU.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("hypervisor reported an error event")]
    ErrorTag,
    #[error("unrecognized event tag {0}")]
    UnknownTag(i32),
    #[error("waiting for the next event failed: {0}")]
    Wait(#[source] errno::Error),
    #[error("resuming the vCPU failed: {0}")]
    Resume(#[source] errno::Error),
}


#[derive(Debug, Error)]
pub enum NitroError {
    #[error("failed to attach to process {pid} while {stage}: {source}")]
    Attach {
        pid: i32,
        stage: AttachStage,
        #[source]
        source: errno::Error,
    },

    #[error("failed to {action} the syscall trap for process {pid}: {source}")]
    TrapInstall {
        pid: i32,
        action: TrapAction,
        #[source]
        source: errno::Error,
    },

    #[error("failed to read registers of vCPU {vcpu} in process {pid}: {fault}")]
    RegisterRead {
        pid: i32,
        vcpu: usize,
        #[source]
        fault: RegisterReadFault,
    },

    #[error("trap protocol violated on vCPU {vcpu} in process {pid}: {error}")]
    Protocol {
        pid: i32,
        vcpu: usize,
        #[source]
        error: ProtocolError,
    },
}


impl NitroError {
    /// Process the failing session was bound to.
    pub fn pid(&self) -> i32 {
        match self {
            NitroError::Attach { pid, .. }
            | NitroError::TrapInstall { pid, .. }
            | NitroError::RegisterRead { pid, .. }
            | NitroError::Protocol { pid, .. } => *pid,
        }
    }
}
