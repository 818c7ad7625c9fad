use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::RegisterSnapshot;


/// Raw event tags returned by the hypervisor's get-event call.
pub const ERROR_TAG: i32 = 1;
pub const SYSCALL_TAG: i32 = 2;
pub const SYSRET_TAG: i32 = 3;


/// A classified trap. The hypervisor's error tag never becomes an `Event`;
/// it is rejected by [`classify`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    /// The vCPU trapped on system-call entry.
    Syscall(RegisterSnapshot),
    /// The vCPU trapped on system-call return.
    SysReturn(RegisterSnapshot),
}


impl Event {
    pub fn snapshot(&self) -> &RegisterSnapshot {
        match self {
            Event::Syscall(s) | Event::SysReturn(s) => s,
        }
    }
}


impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Syscall(s) => {
                write!(f, "SYSCALL rax = {:#x}, cr3 = {:#x}", s.regs().rax, s.sregs().cr3)
            }
            Event::SysReturn(_) => write!(f, "SYSRET"),
        }
    }
}


/// Turn a raw tag and the registers captured for it into an [`Event`].
///
/// The tag space is closed: anything other than the syscall and sysret
/// tags is a protocol violation.
pub fn classify(tag: i32, snapshot: RegisterSnapshot) -> Result<Event, ProtocolError> {
    match tag {
        SYSCALL_TAG => Ok(Event::Syscall(snapshot)),
        SYSRET_TAG => Ok(Event::SysReturn(snapshot)),
        ERROR_TAG => Err(ProtocolError::ErrorTag),
        other => Err(ProtocolError::UnknownTag(other)),
    }
}
