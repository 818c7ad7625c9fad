//! Syscall-trap introspection for KVM guests.
//!
//! A [`TrapSession`] binds to the VM of a running hypervisor process and
//! traps system-call entry and return on its vCPUs; its [`EventStream`]
//! turns each trap into a typed [`Event`] carrying a full
//! [`RegisterSnapshot`], hands it to a consumer and resumes the guest.

pub mod config;
pub mod error;
pub mod event;
pub mod types;
pub mod vmm;


pub use crate::config::{MonitorConfig, OutputFormat};
pub use crate::error::{NitroError, ProtocolError};
pub use crate::event::{classify, Event, ERROR_TAG, SYSCALL_TAG, SYSRET_TAG};
pub use crate::types::RegisterSnapshot;
pub use crate::vmm::event_loop::{CancelToken, EventStream, StreamExit, StreamSummary};
pub use crate::vmm::kvm_ctx::NitroKvm;
pub use crate::vmm::run::run_monitor;
pub use crate::vmm::session::{SessionState, TrapSession};
pub use crate::vmm::{Hypervisor, Wait};
