use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, trace, warn};

use crate::error::NitroError;
use crate::event::{classify, Event};
use super::session::{SessionState, TrapSession};
use super::{Hypervisor, Wait};


/// Stop request shared between the event stream and whoever wants it to end
/// (a signal handler, another thread, a test).
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);


impl CancelToken {
    pub fn new() -> Self { Self::default() }

    pub fn cancel(&self) { self.0.store(true, Ordering::SeqCst); }

    pub fn is_cancelled(&self) -> bool { self.0.load(Ordering::SeqCst) }
}


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamExit {
    /// The cancel token fired between events.
    Cancelled,
    /// The consumer asked to stop.
    Stopped,
    /// The session was no longer trapping when the stream started.
    Closed,
}


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamSummary {
    pub syscalls: u64,
    pub sysreturns: u64,
    pub exit: StreamExit,
}


impl StreamSummary {
    pub fn events(&self) -> u64 { self.syscalls + self.sysreturns }
}


/// Single-shot production loop over one vCPU of a [`TrapSession`].
///
/// Each iteration waits for a trap, captures registers, classifies, hands
/// the event to the consumer and only then resumes the vCPU. Running the
/// stream consumes it and closes the session on the way out.
pub struct EventStream<'s, H: Hypervisor> {
    session: &'s mut TrapSession<H>,
    vcpu: usize,
    cancel: CancelToken,
}


impl<'s, H: Hypervisor> EventStream<'s, H> {
    pub(crate) fn new(session: &'s mut TrapSession<H>, vcpu: usize, cancel: CancelToken) -> Self {
        Self { session, vcpu, cancel }
    }

    /// Drive the stream, delivering every event to `consumer` in trap order.
    ///
    /// Returning `ControlFlow::Break` from the consumer ends the stream after
    /// the vCPU has been resumed.
    pub fn run<F>(mut self, mut consumer: F) -> Result<StreamSummary, NitroError>
    where
        F: FnMut(Event) -> ControlFlow<()>,
    {
        let mut summary = StreamSummary { syscalls: 0, sysreturns: 0, exit: StreamExit::Closed };
        let result = if self.session.state() == SessionState::Trapping {
            self.pump(&mut consumer, &mut summary)
        } else {
            Ok(StreamExit::Closed)
        };

        if let Err(e) = self.session.close() {
            warn!("{}", e);
        }

        let exit = result?;
        debug!(
            "pid {}: stream ended ({:?}) after {} events",
            self.session.pid(),
            exit,
            summary.events()
        );
        Ok(StreamSummary { exit, ..summary })
    }

    fn pump<F>(&mut self, consumer: &mut F, summary: &mut StreamSummary) -> Result<StreamExit, NitroError>
    where
        F: FnMut(Event) -> ControlFlow<()>,
    {
        let vcpu = self.vcpu;
        loop {
            if self.cancel.is_cancelled() {
                return Ok(StreamExit::Cancelled);
            }

            let tag = match self.session.wait(vcpu)? {
                Wait::Trap(tag) => tag,
                Wait::Interrupted => {
                    trace!("vcpu {}: wait interrupted", vcpu);
                    continue;
                }
            };

            let snapshot = self.session.capture(vcpu)?;
            let event = classify(tag, snapshot).map_err(|e| self.session.protocol_error(vcpu, e))?;
            trace!("vcpu {}: {}", vcpu, event);
            match event {
                Event::Syscall(_) => summary.syscalls += 1,
                Event::SysReturn(_) => summary.sysreturns += 1,
            }

            let flow = consumer(event);
            // The vCPU stays halted until resumed, whatever the consumer said.
            self.session.resume(vcpu)?;

            if flow.is_break() {
                return Ok(StreamExit::Stopped);
            }
        }
    }
}
