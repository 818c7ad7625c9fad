use std::io::{self, Write};
use std::ops::ControlFlow;

use log::{info, warn};

use crate::config::{MonitorConfig, OutputFormat};
use crate::error::NitroError;
use crate::event::Event;
use super::event_loop::{CancelToken, StreamSummary};
use super::session::TrapSession;
use super::Hypervisor;


/// Attach to `config.pid`, write every event to `out` until `cancel` fires,
/// then tear the session down.
pub fn run_monitor<H, W>(
    hv: H,
    config: &MonitorConfig,
    cancel: CancelToken,
    out: &mut W,
) -> Result<StreamSummary, NitroError>
where
    H: Hypervisor,
    W: Write,
{
    // 1) attach + install the trap
    info!("attaching to pid {}", config.pid);
    let mut session = TrapSession::open(hv, config.pid)?;
    info!("trapping syscalls on {} vCPUs, streaming vCPU {}", session.vcpu_count(), config.vcpu);

    // 2) stream until cancelled; the stream closes the session on exit
    let summary = session.listen(config.vcpu, cancel).run(|event| {
        match write_event(out, &event, config.format) {
            Ok(()) => ControlFlow::Continue(()),
            Err(e) => {
                warn!("cannot write event, stopping: {}", e);
                ControlFlow::Break(())
            }
        }
    })?;

    info!(
        "pid {}: {} syscalls, {} sysreturns ({:?})",
        config.pid, summary.syscalls, summary.sysreturns, summary.exit
    );
    Ok(summary)
}


fn write_event<W: Write>(out: &mut W, event: &Event, format: OutputFormat) -> io::Result<()> {
    match format {
        OutputFormat::Text => writeln!(out, "{}", event)?,
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, event)?;
            writeln!(out)?;
        }
    }
    out.flush()
}
