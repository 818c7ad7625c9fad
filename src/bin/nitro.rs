//! Stream syscall traps of a running KVM guest.
//!
//! ```bash
//! # pid of the QEMU process hosting the guest (requires root)
//! sudo nitro 12345
//!
//! # full register snapshots as JSON lines, with lifecycle logging
//! sudo RUST_LOG=debug nitro --json 12345
//! ```

use std::io;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use clap::Parser;
use log::debug;

use nitro::{run_monitor, CancelToken, MonitorConfig, NitroKvm, OutputFormat};


#[derive(Parser)]
#[command(name = "nitro")]
#[command(about = "Trap and print system calls of a running KVM guest")]
#[command(version)]
struct Cli {
    /// PID of the hypervisor process hosting the guest.
    #[arg(value_parser = clap::value_parser!(i32).range(1..))]
    pid: i32,

    /// vCPU whose traps are streamed.
    #[arg(long, default_value = "0")]
    vcpu: usize,

    /// Print each event as a JSON object with full register state.
    #[arg(long)]
    json: bool,
}


fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    debug!("pid = {}", cli.pid);

    let config = MonitorConfig {
        pid: cli.pid,
        vcpu: cli.vcpu,
        format: if cli.json { OutputFormat::Json } else { OutputFormat::Text },
    };

    let cancel = CancelToken::new();
    install_signal_handlers(cancel.clone()).context("installing signal handlers")?;

    let stdout = io::stdout();
    run_monitor(NitroKvm::new(), &config, cancel, &mut stdout.lock())
        .with_context(|| format!("monitoring pid {}", config.pid))?;
    Ok(())
}


static CANCEL: OnceLock<CancelToken> = OnceLock::new();

extern "C" fn on_signal(_: libc::c_int) {
    if let Some(cancel) = CANCEL.get() {
        cancel.cancel();
    }
}

/// Route SIGINT and SIGTERM to `cancel`. Installed without `SA_RESTART` so a
/// wait blocked in the kernel returns EINTR and the stream can stop.
fn install_signal_handlers(cancel: CancelToken) -> io::Result<()> {
    let _ = CANCEL.set(cancel);
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        action.sa_flags = 0;
        libc::sigemptyset(&mut action.sa_mask);
        for signal in [libc::SIGINT, libc::SIGTERM] {
            if libc::sigaction(signal, &action, std::ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
    }
    Ok(())
}
