/// How each event is written to the output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// One human-readable line per event (`SYSCALL rax = ..., cr3 = ...`).
    #[default]
    Text,
    /// One JSON object per line, with the full register snapshot.
    Json,
}


/// Configuration for monitoring one guest
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonitorConfig {
    /// PID of the hypervisor process hosting the guest (e.g. a QEMU instance)
    pub pid: i32,
    /// vCPU whose traps are streamed
    pub vcpu: usize,
    /// Output encoding
    pub format: OutputFormat,
}

impl MonitorConfig {
    pub fn for_pid(pid: i32) -> Self {
        Self { pid, ..Self::default() }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            pid: 0,
            vcpu: 0,
            format: OutputFormat::Text,
        }
    }
}
