use std::fs::File;
use std::os::raw::c_int;
use std::os::unix::io::{AsRawFd, FromRawFd};

use kvm_bindings::{kvm_regs, kvm_sregs, KVMIO};
use kvm_ioctls::Kvm;
use log::debug;
use vmm_sys_util::errno;
use vmm_sys_util::ioctl::{ioctl, ioctl_with_mut_ref, ioctl_with_ref};
use vmm_sys_util::{ioctl_io_nr, ioctl_ioc_nr, ioctl_ior_nr, ioctl_iow_nr};

use super::{Hypervisor, Wait};


/// Upper bound on vCPUs the trap extension reports per VM.
pub const NITRO_MAX_VCPUS: usize = 64;


// Ioctls added by the nitro KVM extension.
ioctl_iow_nr!(KVM_NITRO_ATTACH_VM, KVMIO, 0xE1, c_int);
ioctl_ior_nr!(KVM_NITRO_ATTACH_VCPUS, KVMIO, 0xE2, NitroVcpus);
ioctl_iow_nr!(KVM_NITRO_SET_SYSCALL_TRAP, KVMIO, 0xE3, bool);
ioctl_io_nr!(KVM_NITRO_GET_EVENT, KVMIO, 0xE5);
ioctl_io_nr!(KVM_NITRO_CONTINUE, KVMIO, 0xE6);

// Standard vCPU register ioctls.
ioctl_ior_nr!(KVM_GET_REGS, KVMIO, 0x81, kvm_regs);
ioctl_ior_nr!(KVM_GET_SREGS, KVMIO, 0x83, kvm_sregs);


/// Layout filled in by `KVM_NITRO_ATTACH_VCPUS`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct NitroVcpus {
    pub num_vcpus: c_int,
    pub ids: [c_int; NITRO_MAX_VCPUS],
    pub fds: [c_int; NITRO_MAX_VCPUS],
}

impl Default for NitroVcpus {
    fn default() -> Self {
        Self { num_vcpus: 0, ids: [0; NITRO_MAX_VCPUS], fds: [-1; NITRO_MAX_VCPUS] }
    }
}


/// KVM context of a foreign guest, bound through the nitro extension.
///
/// Every fd is owned, so dropping the fields is what closes them.
#[derive(Default)]
pub struct NitroKvm {
    kvm: Option<Kvm>,
    vm: Option<File>,
    vcpus: Vec<File>,
}


impl NitroKvm {
    pub fn new() -> Self { Self::default() }

    fn kvm(&self) -> Result<&Kvm, errno::Error> {
        self.kvm.as_ref().ok_or_else(|| errno::Error::new(libc::EBADF))
    }

    fn vm(&self) -> Result<&File, errno::Error> {
        self.vm.as_ref().ok_or_else(|| errno::Error::new(libc::EBADF))
    }

    fn vcpu(&self, index: usize) -> Result<&File, errno::Error> {
        self.vcpus.get(index).ok_or_else(|| errno::Error::new(libc::EINVAL))
    }
}


impl Hypervisor for NitroKvm {
    fn init(&mut self) -> Result<(), errno::Error> {
        self.kvm = Some(Kvm::new()?);
        Ok(())
    }

    fn attach_vm(&mut self, pid: i32) -> Result<(), errno::Error> {
        let pid: c_int = pid;
        // SAFETY: the argument is a live c_int and the kernel only reads it.
        let ret = unsafe { ioctl_with_ref(self.kvm()?, KVM_NITRO_ATTACH_VM(), &pid) };
        if ret < 0 {
            return Err(errno::Error::last());
        }
        // SAFETY: on success the ioctl returns a fresh VM fd that nothing else owns.
        self.vm = Some(unsafe { File::from_raw_fd(ret) });
        debug!("attached to VM of pid {} (fd {})", pid, ret);
        Ok(())
    }

    fn attach_vcpus(&mut self) -> Result<usize, errno::Error> {
        let mut raw = NitroVcpus::default();
        // SAFETY: `raw` matches the layout the kernel writes into.
        let ret = unsafe { ioctl_with_mut_ref(self.vm()?, KVM_NITRO_ATTACH_VCPUS(), &mut raw) };
        if ret < 0 {
            return Err(errno::Error::last());
        }
        let count = usize::try_from(raw.num_vcpus)
            .unwrap_or(0)
            .min(NITRO_MAX_VCPUS);
        if count == 0 {
            return Err(errno::Error::new(libc::ENOENT));
        }
        // SAFETY: each reported fd is a new vCPU fd handed to us by the kernel.
        self.vcpus = raw.fds[..count]
            .iter()
            .map(|&fd| unsafe { File::from_raw_fd(fd) })
            .collect();
        debug!("attached {} vCPUs (ids {:?})", count, &raw.ids[..count]);
        Ok(count)
    }

    fn set_syscall_trap(&mut self, enabled: bool) -> Result<(), errno::Error> {
        // SAFETY: the kernel reads one bool.
        let ret = unsafe { ioctl_with_ref(self.vm()?, KVM_NITRO_SET_SYSCALL_TRAP(), &enabled) };
        if ret < 0 {
            return Err(errno::Error::last());
        }
        Ok(())
    }

    fn wait_event(&mut self, vcpu: usize) -> Result<Wait, errno::Error> {
        // SAFETY: no argument; the return value is the event tag.
        let ret = unsafe { ioctl(self.vcpu(vcpu)?, KVM_NITRO_GET_EVENT()) };
        if ret < 0 {
            let err = errno::Error::last();
            if err.errno() == libc::EINTR {
                return Ok(Wait::Interrupted);
            }
            return Err(err);
        }
        Ok(Wait::Trap(ret))
    }

    fn get_regs(&self, vcpu: usize) -> Result<kvm_regs, errno::Error> {
        let mut regs = kvm_regs::default();
        // SAFETY: `regs` is sized for KVM_GET_REGS.
        let ret = unsafe { ioctl_with_mut_ref(self.vcpu(vcpu)?, KVM_GET_REGS(), &mut regs) };
        if ret != 0 {
            return Err(errno::Error::last());
        }
        Ok(regs)
    }

    fn get_sregs(&self, vcpu: usize) -> Result<kvm_sregs, errno::Error> {
        let mut sregs = kvm_sregs::default();
        // SAFETY: `sregs` is sized for KVM_GET_SREGS.
        let ret = unsafe { ioctl_with_mut_ref(self.vcpu(vcpu)?, KVM_GET_SREGS(), &mut sregs) };
        if ret != 0 {
            return Err(errno::Error::last());
        }
        Ok(sregs)
    }

    fn resume(&mut self, vcpu: usize) -> Result<(), errno::Error> {
        // SAFETY: no argument.
        let ret = unsafe { ioctl(self.vcpu(vcpu)?, KVM_NITRO_CONTINUE()) };
        if ret < 0 {
            return Err(errno::Error::last());
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Some(kvm) = self.kvm.take() {
            debug!("closing KVM context (fd {}, {} vCPUs)", kvm.as_raw_fd(), self.vcpus.len());
        }
        self.vcpus.clear();
        self.vm = None;
    }
}
