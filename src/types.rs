use kvm_bindings::{kvm_dtable, kvm_regs, kvm_segment, kvm_sregs};
use serde::{Deserialize, Serialize};


/// General-purpose registers of a trapped vCPU, as reported by `KVM_GET_REGS`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralRegisters {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rsp: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rflags: u64,
}


impl From<kvm_regs> for GeneralRegisters {
    fn from(r: kvm_regs) -> Self {
        Self {
            rax: r.rax, rbx: r.rbx, rcx: r.rcx, rdx: r.rdx,
            rsi: r.rsi, rdi: r.rdi, rsp: r.rsp, rbp: r.rbp,
            r8: r.r8, r9: r.r9, r10: r.r10, r11: r.r11,
            r12: r.r12, r13: r.r13, r14: r.r14, r15: r.r15,
            rip: r.rip,
            rflags: r.rflags,
        }
    }
}


/// One segment register. Attribute flags are kept as the raw bytes KVM
/// hands back so the copy stays bit-exact.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub base: u64,
    pub limit: u32,
    pub selector: u16,
    #[serde(rename = "type")]
    pub type_: u8,
    pub dpl: u8,
    pub present: u8,
    /// Default operation size (D/B).
    pub db: u8,
    /// Descriptor type (S): 0 = system, 1 = code/data.
    pub s: u8,
    /// 64-bit code segment (L).
    pub l: u8,
    /// Granularity (G).
    pub g: u8,
    /// Available for system software (AVL).
    pub avl: u8,
    pub unusable: u8,
}


impl From<kvm_segment> for Segment {
    fn from(s: kvm_segment) -> Self {
        Self {
            base: s.base,
            limit: s.limit,
            selector: s.selector,
            type_: s.type_,
            dpl: s.dpl,
            present: s.present,
            db: s.db,
            s: s.s,
            l: s.l,
            g: s.g,
            avl: s.avl,
            unusable: s.unusable,
        }
    }
}


/// GDTR / IDTR contents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorTable {
    pub base: u64,
    pub limit: u16,
}


impl From<kvm_dtable> for DescriptorTable {
    fn from(t: kvm_dtable) -> Self { Self { base: t.base, limit: t.limit } }
}


/// Segment, descriptor-table, control registers and the few MSRs KVM
/// reports through `KVM_GET_SREGS`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemRegisters {
    pub cs: Segment,
    pub ds: Segment,
    pub es: Segment,
    pub fs: Segment,
    pub gs: Segment,
    pub ss: Segment,
    pub tr: Segment,
    pub ldt: Segment,
    pub gdt: DescriptorTable,
    pub idt: DescriptorTable,
    pub cr0: u64,
    pub cr2: u64,
    pub cr3: u64,
    pub cr4: u64,
    pub cr8: u64,
    pub efer: u64,
    pub apic_base: u64,
    /// Pending external interrupts, one bit per vector (256 bits).
    pub interrupt_bitmap: [u64; 4],
}


impl From<kvm_sregs> for SystemRegisters {
    fn from(s: kvm_sregs) -> Self {
        Self {
            cs: s.cs.into(),
            ds: s.ds.into(),
            es: s.es.into(),
            fs: s.fs.into(),
            gs: s.gs.into(),
            ss: s.ss.into(),
            tr: s.tr.into(),
            ldt: s.ldt.into(),
            gdt: s.gdt.into(),
            idt: s.idt.into(),
            cr0: s.cr0,
            cr2: s.cr2,
            cr3: s.cr3,
            cr4: s.cr4,
            cr8: s.cr8,
            efer: s.efer,
            apic_base: s.apic_base,
            interrupt_bitmap: s.interrupt_bitmap,
        }
    }
}


/// Full architectural state of one vCPU at a trap point.
///
/// Only ever built whole, from both register reads, and never mutated
/// afterwards: fields are private and there are no setters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSnapshot {
    regs: GeneralRegisters,
    sregs: SystemRegisters,
}


impl RegisterSnapshot {
    pub fn new(regs: GeneralRegisters, sregs: SystemRegisters) -> Self { Self { regs, sregs } }

    pub fn regs(&self) -> &GeneralRegisters { &self.regs }

    pub fn sregs(&self) -> &SystemRegisters { &self.sregs }
}


impl From<(kvm_regs, kvm_sregs)> for RegisterSnapshot {
    fn from(raw: (kvm_regs, kvm_sregs)) -> Self {
        let (regs, sregs) = raw;
        Self::new(regs.into(), sregs.into())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    // Every field gets a value derived from `seed` that no other field or
    // segment shares, so a crossed mapping shows up as a mismatch.
    fn raw_segment(seed: u8) -> kvm_segment {
        kvm_segment {
            base: 0x1000 * seed as u64,
            limit: 0x100 * seed as u32 + 1,
            selector: 0x10 * seed as u16 + 2,
            type_: seed + 3,
            present: seed + 4,
            dpl: seed + 5,
            db: seed + 6,
            s: seed + 7,
            l: seed + 8,
            g: seed + 9,
            avl: seed + 10,
            unusable: seed + 11,
            padding: 0,
        }
    }

    fn segment(seed: u8) -> Segment {
        Segment {
            base: 0x1000 * seed as u64,
            limit: 0x100 * seed as u32 + 1,
            selector: 0x10 * seed as u16 + 2,
            type_: seed + 3,
            present: seed + 4,
            dpl: seed + 5,
            db: seed + 6,
            s: seed + 7,
            l: seed + 8,
            g: seed + 9,
            avl: seed + 10,
            unusable: seed + 11,
        }
    }

    #[test]
    fn general_registers_copy_every_field() {
        let raw = kvm_regs {
            rax: 1, rbx: 2, rcx: 3, rdx: 4, rsi: 5, rdi: 6, rsp: 7, rbp: 8,
            r8: 9, r9: 10, r10: 11, r11: 12, r12: 13, r13: 14, r14: 15, r15: 16,
            rip: 0xffff_ffff_8100_0000,
            rflags: 0x246,
        };
        let expected = GeneralRegisters {
            rax: 1, rbx: 2, rcx: 3, rdx: 4, rsi: 5, rdi: 6, rsp: 7, rbp: 8,
            r8: 9, r9: 10, r10: 11, r11: 12, r12: 13, r13: 14, r14: 15, r15: 16,
            rip: 0xffff_ffff_8100_0000,
            rflags: 0x246,
        };
        assert_eq!(GeneralRegisters::from(raw), expected);
    }

    #[test]
    fn system_registers_copy_every_field() {
        let raw = kvm_sregs {
            cs: raw_segment(0x10),
            ds: raw_segment(0x20),
            es: raw_segment(0x30),
            fs: raw_segment(0x40),
            gs: raw_segment(0x50),
            ss: raw_segment(0x60),
            tr: raw_segment(0x70),
            ldt: raw_segment(0x80),
            gdt: kvm_dtable { base: 0xfffffe0000001000, limit: 0x7f, padding: [0; 3] },
            idt: kvm_dtable { base: 0xfffffe0000000000, limit: 0xfff, padding: [0; 3] },
            cr0: 0x8005_0033,
            cr2: 0x7f00_dead_b000,
            cr3: 0x1234_5000,
            cr4: 0x3606f0,
            cr8: 0xf,
            efer: 0xd01,
            apic_base: 0xfee0_0900,
            interrupt_bitmap: [1, 2, 3, 1 << 63],
        };
        let expected = SystemRegisters {
            cs: segment(0x10),
            ds: segment(0x20),
            es: segment(0x30),
            fs: segment(0x40),
            gs: segment(0x50),
            ss: segment(0x60),
            tr: segment(0x70),
            ldt: segment(0x80),
            gdt: DescriptorTable { base: 0xfffffe0000001000, limit: 0x7f },
            idt: DescriptorTable { base: 0xfffffe0000000000, limit: 0xfff },
            cr0: 0x8005_0033,
            cr2: 0x7f00_dead_b000,
            cr3: 0x1234_5000,
            cr4: 0x3606f0,
            cr8: 0xf,
            efer: 0xd01,
            apic_base: 0xfee0_0900,
            interrupt_bitmap: [1, 2, 3, 1 << 63],
        };
        assert_eq!(SystemRegisters::from(raw), expected);
    }

    #[test]
    fn snapshot_from_raw_pair() {
        let regs = kvm_regs { rax: 0x3c, ..Default::default() };
        let sregs = kvm_sregs { cr3: 0x2000, ..Default::default() };
        let snap = RegisterSnapshot::from((regs, sregs));
        assert_eq!(snap.regs().rax, 0x3c);
        assert_eq!(snap.sregs().cr3, 0x2000);
    }

    #[test]
    fn segment_type_serializes_as_type() {
        let json = serde_json::to_value(segment(0x10)).unwrap();
        assert_eq!(json["type"], 0x13_u64);
        assert!(json.get("type_").is_none());
    }
}
