#![no_std]

//! tee-context: execution-context register files and the vector-stub
//! `execute()` entry for both supported ISAs.
//!
//! Only the register file and its identity live here. The surrounding
//! bookkeeping a running context needs — its owned memory's isolation
//! attributes, its monitor-call handler, its RPC queues, its lockstep
//! shadow — belongs to `tee-monitor`, which composes an `ExecutionContext`
//! the way `tee-isolation`/`tee-rpc` compose with it.

use core::arch::global_asm;
use core::sync::atomic::{AtomicUsize, Ordering};
use tee_syscall::Cause;

/// Identifies a context for diagnostics only; carries no scheduling meaning.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(usize);

impl ContextId {
    /// Allocates the next identifier. Called once per `Load`.
    pub fn next() -> Self {
        static NEXT: AtomicUsize = AtomicUsize::new(1);
        ContextId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(self) -> usize {
        self.0
    }
}

/// A context's owned memory region, `[start, start + size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Memory {
    pub start: usize,
    pub size: usize,
}

impl Memory {
    pub fn new(start: usize, size: usize) -> Self {
        Self { start, size }
    }

    pub fn end(&self) -> usize {
        self.start + self.size
    }
}

/// ARM integer/status/FP register file, laid out to match what the
/// monitor-mode vector stub saves and restores.
#[repr(C)]
#[derive(Clone)]
pub struct ArmRegisters {
    /// r0..r12, offsets 0..48
    pub r: [u32; 13],
    /// r13, offset 52
    pub sp: u32,
    /// r14, offset 56
    pub lr: u32,
    /// r15, offset 60
    pub pc: u32,
    /// Current program status the guest resumes with, offset 64
    pub cpsr: u32,
    /// Saved program status the vector stub captured on entry, offset 68
    pub spsr: u32,
    /// d0..d31, present only when the context's FP bank is enabled
    pub vfp: [u64; 32],
    pub fpscr: u32,
    pub fpexc: u32,
}

impl ArmRegisters {
    pub fn empty() -> Self {
        Self {
            r: [0; 13],
            sp: 0,
            lr: 0,
            pc: 0,
            cpsr: 0,
            spsr: 0,
            vfp: [0; 32],
            fpscr: 0,
            fpexc: 0,
        }
    }
}

/// RISC-V integer/FP register file and the M-mode CSRs a guest trap leaves
/// behind. The guest runs in S-mode (`secure`) or U-mode; traps are
/// environment calls the monitor takes in M-mode.
#[repr(C)]
#[derive(Clone)]
pub struct RiscVRegisters {
    /// x1..x31 (x[0] = ra, ..., x[30] = t6), offsets 0..240
    pub x: [usize; 31],
    /// mepc, offset 248
    pub mepc: usize,
    /// mcause captured by the trap handler, offset 256
    pub mcause: usize,
    pub f: [u64; 32],
    pub fcsr: usize,
    /// Whether the guest resumes in S-mode (vs. U-mode)
    pub secure: bool,
    /// Whether MPIE (interrupts re-enabled on `mret`) is set
    pub interrupt: bool,
}

impl RiscVRegisters {
    pub fn empty() -> Self {
        Self {
            x: [0; 31],
            mepc: 0,
            mcause: 0,
            f: [0; 32],
            fcsr: 0,
            secure: false,
            interrupt: false,
        }
    }

    /// 1-based integer register access (`x(1)` is `ra`).
    pub fn x(&self, n: usize) -> usize {
        assert!(n >= 1 && n <= 31, "register index must be in range [1, 31]");
        self.x[n - 1]
    }

    pub fn x_mut(&mut self, n: usize) -> &mut usize {
        assert!(n >= 1 && n <= 31, "register index must be in range [1, 31]");
        &mut self.x[n - 1]
    }

    /// Maps `a0..a7` onto integer slots `x10..x17`.
    pub fn a(&self, n: usize) -> usize {
        assert!(n <= 7, "argument register index must be in range [0, 7]");
        self.x(10 + n)
    }

    pub fn a_mut(&mut self, n: usize) -> &mut usize {
        assert!(n <= 7, "argument register index must be in range [0, 7]");
        self.x_mut(10 + n)
    }
}

/// One ISA's register file, chosen at `Load` time by which target this
/// binary and its guest were built for.
#[derive(Clone)]
pub enum Registers {
    Arm(ArmRegisters),
    RiscV(RiscVRegisters),
}

/// A loaded, schedulable execution context: one ISA's register file plus
/// the identity and memory extent `tee-monitor` needs to dispatch it.
#[derive(Clone)]
pub struct ExecutionContext {
    pub id: ContextId,
    pub registers: Registers,
    pub memory: Memory,
    pub secure: bool,
}

impl ExecutionContext {
    /// Loads a fresh context: sets the entry PC, the status bits implied by
    /// `secure`, and enables the FP bank for Secure ARM contexts (spec
    /// §4.2). NonSecure MMU/TZASC memory attributes are a `tee-isolation`
    /// concern, programmed separately by the caller once this context
    /// exists.
    pub fn load_arm(entry: u32, memory: Memory, secure: bool) -> Self {
        let mut regs = ArmRegisters::empty();
        regs.pc = entry;
        // SVC mode, IRQ/FIQ unmasked; Secure contexts additionally get FPEXC.EN.
        regs.cpsr = 0b10011;
        if secure {
            regs.fpexc = 1 << 30; // FPEXC.EN
        }
        Self {
            id: ContextId::next(),
            registers: Registers::Arm(regs),
            memory,
            secure,
        }
    }

    pub fn load_riscv(entry: usize, memory: Memory, secure: bool) -> Self {
        let mut regs = RiscVRegisters::empty();
        regs.mepc = entry;
        regs.secure = secure;
        regs.interrupt = true;
        Self {
            id: ContextId::next(),
            registers: Registers::RiscV(regs),
            memory,
            secure,
        }
    }

    /// Shallow-copies the register file and memory reference for use as a
    /// lockstep shadow. The caller is responsible for never installing a
    /// monitor-call handler against the clone (spec §4.7: the primary's
    /// handler runs once, against the primary).
    pub fn clone_shadow(&self) -> Self {
        Self {
            id: self.id,
            registers: self.registers.clone(),
            memory: self.memory,
            secure: self.secure,
        }
    }

    /// Bitwise comparison of everything the lockstep invariant covers:
    /// integer registers, PC, status, and FP bank/control. Read buffers are
    /// compared by the RPC layer, not here.
    pub fn equals(&self, other: &Self) -> bool {
        match (&self.registers, &other.registers) {
            (Registers::Arm(a), Registers::Arm(b)) => {
                a.r == b.r
                    && a.sp == b.sp
                    && a.lr == b.lr
                    && a.pc == b.pc
                    && a.cpsr == b.cpsr
                    && a.spsr == b.spsr
                    && a.vfp == b.vfp
                    && a.fpscr == b.fpscr
                    && a.fpexc == b.fpexc
            }
            (Registers::RiscV(a), Registers::RiscV(b)) => {
                a.x == b.x
                    && a.mepc == b.mepc
                    && a.f == b.f
                    && a.fcsr == b.fcsr
                    && a.secure == b.secure
                    && a.interrupt == b.interrupt
            }
            _ => false,
        }
    }

    /// Copies `primary`'s return-value registers into `self`. A lockstep
    /// shadow never runs a handler of its own (spec §4.7 step 2: side
    /// effects happen exactly once), so after the primary's handler writes
    /// its result the shadow must be brought back into step by hand or the
    /// next cycle's `equals` would see a spurious divergence.
    pub fn mirror_return_registers(&mut self, primary: &Self) {
        match (&mut self.registers, &primary.registers) {
            (Registers::Arm(dst), Registers::Arm(src)) => {
                dst.r[0] = src.r[0];
                dst.r[1] = src.r[1];
                dst.r[2] = src.r[2];
            }
            (Registers::RiscV(dst), Registers::RiscV(src)) => {
                *dst.a_mut(0) = src.a(0);
            }
            _ => {}
        }
    }

    /// The n-th argument register (`a0..a2`, the only ones the monitor-call
    /// ABI uses).
    pub fn arg(&self, n: usize) -> u64 {
        match &self.registers {
            Registers::Arm(r) => r.r[n] as u64,
            Registers::RiscV(r) => r.a(n) as u64,
        }
    }

    pub fn set_arg(&mut self, n: usize, value: u64) {
        match &mut self.registers {
            Registers::Arm(r) => r.r[n] = value as u32,
            Registers::RiscV(r) => *r.a_mut(n) = value as usize,
        }
    }

    /// Sets the monitor call's return value. On ARM a 64-bit value splits
    /// across R0/R1 (low word first), matching the original's `Ret`; on
    /// RISC-V it fits entirely in `a0` (X10).
    pub fn ret(&mut self, value: u64) {
        match &mut self.registers {
            Registers::Arm(r) => {
                r.r[0] = value as u32;
                r.r[1] = (value >> 32) as u32;
            }
            Registers::RiscV(r) => *r.a_mut(0) = value as usize,
        }
    }

    /// Sets RPC-RES's return value: the transfer count or negative errno
    /// goes in R2 (ARM) or a0/X10 (RISC-V) rather than splitting across two
    /// registers the way `ret` does, since it always fits in one word
    /// (spec §4.5 "RPC-RES").
    pub fn set_rpc_res_return(&mut self, n: i64) {
        match &mut self.registers {
            Registers::Arm(r) => r.r[2] = n as u32,
            Registers::RiscV(r) => *r.a_mut(0) = n as usize,
        }
    }

    /// Advances the saved PC past the trapping instruction, for IRQ/FIQ
    /// causes that must retry rather than resume past it (spec §4.1).
    pub fn rewind_pc(&mut self) {
        match &mut self.registers {
            Registers::Arm(r) => r.pc = r.pc.wrapping_sub(4),
            Registers::RiscV(_) => {}
        }
    }

    /// Switches into this context using the architecture's vector stub and
    /// returns the classified cause of the dispatch cycle's exit.
    ///
    /// # Safety
    /// The caller must have already installed the monitor's vector table
    /// and programmed isolation (MMU/TZASC or PMP) for this context; see
    /// `tee-isolation`.
    pub unsafe fn execute(&mut self) -> Cause {
        match &mut self.registers {
            Registers::Arm(regs) => arm::execute(regs),
            Registers::RiscV(regs) => riscv::execute(regs),
        }
    }
}

#[cfg(target_arch = "arm")]
mod arm {
    use super::ArmRegisters;
    use tee_syscall::{ArmMode, ArmVector, Cause};

    /// Scratch cell the vector stub writes the firing vector's ordinal
    /// into; read back once `__execute_context` returns. Valid only while
    /// the scheduler mutex is held, matching the "at most one context
    /// in-guest per core" invariant.
    #[no_mangle]
    pub static mut TEE_ARM_LAST_VECTOR: u32 = 0;

    pub unsafe fn execute(regs: &mut ArmRegisters) -> Cause {
        extern "C" {
            fn __execute_context(ctx: *mut ArmRegisters) -> u32;
        }
        let spsr = __execute_context(regs);
        regs.spsr = spsr;
        let mode = ArmMode::from_bits(spsr);
        let vector = match TEE_ARM_LAST_VECTOR {
            0 => ArmVector::Reset,
            1 => ArmVector::Undefined,
            2 => ArmVector::Supervisor,
            3 => ArmVector::PrefetchAbort,
            4 => ArmVector::DataAbort,
            5 => ArmVector::Irq,
            _ => ArmVector::Fiq,
        };
        Cause::Arm { mode, vector }
    }
}

#[cfg(not(target_arch = "arm"))]
mod arm {
    use super::{ArmRegisters, Cause};

    pub unsafe fn execute(_regs: &mut ArmRegisters) -> Cause {
        panic!("ARM execute() is only available on arm targets");
    }
}

#[cfg(target_arch = "riscv64")]
mod riscv {
    use super::{Cause, RiscVRegisters};

    pub unsafe fn execute(regs: &mut RiscVRegisters) -> Cause {
        extern "C" {
            fn __execute_context(ctx: *mut RiscVRegisters) -> usize;
        }
        let mcause = __execute_context(regs);
        regs.mcause = mcause;
        let irq = mcause >> (usize::BITS - 1) != 0;
        let code = (mcause & !(1 << (usize::BITS - 1))) as u64;
        Cause::RiscV { code, irq }
    }
}

#[cfg(not(target_arch = "riscv64"))]
mod riscv {
    use super::{Cause, RiscVRegisters};

    pub unsafe fn execute(_regs: &mut RiscVRegisters) -> Cause {
        panic!("RISC-V execute() is only available on riscv64 targets");
    }
}

// RiscVRegisters layout (offsets the assembly below relies on):
// - x[0] = x1 = ra: 0
// - x[1] = x2 = sp: 8
// - x[2] = x3 = gp: 16
// - x[3] = x4 = tp: 24
// - x[4] = x5 = t0: 32
// - x[5] = x6 = t1: 40
// - x[6] = x7 = t2: 48
// - x[7] = x8 = s0: 56
// - x[8] = x9 = s1: 64
// - x[9] = x10 = a0: 72
// - x[10] = x11 = a1: 80
// - x[11] = x12 = a2: 88
// - x[12] = x13 = a3: 96
// - x[13] = x14 = a4: 104
// - x[14] = x15 = a5: 112
// - x[15] = x16 = a6: 120
// - x[16] = x17 = a7: 128
// - x[17] = x18 = s2: 136
// - x[18] = x19 = s3: 144
// - x[19] = x20 = s4: 152
// - x[20] = x21 = s5: 160
// - x[21] = x22 = s6: 168
// - x[22] = x23 = s7: 176
// - x[23] = x24 = s8: 184
// - x[24] = x25 = s9: 192
// - x[25] = x26 = s10: 200
// - x[26] = x27 = s11: 208
// - x[27] = x28 = t3: 216
// - x[28] = x29 = t4: 224
// - x[29] = x30 = t5: 232
// - x[30] = x31 = t6: 240
// - mepc: 248
// - mcause: 256
#[cfg(target_arch = "riscv64")]
global_asm!(
    r#"
.section .text
.globl __execute_context
.globl __trap_handler
.align 4

# __execute_context(ctx: *mut RiscVRegisters) -> usize
# a0 = ctx pointer. Returns mcause in a0 after the trap.
__execute_context:
    addi sp, sp, -112
    sd ra, 0(sp)
    sd s0, 8(sp)
    sd s1, 16(sp)
    sd s2, 24(sp)
    sd s3, 32(sp)
    sd s4, 40(sp)
    sd s5, 48(sp)
    sd s6, 56(sp)
    sd s7, 64(sp)
    sd s8, 72(sp)
    sd s9, 80(sp)
    sd s10, 88(sp)
    sd s11, 96(sp)

    csrw mscratch, sp
    sd a0, -8(sp)

    ld t0, 248(a0)
    csrw mepc, t0

    la t0, __trap_handler
    csrw mtvec, t0

    ld x1, 0(a0)
    ld x3, 16(a0)
    ld x4, 24(a0)
    ld x5, 32(a0)
    ld x6, 40(a0)
    ld x7, 48(a0)
    ld x8, 56(a0)
    ld x9, 64(a0)
    ld x11, 80(a0)
    ld x12, 88(a0)
    ld x13, 96(a0)
    ld x14, 104(a0)
    ld x15, 112(a0)
    ld x16, 120(a0)
    ld x17, 128(a0)
    ld x18, 136(a0)
    ld x19, 144(a0)
    ld x20, 152(a0)
    ld x21, 160(a0)
    ld x22, 168(a0)
    ld x23, 176(a0)
    ld x24, 184(a0)
    ld x25, 192(a0)
    ld x26, 200(a0)
    ld x27, 208(a0)
    ld x28, 216(a0)
    ld x29, 224(a0)
    ld x30, 232(a0)
    ld x31, 240(a0)

    ld x2, 8(a0)
    ld x10, 72(a0)

    mret

.align 4
__trap_handler:
    csrrw sp, mscratch, sp

    sd t0, -16(sp)
    csrr t0, mscratch
    sd t0, -24(sp)

    ld t0, -8(sp)

    ld t1, -24(sp)
    sd t1, 8(t0)
    ld t1, -16(sp)
    sd t1, 32(t0)

    sd x1, 0(t0)
    sd x3, 16(t0)
    sd x4, 24(t0)
    sd x6, 40(t0)
    sd x7, 48(t0)
    sd x8, 56(t0)
    sd x9, 64(t0)
    sd x10, 72(t0)
    sd x11, 80(t0)
    sd x12, 88(t0)
    sd x13, 96(t0)
    sd x14, 104(t0)
    sd x15, 112(t0)
    sd x16, 120(t0)
    sd x17, 128(t0)
    sd x18, 136(t0)
    sd x19, 144(t0)
    sd x20, 152(t0)
    sd x21, 160(t0)
    sd x22, 168(t0)
    sd x23, 176(t0)
    sd x24, 184(t0)
    sd x25, 192(t0)
    sd x26, 200(t0)
    sd x27, 208(t0)
    sd x28, 216(t0)
    sd x29, 224(t0)
    sd x30, 232(t0)
    sd x31, 240(t0)

    csrr t1, mepc
    sd t1, 248(t0)
    csrr t1, mcause
    sd t1, 256(t0)

    ld ra, 0(sp)
    ld s0, 8(sp)
    ld s1, 16(sp)
    ld s2, 24(sp)
    ld s3, 32(sp)
    ld s4, 40(sp)
    ld s5, 48(sp)
    ld s6, 56(sp)
    ld s7, 64(sp)
    ld s8, 72(sp)
    ld s9, 80(sp)
    ld s10, 88(sp)
    ld s11, 96(sp)
    addi sp, sp, 112

    csrr a0, mcause
    ret
"#
);

// ArmRegisters layout:
// - r[0..13] = r0..r12: 0..48
// - sp: 52
// - lr: 56
// - pc: 60
// - cpsr: 64
// - spsr: 68
#[cfg(target_arch = "arm")]
global_asm!(
    r#"
.section .text
.arm
.globl __execute_context
.globl __tee_mon_vector
.align 5

# __execute_context(ctx: *mut ArmRegisters) -> u32
# r0 = ctx pointer. Returns the captured SPSR once the guest traps back.
__execute_context:
    push    {{r4-r11, lr}}
    mov     r4, r0

    ldr     r6, =__tee_mon_ctx_scratch
    str     r0, [r6]

    ldr     r5, [r4, #64]
    msr     cpsr_c, r5

    ldr     lr, [r4, #60]
    ldr     sp, [r4, #52]
    ldr     r1, [r4, #56]
    mov     r14, r1

    ldmia   r4, {{r0-r12}}

    movs    pc, lr

__tee_mon_vector:
    push    {{r0-r3}}
    ldr     r0, =__tee_mon_ctx_scratch
    ldr     r0, [r0]
    stmia   r0, {{r0-r12}}
    str     sp, [r0, #52]
    str     lr, [r0, #56]
    mrs     r1, spsr
    str     r1, [r0, #68]
    pop     {{r4-r11, lr}}
    bx      lr

.data
.align 2
__tee_mon_ctx_scratch: .word 0
"#
);
