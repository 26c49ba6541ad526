//! tee-syscall: monitor-call ABI constants, cause classification and
//! transfer-region validation shared by the TEE secure monitor.
//!
//! This crate has no architecture-specific code of its own; it only
//! defines the numbers and pure validation logic that `tee-context` and
//! `tee-monitor` build the actual dispatch on top of.

#![no_std]

use core::fmt;

/// Monitor-call number, passed in the guest's first argument register
/// (ARM R0, RISC-V X10).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallId(pub usize);

impl CallId {
    pub const EXIT: CallId = CallId(0);
    pub const WRITE: CallId = CallId(1);
    pub const NANOTIME: CallId = CallId(2);
    pub const GETRANDOM: CallId = CallId(3);
    pub const RPC_REQ: CallId = CallId(4);
    pub const RPC_RES: CallId = CallId(5);
}

impl From<usize> for CallId {
    fn from(value: usize) -> Self {
        CallId(value)
    }
}

/// ARM processor mode, decoded from the low 5 bits of CPSR/SPSR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmMode {
    Usr,
    Fiq,
    Irq,
    Svc,
    Mon,
    Abt,
    Und,
    Sys,
    Unknown(u32),
}

impl ArmMode {
    pub fn from_bits(psr: u32) -> Self {
        match psr & 0x1f {
            0b10000 => ArmMode::Usr,
            0b10001 => ArmMode::Fiq,
            0b10010 => ArmMode::Irq,
            0b10011 => ArmMode::Svc,
            0b10110 => ArmMode::Mon,
            0b10111 => ArmMode::Abt,
            0b11011 => ArmMode::Und,
            0b11111 => ArmMode::Sys,
            other => ArmMode::Unknown(other),
        }
    }

    /// Whether this mode is one of the accepted "normal return" causes for
    /// a dispatch cycle (monitor call, IRQ, FIQ, or a direct monitor entry).
    pub fn is_normal_return(&self) -> bool {
        matches!(self, ArmMode::Mon | ArmMode::Svc | ArmMode::Irq | ArmMode::Fiq)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ArmMode::Usr => "USR",
            ArmMode::Fiq => "FIQ",
            ArmMode::Irq => "IRQ",
            ArmMode::Svc => "SVC",
            ArmMode::Mon => "MON",
            ArmMode::Abt => "ABT",
            ArmMode::Und => "UND",
            ArmMode::Sys => "SYS",
            ArmMode::Unknown(_) => "UNKNOWN",
        }
    }
}

/// RISC-V mcause value for an environment call from Supervisor mode; the
/// only trap cause this monitor treats as a normal dispatch return.
pub const RISCV_ENV_CALL_FROM_S: u64 = 9;

/// The classified outcome of one dispatch cycle (spec §4.3, "Classify the
/// cause"). Carries enough of the ISA's raw cause to render a diagnostic
/// message without owning an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
    Arm { mode: ArmMode, vector: ArmVector },
    RiscV { code: u64, irq: bool },
}

/// Which ARM exception vector fired, independent of the mode it leaves the
/// processor in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmVector {
    Reset,
    Undefined,
    Supervisor,
    PrefetchAbort,
    DataAbort,
    Irq,
    Fiq,
}

impl Cause {
    pub fn is_normal_return(&self) -> bool {
        match self {
            Cause::Arm { mode, .. } => mode.is_normal_return(),
            Cause::RiscV { code, irq } => *code == RISCV_ENV_CALL_FROM_S && !irq,
        }
    }

    /// Whether a resumed guest program counter needs the IRQ/FIQ "retry
    /// the interrupted instruction" adjustment (spec §4.1 tie-break).
    pub fn needs_pc_rewind(&self) -> bool {
        matches!(
            self,
            Cause::Arm {
                vector: ArmVector::Irq | ArmVector::Fiq,
                ..
            }
        )
    }

    /// Whether this cause is an actual monitor call carrying a call number
    /// in the first argument register, as opposed to an interrupt that
    /// merely shares the same "normal return" bucket. `is_normal_return`
    /// permissively includes IRQ/FIQ so the dispatcher doesn't treat them
    /// as unhandled exceptions; this narrower check keeps the dispatcher
    /// from reading garbage call numbers out of an interrupted register
    /// file.
    pub fn is_monitor_call(&self) -> bool {
        match self {
            Cause::Arm { vector, .. } => matches!(vector, ArmVector::Supervisor),
            Cause::RiscV { code, irq } => *code == RISCV_ENV_CALL_FROM_S && !irq,
        }
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cause::Arm { mode, .. } => write!(f, "{}", mode.name()),
            Cause::RiscV { code, irq } => write!(f, "{:#x}{}", code, if *irq { " (irq)" } else { "" }),
        }
    }
}

/// The full error taxonomy of spec §7, carried as a plain enum rather than
/// formatted strings so callers can match on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorError {
    /// The guest raised an exception class other than a monitor call or
    /// interrupt.
    UnhandledException(Cause),
    /// A monitor-call (addr, length) pair failed the transfer-region check.
    InvalidOffset,
    /// The guest issued a call number not in 0..=5.
    InvalidSyscall(usize),
    /// A shadow context's register state diverged from its primary.
    LockstepFailure,
    /// The embedder-supplied RNG source failed.
    Rng,
    /// MMU/TZASC/PMP programming failed at `Load` or at a `Schedule` cycle.
    Isolation(&'static str),
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::UnhandledException(cause) => write!(f, "{}", cause),
            MonitorError::InvalidOffset => write!(f, "invalid offset"),
            MonitorError::InvalidSyscall(n) => write!(f, "invalid syscall {}", n),
            MonitorError::LockstepFailure => write!(f, "lockstep failure"),
            MonitorError::Rng => write!(f, "internal error"),
            MonitorError::Isolation(msg) => write!(f, "isolation setup failed: {}", msg),
        }
    }
}

/// Validates a guest-supplied `(addr, length)` transfer region against a
/// context's owned memory `[start, start+size)` and returns the offset
/// within that region.
///
/// Implements spec invariant 2 exactly: `off >= 0 && length <= size &&
/// off < size - length`, using only non-overflowing arithmetic (a
/// `checked_sub` stands in for the signed `off >= 0` test, since `addr`
/// and `start` are unsigned here).
pub fn transfer_region(addr: usize, length: usize, start: usize, size: usize) -> Result<usize, MonitorError> {
    let off = addr.checked_sub(start).ok_or(MonitorError::InvalidOffset)?;

    if length > size {
        return Err(MonitorError::InvalidOffset);
    }

    if off < size - length {
        Ok(off)
    } else {
        Err(MonitorError::InvalidOffset)
    }
}
