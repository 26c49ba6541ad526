//! tee-isolation: MMU section + TrustZone address-space-controller
//! programming for ARM contexts, and PMP programming for RISC-V contexts
//! (spec §4.4).
//!
//! This crate owns only the *decisions* — which descriptors, which AP
//! field, which PMP entries, in what order — not the register-level
//! mechanics of writing them. Those are board/SoC specific and live behind
//! the [`arm::Mmu`]/[`arm::Tzasc`]/[`riscv::Pmp`] traits an embedder
//! implements once for their hardware. This mirrors the teacher's
//! `PageManager` split in `kernel-vm`: the crate drives a policy against a
//! caller-supplied backend trait rather than owning hardware registers
//! itself.

#![no_std]

pub use tee_context::Memory;
pub use tee_syscall::MonitorError;

/// ARM MMU section descriptors + TrustZone address-space controller.
pub mod arm {
    use super::{Memory, MonitorError};

    /// Attribute bits OR'd into a section descriptor. Representative of the
    /// "normal, cacheable, bufferable" 1 MiB section encoding the original
    /// uses (`arm.MemoryRegion`); the NS bit is kept separate since it is
    /// toggled per context rather than fixed.
    pub const MEMORY_REGION: u32 = 0x0000_0c1e;
    /// TTE NS bit (bit 19 of a section descriptor). Required to keep
    /// NonSecure cache lines distinct from Secure ones (spec §4.4).
    pub const NS: u32 = 1 << 19;

    /// Access-permission field values keyed by security state (spec §3
    /// invariant 3: `AP_011` Secure, `AP_001` NonSecure).
    pub const AP_SECURE: u32 = 0b011;
    pub const AP_NONSECURE: u32 = 0b001;

    /// TZASC permission bits: Secure-World / NonSecure-World read/write.
    pub const SP_SW_RD: u32 = 1 << 0;
    pub const SP_SW_WR: u32 = 1 << 1;
    pub const SP_NW_RD: u32 = 1 << 2;
    pub const SP_NW_WR: u32 = 1 << 3;

    /// Region index that grants the whole address space Secure-only R/W by
    /// default (spec §4.4 — "a defensive default").
    pub const TZASC_DEFAULT_REGION: u32 = 0;
    /// Region index granting a NonSecure context's own memory NonSecure R/W.
    pub const TZASC_CONTEXT_REGION: u32 = 1;

    /// MMU section-descriptor programming for the range `[start, end)`.
    pub trait Mmu {
        /// Programs section attributes (cacheability, NS bit) over
        /// `[start, end)`.
        fn set_attributes(&mut self, start: u32, end: u32, flags: u32) -> Result<(), MonitorError>;
        /// Programs the access-permission field and domain ID over
        /// `[start, end)`. Called at every `Run` entry, not just `Load`
        /// (spec §4.4).
        fn set_access_permissions(&mut self, start: u32, end: u32, ap: u32, domain: u32) -> Result<(), MonitorError>;
    }

    /// TrustZone address-space-controller region programming.
    pub trait Tzasc {
        fn enable_region(&mut self, region: u32, start: u32, size: u32, attr: u32) -> Result<(), MonitorError>;
    }

    /// Pre-programs TZASC region 0 (whole address space, Secure-only R/W).
    /// Called once at monitor init, before any context is loaded.
    pub fn init_tzasc_defaults(tzasc: &mut dyn Tzasc) -> Result<(), MonitorError> {
        tzasc.enable_region(TZASC_DEFAULT_REGION, 0, 0, SP_SW_RD | SP_SW_WR)
    }

    /// Configures a context's memory at `Load` time: section attributes
    /// (NS bit set for NonSecure), and — on real TrustZone hardware — a
    /// TZASC region granting the NonSecure context R/W over exactly its own
    /// memory. `native` models whether TZASC hardware is actually present
    /// (spec §4.4: "If running on real TrustZone hardware").
    pub fn load(mmu: &mut dyn Mmu, tzasc: &mut dyn Tzasc, memory: Memory, secure: bool, native: bool) -> Result<(), MonitorError> {
        let start = memory.start as u32;
        let end = memory.end() as u32;

        if !secure && native {
            tzasc.enable_region(TZASC_CONTEXT_REGION, start, memory.size as u32, SP_NW_RD | SP_NW_WR)?;
        }

        let mut flags = MEMORY_REGION;
        if !secure {
            flags |= NS;
        }
        mmu.set_attributes(start, end, flags)
    }

    /// Reprograms the access-permission field for this context's memory.
    /// Called at every `Run` entry (spec §4.4), keyed by the context's
    /// domain ID so that two concurrently-scheduled contexts get distinct
    /// domains and cannot see each other's memory.
    pub fn refresh_access(mmu: &mut dyn Mmu, memory: Memory, secure: bool, domain: u32) -> Result<(), MonitorError> {
        let ap = if secure { AP_SECURE } else { AP_NONSECURE };
        mmu.set_access_permissions(memory.start as u32, memory.end() as u32, ap, domain)
    }
}

/// RISC-V Physical Memory Protection entry programming.
pub mod riscv {
    use super::{Memory, MonitorError};

    /// The addressing mode of a PMP entry (spec §4.4, §6).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum PmpMode {
        Off,
        Tor,
    }

    /// One PMP entry's configuration.
    pub trait Pmp {
        fn write_entry(&mut self, index: usize, addr: u64, r: bool, w: bool, x: bool, mode: PmpMode) -> Result<(), MonitorError>;
    }

    /// The number of PMP entries reserved per scheduled context (spec §6).
    pub const ENTRIES_PER_CONTEXT: usize = 2;

    /// Programs a single permissive entry covering the whole address space,
    /// used as the default under the supervisor/machine split before any
    /// guest-specific grant narrows it (spec §4.4).
    pub fn init_default(pmp: &mut dyn Pmp) -> Result<(), MonitorError> {
        pmp.write_entry(0, u64::MAX, true, true, true, PmpMode::Tor)
    }

    /// Programs the two entries reserved for one scheduled context: `OFF`
    /// at the region start, then `TOR` (top-of-range) at the region end
    /// with full R+W+X — together an inclusive grant window for the guest
    /// (spec §4.4). Returns the first free entry index for the context's
    /// own `PMP` callback.
    pub fn schedule_context(pmp: &mut dyn Pmp, memory: Memory, first_entry: usize) -> Result<usize, MonitorError> {
        pmp.write_entry(first_entry, memory.start as u64, false, false, false, PmpMode::Off)?;
        pmp.write_entry(first_entry + 1, memory.end() as u64, true, true, true, PmpMode::Tor)?;
        Ok(first_entry + ENTRIES_PER_CONTEXT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    extern crate std;
    use std::vec::Vec;

    #[derive(Default)]
    struct MockMmu {
        attributes: Vec<(u32, u32, u32)>,
        access: Vec<(u32, u32, u32, u32)>,
    }

    impl arm::Mmu for MockMmu {
        fn set_attributes(&mut self, start: u32, end: u32, flags: u32) -> Result<(), MonitorError> {
            self.attributes.push((start, end, flags));
            Ok(())
        }
        fn set_access_permissions(&mut self, start: u32, end: u32, ap: u32, domain: u32) -> Result<(), MonitorError> {
            self.access.push((start, end, ap, domain));
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockTzasc {
        regions: Vec<(u32, u32, u32, u32)>,
    }

    impl arm::Tzasc for MockTzasc {
        fn enable_region(&mut self, region: u32, start: u32, size: u32, attr: u32) -> Result<(), MonitorError> {
            self.regions.push((region, start, size, attr));
            Ok(())
        }
    }

    #[test]
    fn arm_load_secure_context_skips_tzasc_and_clears_ns_bit() {
        let mut mmu = MockMmu::default();
        let mut tzasc = MockTzasc::default();
        let mem = Memory::new(0x8200_0000, 0x0200_0000);

        arm::load(&mut mmu, &mut tzasc, mem, true, true).unwrap();

        assert!(tzasc.regions.is_empty());
        assert_eq!(mmu.attributes.len(), 1);
        assert_eq!(mmu.attributes[0].2 & arm::NS, 0);
    }

    #[test]
    fn arm_load_nonsecure_native_programs_tzasc_region_1_and_ns_bit() {
        let mut mmu = MockMmu::default();
        let mut tzasc = MockTzasc::default();
        let mem = Memory::new(0x8400_0000, 0x0200_0000);

        arm::load(&mut mmu, &mut tzasc, mem, false, true).unwrap();

        assert_eq!(tzasc.regions, std::vec![(arm::TZASC_CONTEXT_REGION, 0x8400_0000, 0x0200_0000, arm::SP_NW_RD | arm::SP_NW_WR)]);
        assert_ne!(mmu.attributes[0].2 & arm::NS, 0);
    }

    #[test]
    fn arm_load_nonsecure_without_native_hardware_skips_tzasc() {
        let mut mmu = MockMmu::default();
        let mut tzasc = MockTzasc::default();
        let mem = Memory::new(0x8400_0000, 0x1000);

        arm::load(&mut mmu, &mut tzasc, mem, false, false).unwrap();

        assert!(tzasc.regions.is_empty());
        assert_ne!(mmu.attributes[0].2 & arm::NS, 0);
    }

    #[test]
    fn arm_refresh_access_keys_ap_field_by_security_state() {
        let mut mmu = MockMmu::default();
        let mem = Memory::new(0x1000, 0x1000);

        arm::refresh_access(&mut mmu, mem, true, 3).unwrap();
        arm::refresh_access(&mut mmu, mem, false, 4).unwrap();

        assert_eq!(mmu.access[0], (0x1000, 0x2000, arm::AP_SECURE, 3));
        assert_eq!(mmu.access[1], (0x1000, 0x2000, arm::AP_NONSECURE, 4));
    }

    #[test]
    fn arm_tzasc_defaults_grant_secure_only_over_whole_space() {
        let mut tzasc = MockTzasc::default();
        arm::init_tzasc_defaults(&mut tzasc).unwrap();
        assert_eq!(tzasc.regions, std::vec![(arm::TZASC_DEFAULT_REGION, 0, 0, arm::SP_SW_RD | arm::SP_SW_WR)]);
    }

    #[derive(Default)]
    struct MockPmp {
        entries: Vec<(usize, u64, bool, bool, bool, riscv::PmpMode)>,
    }

    impl riscv::Pmp for MockPmp {
        fn write_entry(&mut self, index: usize, addr: u64, r: bool, w: bool, x: bool, mode: riscv::PmpMode) -> Result<(), MonitorError> {
            self.entries.push((index, addr, r, w, x, mode));
            Ok(())
        }
    }

    #[test]
    fn riscv_default_entry_grants_full_access() {
        let mut pmp = MockPmp::default();
        riscv::init_default(&mut pmp).unwrap();
        assert_eq!(pmp.entries[0], (0, u64::MAX, true, true, true, riscv::PmpMode::Tor));
    }

    #[test]
    fn riscv_schedule_context_reserves_two_entries_and_returns_next_free() {
        let mut pmp = MockPmp::default();
        let mem = Memory::new(0x8000_0000, 0x1000);

        let next = riscv::schedule_context(&mut pmp, mem, 0).unwrap();

        assert_eq!(next, 2);
        assert_eq!(pmp.entries[0], (0, 0x8000_0000, false, false, false, riscv::PmpMode::Off));
        assert_eq!(pmp.entries[1], (1, 0x8000_1000, true, true, true, riscv::PmpMode::Tor));
    }

    #[test]
    fn riscv_schedule_context_honors_nonzero_first_entry() {
        let mut pmp = MockPmp::default();
        let mem = Memory::new(0x1000, 0x1000);

        let next = riscv::schedule_context(&mut pmp, mem, 4).unwrap();

        assert_eq!(next, 6);
        assert_eq!(pmp.entries[0].0, 4);
        assert_eq!(pmp.entries[1].0, 5);
    }
}
