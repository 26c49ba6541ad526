//! tee-sbi: minimal RISC-V Supervisor Binary Interface (SBI) Base-extension
//! probing, for a NonSecure S-mode guest that expects to run under an SBI
//! firmware rather than (or in addition to) the GoTEE-style monitor-call ABI.
//!
//! This is not wired into `tee-monitor::NonSecureHandler` by default — an
//! embedder composes [`base_handler`] into their own `Handler` for a guest
//! that probes SBI before falling back to monitor calls, exactly as the
//! original `sbi` package is a sibling of `monitor`, not baked into it
//! (spec.md §9 design note; SPEC_FULL.md §6 "SBI probing").
//!
//! An S-mode kernel issues `ecall` with the extension ID in `a7` (`x17`) and
//! the function ID in `a6` (`x16`) — a different slotting of the same trap
//! than the monitor-call ABI's call number in `a0` — so an embedder that
//! wants both must distinguish them itself (e.g. by context: SBI only for a
//! NonSecure S-mode kernel, never for a Secure applet).

#![no_std]

use tee_context::ExecutionContext;

pub const SBI_MAJOR: i64 = 1;
pub const SBI_MINOR: i64 = 0;

/// Supported SBI Extension IDs (EID).
pub const EXT_BASE: u64 = 0x10;

/// Base Extension Function IDs (FID), in `EXT_BASE` call order.
pub const EXT_BASE_GET_SPEC_VERSION: u64 = 0;
pub const EXT_BASE_GET_IMP_ID: u64 = 1;
pub const EXT_BASE_GET_IMP_VERSION: u64 = 2;
pub const EXT_BASE_PROBE_EXT: u64 = 3;
pub const EXT_BASE_GET_MVENDORID: u64 = 4;
pub const EXT_BASE_GET_MARCHID: u64 = 5;
pub const EXT_BASE_GET_MIMPID: u64 = 6;

/// Standard SBI error codes.
pub const SBI_SUCCESS: i64 = 0;
pub const SBI_ERR_NOT_SUPPORTED: i64 = -2;

/// An SBI call's result: `(error, value)`, written back into `a0`/`a1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbiRet {
    pub error: i64,
    pub value: i64,
}

impl SbiRet {
    const fn ok(value: i64) -> Self {
        Self { error: SBI_SUCCESS, value }
    }

    const fn not_supported() -> Self {
        Self {
            error: SBI_ERR_NOT_SUPPORTED,
            value: 0,
        }
    }
}

/// Services the Base extension's function IDs. Every FID outside the six the
/// spec defines reports `SBI_ERR_NOT_SUPPORTED`; the ones that do exist
/// report either a fixed version word or "no other extension/implementation
/// detail is available", matching `original_source/sbi/sbi.go`'s
/// `baseHandler` verbatim (it never consults guest memory, only the FID).
fn base_ext_handler(fid: u64) -> SbiRet {
    match fid {
        EXT_BASE_GET_SPEC_VERSION => SbiRet::ok((SBI_MAJOR << 24) | SBI_MINOR),
        EXT_BASE_GET_IMP_ID | EXT_BASE_GET_IMP_VERSION => SbiRet::ok(0),
        EXT_BASE_PROBE_EXT => SbiRet::ok(0),
        EXT_BASE_GET_MVENDORID | EXT_BASE_GET_MARCHID | EXT_BASE_GET_MIMPID => SbiRet::ok(0),
        _ => SbiRet::not_supported(),
    }
}

/// Dispatches one SBI call by extension ID (`a7`), reporting
/// `SBI_ERR_NOT_SUPPORTED` for every extension but Base — this monitor only
/// ever claims to implement Base, so a guest's extension probe (`a7 =
/// EXT_BASE`, `a6 = EXT_BASE_PROBE_EXT`) correctly reports nothing else is
/// present.
pub fn dispatch(eid: u64, fid: u64) -> SbiRet {
    if eid == EXT_BASE {
        base_ext_handler(fid)
    } else {
        SbiRet::not_supported()
    }
}

/// Services one SBI `ecall` trapped from a RISC-V guest: reads `a7`/`a6`,
/// dispatches, and writes `(error, value)` back into `a0`/`a1` (spec.md §6
/// ABI, SBI convention). Always "handles" the call — an unsupported
/// extension is a normal SBI response, not a monitor error.
pub fn base_handler(ctx: &mut ExecutionContext) {
    let eid = ctx.arg(7);
    let fid = ctx.arg(6);
    let ret = dispatch(eid, fid);
    ctx.set_arg(0, ret.error as u64);
    ctx.set_arg(1, ret.value as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_spec_version_reports_major_minor() {
        let ret = dispatch(EXT_BASE, EXT_BASE_GET_SPEC_VERSION);
        assert_eq!(ret, SbiRet::ok((SBI_MAJOR << 24) | SBI_MINOR));
    }

    #[test]
    fn probe_ext_reports_no_other_extension_present() {
        assert_eq!(dispatch(EXT_BASE, EXT_BASE_PROBE_EXT), SbiRet::ok(0));
    }

    #[test]
    fn unknown_base_fid_is_not_supported() {
        assert_eq!(dispatch(EXT_BASE, 99), SbiRet::not_supported());
    }

    #[test]
    fn unknown_extension_is_not_supported() {
        assert_eq!(dispatch(0x09, 0), SbiRet::not_supported());
    }

    #[test]
    fn csr_probes_report_zero() {
        for fid in [EXT_BASE_GET_MVENDORID, EXT_BASE_GET_MARCHID, EXT_BASE_GET_MIMPID] {
            assert_eq!(dispatch(EXT_BASE, fid), SbiRet::ok(0));
        }
    }
}
