//! Integration tests for the execution-context register files and loader.
//!
//! None of these exercise `execute()` itself — that requires the target
//! ISA's vector stub and a real privilege transition — but everything
//! else (construction, accessors, cloning, lockstep comparison) is plain
//! data manipulation and runs under `std` on any host.

use tee_context::*;

#[test]
fn context_ids_are_monotonic_and_distinct() {
    let a = ContextId::next();
    let b = ContextId::next();
    assert!(b.value() > a.value());
}

#[test]
fn memory_end_is_start_plus_size() {
    let mem = Memory::new(0x4000_0000, 0x1000);
    assert_eq!(mem.end(), 0x4000_1000);
}

#[test]
fn load_arm_sets_entry_pc_and_svc_mode() {
    let mem = Memory::new(0x1000_0000, 0x10000);
    let ctx = ExecutionContext::load_arm(0x1000_0040, mem, true);
    match &ctx.registers {
        Registers::Arm(r) => {
            assert_eq!(r.pc, 0x1000_0040);
            assert_eq!(r.cpsr & 0x1f, 0b10011);
            assert_ne!(r.fpexc, 0, "secure contexts get FPEXC.EN set");
        }
        Registers::RiscV(_) => panic!("expected an ARM register file"),
    }
    assert!(ctx.secure);
    assert_eq!(ctx.memory, mem);
}

#[test]
fn load_arm_nonsecure_leaves_fp_bank_disabled() {
    let mem = Memory::new(0x2000_0000, 0x1000);
    let ctx = ExecutionContext::load_arm(0, mem, false);
    match &ctx.registers {
        Registers::Arm(r) => assert_eq!(r.fpexc, 0),
        _ => panic!("expected an ARM register file"),
    }
}

#[test]
fn load_riscv_sets_entry_pc_and_mode() {
    let mem = Memory::new(0x8000_0000, 0x2000);
    let ctx = ExecutionContext::load_riscv(0x8000_1000, mem, true);
    match &ctx.registers {
        Registers::RiscV(r) => {
            assert_eq!(r.mepc, 0x8000_1000);
            assert!(r.secure);
            assert!(r.interrupt);
        }
        _ => panic!("expected a RISC-V register file"),
    }
}

#[test]
fn riscv_argument_register_mapping() {
    let mem = Memory::new(0, 0x1000);
    let mut ctx = ExecutionContext::load_riscv(0, mem, false);
    ctx.set_arg(0, 0xAAAA);
    ctx.set_arg(1, 0xBBBB);
    ctx.set_arg(2, 0xCCCC);
    assert_eq!(ctx.arg(0), 0xAAAA);
    assert_eq!(ctx.arg(1), 0xBBBB);
    assert_eq!(ctx.arg(2), 0xCCCC);

    if let Registers::RiscV(r) = &ctx.registers {
        assert_eq!(r.x(10), 0xAAAA);
        assert_eq!(r.x(11), 0xBBBB);
        assert_eq!(r.x(12), 0xCCCC);
    }
}

#[test]
fn arm_argument_register_mapping() {
    let mem = Memory::new(0, 0x1000);
    let mut ctx = ExecutionContext::load_arm(0, mem, false);
    ctx.set_arg(0, 0xDEAD);
    ctx.set_arg(1, 0xBEEF);
    assert_eq!(ctx.arg(0), 0xDEAD);
    assert_eq!(ctx.arg(1), 0xBEEF);
}

#[test]
fn ret_splits_across_r0_r1_on_arm_but_not_riscv() {
    let mem = Memory::new(0, 0x1000);

    let mut arm_ctx = ExecutionContext::load_arm(0, mem, false);
    arm_ctx.ret(0x0000_0002_0000_0001);
    if let Registers::Arm(r) = &arm_ctx.registers {
        assert_eq!(r.r[0], 1);
        assert_eq!(r.r[1], 2);
    }

    let mut riscv_ctx = ExecutionContext::load_riscv(0, mem, false);
    riscv_ctx.ret(42);
    assert_eq!(riscv_ctx.arg(0), 42);
}

#[test]
fn set_rpc_res_return_writes_a_single_register_not_split() {
    let mem = Memory::new(0, 0x1000);

    let mut arm_ctx = ExecutionContext::load_arm(0, mem, false);
    arm_ctx.set_rpc_res_return(-5);
    if let Registers::Arm(r) = &arm_ctx.registers {
        assert_eq!(r.r[2] as i32, -5);
    }

    let mut riscv_ctx = ExecutionContext::load_riscv(0, mem, false);
    riscv_ctx.set_rpc_res_return(12);
    assert_eq!(riscv_ctx.arg(0), 12);
}

#[test]
fn rewind_pc_only_affects_arm() {
    let mem = Memory::new(0, 0x1000);

    let mut arm_ctx = ExecutionContext::load_arm(0x100, mem, false);
    arm_ctx.rewind_pc();
    if let Registers::Arm(r) = &arm_ctx.registers {
        assert_eq!(r.pc, 0xfc);
    }

    let mut riscv_ctx = ExecutionContext::load_riscv(0x100, mem, false);
    riscv_ctx.rewind_pc();
    if let Registers::RiscV(r) = &riscv_ctx.registers {
        assert_eq!(r.mepc, 0x100);
    }
}

#[test]
fn clone_shadow_is_independent_and_starts_equal() {
    let mem = Memory::new(0x9000_0000, 0x4000);
    let mut primary = ExecutionContext::load_riscv(0x9000_0100, mem, true);
    primary.set_arg(0, 7);

    let shadow = primary.clone_shadow();
    assert!(primary.equals(&shadow));

    primary.set_arg(0, 8);
    assert!(!primary.equals(&shadow));
}

#[test]
fn equals_rejects_mismatched_architectures() {
    let mem = Memory::new(0, 0x1000);
    let arm_ctx = ExecutionContext::load_arm(0, mem, false);
    let riscv_ctx = ExecutionContext::load_riscv(0, mem, false);
    assert!(!arm_ctx.equals(&riscv_ctx));
}
