//! tee-monitor: the `Scheduler` that drives one guest execution context
//! through repeated dispatch cycles, decodes its monitor calls, and
//! optionally lockstep-compares it against a shadow (spec §4.3, §4.5, §4.7).
//!
//! Everything below this crate is policy-free mechanism (`tee-context`'s
//! register files, `tee-isolation`'s MMU/TZASC/PMP programming, `tee-rpc`'s
//! queues); everything above it (an embedder's board support, its actual
//! JSON-RPC codec) is out of scope. `Scheduler` is the seam: it owns one
//! `ExecutionContext` plus the handful of callbacks an embedder supplies for
//! the things that have no single correct implementation — entering/leaving
//! the guest, isolation programming, monitor-call handling, randomness,
//! time, and RPC service.

#![no_std]

extern crate alloc;

use alloc::boxed::Box;
use core::sync::atomic::{AtomicBool, Ordering};

pub use tee_context::{ContextId, ExecutionContext, Memory, Registers};
pub use tee_rpc::{FlushOutcome, GuestMemory, RpcChannel};
pub use tee_syscall::{CallId, Cause, MonitorError};

use log::{debug, warn};

/// Switches a context into the guest and back, classifying the exit cause.
/// The real implementation is `ExecutionContext::execute`, which requires
/// the target ISA's vector stub and actual hardware; `Dispatch` lets the
/// rest of the scheduling logic be driven from a host test against a
/// scripted guest instead.
pub trait Dispatch {
    fn dispatch(&mut self, ctx: &mut ExecutionContext) -> Cause;
}

/// Dispatches through the real architecture-specific vector stub.
///
/// # Safety
/// Calling `dispatch` requires the monitor's vector table to be installed
/// and isolation already programmed for `ctx`, exactly as `ExecutionContext::
/// execute`'s own safety section states; `RealDispatch` does not check this,
/// it only forwards.
pub struct RealDispatch;

impl Dispatch for RealDispatch {
    fn dispatch(&mut self, ctx: &mut ExecutionContext) -> Cause {
        unsafe { ctx.execute() }
    }
}

/// Programs isolation hardware for a context at the two cadences spec §4.4
/// distinguishes: once when the context is first loaded or scheduled onto a
/// core, and — only on ARM — again at every `Run` entry, since the AP field
/// is shared mutable state a concurrently scheduled context could have
/// overwritten.
pub trait IsolationEngine {
    /// Called once per `Schedule` cycle, before the first `Run` of a batch.
    fn on_schedule(&mut self, _ctx: &ExecutionContext, _domain: u32) -> Result<(), MonitorError> {
        Ok(())
    }
    /// Called at every `Run` entry (spec §4.4). A no-op on RISC-V, where PMP
    /// entries are already correct for the whole `Schedule` cycle.
    fn on_run_entry(&mut self, _ctx: &ExecutionContext, _domain: u32) -> Result<(), MonitorError> {
        Ok(())
    }
}

/// No isolation programming at all — the right choice for a host test that
/// never touches real MMU/TZASC/PMP state.
#[derive(Default)]
pub struct NullIsolation;

impl IsolationEngine for NullIsolation {}

/// ARM MMU+TZASC isolation: `Load`-time section/TZASC setup happens via
/// `tee_isolation::arm::load` outside this engine (the caller does it once,
/// before the context is ever scheduled); this engine only reprograms the
/// AP field, which must happen at every `Run` entry.
pub struct ArmIsolation<'a> {
    pub mmu: &'a mut dyn tee_isolation::arm::Mmu,
}

impl IsolationEngine for ArmIsolation<'_> {
    fn on_run_entry(&mut self, ctx: &ExecutionContext, domain: u32) -> Result<(), MonitorError> {
        tee_isolation::arm::refresh_access(self.mmu, ctx.memory, ctx.secure, domain)
    }
}

/// RISC-V PMP isolation: entries are programmed once per `Schedule` cycle
/// and hold for every `Run` within it.
pub struct RiscVIsolation<'a> {
    pub pmp: &'a mut dyn tee_isolation::riscv::Pmp,
    pub first_entry: usize,
    pmp_hook: Option<Box<dyn FnMut(&mut dyn tee_isolation::riscv::Pmp, usize) -> Result<(), MonitorError>>>,
}

impl<'a> RiscVIsolation<'a> {
    pub fn new(pmp: &'a mut dyn tee_isolation::riscv::Pmp, first_entry: usize) -> Self {
        Self { pmp, first_entry, pmp_hook: None }
    }

    /// Installs the per-context PMP callback spec §4.3 step 3 invokes after
    /// the two reserved entries are programmed, with the first free entry
    /// index `schedule_context` left unused so the callback can claim its
    /// own grant window.
    pub fn with_pmp_hook(mut self, hook: Box<dyn FnMut(&mut dyn tee_isolation::riscv::Pmp, usize) -> Result<(), MonitorError>>) -> Self {
        self.pmp_hook = Some(hook);
        self
    }
}

impl IsolationEngine for RiscVIsolation<'_> {
    fn on_schedule(&mut self, ctx: &ExecutionContext, _domain: u32) -> Result<(), MonitorError> {
        let next_free = tee_isolation::riscv::schedule_context(self.pmp, ctx.memory, self.first_entry)?;
        if let Some(hook) = &mut self.pmp_hook {
            hook(&mut *self.pmp, next_free)?;
        }
        Ok(())
    }
}

/// What a `Handler` decided the `Scheduler` should do next (spec §4.5). Kept
/// distinct from `Result`'s `Err` because EXIT is a guest-requested, normal
/// end of the run loop, not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Resume dispatching; the context's registers have been updated with
    /// whatever return value the call produces.
    Continue,
    /// The guest issued EXIT. `Run` returns `Ok(())`.
    Exit,
}

/// Embedder-supplied backing for the monitor calls that need something the
/// monitor itself has no opinion about.
pub struct Services<'a> {
    pub rng: &'a mut dyn FnMut(&mut [u8]) -> Result<(), MonitorError>,
    pub nanotime: &'a mut dyn FnMut() -> u64,
    /// Services whatever is currently buffered in the channel's read queue
    /// and appends a reply to its write queue. Stands in for the
    /// out-of-scope JSON-RPC codec (spec §1, §4.6).
    pub rpc_serve: &'a mut dyn FnMut(&mut RpcChannel) -> Result<(), MonitorError>,
}

/// Decodes and services one monitor call (spec §4.5).
pub trait Handler {
    fn handle(
        &mut self,
        ctx: &mut ExecutionContext,
        mem: &mut dyn GuestMemory,
        rpc: &mut RpcChannel,
        services: &mut Services,
    ) -> Result<HandlerOutcome, MonitorError>;
}

/// The Secure context's monitor-call table: all six calls are serviced
/// (spec §4.5).
#[derive(Default)]
pub struct SecureHandler;

impl Handler for SecureHandler {
    fn handle(
        &mut self,
        ctx: &mut ExecutionContext,
        mem: &mut dyn GuestMemory,
        rpc: &mut RpcChannel,
        services: &mut Services,
    ) -> Result<HandlerOutcome, MonitorError> {
        let id = CallId(ctx.arg(0) as usize);
        match id {
            CallId::EXIT => Ok(HandlerOutcome::Exit),
            CallId::WRITE => {
                let byte = ctx.arg(1) as u8;
                tee_console::put_byte(byte);
                ctx.ret(0);
                Ok(HandlerOutcome::Continue)
            }
            CallId::NANOTIME => {
                let now = (services.nanotime)();
                ctx.ret(now);
                Ok(HandlerOutcome::Continue)
            }
            CallId::GETRANDOM => {
                let addr = ctx.arg(1) as usize;
                let length = ctx.arg(2) as usize;
                let off = tee_syscall::transfer_region(addr, length, ctx.memory.start, ctx.memory.size)?;
                let mut buf = alloc::vec![0u8; length];
                (services.rng)(&mut buf).map_err(|_| MonitorError::Rng)?;
                mem.write_at(off, &buf);
                ctx.ret(0);
                Ok(HandlerOutcome::Continue)
            }
            CallId::RPC_REQ => {
                let addr = ctx.arg(1) as usize;
                let length = ctx.arg(2) as usize;
                match rpc.recv(mem, ctx.memory.start, ctx.memory.size, addr, length) {
                    Ok(()) => {
                        (services.rpc_serve)(rpc)?;
                        ctx.ret(0);
                    }
                    Err(_) => ctx.ret(u64::MAX),
                }
                Ok(HandlerOutcome::Continue)
            }
            CallId::RPC_RES => {
                let addr = ctx.arg(1) as usize;
                let length = ctx.arg(2) as usize;
                let errno = ctx.arg(3) as i32;
                match rpc.flush(mem, ctx.memory.start, ctx.memory.size, addr, length, errno) {
                    Ok(FlushOutcome::Transferred(n)) => ctx.set_rpc_res_return(n as i64),
                    Ok(FlushOutcome::Aborted(e)) => ctx.set_rpc_res_return(e as i64),
                    Err(_) => ctx.set_rpc_res_return(-1),
                }
                Ok(HandlerOutcome::Continue)
            }
            CallId(n) => Err(MonitorError::InvalidSyscall(n)),
        }
    }
}

/// The NonSecure context's default monitor-call table: a pure yield-back
/// that performs no service of its own, per spec's Open Question on a
/// NonSecure OS — an embedder supplies its own `Handler` when one is
/// needed; this is the inert default the original's stub build ships too.
#[derive(Default)]
pub struct NonSecureHandler;

impl Handler for NonSecureHandler {
    fn handle(
        &mut self,
        ctx: &mut ExecutionContext,
        _mem: &mut dyn GuestMemory,
        _rpc: &mut RpcChannel,
        _services: &mut Services,
    ) -> Result<HandlerOutcome, MonitorError> {
        let id = CallId(ctx.arg(0) as usize);
        if id == CallId::EXIT {
            Ok(HandlerOutcome::Exit)
        } else {
            ctx.ret(0);
            Ok(HandlerOutcome::Continue)
        }
    }
}

/// A closed/open latch a `Scheduler`'s owner can poll from another core
/// (spec §4.3 "Done"). Backed by a plain `AtomicBool` rather than a lock —
/// it's a one-shot signal, not shared mutable state needing mutual
/// exclusion.
#[derive(Default)]
pub struct DoneFlag(AtomicBool);

impl DoneFlag {
    pub fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn signal(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_done(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A context scheduled alongside the primary purely to detect divergence
/// (spec §4.7). Its own handler is never invoked — monitor-call side
/// effects happen once, against the primary — so only its register file
/// and dispatch/isolation backends live here.
pub struct Shadow {
    pub ctx: ExecutionContext,
    pub rpc: RpcChannel,
    dispatch: Box<dyn Dispatch>,
    isolation: Box<dyn IsolationEngine>,
}

impl Shadow {
    pub fn new(ctx: ExecutionContext, dispatch: Box<dyn Dispatch>, isolation: Box<dyn IsolationEngine>) -> Self {
        Self { ctx, rpc: RpcChannel::new(), dispatch, isolation }
    }
}

/// Drives one `ExecutionContext` through repeated dispatch cycles (spec
/// §4.3). Owns everything the context needs to run and every embedder
/// callback the monitor calls it can raise might need, plus an optional
/// lockstep shadow.
pub struct Scheduler {
    pub ctx: ExecutionContext,
    pub mem: Box<dyn GuestMemory>,
    pub rpc: RpcChannel,
    pub shadow: Option<Shadow>,
    dispatch: Box<dyn Dispatch>,
    isolation: Box<dyn IsolationEngine>,
    handler: Box<dyn Handler>,
    rng: Box<dyn FnMut(&mut [u8]) -> Result<(), MonitorError>>,
    nanotime: Box<dyn FnMut() -> u64>,
    rpc_serve: Box<dyn FnMut(&mut RpcChannel) -> Result<(), MonitorError>>,
    yield_host: Box<dyn FnMut()>,
    domain: u32,
    running: bool,
    done: DoneFlag,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: ExecutionContext,
        mem: Box<dyn GuestMemory>,
        dispatch: Box<dyn Dispatch>,
        isolation: Box<dyn IsolationEngine>,
        handler: Box<dyn Handler>,
        rng: Box<dyn FnMut(&mut [u8]) -> Result<(), MonitorError>>,
        nanotime: Box<dyn FnMut() -> u64>,
        rpc_serve: Box<dyn FnMut(&mut RpcChannel) -> Result<(), MonitorError>>,
        domain: u32,
    ) -> Self {
        Self {
            ctx,
            mem,
            rpc: RpcChannel::new(),
            shadow: None,
            dispatch,
            isolation,
            handler,
            rng,
            nanotime,
            rpc_serve,
            yield_host: Box::new(|| {}),
            domain,
            running: true,
            done: DoneFlag::new(),
        }
    }

    pub fn with_shadow(mut self, shadow: Shadow) -> Self {
        self.shadow = Some(shadow);
        self
    }

    /// Installs the host-runtime yield point `Run` calls between dispatch
    /// cycles (spec.md §9 "Replacing the goroutine-style yield";
    /// SPEC_FULL.md §4.3 "Yield hook"). There is no Go runtime to call
    /// `runtime.Gosched()` on here, so the contract — don't let a tight
    /// guest loop monopolize a core — is expressed as a callback the
    /// embedder's async runtime or thread pool plugs in. Defaults to a
    /// no-op, which is correct for a single-guest host test.
    pub fn with_yield(mut self, yield_host: Box<dyn FnMut()>) -> Self {
        self.yield_host = yield_host;
        self
    }

    /// Per-`Schedule`-cycle isolation setup: programs PMP (RISC-V) or is a
    /// no-op (ARM, whose AP field is reprogrammed every `Run` instead).
    pub fn schedule(&mut self) -> Result<(), MonitorError> {
        self.isolation.on_schedule(&self.ctx, self.domain)?;
        if let Some(shadow) = &mut self.shadow {
            shadow.isolation.on_schedule(&shadow.ctx, self.domain)?;
        }
        Ok(())
    }

    /// Runs dispatch cycles until the guest EXITs or an unrecoverable error
    /// occurs (spec §4.3 "Run"). Each cycle: reprogram AP-at-run-entry
    /// isolation, dispatch, classify the cause, and — if it's a monitor
    /// call — decode and service it.
    pub fn run(&mut self) -> Result<(), MonitorError> {
        let outcome = self.run_inner();
        if outcome.is_ok() {
            self.done.signal();
        }
        outcome
    }

    /// Clears a prior `stop()` so the next `run()` actually dispatches.
    /// `new()` starts a scheduler in the resumed state; this is only needed
    /// to run again after a `Stop`.
    pub fn resume(&mut self) {
        self.running = true;
    }

    fn run_inner(&mut self) -> Result<(), MonitorError> {
        loop {
            if !self.running {
                debug!("scheduler stopped mid-run");
                return Ok(());
            }

            self.isolation.on_run_entry(&self.ctx, self.domain)?;
            let cause = self.dispatch.dispatch(&mut self.ctx);

            if cause.needs_pc_rewind() {
                self.ctx.rewind_pc();
            }

            if !cause.is_normal_return() {
                warn!("unhandled exception: {}", cause);
                return Err(MonitorError::UnhandledException(cause));
            }

            // Lockstep compares the raw trapped state of both cores *before*
            // the handler mutates the primary's registers/RPC buffers (spec
            // §4.3: lockstep runs before `Invoke ctx.Handler(ctx)`); comparing
            // after would fault on every non-EXIT call, since the shadow
            // never runs a handler of its own and so never picks up the
            // return-value writes the primary's handler makes.
            if let Some(shadow) = &mut self.shadow {
                let shadow_cause = shadow.dispatch.dispatch(&mut shadow.ctx);
                if shadow_cause.needs_pc_rewind() {
                    shadow.ctx.rewind_pc();
                }
                if !self.ctx.equals(&shadow.ctx) || !self.rpc.reads_match(&shadow.rpc) {
                    return Err(MonitorError::LockstepFailure);
                }
            }

            let outcome = if cause.is_monitor_call() {
                let mut services = Services {
                    rng: &mut *self.rng,
                    nanotime: &mut *self.nanotime,
                    rpc_serve: &mut *self.rpc_serve,
                };
                self.handler.handle(&mut self.ctx, &mut *self.mem, &mut self.rpc, &mut services)?
            } else {
                // IRQ/FIQ: nothing to decode, just resume.
                HandlerOutcome::Continue
            };

            if let Some(shadow) = &mut self.shadow {
                // The handler ran once, against the primary only; mirror its
                // register and RPC-buffer writes into the shadow so the two
                // stay in step for the next cycle's comparison.
                shadow.ctx.mirror_return_registers(&self.ctx);
                shadow.rpc = self.rpc.clone();
            }

            if outcome == HandlerOutcome::Exit {
                return Ok(());
            }

            (self.yield_host)();
        }
    }

    /// Requests that the run loop stop before its next dispatch cycle
    /// (spec §4.3 "Stop"). Races only with another core's own `Stop`/`Run`
    /// on the same context; the caller is expected to serialize those the
    /// way it serializes `Schedule` itself.
    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn done(&self) -> &DoneFlag {
        &self.done
    }
}
