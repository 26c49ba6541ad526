//! tee-rpc: the two-queue byte-stream transport a JSON-RPC codec is plugged
//! onto (spec §4.6).
//!
//! There is no kernel-mode process to block a codec's `Read`/`Write` calls
//! in — the guest drives the transport by issuing RPC-REQ/RPC-RES monitor
//! calls. `RpcChannel` turns that into message-driven, non-blocking I/O
//! without the codec ever knowing: `recv` fills the read queue from one
//! RPC-REQ transfer, the codec drains it with `read`/refills `write_queue`
//! via `write`, and `flush` drains `write_queue` back to the guest over one
//! or more RPC-RES transfers.

#![no_std]

extern crate alloc;

use alloc::collections::VecDeque;
use alloc::vec;
use tee_syscall::{transfer_region, MonitorError};

/// The guest's owned memory, as the RPC layer needs to see it: a flat
/// byte-addressable region the monitor can read and write at an
/// already-validated offset. Real backings (DMA-mapped RAM, a host-process
/// mock) implement this; `tee-rpc` never touches raw pointers itself.
pub trait GuestMemory {
    fn read_at(&self, offset: usize, buf: &mut [u8]);
    fn write_at(&mut self, offset: usize, buf: &[u8]);
}

/// Outcome of one `flush` call (spec §4.6 "Flush").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The dispatcher passed a negative errno: the copy was skipped and the
    /// guest should see that errno as its RPC-RES return value.
    Aborted(i32),
    /// `n` bytes were copied out of the write queue (`0` is a normal empty
    /// queue, not a failure — the guest may call RPC-RES again once more
    /// data has been produced).
    Transferred(usize),
}

/// Half-duplex byte queues carrying in-flight RPC bytes in each direction,
/// owned by one execution context (spec §3 "Read buffer / Write buffer").
#[derive(Default, Clone)]
pub struct RpcChannel {
    read_queue: VecDeque<u8>,
    write_queue: VecDeque<u8>,
}

impl RpcChannel {
    pub fn new() -> Self {
        Self {
            read_queue: VecDeque::new(),
            write_queue: VecDeque::new(),
        }
    }

    /// Whether this channel's in-flight read buffer — the bytes an
    /// RPC-REQ has copied from guest memory but the codec hasn't drained
    /// yet — is bitwise equal to `other`'s (spec §4.7 step 3, §8 testable
    /// property 4: lockstep equality covers "up to and including the
    /// in-flight RPC read buffer").
    pub fn reads_match(&self, other: &Self) -> bool {
        self.read_queue == other.read_queue
    }

    /// Handles RPC-REQ: validates the transfer region and copies `length`
    /// bytes from guest memory to the tail of the read queue.
    pub fn recv(&mut self, mem: &dyn GuestMemory, mem_start: usize, mem_size: usize, addr: usize, length: usize) -> Result<(), MonitorError> {
        let off = transfer_region(addr, length, mem_start, mem_size)?;
        let mut buf = vec![0u8; length];
        mem.read_at(off, &mut buf);
        self.read_queue.extend(buf);
        Ok(())
    }

    /// Handles RPC-RES: validates the transfer region, then either skips
    /// the copy (negative errno) or copies up to `length` bytes from the
    /// head of the write queue into guest memory.
    pub fn flush(&mut self, mem: &mut dyn GuestMemory, mem_start: usize, mem_size: usize, addr: usize, length: usize, errno: i32) -> Result<FlushOutcome, MonitorError> {
        let off = transfer_region(addr, length, mem_start, mem_size)?;

        if errno < 0 {
            return Ok(FlushOutcome::Aborted(errno));
        }

        let n = self.write_queue.len().min(length);
        if n == 0 {
            return Ok(FlushOutcome::Transferred(0));
        }

        let bytes: alloc::vec::Vec<u8> = self.write_queue.drain(..n).collect();
        mem.write_at(off, &bytes);
        Ok(FlushOutcome::Transferred(n))
    }

    /// The codec's `Read`: drains up to `p.len()` bytes from the read
    /// queue, possibly fewer if it isn't full. Never blocks.
    pub fn read(&mut self, p: &mut [u8]) -> usize {
        let n = p.len().min(self.read_queue.len());
        for slot in p[..n].iter_mut() {
            *slot = self.read_queue.pop_front().expect("checked by min() above");
        }
        n
    }

    /// The codec's `Write`: appends the reply to the write queue. Never
    /// fails — back-pressure is the guest's problem to solve by draining
    /// via RPC-RES.
    pub fn write(&mut self, p: &[u8]) {
        self.write_queue.extend(p.iter().copied());
    }

    /// The codec's `Close`. Has no effect — matches the original transport,
    /// which never tears down the underlying queues.
    pub fn close(&mut self) {}

    pub fn pending_read(&self) -> usize {
        self.read_queue.len()
    }

    pub fn pending_write(&self) -> usize {
        self.write_queue.len()
    }
}
