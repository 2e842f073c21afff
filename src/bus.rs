// src/bus.rs

//! Collaborator contracts: the shared bus and the host's notion of time.
//!
//! The goal of this module is to hide bus- and platform-specific details
//! behind lightweight traits so that the driver logic can be reused on any
//! target that can move bytes to the chip, and unit tested against a
//! simulated chip on the host.

use crate::error::BusError;

/// Minimal abstraction over the shared bus the chip hangs off.
///
/// Every call targets one bus address; the driver computes the address from
/// the device's base address, the channel number and the FIFO-access bit and
/// passes it with the call, so there is no set-address-then-transfer window
/// in which a cooperatively scheduled task could redirect the transaction.
///
/// Implementations report a plain ok/error status. Retry policy, if any,
/// belongs to the implementation; the driver never retries.
pub trait BusTransport {
    /// Read `buf.len()` bytes from register `reg` of the target at `addr`.
    fn read_register(&mut self, addr: u8, reg: u8, buf: &mut [u8]) -> Result<(), BusError>;

    /// Write `buf` to register `reg` of the target at `addr`.
    fn write_register(&mut self, addr: u8, reg: u8, buf: &[u8]) -> Result<(), BusError>;

    /// Raw read from the target at `addr`, without a register prefix.
    ///
    /// Used with the FIFO-access bit set in `addr` to drain the receive
    /// FIFO in one transaction.
    fn read(&mut self, addr: u8, buf: &mut [u8]) -> Result<(), BusError>;

    /// Raw write to the target at `addr`, without a register prefix.
    ///
    /// Used with the FIFO-access bit set in `addr` to fill the transmit
    /// FIFO in one transaction.
    fn write(&mut self, addr: u8, buf: &[u8]) -> Result<(), BusError>;
}

/// Host time source and cooperative suspension point.
///
/// Bounded waits poll the device between `yield_now` calls instead of
/// blocking, so the host scheduler keeps running; see
/// [`poll_with_timeout`](crate::timeout::poll_with_timeout).
pub trait Clock {
    /// Milliseconds since an arbitrary epoch. May wrap.
    fn now_ms(&self) -> u32;

    /// Give other cooperative tasks a chance to run.
    fn yield_now(&mut self);
}
