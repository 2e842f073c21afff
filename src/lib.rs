// src/lib.rs

//! Driver for dual-channel UART bridge chips reached over a shared,
//! transaction-oriented bus.
//!
//! The chip puts two full serial channels (registers, baud generators and
//! 256-byte FIFOs) behind a handful of bus addresses. Every register access
//! costs a bus round trip, so the driver's real job is keeping the
//! transaction count proportional to the amount of data moved:
//! - a per-channel receive cache mirrors the device FIFO, so naive
//!   one-byte-at-a-time readers cost one bulk bus read per burst
//! - bulk FIFO reads and writes move up to 255 bytes per transaction
//! - bounded waits (flush, safe-mode reads) poll with a wall-clock deadline
//!   and a cooperative yield instead of blocking
//!
//! # Safety and robustness
//!
//! The driver handles an absent or failing bus by degrading: transactions
//! that fail raise a device-wide communication warning and operations keep
//! returning inline statuses instead of panicking. Invalid configurations
//! are rejected before any register is programmed.
//!
//! The execution model is cooperative: one logical operation at a time per
//! device, enforced by exclusive borrows rather than locks. There is no
//! preemption to guard against, and the scoped page switch restores page 0
//! before any other operation can run.
//!
//! # Example
//!
//! ```
//! use wk2132::{
//!     BusError, BusTransport, ChannelConfig, ChannelId, Clock, Device, DeviceConfig,
//!     SerialChannel,
//! };
//!
//! // A bus with nothing behind it; a real host would bridge to its I2C
//! // peripheral here.
//! struct NullBus;
//! impl BusTransport for NullBus {
//!     fn read_register(&mut self, _: u8, _: u8, buf: &mut [u8]) -> Result<(), BusError> {
//!         buf.fill(0);
//!         Ok(())
//!     }
//!     fn write_register(&mut self, _: u8, _: u8, _: &[u8]) -> Result<(), BusError> {
//!         Ok(())
//!     }
//!     fn read(&mut self, _: u8, buf: &mut [u8]) -> Result<(), BusError> {
//!         buf.fill(0);
//!         Ok(())
//!     }
//!     fn write(&mut self, _: u8, _: &[u8]) -> Result<(), BusError> {
//!         Ok(())
//!     }
//! }
//!
//! struct HostClock(core::cell::Cell<u32>);
//! impl Clock for HostClock {
//!     fn now_ms(&self) -> u32 {
//!         self.0.get()
//!     }
//!     fn yield_now(&mut self) {
//!         self.0.set(self.0.get().wrapping_add(1));
//!     }
//! }
//!
//! let mut dev = Device::new(DeviceConfig::default(), NullBus, HostClock(Default::default()));
//! dev.attach(ChannelId::Ch0, ChannelConfig::default())?;
//! dev.setup();
//!
//! let mut port = dev.channel(ChannelId::Ch0).unwrap();
//! port.write(b"AT\r\n");
//! assert_eq!(port.available(), 0);
//! # Ok::<(), wk2132::ConfigError>(())
//! ```

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod bus;
pub mod channel;
pub mod device;
pub mod error;
pub mod registers;
pub mod ring;
pub mod timeout;

mod access;
#[cfg(test)]
mod sim;

pub use bus::{BusTransport, Clock};
pub use channel::{Channel, ChannelConfig, Parity, SerialChannel, StopBits};
pub use device::{ChannelId, Device, DeviceConfig, Lifecycle, TestMode};
pub use error::{BusError, ConfigError, FlushTimeout, Underrun};
pub use ring::RingBuffer;
pub use timeout::{TimeoutConfig, TimeoutResult, poll_with_timeout};
