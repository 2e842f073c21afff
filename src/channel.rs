// src/channel.rs

//! Channel driver: line and baud configuration, FIFO accounting and the
//! byte-stream serial contract.
//!
//! Each channel keeps a local receive cache so that the number of bus
//! transactions scales with the amount of data moved, not with the number
//! of `read` calls. The common naive client pattern, checking `available()`
//! and then reading one byte at a time, would otherwise cost two bus round
//! trips per byte; with the cache it costs one occupancy query plus one
//! bulk FIFO read per burst, and every single-byte read in between is
//! served locally.

use log::{debug, error, trace, warn};

use crate::access::RegisterHandle;
use crate::bus::{BusTransport, Clock};
use crate::error::{ConfigError, FlushTimeout, Underrun};
use crate::registers::{
    FIFO_SIZE, FifoControl, FifoStatus, LineControl, Page, SerialControl, XFER_MAX_SIZE,
    bus_address, reg,
};
use crate::ring::RingBuffer;
use crate::timeout::{TimeoutConfig, TimeoutResult, poll_with_timeout};

/// Number of stop bits appended to each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    /// One stop bit.
    #[default]
    One,
    /// Two stop bits.
    Two,
}

/// Parity mode of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    /// No parity bit.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Line and policy configuration of one channel.
///
/// Data bits are fixed at 8 by the device and therefore not configurable.
#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig {
    /// Baud rate in bits per second. Validated against the crystal when the
    /// channel is attached.
    pub baud_rate: u32,
    /// Stop bit count.
    pub stop_bits: StopBits,
    /// Parity mode.
    pub parity: Parity,
    /// When set, `read` waits (bounded) for the device to accumulate the
    /// requested bytes and `write` respects the device FIFO's free space.
    pub safe_mode: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            stop_bits: StopBits::One,
            parity: Parity::None,
            safe_mode: false,
        }
    }
}

/// The local mirror of a prefix of the device's receive FIFO.
pub(crate) type ReceiveCache = RingBuffer<u8, XFER_MAX_SIZE>;

/// Per-channel state owned by the device controller.
pub(crate) struct ChannelState {
    pub(crate) config: ChannelConfig,
    pub(crate) cache: ReceiveCache,
}

impl ChannelState {
    pub(crate) fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            cache: ReceiveCache::new(),
        }
    }
}

/// Byte-stream serial capability exposed by each channel.
///
/// Both usage patterns work: query `available()` and bulk-`read`, or read
/// one byte at a time. The receive cache exists to make the second pattern
/// as cheap as the first.
pub trait SerialChannel {
    /// Bytes that can be read without touching the device, after at most
    /// one cache refill.
    fn available(&mut self) -> usize;

    /// Next readable byte without consuming it, refilling the cache first
    /// if needed. `None` when nothing is pending.
    fn peek(&mut self) -> Option<u8>;

    /// Fills `buf` from the receive cache. On underrun the delivered prefix
    /// is valid and its length is reported in the error.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Underrun>;

    /// Queues `buf` on the device's transmit FIFO in one bus transaction,
    /// clamped to the transfer limit. Returns the number of bytes accepted;
    /// the caller must reissue the remainder.
    fn write(&mut self, buf: &[u8]) -> usize;

    /// Waits (bounded) until the device has transmitted everything queued.
    fn flush(&mut self) -> Result<(), FlushTimeout>;

    /// Reads a single byte.
    fn read_byte(&mut self) -> Option<u8> {
        let mut byte = [0u8; 1];
        self.read(&mut byte).ok().map(|_| byte[0])
    }

    /// Writes a single byte. Returns `false` when it was not accepted.
    fn write_byte(&mut self, byte: u8) -> bool {
        self.write(&[byte]) == 1
    }
}

/// Short-lived handle for driving one channel of a device.
///
/// Borrows the device exclusively, which is what makes every
/// address-then-transfer sequence indivisible under cooperative
/// multitasking: no other operation on the same device can run while a
/// handle exists.
pub struct Channel<'a, B, C> {
    pub(crate) bus: &'a mut B,
    pub(crate) clock: &'a mut C,
    pub(crate) warning: &'a mut bool,
    pub(crate) page: &'a mut Page,
    pub(crate) state: &'a mut ChannelState,
    pub(crate) base_address: u8,
    pub(crate) crystal_hz: u32,
    pub(crate) max_transfer: usize,
    pub(crate) index: u8,
}

/// The three bytes programmed into the baud divisor registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BaudDivisor {
    pub(crate) high: u8,
    pub(crate) low: u8,
    pub(crate) decimal: u8,
}

/// Computes the divisor for `baud_rate` from the crystal frequency.
///
/// The device divides the crystal by 16 per bit tick; the integer divisor
/// is programmed minus one, and the fractional remainder is reduced to the
/// single decimal digit the chip accepts.
pub(crate) fn baud_divisor(crystal_hz: u32, baud_rate: u32) -> Result<BaudDivisor, ConfigError> {
    if baud_rate == 0 {
        return Err(ConfigError::BaudRateZero);
    }
    let Some(tick_hz) = baud_rate.checked_mul(16) else {
        return Err(ConfigError::DivisorUnderflow {
            crystal_hz,
            baud_rate,
        });
    };
    if crystal_hz < tick_hz {
        return Err(ConfigError::DivisorUnderflow {
            crystal_hz,
            baud_rate,
        });
    }
    let divisor = crystal_hz / tick_hz - 1;
    if divisor > u32::from(u16::MAX) {
        return Err(ConfigError::DivisorOverflow {
            crystal_hz,
            baud_rate,
        });
    }
    let mut decimal = (crystal_hz % tick_hz) / tick_hz;
    while decimal > 10 {
        decimal /= 10;
    }
    Ok(BaudDivisor {
        high: (divisor >> 8) as u8,
        low: divisor as u8,
        decimal: decimal as u8,
    })
}

fn rx_pending_parts<B: BusTransport>(
    bus: &mut B,
    warning: &mut bool,
    base: u8,
    index: u8,
) -> usize {
    let addr = bus_address(base, index, false);
    let count =
        RegisterHandle::new(&mut *bus, &mut *warning, addr, reg::RX_COUNT, Page::Page0, index)
            .get() as usize;
    if count != 0 {
        return count;
    }
    // A count of 0 is ambiguous between empty and exactly full; the status
    // register settles it.
    let fsr = FifoStatus::from_bits_truncate(
        RegisterHandle::new(bus, warning, addr, reg::FIFO_STATUS, Page::Page0, index).get(),
    );
    if fsr.contains(FifoStatus::RX_DATA) {
        FIFO_SIZE
    } else {
        0
    }
}

fn refill_parts<B: BusTransport>(
    bus: &mut B,
    warning: &mut bool,
    cache: &mut ReceiveCache,
    base: u8,
    index: u8,
    max_transfer: usize,
) -> usize {
    let pending = rx_pending_parts(bus, warning, base, index);
    let quota = pending.min(max_transfer).min(cache.free());
    if quota == 0 {
        return 0;
    }
    let mut chunk = [0u8; XFER_MAX_SIZE];
    let addr = bus_address(base, index, true);
    match bus.read(addr, &mut chunk[..quota]) {
        Ok(()) => {
            *warning = false;
            for &byte in &chunk[..quota] {
                if !cache.push(byte) {
                    break;
                }
            }
            trace!("ch{index}: cached {quota} bytes from the device fifo");
            quota
        }
        Err(_) => {
            *warning = true;
            error!("ch{index}: bulk fifo read of {quota} bytes failed");
            0
        }
    }
}

impl<'a, B: BusTransport, C: Clock> Channel<'a, B, C> {
    /// Programs line format, baud rate and FIFOs. Runs once from the device
    /// controller's setup, after the global bring-up.
    pub(crate) fn setup_registers(&mut self) {
        debug!("ch{}: configuring serial channel", self.index);
        self.reg(reg::SERIAL_CONTROL)
            .set((SerialControl::RX_ENABLE | SerialControl::TX_ENABLE).bits());
        self.reset_fifos();
        self.state.cache.clear();
        self.set_line_params();
        self.set_baud_rate();
    }

    /// Pulses both FIFO resets and leaves both FIFOs enabled.
    fn reset_fifos(&mut self) {
        let fcr = FifoControl::RX_RESET
            | FifoControl::TX_RESET
            | FifoControl::RX_ENABLE
            | FifoControl::TX_ENABLE;
        self.reg(reg::FIFO_CONTROL).set(fcr.bits());
    }

    fn set_line_params(&mut self) {
        let mut low = LineControl::empty();
        if self.state.config.stop_bits == StopBits::Two {
            low |= LineControl::STOP_BITS_2;
        }
        match self.state.config.parity {
            Parity::None => {}
            Parity::Odd => low |= LineControl::PARITY_ENABLE | LineControl::PARITY_SEL0,
            Parity::Even => low |= LineControl::PARITY_ENABLE | LineControl::PARITY_SEL1,
        }
        // The upper nibble does not belong to the line format.
        let mut lcr = self.reg(reg::LINE_CONTROL);
        lcr.and_assign(0xF0);
        lcr.or_assign(low.bits());
        trace!(
            "ch{}: line config 8 data bits, {:?} stop bits, parity {:?}",
            self.index, self.state.config.stop_bits, self.state.config.parity
        );
    }

    /// Programs the baud divisor inside a page-1 section.
    fn set_baud_rate(&mut self) {
        let baud_rate = self.state.config.baud_rate;
        let divisor = match baud_divisor(self.crystal_hz, baud_rate) {
            Ok(divisor) => divisor,
            Err(err) => {
                // attach() validates the combination before the state exists
                error!("ch{}: {err}", self.index);
                return;
            }
        };
        self.with_page(Page::Page1, |ch| {
            ch.reg(reg::page1::BAUD_HIGH).set(divisor.high);
            ch.reg(reg::page1::BAUD_LOW).set(divisor.low);
            ch.reg(reg::page1::BAUD_DECIMAL).set(divisor.decimal);
        });
        trace!(
            "ch{}: {} Bd from {} Hz, divisor bytes [{} {} {}]",
            self.index, baud_rate, self.crystal_hz, divisor.high, divisor.low, divisor.decimal
        );
    }

    /// Bytes still queued in the device's transmit FIFO.
    fn tx_pending(&mut self) -> usize {
        let count = self.reg(reg::TX_COUNT).get() as usize;
        if count != 0 {
            return count;
        }
        let fsr = FifoStatus::from_bits_truncate(self.reg(reg::FIFO_STATUS).get());
        if fsr.contains(FifoStatus::TX_FULL) {
            FIFO_SIZE
        } else {
            0
        }
    }

    /// Moves pending device FIFO bytes into the receive cache with at most
    /// one bulk bus read. Returns the number of bytes moved.
    ///
    /// This is the single amortization point of the driver: one bus
    /// transaction here services an arbitrary number of later single-byte
    /// reads.
    pub(crate) fn refill(&mut self) -> usize {
        refill_parts(
            self.bus,
            self.warning,
            &mut self.state.cache,
            self.base_address,
            self.index,
            self.max_transfer,
        )
    }

    /// Safe-mode wait: keeps refilling until `want` bytes are cached or the
    /// transfer deadline expires, yielding between polls.
    fn wait_for_cached(&mut self, want: usize) {
        let target = want.min(self.state.cache.capacity());
        if target < want {
            warn!(
                "ch{}: read of {} bytes exceeds the {}-byte cache",
                self.index,
                want,
                self.state.cache.capacity()
            );
        }
        let base = self.base_address;
        let max_transfer = self.max_transfer;
        let index = self.index;
        let Self {
            bus,
            clock,
            warning,
            state,
            ..
        } = self;
        let outcome = poll_with_timeout(&mut **clock, TimeoutConfig::transfer(), || {
            refill_parts(
                &mut **bus,
                &mut **warning,
                &mut state.cache,
                base,
                index,
                max_transfer,
            );
            state.cache.len() >= target
        });
        if let TimeoutResult::Timeout { waited_ms } = outcome {
            warn!(
                "ch{}: waited {} ms for {} bytes, only {} arrived",
                index,
                waited_ms,
                target,
                state.cache.len()
            );
        }
    }
}

impl<'a, B: BusTransport, C: Clock> SerialChannel for Channel<'a, B, C> {
    fn available(&mut self) -> usize {
        if self.state.cache.is_empty() {
            self.refill();
        }
        self.state.cache.len()
    }

    fn peek(&mut self) -> Option<u8> {
        if self.state.cache.is_empty() {
            self.refill();
        }
        self.state.cache.peek()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Underrun> {
        let want = buf.len();
        if self.state.cache.len() < want {
            if self.state.config.safe_mode {
                self.wait_for_cached(want);
            } else {
                self.refill();
            }
        }
        let mut transferred = 0;
        while transferred < want {
            match self.state.cache.pop() {
                Some(byte) => {
                    buf[transferred] = byte;
                    transferred += 1;
                }
                None => break,
            }
        }
        if transferred < want {
            warn!(
                "ch{}: read underrun: requested {} bytes, delivered {}",
                self.index, want, transferred
            );
            return Err(Underrun {
                requested: want,
                transferred,
            });
        }
        Ok(transferred)
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        let mut len = buf.len();
        if len > self.max_transfer {
            warn!(
                "ch{}: write of {} bytes clamped to the {}-byte transfer limit",
                self.index, len, self.max_transfer
            );
            len = self.max_transfer;
        }
        if self.state.config.safe_mode {
            let room = FIFO_SIZE.saturating_sub(self.tx_pending());
            if len > room {
                warn!(
                    "ch{}: write clamped to the {} free bytes of the device fifo",
                    self.index, room
                );
                len = room;
            }
        }
        if len == 0 {
            return 0;
        }
        let addr = bus_address(self.base_address, self.index, true);
        match self.bus.write(addr, &buf[..len]) {
            Ok(()) => {
                *self.warning = false;
                trace!("ch{}: wrote {} bytes to the device fifo", self.index, len);
            }
            Err(_) => {
                *self.warning = true;
                error!("ch{}: bulk fifo write of {} bytes failed", self.index, len);
            }
        }
        len
    }

    fn flush(&mut self) -> Result<(), FlushTimeout> {
        let addr = bus_address(self.base_address, self.index, false);
        let index = self.index;
        let Self {
            bus,
            clock,
            warning,
            page,
            ..
        } = self;
        let page_now = **page;
        let outcome = poll_with_timeout(&mut **clock, TimeoutConfig::transfer(), || {
            let fsr = FifoStatus::from_bits_truncate(
                RegisterHandle::new(
                    &mut **bus,
                    &mut **warning,
                    addr,
                    reg::FIFO_STATUS,
                    page_now,
                    index,
                )
                .get(),
            );
            !fsr.contains(FifoStatus::TX_DATA)
        });
        match outcome {
            TimeoutResult::Ok(()) => Ok(()),
            TimeoutResult::Timeout { waited_ms } => {
                let pending = self.tx_pending();
                error!("ch{index}: flush timed out after {waited_ms} ms, {pending} bytes unsent");
                Err(FlushTimeout { pending })
            }
        }
    }
}
