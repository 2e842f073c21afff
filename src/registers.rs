// src/registers.rs

//! Register map, bit definitions and bus addressing for the bridge chip.
//!
//! The chip multiplexes its register file through a device-wide page
//! selector: register numbers 0x04-0x06 name the serial/line/FIFO control
//! registers while page 0 is selected and the baud divisor bytes while
//! page 1 is selected. The page register itself and the global registers
//! are reachable from either page.

use bitflags::bitflags;

/// Bytes held by each direction's on-chip FIFO.
pub const FIFO_SIZE: usize = 256;

/// Upper bound for the payload of a single bus transaction.
pub const XFER_MAX_SIZE: usize = 255;

/// Register numbers (page 0 unless noted).
pub mod reg {
    /// Global clock-enable register, one enable bit per channel.
    pub const GLOBAL_ENABLE: u8 = 0x00;
    /// Global soft-reset register, one reset bit per channel.
    pub const GLOBAL_RESET: u8 = 0x01;
    /// Device-wide page selector.
    pub const PAGE_SELECT: u8 = 0x03;
    /// Serial control register (TX/RX enable).
    pub const SERIAL_CONTROL: u8 = 0x04;
    /// Line-control register (stop bits, parity).
    pub const LINE_CONTROL: u8 = 0x05;
    /// FIFO-control register (reset/enable both FIFOs).
    pub const FIFO_CONTROL: u8 = 0x06;
    /// Transmit FIFO byte count.
    pub const TX_COUNT: u8 = 0x09;
    /// Receive FIFO byte count.
    pub const RX_COUNT: u8 = 0x0A;
    /// FIFO status register.
    pub const FIFO_STATUS: u8 = 0x0B;

    /// Register numbers that replace 0x04-0x06 while page 1 is selected.
    pub mod page1 {
        /// Baud divisor, high byte.
        pub const BAUD_HIGH: u8 = 0x04;
        /// Baud divisor, low byte.
        pub const BAUD_LOW: u8 = 0x05;
        /// Baud divisor, decimal digit.
        pub const BAUD_DECIMAL: u8 = 0x06;
    }
}

bitflags! {
    /// Global clock-enable register bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GlobalEnable: u8 {
        /// Channel 0 clock enable.
        const CH0_CLOCK = 1 << 0;
        /// Channel 1 clock enable.
        const CH1_CLOCK = 1 << 1;
    }
}

bitflags! {
    /// Global soft-reset register bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GlobalReset: u8 {
        /// Channel 0 soft reset.
        const CH0_RESET = 1 << 0;
        /// Channel 1 soft reset.
        const CH1_RESET = 1 << 1;
    }
}

bitflags! {
    /// Serial control register bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SerialControl: u8 {
        /// Receiver enable.
        const RX_ENABLE = 1 << 0;
        /// Transmitter enable.
        const TX_ENABLE = 1 << 1;
    }
}

bitflags! {
    /// Line-control register bits. The upper nibble is reserved and must be
    /// preserved by read-modify-write.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LineControl: u8 {
        /// Two stop bits instead of one.
        const STOP_BITS_2 = 1 << 0;
        /// Parity selector, low bit (odd when set alone).
        const PARITY_SEL0 = 1 << 1;
        /// Parity selector, high bit (even when set alone).
        const PARITY_SEL1 = 1 << 2;
        /// Parity generation/checking enable.
        const PARITY_ENABLE = 1 << 3;
    }
}

bitflags! {
    /// FIFO-control register bits. The reset bits are self-clearing pulses.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FifoControl: u8 {
        /// Receive FIFO reset pulse.
        const RX_RESET = 1 << 0;
        /// Transmit FIFO reset pulse.
        const TX_RESET = 1 << 1;
        /// Receive FIFO enable.
        const RX_ENABLE = 1 << 2;
        /// Transmit FIFO enable.
        const TX_ENABLE = 1 << 3;
    }
}

bitflags! {
    /// FIFO status register bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FifoStatus: u8 {
        /// Transmitter busy shifting a byte out.
        const TX_BUSY = 1 << 0;
        /// Transmit FIFO full.
        const TX_FULL = 1 << 1;
        /// Transmit FIFO holds data (clear means empty).
        const TX_DATA = 1 << 2;
        /// Receive FIFO holds data (clear means empty).
        const RX_DATA = 1 << 3;
        /// A received byte failed its parity check.
        const PARITY_ERROR = 1 << 4;
        /// A received byte had a framing error.
        const FRAME_ERROR = 1 << 5;
        /// A line break was received.
        const LINE_BREAK = 1 << 6;
        /// The receive FIFO overflowed; cleared by reading this register.
        const RX_OVERFLOW = 1 << 7;
    }
}

/// Active register page of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Page {
    /// Control/status register file.
    #[default]
    Page0 = 0,
    /// Baud divisor register file.
    Page1 = 1,
}

/// Computes the bus address used to reach one channel of the device.
///
/// The device occupies a block of consecutive bus slots: the channel number
/// selects the pair and the low bit switches between the register file and
/// direct FIFO access.
#[inline]
pub const fn bus_address(base: u8, channel: u8, fifo: bool) -> u8 {
    base | (channel << 1) | fifo as u8
}

/// Datasheet mnemonic of a register number, for trace logs only.
pub fn reg_name(reg: u8, page: Page) -> &'static str {
    match (page, reg) {
        (_, self::reg::GLOBAL_ENABLE) => "GENA",
        (_, self::reg::GLOBAL_RESET) => "GRST",
        (_, self::reg::PAGE_SELECT) => "SPAGE",
        (Page::Page0, self::reg::SERIAL_CONTROL) => "SCR",
        (Page::Page0, self::reg::LINE_CONTROL) => "LCR",
        (Page::Page0, self::reg::FIFO_CONTROL) => "FCR",
        (Page::Page0, self::reg::TX_COUNT) => "TFCNT",
        (Page::Page0, self::reg::RX_COUNT) => "RFCNT",
        (Page::Page0, self::reg::FIFO_STATUS) => "FSR",
        (Page::Page1, self::reg::page1::BAUD_HIGH) => "BRH",
        (Page::Page1, self::reg::page1::BAUD_LOW) => "BRL",
        (Page::Page1, self::reg::page1::BAUD_DECIMAL) => "BRD",
        _ => "???",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_address_combinations() {
        for channel in 0..=1u8 {
            for fifo in [false, true] {
                assert_eq!(
                    bus_address(0x70, channel, fifo),
                    0x70 | (channel << 1) | fifo as u8
                );
            }
        }
        assert_eq!(bus_address(0x70, 0, false), 0x70);
        assert_eq!(bus_address(0x70, 0, true), 0x71);
        assert_eq!(bus_address(0x70, 1, false), 0x72);
        assert_eq!(bus_address(0x70, 1, true), 0x73);
    }

    #[test]
    fn test_reg_name_follows_page() {
        assert_eq!(reg_name(reg::SERIAL_CONTROL, Page::Page0), "SCR");
        assert_eq!(reg_name(reg::page1::BAUD_HIGH, Page::Page1), "BRH");
        assert_eq!(reg_name(reg::PAGE_SELECT, Page::Page1), "SPAGE");
    }
}
