// src/access.rs

//! Register handles and the device-shared addressing state.
//!
//! Every transaction depends on two pieces of shared state: the resolved
//! bus address and the active register page. All mutation of both funnels
//! through this module; the rest of the crate only sees the get/set
//! contracts and the scoped page switch. Addresses are computed and passed
//! with each transport call, so the address-then-transfer sequence contains
//! no suspension point another task could interleave with.

use log::{error, trace};

use crate::bus::BusTransport;
use crate::channel::Channel;
use crate::device::Device;
use crate::registers::{Page, bus_address, reg, reg_name};

/// Ephemeral proxy for one 8-bit register of the device.
///
/// Constructed per access; carries nothing across calls besides the
/// addressing triple. A failed transaction raises the device-wide
/// communication warning and substitutes 0; a successful one clears the
/// warning again, so the flag always reflects the most recent transaction.
pub(crate) struct RegisterHandle<'a, B: BusTransport> {
    bus: &'a mut B,
    warning: &'a mut bool,
    addr: u8,
    reg: u8,
    page: Page,
    channel: u8,
}

impl<'a, B: BusTransport> RegisterHandle<'a, B> {
    pub(crate) fn new(
        bus: &'a mut B,
        warning: &'a mut bool,
        addr: u8,
        reg: u8,
        page: Page,
        channel: u8,
    ) -> Self {
        Self {
            bus,
            warning,
            addr,
            reg,
            page,
            channel,
        }
    }

    /// Reads the register, or 0 when the transaction fails.
    pub(crate) fn get(&mut self) -> u8 {
        let mut value = [0u8; 1];
        match self.bus.read_register(self.addr, self.reg, &mut value) {
            Ok(()) => {
                *self.warning = false;
                trace!(
                    "rd {} @{:#04x} ch{} = {:#04x}",
                    reg_name(self.reg, self.page),
                    self.addr,
                    self.channel,
                    value[0]
                );
                value[0]
            }
            Err(_) => {
                *self.warning = true;
                error!(
                    "rd {} @{:#04x} ch{} failed",
                    reg_name(self.reg, self.page),
                    self.addr,
                    self.channel
                );
                0
            }
        }
    }

    /// Writes `value` to the register.
    pub(crate) fn set(&mut self, value: u8) {
        match self.bus.write_register(self.addr, self.reg, &[value]) {
            Ok(()) => {
                *self.warning = false;
                trace!(
                    "wr {} @{:#04x} ch{} = {:#04x}",
                    reg_name(self.reg, self.page),
                    self.addr,
                    self.channel,
                    value
                );
            }
            Err(_) => {
                *self.warning = true;
                error!(
                    "wr {} @{:#04x} ch{} = {:#04x} failed",
                    reg_name(self.reg, self.page),
                    self.addr,
                    self.channel,
                    value
                );
            }
        }
    }

    /// Read-modify-write: sets the bits of `mask`.
    pub(crate) fn or_assign(&mut self, mask: u8) {
        let value = self.get();
        self.set(value | mask);
    }

    /// Read-modify-write: clears the bits outside of `mask`.
    pub(crate) fn and_assign(&mut self, mask: u8) {
        let value = self.get();
        self.set(value & mask);
    }
}

impl<B: BusTransport, C> Device<B, C> {
    /// Handle on a global register, addressed through channel 0.
    pub(crate) fn global_reg(&mut self, reg: u8) -> RegisterHandle<'_, B> {
        RegisterHandle::new(
            &mut self.bus,
            &mut self.comm_warning,
            bus_address(self.base_address, 0, false),
            reg,
            self.active_page,
            0,
        )
    }
}

impl<'a, B: BusTransport, C> Channel<'a, B, C> {
    /// Handle on one of this channel's registers, resolved against the
    /// current page.
    pub(crate) fn reg(&mut self, reg: u8) -> RegisterHandle<'_, B> {
        RegisterHandle::new(
            self.bus,
            self.warning,
            bus_address(self.base_address, self.index, false),
            reg,
            *self.page,
            self.index,
        )
    }

    /// Selects `page` and records it as the device-wide active page.
    fn select_page(&mut self, page: Page) {
        self.reg(reg::PAGE_SELECT).set(page as u8);
        *self.page = page;
    }

    /// Runs `body` with `page` selected, restoring page 0 before returning.
    ///
    /// The restore happens on every non-panicking exit path, so no other
    /// channel can observe the device off page 0 between operations.
    pub(crate) fn with_page<R>(&mut self, page: Page, body: impl FnOnce(&mut Self) -> R) -> R {
        self.select_page(page);
        let result = body(self);
        self.select_page(Page::Page0);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim;

    #[test]
    fn test_rmw_helpers_preserve_unrelated_bits() {
        let (mut bus, _clock, chip) = sim::rig();
        let mut warning = false;
        chip.borrow_mut().uarts[0].page0[reg::LINE_CONTROL as usize] = 0xA0;

        let mut lcr = RegisterHandle::new(
            &mut bus,
            &mut warning,
            0x70,
            reg::LINE_CONTROL,
            Page::Page0,
            0,
        );
        lcr.or_assign(0x03);
        assert_eq!(
            chip.borrow().uarts[0].page0[reg::LINE_CONTROL as usize],
            0xA3
        );

        let mut lcr = RegisterHandle::new(
            &mut bus,
            &mut warning,
            0x70,
            reg::LINE_CONTROL,
            Page::Page0,
            0,
        );
        lcr.and_assign(0xF0);
        assert_eq!(
            chip.borrow().uarts[0].page0[reg::LINE_CONTROL as usize],
            0xA0
        );
        assert!(!warning);
    }

    #[test]
    fn test_failed_transaction_sets_warning_and_reads_zero() {
        let (mut bus, _clock, chip) = sim::rig();
        chip.borrow_mut().uarts[0].page0[reg::LINE_CONTROL as usize] = 0x55;
        chip.borrow_mut().fail_all = true;
        let mut warning = false;

        let mut lcr = RegisterHandle::new(
            &mut bus,
            &mut warning,
            0x70,
            reg::LINE_CONTROL,
            Page::Page0,
            0,
        );
        assert_eq!(lcr.get(), 0);
        assert!(warning);

        chip.borrow_mut().fail_all = false;
        let mut lcr = RegisterHandle::new(
            &mut bus,
            &mut warning,
            0x70,
            reg::LINE_CONTROL,
            Page::Page0,
            0,
        );
        assert_eq!(lcr.get(), 0x55);
        assert!(!warning);
    }
}
