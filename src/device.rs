// src/device.rs

//! Device controller: global bring-up, paging state and the periodic poll.
//!
//! The controller owns the bus transport, the clock, the device-wide
//! addressing state and both channels. Channel operations run through
//! short-lived [`Channel`] handles that borrow the controller exclusively,
//! which pins the whole driver to the cooperative single-operation model.

use log::{debug, error, trace, warn};

use crate::bus::{BusTransport, Clock};
use crate::channel::{Channel, ChannelConfig, ChannelState, baud_divisor};
use crate::error::ConfigError;
use crate::registers::{GlobalEnable, GlobalReset, Page, XFER_MAX_SIZE, reg};

/// One of the two serial channels of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelId {
    /// First channel, registers at the device's base address.
    Ch0,
    /// Second channel, registers two bus slots above the base address.
    Ch1,
}

impl ChannelId {
    /// Both channels, in setup order.
    pub const ALL: [ChannelId; 2] = [ChannelId::Ch0, ChannelId::Ch1];

    /// Zero-based channel index.
    pub const fn index(self) -> usize {
        self as usize
    }

    const fn enable_bit(self) -> GlobalEnable {
        match self {
            ChannelId::Ch0 => GlobalEnable::CH0_CLOCK,
            ChannelId::Ch1 => GlobalEnable::CH1_CLOCK,
        }
    }

    const fn reset_bit(self) -> GlobalReset {
        match self {
            ChannelId::Ch0 => GlobalReset::CH0_RESET,
            ChannelId::Ch1 => GlobalReset::CH1_RESET,
        }
    }
}

/// Diagnostic mode selector.
///
/// Only stored and surfaced by the driver; executing a mode is the host
/// harness's business, hooked in at [`Device::poll`] and the serial
/// primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TestMode {
    /// Normal operation.
    #[default]
    Off,
    /// Harness loops transmitted bytes back into the receiver.
    Loopback,
    /// Harness echoes received bytes back to the sender.
    Echo,
    /// Harness logs traffic without altering it.
    Sniff,
}

/// Device-wide configuration.
#[derive(Debug, Clone, Copy)]
pub struct DeviceConfig {
    /// Base bus address of the device (7-bit slot, low three bits clear).
    pub base_address: u8,
    /// Crystal frequency feeding the baud generators, in hertz.
    pub crystal_hz: u32,
    /// Upper bound for one bus transaction payload; clamped to
    /// [`XFER_MAX_SIZE`].
    pub max_transfer: usize,
    /// Diagnostic mode selector, surfaced via [`Device::test_mode`].
    pub test_mode: TestMode,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            base_address: 0x70,
            crystal_hz: 14_745_600,
            max_transfer: XFER_MAX_SIZE,
            test_mode: TestMode::Off,
        }
    }
}

/// Controller for one bridge chip on the bus.
pub struct Device<B, C> {
    pub(crate) bus: B,
    pub(crate) clock: C,
    pub(crate) base_address: u8,
    pub(crate) crystal_hz: u32,
    pub(crate) max_transfer: usize,
    test_mode: TestMode,
    pub(crate) active_page: Page,
    pub(crate) comm_warning: bool,
    failed: bool,
    pub(crate) channels: [Option<ChannelState>; 2],
}

/// Host-loop capability of the device controller.
pub trait Lifecycle {
    /// One-time bring-up; must run before any channel is used.
    fn setup(&mut self);

    /// Periodic service entry: drains pending device FIFO bytes into the
    /// receive caches. Returns the number of bytes moved. Also the hook
    /// point for diagnostic harnesses (see [`TestMode`]).
    fn poll(&mut self) -> usize;
}

impl<B: BusTransport, C: Clock> Device<B, C> {
    /// Creates a controller with no channels attached.
    pub fn new(config: DeviceConfig, bus: B, clock: C) -> Self {
        let max_transfer = config.max_transfer.min(XFER_MAX_SIZE);
        if max_transfer != config.max_transfer {
            warn!(
                "max transfer of {} clamped to the bus limit of {}",
                config.max_transfer, XFER_MAX_SIZE
            );
        }
        Self {
            bus,
            clock,
            base_address: config.base_address,
            crystal_hz: config.crystal_hz,
            max_transfer,
            test_mode: config.test_mode,
            active_page: Page::Page0,
            comm_warning: false,
            failed: false,
            channels: [None, None],
        }
    }

    /// Attaches a channel with its line configuration.
    ///
    /// The baud/crystal combination is validated here, before any register
    /// is programmed; a bad combination never reaches the device.
    pub fn attach(&mut self, id: ChannelId, config: ChannelConfig) -> Result<(), ConfigError> {
        baud_divisor(self.crystal_hz, config.baud_rate)?;
        debug!(
            "attached ch{} at {} Bd to the bridge at {:#04x}",
            id.index(),
            config.baud_rate,
            self.base_address
        );
        self.channels[id.index()] = Some(ChannelState::new(config));
        Ok(())
    }

    /// Global bring-up followed by per-channel setup, in channel order.
    ///
    /// A failure during the global steps marks the device failed but does
    /// not abort the channel setups; bring-up is best effort and the device
    /// keeps operating in a degraded state.
    pub fn setup(&mut self) {
        let mut enable = GlobalEnable::empty();
        let mut reset = GlobalReset::empty();
        for id in ChannelId::ALL {
            if self.channels[id.index()].is_some() {
                enable |= id.enable_bit();
                reset |= id.reset_bit();
            }
        }
        debug!(
            "setting up bridge at {:#04x} with {} channels",
            self.base_address,
            enable.bits().count_ones()
        );

        let mut healthy = true;
        self.global_reg(reg::GLOBAL_ENABLE).or_assign(enable.bits());
        healthy &= !self.comm_warning;
        self.global_reg(reg::GLOBAL_RESET).or_assign(reset.bits());
        healthy &= !self.comm_warning;
        self.global_reg(reg::PAGE_SELECT).set(Page::Page0 as u8);
        self.active_page = Page::Page0;
        healthy &= !self.comm_warning;

        if !healthy {
            self.failed = true;
            error!(
                "global bring-up of the bridge at {:#04x} failed; continuing channel setup",
                self.base_address
            );
        }

        for id in ChannelId::ALL {
            if let Some(mut channel) = self.channel(id) {
                channel.setup_registers();
            }
        }
    }

    /// Periodic service entry: one refill attempt per attached channel.
    pub fn poll(&mut self) -> usize {
        let mut moved = 0;
        for id in ChannelId::ALL {
            if let Some(mut channel) = self.channel(id) {
                moved += channel.refill();
            }
        }
        if moved > 0 {
            trace!("poll moved {moved} bytes into the receive caches");
        }
        moved
    }

    /// Handle for driving one channel, or `None` when it is not attached.
    pub fn channel(&mut self, id: ChannelId) -> Option<Channel<'_, B, C>> {
        let index = id.index();
        let Device {
            bus,
            clock,
            comm_warning,
            active_page,
            channels,
            base_address,
            crystal_hz,
            max_transfer,
            ..
        } = self;
        channels[index].as_mut().map(|state| Channel {
            bus,
            clock,
            warning: comm_warning,
            page: active_page,
            state,
            base_address: *base_address,
            crystal_hz: *crystal_hz,
            max_transfer: *max_transfer,
            index: index as u8,
        })
    }

    /// `true` when the most recent bus transaction failed.
    pub fn comm_warning(&self) -> bool {
        self.comm_warning
    }

    /// `true` when the global bring-up did not complete cleanly.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// The configured diagnostic mode.
    pub fn test_mode(&self) -> TestMode {
        self.test_mode
    }
}

impl<B: BusTransport, C: Clock> Lifecycle for Device<B, C> {
    fn setup(&mut self) {
        Device::setup(self);
    }

    fn poll(&mut self) -> usize {
        Device::poll(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::SerialChannel;
    use crate::registers::reg::page1;
    use crate::sim::{self, BusOp};

    #[test]
    fn test_setup_programs_registers_in_order() {
        let (bus, clock, chip) = sim::rig();
        let mut dev = Device::new(DeviceConfig::default(), bus, clock);
        dev.attach(ChannelId::Ch0, ChannelConfig::default()).unwrap();
        dev.setup();

        let writes: Vec<(u8, u8, u8)> = chip
            .borrow()
            .journal
            .iter()
            .filter_map(|op| match op {
                BusOp::WriteReg { addr, reg, value } => Some((*addr, *reg, *value)),
                _ => None,
            })
            .collect();
        assert_eq!(
            writes,
            vec![
                (0x70, reg::GLOBAL_ENABLE, 0x01),
                (0x70, reg::GLOBAL_RESET, 0x01),
                (0x70, reg::PAGE_SELECT, 0x00),
                (0x70, reg::SERIAL_CONTROL, 0x03),
                (0x70, reg::FIFO_CONTROL, 0x0F),
                (0x70, reg::LINE_CONTROL, 0x00),
                (0x70, reg::LINE_CONTROL, 0x00),
                (0x70, reg::PAGE_SELECT, 0x01),
                (0x70, page1::BAUD_HIGH, 0x00),
                (0x70, page1::BAUD_LOW, 95),
                (0x70, page1::BAUD_DECIMAL, 0x00),
                (0x70, reg::PAGE_SELECT, 0x00),
            ]
        );
        assert!(!dev.is_failed());
    }

    #[test]
    fn test_setup_enables_both_attached_channels() {
        let (bus, clock, chip) = sim::rig();
        let mut dev = Device::new(DeviceConfig::default(), bus, clock);
        dev.attach(ChannelId::Ch0, ChannelConfig::default()).unwrap();
        dev.attach(ChannelId::Ch1, ChannelConfig::default()).unwrap();
        dev.setup();

        let chip = chip.borrow();
        assert_eq!(chip.enable, 0x03);
        assert_eq!(chip.reset, 0x03);
        // second channel's registers were programmed through its own slot
        assert!(chip.journal.contains(&BusOp::WriteReg {
            addr: 0x72,
            reg: reg::SERIAL_CONTROL,
            value: 0x03
        }));
        assert_eq!(chip.uarts[1].page1[page1::BAUD_LOW as usize], 95);
    }

    #[test]
    fn test_line_config_preserves_reserved_bits() {
        let (bus, clock, chip) = sim::rig();
        chip.borrow_mut().uarts[0].page0[reg::LINE_CONTROL as usize] = 0xA0;
        let mut dev = Device::new(DeviceConfig::default(), bus, clock);
        let config = ChannelConfig {
            stop_bits: crate::channel::StopBits::Two,
            parity: crate::channel::Parity::Odd,
            ..ChannelConfig::default()
        };
        dev.attach(ChannelId::Ch0, config).unwrap();
        dev.setup();

        // upper nibble kept, stop/parity encoded in the lower nibble
        assert_eq!(
            chip.borrow().uarts[0].page0[reg::LINE_CONTROL as usize],
            0xA0 | 0x01 | 0x08 | 0x02
        );
    }

    #[test]
    fn test_attach_rejects_invalid_baud_before_touching_the_bus() {
        let (bus, clock, chip) = sim::rig();
        let mut dev = Device::new(DeviceConfig::default(), bus, clock);
        let config = ChannelConfig {
            baud_rate: 2_000_000,
            ..ChannelConfig::default()
        };
        assert!(matches!(
            dev.attach(ChannelId::Ch0, config),
            Err(ConfigError::DivisorUnderflow { .. })
        ));
        assert!(dev.channel(ChannelId::Ch0).is_none());
        assert!(chip.borrow().journal.is_empty());
    }

    #[test]
    fn test_failed_bring_up_is_best_effort() {
        let (bus, clock, chip) = sim::rig();
        chip.borrow_mut().fail_all = true;
        let mut dev = Device::new(DeviceConfig::default(), bus, clock);
        dev.attach(ChannelId::Ch0, ChannelConfig::default()).unwrap();
        dev.setup();

        assert!(dev.is_failed());
        assert!(dev.comm_warning());
        // channel setup was still attempted
        assert!(chip.borrow().journal.iter().any(|op| matches!(
            op,
            BusOp::WriteReg {
                reg: reg::SERIAL_CONTROL,
                ..
            }
        )));
    }

    #[test]
    fn test_poll_prefetches_for_every_channel() {
        let (bus, clock, chip) = sim::rig();
        let mut dev = Device::new(DeviceConfig::default(), bus, clock);
        dev.attach(ChannelId::Ch0, ChannelConfig::default()).unwrap();
        dev.attach(ChannelId::Ch1, ChannelConfig::default()).unwrap();
        dev.setup();

        chip.borrow_mut().uarts[0].rx.extend(0..10u8);
        chip.borrow_mut().uarts[1].rx.extend(0..6u8);
        assert_eq!(dev.poll(), 16);

        // the caches now serve both channels without further bus reads
        chip.borrow_mut().journal.clear();
        let mut ch = dev.channel(ChannelId::Ch1).unwrap();
        assert_eq!(ch.available(), 6);
        assert_eq!(sim::fifo_reads(&chip), 0);
    }

    #[test]
    fn test_lifecycle_capability_drives_the_device() {
        fn drive<L: Lifecycle>(host: &mut L) -> usize {
            host.setup();
            host.poll()
        }

        let (bus, clock, chip) = sim::rig();
        let mut dev = Device::new(DeviceConfig::default(), bus, clock);
        dev.attach(ChannelId::Ch0, ChannelConfig::default()).unwrap();
        chip.borrow_mut().uarts[0].rx.extend([1u8, 2, 3]);
        assert_eq!(drive(&mut dev), 3);
    }

    #[test]
    fn test_test_mode_is_surfaced() {
        let (bus, clock, _chip) = sim::rig();
        let config = DeviceConfig {
            test_mode: TestMode::Echo,
            ..DeviceConfig::default()
        };
        let dev: Device<_, _> = Device::new(config, bus, clock);
        assert_eq!(dev.test_mode(), TestMode::Echo);
    }
}
