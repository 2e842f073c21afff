// src/error.rs

//! Error types for the bridge driver.
//!
//! Every operation reports its outcome inline; none of these types is ever
//! propagated as a panic. A failed bus transaction degrades the device to a
//! warned state instead of halting it.

/// A bus transaction failed at the transport level.
///
/// The transport contract is a binary ok/error status, so this type carries
/// no further detail. The driver reacts by raising the device-wide
/// communication warning and substituting a zero/stale value; it never
/// retries on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusError;

impl core::fmt::Display for BusError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "bus transaction failed")
    }
}

/// Invalid channel configuration, rejected before any register is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// A baud rate of zero can not be programmed.
    BaudRateZero,
    /// The crystal is too slow for the requested baud rate; the divisor
    /// would underflow.
    DivisorUnderflow {
        /// Crystal frequency of the device.
        crystal_hz: u32,
        /// Requested baud rate.
        baud_rate: u32,
    },
    /// The crystal/baud combination exceeds the 16-bit divisor range.
    DivisorOverflow {
        /// Crystal frequency of the device.
        crystal_hz: u32,
        /// Requested baud rate.
        baud_rate: u32,
    },
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::BaudRateZero => write!(f, "baud rate must be non-zero"),
            ConfigError::DivisorUnderflow {
                crystal_hz,
                baud_rate,
            } => write!(
                f,
                "crystal at {crystal_hz} Hz is too slow for {baud_rate} Bd"
            ),
            ConfigError::DivisorOverflow {
                crystal_hz,
                baud_rate,
            } => write!(
                f,
                "divisor for {baud_rate} Bd at {crystal_hz} Hz exceeds 16 bits"
            ),
        }
    }
}

/// A read delivered fewer bytes than requested.
///
/// The delivered prefix of the caller's buffer is valid; `transferred` tells
/// how long it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Underrun {
    /// Number of bytes the caller asked for.
    pub requested: usize,
    /// Number of bytes actually delivered.
    pub transferred: usize,
}

impl core::fmt::Display for Underrun {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "read underrun: requested {} bytes, delivered {}",
            self.requested, self.transferred
        )
    }
}

/// `flush()` gave up before the device finished transmitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushTimeout {
    /// Bytes still queued on the device when the deadline expired.
    pub pending: usize,
}

impl core::fmt::Display for FlushTimeout {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "flush timed out with {} bytes unsent", self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(format!("{}", BusError), "bus transaction failed");
        assert_eq!(
            format!(
                "{}",
                Underrun {
                    requested: 32,
                    transferred: 8
                }
            ),
            "read underrun: requested 32 bytes, delivered 8"
        );
        assert_eq!(
            format!("{}", FlushTimeout { pending: 5 }),
            "flush timed out with 5 bytes unsent"
        );
        assert_eq!(
            format!(
                "{}",
                ConfigError::DivisorUnderflow {
                    crystal_hz: 14_745_600,
                    baud_rate: 2_000_000
                }
            ),
            "crystal at 14745600 Hz is too slow for 2000000 Bd"
        );
    }
}
