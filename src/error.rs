//! Driver errors

use embedded_hal::{i2c, spi};

/// Error returned by configuration and transfer functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// A bounded poll ran out of budget before the hardware answered.
    Timeout,
    /// The peripheral is enabled and must be disabled for this operation.
    Enabled,
    /// The peripheral ended up in an unknown state and needs a reset through the RCC.
    InvalidState,
    /// The addressed device did not acknowledge.
    Nack,
    /// Misplaced start or stop condition on the bus.
    Bus,
    /// Arbitration lost.
    Arbitration,
    /// Data was lost because it was not read in time.
    Overrun,
    /// SPI mode fault (NSS pulled low in master mode).
    ModeFault,
    /// The instance does not implement the requested feature.
    Unsupported,
    /// A configuration value does not fit the hardware field.
    OutOfRange,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            Error::Timeout => "timeout",
            Error::Enabled => "peripheral enabled",
            Error::InvalidState => "peripheral in unknown state",
            Error::Nack => "no acknowledge",
            Error::Bus => "bus error",
            Error::Arbitration => "arbitration lost",
            Error::Overrun => "overrun",
            Error::ModeFault => "mode fault",
            Error::Unsupported => "not supported by this instance",
            Error::OutOfRange => "value out of range",
        };
        f.write_str(msg)
    }
}

impl i2c::Error for Error {
    fn kind(&self) -> i2c::ErrorKind {
        match self {
            Error::Nack => i2c::ErrorKind::NoAcknowledge(i2c::NoAcknowledgeSource::Unknown),
            Error::Bus => i2c::ErrorKind::Bus,
            Error::Arbitration => i2c::ErrorKind::ArbitrationLoss,
            Error::Overrun => i2c::ErrorKind::Overrun,
            _ => i2c::ErrorKind::Other,
        }
    }
}

impl spi::Error for Error {
    fn kind(&self) -> spi::ErrorKind {
        match self {
            Error::Overrun => spi::ErrorKind::Overrun,
            Error::ModeFault => spi::ErrorKind::ModeFault,
            _ => spi::ErrorKind::Other,
        }
    }
}
