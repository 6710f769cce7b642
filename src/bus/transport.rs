//! Transport abstraction: the physical half-duplex channel.
//!
//! Concrete implementations:
//! - ESP-IDF UART ([`crate::adapters::uart`])
//! - Simulated buses in tests
//!
//! [`Rs485Port`] adds transceiver direction control on top of any
//! transport: the driver-enable line is asserted for exactly the duration
//! of one outbound frame.

use embedded_hal::digital::OutputPin;
use log::warn;

use crate::error::BusError;

/// Byte-oriented transport channel.
pub trait Transport {
    /// Error type for this transport.
    type Error: core::fmt::Debug;

    /// Read up to `buf.len()` bytes into `buf`.
    /// Returns the number of bytes actually read.
    /// Returns 0 if no data is available (non-blocking).
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Write `data` to the transport.
    /// Returns the number of bytes actually written.
    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error>;

    /// Block until every written byte has left the shift register.
    fn flush(&mut self) -> Result<(), Self::Error>;

    /// Check if data is available for reading.
    fn available(&self) -> bool;
}

/// Object-safe frame output used by [`Lease`](super::lease::Lease).
pub trait FrameWriter {
    /// Write one complete frame and wait until it is on the wire.
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), BusError>;
}

impl<T: Transport> FrameWriter for T {
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), BusError> {
        let written = self.write(frame).map_err(|e| {
            warn!("bus: write failed: {:?}", e);
            BusError::WriteFailed
        })?;
        self.flush().map_err(|e| {
            warn!("bus: flush failed: {:?}", e);
            BusError::WriteFailed
        })?;
        if written == frame.len() {
            Ok(())
        } else {
            Err(BusError::ShortWrite)
        }
    }
}

/// A null transport that discards all writes and never reads.
pub struct NullTransport;

impl Transport for NullTransport {
    type Error = ();

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, ()> {
        Ok(0)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, ()> {
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<(), ()> {
        Ok(())
    }

    fn available(&self) -> bool {
        false
    }
}

// ───────────────────────────────────────────────────────────────
// RS-485 direction control
// ───────────────────────────────────────────────────────────────

/// Error from an [`Rs485Port`]: either the line or the DE pin failed.
#[derive(Debug)]
pub enum Rs485Error<T, P> {
    Line(T),
    DriverEnable(P),
}

/// Half-duplex port: asserts DE, writes, flushes, then releases DE.
///
/// The driver is released on every path out of `write`, including errors,
/// so a failed send never leaves the transceiver holding the bus.
pub struct Rs485Port<T, P> {
    line: T,
    driver_enable: P,
}

impl<T: Transport, P: OutputPin> Rs485Port<T, P> {
    pub fn new(line: T, mut driver_enable: P) -> Self {
        // Start in receive mode.
        let _ = driver_enable.set_low();
        Self {
            line,
            driver_enable,
        }
    }

    pub fn into_parts(self) -> (T, P) {
        (self.line, self.driver_enable)
    }
}

impl<T: Transport, P: OutputPin> Transport for Rs485Port<T, P> {
    type Error = Rs485Error<T::Error, P::Error>;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.line.read(buf).map_err(Rs485Error::Line)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
        self.driver_enable
            .set_high()
            .map_err(Rs485Error::DriverEnable)?;
        let result = self
            .line
            .write(data)
            .and_then(|n| self.line.flush().map(|()| n))
            .map_err(Rs485Error::Line);
        let released = self.driver_enable.set_low().map_err(Rs485Error::DriverEnable);
        let n = result?;
        released?;
        Ok(n)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        // `write` already drained the line before releasing the driver.
        Ok(())
    }

    fn available(&self) -> bool {
        self.line.available()
    }
}
