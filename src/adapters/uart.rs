//! ESP-IDF UART transport.
//!
//! Wraps a configured [`UartDriver`] as a non-blocking [`Transport`].
//! Direction control is left to [`Rs485Port`](crate::bus::Rs485Port), so
//! the same adapter serves transceivers with automatic direction sensing.

use esp_idf_svc::hal::delay::{BLOCK, NON_BLOCK};
use esp_idf_svc::hal::uart::UartDriver;
use esp_idf_svc::sys::EspError;

use crate::bus::Transport;

pub struct UartTransport<'d> {
    uart: UartDriver<'d>,
}

impl<'d> UartTransport<'d> {
    pub fn new(uart: UartDriver<'d>) -> Self {
        Self { uart }
    }

    pub fn into_inner(self) -> UartDriver<'d> {
        self.uart
    }
}

impl Transport for UartTransport<'_> {
    type Error = EspError;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, EspError> {
        self.uart.read(buf, NON_BLOCK)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, EspError> {
        let mut written = 0;
        while written < data.len() {
            let n = self.uart.write(&data[written..])?;
            if n == 0 {
                break;
            }
            written += n;
        }
        Ok(written)
    }

    fn flush(&mut self) -> Result<(), EspError> {
        self.uart.wait_tx_done(BLOCK)
    }

    fn available(&self) -> bool {
        self.uart.remaining_read().is_ok_and(|n| n > 0)
    }
}
