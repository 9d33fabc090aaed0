//! Bus transports carrying RMI4 register traffic.
//!
//! The core only ever talks to the device through [`Transport`]. Adapters for
//! `embedded-hal-async` I²C and SPI devices are provided; anything else (a
//! HID tunnel, an SMBus host notify bridge, a test double) can implement the
//! trait directly.

use crate::reg::DEVICE_RESET_CMD;

mod i2c;
mod spi;

pub use i2c::*;
pub use spi::*;

/// Retries an adapter performs before surfacing a bus error.
pub const DEFAULT_RETRIES: u8 = 2;

/// Byte-level access to the 16-bit RMI4 register space.
///
/// Implementations own any retry policy; an `Err` returned from here is final
/// as far as the core is concerned.
#[allow(async_fn_in_trait)]
pub trait Transport {
  type Error: core::fmt::Debug;

  /// Short protocol name used in diagnostics, e.g. `"i2c"`.
  fn proto_name(&self) -> &'static str;

  /// Read `buf.len()` bytes starting at `addr`.
  async fn read_block(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), Self::Error>;

  /// Write `data` starting at `addr`.
  async fn write_block(&mut self, addr: u16, data: &[u8]) -> Result<(), Self::Error>;

  /// Bring the bus side up (power sequencing, page state) before first use.
  async fn enable(&mut self) -> Result<(), Self::Error> {
    Ok(())
  }

  /// Release the bus side. Nothing is read or written afterwards until
  /// [`Transport::enable`] is called again.
  async fn disable(&mut self) {}

  /// Issue a device reset through the command register at `reset_addr`.
  ///
  /// The caller waits for the firmware to come back; implementations only
  /// need to send the command and forget any cached device state.
  async fn reset(&mut self, reset_addr: u16) -> Result<(), Self::Error> {
    self.write_block(reset_addr, &[DEVICE_RESET_CMD]).await
  }
}
