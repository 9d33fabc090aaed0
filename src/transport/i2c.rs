use embedded_hal::i2c::{Operation, SevenBitAddress};
use embedded_hal_async::i2c::I2c;

use super::{Transport, DEFAULT_RETRIES};
use crate::reg::{DEVICE_RESET_CMD, PAGE_SELECT_REG};

/// Default 7-bit address of RMI4 sensors on I²C.
pub const DEFAULT_I2C_ADDR: SevenBitAddress = 0x2C;

/// RMI4 over I²C.
///
/// Each transaction is an 8-bit in-page offset; the page is selected by a
/// separate write to the page select register whenever it changes.
pub struct I2cTransport<I> {
  i2c: I,
  addr: SevenBitAddress,
  page: Option<u8>,
  retries: u8,
}

impl<I> I2cTransport<I> {
  pub fn new(i2c: I, addr: SevenBitAddress) -> Self {
    Self { i2c, addr, page: None, retries: DEFAULT_RETRIES }
  }

  /// Number of extra attempts made before a failed transfer is reported.
  pub fn with_retries(mut self, retries: u8) -> Self {
    self.retries = retries;
    self
  }

  /// Give back the underlying bus.
  pub fn release(self) -> I {
    self.i2c
  }
}

impl<I> I2cTransport<I>
where
  I: I2c<SevenBitAddress>,
{
  async fn select_page(&mut self, page: u8) -> Result<(), I::Error> {
    if self.page == Some(page) {
      return Ok(());
    }

    // The device state is unknown after a failed select, so force a rewrite.
    self.page = None;
    self.i2c.write(self.addr, &[PAGE_SELECT_REG, page]).await?;
    self.page = Some(page);
    Ok(())
  }

  async fn try_read(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), I::Error> {
    let [page, offset] = addr.to_be_bytes();
    self.select_page(page).await?;
    self.i2c.write_read(self.addr, &[offset], buf).await
  }

  async fn try_write(&mut self, addr: u16, data: &[u8]) -> Result<(), I::Error> {
    let [page, offset] = addr.to_be_bytes();
    self.select_page(page).await?;
    // Adjacent writes in one transaction go out back to back.
    self
      .i2c
      .transaction(self.addr, &mut [Operation::Write(&[offset]), Operation::Write(data)])
      .await
  }
}

impl<I> Transport for I2cTransport<I>
where
  I: I2c<SevenBitAddress>,
{
  type Error = I::Error;

  fn proto_name(&self) -> &'static str {
    "i2c"
  }

  async fn read_block(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), Self::Error> {
    let mut attempt = 0;
    loop {
      match self.try_read(addr, buf).await {
        Ok(()) => return Ok(()),
        Err(e) if attempt >= self.retries => return Err(e),
        Err(_) => {
          attempt += 1;
          debug!("i2c read at {:#x} failed, retry {}", addr, attempt);
        }
      }
    }
  }

  async fn write_block(&mut self, addr: u16, data: &[u8]) -> Result<(), Self::Error> {
    let mut attempt = 0;
    loop {
      match self.try_write(addr, data).await {
        Ok(()) => return Ok(()),
        Err(e) if attempt >= self.retries => return Err(e),
        Err(_) => {
          attempt += 1;
          debug!("i2c write at {:#x} failed, retry {}", addr, attempt);
        }
      }
    }
  }

  async fn enable(&mut self) -> Result<(), Self::Error> {
    self.page = None;
    self.select_page(0).await
  }

  async fn disable(&mut self) {
    self.page = None;
  }

  async fn reset(&mut self, reset_addr: u16) -> Result<(), Self::Error> {
    self.write_block(reset_addr, &[DEVICE_RESET_CMD]).await?;
    // Whatever page the firmware comes back on, select it again before use.
    self.page = None;
    Ok(())
  }
}
