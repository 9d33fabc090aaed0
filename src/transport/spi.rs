use embedded_hal::spi::Operation;
use embedded_hal_async::spi::SpiDevice;

use super::{Transport, DEFAULT_RETRIES};
use crate::reg::{self, PAGE_SELECT_REG};

const SPI_READ: u8 = 0x80;

/// RMI4 over SPI (V1 framing).
///
/// Every transfer starts with a two byte big-endian address header; bit 7 of
/// the first byte marks a read. Pages are selected the same way as on I²C.
pub struct SpiTransport<S> {
  spi: S,
  page: Option<u8>,
  retries: u8,
}

impl<S> SpiTransport<S> {
  pub fn new(spi: S) -> Self {
    Self { spi, page: None, retries: DEFAULT_RETRIES }
  }

  pub fn with_retries(mut self, retries: u8) -> Self {
    self.retries = retries;
    self
  }

  pub fn release(self) -> S {
    self.spi
  }
}

const fn read_header(addr: u16) -> [u8; 2] {
  let [hi, lo] = addr.to_be_bytes();
  [hi | SPI_READ, lo]
}

const fn write_header(addr: u16) -> [u8; 2] {
  let [hi, lo] = addr.to_be_bytes();
  [hi & !SPI_READ, lo]
}

impl<S: SpiDevice> SpiTransport<S> {
  async fn select_page(&mut self, page: u8) -> Result<(), S::Error> {
    if self.page == Some(page) {
      return Ok(());
    }

    self.page = None;
    let header = write_header(reg::addr(0, PAGE_SELECT_REG));
    self.spi.transaction(&mut [Operation::Write(&header), Operation::Write(&[page])]).await?;
    self.page = Some(page);
    Ok(())
  }

  async fn try_read(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), S::Error> {
    self.select_page(reg::page_of(addr)).await?;
    let header = read_header(addr);
    self.spi.transaction(&mut [Operation::Write(&header), Operation::Read(buf)]).await
  }

  async fn try_write(&mut self, addr: u16, data: &[u8]) -> Result<(), S::Error> {
    self.select_page(reg::page_of(addr)).await?;
    let header = write_header(addr);
    self.spi.transaction(&mut [Operation::Write(&header), Operation::Write(data)]).await
  }
}

impl<S: SpiDevice> Transport for SpiTransport<S> {
  type Error = S::Error;

  fn proto_name(&self) -> &'static str {
    "spi"
  }

  async fn read_block(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), Self::Error> {
    let mut attempt = 0;
    loop {
      match self.try_read(addr, buf).await {
        Ok(()) => return Ok(()),
        Err(e) if attempt >= self.retries => return Err(e),
        Err(_) => attempt += 1,
      }
    }
  }

  async fn write_block(&mut self, addr: u16, data: &[u8]) -> Result<(), Self::Error> {
    let mut attempt = 0;
    loop {
      match self.try_write(addr, data).await {
        Ok(()) => return Ok(()),
        Err(e) if attempt >= self.retries => return Err(e),
        Err(_) => attempt += 1,
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
    self.write_block(reset_addr, &[crate::reg::DEVICE_RESET_CMD]).await?;
    self.page = None;
    Ok(())
  }
}
