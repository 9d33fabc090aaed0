use crate::{Transport, TransportStats};

/// Borrowed view of the transport that keeps [`TransportStats`] up to date.
///
/// Every register access the core or a function driver makes goes through
/// here, so the counters reflect all bus traffic.
pub(crate) struct Bus<'a, T> {
  transport: &'a mut T,
  stats: &'a TransportStats,
}

impl<'a, T: Transport> Bus<'a, T> {
  pub(crate) fn new(transport: &'a mut T, stats: &'a TransportStats) -> Self {
    Self { transport, stats }
  }

  /// Shorter-lived copy of this view, for handing to a callee.
  pub(crate) fn reborrow(&mut self) -> Bus<'_, T> {
    Bus { transport: &mut *self.transport, stats: self.stats }
  }

  pub async fn read(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), T::Error> {
    match self.transport.read_block(addr, buf).await {
      Ok(()) => {
        self.stats.record_rx(buf.len());
        Ok(())
      }
      Err(e) => {
        self.stats.record_rx_err();
        Err(e)
      }
    }
  }

  pub async fn write(&mut self, addr: u16, data: &[u8]) -> Result<(), T::Error> {
    match self.transport.write_block(addr, data).await {
      Ok(()) => {
        self.stats.record_tx(data.len());
        Ok(())
      }
      Err(e) => {
        self.stats.record_tx_err();
        Err(e)
      }
    }
  }

  // Typed helpers for single byte registers
  pub async fn read_u8(&mut self, addr: u16) -> Result<u8, T::Error> {
    let mut b = [0u8; 1];
    self.read(addr, &mut b).await?;
    Ok(b[0])
  }

  pub async fn write_u8(&mut self, addr: u16, value: u8) -> Result<(), T::Error> {
    self.write(addr, &[value]).await
  }

  pub(crate) async fn read_reg<R: From<u8>>(&mut self, addr: u16) -> Result<R, T::Error> {
    self.read_u8(addr).await.map(R::from)
  }

  pub(crate) async fn write_reg<R: Into<u8>>(&mut self, addr: u16, value: R) -> Result<(), T::Error> {
    self.write_u8(addr, value.into()).await
  }

  pub(crate) async fn enable(&mut self) -> Result<(), T::Error> {
    self.transport.enable().await
  }

  pub(crate) async fn disable(&mut self) {
    self.transport.disable().await
  }

  pub(crate) async fn reset(&mut self, reset_addr: u16) -> Result<(), T::Error> {
    match self.transport.reset(reset_addr).await {
      Ok(()) => {
        self.stats.record_tx(1);
        Ok(())
      }
      Err(e) => {
        self.stats.record_tx_err();
        Err(e)
      }
    }
  }
}
