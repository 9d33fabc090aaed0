use core::sync::atomic::{AtomicU32, Ordering};

/// Running transfer counters for one device.
///
/// Updated by every bus access the core performs and readable at any time
/// without taking the device locks.
#[derive(Debug, Default)]
pub struct TransportStats {
  tx_count: AtomicU32,
  tx_errs: AtomicU32,
  tx_bytes: AtomicU32,
  rx_count: AtomicU32,
  rx_errs: AtomicU32,
  rx_bytes: AtomicU32,
  attn_count: AtomicU32,
}

impl TransportStats {
  pub const fn new() -> Self {
    Self {
      tx_count: AtomicU32::new(0),
      tx_errs: AtomicU32::new(0),
      tx_bytes: AtomicU32::new(0),
      rx_count: AtomicU32::new(0),
      rx_errs: AtomicU32::new(0),
      rx_bytes: AtomicU32::new(0),
      attn_count: AtomicU32::new(0),
    }
  }

  pub(crate) fn record_tx(&self, len: usize) {
    self.tx_count.fetch_add(1, Ordering::Relaxed);
    self.tx_bytes.fetch_add(len as u32, Ordering::Relaxed);
  }

  pub(crate) fn record_tx_err(&self) {
    self.tx_count.fetch_add(1, Ordering::Relaxed);
    self.tx_errs.fetch_add(1, Ordering::Relaxed);
  }

  pub(crate) fn record_rx(&self, len: usize) {
    self.rx_count.fetch_add(1, Ordering::Relaxed);
    self.rx_bytes.fetch_add(len as u32, Ordering::Relaxed);
  }

  pub(crate) fn record_rx_err(&self) {
    self.rx_count.fetch_add(1, Ordering::Relaxed);
    self.rx_errs.fetch_add(1, Ordering::Relaxed);
  }

  pub(crate) fn record_attn(&self) {
    self.attn_count.fetch_add(1, Ordering::Relaxed);
  }

  /// Copy the counters out. Individual fields are read independently, so a
  /// snapshot taken during a transfer may be off by that one transfer.
  pub fn snapshot(&self) -> StatsSnapshot {
    StatsSnapshot {
      tx_count: self.tx_count.load(Ordering::Relaxed),
      tx_errs: self.tx_errs.load(Ordering::Relaxed),
      tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
      rx_count: self.rx_count.load(Ordering::Relaxed),
      rx_errs: self.rx_errs.load(Ordering::Relaxed),
      rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
      attn_count: self.attn_count.load(Ordering::Relaxed),
    }
  }
}

/// Point-in-time copy of [`TransportStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatsSnapshot {
  /// Write transactions attempted.
  pub tx_count: u32,
  /// Write transactions that failed.
  pub tx_errs: u32,
  /// Bytes written successfully.
  pub tx_bytes: u32,
  /// Read transactions attempted.
  pub rx_count: u32,
  /// Read transactions that failed.
  pub rx_errs: u32,
  /// Bytes read successfully.
  pub rx_bytes: u32,
  /// Dispatch cycles run.
  pub attn_count: u32,
}
