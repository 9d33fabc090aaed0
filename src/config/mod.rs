use crate::control::{reset_occurred, DeviceStatus};
use crate::irq::MAX_IRQ_SOURCES;
use crate::reg::{DEFAULT_RESET_DELAY_MS, MAX_PAGE};

mod power;

pub use power::*;

/// Level of the attention line while the device has something to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AttnPolarity {
  #[default]
  ActiveLow,
  ActiveHigh,
}

/// How the host learns that the device has pending interrupts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Attention {
  /// A dedicated attention line; see [`crate::Rmi4::run_interrupt`].
  Irq(AttnPolarity),
  /// No usable line; the status registers are read every `interval_ms`.
  Polling { interval_ms: u32 },
  /// Someone else notices attention (e.g. a HID tunnel) and calls
  /// [`crate::Rmi4::handle_attention`], or
  /// [`crate::Rmi4::handle_attention_with`] when it already holds the
  /// interrupt status.
  External,
}

/// Dispatch mode chosen at attach time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DispatchMode {
  Interrupt,
  Polling,
  External,
}

/// Board-specific description of how the sensor is wired and should be run.
///
/// Read-only once the device is attached.
///
/// # Example
/// ```no_run
/// use rmi4::{Attention, NoSleep, PlatformData, PowerManagement};
///
/// let platform = PlatformData::new()
///   .with_attention(Attention::Polling { interval_ms: 10 })
///   .with_power(PowerManagement::new().with_nosleep(NoSleep::On))
///   .with_power_down_on_suspend(true);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct PlatformData {
  pub attention: Attention,
  /// Wait after a reset command before touching the device again.
  pub reset_delay_ms: u32,
  /// Reset the device before the first PDT scan.
  pub reset_on_attach: bool,
  /// Number of PDT pages scanned at most, starting at page 0.
  pub max_pages: u16,
  /// Width of the interrupt mask in bits.
  pub irq_capacity: u8,
  pub power: PowerManagement,
  /// The platform cuts power in `post_suspend`; bus is disabled while
  /// suspended and all state is rewritten on resume.
  pub power_down_on_suspend: bool,
  /// Always rediscover functions on resume.
  pub rescan_on_resume: bool,
  /// Decides from the F01 status whether the device went through a reset.
  pub reset_detect: fn(DeviceStatus) -> bool,
}

impl PlatformData {
  pub const fn new() -> Self {
    Self {
      attention: Attention::Irq(AttnPolarity::ActiveLow),
      reset_delay_ms: DEFAULT_RESET_DELAY_MS,
      reset_on_attach: true,
      max_pages: MAX_PAGE as u16 + 1,
      irq_capacity: 32,
      power: PowerManagement::new(),
      power_down_on_suspend: false,
      rescan_on_resume: false,
      reset_detect: reset_occurred,
    }
  }

  pub const fn with_attention(mut self, attention: Attention) -> Self {
    self.attention = attention;
    self
  }

  pub const fn with_reset_delay_ms(mut self, ms: u32) -> Self {
    self.reset_delay_ms = ms;
    self
  }

  pub const fn with_reset_on_attach(mut self, reset: bool) -> Self {
    self.reset_on_attach = reset;
    self
  }

  pub const fn with_max_pages(mut self, pages: u16) -> Self {
    self.max_pages = pages;
    self
  }

  /// Mask width in bits, capped at [`MAX_IRQ_SOURCES`].
  pub const fn with_irq_capacity(mut self, bits: u8) -> Self {
    self.irq_capacity = if bits > MAX_IRQ_SOURCES { MAX_IRQ_SOURCES } else { bits };
    self
  }

  pub const fn with_power(mut self, power: PowerManagement) -> Self {
    self.power = power;
    self
  }

  pub const fn with_power_down_on_suspend(mut self, power_down: bool) -> Self {
    self.power_down_on_suspend = power_down;
    self
  }

  pub const fn with_rescan_on_resume(mut self, rescan: bool) -> Self {
    self.rescan_on_resume = rescan;
    self
  }

  pub const fn with_reset_detect(mut self, detect: fn(DeviceStatus) -> bool) -> Self {
    self.reset_detect = detect;
    self
  }

  pub const fn dispatch_mode(&self) -> DispatchMode {
    match self.attention {
      Attention::Irq(_) => DispatchMode::Interrupt,
      Attention::Polling { .. } => DispatchMode::Polling,
      Attention::External => DispatchMode::External,
    }
  }
}

impl Default for PlatformData {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dispatch_mode_follows_attention() {
    let p = PlatformData::new();
    assert_eq!(p.dispatch_mode(), DispatchMode::Interrupt);

    let p = p.with_attention(Attention::Polling { interval_ms: 5 });
    assert_eq!(p.dispatch_mode(), DispatchMode::Polling);

    let p = p.with_attention(Attention::External);
    assert_eq!(p.dispatch_mode(), DispatchMode::External);

    let rmi = crate::mock::TestDevice::new(0, crate::mock::MockBus::new(), p);
    assert_eq!(rmi.dispatch_mode(), DispatchMode::External);
  }

  #[test]
  fn irq_capacity_is_capped() {
    assert_eq!(PlatformData::new().with_irq_capacity(200).irq_capacity, MAX_IRQ_SOURCES);
    assert_eq!(PlatformData::new().with_irq_capacity(16).irq_capacity, 16);
  }
}
