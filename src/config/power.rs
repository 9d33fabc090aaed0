/// Whether the sensor may doze when nothing touches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NoSleep {
  /// Leave the firmware setting alone.
  #[default]
  Default,
  /// Allow doze.
  Off,
  /// Keep the sensor fully awake.
  On,
}

/// Overrides for the firmware's doze behaviour. A zero value leaves the
/// corresponding register untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PowerManagement {
  pub nosleep: NoSleep,
  /// Capacitance threshold that wakes the sensor from doze.
  pub wakeup_threshold: u8,
  /// Delay after the last finger lifts before dozing, in 100 ms units.
  pub doze_holdoff: u8,
  /// Interval between presence checks while dozing, in 10 ms units.
  pub doze_interval: u8,
}

impl PowerManagement {
  pub const fn new() -> Self {
    Self { nosleep: NoSleep::Default, wakeup_threshold: 0, doze_holdoff: 0, doze_interval: 0 }
  }

  pub const fn with_nosleep(mut self, nosleep: NoSleep) -> Self {
    self.nosleep = nosleep;
    self
  }

  pub const fn with_wakeup_threshold(mut self, threshold: u8) -> Self {
    self.wakeup_threshold = threshold;
    self
  }

  pub const fn with_doze(mut self, holdoff: u8, interval: u8) -> Self {
    self.doze_holdoff = holdoff;
    self.doze_interval = interval;
    self
  }
}

/// Platform hook failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HookError;

/// Board-level callbacks run around suspend and resume.
///
/// `post_suspend` is the only safe point to cut power to the sensor. If it
/// does, `pre_resume` must restore power and wait for the controller to boot
/// before returning.
#[allow(async_fn_in_trait)]
pub trait PowerHooks {
  async fn pre_suspend(&mut self) -> Result<(), HookError> {
    Ok(())
  }

  async fn post_suspend(&mut self) -> Result<(), HookError> {
    Ok(())
  }

  async fn pre_resume(&mut self) -> Result<(), HookError> {
    Ok(())
  }

  async fn post_resume(&mut self) -> Result<(), HookError> {
    Ok(())
  }
}

/// No platform hooks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl PowerHooks for NoHooks {}
