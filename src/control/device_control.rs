use bitfield_struct::bitfield;

/// F01 device control register (control base + 0).
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct DeviceControl {
  #[bits(2)]
  pub sleep_mode: SleepMode,
  /// Keep the sensor out of doze even when nothing touches it.
  pub nosleep: bool,
  #[bits(2)]
  __: u8,
  pub charger_connected: bool,
  pub report_rate: bool,
  /// Set by the host once it has configured the device; the firmware clears
  /// it on reset.
  pub configured: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SleepMode {
  Normal = 0b00,
  SensorSleep = 0b01,
  Reserved = 0b10,
}

impl SleepMode {
  pub(crate) const fn into_bits(self) -> u8 {
    self as _
  }

  pub(crate) const fn from_bits(bits: u8) -> Self {
    match bits {
      0b00 => Self::Normal,
      0b01 => Self::SensorSleep,
      _ => Self::Reserved,
    }
  }
}

/// F01 query register 1, describing optional features.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct ProductProps {
  pub custom_map: bool,
  pub non_compliant: bool,
  pub has_lts: bool,
  pub has_sensor_id: bool,
  pub has_charger_input: bool,
  pub has_adjustable_doze: bool,
  pub has_adjustable_doze_holdoff: bool,
  pub has_query42: bool,
}
