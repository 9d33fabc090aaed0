use bitfield_struct::bitfield;

/// F01 device status register (data base + 0).
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct DeviceStatus {
  #[bits(4)]
  pub code: StatusCode,
  #[bits(2)]
  __: u8,
  /// The device is running its bootloader and expects to be flashed.
  pub bootloader: bool,
  /// Configuration was lost, typically because the device reset.
  pub unconfigured: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StatusCode {
  Ok = 0,
  ResetOccurred = 1,
  InvalidConfig = 2,
  DeviceFailure = 3,
  ConfigCrc = 4,
  FirmwareCrc = 5,
  CrcInProgress = 6,
  Reserved = 7,
}

impl StatusCode {
  pub(crate) const fn into_bits(self) -> u8 {
    self as _
  }

  pub(crate) const fn from_bits(bits: u8) -> Self {
    match bits {
      0 => Self::Ok,
      1 => Self::ResetOccurred,
      2 => Self::InvalidConfig,
      3 => Self::DeviceFailure,
      4 => Self::ConfigCrc,
      5 => Self::FirmwareCrc,
      6 => Self::CrcInProgress,
      _ => Self::Reserved,
    }
  }
}

/// Default "the device went through a reset" predicate.
pub fn reset_occurred(status: DeviceStatus) -> bool {
  status.code() == StatusCode::ResetOccurred || status.unconfigured()
}
