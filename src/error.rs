use core::fmt;

use crate::State;

/// Errors that can occur while driving an RMI4 device.
///
/// `E` is the error type of the underlying [`crate::Transport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
  /// A register read or write failed on the bus.
  Io(E),
  /// Writing a new interrupt enable mask failed. The previously enabled mask
  /// is still in effect and the request stays pending.
  Transport(E),
  /// The Page Description Table could not be turned into a usable function set.
  Discovery(DiscoveryError),
  /// A platform power hook reported a failure. The remaining steps of the
  /// transition were still carried out.
  Hook(HookStage),
  /// The operation is not valid in the current lifecycle state.
  InvalidState(State),
  /// No function with this number is present on the device.
  UnknownFunction(u8),
  /// The attention line could not be waited on.
  Attention,
}

/// Reasons a PDT scan is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiscoveryError {
  /// No device control function (F01) was found.
  NoControlFunction,
  /// The functions declare more interrupt sources than the mask can hold.
  IrqOverflow { requested: u16, capacity: u8 },
  /// The same function number is listed more than once.
  DuplicateFunction(u8),
}

/// Failure reported by a function driver from an attention or reset handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FunctionError {
  /// A register access made by the driver failed.
  Bus,
  /// The function returned data the driver could not interpret.
  Data,
  /// The function could not be brought back after a device reset.
  Reset,
}

/// Which platform hook failed during a suspend or resume transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HookStage {
  PreSuspend,
  PostSuspend,
  PreResume,
  PostResume,
}

impl<E> From<DiscoveryError> for Error<E> {
  fn from(e: DiscoveryError) -> Self {
    Self::Discovery(e)
  }
}

impl<E: fmt::Debug> fmt::Display for Error<E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Io(e) => write!(f, "bus i/o failed: {e:?}"),
      Self::Transport(e) => write!(f, "interrupt mask write failed: {e:?}"),
      Self::Discovery(e) => write!(f, "function discovery failed: {e}"),
      Self::Hook(stage) => write!(f, "platform hook {stage:?} failed"),
      Self::InvalidState(state) => write!(f, "operation not allowed while {state:?}"),
      Self::UnknownFunction(n) => write!(f, "no function F{n:02X} on device"),
      Self::Attention => f.write_str("attention line unavailable"),
    }
  }
}

impl fmt::Display for DiscoveryError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::NoControlFunction => f.write_str("device control function F01 not found"),
      Self::IrqOverflow { requested, capacity } => {
        write!(f, "{requested} interrupt sources exceed mask capacity of {capacity}")
      }
      Self::DuplicateFunction(n) => write!(f, "function F{n:02X} listed twice"),
    }
  }
}

impl<E: fmt::Debug> core::error::Error for Error<E> {}
impl core::error::Error for DiscoveryError {}
