#![cfg_attr(not(test), no_std)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Async, bus-independent driver core for Synaptics RMI4 touch sensors.
//!
//! An RMI4 device exposes its capabilities as numbered *functions* listed in
//! a Page Description Table (PDT). This crate walks the PDT, hands every
//! function a slice of the device-wide interrupt mask, routes interrupt
//! status to the driver responsible for each function and keeps all of that
//! consistent across suspend, resume and firmware resets:
//!
//! - Function discovery over any [`Transport`]; I²C and SPI adapters for
//!   `embedded-hal-async` 1.0 buses are included
//! - Interrupt mask bookkeeping with change-only commits
//! - Dispatch from an attention line, a polling timer or an external caller
//! - Suspend/resume sequencing with optional platform power hooks
//! - Reset detection through the device control function (F01) followed by a
//!   full rediscovery
//!
//! Decoding what a function reports (touch contacts, buttons, ...) is left to
//! [`FunctionDriver`] implementations supplied by the user.
//!
//! ```no_run
//! use embassy_sync::blocking_mutex::raw::NoopRawMutex;
//! use embedded_hal_async::{delay::DelayNs, digital::Wait, i2c::I2c};
//! use rmi4::{I2cTransport, NoDrivers, PlatformData, Rmi4, DEFAULT_I2C_ADDR};
//!
//! async fn example<I: I2c, W: Wait, D: DelayNs>(i2c: I, mut attn: W, mut delay: D) {
//!   let transport = I2cTransport::new(i2c, DEFAULT_I2C_ADDR);
//!   let rmi: Rmi4<NoopRawMutex, _, NoDrivers> = Rmi4::new(0, transport, PlatformData::new());
//!
//!   rmi.attach(&mut delay).await.ok();
//!   rmi.run_interrupt(&mut attn).await.ok();
//! }
//! ```

extern crate alloc;

#[macro_use]
mod fmt;

mod config;
mod control;
mod dispatch;
mod error;
mod function;
mod irq;
mod lifecycle;
mod pdt;
mod reg;
mod rw;
mod stats;
mod transport;

#[cfg(test)]
mod mock;

use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use alloc::vec::Vec;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;

pub use config::*;
pub use control::{
  reset_occurred, DeviceControl, DeviceStatus, ProductInfo, ProductProps, SleepMode, StatusCode,
};
pub use error::{DiscoveryError, Error, FunctionError, HookStage};
pub use function::{Context, FunctionDescriptor, FunctionDriver, FunctionInstance, NoDrivers};
pub use irq::{IrqMask, IrqRange, MAX_IRQ_SOURCES};
pub use stats::{StatsSnapshot, TransportStats};
pub use transport::*;

use function::Functions;

/// Lifecycle state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum State {
  /// Not attached; nothing is known about the device.
  Detached = 0,
  /// The transport is being brought up.
  Probing = 1,
  /// The first PDT scan is running.
  Discovering = 2,
  Active = 3,
  Suspended = 4,
}

impl State {
  const fn from_u8(v: u8) -> Self {
    match v {
      1 => Self::Probing,
      2 => Self::Discovering,
      3 => Self::Active,
      4 => Self::Suspended,
      _ => Self::Detached,
    }
  }
}

/// Transport and everything discovery produced. Guarded by the device lock.
pub(crate) struct Core<T, D> {
  pub(crate) transport: T,
  pub(crate) functions: Option<Functions<D>>,
}

/// State owned by the suspend lock.
pub(crate) struct Pm<P> {
  pub(crate) hooks: Option<P>,
  pub(crate) attach_count: u32,
}

/// One RMI4 device.
///
/// All methods take `&self`: the interrupt or polling task, function mask
/// requests and lifecycle calls may run concurrently and are serialized
/// internally. Two locks are used, always in this order: the suspend lock,
/// which every dispatch cycle and lifecycle transition holds for its whole
/// duration, and the device lock around the transport, the function
/// registry and the interrupt mask.
///
/// `M` picks the `embassy-sync` mutex flavour, `T` the bus, `D` the function
/// driver set and `P` the platform power hooks.
pub struct Rmi4<M: RawMutex, T, D, P = NoHooks> {
  id: u8,
  proto: &'static str,
  platform: PlatformData,
  stats: TransportStats,
  state: AtomicU8,
  bootloader: AtomicBool,
  pm: Mutex<M, Pm<P>>,
  core: Mutex<M, Core<T, D>>,
}

impl<M, T, D> Rmi4<M, T, D, NoHooks>
where
  M: RawMutex,
  T: Transport,
  D: FunctionDriver<T>,
{
  /// Create a detached device without platform power hooks.
  ///
  /// `id` only identifies the device in diagnostics. Nothing is sent to the
  /// device until [`Rmi4::attach`].
  pub fn new(id: u8, transport: T, platform: PlatformData) -> Self {
    Self::with_hooks(id, transport, platform, None)
  }
}

impl<M, T, D, P> Rmi4<M, T, D, P>
where
  M: RawMutex,
  T: Transport,
  D: FunctionDriver<T>,
  P: PowerHooks,
{
  /// Create a detached device. `None` hooks behave as no-ops.
  pub fn with_hooks(id: u8, transport: T, platform: PlatformData, hooks: Option<P>) -> Self {
    Self {
      id,
      proto: transport.proto_name(),
      platform,
      stats: TransportStats::new(),
      state: AtomicU8::new(State::Detached as u8),
      bootloader: AtomicBool::new(false),
      pm: Mutex::new(Pm { hooks, attach_count: 0 }),
      core: Mutex::new(Core { transport, functions: None }),
    }
  }

  pub fn id(&self) -> u8 {
    self.id
  }

  /// Protocol name reported by the transport.
  pub fn proto_name(&self) -> &'static str {
    self.proto
  }

  pub fn platform(&self) -> &PlatformData {
    &self.platform
  }

  /// How attention is noticed, fixed by [`PlatformData::attention`].
  pub fn dispatch_mode(&self) -> DispatchMode {
    self.platform.dispatch_mode()
  }

  pub fn state(&self) -> State {
    State::from_u8(self.state.load(Ordering::Acquire))
  }

  pub(crate) fn set_state(&self, state: State) {
    self.state.store(state as u8, Ordering::Release);
  }

  /// The device reported it is running its bootloader. Dispatch stays off
  /// until a rescan finds it back in normal operation.
  pub fn in_bootloader(&self) -> bool {
    self.bootloader.load(Ordering::Acquire)
  }

  /// Transfer counters. Never blocks.
  pub fn stats(&self) -> StatsSnapshot {
    self.stats.snapshot()
  }

  /// How many times the device was attached successfully.
  pub async fn attach_count(&self) -> u32 {
    self.pm.lock().await.attach_count
  }

  /// Functions found by the last discovery, in PDT order.
  pub async fn functions(&self) -> Vec<FunctionInstance> {
    let core = self.core.lock().await;
    core.functions.as_ref().map(Functions::instances).unwrap_or_default()
  }

  pub async fn function(&self, number: u8) -> Option<FunctionInstance> {
    let core = self.core.lock().await;
    core.functions.as_ref().and_then(|fns| fns.get(number).copied())
  }

  /// Run `f` on the driver bound to function `number`, if any.
  pub async fn with_driver<R>(&self, number: u8, f: impl FnOnce(&mut D) -> R) -> Option<R> {
    let mut core = self.core.lock().await;
    let fns = core.functions.as_mut()?;
    let slot = fns.slots.iter_mut().find(|s| s.function.number() == number)?;
    slot.driver.as_mut().map(f)
  }

  /// Give the transport back. Only possible once no task borrows the device.
  pub fn release(self) -> T {
    self.core.into_inner().transport
  }
}
