//! Device control function (F01).
//!
//! F01 is present on every RMI4 device. It holds the device-wide status and
//! control registers, the interrupt enable/status registers and the reset
//! command, so the core drives it directly instead of through a
//! [`crate::FunctionDriver`].

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::reg::{F01_CTRL_IRQ_ENABLE, F01_DATA_IRQ_STATUS, F01_PRODUCT_ID_OFFSET, F01_QUERY_LEN, PRODUCT_ID_LEN};
use crate::rw::Bus;
use crate::{Core, Error, FunctionDescriptor, FunctionDriver, NoSleep, PowerHooks, PowerManagement, Rmi4, Transport};

mod device_control;
mod device_status;

pub use device_control::*;
pub use device_status::*;

/// Identification read from the F01 query registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProductInfo {
  pub manufacturer_id: u8,
  pub props: u8,
  /// Manufacturing date as (year since 2000, month, day).
  pub date: (u8, u8, u8),
  pub product_id: [u8; PRODUCT_ID_LEN],
}

impl ProductInfo {
  fn parse(buf: &[u8; F01_QUERY_LEN]) -> Self {
    let mut product_id = [0u8; PRODUCT_ID_LEN];
    product_id.copy_from_slice(&buf[F01_PRODUCT_ID_OFFSET..F01_PRODUCT_ID_OFFSET + PRODUCT_ID_LEN]);
    Self {
      manufacturer_id: buf[0],
      props: buf[1],
      date: (buf[2] & 0x1F, buf[3] & 0x0F, buf[4] & 0x1F),
      product_id,
    }
  }

  /// Feature flags from query register 1.
  pub fn features(&self) -> ProductProps {
    ProductProps::from_bits(self.props)
  }

  /// Product id as text, without trailing NULs. Empty if not valid ASCII.
  pub fn product_id_str(&self) -> &str {
    let end = self.product_id.iter().position(|&b| b == 0).unwrap_or(PRODUCT_ID_LEN);
    core::str::from_utf8(&self.product_id[..end]).unwrap_or("")
  }
}

pub(crate) struct ControlFunction {
  /// Position of F01 in the function registry.
  index: usize,
  desc: FunctionDescriptor,
  irq_regs: usize,
  ctrl: DeviceControl,
  info: ProductInfo,
  /// nosleep was set when we suspended and must be put back on resume.
  restore_nosleep: bool,
}

impl ControlFunction {
  pub(crate) fn new(index: usize, desc: FunctionDescriptor, irq_regs: usize) -> Self {
    Self {
      index,
      desc,
      irq_regs,
      ctrl: DeviceControl::new(),
      info: ProductInfo::default(),
      restore_nosleep: false,
    }
  }

  pub(crate) fn index(&self) -> usize {
    self.index
  }

  pub(crate) fn info(&self) -> &ProductInfo {
    &self.info
  }

  pub(crate) fn enable_addr(desc: &FunctionDescriptor) -> u16 {
    desc.control_base.wrapping_add(F01_CTRL_IRQ_ENABLE)
  }

  pub(crate) fn status_addr(desc: &FunctionDescriptor) -> u16 {
    desc.data_base.wrapping_add(F01_DATA_IRQ_STATUS)
  }

  /// Command register a reset is issued through.
  pub(crate) fn reset_addr(&self) -> u16 {
    self.desc.command_base
  }

  pub(crate) async fn identify<T: Transport>(&mut self, bus: &mut Bus<'_, T>) -> Result<(), T::Error> {
    let mut query = [0u8; F01_QUERY_LEN];
    bus.read(self.desc.query_base, &mut query).await?;
    self.info = ProductInfo::parse(&query);

    debug!(
      "F01: manufacturer {} product {} props {:#x}",
      self.info.manufacturer_id,
      self.info.product_id_str(),
      self.info.props
    );
    Ok(())
  }

  /// Mark the device configured and apply the platform power management
  /// overrides. Expects [`ControlFunction::identify`] to have run.
  pub(crate) async fn configure<T: Transport>(
    &mut self,
    bus: &mut Bus<'_, T>,
    power: &PowerManagement,
  ) -> Result<(), T::Error> {
    let mut ctrl: DeviceControl = bus.read_reg(self.desc.control_base).await?;
    match power.nosleep {
      NoSleep::Default => {}
      NoSleep::Off => ctrl.set_nosleep(false),
      NoSleep::On => ctrl.set_nosleep(true),
    }
    ctrl.set_sleep_mode(SleepMode::Normal);
    ctrl.set_configured(true);
    bus.write_reg(self.desc.control_base, ctrl).await?;
    self.ctrl = ctrl;

    // Doze registers follow the interrupt enable registers. Addresses wrap
    // like the register space does.
    let props = self.info.features();
    let mut addr = Self::enable_addr(&self.desc).wrapping_add(self.irq_regs as u16);
    if props.has_adjustable_doze() {
      if power.doze_interval != 0 {
        bus.write_u8(addr, power.doze_interval).await?;
      }
      if power.wakeup_threshold != 0 {
        bus.write_u8(addr.wrapping_add(1), power.wakeup_threshold).await?;
      }
      addr = addr.wrapping_add(2);
    }
    if props.has_adjustable_doze_holdoff() && power.doze_holdoff != 0 {
      bus.write_u8(addr, power.doze_holdoff).await?;
    }
    Ok(())
  }

  pub(crate) async fn read_status<T: Transport>(&self, bus: &mut Bus<'_, T>) -> Result<DeviceStatus, T::Error> {
    bus.read_reg(self.desc.data_base).await
  }

  /// Put the sensor to sleep. nosleep would keep it awake, so it is dropped
  /// for the duration and restored by [`ControlFunction::wake`].
  pub(crate) async fn sleep<T: Transport>(&mut self, bus: &mut Bus<'_, T>) -> Result<(), T::Error> {
    let mut ctrl = self.ctrl;
    self.restore_nosleep = ctrl.nosleep();
    ctrl.set_nosleep(false);
    ctrl.set_sleep_mode(SleepMode::SensorSleep);
    bus.write_reg(self.desc.control_base, ctrl).await?;
    self.ctrl = ctrl;
    Ok(())
  }

  pub(crate) async fn wake<T: Transport>(&mut self, bus: &mut Bus<'_, T>) -> Result<(), T::Error> {
    let mut ctrl = self.ctrl;
    ctrl.set_nosleep(self.restore_nosleep);
    ctrl.set_sleep_mode(SleepMode::Normal);
    bus.write_reg(self.desc.control_base, ctrl).await?;
    self.ctrl = ctrl;
    self.restore_nosleep = false;
    Ok(())
  }
}

impl<M, T, D, P> Rmi4<M, T, D, P>
where
  M: RawMutex,
  T: Transport,
  D: FunctionDriver<T>,
  P: PowerHooks,
{
  /// Identification read from F01 during the last discovery.
  pub async fn product_info(&self) -> Option<ProductInfo> {
    let core = self.core.lock().await;
    core.functions.as_ref().map(|fns| *fns.control.info())
  }

  /// Read the F01 device status register. Not available while suspended.
  pub async fn device_status(&self) -> Result<DeviceStatus, Error<T::Error>> {
    let mut core = self.core.lock().await;
    self.ensure_awake()?;
    let Core { transport, functions } = &mut *core;
    let fns = functions.as_ref().ok_or_else(|| Error::InvalidState(self.state()))?;
    let mut bus = Bus::new(transport, &self.stats);
    fns.control.read_status(&mut bus).await.map_err(Error::Io)
  }
}
