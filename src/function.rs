//! Discovered functions and the interface function drivers implement.

use alloc::vec::Vec;

use crate::control::ControlFunction;
use crate::irq::{IrqRange, IrqState};
use crate::reg::F01;
use crate::rw::Bus;
use crate::{FunctionError, Transport};

/// One Page Description Table entry with its addresses resolved to the
/// 16-bit register space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FunctionDescriptor {
  pub query_base: u16,
  pub command_base: u16,
  pub control_base: u16,
  pub data_base: u16,
  pub irq_count: u8,
  pub number: u8,
  pub version: u8,
  /// Page the entry was found on.
  pub page: u8,
}

impl FunctionDescriptor {
  pub const fn is_control(&self) -> bool {
    self.number == F01
  }
}

/// A function present on the device together with the interrupt sources it
/// was allocated during discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FunctionInstance {
  descriptor: FunctionDescriptor,
  irqs: IrqRange,
}

impl FunctionInstance {
  pub(crate) const fn new(descriptor: FunctionDescriptor, irqs: IrqRange) -> Self {
    Self { descriptor, irqs }
  }

  pub const fn descriptor(&self) -> &FunctionDescriptor {
    &self.descriptor
  }

  /// RMI function number, e.g. `0x11` for a 2D sensor.
  pub const fn number(&self) -> u8 {
    self.descriptor.number
  }

  pub const fn irqs(&self) -> IrqRange {
    self.irqs
  }
}

/// Driver for one kind of RMI4 function.
///
/// A device usually carries several different functions, so the type used
/// here is typically an enum over the concrete drivers with `probe`
/// selecting the variant by function number. The device control function
/// (F01) is owned by the core and never offered to `probe`.
#[allow(async_fn_in_trait)]
pub trait FunctionDriver<T: Transport>: Sized {
  /// Bind to a discovered function, or return `None` to leave it unhandled.
  fn probe(function: &FunctionInstance) -> Option<Self>;

  /// Function-local interrupt sources to enable once discovery completes.
  fn default_irq_bits(&self, function: &FunctionInstance) -> u8 {
    function.irqs().local_mask()
  }

  /// Service pending interrupt sources. `bits` is function-local and never
  /// contains bits outside the function's range.
  ///
  /// An error is logged by the core and stops further dispatch to this
  /// function until the next rescan.
  async fn attention(&mut self, ctx: &mut Context<'_, T>, bits: u8) -> Result<(), FunctionError>;

  /// Called after the device was reset and rediscovered, to restore any
  /// configuration the firmware dropped.
  async fn reset(&mut self, _ctx: &mut Context<'_, T>) -> Result<(), FunctionError> {
    Ok(())
  }

  async fn suspend(&mut self, _ctx: &mut Context<'_, T>) -> Result<(), FunctionError> {
    Ok(())
  }

  async fn resume(&mut self, _ctx: &mut Context<'_, T>) -> Result<(), FunctionError> {
    Ok(())
  }
}

/// Driver set that binds nothing. Useful for control-only bring-up.
#[derive(Debug)]
pub enum NoDrivers {}

impl<T: Transport> FunctionDriver<T> for NoDrivers {
  fn probe(_: &FunctionInstance) -> Option<Self> {
    None
  }

  async fn attention(&mut self, _: &mut Context<'_, T>, _: u8) -> Result<(), FunctionError> {
    match *self {}
  }
}

/// What a function driver can touch while it runs.
pub struct Context<'a, T> {
  function: &'a FunctionInstance,
  bus: Bus<'a, T>,
  irq: &'a mut IrqState,
  attn_data: &'a [u8],
}

impl<'a, T: Transport> Context<'a, T> {
  pub(crate) fn new(function: &'a FunctionInstance, bus: Bus<'a, T>, irq: &'a mut IrqState) -> Self {
    Self { function, bus, irq, attn_data: &[] }
  }

  pub(crate) fn with_attn_data(mut self, data: &'a [u8]) -> Self {
    self.attn_data = data;
    self
  }

  pub fn function(&self) -> &FunctionInstance {
    self.function
  }

  /// Function data delivered along with the interrupt status by
  /// [`crate::Rmi4::handle_attention_with`]. Empty when the status was read
  /// from the device; read the data registers instead.
  pub fn attn_data(&self) -> &[u8] {
    self.attn_data
  }

  pub async fn read(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), FunctionError> {
    self.bus.read(addr, buf).await.map_err(|_| FunctionError::Bus)
  }

  pub async fn write(&mut self, addr: u16, data: &[u8]) -> Result<(), FunctionError> {
    self.bus.write(addr, data).await.map_err(|_| FunctionError::Bus)
  }

  pub async fn read_u8(&mut self, addr: u16) -> Result<u8, FunctionError> {
    self.bus.read_u8(addr).await.map_err(|_| FunctionError::Bus)
  }

  /// Request more of this function's sources. Applied at the end of the
  /// current dispatch cycle.
  pub fn set_irq_bits(&mut self, bits: u8) {
    self.irq.request_bits(self.function.irqs(), bits);
  }

  pub fn clear_irq_bits(&mut self, bits: u8) {
    self.irq.clear_bits(self.function.irqs(), bits);
  }
}

pub(crate) struct Slot<D> {
  pub(crate) function: FunctionInstance,
  pub(crate) driver: Option<D>,
  /// Set when the driver failed; cleared only by a rescan.
  pub(crate) faulted: bool,
}

/// Everything built by one discovery pass. Replaced wholesale on rescan.
pub(crate) struct Functions<D> {
  pub(crate) slots: Vec<Slot<D>>,
  pub(crate) control: ControlFunction,
  pub(crate) irq: IrqState,
}

impl<D> Functions<D> {
  pub(crate) fn get(&self, number: u8) -> Option<&FunctionInstance> {
    self.slots.iter().map(|s| &s.function).find(|f| f.number() == number)
  }

  pub(crate) fn irq_range(&self, number: u8) -> Option<IrqRange> {
    self.get(number).map(FunctionInstance::irqs)
  }

  pub(crate) fn instances(&self) -> Vec<FunctionInstance> {
    self.slots.iter().map(|s| s.function).collect()
  }
}
