//! Device-wide interrupt source bookkeeping.
//!
//! Every function owns a contiguous run of bits in the F01 interrupt enable
//! and status registers. Requests from functions accumulate in a pending mask
//! and only reach the device on [`IrqState::commit`].

use core::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::rw::Bus;
use crate::{Core, Error, FunctionDriver, PowerHooks, Rmi4, State, Transport};

/// Largest mask width the core supports.
pub const MAX_IRQ_SOURCES: u8 = 64;

/// A set of interrupt source bits, bit 0 being the first source in PDT order.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IrqMask(u64);

impl IrqMask {
  pub const EMPTY: Self = Self(0);

  pub const fn from_bits(bits: u64) -> Self {
    Self(bits)
  }

  pub const fn bits(self) -> u64 {
    self.0
  }

  /// Mask with the lowest `count` bits set.
  pub const fn first(count: u8) -> Self {
    if count >= 64 {
      Self(u64::MAX)
    } else {
      Self((1u64 << count) - 1)
    }
  }

  pub const fn is_empty(self) -> bool {
    self.0 == 0
  }

  pub const fn contains(self, bit: u8) -> bool {
    bit < 64 && self.0 & (1 << bit) != 0
  }

  pub const fn count(self) -> u32 {
    self.0.count_ones()
  }

  /// Register image of the mask, least significant source first.
  pub(crate) fn to_le_bytes(self) -> [u8; 8] {
    self.0.to_le_bytes()
  }

  pub(crate) fn from_le_slice(bytes: &[u8]) -> Self {
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    Self(u64::from_le_bytes(buf))
  }
}

impl core::fmt::Debug for IrqMask {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    write!(f, "IrqMask({:#b})", self.0)
  }
}

impl BitOr for IrqMask {
  type Output = Self;
  fn bitor(self, rhs: Self) -> Self {
    Self(self.0 | rhs.0)
  }
}

impl BitAnd for IrqMask {
  type Output = Self;
  fn bitand(self, rhs: Self) -> Self {
    Self(self.0 & rhs.0)
  }
}

impl Not for IrqMask {
  type Output = Self;
  fn not(self) -> Self {
    Self(!self.0)
  }
}

impl BitOrAssign for IrqMask {
  fn bitor_assign(&mut self, rhs: Self) {
    self.0 |= rhs.0;
  }
}

impl BitAndAssign for IrqMask {
  fn bitand_assign(&mut self, rhs: Self) {
    self.0 &= rhs.0;
  }
}

/// The bits a single function owns.
///
/// A function declares at most seven interrupt sources, so the function-local
/// view of its bits always fits in a `u8`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IrqRange {
  start: u8,
  count: u8,
}

impl IrqRange {
  pub const fn new(start: u8, count: u8) -> Self {
    Self { start, count }
  }

  /// First device-wide bit owned by the function.
  pub const fn start(&self) -> u8 {
    self.start
  }

  pub const fn count(&self) -> u8 {
    self.count
  }

  /// One past the last owned bit.
  pub const fn end(&self) -> u8 {
    self.start + self.count
  }

  pub const fn is_empty(&self) -> bool {
    self.count == 0
  }

  /// All function-local bits.
  pub const fn local_mask(&self) -> u8 {
    ((1u16 << self.count) - 1) as u8
  }

  /// Device-wide mask covering the whole range.
  pub const fn mask(&self) -> IrqMask {
    self.place(self.local_mask())
  }

  /// Move function-local bits into device-wide position. Bits beyond the
  /// range are dropped.
  pub const fn place(&self, local: u8) -> IrqMask {
    if self.count == 0 {
      return IrqMask::EMPTY;
    }
    IrqMask(((local & self.local_mask()) as u64) << self.start)
  }

  /// Function-local view of a device-wide mask.
  pub const fn extract(&self, mask: IrqMask) -> u8 {
    if self.count == 0 {
      return 0;
    }
    ((mask.0 >> self.start) as u8) & self.local_mask()
  }
}

/// Interrupt enable/status state for one discovered function set.
#[derive(Debug)]
pub(crate) struct IrqState {
  count: u8,
  enable_addr: u16,
  status_addr: u16,
  /// Union of every function's range.
  fn_bits: IrqMask,
  /// What the device currently has enabled.
  current: IrqMask,
  /// Requested, not yet committed.
  new: IrqMask,
  /// Last status read, unmasked.
  status: IrqMask,
}

impl IrqState {
  pub(crate) fn new(count: u8, enable_addr: u16, status_addr: u16) -> Self {
    Self {
      count,
      enable_addr,
      status_addr,
      fn_bits: IrqMask::first(count),
      current: IrqMask::EMPTY,
      new: IrqMask::EMPTY,
      status: IrqMask::EMPTY,
    }
  }

  /// Number of 8-bit registers backing the mask.
  pub(crate) fn reg_count(&self) -> usize {
    (self.count as usize).div_ceil(8)
  }

  pub(crate) fn current(&self) -> IrqMask {
    self.current
  }

  pub(crate) fn requested(&self) -> IrqMask {
    self.new
  }

  pub(crate) fn status(&self) -> IrqMask {
    self.status
  }

  pub(crate) fn is_pending(&self) -> bool {
    self.new != self.current
  }

  pub(crate) fn request_bits(&mut self, range: IrqRange, local: u8) {
    self.new |= range.place(local) & self.fn_bits;
  }

  pub(crate) fn clear_bits(&mut self, range: IrqRange, local: u8) {
    self.new &= !range.place(local);
  }

  /// Replace all pending requests at once.
  pub(crate) fn set_requested(&mut self, mask: IrqMask) {
    self.new = mask & self.fn_bits;
  }

  /// Load the enable mask the device is currently using.
  pub(crate) async fn sync<T: Transport>(&mut self, bus: &mut Bus<'_, T>) -> Result<(), T::Error> {
    let n = self.reg_count();
    if n == 0 {
      return Ok(());
    }

    let mut buf = [0u8; 8];
    bus.read(self.enable_addr, &mut buf[..n]).await?;
    self.current = IrqMask::from_le_slice(&buf[..n]) & self.fn_bits;
    self.new = self.current;
    Ok(())
  }

  /// Push the pending mask to the device if it differs from what is enabled.
  ///
  /// On failure the enabled mask is left untouched and the request stays
  /// pending, so a later commit retries it.
  pub(crate) async fn commit<T: Transport>(&mut self, bus: &mut Bus<'_, T>) -> Result<IrqMask, T::Error> {
    if !self.is_pending() {
      return Ok(self.current);
    }

    let n = self.reg_count();
    bus.write(self.enable_addr, &self.new.to_le_bytes()[..n]).await?;
    debug!("irq mask {:?} -> {:?}", self.current, self.new);
    self.current = self.new;
    Ok(self.current)
  }

  /// Rewrite the enabled mask unconditionally, e.g. after the device lost
  /// power.
  pub(crate) async fn restore<T: Transport>(&mut self, bus: &mut Bus<'_, T>) -> Result<(), T::Error> {
    let n = self.reg_count();
    if n == 0 {
      return Ok(());
    }
    bus.write(self.enable_addr, &self.current.to_le_bytes()[..n]).await
  }

  /// Take status bytes handed over with an attention report instead of
  /// reading them. Returns only the sources that are enabled.
  pub(crate) fn set_status(&mut self, raw: &[u8]) -> IrqMask {
    let n = self.reg_count().min(raw.len());
    self.status = IrqMask::from_le_slice(&raw[..n]) & self.fn_bits;
    self.status & self.current
  }

  /// Read the status registers. Returns only the sources that are enabled.
  pub(crate) async fn read_status<T: Transport>(&mut self, bus: &mut Bus<'_, T>) -> Result<IrqMask, T::Error> {
    let n = self.reg_count();
    if n == 0 {
      return Ok(IrqMask::EMPTY);
    }

    let mut buf = [0u8; 8];
    bus.read(self.status_addr, &mut buf[..n]).await?;
    self.status = IrqMask::from_le_slice(&buf[..n]) & self.fn_bits;
    Ok(self.status & self.current)
  }
}

impl<M, T, D, P> Rmi4<M, T, D, P>
where
  M: RawMutex,
  T: Transport,
  D: FunctionDriver<T>,
  P: PowerHooks,
{
  /// Ask for some of a function's interrupt sources to be enabled.
  ///
  /// `bits` is function-local: bit 0 is the function's first source. The
  /// request takes effect on the next [`Rmi4::commit`].
  pub async fn request_bits(&self, function: u8, bits: u8) -> Result<(), Error<T::Error>> {
    let mut core = self.core.lock().await;
    let fns = core.functions.as_mut().ok_or_else(|| Error::InvalidState(self.state()))?;
    let range = fns.irq_range(function).ok_or(Error::UnknownFunction(function))?;
    fns.irq.request_bits(range, bits);
    Ok(())
  }

  /// Withdraw a request made with [`Rmi4::request_bits`].
  pub async fn clear_bits(&self, function: u8, bits: u8) -> Result<(), Error<T::Error>> {
    let mut core = self.core.lock().await;
    let fns = core.functions.as_mut().ok_or_else(|| Error::InvalidState(self.state()))?;
    let range = fns.irq_range(function).ok_or(Error::UnknownFunction(function))?;
    fns.irq.clear_bits(range, bits);
    Ok(())
  }

  /// Apply all outstanding requests, writing the enable registers only when
  /// the mask actually changes. Returns the mask now in effect.
  ///
  /// Refused while suspended; requests stay pending and go out on resume.
  pub async fn commit(&self) -> Result<IrqMask, Error<T::Error>> {
    let mut core = self.core.lock().await;
    self.ensure_awake()?;
    let Core { transport, functions } = &mut *core;
    let fns = functions.as_mut().ok_or_else(|| Error::InvalidState(self.state()))?;
    let mut bus = Bus::new(transport, &self.stats);
    fns.irq.commit(&mut bus).await.map_err(Error::Transport)
  }

  /// The bus may be powered down while suspended.
  pub(crate) fn ensure_awake(&self) -> Result<(), Error<T::Error>> {
    match self.state() {
      State::Suspended => Err(Error::InvalidState(State::Suspended)),
      _ => Ok(()),
    }
  }

  /// Interrupt sources currently enabled on the device.
  pub async fn enabled_irqs(&self) -> IrqMask {
    let core = self.core.lock().await;
    core.functions.as_ref().map_or(IrqMask::EMPTY, |fns| fns.irq.current())
  }

  /// Outstanding requests, as they would be written by the next commit.
  pub async fn requested_irqs(&self) -> IrqMask {
    let core = self.core.lock().await;
    core.functions.as_ref().map_or(IrqMask::EMPTY, |fns| fns.irq.requested())
  }

  /// Interrupt status from the last dispatch cycle, including sources that
  /// are not enabled.
  pub async fn last_status(&self) -> IrqMask {
    let core = self.core.lock().await;
    core.functions.as_ref().map_or(IrqMask::EMPTY, |fns| fns.irq.status())
  }
}
