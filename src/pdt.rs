//! Page Description Table walking.
//!
//! Each register page may carry a PDT growing downwards from `0xE9`, six
//! bytes per entry. A page ends at the first entry whose function number is
//! `0x00` or `0xFF`; the scan ends at the first page without any entry.

use alloc::vec::Vec;

use bitfield_struct::bitfield;

use crate::control::DeviceStatus;
use crate::irq::{IrqRange, MAX_IRQ_SOURCES};
use crate::reg::{self, F01, PDT_END, PDT_ENTRY_SIZE, PDT_START, PDT_TERMINATORS};
use crate::rw::Bus;
use crate::{DiscoveryError, Error, FunctionDescriptor, FunctionInstance, PlatformData, Transport};

/// Byte 4 of a PDT entry.
#[bitfield(u8)]
pub(crate) struct PdtInfo {
  #[bits(3)]
  pub(crate) irq_count: u8,
  #[bits(2)]
  __: u8,
  #[bits(2)]
  pub(crate) version: u8,
  ___: bool,
}

/// Resolve a raw PDT entry read from `page`.
pub(crate) fn parse_entry(page: u8, raw: &[u8; PDT_ENTRY_SIZE]) -> FunctionDescriptor {
  let info = PdtInfo::from_bits(raw[4]);
  FunctionDescriptor {
    query_base: reg::addr(page, raw[0]),
    command_base: reg::addr(page, raw[1]),
    control_base: reg::addr(page, raw[2]),
    data_base: reg::addr(page, raw[3]),
    irq_count: info.irq_count(),
    number: raw[5],
    version: info.version(),
    page,
  }
}

/// Outcome of a full scan.
#[derive(Debug)]
pub(crate) struct Discovery {
  /// In PDT order, with interrupt ranges assigned from bit 0 upwards.
  pub(crate) functions: Vec<FunctionInstance>,
  /// Index of F01 in `functions`.
  pub(crate) control: usize,
  pub(crate) irq_count: u8,
  pub(crate) bootloader: bool,
}

/// Read the entries of one page, stopping at the page terminator.
pub(crate) async fn scan_page<T: Transport>(
  bus: &mut Bus<'_, T>,
  page: u8,
  out: &mut Vec<FunctionDescriptor>,
) -> Result<usize, T::Error> {
  let mut found = 0;
  for offset in (PDT_END..=PDT_START).rev().step_by(PDT_ENTRY_SIZE) {
    let mut raw = [0u8; PDT_ENTRY_SIZE];
    bus.read(reg::addr(page, offset), &mut raw).await?;

    let desc = parse_entry(page, &raw);
    if PDT_TERMINATORS.contains(&desc.number) {
      break;
    }

    trace!("PDT page {} F{:02x} v{} irqs {}", page, desc.number, desc.version, desc.irq_count);
    out.push(desc);
    found += 1;
  }
  Ok(found)
}

/// Walk the PDT and allocate interrupt bits to every function found.
pub(crate) async fn discover<T: Transport>(
  bus: &mut Bus<'_, T>,
  platform: &PlatformData,
) -> Result<Discovery, Error<T::Error>> {
  let mut descs = Vec::new();
  let mut bootloader = false;

  for page in 0..platform.max_pages.min(reg::MAX_PAGE as u16 + 1) {
    let page = page as u8;
    let before = descs.len();
    if scan_page(bus, page, &mut descs).await.map_err(Error::Io)? == 0 {
      break;
    }

    // In bootloader mode only the page holding F01 is meaningful.
    if let Some(f01) = descs[before..].iter().find(|d| d.number == F01) {
      let status: DeviceStatus = bus.read_reg(f01.data_base).await.map_err(Error::Io)?;
      if status.bootloader() {
        warn!("device is in bootloader mode");
        bootloader = true;
        break;
      }
    }
  }

  let mut functions = Vec::with_capacity(descs.len());
  let mut control = None;
  let mut next_irq: u16 = 0;
  // The field is public, so the builder's cap can be bypassed.
  let capacity = platform.irq_capacity.min(MAX_IRQ_SOURCES);

  for desc in descs {
    if functions.iter().any(|f: &FunctionInstance| f.number() == desc.number) {
      return Err(DiscoveryError::DuplicateFunction(desc.number).into());
    }

    let requested = next_irq + desc.irq_count as u16;
    if requested > capacity as u16 {
      return Err(DiscoveryError::IrqOverflow { requested, capacity }.into());
    }

    if desc.is_control() {
      control = Some(functions.len());
    }
    functions.push(FunctionInstance::new(desc, IrqRange::new(next_irq as u8, desc.irq_count)));
    next_irq = requested;
  }

  let control = control.ok_or(DiscoveryError::NoControlFunction)?;
  info!("discovered {} functions, {} interrupt sources", functions.len(), next_irq);

  Ok(Discovery { functions, control, irq_count: next_irq as u8, bootloader })
}

/// Locate a single function without allocating interrupt bits, e.g. to find
/// the reset command register before a full scan.
pub(crate) async fn find_function<T: Transport>(
  bus: &mut Bus<'_, T>,
  max_pages: u16,
  number: u8,
) -> Result<Option<FunctionDescriptor>, T::Error> {
  let mut descs = Vec::new();
  for page in 0..max_pages.min(reg::MAX_PAGE as u16 + 1) {
    descs.clear();
    if scan_page(bus, page as u8, &mut descs).await? == 0 {
      break;
    }
    if let Some(d) = descs.iter().find(|d| d.number == number) {
      return Ok(Some(*d));
    }
  }
  Ok(None)
}
