/******************************************************************************
 * RMI4 register map constants shared by every transport and function.       *
 * ========================================================================== *
 * Addresses are 16-bit: the high byte selects the page, the low byte is the  *
 * offset within that page.                                                   *
*******************************************************************************/

/// Page select register, mirrored at the same offset on every page.
pub(crate) const PAGE_SELECT_REG: u8 = 0xFF;

/// Highest page the PDT may live on.
pub(crate) const MAX_PAGE: u8 = 0xFF;

// Page Description Table window, scanned downwards within each page.
pub(crate) const PDT_START: u8 = 0xE9;
pub(crate) const PDT_END: u8 = 0x05;
pub(crate) const PDT_ENTRY_SIZE: usize = 6;

/// Function numbers that terminate a PDT page.
pub(crate) const PDT_TERMINATORS: [u8; 2] = [0x00, 0xFF];

/// Device control function.
pub(crate) const F01: u8 = 0x01;

/// Command written to the F01 command register to reset the device.
pub(crate) const DEVICE_RESET_CMD: u8 = 0x01;

/// Default time to let the firmware come back after a reset.
pub(crate) const DEFAULT_RESET_DELAY_MS: u32 = 100;

// F01 register offsets relative to the function's base addresses.
pub(crate) const F01_QUERY_LEN: usize = 21;
pub(crate) const F01_PRODUCT_ID_OFFSET: usize = 11;
pub(crate) const PRODUCT_ID_LEN: usize = 10;
pub(crate) const F01_CTRL_IRQ_ENABLE: u16 = 1;
pub(crate) const F01_DATA_IRQ_STATUS: u16 = 1;

/// Compose a global register address from a page and an in-page offset.
#[inline]
pub(crate) const fn addr(page: u8, offset: u8) -> u16 {
  u16::from_be_bytes([page, offset])
}

/// Page part of a global register address.
#[inline]
pub(crate) const fn page_of(addr: u16) -> u8 {
  (addr >> 8) as u8
}
