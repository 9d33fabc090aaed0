//! In-memory stand-ins for the bus and for function drivers.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embedded_hal::digital;
use embedded_hal::i2c::{ErrorKind, ErrorType, Operation, SevenBitAddress};
use embedded_hal::spi;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;
use embedded_hal_async::i2c::I2c;
use embedded_hal_async::spi::SpiDevice;

use crate::reg::{self, PAGE_SELECT_REG, PDT_ENTRY_SIZE, PDT_START};
use crate::{Context, FunctionDriver, FunctionError, FunctionInstance, PlatformData, Rmi4, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MockError;

struct Regs {
  mem: Vec<u8>,
  writes: Vec<(u16, Vec<u8>)>,
  clear_on_read: BTreeSet<u16>,
  fail_reads: u32,
  fail_writes: u32,
  enabled: bool,
  enables: u32,
}

/// A 64 KiB register map behind the [`Transport`] trait.
///
/// Clones share the same map, so a test keeps one handle for inspection and
/// gives the other to the driver.
#[derive(Clone)]
pub(crate) struct MockBus(Rc<RefCell<Regs>>);

impl MockBus {
  pub(crate) fn new() -> Self {
    Self(Rc::new(RefCell::new(Regs {
      mem: vec![0; 0x1_0000],
      writes: Vec::new(),
      clear_on_read: BTreeSet::new(),
      fail_reads: 0,
      fail_writes: 0,
      enabled: false,
      enables: 0,
    })))
  }

  /// F01 with one interrupt source and F11 with four, both on page 0.
  ///
  /// F01: query 0x20, command 0x30, control 0x40 (irq enable 0x41), data 0x50
  /// (irq status 0x51). F11: query 0x60, command 0x70, control 0x80, data 0x90.
  /// Both status registers clear on read.
  pub(crate) fn two_function_device() -> Self {
    let bus = Self::new();
    bus.pdt_entry(0, 0, [0x20, 0x30, 0x40, 0x50, 1, 0x01]);
    bus.pdt_entry(0, 1, [0x60, 0x70, 0x80, 0x90, 4, 0x11]);
    bus.clear_on_read(0x50);
    bus.clear_on_read(0x51);
    bus
  }

  /// Place a raw PDT entry as the `index`th entry of `page`.
  pub(crate) fn pdt_entry(&self, page: u8, index: usize, raw: [u8; PDT_ENTRY_SIZE]) {
    let offset = PDT_START - (index * PDT_ENTRY_SIZE) as u8;
    self.set(reg::addr(page, offset), &raw);
  }

  pub(crate) fn set(&self, addr: u16, data: &[u8]) {
    let mut regs = self.0.borrow_mut();
    let start = addr as usize;
    regs.mem[start..start + data.len()].copy_from_slice(data);
  }

  pub(crate) fn get(&self, addr: u16) -> u8 {
    self.0.borrow().mem[addr as usize]
  }

  /// Zero the register after every read, like interrupt status registers.
  pub(crate) fn clear_on_read(&self, addr: u16) {
    self.0.borrow_mut().clear_on_read.insert(addr);
  }

  pub(crate) fn fail_reads(&self, n: u32) {
    self.0.borrow_mut().fail_reads = n;
  }

  pub(crate) fn fail_writes(&self, n: u32) {
    self.0.borrow_mut().fail_writes = n;
  }

  /// Every successful write starting at `addr`, oldest first.
  pub(crate) fn writes_to(&self, addr: u16) -> Vec<Vec<u8>> {
    self.0.borrow().writes.iter().filter(|(a, _)| *a == addr).map(|(_, d)| d.clone()).collect()
  }

  pub(crate) fn write_count(&self) -> usize {
    self.0.borrow().writes.len()
  }

  pub(crate) fn is_enabled(&self) -> bool {
    self.0.borrow().enabled
  }

  pub(crate) fn enable_count(&self) -> u32 {
    self.0.borrow().enables
  }
}

impl Transport for MockBus {
  type Error = MockError;

  fn proto_name(&self) -> &'static str {
    "mock"
  }

  async fn read_block(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), MockError> {
    let mut regs = self.0.borrow_mut();
    if regs.fail_reads > 0 {
      regs.fail_reads -= 1;
      return Err(MockError);
    }

    let start = addr as usize;
    buf.copy_from_slice(&regs.mem[start..start + buf.len()]);
    for a in addr..addr + buf.len() as u16 {
      if regs.clear_on_read.contains(&a) {
        regs.mem[a as usize] = 0;
      }
    }
    Ok(())
  }

  async fn write_block(&mut self, addr: u16, data: &[u8]) -> Result<(), MockError> {
    let mut regs = self.0.borrow_mut();
    if regs.fail_writes > 0 {
      regs.fail_writes -= 1;
      return Err(MockError);
    }

    let start = addr as usize;
    regs.mem[start..start + data.len()].copy_from_slice(data);
    regs.writes.push((addr, data.to_vec()));
    Ok(())
  }

  async fn enable(&mut self) -> Result<(), MockError> {
    let mut regs = self.0.borrow_mut();
    regs.enabled = true;
    regs.enables += 1;
    Ok(())
  }

  async fn disable(&mut self) {
    self.0.borrow_mut().enabled = false;
  }
}

#[derive(Default)]
struct I2cState {
  mem: Vec<u8>,
  page: u8,
  selects: Vec<u8>,
  fail: u32,
}

/// Register-mapped I²C target speaking the RMI4 page select convention.
#[derive(Clone)]
pub(crate) struct MockI2c(Rc<RefCell<I2cState>>);

impl Default for MockI2c {
  fn default() -> Self {
    Self(Rc::new(RefCell::new(I2cState { mem: vec![0; 0x1_0000], ..Default::default() })))
  }
}

impl MockI2c {
  /// Fail the next `n` transactions.
  pub(crate) fn fail_next(&self, n: u32) {
    self.0.borrow_mut().fail = n;
  }

  pub(crate) fn page_selects(&self) -> Vec<u8> {
    self.0.borrow().selects.clone()
  }

  pub(crate) fn register(&self, addr: u16) -> u8 {
    self.0.borrow().mem[addr as usize]
  }
}

impl ErrorType for MockI2c {
  type Error = ErrorKind;
}

impl I2c<SevenBitAddress> for MockI2c {
  async fn transaction(&mut self, _addr: u8, ops: &mut [Operation<'_>]) -> Result<(), ErrorKind> {
    let mut st = self.0.borrow_mut();
    if st.fail > 0 {
      st.fail -= 1;
      return Err(ErrorKind::Other);
    }

    // The first written byte is the in-page offset; everything after it
    // reads or writes consecutive registers.
    let mut cursor: Option<u8> = None;
    for op in ops.iter_mut() {
      match op {
        Operation::Write(bytes) => {
          for &b in bytes.iter() {
            match cursor {
              None => cursor = Some(b),
              Some(PAGE_SELECT_REG) => {
                st.page = b;
                st.selects.push(b);
                cursor = None;
              }
              Some(off) => {
                let a = reg::addr(st.page, off) as usize;
                st.mem[a] = b;
                cursor = Some(off.wrapping_add(1));
              }
            }
          }
        }
        Operation::Read(buf) => {
          let mut off = cursor.unwrap_or(0);
          for b in buf.iter_mut() {
            *b = st.mem[reg::addr(st.page, off) as usize];
            off = off.wrapping_add(1);
          }
          cursor = Some(off);
        }
      }
    }
    Ok(())
  }
}

#[derive(Default)]
struct SpiState {
  mem: Vec<u8>,
  page: u8,
  selects: Vec<u8>,
  headers: Vec<[u8; 2]>,
  fail: u32,
}

/// SPI target speaking the RMI4 two byte address header.
///
/// Accesses to a page other than the selected one are refused, as are
/// transactions that do not start with a header.
#[derive(Clone)]
pub(crate) struct MockSpi(Rc<RefCell<SpiState>>);

impl Default for MockSpi {
  fn default() -> Self {
    Self(Rc::new(RefCell::new(SpiState { mem: vec![0; 0x1_0000], ..Default::default() })))
  }
}

impl MockSpi {
  pub(crate) fn fail_next(&self, n: u32) {
    self.0.borrow_mut().fail = n;
  }

  pub(crate) fn set(&self, addr: u16, data: &[u8]) {
    let start = addr as usize;
    self.0.borrow_mut().mem[start..start + data.len()].copy_from_slice(data);
  }

  pub(crate) fn register(&self, addr: u16) -> u8 {
    self.0.borrow().mem[addr as usize]
  }

  pub(crate) fn page_selects(&self) -> Vec<u8> {
    self.0.borrow().selects.clone()
  }

  /// Address header of every accepted transaction, oldest first.
  pub(crate) fn headers(&self) -> Vec<[u8; 2]> {
    self.0.borrow().headers.clone()
  }
}

impl spi::ErrorType for MockSpi {
  type Error = spi::ErrorKind;
}

impl SpiDevice for MockSpi {
  async fn transaction(&mut self, ops: &mut [spi::Operation<'_, u8>]) -> Result<(), spi::ErrorKind> {
    let mut guard = self.0.borrow_mut();
    let st = &mut *guard;
    if st.fail > 0 {
      st.fail -= 1;
      return Err(spi::ErrorKind::Other);
    }

    let Some((spi::Operation::Write(header), rest)) = ops.split_first_mut() else {
      return Err(spi::ErrorKind::Other);
    };
    let &[hi, lo] = *header else {
      return Err(spi::ErrorKind::Other);
    };
    let read = hi & 0x80 != 0;
    let addr = u16::from_be_bytes([hi & 0x7F, lo]);
    let page_select = !read && lo == PAGE_SELECT_REG;
    if !page_select && reg::page_of(addr) != st.page {
      return Err(spi::ErrorKind::Other);
    }
    st.headers.push([hi, lo]);

    let mut cursor = addr as usize;
    for op in rest.iter_mut() {
      match op {
        spi::Operation::Write(data) if page_select => {
          let &[page] = *data else {
            return Err(spi::ErrorKind::Other);
          };
          st.page = page;
          st.selects.push(page);
        }
        spi::Operation::Write(data) if !read => {
          st.mem[cursor..cursor + data.len()].copy_from_slice(data);
          cursor += data.len();
        }
        spi::Operation::Read(buf) if read => {
          buf.copy_from_slice(&st.mem[cursor..cursor + buf.len()]);
          cursor += buf.len();
        }
        _ => return Err(spi::ErrorKind::Other),
      }
    }
    Ok(())
  }
}

/// One recorded driver callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Call {
  Attention(u8, u8),
  Reset(u8),
  Suspend(u8),
  Resume(u8),
}

std::thread_local! {
  static CALLS: RefCell<Vec<Call>> = const { RefCell::new(Vec::new()) };
  static FAILING: RefCell<Vec<u8>> = const { RefCell::new(Vec::new()) };
  static DEFAULT_BITS: RefCell<Option<u8>> = const { RefCell::new(None) };
  static ENABLE_ON_ATTENTION: RefCell<Option<u8>> = const { RefCell::new(None) };
  static ENABLE_ON_RESET: RefCell<Option<u8>> = const { RefCell::new(None) };
  static FAIL_WRITES_ON_RESET: RefCell<Option<(MockBus, u32)>> = const { RefCell::new(None) };
  static ATTN_DATA: RefCell<Vec<Vec<u8>>> = const { RefCell::new(Vec::new()) };
}

/// Driver that binds every function and records what it was asked to do.
///
/// State lives in thread locals; every test runs on its own thread.
#[derive(Debug)]
pub(crate) struct Recorder {
  number: u8,
}

impl Recorder {
  pub(crate) fn calls() -> Vec<Call> {
    CALLS.with(|c| c.borrow().clone())
  }

  pub(crate) fn attention_calls() -> Vec<(u8, u8)> {
    Self::calls()
      .into_iter()
      .filter_map(|c| match c {
        Call::Attention(n, bits) => Some((n, bits)),
        _ => None,
      })
      .collect()
  }

  pub(crate) fn clear() {
    CALLS.with(|c| c.borrow_mut().clear());
  }

  /// Make every callback of function `number` fail.
  pub(crate) fn fail(number: u8) {
    FAILING.with(|f| f.borrow_mut().push(number));
  }

  /// Local bits each driver asks for at discovery instead of its full range.
  pub(crate) fn default_bits(bits: u8) {
    DEFAULT_BITS.with(|d| *d.borrow_mut() = Some(bits));
  }

  /// Local bits each driver additionally requests from its attention handler.
  pub(crate) fn enable_on_attention(bits: u8) {
    ENABLE_ON_ATTENTION.with(|d| *d.borrow_mut() = Some(bits));
  }

  /// Local bits each driver requests from its reset handler.
  pub(crate) fn enable_on_reset(bits: u8) {
    ENABLE_ON_RESET.with(|d| *d.borrow_mut() = Some(bits));
  }

  /// Make the next `n` writes on `bus` fail once a reset handler has run.
  pub(crate) fn fail_writes_on_reset(bus: &MockBus, n: u32) {
    FAIL_WRITES_ON_RESET.with(|f| *f.borrow_mut() = Some((bus.clone(), n)));
  }

  /// Payloads attention handlers were given, one per call that had one.
  pub(crate) fn attn_data() -> Vec<Vec<u8>> {
    ATTN_DATA.with(|d| d.borrow().clone())
  }

  fn record(&self, call: Call) -> Result<(), FunctionError> {
    CALLS.with(|c| c.borrow_mut().push(call));
    if FAILING.with(|f| f.borrow().contains(&self.number)) {
      Err(FunctionError::Data)
    } else {
      Ok(())
    }
  }
}

impl<T: Transport> FunctionDriver<T> for Recorder {
  fn probe(function: &FunctionInstance) -> Option<Self> {
    Some(Self { number: function.number() })
  }

  fn default_irq_bits(&self, function: &FunctionInstance) -> u8 {
    DEFAULT_BITS.with(|d| *d.borrow()).unwrap_or(function.irqs().local_mask())
  }

  async fn attention(&mut self, ctx: &mut Context<'_, T>, bits: u8) -> Result<(), FunctionError> {
    if let Some(extra) = ENABLE_ON_ATTENTION.with(|d| *d.borrow()) {
      ctx.set_irq_bits(extra);
    }
    if !ctx.attn_data().is_empty() {
      ATTN_DATA.with(|d| d.borrow_mut().push(ctx.attn_data().to_vec()));
    }
    self.record(Call::Attention(self.number, bits))
  }

  async fn reset(&mut self, ctx: &mut Context<'_, T>) -> Result<(), FunctionError> {
    if let Some(extra) = ENABLE_ON_RESET.with(|d| *d.borrow()) {
      ctx.set_irq_bits(extra);
    }
    if let Some((bus, n)) = FAIL_WRITES_ON_RESET.with(|f| f.borrow_mut().take()) {
      bus.fail_writes(n);
    }
    self.record(Call::Reset(self.number))
  }

  async fn suspend(&mut self, _ctx: &mut Context<'_, T>) -> Result<(), FunctionError> {
    self.record(Call::Suspend(self.number))
  }

  async fn resume(&mut self, _ctx: &mut Context<'_, T>) -> Result<(), FunctionError> {
    self.record(Call::Resume(self.number))
  }
}

/// Delay that returns at once and adds up what it was asked to wait.
#[derive(Debug, Default)]
pub(crate) struct MockDelay {
  pub(crate) total_ns: u64,
}

impl DelayNs for MockDelay {
  async fn delay_ns(&mut self, ns: u32) {
    self.total_ns += ns as u64;
  }
}

/// Attention line asserted `asserts` times, after which waiting fails.
#[derive(Debug, Default)]
pub(crate) struct MockAttn {
  pub(crate) asserts: u32,
  pub(crate) releases: u32,
}

impl MockAttn {
  pub(crate) fn new(asserts: u32) -> Self {
    Self { asserts, releases: 0 }
  }

  fn assert_once(&mut self) -> Result<(), digital::ErrorKind> {
    if self.asserts == 0 {
      return Err(digital::ErrorKind::Other);
    }
    self.asserts -= 1;
    Ok(())
  }
}

impl digital::ErrorType for MockAttn {
  type Error = digital::ErrorKind;
}

impl Wait for MockAttn {
  async fn wait_for_high(&mut self) -> Result<(), Self::Error> {
    self.releases += 1;
    Ok(())
  }

  async fn wait_for_low(&mut self) -> Result<(), Self::Error> {
    self.assert_once()
  }

  async fn wait_for_rising_edge(&mut self) -> Result<(), Self::Error> {
    Ok(())
  }

  async fn wait_for_falling_edge(&mut self) -> Result<(), Self::Error> {
    self.assert_once()
  }

  async fn wait_for_any_edge(&mut self) -> Result<(), Self::Error> {
    self.assert_once()
  }
}

pub(crate) type TestDevice = Rmi4<NoopRawMutex, MockBus, Recorder>;

/// A device on `bus`, attached with `platform`.
pub(crate) fn attached(bus: &MockBus, platform: PlatformData) -> TestDevice {
  let rmi = TestDevice::new(0, bus.clone(), platform);
  pollster::block_on(rmi.attach(&mut MockDelay::default())).unwrap();
  rmi
}
