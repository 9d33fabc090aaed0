//! Routing interrupt status to function drivers.
//!
//! [`Rmi4::handle_attention`] runs one dispatch cycle. The interrupt and
//! polling runners only decide *when* a cycle runs.

use core::sync::atomic::Ordering;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;

use crate::function::{Functions, Slot};
use crate::irq::IrqMask;
use crate::rw::Bus;
use crate::{AttnPolarity, Attention, Context, Core, Error, FunctionDriver, PowerHooks, Rmi4, State, Transport};

/// What a cycle found on the control function's interrupt bits.
enum ControlEvent {
  None,
  Reset,
  Bootloader,
}

impl<M, T, D, P> Rmi4<M, T, D, P>
where
  M: RawMutex,
  T: Transport,
  D: FunctionDriver<T>,
  P: PowerHooks,
{
  /// Run one dispatch cycle: read the interrupt status, hand each function
  /// the enabled bits it owns and apply any mask changes the handlers made.
  ///
  /// Returns the pending sources that were seen, or `None` if dispatch is
  /// currently held off (suspended, rescanning, bootloader mode). A failing
  /// status read abandons the cycle before any handler runs.
  ///
  /// When F01 reports a reset the cycle turns into a full rediscovery and
  /// the other functions are not dispatched.
  pub async fn handle_attention(&self) -> Result<Option<IrqMask>, Error<T::Error>> {
    self.attention_cycle(None).await
  }

  /// Run one dispatch cycle on interrupt status delivered by someone else,
  /// e.g. a HID tunnel that reports attention together with the status
  /// registers and the function data that followed them.
  ///
  /// `status` is the raw interrupt status, first source in bit 0 of the
  /// first byte. The status registers are not read. `data` reaches the
  /// handlers through [`Context::attn_data`].
  pub async fn handle_attention_with(&self, status: &[u8], data: &[u8]) -> Result<Option<IrqMask>, Error<T::Error>> {
    self.attention_cycle(Some((status, data))).await
  }

  async fn attention_cycle(&self, supplied: Option<(&[u8], &[u8])>) -> Result<Option<IrqMask>, Error<T::Error>> {
    let _pm = self.pm.lock().await;
    match self.state() {
      State::Active => {}
      State::Detached => return Err(Error::InvalidState(State::Detached)),
      _ => return Ok(None),
    }
    if self.in_bootloader() {
      return Ok(None);
    }

    let mut core = self.core.lock().await;
    self.stats.record_attn();

    let (pending, event) = {
      let Core { transport, functions } = &mut *core;
      let Some(fns) = functions.as_mut() else {
        return Ok(None);
      };
      let mut bus = Bus::new(transport, &self.stats);

      let (pending, data) = match supplied {
        Some((status, data)) => (fns.irq.set_status(status), data),
        None => (fns.irq.read_status(&mut bus).await.map_err(Error::Io)?, &[][..]),
      };
      trace!("attention {:?}", pending);

      let event = self.check_control(fns, &mut bus, pending).await?;
      if let ControlEvent::None = event {
        dispatch(fns, &mut bus, pending, data).await;
        fns.irq.commit(&mut bus).await.map_err(Error::Transport)?;
      }
      (pending, event)
    };

    match event {
      ControlEvent::None => {}
      ControlEvent::Bootloader => {
        warn!("rmi4 #{}: device entered bootloader mode", self.id);
        self.bootloader.store(true, Ordering::Release);
      }
      ControlEvent::Reset => {
        warn!("rmi4 #{}: device reset detected, rediscovering", self.id);
        self.rescan_locked(&mut core, true).await?;
      }
    }

    Ok(Some(pending))
  }

  async fn check_control(
    &self,
    fns: &mut Functions<D>,
    bus: &mut Bus<'_, T>,
    pending: IrqMask,
  ) -> Result<ControlEvent, Error<T::Error>> {
    let range = fns.slots[fns.control.index()].function.irqs();
    if range.extract(pending) == 0 {
      return Ok(ControlEvent::None);
    }

    let status = fns.control.read_status(bus).await.map_err(Error::Io)?;
    if status.bootloader() {
      Ok(ControlEvent::Bootloader)
    } else if (self.platform.reset_detect)(status) {
      Ok(ControlEvent::Reset)
    } else {
      Ok(ControlEvent::None)
    }
  }

  /// Dispatch from an attention line until the device is detached.
  ///
  /// The line is treated as level triggered with the polarity from
  /// [`crate::PlatformData::attention`]. Failed cycles are logged and the
  /// loop carries on; [`Rmi4::reset`] can be called from another task if
  /// the device stops responding.
  pub async fn run_interrupt<W: Wait>(&self, attn: &mut W) -> Result<(), Error<T::Error>> {
    let Attention::Irq(polarity) = self.platform.attention else {
      return Err(Error::InvalidState(self.state()));
    };

    while self.state() != State::Detached {
      wait_level(attn, polarity, true).await.map_err(|()| Error::Attention)?;

      match self.handle_attention().await {
        Ok(Some(_)) => {}
        // Held off. Let the line settle instead of spinning on it.
        Ok(None) => wait_level(attn, polarity, false).await.map_err(|()| Error::Attention)?,
        Err(Error::InvalidState(State::Detached)) => break,
        Err(_) => error!("rmi4 #{}: dispatch cycle failed", self.id),
      }
    }
    Ok(())
  }

  /// Dispatch every `interval_ms` until the device is detached. Ticks that
  /// land while dispatch is held off are dropped.
  pub async fn run_polling(&self, delay: &mut impl DelayNs) -> Result<(), Error<T::Error>> {
    let Attention::Polling { interval_ms } = self.platform.attention else {
      return Err(Error::InvalidState(self.state()));
    };

    while self.state() != State::Detached {
      delay.delay_ms(interval_ms).await;

      match self.handle_attention().await {
        Ok(_) => {}
        Err(Error::InvalidState(State::Detached)) => break,
        Err(_) => error!("rmi4 #{}: poll cycle failed", self.id),
      }
    }
    Ok(())
  }
}

async fn wait_level<W: Wait>(attn: &mut W, polarity: AttnPolarity, asserted: bool) -> Result<(), ()> {
  let low = matches!(polarity, AttnPolarity::ActiveLow) == asserted;
  let res = if low { attn.wait_for_low().await } else { attn.wait_for_high().await };
  res.map_err(|_| ())
}

/// Hand every healthy driver its share of `pending`, in PDT order.
async fn dispatch<T, D>(fns: &mut Functions<D>, bus: &mut Bus<'_, T>, pending: IrqMask, data: &[u8])
where
  T: Transport,
  D: FunctionDriver<T>,
{
  let Functions { slots, irq, .. } = fns;
  for Slot { function, driver, faulted } in slots.iter_mut() {
    let Some(driver) = driver.as_mut() else { continue };
    let bits = function.irqs().extract(pending);
    if bits == 0 || *faulted {
      continue;
    }

    let mut ctx = Context::new(function, bus.reborrow(), irq).with_attn_data(data);
    if let Err(e) = driver.attention(&mut ctx, bits).await {
      error!("F{:02x}: attention handler failed: {:?}", function.number(), e);
      *faulted = true;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mock::{attached, Call, MockAttn, MockBus, MockError, Recorder, TestDevice};
  use crate::PlatformData;

  /// F01 without interrupt sources, then F11 on bits [0,2) and F30 on [2,4).
  fn split_device() -> MockBus {
    let bus = MockBus::new();
    bus.pdt_entry(0, 0, [0x20, 0x30, 0x40, 0x50, 0, 0x01]);
    bus.pdt_entry(0, 1, [0x60, 0x70, 0x80, 0x90, 2, 0x11]);
    bus.pdt_entry(0, 2, [0xA0, 0xA1, 0xA2, 0xA3, 2, 0x30]);
    bus.clear_on_read(0x51);
    bus
  }

  /// Delay that detaches the device after a number of ticks.
  struct Ticks<'a> {
    rmi: &'a TestDevice,
    left: u32,
  }

  impl DelayNs for Ticks<'_> {
    async fn delay_ns(&mut self, _ns: u32) {}

    async fn delay_ms(&mut self, _ms: u32) {
      if self.left == 0 {
        self.rmi.detach().await;
      } else {
        self.left -= 1;
      }
    }
  }

  #[test]
  fn status_bits_go_to_their_owner() {
    let bus = split_device();
    let rmi = attached(&bus, PlatformData::new());
    bus.set(0x51, &[0b0000_0110]);

    let pending = pollster::block_on(rmi.handle_attention()).unwrap();

    assert_eq!(pending, Some(IrqMask::from_bits(0b0110)));
    assert_eq!(Recorder::attention_calls(), [(0x11, 0b10), (0x30, 0b01)]);
    assert!(Recorder::attn_data().is_empty());
    assert_eq!(pollster::block_on(rmi.last_status()), IrqMask::from_bits(0b0110));
  }

  #[test]
  fn supplied_status_skips_register_read() {
    let bus = split_device();
    let rmi = attached(&bus, PlatformData::new().with_attention(Attention::External));
    bus.set(0x51, &[0b1000]);
    let reads = rmi.stats().rx_count;

    let pending = pollster::block_on(rmi.handle_attention_with(&[0b1111_0001, 0xFF], &[0xAA, 0xBB])).unwrap();

    // Bits past the allocated sources are dropped.
    assert_eq!(pending, Some(IrqMask::from_bits(0b0001)));
    assert_eq!(Recorder::attention_calls(), [(0x11, 0b01)]);
    assert_eq!(Recorder::attn_data(), [vec![0xAA, 0xBB]]);
    assert_eq!(rmi.stats().rx_count, reads);
    assert_eq!(bus.get(0x51), 0b1000);
    assert_eq!(pollster::block_on(rmi.last_status()), IrqMask::from_bits(0b0001));
  }

  #[test]
  fn supplied_status_is_held_off_while_suspended() {
    let bus = split_device();
    let rmi = attached(&bus, PlatformData::new().with_attention(Attention::External));
    pollster::block_on(rmi.suspend()).unwrap();

    assert_eq!(pollster::block_on(rmi.handle_attention_with(&[0b0001], &[])), Ok(None));
    assert!(Recorder::attention_calls().is_empty());
  }

  #[test]
  fn handlers_never_see_foreign_bits() {
    let bus = split_device();
    let rmi = attached(&bus, PlatformData::new());

    for status in 0u8..=0xFF {
      Recorder::clear();
      bus.set(0x51, &[status]);
      pollster::block_on(rmi.handle_attention()).unwrap();

      let mut seen = IrqMask::EMPTY;
      for (number, bits) in Recorder::attention_calls() {
        assert_eq!(bits & !0b11, 0, "F{number:02x} got {bits:#b} for status {status:#b}");
        let start = if number == 0x11 { 0 } else { 2 };
        seen |= IrqMask::from_bits((bits as u64) << start);
      }
      assert_eq!(seen, IrqMask::from_bits(status as u64 & 0b1111));
    }
  }

  #[test]
  fn failed_status_read_runs_no_handler() {
    let bus = MockBus::two_function_device();
    let rmi = attached(&bus, PlatformData::new());
    let before = rmi.stats();
    bus.set(0x51, &[0b10]);
    bus.fail_reads(1);

    let res = pollster::block_on(rmi.handle_attention());

    assert_eq!(res, Err(Error::Io(MockError)));
    assert!(Recorder::attention_calls().is_empty());
    assert_eq!(rmi.stats().rx_errs, before.rx_errs + 1);
  }

  #[test]
  fn polling_survives_a_failed_tick() {
    let bus = MockBus::two_function_device();
    let rmi = attached(&bus, PlatformData::new().with_attention(Attention::Polling { interval_ms: 10 }));
    let before = rmi.stats();
    bus.set(0x51, &[0b10]);
    bus.fail_reads(1);

    let mut ticks = Ticks { rmi: &rmi, left: 3 };
    pollster::block_on(rmi.run_polling(&mut ticks)).unwrap();

    assert_eq!(rmi.state(), State::Detached);
    assert_eq!(Recorder::attention_calls(), [(0x11, 0b1)]);
    let stats = rmi.stats();
    assert_eq!(stats.rx_errs, before.rx_errs + 1);
    assert_eq!(stats.attn_count, 3);
  }

  #[test]
  fn reset_report_triggers_rediscovery() {
    let bus = MockBus::two_function_device();
    let rmi = attached(&bus, PlatformData::new());
    bus.set(0x50, &[0x01]);
    bus.set(0x51, &[0b11]);

    let pending = pollster::block_on(rmi.handle_attention()).unwrap();

    assert_eq!(pending, Some(IrqMask::from_bits(0b11)));
    assert!(Recorder::attention_calls().is_empty());
    assert!(Recorder::calls().contains(&Call::Reset(0x11)));
    assert_eq!(rmi.state(), State::Active);
  }

  #[test]
  fn custom_reset_predicate() {
    let bus = MockBus::two_function_device();
    let rmi = attached(&bus, PlatformData::new().with_reset_detect(|_| false));
    bus.set(0x50, &[0x01]);
    bus.set(0x51, &[0b11]);

    pollster::block_on(rmi.handle_attention()).unwrap();

    assert!(!Recorder::calls().contains(&Call::Reset(0x11)));
    assert_eq!(Recorder::attention_calls(), [(0x11, 0b1)]);
  }

  #[test]
  fn bootloader_report_stops_dispatch() {
    let bus = MockBus::two_function_device();
    let rmi = attached(&bus, PlatformData::new());
    bus.set(0x50, &[0b0100_0000]);
    bus.set(0x51, &[0b11]);

    pollster::block_on(rmi.handle_attention()).unwrap();
    assert!(rmi.in_bootloader());

    bus.set(0x51, &[0b10]);
    assert_eq!(pollster::block_on(rmi.handle_attention()), Ok(None));
    assert!(Recorder::attention_calls().is_empty());
  }

  #[test]
  fn failing_handler_is_isolated_until_rescan() {
    let bus = split_device();
    let rmi = attached(&bus, PlatformData::new());
    Recorder::fail(0x11);

    for _ in 0..2 {
      bus.set(0x51, &[0b0101]);
      pollster::block_on(rmi.handle_attention()).unwrap();
    }
    // F11 failed once and was dropped; F30 kept getting its bits.
    assert_eq!(Recorder::attention_calls(), [(0x11, 0b01), (0x30, 0b01), (0x30, 0b01)]);

    Recorder::clear();
    pollster::block_on(rmi.rescan()).unwrap();
    bus.set(0x51, &[0b0101]);
    pollster::block_on(rmi.handle_attention()).unwrap();
    assert_eq!(Recorder::attention_calls(), [(0x11, 0b01), (0x30, 0b01)]);
  }

  #[test]
  fn handler_requests_are_committed_after_the_cycle() {
    Recorder::default_bits(0b0001);
    Recorder::enable_on_attention(0b0110);
    let bus = MockBus::two_function_device();
    let rmi = attached(&bus, PlatformData::new());
    assert_eq!(pollster::block_on(rmi.enabled_irqs()), IrqMask::from_bits(0b0_0011));

    bus.set(0x51, &[0b10]);
    pollster::block_on(rmi.handle_attention()).unwrap();

    assert_eq!(pollster::block_on(rmi.enabled_irqs()), IrqMask::from_bits(0b0_1111));
    assert_eq!(bus.writes_to(0x41).last(), Some(&vec![0b0_1111]));
  }

  #[test]
  fn interrupt_runner_dispatches_each_assertion() {
    let bus = MockBus::two_function_device();
    let rmi = attached(&bus, PlatformData::new());
    bus.set(0x51, &[0b10]);
    let mut attn = MockAttn::new(2);

    let res = pollster::block_on(rmi.run_interrupt(&mut attn));

    assert_eq!(res, Err(Error::Attention));
    assert_eq!(rmi.stats().attn_count, 2);
    assert_eq!(Recorder::attention_calls(), [(0x11, 0b1)]);
    assert_eq!(attn.releases, 0);
  }

  #[test]
  fn interrupt_runner_waits_out_suspend() {
    let bus = MockBus::two_function_device();
    let rmi = attached(&bus, PlatformData::new());
    pollster::block_on(rmi.suspend()).unwrap();
    let mut attn = MockAttn::new(1);

    let res = pollster::block_on(rmi.run_interrupt(&mut attn));

    assert_eq!(res, Err(Error::Attention));
    assert_eq!(attn.releases, 1);
    assert_eq!(rmi.stats().attn_count, 0);
  }

  #[test]
  fn runner_must_match_attention_mode() {
    let bus = MockBus::two_function_device();
    let irq = attached(&bus, PlatformData::new());
    let res = pollster::block_on(irq.run_polling(&mut crate::mock::MockDelay::default()));
    assert_eq!(res, Err(Error::InvalidState(State::Active)));

    let bus = MockBus::two_function_device();
    let polled = attached(&bus, PlatformData::new().with_attention(Attention::Polling { interval_ms: 1 }));
    let res = pollster::block_on(polled.run_interrupt(&mut MockAttn::new(1)));
    assert_eq!(res, Err(Error::InvalidState(State::Active)));
  }
}
