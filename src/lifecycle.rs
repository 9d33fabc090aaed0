//! Attach, detach, suspend, resume and reset sequencing.

use core::sync::atomic::Ordering;

use alloc::vec::Vec;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal_async::delay::DelayNs;

use crate::control::ControlFunction;
use crate::function::{Functions, Slot};
use crate::irq::{IrqMask, IrqState};
use crate::reg::F01;
use crate::rw::Bus;
use crate::{pdt, Context, Core, Error, FunctionDriver, HookStage, PowerHooks, Rmi4, State, Transport};

/// Keeps the first error of a best-effort sequence.
struct FirstError<E>(Option<E>);

impl<E> FirstError<E> {
  fn new() -> Self {
    Self(None)
  }

  fn note(&mut self, e: E) {
    self.0.get_or_insert(e);
  }

  fn into_result(self) -> Result<(), E> {
    match self.0 {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }
}

impl<M, T, D, P> Rmi4<M, T, D, P>
where
  M: RawMutex,
  T: Transport,
  D: FunctionDriver<T>,
  P: PowerHooks,
{
  /// Bring the device up: enable the transport, optionally reset the device,
  /// discover its functions and enable their default interrupt sources.
  ///
  /// On failure the transport is disabled again and the device stays
  /// [`State::Detached`].
  pub async fn attach(&self, delay: &mut impl DelayNs) -> Result<(), Error<T::Error>> {
    let mut pm = self.pm.lock().await;
    if self.state() != State::Detached {
      return Err(Error::InvalidState(self.state()));
    }

    let mut core = self.core.lock().await;
    self.set_state(State::Probing);
    info!("rmi4 #{}: attaching over {}", self.id, self.proto);

    match self.bring_up(&mut core, delay).await {
      Ok(()) => {
        pm.attach_count += 1;
        self.set_state(State::Active);
        Ok(())
      }
      Err(e) => {
        error!("rmi4 #{}: attach failed", self.id);
        core.functions = None;
        Bus::new(&mut core.transport, &self.stats).disable().await;
        self.set_state(State::Detached);
        Err(e)
      }
    }
  }

  async fn bring_up(&self, core: &mut Core<T, D>, delay: &mut impl DelayNs) -> Result<(), Error<T::Error>> {
    {
      let mut bus = Bus::new(&mut core.transport, &self.stats);
      bus.enable().await.map_err(Error::Io)?;

      if self.platform.reset_on_attach {
        // Only F01 is needed to issue the reset; the full scan follows.
        match pdt::find_function(&mut bus, self.platform.max_pages, F01).await.map_err(Error::Io)? {
          Some(f01) => {
            debug!("resetting device before discovery");
            bus.reset(f01.command_base).await.map_err(Error::Io)?;
            delay.delay_ms(self.platform.reset_delay_ms).await;
          }
          None => warn!("no F01 found, skipping initial reset"),
        }
      }
    }

    self.set_state(State::Discovering);
    self.rescan_locked(core, false).await
  }

  /// Tear the device down. Waits for any dispatch cycle in progress, then
  /// drops every function and disables the transport. Runners exit on their
  /// next iteration.
  pub async fn detach(&self) {
    let _pm = self.pm.lock().await;
    let mut core = self.core.lock().await;
    self.set_state(State::Detached);

    core.functions = None;
    self.bootloader.store(false, Ordering::Release);
    Bus::new(&mut core.transport, &self.stats).disable().await;
    info!("rmi4 #{}: detached", self.id);
  }

  /// Put the device to sleep and stop dispatch.
  ///
  /// Every step runs even if a platform hook fails; the first failure is
  /// returned.
  pub async fn suspend(&self) -> Result<(), Error<T::Error>> {
    let mut pm = self.pm.lock().await;
    if self.state() != State::Active {
      return Err(Error::InvalidState(self.state()));
    }

    let mut result = FirstError::new();
    if let Some(hooks) = pm.hooks.as_mut() {
      if hooks.pre_suspend().await.is_err() {
        warn!("pre-suspend hook failed");
        result.note(Error::Hook(HookStage::PreSuspend));
      }
    }

    self.set_state(State::Suspended);

    {
      let mut core = self.core.lock().await;
      let Core { transport, functions } = &mut *core;
      let mut bus = Bus::new(transport, &self.stats);

      if let Some(fns) = functions.as_mut() {
        for_each_driver(fns, &mut bus, DriverOp::Suspend).await;
        if let Err(e) = fns.control.sleep(&mut bus).await {
          warn!("failed to put sensor to sleep");
          result.note(Error::Io(e));
        }
      }

      if self.platform.power_down_on_suspend {
        bus.disable().await;
      }
    }

    if let Some(hooks) = pm.hooks.as_mut() {
      if hooks.post_suspend().await.is_err() {
        warn!("post-suspend hook failed");
        result.note(Error::Hook(HookStage::PostSuspend));
      }
    }

    info!("rmi4 #{}: suspended", self.id);
    result.into_result()
  }

  /// Wake the device and restart dispatch.
  ///
  /// If the device lost its state while suspended (it reports a reset, or
  /// [`crate::PlatformData::rescan_on_resume`] is set) the functions are
  /// rediscovered and the new default mask takes effect. Otherwise the mask
  /// enabled before suspend is kept.
  pub async fn resume(&self) -> Result<(), Error<T::Error>> {
    let mut pm = self.pm.lock().await;
    if self.state() != State::Suspended {
      return Err(Error::InvalidState(self.state()));
    }

    let mut result = FirstError::new();
    if let Some(hooks) = pm.hooks.as_mut() {
      if hooks.pre_resume().await.is_err() {
        warn!("pre-resume hook failed");
        result.note(Error::Hook(HookStage::PreResume));
      }
    }

    {
      let mut core = self.core.lock().await;
      if let Err(e) = self.wake(&mut core).await {
        result.note(e);
      }
    }

    self.set_state(State::Active);

    if let Some(hooks) = pm.hooks.as_mut() {
      if hooks.post_resume().await.is_err() {
        warn!("post-resume hook failed");
        result.note(Error::Hook(HookStage::PostResume));
      }
    }

    info!("rmi4 #{}: resumed", self.id);
    result.into_result()
  }

  async fn wake(&self, core: &mut Core<T, D>) -> Result<(), Error<T::Error>> {
    let rescan = {
      let Core { transport, functions } = &mut *core;
      let mut bus = Bus::new(transport, &self.stats);

      if self.platform.power_down_on_suspend {
        bus.enable().await.map_err(Error::Io)?;
      }

      let Some(fns) = functions.as_mut() else {
        return Ok(());
      };

      let status = fns.control.read_status(&mut bus).await.map_err(Error::Io)?;
      if self.platform.rescan_on_resume || (self.platform.reset_detect)(status) {
        true
      } else {
        fns.control.wake(&mut bus).await.map_err(Error::Io)?;
        if self.platform.power_down_on_suspend {
          fns.irq.restore(&mut bus).await.map_err(Error::Transport)?;
        }
        for_each_driver(fns, &mut bus, DriverOp::Resume).await;
        fns.irq.commit(&mut bus).await.map_err(Error::Transport)?;
        false
      }
    };

    if rescan {
      info!("device state lost across suspend, rediscovering");
      self.rescan_locked(core, true).await?;
    }
    Ok(())
  }

  /// Rediscover all functions without resetting the device. Dispatch is held
  /// off for the duration.
  pub async fn rescan(&self) -> Result<(), Error<T::Error>> {
    let _pm = self.pm.lock().await;
    if self.state() != State::Active {
      return Err(Error::InvalidState(self.state()));
    }

    let mut core = self.core.lock().await;
    self.rescan_locked(&mut core, false).await
  }

  /// Reset the device through F01, wait for it to boot and rediscover its
  /// functions. Bound drivers get their [`FunctionDriver::reset`] call.
  pub async fn reset(&self, delay: &mut impl DelayNs) -> Result<(), Error<T::Error>> {
    let _pm = self.pm.lock().await;
    if self.state() != State::Active {
      return Err(Error::InvalidState(self.state()));
    }

    let mut core = self.core.lock().await;
    let reset_addr = match core.functions.as_ref() {
      Some(fns) => fns.control.reset_addr(),
      None => return Err(Error::InvalidState(self.state())),
    };

    info!("rmi4 #{}: resetting", self.id);
    Bus::new(&mut core.transport, &self.stats).reset(reset_addr).await.map_err(Error::Io)?;
    delay.delay_ms(self.platform.reset_delay_ms).await;

    self.rescan_locked(&mut core, true).await
  }

  /// Build a fresh function set and swap it in. The previous set stays in
  /// place if anything fails before the new mask reaches the device.
  ///
  /// Callers hold both locks.
  pub(crate) async fn rescan_locked(&self, core: &mut Core<T, D>, after_reset: bool) -> Result<(), Error<T::Error>> {
    let mut bus = Bus::new(&mut core.transport, &self.stats);
    let found = pdt::discover(&mut bus, &self.platform).await?;

    let ctl_desc = *found.functions[found.control].descriptor();
    let mut irq = IrqState::new(
      found.irq_count,
      ControlFunction::enable_addr(&ctl_desc),
      ControlFunction::status_addr(&ctl_desc),
    );
    irq.sync(&mut bus).await.map_err(Error::Io)?;

    let mut control = ControlFunction::new(found.control, ctl_desc, irq.reg_count());
    control.identify(&mut bus).await.map_err(Error::Io)?;

    let mut default = IrqMask::EMPTY;
    let mut slots = Vec::with_capacity(found.functions.len());
    for (index, function) in found.functions.into_iter().enumerate() {
      let driver = if index == found.control {
        default |= function.irqs().mask();
        None
      } else if found.bootloader {
        None
      } else {
        D::probe(&function)
      };

      if let Some(d) = &driver {
        default |= function.irqs().place(d.default_irq_bits(&function));
      } else if index != found.control {
        debug!("F{:02x}: no driver", function.number());
      }

      slots.push(Slot { function, driver, faulted: false });
    }

    if !found.bootloader {
      control.configure(&mut bus, &self.platform.power).await.map_err(Error::Io)?;
    }

    irq.set_requested(default);
    irq.commit(&mut bus).await.map_err(Error::Transport)?;

    // The device runs the new mask from here on, so the new set is installed
    // even if a driver's reset requests cannot be committed. They stay
    // pending for the next commit.
    let mut fns = Functions { slots, control, irq };
    let result = if after_reset {
      for_each_driver(&mut fns, &mut bus, DriverOp::Reset).await;
      fns.irq.commit(&mut bus).await.map(|_| ()).map_err(Error::Transport)
    } else {
      Ok(())
    };

    self.bootloader.store(found.bootloader, Ordering::Release);
    core.functions = Some(fns);
    result
  }
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum DriverOp {
  Reset,
  Suspend,
  Resume,
}

/// Run a lifecycle callback on every bound, healthy driver. A failing driver
/// is marked faulted and skipped by dispatch until the next rescan.
async fn for_each_driver<T, D>(fns: &mut Functions<D>, bus: &mut Bus<'_, T>, op: DriverOp)
where
  T: Transport,
  D: FunctionDriver<T>,
{
  let Functions { slots, irq, .. } = fns;
  for Slot { function, driver, faulted } in slots.iter_mut() {
    let Some(driver) = driver.as_mut() else { continue };
    if *faulted {
      continue;
    }

    let mut ctx = Context::new(function, bus.reborrow(), irq);
    let res = match op {
      DriverOp::Reset => driver.reset(&mut ctx).await,
      DriverOp::Suspend => driver.suspend(&mut ctx).await,
      DriverOp::Resume => driver.resume(&mut ctx).await,
    };
    if let Err(e) = res {
      error!("F{:02x}: {:?} failed: {:?}", function.number(), op, e);
      *faulted = true;
    }
  }
}
