//! A function driver set handling F11 (2D sensor) and F1A (buttons).
#![allow(unused)]
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embedded_hal_async::{delay::DelayNs, digital::Wait, spi::SpiDevice};
use rmi4::{
  Context, FunctionDriver, FunctionError, FunctionInstance, PlatformData, Rmi4, SpiTransport, Transport,
};

/// Raw finger state bytes of the first finger.
struct Sensor2d {
  data: u16,
  last: [u8; 5],
}

struct Buttons {
  data: u16,
  pressed: u8,
}

enum Drivers {
  Sensor2d(Sensor2d),
  Buttons(Buttons),
}

impl<T: Transport> FunctionDriver<T> for Drivers {
  fn probe(function: &FunctionInstance) -> Option<Self> {
    let data = function.descriptor().data_base;
    match function.number() {
      0x11 => Some(Self::Sensor2d(Sensor2d { data, last: [0; 5] })),
      0x1A => Some(Self::Buttons(Buttons { data, pressed: 0 })),
      _ => None,
    }
  }

  async fn attention(&mut self, ctx: &mut Context<'_, T>, _bits: u8) -> Result<(), FunctionError> {
    match self {
      Self::Sensor2d(s) => {
        // One finger status byte precedes the position registers.
        let mut buf = [0u8; 6];
        ctx.read(s.data, &mut buf).await?;
        s.last.copy_from_slice(&buf[1..]);
      }
      Self::Buttons(b) => b.pressed = ctx.read_u8(b.data).await?,
    }
    Ok(())
  }
}

#[allow(dead_code)]
async fn main_async<S, W, D>(spi: S, mut attn: W, mut delay: D) -> Result<(), rmi4::Error<S::Error>>
where
  S: SpiDevice,
  W: Wait,
  D: DelayNs,
{
  let rmi: Rmi4<NoopRawMutex, _, Drivers> = Rmi4::new(1, SpiTransport::new(spi), PlatformData::new());
  rmi.attach(&mut delay).await?;

  // Only report buttons until the application asks for touches.
  rmi.clear_bits(0x11, 0xFF).await?;
  rmi.commit().await?;

  rmi.run_interrupt(&mut attn).await
}

fn main() {}
