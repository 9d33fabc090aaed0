//! Control-only bring-up of a sensor without an attention line.
#![allow(unused)]
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embedded_hal_async::{
  delay::DelayNs,
  i2c::{I2c, SevenBitAddress},
};
use rmi4::{Attention, I2cTransport, NoDrivers, NoSleep, PlatformData, PowerManagement, Rmi4, DEFAULT_I2C_ADDR};

#[allow(dead_code)]
async fn main_async<I2C, D, E>(i2c: I2C, mut delay: D) -> Result<(), rmi4::Error<E>>
where
  I2C: I2c<SevenBitAddress, Error = E>,
  D: DelayNs,
  E: core::fmt::Debug,
{
  let platform = PlatformData::new()
    .with_attention(Attention::Polling { interval_ms: 10 })
    .with_power(PowerManagement::new().with_nosleep(NoSleep::On));

  let rmi: Rmi4<NoopRawMutex, _, NoDrivers> = Rmi4::new(0, I2cTransport::new(i2c, DEFAULT_I2C_ADDR), platform);
  rmi.attach(&mut delay).await?;

  for f in rmi.functions().await {
    let irqs = f.irqs();
    let _ = (f.number(), irqs.start(), irqs.count());
  }
  let _product = rmi.product_info().await;

  rmi.run_polling(&mut delay).await
}

fn main() {}
