//! Single WS2812 indicator pixel driven over RMT.

use std::time::Duration;

use anyhow::Context;
use esp_idf_hal::{
    gpio::OutputPin,
    peripheral::Peripheral,
    rmt::{config::TransmitConfig, FixedLengthSignal, PinState, Pulse, RmtChannel, TxRmtDriver},
};
use log::warn;

use sensorhub_common::Rgb;

// WS2812 bit timings at the 80 MHz APB clock with no divider.
const T0H_NS: u64 = 350;
const T0L_NS: u64 = 800;
const T1H_NS: u64 = 700;
const T1L_NS: u64 = 600;

enum PixelBackend {
    Rmt(TxRmtDriver<'static>),
    Disabled,
}

pub struct NeoPixel {
    backend: PixelBackend,
    failed_writes: u64,
}

impl NeoPixel {
    pub fn new<C, P>(
        channel: impl Peripheral<P = C> + 'static,
        pin: impl Peripheral<P = P> + 'static,
    ) -> anyhow::Result<Self>
    where
        C: RmtChannel,
        P: OutputPin,
    {
        let config = TransmitConfig::new().clock_divider(1);
        let tx = TxRmtDriver::new(channel, pin, &config)
            .context("failed to init RMT neopixel driver")?;
        let mut pixel = Self {
            backend: PixelBackend::Rmt(tx),
            failed_writes: 0,
        };
        pixel.set(Rgb::OFF);
        Ok(pixel)
    }

    pub fn disabled() -> Self {
        Self {
            backend: PixelBackend::Disabled,
            failed_writes: 0,
        }
    }

    pub fn set(&mut self, color: Rgb) {
        let PixelBackend::Rmt(tx) = &mut self.backend else {
            return;
        };
        if let Err(err) = write_pixel(tx, color) {
            self.failed_writes += 1;
            warn!(
                "neopixel write failed ({} so far): {err:#}",
                self.failed_writes
            );
        }
    }
}

fn write_pixel(tx: &mut TxRmtDriver<'static>, color: Rgb) -> anyhow::Result<()> {
    let ticks_hz = tx.counter_clock()?;
    let t0h = Pulse::new_with_duration(ticks_hz, PinState::High, &Duration::from_nanos(T0H_NS))?;
    let t0l = Pulse::new_with_duration(ticks_hz, PinState::Low, &Duration::from_nanos(T0L_NS))?;
    let t1h = Pulse::new_with_duration(ticks_hz, PinState::High, &Duration::from_nanos(T1H_NS))?;
    let t1l = Pulse::new_with_duration(ticks_hz, PinState::Low, &Duration::from_nanos(T1L_NS))?;

    // The strip expects green first.
    let grb = (u32::from(color.g) << 16) | (u32::from(color.r) << 8) | u32::from(color.b);
    let mut signal = FixedLengthSignal::<24>::new();
    for bit in 0..24 {
        let high = (grb >> (23 - bit)) & 1 == 1;
        let pair = if high { (t1h, t1l) } else { (t0h, t0l) };
        signal.set(bit, &pair)?;
    }
    tx.start_blocking(&signal)?;
    Ok(())
}
