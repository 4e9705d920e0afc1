//! DHT22 (AM2302) temperature and humidity sensor.
//!
//! The DHT22 speaks a single-wire protocol: the host pulls the data line low
//! to request a sample, then the sensor answers with 40 bits whose values are
//! encoded in the width of each high pulse. Reading it from Linux user space
//! means the timing is best-effort, so missed edges and checksum mismatches
//! are routine and reported as transient faults.
//!
//! Pulse capture needs the `gpio` feature. Frame decoding is always compiled.

use crate::error::{Result, TelemetryError};
use crate::sensors::data::ClimateReading;
use std::time::Duration;

/// Minimum time the DHT22 needs between two reads.
pub const DHT22_MIN_INTERVAL: Duration = Duration::from_secs(2);

/// Number of data bits in one frame.
const FRAME_BITS: usize = 40;

/// High pulses longer than this many microseconds encode a 1 bit.
const ONE_BIT_THRESHOLD_US: u32 = 50;

/// Turn captured high-pulse widths (microseconds) into the five frame bytes.
///
/// The sensor's response pulse and any leading noise are ignored: only the
/// trailing 40 pulses carry data.
pub fn decode_pulses(high_pulses_us: &[u32]) -> Result<[u8; 5]> {
    if high_pulses_us.len() < FRAME_BITS {
        return Err(TelemetryError::transient_fault(format!(
            "expected {} data pulses, captured {}",
            FRAME_BITS,
            high_pulses_us.len()
        )));
    }

    let data = &high_pulses_us[high_pulses_us.len() - FRAME_BITS..];
    let mut frame = [0u8; 5];
    for (i, width) in data.iter().enumerate() {
        frame[i / 8] <<= 1;
        if *width > ONE_BIT_THRESHOLD_US {
            frame[i / 8] |= 1;
        }
    }
    Ok(frame)
}

/// Validate a 5-byte frame and convert it to a reading.
pub fn decode_frame(frame: [u8; 5]) -> Result<ClimateReading> {
    let checksum = frame[..4].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if checksum != frame[4] {
        return Err(TelemetryError::transient_fault(format!(
            "checksum mismatch: computed {:#04x}, received {:#04x}",
            checksum, frame[4]
        )));
    }

    let humidity = u16::from_be_bytes([frame[0], frame[1]]) as f32 / 10.0;
    let magnitude = u16::from_be_bytes([frame[2] & 0x7F, frame[3]]) as f32 / 10.0;
    let temperature_c = if frame[2] & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    };

    // A frame with a valid checksum can still be garbage if bits slipped.
    if !(0.0..=100.0).contains(&humidity) || !(-40.0..=80.0).contains(&temperature_c) {
        return Err(TelemetryError::transient_fault(format!(
            "reading out of range: {}C, {}%",
            temperature_c, humidity
        )));
    }

    Ok(ClimateReading {
        temperature_c,
        humidity,
    })
}

#[cfg(feature = "gpio")]
mod raspberry_pi {
    use super::*;
    use crate::sampler::SensorDriver;
    use rppal::gpio::{Gpio, IoPin, Level, Mode, PullUpDown};
    use std::thread;
    use std::time::Instant;
    use tracing::info;

    /// Host start signal: hold the line low for at least 1 ms.
    const START_SIGNAL: Duration = Duration::from_micros(1100);

    /// A full frame takes about 5 ms; anything beyond this is a lost frame.
    const CAPTURE_WINDOW: Duration = Duration::from_millis(10);

    /// Response pulse pair plus two edges per data bit, with some slack.
    const MAX_HIGH_PULSES: usize = FRAME_BITS + 4;

    /// DHT22 wired to a Raspberry Pi GPIO pin.
    pub struct Dht22 {
        pin: IoPin,
        bcm_pin: u8,
    }

    impl Dht22 {
        /// Claim the given BCM pin for the sensor.
        pub fn new(bcm_pin: u8) -> Result<Self> {
            let gpio = Gpio::new().map_err(|e| {
                TelemetryError::hardware_error(format!("Failed to initialize GPIO: {}", e))
            })?;
            let pin = gpio.get(bcm_pin).map_err(|e| {
                TelemetryError::hardware_error(format!("Failed to claim pin {}: {}", bcm_pin, e))
            })?;

            info!("DHT22 attached to BCM pin {}", bcm_pin);
            Ok(Self {
                pin: pin.into_io(Mode::Input),
                bcm_pin,
            })
        }

        /// BCM number of the data pin.
        pub fn pin(&self) -> u8 {
            self.bcm_pin
        }

        /// Send the start signal and record the width of each high pulse.
        fn capture_pulses(&mut self) -> Vec<u32> {
            self.pin.set_mode(Mode::Output);
            self.pin.set_low();
            thread::sleep(START_SIGNAL);
            self.pin.set_high();
            self.pin.set_mode(Mode::Input);
            self.pin.set_pullupdown(PullUpDown::PullUp);

            let mut pulses = Vec::with_capacity(MAX_HIGH_PULSES);
            let started = Instant::now();
            let mut level = self.pin.read();
            let mut edge = started;

            while started.elapsed() < CAPTURE_WINDOW && pulses.len() < MAX_HIGH_PULSES {
                let current = self.pin.read();
                if current != level {
                    let now = Instant::now();
                    if level == Level::High {
                        pulses.push(now.duration_since(edge).as_micros() as u32);
                    }
                    level = current;
                    edge = now;
                }
            }

            pulses
        }
    }

    impl SensorDriver for Dht22 {
        type Reading = ClimateReading;

        fn min_interval(&self) -> Duration {
            DHT22_MIN_INTERVAL
        }

        fn read(&mut self) -> Result<ClimateReading> {
            let pulses = self.capture_pulses();
            decode_frame(decode_pulses(&pulses)?)
        }

        fn close(&mut self) {
            self.pin.set_mode(Mode::Input);
            self.pin.set_pullupdown(PullUpDown::Off);
            info!("Released DHT22 on BCM pin {}", self.bcm_pin);
        }
    }
}

#[cfg(not(feature = "gpio"))]
mod unsupported {
    use super::*;
    use crate::sampler::SensorDriver;

    /// Placeholder for builds without GPIO support.
    pub struct Dht22 {
        bcm_pin: u8,
    }

    impl Dht22 {
        /// Always fails: pulse capture needs the `gpio` feature.
        pub fn new(bcm_pin: u8) -> Result<Self> {
            Err(TelemetryError::hardware_error(format!(
                "GPIO support not compiled in (requested DHT22 on pin {})",
                bcm_pin
            )))
        }

        /// BCM number of the data pin.
        pub fn pin(&self) -> u8 {
            self.bcm_pin
        }
    }

    impl SensorDriver for Dht22 {
        type Reading = ClimateReading;

        fn min_interval(&self) -> Duration {
            DHT22_MIN_INTERVAL
        }

        fn read(&mut self) -> Result<ClimateReading> {
            Err(TelemetryError::hardware_error("GPIO support not compiled in"))
        }
    }
}

#[cfg(feature = "gpio")]
pub use raspberry_pi::Dht22;

#[cfg(not(feature = "gpio"))]
pub use unsupported::Dht22;
