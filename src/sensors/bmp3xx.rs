//! Bosch BMP388 / BMP390 barometric pressure sensor over I2C.
//!
//! Each [`Bmp3xx::read`] triggers a forced-mode conversion, waits for the
//! data-ready flags and compensates the raw values with the factory
//! calibration stored in the chip.

use crate::error::{Result, TelemetryError};
use crate::sensors::data::BaroReading;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// Default I2C address (SDO pulled high, as on most breakout boards).
pub const BMP3XX_DEFAULT_ADDRESS: u16 = 0x77;

const REG_CHIP_ID: u8 = 0x00;
const REG_STATUS: u8 = 0x03;
const REG_DATA: u8 = 0x04;
const REG_PWR_CTRL: u8 = 0x1B;
const REG_OSR: u8 = 0x1C;
const REG_CALIBRATION: u8 = 0x31;
const REG_CMD: u8 = 0x7E;

const CHIP_ID_BMP388: u8 = 0x50;
const CHIP_ID_BMP390: u8 = 0x60;
const CMD_SOFT_RESET: u8 = 0xB6;

/// Pressure and temperature enabled, forced mode.
const PWR_FORCED: u8 = 0x13;
/// Temperature x2, pressure x8 oversampling.
const OSR_DEFAULT: u8 = (0b001 << 3) | 0b011;

const STATUS_DRDY_PRESS: u8 = 1 << 5;
const STATUS_DRDY_TEMP: u8 = 1 << 6;
const DATA_READY_POLLS: usize = 50;
const DATA_READY_DELAY: Duration = Duration::from_millis(2);

/// Register-level access to an I2C device.
pub trait RegisterBus {
    /// Read `buf.len()` consecutive registers starting at `register`.
    fn read_registers(&mut self, register: u8, buf: &mut [u8]) -> Result<()>;

    /// Write a single register.
    fn write_register(&mut self, register: u8, value: u8) -> Result<()>;
}

/// A sensor reporting pressure-derived data.
pub trait Barometer {
    /// Take one complete measurement.
    fn read(&mut self) -> Result<BaroReading>;
}

/// Factory calibration coefficients, scaled to floating point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    t1: f64,
    t2: f64,
    t3: f64,
    p1: f64,
    p2: f64,
    p3: f64,
    p4: f64,
    p5: f64,
    p6: f64,
    p7: f64,
    p8: f64,
    p9: f64,
    p10: f64,
    p11: f64,
}

impl Calibration {
    /// Number of calibration bytes starting at register 0x31.
    pub const LEN: usize = 21;

    /// Decode the raw NVM calibration block.
    pub fn from_bytes(raw: &[u8; Self::LEN]) -> Self {
        let u16_at = |i: usize| u16::from_le_bytes([raw[i], raw[i + 1]]) as f64;
        let i16_at = |i: usize| i16::from_le_bytes([raw[i], raw[i + 1]]) as f64;
        let i8_at = |i: usize| raw[i] as i8 as f64;

        Self {
            t1: u16_at(0) * 2f64.powi(8),
            t2: u16_at(2) / 2f64.powi(30),
            t3: i8_at(4) / 2f64.powi(48),
            p1: (i16_at(5) - 2f64.powi(14)) / 2f64.powi(20),
            p2: (i16_at(7) - 2f64.powi(14)) / 2f64.powi(29),
            p3: i8_at(9) / 2f64.powi(32),
            p4: i8_at(10) / 2f64.powi(37),
            p5: u16_at(11) * 2f64.powi(3),
            p6: u16_at(13) / 2f64.powi(6),
            p7: i8_at(15) / 2f64.powi(8),
            p8: i8_at(16) / 2f64.powi(15),
            p9: i16_at(17) / 2f64.powi(48),
            p10: i8_at(19) / 2f64.powi(48),
            p11: i8_at(20) / 2f64.powi(65),
        }
    }

    /// Linearized temperature in degrees Celsius.
    pub fn compensate_temperature(&self, raw_temperature: u32) -> f64 {
        let partial1 = raw_temperature as f64 - self.t1;
        let partial2 = partial1 * self.t2;
        partial2 + partial1 * partial1 * self.t3
    }

    /// Compensated pressure in pascals, given the linearized temperature.
    pub fn compensate_pressure(&self, raw_pressure: u32, temperature_c: f64) -> f64 {
        let t = temperature_c;
        let up = raw_pressure as f64;

        let offset = self.p5 + self.p6 * t + self.p7 * t * t + self.p8 * t * t * t;
        let sensitivity = up * (self.p1 + self.p2 * t + self.p3 * t * t + self.p4 * t * t * t);
        let quadratic = up * up * (self.p9 + self.p10 * t);
        let cubic = up * up * up * self.p11;

        offset + sensitivity + quadratic + cubic
    }
}

/// Altitude in meters for a pressure, relative to the given sea-level pressure.
pub fn pressure_altitude(pressure_hpa: f64, sea_level_hpa: f64) -> f64 {
    44307.7 * (1.0 - (pressure_hpa / sea_level_hpa).powf(0.190284))
}

/// BMP388/BMP390 driver.
pub struct Bmp3xx<B: RegisterBus> {
    bus: B,
    calibration: Calibration,
    sea_level_pressure_hpa: f64,
}

impl<B: RegisterBus> Bmp3xx<B> {
    /// Probe, reset and load calibration from the sensor on `bus`.
    pub fn new(mut bus: B, sea_level_pressure_hpa: f64) -> Result<Self> {
        let mut chip_id = [0u8; 1];
        bus.read_registers(REG_CHIP_ID, &mut chip_id)?;
        if chip_id[0] != CHIP_ID_BMP388 && chip_id[0] != CHIP_ID_BMP390 {
            return Err(TelemetryError::hardware_error(format!(
                "Unexpected BMP3xx chip id {:#04x}",
                chip_id[0]
            )));
        }

        bus.write_register(REG_CMD, CMD_SOFT_RESET)?;
        thread::sleep(Duration::from_millis(10));

        let mut raw = [0u8; Calibration::LEN];
        bus.read_registers(REG_CALIBRATION, &mut raw)?;
        let calibration = Calibration::from_bytes(&raw);

        bus.write_register(REG_OSR, OSR_DEFAULT)?;

        info!("BMP3xx (chip id {:#04x}) initialized", chip_id[0]);
        Ok(Self {
            bus,
            calibration,
            sea_level_pressure_hpa,
        })
    }

    /// Reference pressure used for altitude.
    pub fn sea_level_pressure(&self) -> f64 {
        self.sea_level_pressure_hpa
    }

    /// Change the reference pressure used for altitude.
    pub fn set_sea_level_pressure(&mut self, pressure_hpa: f64) {
        self.sea_level_pressure_hpa = pressure_hpa;
    }

    /// Loaded calibration coefficients.
    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    fn wait_for_data(&mut self) -> Result<()> {
        let mut status = [0u8; 1];
        for _ in 0..DATA_READY_POLLS {
            self.bus.read_registers(REG_STATUS, &mut status)?;
            if status[0] & STATUS_DRDY_PRESS != 0 && status[0] & STATUS_DRDY_TEMP != 0 {
                return Ok(());
            }
            thread::sleep(DATA_READY_DELAY);
        }
        Err(TelemetryError::hardware_error("BMP3xx conversion timed out"))
    }
}

impl<B: RegisterBus> Barometer for Bmp3xx<B> {
    fn read(&mut self) -> Result<BaroReading> {
        self.bus.write_register(REG_PWR_CTRL, PWR_FORCED)?;
        self.wait_for_data()?;

        let mut data = [0u8; 6];
        self.bus.read_registers(REG_DATA, &mut data)?;
        let raw_pressure = u32::from_le_bytes([data[0], data[1], data[2], 0]);
        let raw_temperature = u32::from_le_bytes([data[3], data[4], data[5], 0]);

        let temperature_c = self.calibration.compensate_temperature(raw_temperature);
        let pressure_hpa = self
            .calibration
            .compensate_pressure(raw_pressure, temperature_c)
            / 100.0;
        let altitude_m = pressure_altitude(pressure_hpa, self.sea_level_pressure_hpa);

        debug!(
            "BMP3xx: {:.2} hPa, {:.2} C, {:.2} m",
            pressure_hpa, temperature_c, altitude_m
        );
        Ok(BaroReading {
            pressure_hpa,
            temperature_c,
            altitude_m,
        })
    }
}

#[cfg(feature = "gpio")]
mod raspberry_pi {
    use super::*;
    use rppal::i2c::I2c;

    impl RegisterBus for I2c {
        fn read_registers(&mut self, register: u8, buf: &mut [u8]) -> Result<()> {
            self.write_read(&[register], buf).map_err(|e| {
                TelemetryError::hardware_error(format!(
                    "I2C read of register {:#04x} failed: {}",
                    register, e
                ))
            })
        }

        fn write_register(&mut self, register: u8, value: u8) -> Result<()> {
            self.write(&[register, value]).map_err(|e| {
                TelemetryError::hardware_error(format!(
                    "I2C write of register {:#04x} failed: {}",
                    register, e
                ))
            })?;
            Ok(())
        }
    }

    /// Open an I2C bus and address the given device.
    pub fn open_i2c(bus: u8, address: u16) -> Result<I2c> {
        let mut i2c = I2c::with_bus(bus).map_err(|e| {
            TelemetryError::hardware_error(format!("Failed to open I2C bus {}: {}", bus, e))
        })?;
        i2c.set_slave_address(address).map_err(|e| {
            TelemetryError::hardware_error(format!(
                "Failed to address I2C device {:#04x}: {}",
                address, e
            ))
        })?;
        Ok(i2c)
    }

    /// BMP3xx attached to a Linux I2C bus.
    pub type DefaultBarometer = Bmp3xx<I2c>;
}

#[cfg(not(feature = "gpio"))]
mod unsupported {
    use super::*;

    /// Placeholder bus for builds without I2C support.
    pub struct NoBus;

    impl RegisterBus for NoBus {
        fn read_registers(&mut self, _register: u8, _buf: &mut [u8]) -> Result<()> {
            Err(TelemetryError::hardware_error("I2C support not compiled in"))
        }

        fn write_register(&mut self, _register: u8, _value: u8) -> Result<()> {
            Err(TelemetryError::hardware_error("I2C support not compiled in"))
        }
    }

    /// Always fails: the I2C bus needs the `gpio` feature.
    pub fn open_i2c(bus: u8, address: u16) -> Result<NoBus> {
        Err(TelemetryError::hardware_error(format!(
            "I2C support not compiled in (requested bus {} address {:#04x})",
            bus, address
        )))
    }

    /// Barometer type used when hardware support is absent.
    pub type DefaultBarometer = Bmp3xx<NoBus>;
}

#[cfg(feature = "gpio")]
pub use raspberry_pi::{open_i2c, DefaultBarometer};

#[cfg(not(feature = "gpio"))]
pub use unsupported::{open_i2c, DefaultBarometer};

/// Open the default bus and initialize a barometer on it.
pub fn open_barometer(
    bus: u8,
    address: u16,
    sea_level_pressure_hpa: f64,
) -> Result<DefaultBarometer> {
    Bmp3xx::new(open_i2c(bus, address)?, sea_level_pressure_hpa)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// In-memory register file; forced conversions complete immediately.
    struct FakeBus {
        registers: [u8; 256],
        writes: Vec<(u8, u8)>,
    }

    impl FakeBus {
        fn new(chip_id: u8) -> Self {
            let mut registers = [0u8; 256];
            registers[REG_CHIP_ID as usize] = chip_id;
            registers[REG_STATUS as usize] = STATUS_DRDY_PRESS | STATUS_DRDY_TEMP;
            // Calibration block from a BMP388 breakout.
            let calibration: [u8; 21] = [
                0x98, 0x6B, 0x5B, 0x4A, 0xF9, 0x56, 0x09, 0x06, 0x00, 0x26, 0x03, 0x9B, 0x42, 0x24,
                0x76, 0x03, 0xFA, 0xC0, 0xF0, 0x10, 0xC4,
            ];
            registers[REG_CALIBRATION as usize..REG_CALIBRATION as usize + 21]
                .copy_from_slice(&calibration);
            Self {
                registers,
                writes: Vec::new(),
            }
        }

        fn set_raw(&mut self, pressure: u32, temperature: u32) {
            let p = pressure.to_le_bytes();
            let t = temperature.to_le_bytes();
            self.registers[REG_DATA as usize..REG_DATA as usize + 6]
                .copy_from_slice(&[p[0], p[1], p[2], t[0], t[1], t[2]]);
        }
    }

    impl RegisterBus for FakeBus {
        fn read_registers(&mut self, register: u8, buf: &mut [u8]) -> Result<()> {
            let start = register as usize;
            buf.copy_from_slice(&self.registers[start..start + buf.len()]);
            Ok(())
        }

        fn write_register(&mut self, register: u8, value: u8) -> Result<()> {
            self.writes.push((register, value));
            Ok(())
        }
    }

    #[test]
    fn test_rejects_unknown_chip() {
        let err = Bmp3xx::new(FakeBus::new(0x58), 1013.25).err().unwrap();
        assert!(matches!(err, TelemetryError::Hardware(_)));
    }

    #[test]
    fn test_init_resets_and_configures() {
        let sensor = Bmp3xx::new(FakeBus::new(CHIP_ID_BMP390), 1013.25).unwrap();
        assert_eq!(sensor.bus.writes[0], (REG_CMD, CMD_SOFT_RESET));
        assert!(sensor.bus.writes.contains(&(REG_OSR, OSR_DEFAULT)));
    }

    #[test]
    fn test_calibration_scaling() {
        let mut raw = [0u8; Calibration::LEN];
        raw[0] = 0x01; // t1 = 1 * 2^8
        raw[2] = 0x00;
        raw[3] = 0x40; // t2 = 0x4000 / 2^30
        raw[5] = 0x00;
        raw[6] = 0x40; // p1 = (0x4000 - 2^14) / 2^20 = 0
        let calibration = Calibration::from_bytes(&raw);
        assert_eq!(calibration.t1, 256.0);
        assert_eq!(calibration.t2, 16384.0 / 2f64.powi(30));
        assert_eq!(calibration.p1, 0.0);
    }

    #[test]
    fn test_reading_is_physically_plausible() {
        let mut bus = FakeBus::new(CHIP_ID_BMP388);
        bus.set_raw(6_700_000, 8_400_000);
        let mut sensor = Bmp3xx::new(bus, 1013.25).unwrap();

        let reading = sensor.read().unwrap();
        assert!(reading.temperature_c > -40.0 && reading.temperature_c < 85.0);
        assert!(reading.pressure_hpa > 300.0 && reading.pressure_hpa < 1250.0);
        assert!(sensor.bus.writes.contains(&(REG_PWR_CTRL, PWR_FORCED)));
    }

    #[test]
    fn test_conversion_timeout() {
        let mut bus = FakeBus::new(CHIP_ID_BMP388);
        bus.registers[REG_STATUS as usize] = STATUS_DRDY_TEMP;
        let mut sensor = Bmp3xx::new(bus, 1013.25).unwrap();
        assert!(matches!(sensor.read(), Err(TelemetryError::Hardware(_))));
    }

    #[test]
    fn test_pressure_altitude() {
        assert!(pressure_altitude(1013.25, 1013.25).abs() < 1e-9);
        // Standard atmosphere: roughly 5.5 km at 500 hPa.
        let altitude = pressure_altitude(500.0, 1013.25);
        assert!((altitude - 5574.0).abs() < 50.0, "altitude {}", altitude);
        assert!(pressure_altitude(1023.5, 1013.25) < 0.0);
    }

    #[cfg(not(feature = "gpio"))]
    #[test]
    fn test_barometer_unavailable_without_gpio() {
        assert!(open_barometer(1, BMP3XX_DEFAULT_ADDRESS, 1023.5).is_err());
    }
}
