//! Simulated soil probe for nodes without RS485 hardware.
//!
//! Reading layout (7 bytes, big-endian):
//!   [0..2]  volumetric moisture, per mille (0..=1000)
//!   [2..4]  temperature, centi-degrees Celsius, signed
//!   [4..6]  electrical conductivity, µS/cm
//!   [6]     battery, percent

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use agromesh_core::wire::DATA_LEN;
use agromesh_services::{SensorDriver, SensorError};

const MAX_MOISTURE: u16 = 1000;

pub struct SimulatedSensor {
    rng: StdRng,
    /// Probability that a read finds no probe on the bus.
    bus_fault_rate: f64,
}

impl SimulatedSensor {
    pub fn new(bus_fault_rate: f64) -> Self {
        Self {
            rng: StdRng::from_entropy(),
            bus_fault_rate: bus_fault_rate.clamp(0.0, 1.0),
        }
    }

    pub fn seeded(seed: u64, bus_fault_rate: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            bus_fault_rate: bus_fault_rate.clamp(0.0, 1.0),
        }
    }
}

impl SensorDriver for SimulatedSensor {
    fn read(&mut self) -> Result<[u8; DATA_LEN], SensorError> {
        if self.rng.gen_bool(self.bus_fault_rate) {
            return Err(SensorError::NoRs485Connection);
        }

        // The probe occasionally reports past saturation; that is a bad reading.
        let moisture: u16 = self.rng.gen_range(0..=MAX_MOISTURE + MAX_MOISTURE / 20);
        if moisture > MAX_MOISTURE {
            return Err(SensorError::OutOfBounds);
        }
        let temperature: i16 = self.rng.gen_range(-500..=4500);
        let conductivity: u16 = self.rng.gen_range(50..=3000);
        let battery: u8 = self.rng.gen_range(20..=100);

        let mut data = [0u8; DATA_LEN];
        data[0..2].copy_from_slice(&moisture.to_be_bytes());
        data[2..4].copy_from_slice(&temperature.to_be_bytes());
        data[4..6].copy_from_slice(&conductivity.to_be_bytes());
        data[6] = battery;
        Ok(data)
    }
}
