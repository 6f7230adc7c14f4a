//! ---
//! meter_section: "11-simulation-test-harness"
//! meter_subsection: "module"
//! meter_type: "source"
//! meter_scope: "code"
//! meter_description: "Synthetic reading generation and the ingestion driver."
//! meter_version: "v0.1.0"
//! meter_owner: "tbd"
//! ---
use gridmeter_core::model::{round2, round3};
use gridmeter_core::{Reading, ReadingInput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const VOLTAGE_RANGE: std::ops::Range<f64> = 220.0..228.0;
const CURRENT_RANGE: std::ops::Range<f64> = 0.2..2.7;
const POWER_FACTOR_RANGE: std::ops::Range<f64> = 0.85..1.0;

/// Synthesizes plausible household telemetry.
///
/// Voltage is drawn near the nominal 230 V mains level, current spans
/// small-appliance loads, and power is the product of both scaled by a power
/// factor below unity. Seeded, so a fixed seed replays the same sequence.
pub struct ReadingGenerator {
    rng: StdRng,
}

impl ReadingGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Draw one fully synthetic reading.
    pub fn synthesize(&mut self) -> Reading {
        self.complete(ReadingInput::default())
    }

    /// Fill in whichever fields of `input` are absent; supplied fields pass
    /// through untouched. A missing power is derived from the voltage and
    /// current actually used, not drawn independently.
    pub fn complete(&mut self, input: ReadingInput) -> Reading {
        let voltage = input
            .voltage
            .unwrap_or_else(|| round2(self.rng.gen_range(VOLTAGE_RANGE)));
        let current = input
            .current
            .unwrap_or_else(|| round3(self.rng.gen_range(CURRENT_RANGE)));
        let power = input
            .power
            .unwrap_or_else(|| round2(voltage * current * self.rng.gen_range(POWER_FACTOR_RANGE)));
        Reading {
            voltage,
            current,
            power,
        }
    }
}

impl std::fmt::Debug for ReadingGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadingGenerator").finish_non_exhaustive()
    }
}
