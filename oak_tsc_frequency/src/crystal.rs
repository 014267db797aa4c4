//
// Copyright 2025 The Project Oak Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Determines the core crystal clock frequency and, from it, the nominal CPU
//! (TSC) frequency.
//!
//! CPUID leaf 0x15 gives the ratio between the TSC and the crystal clock, but
//! many parts leave the crystal frequency itself out. For those we fall back to
//! a table of known crystals, then to measuring the TSC, and finally to the
//! most common crystal frequency.

use strum::{Display, IntoStaticStr};

use crate::{
    calibration::TimerCalibrator,
    cpuid::{
        processor_base_frequency_hz, tsc_adjust, CpuIdentity, TscLeaf, CPUID_PROCESSOR_FREQUENCY,
        CPUID_TIME_STAMP_COUNTER,
    },
    hal::Platform,
};

/// Crystal frequency assumed when nothing else tells us.
pub const DEFAULT_CRYSTAL_FREQUENCY_HZ: u64 = 24_000_000;

/// Crystal clock frequencies of CPU models that don't enumerate it in CPUID
/// leaf 0x15, keyed by display model.
static CRYSTAL_FREQUENCY_BY_MODEL: &[(u8, u64)] = &[
    // Skylake mobile.
    (0x4E, 24_000_000),
    // Skylake desktop.
    (0x5E, 24_000_000),
    // Kaby Lake mobile.
    (0x8E, 24_000_000),
    // Kaby Lake desktop.
    (0x9E, 24_000_000),
    // Atom Denverton.
    (0x5F, 25_000_000),
    // Atom Goldmont.
    (0x5C, 19_200_000),
];

/// How the crystal clock frequency was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum Confidence {
    /// Enumerated by CPUID leaf 0x15.
    Queried,
    ModelTable,
    /// Measured TSC frequency scaled by the TSC/crystal ratio.
    DerivedFromTsc,
    DefaultAssumed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrystalClockFact {
    pub frequency_hz: u64,
    pub confidence: Confidence,
}

/// Looks up the crystal frequency of a CPU model.
pub fn model_crystal_frequency_hz(model: u8) -> Option<u64> {
    CRYSTAL_FREQUENCY_BY_MODEL
        .iter()
        .find_map(|&(known, frequency)| (known == model).then_some(frequency))
}

/// Computes `value * numerator / denominator`; 0 if the denominator is 0 or
/// the result doesn't fit.
fn scale(value: u64, numerator: u32, denominator: u32) -> u64 {
    if denominator == 0 {
        return 0;
    }
    let scaled = u128::from(value) * u128::from(numerator) / u128::from(denominator);
    u64::try_from(scaled).unwrap_or(0)
}

/// Resolves and caches the (crystal, CPU) frequency pair.
#[derive(Debug, Clone, Default)]
pub struct CrystalResolver {
    cached: Option<(u64, u64)>,
    crystal: Option<CrystalClockFact>,
}

impl CrystalResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// The crystal clock found by the last resolution; `None` before the first
    /// resolution and on CPUs without leaf 0x15.
    pub fn crystal_clock(&self) -> Option<CrystalClockFact> {
        self.crystal
    }

    /// Returns `(crystal_hz, cpu_hz)`; (0, 0) on CPUs other than Intel or
    /// without CPUID leaf 0x15.
    ///
    /// `calibrator` is only used when neither CPUID nor the model table know
    /// the crystal; `force` is passed on to it.
    pub fn resolve<P: Platform + ?Sized>(
        &mut self,
        platform: &P,
        calibrator: &mut TimerCalibrator,
        force: bool,
    ) -> (u64, u64) {
        match self.cached {
            Some(frequencies) if !force => frequencies,
            _ => {
                let frequencies = self.resolve_uncached(platform, calibrator, force);
                *self.cached.insert(frequencies)
            }
        }
    }

    fn resolve_uncached<P: Platform + ?Sized>(
        &mut self,
        platform: &P,
        calibrator: &mut TimerCalibrator,
        force: bool,
    ) -> (u64, u64) {
        self.crystal = None;
        let identity = CpuIdentity::read(platform);
        if !identity.is_intel() || !identity.supports(CPUID_TIME_STAMP_COUNTER) {
            log::debug!(
                "no TSC leaf (vendor: {:?}, max leaf: {:#x})",
                identity.vendor,
                identity.max_leaf
            );
            return (0, 0);
        }

        if let Some(adjust) = tsc_adjust(platform, &identity) {
            log::debug!("IA32_TSC_ADJUST: {:#x}", adjust);
        }

        let leaf = TscLeaf::read(platform);
        let mut cpu_hz = 0;
        let fact = if leaf.crystal_hz != 0 {
            Some(CrystalClockFact {
                frequency_hz: u64::from(leaf.crystal_hz),
                confidence: Confidence::Queried,
            })
        } else if let Some(frequency_hz) = model_crystal_frequency_hz(identity.model) {
            Some(CrystalClockFact { frequency_hz, confidence: Confidence::ModelTable })
        } else if leaf.has_ratio() && identity.supports(CPUID_PROCESSOR_FREQUENCY) {
            let tsc_hz = calibrator.calibrate(platform, force);
            let frequency_hz = scale(tsc_hz, leaf.denominator, leaf.numerator);
            if frequency_hz != 0 {
                cpu_hz = processor_base_frequency_hz(platform);
                Some(CrystalClockFact { frequency_hz, confidence: Confidence::DerivedFromTsc })
            } else {
                None
            }
        } else {
            None
        };
        let fact = fact.unwrap_or(CrystalClockFact {
            frequency_hz: DEFAULT_CRYSTAL_FREQUENCY_HZ,
            confidence: Confidence::DefaultAssumed,
        });
        debug_assert!(fact.frequency_hz != 0, "crystal clock must be known at this point");

        if cpu_hz == 0 {
            cpu_hz = scale(fact.frequency_hz, leaf.numerator, leaf.denominator);
        }
        log::info!(
            "crystal clock {} Hz ({}), TSC ratio {}/{}, CPU frequency {} Hz (model {:#x})",
            fact.frequency_hz,
            fact.confidence,
            leaf.numerator,
            leaf.denominator,
            cpu_hz,
            identity.model
        );
        self.crystal = Some(fact);
        (fact.frequency_hz, cpu_hz)
    }
}
