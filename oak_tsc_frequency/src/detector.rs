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

use crate::{
    calibration::{CalibrationConfig, TimerCalibrator},
    crystal::{CrystalClockFact, CrystalResolver},
    hal::Platform,
    pm_timer::{locate_timer, TimerSource},
};

/// Outcome of a frequency detection; 0 means unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrequencyResult {
    pub cpu_frequency_hz: u64,
    pub crystal_frequency_hz: u64,
}

/// Detects the TSC frequency of the current machine and remembers it.
///
/// Every source of the frequency is consulted at most once; subsequent calls
/// are answered from the cache unless `force` is set.
pub struct FrequencyDetector<P: Platform> {
    platform: P,
    calibrator: TimerCalibrator,
    resolver: CrystalResolver,
    result: Option<FrequencyResult>,
}

impl<P: Platform> FrequencyDetector<P> {
    pub fn new(platform: P) -> Self {
        Self::with_config(platform, CalibrationConfig::default())
    }

    pub fn with_config(platform: P, config: CalibrationConfig) -> Self {
        Self {
            platform,
            calibrator: TimerCalibrator::new(config),
            resolver: CrystalResolver::new(),
            result: None,
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Locates the ACPI PM timer. Not cached.
    pub fn discover_timer_address(&self) -> TimerSource {
        locate_timer(&self.platform)
    }

    /// TSC frequency measured against the PM timer, in Hz.
    pub fn timer_derived_frequency_hz(&mut self, force: bool) -> u64 {
        self.calibrator.calibrate(&self.platform, force)
    }

    /// Crystal clock and nominal CPU frequency from CPUID, in Hz.
    pub fn crystal_and_cpu_frequency(&mut self, force: bool) -> (u64, u64) {
        self.resolver.resolve(&self.platform, &mut self.calibrator, force)
    }

    /// How the crystal clock frequency was determined, if it was.
    pub fn crystal_clock(&self) -> Option<CrystalClockFact> {
        self.resolver.crystal_clock()
    }

    /// The TSC frequency in Hz, or 0 if it can't be determined.
    ///
    /// CPUID is preferred; if it doesn't yield a CPU frequency the TSC is
    /// measured against the PM timer.
    pub fn cpu_frequency_hz(&mut self, force: bool) -> u64 {
        if let Some(result) = self.result.filter(|_| !force) {
            return result.cpu_frequency_hz;
        }

        let (crystal_frequency_hz, cpu_frequency_hz) = self.crystal_and_cpu_frequency(force);
        let cpu_frequency_hz = if cpu_frequency_hz != 0 {
            cpu_frequency_hz
        } else {
            self.timer_derived_frequency_hz(force)
        };
        if cpu_frequency_hz == 0 {
            log::warn!("unable to determine the TSC frequency");
        } else {
            log::info!("TSC frequency: {} Hz", cpu_frequency_hz);
        }
        self.result = Some(FrequencyResult { cpu_frequency_hz, crystal_frequency_hz });
        cpu_frequency_hz
    }

    /// The last detection result, without touching the hardware.
    pub fn frequency_result(&self) -> Option<FrequencyResult> {
        self.result
    }
}
