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

//! Measures the TSC frequency against the ACPI PM timer.

use crate::{
    hal::{ExclusiveTiming, Platform},
    pm_timer::{locate_timer, PM_TIMER_FREQUENCY_HZ},
};

/// Largest backwards step of the timer that is still explained by a 24-bit
/// counter rolling over.
const PM_TIMER_24BIT_MASK: u32 = 0x00FF_FFFF;

/// Tunables of the measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationConfig {
    /// The measurement window is 1/`timer_resolution` of a second.
    pub timer_resolution: u32,
    /// How long to wait between the two reads that check the timer is running.
    pub liveness_stall_us: u32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self { timer_resolution: 10, liveness_stall_us: 500 }
    }
}

impl CalibrationConfig {
    /// Number of PM timer ticks in one measurement window.
    pub fn target_ticks(&self) -> u32 {
        debug_assert!(self.timer_resolution != 0, "timer resolution must not be zero");
        (PM_TIMER_FREQUENCY_HZ / self.timer_resolution.max(1)).max(1)
    }
}

/// Number of ticks between two PM timer samples.
///
/// The timer is either 24 or 32 bits wide and we don't know which, so a
/// backwards step is attributed to whichever width explains it: a 24-bit
/// counter can't go back by more than 0xFF_FFFF.
///
/// Wraps count the full modular distance, one tick more per wrap than the
/// `(0xFF_FFFF - start) + end` formula found in some firmware.
pub fn tick_delta(start: u32, end: u32) -> u32 {
    if end >= start {
        end - start
    } else if start - end <= PM_TIMER_24BIT_MASK {
        end.wrapping_sub(start) & PM_TIMER_24BIT_MASK
    } else {
        end.wrapping_sub(start)
    }
}

fn io_port(address: u32) -> Result<u16, &'static str> {
    u16::try_from(address).map_err(|_| "PM timer address is not an I/O port")
}

/// Measures the TSC frequency and remembers the result, including a result of
/// 0, until asked to measure again.
#[derive(Debug, Clone, Default)]
pub struct TimerCalibrator {
    config: CalibrationConfig,
    cached: Option<u64>,
}

impl TimerCalibrator {
    pub fn new(config: CalibrationConfig) -> Self {
        Self { config, cached: None }
    }

    /// The last measurement, if there was one.
    pub fn cached(&self) -> Option<u64> {
        self.cached
    }

    /// Returns the TSC frequency in Hz, or 0 if it can't be measured.
    ///
    /// Interrupts are masked for the duration of the measurement window.
    pub fn calibrate<P: Platform + ?Sized>(&mut self, platform: &P, force: bool) -> u64 {
        match self.cached {
            Some(frequency) if !force => frequency,
            _ => {
                let frequency = self.measure(platform);
                *self.cached.insert(frequency)
            }
        }
    }

    fn measure<P: Platform + ?Sized>(&self, platform: &P) -> u64 {
        let source = locate_timer(platform);
        if !source.found() {
            return 0;
        }
        let port = match io_port(source.address) {
            Ok(port) => port,
            Err(err) => {
                log::warn!("{} ({:#x}, {})", err, source.address, source.provenance);
                return 0;
            }
        };

        let first = platform.read_io_port_u32(port);
        platform.stall(self.config.liveness_stall_us);
        if platform.read_io_port_u32(port) == first {
            log::warn!("PM timer at {:#x} ({}) is not running", port, source.provenance);
            return 0;
        }

        let target_ticks = self.config.target_ticks();
        let guard = ExclusiveTiming::enter(platform);
        let start_ticks = platform.read_io_port_u32(port);
        let start_tsc = platform.read_tsc();
        let ticks = loop {
            let ticks = tick_delta(start_ticks, platform.read_io_port_u32(port));
            if ticks >= target_ticks {
                break ticks;
            }
            platform.pause();
        };
        let end_tsc = platform.read_tsc();
        drop(guard);

        let tsc_delta = end_tsc.wrapping_sub(start_tsc);
        let frequency =
            u128::from(tsc_delta) * u128::from(PM_TIMER_FREQUENCY_HZ) / u128::from(ticks);
        let frequency = u64::try_from(frequency).unwrap_or(0);
        log::debug!(
            "TSC frequency {} Hz ({} TSC ticks over {} PM timer ticks)",
            frequency,
            tsc_delta,
            ticks
        );
        frequency
    }
}
