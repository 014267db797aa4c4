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

//! Discovers the frequency of the time stamp counter on x86_64 machines
//! without trusting whatever the firmware claims it is.
//!
//! The frequency is taken, in order of preference, from:
//!   * CPUID leaf 0x15 (TSC/crystal ratio and crystal clock), with a table of
//!     known crystals for the parts that don't enumerate theirs;
//!   * a measurement of the TSC against the ACPI PM timer, which is found by
//!     poking at the chipset directly rather than by parsing the ACPI tables.
//!
//! All hardware access goes through [`hal::Platform`]; on bare metal use
//! [`hal::Base`]:
//!
//! ```ignore
//! // Safety: we're in stage0, running at CPL 0 with identity-mapped memory.
//! let mut detector = FrequencyDetector::new(unsafe { Base::new() });
//! let tsc_frequency = detector.cpu_frequency_hz(false);
//! ```

#![cfg_attr(not(test), no_std)]

pub mod calibration;
pub mod cpuid;
pub mod crystal;
mod detector;
pub mod hal;
pub mod pci;
pub mod pm_timer;
#[cfg(test)]
mod testing;

pub use calibration::CalibrationConfig;
pub use detector::{FrequencyDetector, FrequencyResult};
pub use pm_timer::{Provenance, TimerSource};
