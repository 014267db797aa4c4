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

//! CPUID leaves and MSRs consulted while looking for the TSC frequency.
//!
//! See the Intel SDM, Vol. 2A, "CPUID - CPU Identification", for the layout of
//! the individual leaves.

use strum::{Display, FromRepr};

use crate::hal::{CpuidResult, Platform};

/// Highest standard leaf and vendor identification string.
pub const CPUID_SIGNATURE: u32 = 0x0;
/// Family, model and stepping.
pub const CPUID_VERSION_INFO: u32 = 0x1;
/// Structured extended feature flags (sub-leaf 0).
pub const CPUID_EXTENDED_FEATURES: u32 = 0x7;
/// TSC to core crystal clock ratio and the crystal clock frequency.
pub const CPUID_TIME_STAMP_COUNTER: u32 = 0x15;
/// Processor base, maximum and bus frequencies in MHz.
pub const CPUID_PROCESSOR_FREQUENCY: u32 = 0x16;

/// IA32_TSC_ADJUST.
pub const MSR_IA32_TSC_ADJUST: u32 = 0x3B;

/// CPUID.(EAX=07H, ECX=0):EBX[1], IA32_TSC_ADJUST is supported.
const EXTENDED_FEATURES_EBX_TSC_ADJUST: u32 = 1 << 1;

/// CPU vendors we know how to deal with, keyed by the first four characters
/// of the vendor string as returned in EBX of leaf 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, Display)]
#[repr(u32)]
pub enum CpuVendor {
    /// "GenuineIntel"
    #[strum(serialize = "Intel")]
    Intel = 0x756E_6547,
    /// "AuthenticAMD"
    #[strum(serialize = "AMD")]
    Amd = 0x6874_7541,
}

impl CpuVendor {
    /// Reads the vendor of the current CPU; `None` if it's not one we know.
    pub fn read<P: Platform + ?Sized>(platform: &P) -> Option<Self> {
        Self::from_repr(platform.cpuid(CPUID_SIGNATURE).ebx)
    }
}

/// Identification data of the current CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuIdentity {
    pub vendor: Option<CpuVendor>,
    /// Highest supported standard CPUID leaf.
    pub max_leaf: u32,
    /// Display model, i.e. including the extended model bits.
    pub model: u8,
}

impl CpuIdentity {
    pub fn read<P: Platform + ?Sized>(platform: &P) -> Self {
        let signature = platform.cpuid(CPUID_SIGNATURE);
        let max_leaf = signature.eax;
        let model = if max_leaf >= CPUID_VERSION_INFO {
            display_model(platform.cpuid(CPUID_VERSION_INFO).eax)
        } else {
            0
        };
        Self { vendor: CpuVendor::from_repr(signature.ebx), max_leaf, model }
    }

    #[inline]
    pub fn supports(&self, leaf: u32) -> bool {
        self.max_leaf >= leaf
    }

    pub fn is_intel(&self) -> bool {
        self.vendor == Some(CpuVendor::Intel)
    }
}

/// Combines the model and extended model fields of CPUID.01H:EAX.
fn display_model(version_eax: u32) -> u8 {
    let model = (version_eax >> 4) & 0xF;
    let extended_model = (version_eax >> 16) & 0xF;
    (model | (extended_model << 4)) as u8
}

/// Contents of CPUID leaf 0x15.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TscLeaf {
    /// EAX: denominator of the TSC/crystal clock ratio.
    pub denominator: u32,
    /// EBX: numerator of the TSC/crystal clock ratio.
    pub numerator: u32,
    /// ECX: nominal crystal clock frequency in Hz, 0 if not enumerated.
    pub crystal_hz: u32,
}

impl TscLeaf {
    pub fn read<P: Platform + ?Sized>(platform: &P) -> Self {
        Self::from(platform.cpuid(CPUID_TIME_STAMP_COUNTER))
    }

    /// Whether both halves of the TSC/crystal ratio are enumerated.
    pub fn has_ratio(&self) -> bool {
        self.denominator != 0 && self.numerator != 0
    }
}

impl From<CpuidResult> for TscLeaf {
    fn from(value: CpuidResult) -> Self {
        Self { denominator: value.eax, numerator: value.ebx, crystal_hz: value.ecx }
    }
}

/// Reads the processor base frequency (CPUID.16H:EAX[15:0], in MHz) as Hz.
pub fn processor_base_frequency_hz<P: Platform + ?Sized>(platform: &P) -> u64 {
    let eax = platform.cpuid(CPUID_PROCESSOR_FREQUENCY).eax;
    u64::from(eax & 0xFFFF) * 1_000_000
}

/// Reads IA32_TSC_ADJUST if the CPU has it.
pub fn tsc_adjust<P: Platform + ?Sized>(platform: &P, identity: &CpuIdentity) -> Option<u64> {
    if !identity.supports(CPUID_EXTENDED_FEATURES) {
        return None;
    }
    let features = platform.cpuid(CPUID_EXTENDED_FEATURES);
    if features.ebx & EXTENDED_FEATURES_EBX_TSC_ADJUST == 0 {
        return None;
    }
    Some(platform.read_msr(MSR_IA32_TSC_ADJUST))
}
