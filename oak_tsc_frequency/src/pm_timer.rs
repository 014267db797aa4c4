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

//! Locates the ACPI PM timer (PM1_TMR) without consulting the ACPI tables.
//!
//! On legacy Intel platforms PM1_TMR can be found in the ACPI I/O space:
//!  1. Prior to Skylake (Sunrisepoint PCH) the ACPI I/O space is configured
//!     in the LPC bridge (D31:F0).
//!  2. From Skylake till Kaby Lake it is configured in the PMC (D31:F2).
//!  3. From Coffee Lake onwards the same space is called the PMC I/O space and
//!     is addressed through BAR2 of the PMC. On B360 and friends the PMC may be
//!     missing entirely.
//!
//! On AMD platforms the FCH exposes the PM timer block address in its fixed
//! ACPI MMIO region.

use bitflags::bitflags;
use strum::{Display, IntoStaticStr};

use crate::{
    cpuid::CpuVendor,
    hal::Platform,
    pci::{PciAddress, PCI_VENDOR_ID_OFFSET},
};

/// Nominal frequency of the ACPI PM timer, in Hz.
pub const PM_TIMER_FREQUENCY_HZ: u32 = 3_579_545;

/// Offset of PM1_TMR within the ACPI (PMC) I/O space.
const ACPI_PM1_TMR_OFFSET: u32 = 0x08;

const INTEL_VENDOR_ID: u16 = 0x8086;

/// The LPC (ISA) bridge of Intel chipsets.
const ICH_LPC: PciAddress = PciAddress::fixed(0, 31, 0);
/// The power management controller of Intel chipsets.
const ICH_PMC: PciAddress = PciAddress::fixed(0, 31, 2);

/// Location of an ACPI I/O space base address and its enable bit.
struct AcpiBaseRegisters {
    base: u8,
    base_mask: u16,
    control: u8,
}

const ICH_LPC_ACPI: AcpiBaseRegisters =
    AcpiBaseRegisters { base: 0x40, base_mask: 0xFF80, control: 0x44 };
const ICH_PMC_ACPI: AcpiBaseRegisters =
    AcpiBaseRegisters { base: 0x40, base_mask: 0xFF80, control: 0x44 };

/// PMC BAR2, the PMC I/O space on Coffee Lake and later.
const ICH_PMC_BAR2_BASE: u8 = 0x20;
const ICH_PMC_BAR2_BASE_MASK: u16 = 0xFFFC;

/// AMD FCH ACPI MMIO region and the location of AcpiPmTmrBlk within it.
const AMD_ACPI_MMIO_BASE: u64 = 0xFED8_0000;
const AMD_ACPI_MMIO_PMIO_BASE: u64 = 0x300;
const AMD_ACPI_PM_TMR_BLOCK: u64 = 0x64;
const AMD_ACPI_PM_TMR_BLOCK_MASK: u32 = 0xFFFF;

bitflags! {
    /// ACPI_CNTL register of the LPC bridge and the PMC.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct AcpiControl: u8 {
        const ACPI_EN = 1 << 7;
    }
}

bitflags! {
    /// Low bits of PMC BAR2.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct PmcBar2: u16 {
        const BAR_EN = 1 << 0;
    }
}

/// Which probe found the PM timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum Provenance {
    #[strum(serialize = "LPC")]
    Lpc,
    #[strum(serialize = "PMC ACPI")]
    PmcAcpi,
    #[strum(serialize = "PMC BAR2")]
    PmcBar2,
    #[strum(serialize = "AMD")]
    AmdMmio,
    /// Intel chipset, but no PM timer exposed (Z390, B360 and similar).
    #[strum(serialize = "Unknown INTEL")]
    Unknown,
    #[strum(serialize = "Failure")]
    Failure,
}

/// Address of the PM timer and how we found it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSource {
    /// I/O port of PM1_TMR; 0 if not found.
    pub address: u32,
    pub provenance: Provenance,
}

impl TimerSource {
    pub fn found(&self) -> bool {
        self.address != 0
    }

    /// Diagnostic label of the probe that produced this source.
    pub fn label(&self) -> &'static str {
        self.provenance.into()
    }
}

/// Which of the Intel chipset devices answered their vendor ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IntelChipset {
    lpc: bool,
    /// Only probed if the LPC bridge is present.
    pmc: bool,
}

impl IntelChipset {
    fn probe<P: Platform + ?Sized>(platform: &P) -> Self {
        let lpc = intel_device_present(platform, ICH_LPC);
        let pmc = lpc && intel_device_present(platform, ICH_PMC);
        Self { lpc, pmc }
    }
}

/// The probes, in the order they are attempted.
fn strategies<P: Platform + ?Sized>() -> [fn(&P, IntelChipset) -> Option<TimerSource>; 4] {
    [intel_lpc::<P>, intel_pmc_acpi::<P>, intel_pmc_bar2::<P>, amd_mmio::<P>]
}

/// Finds the PM timer; never fails, but the address may be 0.
pub fn locate_timer<P: Platform + ?Sized>(platform: &P) -> TimerSource {
    let chipset = IntelChipset::probe(platform);
    let found = strategies::<P>().iter().find_map(|strategy| strategy(platform, chipset));
    if let Some(source) = found {
        log::debug!("PM timer at {:#x} ({})", source.address, source.provenance);
        return source;
    }

    let provenance = if chipset.lpc { Provenance::Unknown } else { Provenance::Failure };
    if chipset.pmc {
        log::debug!("Intel PMC at {} exposes neither ACPI I/O space nor BAR2", ICH_PMC);
    }
    log::debug!("PM timer not found ({})", provenance);
    TimerSource { address: 0, provenance }
}

fn intel_device_present<P: Platform + ?Sized>(platform: &P, device: PciAddress) -> bool {
    platform.read_pci_config_u16(device, PCI_VENDOR_ID_OFFSET) == INTEL_VENDOR_ID
}

/// Reads the ACPI I/O space base of `device` if the space is enabled.
fn acpi_io_space<P: Platform + ?Sized>(
    platform: &P,
    device: PciAddress,
    registers: &AcpiBaseRegisters,
) -> Option<u32> {
    let control =
        AcpiControl::from_bits_truncate(platform.read_pci_config_u8(device, registers.control));
    if !control.contains(AcpiControl::ACPI_EN) {
        return None;
    }
    Some(u32::from(platform.read_pci_config_u16(device, registers.base) & registers.base_mask))
}

fn intel_lpc<P: Platform + ?Sized>(platform: &P, chipset: IntelChipset) -> Option<TimerSource> {
    if !chipset.lpc {
        return None;
    }
    let base = acpi_io_space(platform, ICH_LPC, &ICH_LPC_ACPI)?;
    Some(TimerSource { address: base + ACPI_PM1_TMR_OFFSET, provenance: Provenance::Lpc })
}

fn intel_pmc_acpi<P: Platform + ?Sized>(
    platform: &P,
    chipset: IntelChipset,
) -> Option<TimerSource> {
    if !chipset.pmc {
        return None;
    }
    let base = acpi_io_space(platform, ICH_PMC, &ICH_PMC_ACPI)?;
    Some(TimerSource { address: base + ACPI_PM1_TMR_OFFSET, provenance: Provenance::PmcAcpi })
}

fn intel_pmc_bar2<P: Platform + ?Sized>(
    platform: &P,
    chipset: IntelChipset,
) -> Option<TimerSource> {
    if !chipset.pmc {
        return None;
    }
    let bar2 = platform.read_pci_config_u16(ICH_PMC, ICH_PMC_BAR2_BASE);
    if !PmcBar2::from_bits_truncate(bar2).contains(PmcBar2::BAR_EN) {
        return None;
    }
    let base = u32::from(bar2 & ICH_PMC_BAR2_BASE_MASK);
    Some(TimerSource { address: base + ACPI_PM1_TMR_OFFSET, provenance: Provenance::PmcBar2 })
}

fn amd_mmio<P: Platform + ?Sized>(platform: &P, _chipset: IntelChipset) -> Option<TimerSource> {
    if CpuVendor::read(platform) != Some(CpuVendor::Amd) {
        return None;
    }
    let register = AMD_ACPI_MMIO_BASE + AMD_ACPI_MMIO_PMIO_BASE + AMD_ACPI_PM_TMR_BLOCK;
    // AcpiPmTmrBlk is the low word; PMx66 (AcpiCpuCntBlk) sits above it.
    let address = platform.read_mmio_u32(register) & AMD_ACPI_PM_TMR_BLOCK_MASK;
    if address == 0 || address == AMD_ACPI_PM_TMR_BLOCK_MASK {
        return None;
    }
    Some(TimerSource { address, provenance: Provenance::AmdMmio })
}
