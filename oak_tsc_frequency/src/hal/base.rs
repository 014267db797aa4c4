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

use core::arch::x86_64::{__cpuid, _rdtsc};

use x86_64::{
    instructions::interrupts,
    registers::model_specific::Msr,
    structures::port::{PortRead, PortWrite},
};

use super::{CpuidResult, Platform};
use crate::pci::{
    dword_field, PciAddress, PCI_PORT_CONFIGURATION_SPACE_ADDRESS,
    PCI_PORT_CONFIGURATION_SPACE_DATA,
};

/// Writes to the POST code port take roughly a microsecond on every chipset
/// we care about; this is the same trick Linux uses for `io_delay`.
const IO_DELAY_PORT: u16 = 0x80;

/// Direct hardware access on bare-metal x86_64.
pub struct Base {
    _private: (),
}

impl Base {
    /// Creates the bare-metal platform.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that we run at CPL 0, that physical memory is
    /// identity mapped (which it is throughout stage0), and that nobody else
    /// uses the PCI configuration ports (0xCF8, 0xCFC) concurrently.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }

    fn read_pci_config_dword(&self, address: PciAddress, offset: u8) -> u32 {
        // Safety: PCI_PORT_CONFIGURATION_SPACE_ADDRESS is a well-known port and should
        // be safe to write to even if we don't have a PCI bus; it is ours
        // exclusively per the contract of `new()`.
        unsafe {
            u32::write_to_port(PCI_PORT_CONFIGURATION_SPACE_ADDRESS, address.cam_address(offset))
        };
        // Safety: PCI_PORT_CONFIGURATION_SPACE_DATA is a well-known port and should
        // be safe to read from even if we don't have a PCI bus (it'll return
        // 0xFFFFFFFF)
        unsafe { u32::read_from_port(PCI_PORT_CONFIGURATION_SPACE_DATA) }
    }
}

impl Platform for Base {
    fn read_pci_config_u8(&self, address: PciAddress, offset: u8) -> u8 {
        dword_field(self.read_pci_config_dword(address, offset), offset) as u8
    }

    fn read_pci_config_u16(&self, address: PciAddress, offset: u8) -> u16 {
        dword_field(self.read_pci_config_dword(address, offset), offset) as u16
    }

    fn read_io_port_u32(&self, port: u16) -> u32 {
        // Safety: the only ports we read are the PM timer, whose address came out
        // of the chipset's own configuration; reading it has no side effects.
        unsafe { u32::read_from_port(port) }
    }

    fn read_mmio_u32(&self, address: u64) -> u32 {
        // Safety: we use an identity mapping throughout, and the addresses we read
        // are fixed chipset registers.
        unsafe { (address as *const u32).read_volatile() }
    }

    fn cpuid(&self, leaf: u32) -> CpuidResult {
        // Safety: all CPUs we care about are modern enough to support CPUID.
        let result = unsafe { __cpuid(leaf) };
        CpuidResult { eax: result.eax, ebx: result.ebx, ecx: result.ecx, edx: result.edx }
    }

    fn read_msr(&self, msr: u32) -> u64 {
        // Safety: callers check the CPUID feature bit of the MSR before reading it.
        unsafe { Msr::new(msr).read() }
    }

    fn read_tsc(&self) -> u64 {
        // Safety: RDTSC is available on all x86_64 processors and has no side effects.
        unsafe { _rdtsc() }
    }

    fn disable_interrupts(&self) -> bool {
        let enabled = interrupts::are_enabled();
        if enabled {
            interrupts::disable();
        }
        enabled
    }

    fn restore_interrupts(&self, were_enabled: bool) {
        if were_enabled {
            interrupts::enable();
        }
    }

    fn stall(&self, microseconds: u32) {
        for _ in 0..microseconds {
            // Safety: port 0x80 is the POST diagnostics port, writes to it are
            // discarded.
            unsafe { u8::write_to_port(IO_DELAY_PORT, 0) };
        }
    }

    fn pause(&self) {
        core::hint::spin_loop();
    }
}
