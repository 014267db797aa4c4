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

//! A scripted platform that counts every hardware access.
//!
//! The mock generated for [`Platform`] is a better fit when a test cares about
//! individual register reads; this fake is for the tests that run a whole
//! measurement and need a timer that actually moves.

use std::{cell::Cell, collections::BTreeMap};

use crate::{
    cpuid::{CpuVendor, CPUID_SIGNATURE, CPUID_VERSION_INFO},
    hal::{CpuidResult, Platform},
    pci::PciAddress,
};

const LPC: PciAddress = PciAddress::fixed(0, 31, 0);
const AMD_PM_TMR_BLOCK: u64 = 0xFED8_0364;

/// Where the fake chipset exposes the PM timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeChipset {
    None,
    IntelLpc,
    AmdFch,
}

/// A PM timer that advances by a fixed amount on every read, with the TSC
/// advancing in lockstep.
#[derive(Debug, Clone, Copy)]
pub struct FakeTimer {
    pub port: u16,
    pub start: u32,
    /// 0x00FF_FFFF for a 24-bit timer, u32::MAX for a 32-bit one.
    pub mask: u32,
    pub ticks_per_read: u64,
    pub tsc_per_tick: u64,
}

impl FakeTimer {
    pub fn running(start: u32, mask: u32, tsc_per_tick: u64) -> Self {
        Self { port: 0x408, start, mask, ticks_per_read: 1000, tsc_per_tick }
    }

    pub fn stuck(value: u32) -> Self {
        Self { port: 0x408, start: value, mask: u32::MAX, ticks_per_read: 0, tsc_per_tick: 1 }
    }
}

#[derive(Default)]
pub struct Counters {
    pub pci_reads: Cell<usize>,
    pub timer_reads: Cell<usize>,
    pub mmio_reads: Cell<usize>,
    pub cpuid_calls: Cell<usize>,
    pub msr_reads: Cell<usize>,
    pub tsc_reads: Cell<usize>,
    pub interrupt_disables: Cell<usize>,
    pub stalls: Cell<usize>,
}

impl Counters {
    /// Total number of accesses that would touch hardware.
    pub fn total(&self) -> usize {
        self.pci_reads.get()
            + self.timer_reads.get()
            + self.mmio_reads.get()
            + self.cpuid_calls.get()
            + self.msr_reads.get()
            + self.tsc_reads.get()
            + self.interrupt_disables.get()
            + self.stalls.get()
    }
}

fn bump(counter: &Cell<usize>) {
    counter.set(counter.get() + 1);
}

pub struct FakePlatform {
    leaves: BTreeMap<u32, CpuidResult>,
    msrs: BTreeMap<u32, u64>,
    chipset: FakeChipset,
    timer: Option<FakeTimer>,
    elapsed_ticks: Cell<u64>,
    interrupts_enabled: Cell<bool>,
    pub counters: Counters,
}

impl FakePlatform {
    /// A CPU of the given vendor without any PM timer.
    pub fn new(vendor: u32, max_leaf: u32) -> Self {
        let mut leaves = BTreeMap::new();
        leaves.insert(
            CPUID_SIGNATURE,
            CpuidResult { eax: max_leaf, ebx: vendor, ..Default::default() },
        );
        Self {
            leaves,
            msrs: BTreeMap::new(),
            chipset: FakeChipset::None,
            timer: None,
            elapsed_ticks: Cell::new(0),
            interrupts_enabled: Cell::new(true),
            counters: Counters::default(),
        }
    }

    /// An Intel CPU with the given CPUID.01H:EAX signature.
    pub fn intel(max_leaf: u32, version_eax: u32) -> Self {
        Self::new(CpuVendor::Intel as u32, max_leaf)
            .with_leaf(CPUID_VERSION_INFO, CpuidResult { eax: version_eax, ..Default::default() })
    }

    pub fn with_leaf(mut self, leaf: u32, result: CpuidResult) -> Self {
        self.leaves.insert(leaf, result);
        self
    }

    pub fn with_msr(mut self, msr: u32, value: u64) -> Self {
        self.msrs.insert(msr, value);
        self
    }

    pub fn with_pm_timer(mut self, chipset: FakeChipset, timer: FakeTimer) -> Self {
        self.chipset = chipset;
        self.timer = Some(timer);
        self
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.interrupts_enabled.get()
    }

    fn timer_port(&self) -> u16 {
        self.timer.map_or(0, |timer| timer.port)
    }
}

impl Platform for FakePlatform {
    fn read_pci_config_u8(&self, address: PciAddress, offset: u8) -> u8 {
        bump(&self.counters.pci_reads);
        match (self.chipset, address == LPC, offset) {
            (FakeChipset::IntelLpc, true, 0x44) => 0x80,
            _ => 0xFF,
        }
    }

    fn read_pci_config_u16(&self, address: PciAddress, offset: u8) -> u16 {
        bump(&self.counters.pci_reads);
        match (self.chipset, address == LPC, offset) {
            (FakeChipset::IntelLpc, true, 0x00) => 0x8086,
            // Bit 0 of ACPI_BASE is hardwired to 1 (I/O space indicator).
            (FakeChipset::IntelLpc, true, 0x40) => (self.timer_port() - 8) | 1,
            _ => 0xFFFF,
        }
    }

    fn read_io_port_u32(&self, port: u16) -> u32 {
        bump(&self.counters.timer_reads);
        match self.timer {
            Some(timer) if timer.port == port => {
                let elapsed = self.elapsed_ticks.get();
                self.elapsed_ticks.set(elapsed + timer.ticks_per_read);
                (u64::from(timer.start) + elapsed) as u32 & timer.mask
            }
            _ => 0xFFFF_FFFF,
        }
    }

    fn read_mmio_u32(&self, address: u64) -> u32 {
        bump(&self.counters.mmio_reads);
        match (self.chipset, address) {
            // The upper word is PMx66, the ACPI CPU control block.
            (FakeChipset::AmdFch, AMD_PM_TMR_BLOCK) => 0x0410_0000 | u32::from(self.timer_port()),
            _ => 0xFFFF_FFFF,
        }
    }

    fn cpuid(&self, leaf: u32) -> CpuidResult {
        bump(&self.counters.cpuid_calls);
        self.leaves.get(&leaf).copied().unwrap_or_default()
    }

    fn read_msr(&self, msr: u32) -> u64 {
        bump(&self.counters.msr_reads);
        self.msrs.get(&msr).copied().unwrap_or_default()
    }

    fn read_tsc(&self) -> u64 {
        bump(&self.counters.tsc_reads);
        let tsc_per_tick = self.timer.map_or(1, |timer| timer.tsc_per_tick);
        0x1_0000 + self.elapsed_ticks.get() * tsc_per_tick
    }

    fn disable_interrupts(&self) -> bool {
        bump(&self.counters.interrupt_disables);
        self.interrupts_enabled.replace(false)
    }

    fn restore_interrupts(&self, were_enabled: bool) {
        if were_enabled {
            self.interrupts_enabled.set(true);
        }
    }

    fn stall(&self, _microseconds: u32) {
        bump(&self.counters.stalls);
    }

    fn pause(&self) {}
}
