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

#[cfg(target_arch = "x86_64")]
mod base;

#[cfg(target_arch = "x86_64")]
pub use base::Base;

use crate::pci::PciAddress;

/// Register values returned by a CPUID invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuidResult {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

/// Hardware access needed to discover the TSC frequency.
///
/// All methods take `&self`: none of the accesses change the state that the
/// frequency detection depends on, and the exclusive timing guard needs to
/// hold on to the platform while the measurement keeps reading from it.
#[cfg_attr(test, mockall::automock)]
pub trait Platform {
    /// Reads a byte from the PCI configuration space of `address`.
    fn read_pci_config_u8(&self, address: PciAddress, offset: u8) -> u8;

    /// Reads a word from the PCI configuration space of `address`.
    ///
    /// `offset` must be 2-byte aligned.
    fn read_pci_config_u16(&self, address: PciAddress, offset: u8) -> u16;

    fn read_io_port_u32(&self, port: u16) -> u32;

    /// Reads an u32 from a physical MMIO address.
    fn read_mmio_u32(&self, address: u64) -> u32;

    /// Performs CPUID with sub-leaf 0.
    fn cpuid(&self, leaf: u32) -> CpuidResult;

    fn read_msr(&self, msr: u32) -> u64;

    /// Reads the time stamp counter.
    fn read_tsc(&self) -> u64;

    /// Masks interrupts on the current CPU, returning whether they were
    /// enabled before.
    ///
    /// Prefer [`ExclusiveTiming`] over calling this directly.
    fn disable_interrupts(&self) -> bool;

    /// Undoes [`Platform::disable_interrupts`].
    fn restore_interrupts(&self, were_enabled: bool);

    /// Busy-waits for at least `microseconds`.
    fn stall(&self, microseconds: u32);

    /// Spin-loop hint.
    fn pause(&self);
}

/// Keeps interrupts masked on the current CPU for as long as it is alive.
///
/// The previous interrupt state is restored on drop, so every exit path out of
/// a measurement (including unwinding) leaves the CPU as it was found.
pub struct ExclusiveTiming<'a, P: Platform + ?Sized> {
    platform: &'a P,
    interrupts_were_enabled: bool,
}

impl<'a, P: Platform + ?Sized> ExclusiveTiming<'a, P> {
    pub fn enter(platform: &'a P) -> Self {
        let interrupts_were_enabled = platform.disable_interrupts();
        Self { platform, interrupts_were_enabled }
    }
}

impl<P: Platform + ?Sized> Drop for ExclusiveTiming<'_, P> {
    fn drop(&mut self) {
        self.platform.restore_interrupts(self.interrupts_were_enabled);
    }
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;
    use mockall::{predicate, Sequence};

    use super::*;

    #[googletest::test]
    fn test_exclusive_timing_restores_previous_state() {
        let mut platform = MockPlatform::new();
        let mut seq = Sequence::new();
        platform.expect_disable_interrupts().times(1).in_sequence(&mut seq).return_const(true);
        platform
            .expect_read_tsc()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(42u64);
        platform
            .expect_restore_interrupts()
            .with(predicate::eq(true))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());

        let tsc = {
            let _guard = ExclusiveTiming::enter(&platform);
            platform.read_tsc()
        };

        assert_that!(tsc, eq(42));
    }

    #[googletest::test]
    fn test_exclusive_timing_keeps_interrupts_masked_if_they_were() {
        let mut platform = MockPlatform::new();
        platform.expect_disable_interrupts().times(1).return_const(false);
        platform
            .expect_restore_interrupts()
            .with(predicate::eq(false))
            .times(1)
            .return_const(());

        drop(ExclusiveTiming::enter(&platform));
    }

    #[googletest::test]
    fn test_exclusive_timing_released_on_unwind() {
        let mut platform = MockPlatform::new();
        platform.expect_disable_interrupts().times(1).return_const(true);
        platform
            .expect_restore_interrupts()
            .with(predicate::eq(true))
            .times(1)
            .return_const(());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = ExclusiveTiming::enter(&platform);
            panic!("measurement aborted");
        }));

        expect_that!(result.is_err(), eq(true));
    }
}
