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

//! PCI addressing for the chipset devices the PM timer lives behind.

use core::fmt::Display;

/// Legacy configuration address port (CONFIG_ADDRESS).
pub const PCI_PORT_CONFIGURATION_SPACE_ADDRESS: u16 = 0xCF8;
/// Legacy configuration data port (CONFIG_DATA).
pub const PCI_PORT_CONFIGURATION_SPACE_DATA: u16 = 0xCFC;

/// Register 0x00: Vendor ID (16b).
pub const PCI_VENDOR_ID_OFFSET: u8 = 0x00;

/// PCI address.
///
/// Basic structure: BBBBBBBBDDDDDFFF
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(transparent)]
pub struct PciAddress(u16);

impl PciAddress {
    pub const fn new(bus: u8, device: u8, function: u8) -> Result<Self, &'static str> {
        if device > 0b11111 {
            return Err("invalid device number");
        }
        if function > 0b111 {
            return Err("invalid function number");
        }

        Ok(Self((bus as u16) << 8 | (device as u16) << 3 | (function as u16)))
    }

    /// Builds an address for a well-known device at compile time.
    pub(crate) const fn fixed(bus: u8, device: u8, function: u8) -> Self {
        match Self::new(bus, device, function) {
            Ok(address) => address,
            Err(_) => panic!("invalid fixed PCI address"),
        }
    }

    fn bus(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    fn device(&self) -> u8 {
        ((self.0 >> 3) & 0b11111) as u8
    }

    fn function(&self) -> u8 {
        (self.0 & 0b111) as u8
    }

    /// Value to write to CONFIG_ADDRESS to select the dword holding `offset`.
    ///
    /// Address register implemented per Section 3.2.2.3.2 of PCI spec, Rev 3.0.
    pub fn cam_address(&self, offset: u8) -> u32 {
        (1u32 << 31) | ((self.0 as u32) << 8) | ((offset & 0xFC) as u32)
    }
}

impl Display for PciAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:02x}:{:02x}.{:x}", self.bus(), self.device(), self.function())
    }
}

/// Shifts the field at byte `offset` down to bit 0 of a dword read through CAM.
pub(crate) fn dword_field(dword: u32, offset: u8) -> u32 {
    dword >> ((offset & 0b11) as u32 * 8)
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;

    use super::*;

    #[googletest::test]
    fn test_address_fields() {
        let address = PciAddress::new(0, 31, 2).unwrap();

        expect_that!(address.bus(), eq(0));
        expect_that!(address.device(), eq(31));
        expect_that!(address.function(), eq(2));
        expect_that!(address.cam_address(0), eq(0x8000_FA00));
    }

    #[googletest::test]
    fn test_invalid_address() {
        expect_that!(PciAddress::new(0, 32, 0), err(anything()));
        expect_that!(PciAddress::new(0, 0, 8), err(anything()));
    }

    #[googletest::test]
    fn test_cam_address_is_dword_aligned() {
        let pmc = PciAddress::fixed(0, 31, 2);

        expect_that!(pmc.cam_address(0x44), eq(0x8000_FA44));
        expect_that!(pmc.cam_address(0x46), eq(0x8000_FA44));
    }

    #[googletest::test]
    fn test_dword_field() {
        expect_that!(dword_field(0x1234_5678, 0) as u16, eq(0x5678));
        expect_that!(dword_field(0x1234_5678, 2) as u16, eq(0x1234));
        expect_that!(dword_field(0x1234_5678, 3) as u8, eq(0x12));
    }

    #[googletest::test]
    fn test_display() {
        assert_that!(PciAddress::fixed(0, 31, 0).to_string(), eq("00:1f.0"));
    }
}
