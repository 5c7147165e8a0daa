// cache and TLB controller
use log::info;
use serde::{Deserialize, Serialize};

use crate::hw::extensions::BitManipulation;

pub const UTLB_ENTRIES: usize = 64;
const PAGE_MASK: u32 = 0xfff0_0000;

/// Only the pieces of the MMU needed to remap store-queue writes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ccn {
    pub mmu_enabled: bool,
    tlb_address: Vec<u32>,
    tlb_data: Vec<u32>,
}

impl Default for Ccn {
    fn default() -> Self {
        Self::new()
    }
}

impl Ccn {
    pub fn new() -> Self {
        Self {
            mmu_enabled: false,
            tlb_address: vec![0; UTLB_ENTRIES],
            tlb_data: vec![0; UTLB_ENTRIES],
        }
    }

    pub fn write_mmucr(&mut self, value: u32) {
        if value.check_bit(0) {
            info!("ccn: mmu enabled, only store queue remapping is emulated");
            self.mmu_enabled = true;
            self.tlb_address.fill(0);
            self.tlb_data.fill(0);
        } else {
            self.mmu_enabled = false;
        }
    }

    /// CCR reads back with the invalidate bits (OCI, ICI) clear.
    pub fn read_ccr(value: u32) -> u32 {
        value.clear_bit(11).clear_bit(3)
    }

    pub fn sq_remap(&self, addr: u32) -> u32 {
        if !self.mmu_enabled {
            return addr;
        }

        let page = addr & PAGE_MASK;
        self.tlb_address
            .iter()
            .position(|entry| entry & PAGE_MASK == page)
            .map_or(addr, |i| (addr & !PAGE_MASK) | (self.tlb_data[i] & PAGE_MASK))
    }

    /// `offset` is relative to the UTLB address array window; data entries start at 0x0100_0000.
    pub fn tlb_read(&self, offset: u32) -> u64 {
        let i = ((offset >> 8) & 63) as usize;
        if offset >= 0x0100_0000 {
            self.tlb_data[i] as u64
        } else {
            self.tlb_address[i] as u64
        }
    }

    pub fn tlb_write(&mut self, offset: u32, value: u64) {
        let i = ((offset >> 8) & 63) as usize;
        if offset >= 0x0100_0000 {
            self.tlb_data[i] = value as u32;
        } else {
            self.tlb_address[i] = value as u32;
        }
    }
}
