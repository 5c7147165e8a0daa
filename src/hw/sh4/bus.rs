use serde::{Deserialize, Serialize};

/// The address mask applied to every DMA address (29-bit physical space).
pub const ADDRESS_MASK: u32 = 0x1fff_ffff;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct PhysicalAddress(pub u32);

impl PhysicalAddress {
    pub fn is_p4(&self) -> bool {
        self.0 >= 0xfe00_0000
    }

    /// Area 7 mirrors the on-chip registers at 0x1cxxxxxx-0x1fxxxxxx.
    pub fn is_area7(&self) -> bool {
        (self.0 & 0xe000_0000) == 0 && (self.0 & 0x1c00_0000) == 0x1c00_0000
    }
}

/// Memory seen by the DMA controller. Implemented by the board.
pub trait MemoryBus {
    fn read_8(&mut self, addr: u32) -> u8;
    fn read_16(&mut self, addr: u32) -> u16;
    fn read_32(&mut self, addr: u32) -> u32;
    fn read_64(&mut self, addr: u32) -> u64;

    fn write_8(&mut self, addr: u32, value: u8);
    fn write_16(&mut self, addr: u32, value: u16);
    fn write_32(&mut self, addr: u32, value: u32);
    fn write_64(&mut self, addr: u32, value: u64);
}

/// Flat little-endian RAM mirrored across the whole physical space.
#[derive(Clone, Debug)]
pub struct SystemRam {
    data: Vec<u8>,
    mask: u32,
}

impl SystemRam {
    /// `size` must be a power of two.
    pub fn new(size: usize) -> Self {
        assert!(size.is_power_of_two(), "ram size must be a power of two");

        Self {
            data: vec![0; size],
            mask: (size - 1) as u32,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    #[inline]
    fn offset(&self, addr: u32) -> usize {
        (addr & self.mask) as usize
    }

    fn read_bytes<const N: usize>(&self, addr: u32) -> [u8; N] {
        let mut bytes = [0; N];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = self.data[self.offset(addr.wrapping_add(i as u32))];
        }
        bytes
    }

    fn write_bytes(&mut self, addr: u32, bytes: &[u8]) {
        for (i, byte) in bytes.iter().enumerate() {
            let offset = self.offset(addr.wrapping_add(i as u32));
            self.data[offset] = *byte;
        }
    }
}

impl MemoryBus for SystemRam {
    fn read_8(&mut self, addr: u32) -> u8 {
        self.data[self.offset(addr)]
    }

    fn read_16(&mut self, addr: u32) -> u16 {
        u16::from_le_bytes(self.read_bytes(addr))
    }

    fn read_32(&mut self, addr: u32) -> u32 {
        u32::from_le_bytes(self.read_bytes(addr))
    }

    fn read_64(&mut self, addr: u32) -> u64 {
        u64::from_le_bytes(self.read_bytes(addr))
    }

    fn write_8(&mut self, addr: u32, value: u8) {
        let offset = self.offset(addr);
        self.data[offset] = value;
    }

    fn write_16(&mut self, addr: u32, value: u16) {
        self.write_bytes(addr, &value.to_le_bytes());
    }

    fn write_32(&mut self, addr: u32, value: u32) {
        self.write_bytes(addr, &value.to_le_bytes());
    }

    fn write_64(&mut self, addr: u32, value: u64) {
        self.write_bytes(addr, &value.to_le_bytes());
    }
}
