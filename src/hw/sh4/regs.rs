// on-chip register file
//
// Every P4 control register lives in one flat array. The index is not linear in
// the address: bits 2-7 pick the register inside a module and bits 17-24 pick the
// module, so 0xffd00004 (IPRA) lands at 0x3a01.
use fxhash::FxHashMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

pub const REGISTER_COUNT: usize = 0x4000;

/// Maps a P4 (or area 7) address to its register file index.
pub const fn register_index(addr: u32) -> usize {
    (((addr & 0xfc) >> 2) | ((addr & 0x01fe_0000) >> 11)) as usize
}

/// Inverse of [`register_index`], in the P4 window.
pub const fn register_address(index: usize) -> u32 {
    let index = index as u32;
    0xfe00_0000 + ((index & 0x3fc0) << 11) + ((index & 0x3f) << 2)
}

// ccn
pub const PTEH: usize = register_index(0xff00_0000);
pub const MMUCR: usize = register_index(0xff00_0010);
pub const CCR: usize = register_index(0xff00_001c);
pub const TRA: usize = register_index(0xff00_0020);
pub const EXPEVT: usize = register_index(0xff00_0024);
pub const INTEVT: usize = register_index(0xff00_0028);
pub const VERSION: usize = register_index(0xff00_0030);
pub const QACR0: usize = register_index(0xff00_0038);
pub const QACR1: usize = register_index(0xff00_003c);
pub const PRR: usize = register_index(0xff00_0044);

// bsc
pub const BCR1: usize = register_index(0xff80_0000);
pub const BCR2: usize = register_index(0xff80_0004);
pub const MCR: usize = register_index(0xff80_0014);
pub const RTCSR: usize = register_index(0xff80_001c);
pub const RTCNT: usize = register_index(0xff80_0020);
pub const RTCOR: usize = register_index(0xff80_0024);
pub const RFCR: usize = register_index(0xff80_0028);
pub const PCTRA: usize = register_index(0xff80_002c);
pub const PDTRA: usize = register_index(0xff80_0030);
pub const PCTRB: usize = register_index(0xff80_0040);
pub const PDTRB: usize = register_index(0xff80_0044);

// dmac
pub const SAR0: usize = register_index(0xffa0_0000);
pub const DAR0: usize = register_index(0xffa0_0004);
pub const DMATCR0: usize = register_index(0xffa0_0008);
pub const CHCR0: usize = register_index(0xffa0_000c);
pub const DMAOR: usize = register_index(0xffa0_0040);

/// Register stride between two DMA channels.
pub const DMA_CHANNEL_STRIDE: usize = 4;

pub const fn sar(channel: usize) -> usize {
    SAR0 + channel * DMA_CHANNEL_STRIDE
}

pub const fn dar(channel: usize) -> usize {
    DAR0 + channel * DMA_CHANNEL_STRIDE
}

pub const fn dmatcr(channel: usize) -> usize {
    DMATCR0 + channel * DMA_CHANNEL_STRIDE
}

pub const fn chcr(channel: usize) -> usize {
    CHCR0 + channel * DMA_CHANNEL_STRIDE
}

// rtc
pub const R64CNT: usize = register_index(0xffc8_0000);
pub const RSECCNT: usize = register_index(0xffc8_0004);
pub const RMINCNT: usize = register_index(0xffc8_0008);
pub const RHRCNT: usize = register_index(0xffc8_000c);
pub const RWKCNT: usize = register_index(0xffc8_0010);
pub const RDAYCNT: usize = register_index(0xffc8_0014);
pub const RMONCNT: usize = register_index(0xffc8_0018);
pub const RYRCNT: usize = register_index(0xffc8_001c);
pub const RCR1: usize = register_index(0xffc8_0038);
pub const RCR2: usize = register_index(0xffc8_003c);

// intc
pub const ICR: usize = register_index(0xffd0_0000);
pub const IPRA: usize = register_index(0xffd0_0004);
pub const IPRB: usize = register_index(0xffd0_0008);
pub const IPRC: usize = register_index(0xffd0_000c);
pub const IPRD: usize = register_index(0xffd0_0010);

// tmu
pub const TOCR: usize = register_index(0xffd8_0000);
pub const TSTR: usize = register_index(0xffd8_0004);
pub const TCOR0: usize = register_index(0xffd8_0008);
pub const TCNT0: usize = register_index(0xffd8_000c);
pub const TCR0: usize = register_index(0xffd8_0010);
pub const TCPR2: usize = register_index(0xffd8_002c);

/// Register stride between two TMU channels.
pub const TMU_CHANNEL_STRIDE: usize = 3;

pub const fn tcor(channel: usize) -> usize {
    TCOR0 + channel * TMU_CHANNEL_STRIDE
}

pub const fn tcnt(channel: usize) -> usize {
    TCNT0 + channel * TMU_CHANNEL_STRIDE
}

pub const fn tcr(channel: usize) -> usize {
    TCR0 + channel * TMU_CHANNEL_STRIDE
}

// scif
pub const SCBRR2: usize = register_index(0xffe8_0004);
pub const SCFSR2: usize = register_index(0xffe8_0010);
pub const SCSPTR2: usize = register_index(0xffe8_0020);

/// What a register access does beyond plain storage.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RegisterHandler {
    MmuControl,
    CacheControl,
    RefreshControl,
    RefreshCount,
    RefreshConstant,
    RefreshCounter,
    RtcControl1,
    RtcControl2,
    TimerStart,
    TimerControl(usize),
    TimerConstant(usize),
    TimerCount(usize),
    /// Stored but not emulated (TOCR, TCPR2).
    TimerUnsupported,
    InterruptControl,
    InterruptPriorityA,
    InterruptPriorityB,
    InterruptPriorityC,
    InterruptPriorityD,
    /// SARn, DARn or DMATCRn of a channel.
    DmaAddress(usize),
    DmaChannelControl(usize),
    DmaOperation,
    StoreQueue,
    PortControlA,
    PortDataA,
    PortControlB,
    PortDataB,
    SerialPassthrough,
    SerialStatus,
    Version,
    ProductRevision,
}

pub static HANDLERS: Lazy<FxHashMap<usize, RegisterHandler>> = Lazy::new(|| {
    use RegisterHandler::*;

    let mut handlers = FxHashMap::default();
    handlers.insert(MMUCR, MmuControl);
    handlers.insert(CCR, CacheControl);

    handlers.insert(RTCSR, RefreshControl);
    handlers.insert(RTCNT, RefreshCount);
    handlers.insert(RTCOR, RefreshConstant);
    handlers.insert(RFCR, RefreshCounter);

    handlers.insert(RCR1, RtcControl1);
    handlers.insert(RCR2, RtcControl2);

    handlers.insert(TSTR, TimerStart);
    for channel in 0..3 {
        handlers.insert(tcr(channel), TimerControl(channel));
        handlers.insert(tcor(channel), TimerConstant(channel));
        handlers.insert(tcnt(channel), TimerCount(channel));
    }
    handlers.insert(TOCR, TimerUnsupported);
    handlers.insert(TCPR2, TimerUnsupported);

    handlers.insert(ICR, InterruptControl);
    handlers.insert(IPRA, InterruptPriorityA);
    handlers.insert(IPRB, InterruptPriorityB);
    handlers.insert(IPRC, InterruptPriorityC);
    handlers.insert(IPRD, InterruptPriorityD);

    for channel in 0..4 {
        handlers.insert(sar(channel), DmaAddress(channel));
        handlers.insert(dar(channel), DmaAddress(channel));
        handlers.insert(dmatcr(channel), DmaAddress(channel));
        handlers.insert(chcr(channel), DmaChannelControl(channel));
    }
    handlers.insert(DMAOR, DmaOperation);

    handlers.insert(QACR0, StoreQueue);
    handlers.insert(QACR1, StoreQueue);

    handlers.insert(PCTRA, PortControlA);
    handlers.insert(PDTRA, PortDataA);
    handlers.insert(PCTRB, PortControlB);
    handlers.insert(PDTRB, PortDataB);

    handlers.insert(SCBRR2, SerialPassthrough);
    handlers.insert(SCSPTR2, SerialPassthrough);
    handlers.insert(SCFSR2, SerialStatus);

    handlers.insert(VERSION, Version);
    handlers.insert(PRR, ProductRevision);
    handlers
});

pub fn handler_for(index: usize) -> Option<RegisterHandler> {
    HANDLERS.get(&index).copied()
}

/// Flat backing store of every on-chip register; doubles as serialized state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegisterFile {
    m: Vec<u32>,
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterFile {
    pub fn new() -> Self {
        Self {
            m: vec![0; REGISTER_COUNT],
        }
    }

    #[inline]
    pub fn get(&self, index: usize) -> u32 {
        self.m[index]
    }

    #[inline]
    pub fn set(&mut self, index: usize, value: u32) {
        self.m[index] = value;
    }

    /// Merges the bits of `data` selected by `mask` and returns the previous value.
    pub fn combine(&mut self, index: usize, data: u32, mask: u32) -> u32 {
        let old = self.m[index];
        self.m[index] = (old & !mask) | (data & mask);
        old
    }

    pub fn update(&mut self, index: usize, f: impl FnOnce(u32) -> u32) {
        self.m[index] = f(self.m[index]);
    }
}
