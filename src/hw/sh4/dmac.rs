// dma controller
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::{
    bus::{MemoryBus, ADDRESS_MASK},
    regs::{self, RegisterFile},
    SH4EventData, Sh4Error,
};
use crate::scheduler::Scheduler;

pub const CHANNELS: usize = 4;

// CHCRn
pub const CHCR_DM: u32 = 0xc000;
pub const CHCR_SM: u32 = 0x3000;
pub const CHCR_RS: u32 = 0x0f00;
pub const CHCR_TS: u32 = 0x0070;
pub const CHCR_IE: u32 = 0x0004;
pub const CHCR_TE: u32 = 0x0002;
pub const CHCR_DE: u32 = 0x0001;

// DMAOR
pub const DMAOR_DDT: u32 = 0x8000;
pub const DMAOR_AE: u32 = 0x0004;
pub const DMAOR_NMIF: u32 = 0x0002;
pub const DMAOR_DME: u32 = 0x0001;

/// Transfer unit in bytes per TS field value; 0 is reserved.
pub const TRANSFER_SIZES: [u32; 8] = [8, 1, 2, 4, 32, 0, 0, 0];

/// DMATCR of 0 means the largest count.
pub const MAX_COUNT: u32 = 0x0100_0000;

/// Resource select values 2 and 3 pace a transfer from an external device.
pub const MODE_DEVICE_RECEIVES: u32 = 2;
pub const MODE_DEVICE_SENDS: u32 = 3;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum Increment {
    #[default]
    Fixed,
    Increment,
    Decrement,
}

impl Increment {
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits & 3 {
            0 => Some(Increment::Fixed),
            1 => Some(Increment::Increment),
            2 => Some(Increment::Decrement),
            _ => None,
        }
    }

    /// Address to access, stepping down first when decrementing.
    #[inline]
    fn before(self, addr: u32, size: u32) -> u32 {
        match self {
            Increment::Decrement => addr.wrapping_sub(size),
            _ => addr,
        }
    }

    #[inline]
    fn after(self, addr: u32, size: u32) -> u32 {
        match self {
            Increment::Increment => addr.wrapping_add(size),
            _ => addr,
        }
    }
}

/// How the completion of a burst is signalled.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DmaTimer {
    /// Synchronous, caller driven. No completion event.
    None,
    /// Completion after 2 * count + 1 cpu cycles.
    Burst,
    /// Completion on the next scheduler pass.
    Immediate,
}

/// Result of a device pump call.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DmaDataStatus {
    NotActive,
    Partial,
    Complete,
}

/// Outcome of re-evaluating one channel.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DmaCheck {
    Idle,
    Burst,
    /// The device side has to be told that `channel` is ready.
    DeviceReady { channel: usize, mode: u32 },
    Cancelled,
}

/// Decoded CHCR parameters.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TransferSetup {
    pub size: u32,
    pub incs: Increment,
    pub incd: Increment,
    pub count: u32,
}

impl TransferSetup {
    pub fn decode(channel: usize, chcr: u32, dmatcr: u32) -> Result<Self, Sh4Error> {
        let dm = (chcr & CHCR_DM) >> 14;
        let sm = (chcr & CHCR_SM) >> 12;
        let size = TRANSFER_SIZES[((chcr & CHCR_TS) >> 4) as usize];

        let (Some(incs), Some(incd)) = (Increment::from_bits(sm), Increment::from_bits(dm)) else {
            warn!(
                "dmac: channel {} bad increment values (dm {}, sm {}, size {}, chcr {:04x})",
                channel, dm, sm, size, chcr
            );
            return Err(Sh4Error::InvalidIncrement {
                channel,
                source_mode: sm,
                destination_mode: dm,
            });
        };

        let count = if dmatcr == 0 { MAX_COUNT } else { dmatcr };
        Ok(Self {
            size,
            incs,
            incd,
            count,
        })
    }
}

/// Live state of a channel that the register file does not hold.
#[derive(Copy, Clone, Debug, Default, Serialize, Deserialize)]
pub struct DmaChannel {
    pub active: bool,
    // latched for device paced transfers
    pub source: u32,
    pub destination: u32,
    pub count: u32,
    pub size: u32,
    pub incs: Increment,
    pub incd: Increment,
    pub mode: u32,
}

/// Caller supplied parameters of a direct (DDT) transfer.
pub struct DdtTransfer<'a> {
    pub channel: usize,
    pub mode: DdtMode,
    /// 0 moves memory towards the device, anything else the other way.
    pub direction: u32,
    pub source: u32,
    pub destination: u32,
    /// In units of `size`.
    pub length: u32,
    pub size: u32,
    pub buffer: &'a mut [u8],
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DdtMode {
    /// Goes through the channel registers. Flags: 1 read SAR, 2 write SAR,
    /// 4 read DAR, 8 write DAR, bits 4-5 the increment mode of the device side.
    Channel { flags: u32 },
    /// Raw copy between `buffer` and memory, 4 or 32 bytes at a time.
    Direct,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Dmac {
    pub channels: [DmaChannel; CHANNELS],
}

fn copy_unit(bus: &mut dyn MemoryBus, size: u32, src: u32, dst: u32) {
    match size {
        1 => {
            let value = bus.read_8(src);
            bus.write_8(dst, value);
        }
        2 => {
            let value = bus.read_16(src);
            bus.write_16(dst, value);
        }
        4 => {
            let value = bus.read_32(src);
            bus.write_32(dst, value);
        }
        8 => {
            let value = bus.read_64(src);
            bus.write_64(dst, value);
        }
        32 => {
            for offset in (0..32).step_by(8) {
                let value = bus.read_64(src + offset);
                bus.write_64(dst + offset, value);
            }
        }
        _ => {}
    }
}

fn read_unit(bus: &mut dyn MemoryBus, size: u32, addr: u32, out: &mut [u8]) {
    match size {
        1 => out[0] = bus.read_8(addr),
        2 => out.copy_from_slice(&bus.read_16(addr).to_le_bytes()),
        4 => out.copy_from_slice(&bus.read_32(addr).to_le_bytes()),
        8 => out.copy_from_slice(&bus.read_64(addr).to_le_bytes()),
        32 => {
            for (i, chunk) in out.chunks_exact_mut(8).enumerate() {
                chunk.copy_from_slice(&bus.read_64(addr + i as u32 * 8).to_le_bytes());
            }
        }
        _ => {}
    }
}

fn write_unit(bus: &mut dyn MemoryBus, size: u32, addr: u32, data: &[u8]) {
    let word = |n: usize| {
        let mut bytes = [0u8; 8];
        bytes[..n].copy_from_slice(&data[..n]);
        u64::from_le_bytes(bytes)
    };

    match size {
        1 => bus.write_8(addr, data[0]),
        2 => bus.write_16(addr, word(2) as u16),
        4 => bus.write_32(addr, word(4) as u32),
        8 => bus.write_64(addr, word(8)),
        32 => {
            for (i, chunk) in data.chunks_exact(8).enumerate() {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(chunk);
                bus.write_64(addr + i as u32 * 8, u64::from_le_bytes(bytes));
            }
        }
        _ => {}
    }
}

impl Dmac {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, channel: usize) -> bool {
        self.channels[channel].active
    }

    /// Re-evaluates a channel after CHCRn or DMAOR changed.
    pub fn check(
        &mut self,
        channel: usize,
        registers: &mut RegisterFile,
        bus: &mut dyn MemoryBus,
        scheduler: &mut Scheduler,
    ) -> DmaCheck {
        let mut sar = registers.get(regs::sar(channel));
        let mut dar = registers.get(regs::dar(channel));
        let mut dmatcr = registers.get(regs::dmatcr(channel));
        let chcr = registers.get(regs::chcr(channel));
        let dmaor = registers.get(regs::DMAOR);

        if chcr & dmaor & DMAOR_DME != 0 {
            let rs = (chcr & CHCR_RS) >> 8;
            if !(2..=6).contains(&rs) {
                return DmaCheck::Idle;
            }

            if self.channels[channel].active
                || chcr & CHCR_TE != 0
                || dmaor & (DMAOR_AE | DMAOR_NMIF) != 0
            {
                return DmaCheck::Idle;
            }

            if rs > 3 {
                // the copy happens now, only the completion is deferred
                return match self.transfer(
                    channel,
                    DmaTimer::Burst,
                    chcr,
                    &mut sar,
                    &mut dar,
                    &mut dmatcr,
                    bus,
                    scheduler,
                ) {
                    Ok(()) => {
                        registers.set(regs::sar(channel), sar);
                        registers.set(regs::dar(channel), dar);
                        registers.set(regs::dmatcr(channel), dmatcr);
                        DmaCheck::Burst
                    }
                    Err(_) => DmaCheck::Idle,
                };
            }

            if dmaor & DMAOR_DDT == 0 {
                if let Ok(mode) = self.transfer_device(channel, chcr, sar, dar, dmatcr) {
                    return DmaCheck::DeviceReady { channel, mode };
                }
            }

            DmaCheck::Idle
        } else if self.channels[channel].active {
            warn!(
                "dmac: channel {} cancelled in-flight but all data transferred",
                channel
            );
            self.cancel(channel, scheduler);
            DmaCheck::Cancelled
        } else {
            DmaCheck::Idle
        }
    }

    /// Copies the whole block now and arms the completion timer. Addresses and
    /// count are written back as they stand after the copy.
    #[allow(clippy::too_many_arguments)]
    pub fn transfer(
        &mut self,
        channel: usize,
        timer: DmaTimer,
        chcr: u32,
        sar: &mut u32,
        dar: &mut u32,
        dmatcr: &mut u32,
        bus: &mut dyn MemoryBus,
        scheduler: &mut Scheduler,
    ) -> Result<(), Sh4Error> {
        let setup = TransferSetup::decode(channel, chcr, *dmatcr)?;
        let TransferSetup {
            size,
            incs,
            incd,
            mut count,
        } = setup;

        #[cfg(feature = "log_dma")]
        debug!(
            "dmac: channel {} start {:08x} -> {:08x} count {:x} chcr {:04x} ({:?}, {:?}, {})",
            channel, *sar, *dar, count, chcr, incs, incd, size
        );

        match timer {
            DmaTimer::Burst => {
                self.channels[channel].active = true;
                scheduler.reschedule(
                    2 * count as u64 + 1,
                    SH4EventData::DmaComplete { channel },
                );
            }
            DmaTimer::Immediate => {
                self.channels[channel].active = true;
                scheduler.reschedule(0, SH4EventData::DmaComplete { channel });
            }
            DmaTimer::None => {}
        }

        let align = !(size.max(1) - 1);
        let mut src = *sar & ADDRESS_MASK & align;
        let mut dst = *dar & ADDRESS_MASK & align;

        if size != 0 {
            while count > 0 {
                src = incs.before(src, size);
                dst = incd.before(dst, size);
                copy_unit(bus, size, src, dst);
                src = incs.after(src, size);
                dst = incd.after(dst, size);
                count -= 1;
            }
        }

        *sar = (*sar & !ADDRESS_MASK) | (src & ADDRESS_MASK);
        *dar = (*dar & !ADDRESS_MASK) | (dst & ADDRESS_MASK);
        *dmatcr = count;
        Ok(())
    }

    /// Latches the channel for a device paced transfer and returns its mode.
    pub fn transfer_device(
        &mut self,
        channel: usize,
        chcr: u32,
        sar: u32,
        dar: u32,
        dmatcr: u32,
    ) -> Result<u32, Sh4Error> {
        let setup = TransferSetup::decode(channel, chcr, dmatcr)?;
        let mode = (chcr & CHCR_RS) >> 8;

        debug!(
            "dmac: channel {} start device<->memory {:08x}, {:08x}, {:x}, {:04x}, mode {}",
            channel, sar, dar, setup.count, chcr, mode
        );

        self.channels[channel] = DmaChannel {
            active: true,
            source: sar & ADDRESS_MASK,
            destination: dar & ADDRESS_MASK,
            count: setup.count,
            size: setup.size,
            incs: setup.incs,
            incd: setup.incd,
            mode,
        };

        Ok(mode)
    }

    /// One pump call from the device side of a paced transfer.
    pub fn data(
        &mut self,
        channel: usize,
        buffer: &mut [u8],
        bus: &mut dyn MemoryBus,
        scheduler: &mut Scheduler,
    ) -> DmaDataStatus {
        let state = &mut self.channels[channel];
        if !state.active || state.size == 0 {
            return DmaDataStatus::NotActive;
        }

        let size = state.size;
        let words = (buffer.len() / size as usize).min(state.count as usize);
        let align = !(size - 1);

        match state.mode {
            MODE_DEVICE_RECEIVES => {
                for chunk in buffer.chunks_exact_mut(size as usize).take(words) {
                    state.source = state.incs.before(state.source, size);
                    read_unit(bus, size, state.source & align, chunk);
                    state.source = state.incs.after(state.source, size);
                    state.count -= 1;
                }
            }
            MODE_DEVICE_SENDS => {
                for chunk in buffer.chunks_exact(size as usize).take(words) {
                    state.destination = state.incd.before(state.destination, size);
                    write_unit(bus, size, state.destination & align, chunk);
                    state.destination = state.incd.after(state.destination, size);
                    state.count -= 1;
                }
            }
            _ => return DmaDataStatus::NotActive,
        }

        if state.count == 0 {
            scheduler.reschedule(0, SH4EventData::DmaComplete { channel });
            DmaDataStatus::Complete
        } else {
            DmaDataStatus::Partial
        }
    }

    /// Completion side of a transfer. Returns true when DMTEn should be requested.
    pub fn complete(&mut self, channel: usize, registers: &mut RegisterFile) -> bool {
        #[cfg(feature = "log_dma")]
        debug!("dmac: channel {} complete", channel);

        self.channels[channel].active = false;
        registers.set(regs::dmatcr(channel), 0);
        registers.update(regs::chcr(channel), |chcr| chcr | CHCR_TE);
        registers.get(regs::chcr(channel)) & CHCR_IE != 0
    }

    pub fn cancel(&mut self, channel: usize, scheduler: &mut Scheduler) {
        scheduler.cancel(SH4EventData::DmaComplete { channel });
        self.channels[channel].active = false;
    }

    /// Latches NMIF and drops every in-flight transfer.
    pub fn nmi(&mut self, registers: &mut RegisterFile, scheduler: &mut Scheduler) {
        registers.update(regs::DMAOR, |dmaor| dmaor | DMAOR_NMIF);

        for channel in 0..CHANNELS {
            if self.channels[channel].active {
                warn!(
                    "dmac: channel {} cancelled due to NMI but all data transferred",
                    channel
                );
                self.cancel(channel, scheduler);
            }
        }
    }

    /// Direct transfer driven by an external driver, bypassing the completion timer.
    pub fn ddt(
        &mut self,
        request: &mut DdtTransfer,
        registers: &mut RegisterFile,
        bus: &mut dyn MemoryBus,
        scheduler: &mut Scheduler,
    ) -> Result<(), Sh4Error> {
        let channel = request.channel;
        if channel >= CHANNELS {
            return Err(Sh4Error::ChannelOutOfRange { channel });
        }
        if self.channels[channel].active {
            return Err(Sh4Error::DmaChannelBusy { channel });
        }

        match request.mode {
            DdtMode::Channel { flags } => {
                if flags & 1 != 0 {
                    request.source = registers.get(regs::sar(channel));
                }
                if flags & 2 != 0 {
                    registers.set(regs::sar(channel), request.source);
                }
                if flags & 4 != 0 {
                    request.destination = registers.get(regs::dar(channel));
                }
                if flags & 8 != 0 {
                    registers.set(regs::dar(channel), request.destination);
                }

                let mut chcr = registers.get(regs::chcr(channel));
                let mut len = registers.get(regs::dmatcr(channel));
                if request.direction == 0 {
                    chcr = (chcr & !CHCR_DM) | ((flags & 0x30) << 10);
                } else {
                    chcr = (chcr & !CHCR_SM) | ((flags & 0x30) << 8);
                }

                let siz = TRANSFER_SIZES[((chcr >> 4) & 7) as usize] as u64;
                let expected = len as u64 * siz;
                let actual = request.length as u64 * request.size as u64;
                if siz != 0 && request.size != 0 && expected != actual {
                    return Err(Sh4Error::DdtLengthMismatch {
                        channel,
                        expected,
                        actual,
                    });
                }

                self.transfer(
                    channel,
                    DmaTimer::None,
                    chcr,
                    &mut request.source,
                    &mut request.destination,
                    &mut len,
                    bus,
                    scheduler,
                )
            }
            DdtMode::Direct => {
                let unit = match request.size {
                    4 => 4,
                    32 => 8,
                    _ => return Ok(()),
                };
                let units = request.length as usize * (request.size as usize / unit);
                let units = units.min(request.buffer.len() / unit);

                let chunks = request.buffer.chunks_exact_mut(unit).take(units);
                if request.direction == 0 {
                    for chunk in chunks {
                        read_unit(bus, unit as u32, request.source, chunk);
                        request.source = request.source.wrapping_add(unit as u32);
                    }
                } else {
                    for chunk in chunks {
                        write_unit(bus, unit as u32, request.destination, chunk);
                        request.destination = request.destination.wrapping_add(unit as u32);
                    }
                }
                Ok(())
            }
        }
    }
}
