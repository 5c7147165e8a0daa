pub mod bsc;
pub mod bus;
pub mod ccn;
pub mod cpu;
pub mod dmac;
pub mod exception;
pub mod intc;
pub mod regs;
pub mod rtc;
pub mod tmu;

use chrono::NaiveDateTime;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::{Clocks, CpuKind, Sh4Config},
    context::Context,
    scheduler::{ScheduledEvent, Scheduler},
};
use bsc::Bsc;
use bus::PhysicalAddress;
use ccn::Ccn;
use cpu::Cpu;
use dmac::{DdtTransfer, DmaCheck, DmaDataStatus, Dmac, DMAOR_AE, DMAOR_NMIF};
use exception::CpuVariant;
use intc::{ExceptionSource, Intc};
use regs::{RegisterFile, RegisterHandler};
use tmu::Tmu;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SH4EventData {
    DmaComplete { channel: usize },
    RefreshTimer,
    RtcTick,
    TmuUnderflow { channel: usize },
}

#[derive(Debug, Error)]
pub enum Sh4Error {
    #[error("dma channel {channel}: invalid increment (source mode {source_mode}, destination mode {destination_mode})")]
    InvalidIncrement {
        channel: usize,
        source_mode: u32,
        destination_mode: u32,
    },
    #[error("dma channel {channel} already has a transfer in flight")]
    DmaChannelBusy { channel: usize },
    #[error("dma channel {channel}: ddt length {actual} does not match the channel ({expected} bytes)")]
    DdtLengthMismatch {
        channel: usize,
        expected: u64,
        actual: u64,
    },
    #[error("dma channel {channel} does not exist")]
    ChannelOutOfRange { channel: usize },
    #[error("interrupt priority {priority} out of range")]
    PriorityOutOfRange { priority: u32 },
    #[error("clock mode {0} is reserved")]
    UnsupportedClockMode(u8),
    #[error("bad configuration: {0}")]
    Config(#[from] ron::error::SpannedError),
    #[error("bad save state: {0}")]
    State(#[from] bincode::Error),
}

/// The two general purpose ports.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IoPort {
    /// Port A, 16 pins.
    Port16,
    /// Port B, 4 pins.
    Port4,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InterruptLine {
    Irl0,
    Irl1,
    Irl2,
    Irl3,
    /// IRL3-0 used as one encoded level, see [`Sh4::set_irln_input`].
    Irln,
    Nmi,
}

impl InterruptLine {
    pub fn discrete_index(self) -> Option<usize> {
        match self {
            InterruptLine::Irl0 => Some(0),
            InterruptLine::Irl1 => Some(1),
            InterruptLine::Irl2 => Some(2),
            InterruptLine::Irl3 => Some(3),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineState {
    #[default]
    Clear,
    Assert,
}

/// Board side of the processor. Every hook defaults to an idle board.
pub trait Sh4Devices {
    /// Interrupt acknowledge cycle for `line`; the SH-3 stores the result in INTEVT2.
    fn irq_acknowledge(&mut self, _line: InterruptLine) -> u32 {
        0
    }

    /// A device paced channel is latched and waits for [`Sh4::dma_data`] calls.
    fn dma_ready(&mut self, _channel: usize, _mode: u32) {}

    fn port_read(&mut self, _port: IoPort) -> u32 {
        0
    }

    /// Low half is the output data, high half the port control register.
    fn port_write(&mut self, _port: IoPort, _value: u64) {}
}

pub struct NullDevices;

impl Sh4Devices for NullDevices {}

/// Last level seen on every external interrupt input.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct ExternalLines {
    pub irl: [LineState; 4],
    pub nmi: LineState,
    /// Encoded IRL level, 15 means no request.
    pub irln: i32,
}

impl Default for ExternalLines {
    fn default() -> Self {
        Self {
            irl: [LineState::Clear; 4],
            nmi: LineState::Clear,
            irln: 15,
        }
    }
}

/// SH-3 event registers that live outside the SH-4 register map.
#[derive(Copy, Clone, Debug, Default, Serialize, Deserialize)]
pub struct Sh3Registers {
    pub intevt2: u32,
    pub expevt: u32,
}

const VERSION_ID: u32 = 0x0402_05c1;
const SCFSR2_RESET: u32 = 0x60;
const UTLB_WINDOW: u32 = 0xf600_0000;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Sh4 {
    #[serde(skip, default = "exception::default_variant")]
    variant: &'static dyn CpuVariant,

    pub config: Sh4Config,
    pub clocks: Clocks,

    pub cpu: Cpu,
    pub registers: RegisterFile,
    pub intc: Intc,
    pub dmac: Dmac,
    pub tmu: Tmu,
    pub bsc: Bsc,
    pub ccn: Ccn,

    pub lines: ExternalLines,
    pub sh3: Sh3Registers,
}

#[derive(Serialize)]
struct Sh4StateRef<'a> {
    core: &'a Sh4,
    scheduler: &'a Scheduler,
}

#[derive(Deserialize)]
struct Sh4State {
    core: Sh4,
    scheduler: Scheduler,
}

impl Sh4 {
    pub fn new(config: Sh4Config) -> Result<Self, Sh4Error> {
        let clocks = config.clocks()?;

        let mut registers = RegisterFile::new();
        for channel in 0..tmu::CHANNELS {
            registers.set(regs::tcor(channel), 0xffff_ffff);
            registers.set(regs::tcnt(channel), 0xffff_ffff);
        }

        Ok(Self {
            variant: exception::variant_for(config.kind),
            config,
            clocks,
            cpu: Cpu::new(),
            registers,
            intc: Intc::new(),
            dmac: Dmac::new(),
            tmu: Tmu::new(),
            bsc: Bsc::new(),
            ccn: Ccn::new(),
            lines: ExternalLines::default(),
            sh3: Sh3Registers::default(),
        })
    }

    pub fn kind(&self) -> CpuKind {
        self.variant.kind()
    }

    /// Seeds the calendar counters, usually from the host clock.
    pub fn set_calendar(&mut self, now: NaiveDateTime) {
        self.variant.require_sh4("set_calendar");
        rtc::set_calendar(&mut self.registers, now);
    }

    fn index_of(addr: u32) -> usize {
        let physical = PhysicalAddress(addr);
        if !physical.is_p4() && !physical.is_area7() {
            warn!("sh4: {:08x} is outside the on-chip register window", addr);
        }
        regs::register_index(addr)
    }

    pub fn read_8(&self, addr: u32, context: &mut Context) -> u8 {
        let shift = (addr & 3) * 8;
        (self.read_32(addr, context) >> shift) as u8
    }

    pub fn read_16(&self, addr: u32, context: &mut Context) -> u16 {
        let shift = (addr & 2) * 8;
        (self.read_32(addr, context) >> shift) as u16
    }

    pub fn read_32(&self, addr: u32, context: &mut Context) -> u32 {
        self.variant.require_sh4("register read");
        let value = self.read_register(Self::index_of(addr), context);

        #[cfg(feature = "log_io")]
        log::trace!("sh4: read {:08x} -> {:08x}", addr, value);

        value
    }

    pub fn write_8(&mut self, addr: u32, value: u8, context: &mut Context) {
        let shift = (addr & 3) * 8;
        self.write_masked(addr, (value as u32) << shift, 0xff << shift, context);
    }

    pub fn write_16(&mut self, addr: u32, value: u16, context: &mut Context) {
        let shift = (addr & 2) * 8;
        self.write_masked(addr, (value as u32) << shift, 0xffff << shift, context);
    }

    pub fn write_32(&mut self, addr: u32, value: u32, context: &mut Context) {
        self.write_masked(addr, value, 0xffff_ffff, context);
    }

    fn write_masked(&mut self, addr: u32, data: u32, mask: u32, context: &mut Context) {
        self.variant.require_sh4("register write");

        #[cfg(feature = "log_io")]
        log::trace!("sh4: write {:08x} = {:08x} ({:08x})", addr, data, mask);

        self.write_register(Self::index_of(addr), data, mask, context);
    }

    fn read_register(&self, index: usize, context: &mut Context) -> u32 {
        use RegisterHandler::*;

        match regs::handler_for(index) {
            Some(Version) => VERSION_ID,
            Some(ProductRevision) | Some(InterruptPriorityD) => 0,
            Some(SerialStatus) => SCFSR2_RESET,
            Some(CacheControl) => Ccn::read_ccr(self.registers.get(index)),
            Some(RefreshCount) => {
                self.bsc
                    .read_refresh_count(&self.registers, &self.clocks, context.scheduler)
            }
            Some(TimerCount(channel)) => {
                self.tmu
                    .read_count(channel, &self.registers, &self.clocks, context.scheduler)
            }
            Some(PortDataA) => self.bsc.read_pdtra(&self.registers, context.devices),
            Some(PortDataB) => self.bsc.read_pdtrb(&self.registers, context.devices),
            _ => self.registers.get(index),
        }
    }

    fn write_register(&mut self, index: usize, data: u32, mask: u32, context: &mut Context) {
        use RegisterHandler::*;

        let old = self.registers.combine(index, data, mask);
        let sr = self.cpu.registers.sr;

        let Some(handler) = regs::handler_for(index) else {
            warn!(
                "sh4: unmapped write {:08x} = {:08x} ({:08x})",
                regs::register_address(index),
                data,
                mask
            );
            return;
        };

        match handler {
            MmuControl => self.ccn.write_mmucr(self.registers.get(index)),
            RefreshControl => {
                self.bsc
                    .write_rtcsr(old, &mut self.registers, &self.clocks, context.scheduler)
            }
            RefreshCount => {
                self.bsc
                    .write_rtcnt(&mut self.registers, &self.clocks, context.scheduler)
            }
            RefreshConstant => {
                self.bsc
                    .write_rtcor(&mut self.registers, &self.clocks, context.scheduler)
            }
            RefreshCounter => Bsc::write_rfcr(&mut self.registers),
            RtcControl1 => rtc::write_rcr1(old, &mut self.registers),
            RtcControl2 => {
                rtc::write_rcr2(old, &mut self.registers, &self.clocks, context.scheduler)
            }
            TimerStart => {
                self.tmu
                    .write_start(old, &mut self.registers, &self.clocks, context.scheduler)
            }
            TimerControl(channel) => self.tmu.write_control(
                channel,
                old,
                &mut self.registers,
                &self.clocks,
                context.scheduler,
            ),
            TimerCount(channel) => {
                self.tmu
                    .write_count(channel, &self.registers, &self.clocks, context.scheduler)
            }
            TimerUnsupported => {
                debug!(
                    "tmu: {:08x} is not emulated",
                    regs::register_address(index)
                );
            }
            InterruptControl => {
                // NMIL follows the pin, not software
                let icr = self.registers.get(index);
                self.registers.set(index, (icr & 0x7fff) | (old & 0x8000));
            }
            InterruptPriorityA => self.intc.update_ipr(0, self.registers.get(index), sr),
            InterruptPriorityB => self.intc.update_ipr(1, self.registers.get(index), sr),
            InterruptPriorityC => self.intc.update_ipr(2, self.registers.get(index), sr),
            DmaAddress(channel) | DmaChannelControl(channel) => {
                self.check_dma(channel, context)
            }
            DmaOperation => {
                // AE and NMIF can be cleared by software but never set
                let dmaor = self.registers.get(index);
                let flags = DMAOR_AE | DMAOR_NMIF;
                self.registers.set(index, dmaor & !(dmaor & flags & !old));

                for channel in 0..dmac::CHANNELS {
                    self.check_dma(channel, context);
                }
            }
            PortControlA => self.bsc.write_pctra(&self.registers, context.devices),
            PortDataA => self.bsc.write_pdtra(&self.registers, context.devices),
            PortControlB => self.bsc.write_pctrb(&self.registers, context.devices),
            PortDataB => self.bsc.write_pdtrb(&self.registers, context.devices),
            Version | ProductRevision => self.registers.set(index, old),
            CacheControl | TimerConstant(_) | InterruptPriorityD | StoreQueue
            | SerialPassthrough | SerialStatus => {}
        }
    }

    fn check_dma(&mut self, channel: usize, context: &mut Context) {
        self.variant.require_sh4("dmac check");

        let result = self
            .dmac
            .check(channel, &mut self.registers, context.bus, context.scheduler);
        if let DmaCheck::DeviceReady { channel, mode } = result {
            context.devices.dma_ready(channel, mode);
        }
    }

    /// Runs every timer callback that is due, including periods a long slice
    /// skipped over.
    pub fn process_events(&mut self, context: &mut Context) {
        while let Some(event) = context.scheduler.tick() {
            self.on_scheduled_event(event, context);
        }
    }

    pub fn on_scheduled_event(&mut self, event: ScheduledEvent, context: &mut Context) {
        self.variant.require_sh4("timer callback");

        let deadline = event.deadline;
        match event.event_data {
            SH4EventData::DmaComplete { channel } => {
                if self.dmac.complete(channel, &mut self.registers) {
                    self.request(ExceptionSource::dmte(channel));
                }
            }
            SH4EventData::RefreshTimer => {
                self.bsc.refresh_timer_expired(
                    deadline,
                    &mut self.registers,
                    &self.clocks,
                    context.scheduler,
                );
            }
            SH4EventData::RtcTick => {
                rtc::tick(&mut self.registers, &self.clocks, context.scheduler, deadline);
            }
            SH4EventData::TmuUnderflow { channel } => {
                let source = self.tmu.underflow(
                    channel,
                    deadline,
                    &mut self.registers,
                    &self.clocks,
                    context.scheduler,
                );
                if let Some(source) = source {
                    self.request(source);
                }
            }
        }
    }

    pub fn request(&mut self, source: ExceptionSource) {
        self.intc.request(source, self.cpu.registers.sr);
    }

    pub fn unrequest(&mut self, source: ExceptionSource) {
        self.intc.unrequest(source, self.cpu.registers.sr);
    }

    /// Redirects the CPU to the handler of `source` if it is allowed to interrupt now.
    pub fn raise(&mut self, source: ExceptionSource, context: &mut Context) -> bool {
        let variant = self.variant;
        variant.raise(self, source, context)
    }

    /// Takes the highest priority requesting source, if any.
    pub fn check_pending_irq(&mut self, context: &mut Context) -> bool {
        match self.intc.highest_pending() {
            Some(source) => self.raise(source, context),
            None => false,
        }
    }

    /// Called by the instruction core between two instructions.
    pub fn instruction_boundary(&mut self, context: &mut Context) -> bool {
        if self.intc.test_irq && !self.cpu.in_delay_slot {
            self.check_pending_irq(context)
        } else {
            false
        }
    }

    pub fn set_irq_line(&mut self, line: InterruptLine, state: LineState, context: &mut Context) {
        let variant = self.variant;
        variant.set_irq_line(self, line, state, context);
    }

    /// Drives IRL3-0 as one encoded level. Only a change of level is seen by the core.
    pub fn set_irln_input(&mut self, level: i32, context: &mut Context) {
        if self.lines.irln == level {
            return;
        }
        self.lines.irln = level;
        self.set_irq_line(InterruptLine::Irln, LineState::Assert, context);
        self.set_irq_line(InterruptLine::Irln, LineState::Clear, context);
    }

    /// Device side of a paced transfer. `buffer` holds whole transfer units.
    pub fn dma_data(
        &mut self,
        channel: usize,
        buffer: &mut [u8],
        context: &mut Context,
    ) -> DmaDataStatus {
        if channel >= dmac::CHANNELS {
            return DmaDataStatus::NotActive;
        }
        self.dmac
            .data(channel, buffer, context.bus, context.scheduler)
    }

    pub fn dma_ddt(
        &mut self,
        request: &mut DdtTransfer,
        context: &mut Context,
    ) -> Result<(), Sh4Error> {
        self.variant.require_sh4("dma_ddt");
        self.dmac
            .ddt(request, &mut self.registers, context.bus, context.scheduler)
    }

    /// External address a store queue flush at `addr` lands on.
    pub fn store_queue_target(&self, addr: u32) -> u32 {
        if self.ccn.mmu_enabled {
            return self.ccn.sq_remap(addr);
        }

        let qacr = if addr & 0x20 != 0 {
            regs::QACR1
        } else {
            regs::QACR0
        };
        ((self.registers.get(qacr) & 0x1c) << 24) | (addr & 0x03ff_ffe0)
    }

    /// UTLB address (0xf6xxxxxx) and data (0xf7xxxxxx) array access.
    pub fn read_utlb(&self, addr: u32) -> u32 {
        self.ccn.tlb_read(addr.wrapping_sub(UTLB_WINDOW)) as u32
    }

    pub fn write_utlb(&mut self, addr: u32, value: u32) {
        self.ccn.tlb_write(addr.wrapping_sub(UTLB_WINDOW), value as u64);
    }

    pub fn save_state(&self, scheduler: &Scheduler) -> Result<Vec<u8>, Sh4Error> {
        let state = Sh4StateRef {
            core: self,
            scheduler,
        };
        Ok(bincode::serialize(&state)?)
    }

    pub fn load_state(&mut self, data: &[u8], scheduler: &mut Scheduler) -> Result<(), Sh4Error> {
        let state: Sh4State = bincode::deserialize(data)?;

        *self = state.core;
        self.variant = exception::variant_for(self.config.kind);
        *scheduler = state.scheduler;
        Ok(())
    }
}
