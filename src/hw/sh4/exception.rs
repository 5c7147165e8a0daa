// exception entry and external interrupt lines
//
// The SH-4 and SH-3 differ in how an accepted interrupt is reported and in which
// external lines exist. Each variant is a stateless strategy picked once, when the
// core is built.
use std::fmt;

use log::{debug, warn};

use super::{
    cpu::{CpuState, SR_BL, SR_MD, SR_RB},
    intc::{effective_level, ExceptionSource},
    regs, InterruptLine, LineState, Sh4,
};
use crate::{config::CpuKind, context::Context, hw::extensions::BitManipulation};

/// Offset from VBR of the interrupt handler.
pub const INTERRUPT_VECTOR: u32 = 0x600;
/// Offset from VBR of the general exception handler.
pub const GENERAL_VECTOR: u32 = 0x100;
/// Offset from VBR of the TLB miss handler.
pub const TLB_MISS_VECTOR: u32 = 0x400;
pub const RESET_VECTOR: u32 = 0xa000_0000;

const NMI_CODE: u32 = 0x1c0;

// ICR
pub const ICR_NMIL: u32 = 0x8000;
pub const ICR_NMIB: u32 = 0x0200;
pub const ICR_NMIE: u32 = 0x0100;
pub const ICR_IRLM: u32 = 0x0080;

pub trait CpuVariant: fmt::Debug + Sync {
    fn kind(&self) -> CpuKind;

    /// Takes `source` if it is still allowed to interrupt. Returns true when the
    /// CPU was redirected to a handler.
    fn raise(&self, sh4: &mut Sh4, source: ExceptionSource, context: &mut Context) -> bool;

    fn set_irq_line(
        &self,
        sh4: &mut Sh4,
        line: InterruptLine,
        state: LineState,
        context: &mut Context,
    );

    /// Guards routines that only exist on the SH-4 register map.
    fn require_sh4(&self, routine: &str);
}

#[derive(Debug)]
pub struct Sh4Variant;

#[derive(Debug)]
pub struct Sh3Variant;

pub static SH4: Sh4Variant = Sh4Variant;
pub static SH3: Sh3Variant = Sh3Variant;

pub fn variant_for(kind: CpuKind) -> &'static dyn CpuVariant {
    match kind {
        CpuKind::Sh4 => &SH4,
        CpuKind::Sh3 => &SH3,
    }
}

pub fn default_variant() -> &'static dyn CpuVariant {
    &SH4
}

/// Line the external controller is told about when `source` is taken.
fn acknowledge_line(source: ExceptionSource) -> InterruptLine {
    match source {
        ExceptionSource::IRL0 => InterruptLine::Irl0,
        ExceptionSource::IRL1 => InterruptLine::Irl1,
        ExceptionSource::IRL2 => InterruptLine::Irl2,
        ExceptionSource::IRL3 => InterruptLine::Irl3,
        _ => InterruptLine::Irln,
    }
}

/// Maskable sources still need to be above the mask and unblocked when taken.
fn accepts_interrupt(sh4: &Sh4, source: ExceptionSource) -> bool {
    !sh4.cpu.is_blocked() && effective_level(sh4.intc.priority(source)) > sh4.cpu.imask()
}

/// Shared tail of every exception entry.
fn enter(sh4: &mut Sh4, source: ExceptionSource, target: u32, context: &mut Context) {
    if source.auto_clears() {
        sh4.intc.unrequest(source, sh4.cpu.registers.sr);
    }

    let registers = &mut sh4.cpu.registers;
    registers.spc = registers.current_pc;
    registers.ssr = registers.sr;
    registers.sgr = registers.r[15];
    registers.sr = registers.sr.set_bit(SR_MD);

    let sr = sh4.cpu.registers.sr;
    if context.debugger_attached {
        sh4.cpu.synchronize_register_bank(sr.field(SR_RB, 1) as usize);
    }
    if !sr.check_bit(SR_RB) {
        sh4.cpu.change_register_bank(1);
    }
    sh4.cpu.registers.sr = sr.set_bit(SR_RB).set_bit(SR_BL);
    sh4.intc.recompute(sh4.cpu.registers.sr);

    sh4.cpu.registers.current_pc = target;
    if sh4.cpu.state == CpuState::Sleeping {
        sh4.cpu.state = CpuState::WakePending;
    }
}

impl Sh4Variant {
    fn raise_general(&self, sh4: &mut Sh4, source: ExceptionSource, context: &mut Context) -> bool {
        sh4.registers.set(regs::EXPEVT, source.code());

        if source.is_reset() {
            debug!("sh4: {:?}", source);
            sh4.intc.unrequest(source, sh4.cpu.registers.sr);
            sh4.cpu.set_sr(0x7000_00f0);
            sh4.cpu.registers.vbr = 0;
            sh4.cpu.registers.current_pc = RESET_VECTOR;
            sh4.intc.recompute(sh4.cpu.registers.sr);
            if sh4.cpu.state == CpuState::Sleeping {
                sh4.cpu.state = CpuState::WakePending;
            }
            return true;
        }

        if sh4.cpu.is_blocked() {
            warn!(
                "sh4: {:?} while blocked at {:08x}, ignored",
                source, sh4.cpu.registers.current_pc
            );
            sh4.intc.unrequest(source, sh4.cpu.registers.sr);
            return false;
        }

        let offset = match source {
            ExceptionSource::ItlbMiss
            | ExceptionSource::DtlbMissRead
            | ExceptionSource::DtlbMissWrite => TLB_MISS_VECTOR,
            _ => GENERAL_VECTOR,
        };

        let target = sh4.cpu.registers.vbr.wrapping_add(offset);
        enter(sh4, source, target, context);
        true
    }
}

impl CpuVariant for Sh4Variant {
    fn kind(&self) -> CpuKind {
        CpuKind::Sh4
    }

    fn raise(&self, sh4: &mut Sh4, source: ExceptionSource, context: &mut Context) -> bool {
        if source.is_synchronous() {
            return self.raise_general(sh4, source, context);
        }

        if source == ExceptionSource::NMI {
            if sh4.cpu.is_blocked() && sh4.registers.get(regs::ICR) & ICR_NMIB == 0 {
                return false;
            }

            sh4.registers.update(regs::ICR, |icr| icr & !ICR_NMIB);
            sh4.registers.set(regs::INTEVT, NMI_CODE);
            context.devices.irq_acknowledge(InterruptLine::Nmi);
            debug!("sh4: nmi exception at {:08x}", sh4.cpu.registers.current_pc);
        } else {
            if !accepts_interrupt(sh4, source) {
                return false;
            }

            sh4.registers.set(regs::INTEVT, source.code());
            context.devices.irq_acknowledge(acknowledge_line(source));

            #[cfg(feature = "log_ints")]
            debug!(
                "sh4: interrupt {:?} ({:03x}) at {:08x}",
                source,
                source.code(),
                sh4.cpu.registers.current_pc
            );
        }

        let target = sh4.cpu.registers.vbr.wrapping_add(INTERRUPT_VECTOR);
        enter(sh4, source, target, context);
        true
    }

    fn set_irq_line(
        &self,
        sh4: &mut Sh4,
        line: InterruptLine,
        state: LineState,
        context: &mut Context,
    ) {
        let sr = sh4.cpu.registers.sr;

        if line == InterruptLine::Nmi {
            let previous = sh4.lines.nmi;
            if previous == state {
                return;
            }

            let rising_edge = sh4.registers.get(regs::ICR) & ICR_NMIE != 0;
            let triggered = if rising_edge {
                state == LineState::Clear && previous == LineState::Assert
            } else {
                state == LineState::Assert && previous == LineState::Clear
            };

            if triggered {
                debug!("sh4: assert nmi");
                sh4.intc.request(ExceptionSource::NMI, sr);
                sh4.dmac.nmi(&mut sh4.registers, context.scheduler);
            }

            match state {
                LineState::Clear => sh4.registers.update(regs::ICR, |icr| icr & !ICR_NMIL),
                LineState::Assert => sh4.registers.update(regs::ICR, |icr| icr | ICR_NMIL),
            }
            sh4.lines.nmi = state;
        } else if sh4.registers.get(regs::ICR) & ICR_IRLM != 0 {
            // four independent lines
            let Some(n) = line.discrete_index() else {
                return;
            };
            if sh4.lines.irl[n] == state {
                return;
            }
            sh4.lines.irl[n] = state;

            let source = ExceptionSource::irl(n);
            match state {
                LineState::Clear => {
                    debug!("sh4: cleared external irq IRL{}", n);
                    sh4.intc.unrequest(source, sr);
                }
                LineState::Assert => {
                    debug!("sh4: assert external irq IRL{}", n);
                    sh4.intc.request(source, sr);
                }
            }
        } else {
            // level encoded on IRL3-0
            if line != InterruptLine::Irln || !(0..=15).contains(&sh4.lines.irln) {
                return;
            }

            for level in 0..15 {
                sh4.intc.unrequest(ExceptionSource::irln(level), sr);
            }
            if sh4.lines.irln < 15 {
                sh4.intc
                    .request(ExceptionSource::irln(sh4.lines.irln as usize), sr);
            }

            #[cfg(feature = "log_ints")]
            debug!("sh4: IRLn level {}", sh4.lines.irln);
        }

        if sh4.intc.test_irq && !sh4.cpu.in_delay_slot {
            sh4.check_pending_irq(context);
        }
    }

    fn require_sh4(&self, _routine: &str) {}
}

impl CpuVariant for Sh3Variant {
    fn kind(&self) -> CpuKind {
        CpuKind::Sh3
    }

    fn raise(&self, sh4: &mut Sh4, source: ExceptionSource, context: &mut Context) -> bool {
        // the sh-3 exception table is not modelled
        if source.index() <= ExceptionSource::NMI.index() {
            warn!(
                "sh3: {:?} at {:08x} is not modelled, ignored",
                source, sh4.cpu.registers.current_pc
            );
            return false;
        }
        if !accepts_interrupt(sh4, source) {
            return false;
        }

        let value = context.devices.irq_acknowledge(acknowledge_line(source));
        sh4.sh3.intevt2 = value;
        sh4.sh3.expevt = source.code();
        debug!("sh3: interrupt {:?} at {:08x}", source, sh4.cpu.registers.current_pc);

        let target = sh4.cpu.registers.vbr.wrapping_add(INTERRUPT_VECTOR);
        enter(sh4, source, target, context);
        true
    }

    fn set_irq_line(
        &self,
        sh4: &mut Sh4,
        line: InterruptLine,
        state: LineState,
        _context: &mut Context,
    ) {
        let Some(n) = line.discrete_index() else {
            warn!("sh3: {:?} line is not implemented", line);
            return;
        };
        if sh4.lines.irl[n] == state {
            return;
        }
        sh4.lines.irl[n] = state;

        let sr = sh4.cpu.registers.sr;
        let source = ExceptionSource::irl(n);
        match state {
            LineState::Clear => sh4.intc.unrequest(source, sr),
            LineState::Assert => sh4.intc.request(source, sr),
        }
    }

    fn require_sh4(&self, routine: &str) {
        panic!("{} uses the sh-4 register map on an sh-3 core", routine);
    }
}
