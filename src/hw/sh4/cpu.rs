// sh-4 register context shared with the instruction core
use serde::{Deserialize, Serialize};

use crate::hw::extensions::BitManipulation;

pub const SR_MD: usize = 30;
pub const SR_RB: usize = 29;
pub const SR_BL: usize = 28;
pub const SR_FD: usize = 15;

pub const SR_MASK: u32 = 0x7000_83f3;
pub const FPSCR_FR: usize = 21;

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Serialize, Deserialize)]
pub enum CpuState {
    #[default]
    Running,
    Sleeping,
    /// An exception arrived while sleeping; the core resumes on its next step.
    WakePending,
}

#[derive(Copy, Clone, Default, Debug, Serialize, Deserialize)]
pub struct CpuRegisters {
    pub current_pc: u32,

    pub r: [u32; 16],
    /// Shadow storage for r0-r7 of bank 0 and bank 1.
    pub r_bank: [[u32; 8]; 2],

    // control registers
    pub sr: u32,
    pub gbr: u32,
    pub vbr: u32,
    pub dbr: u32,
    pub ssr: u32,
    pub spc: u32,
    pub sgr: u32,

    // system registers
    pub pr: u32,
    pub macl: u32,
    pub mach: u32,

    // fpu registers
    pub fpul: u32,
    pub fpscr: u32,
    pub fr: [u32; 16],
    pub xf: [u32; 16],
}

impl CpuRegisters {
    pub fn new() -> Self {
        Self {
            current_pc: 0xa000_0000,
            sr: 0x7000_00f0,
            fpscr: 0x4001,
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Cpu {
    pub registers: CpuRegisters,
    pub state: CpuState,
    /// Set by the instruction core while a delay slot is executing.
    pub in_delay_slot: bool,
}

impl Cpu {
    pub fn new() -> Self {
        Cpu {
            registers: CpuRegisters::new(),
            state: CpuState::Running,
            in_delay_slot: false,
        }
    }

    pub fn get_sr(&self) -> u32 {
        self.registers.sr
    }

    /// Interrupt mask level, SR.I3-I0.
    pub fn imask(&self) -> u32 {
        self.registers.sr.field(4, 4)
    }

    pub fn is_blocked(&self) -> bool {
        self.registers.sr.check_bit(SR_BL)
    }

    /// Saves r0-r7 into the shadow of bank `from` and loads them from the other bank.
    pub fn change_register_bank(&mut self, to: usize) {
        let from = to ^ 1;
        for s in 0..8 {
            self.registers.r_bank[from][s] = self.registers.r[s];
            self.registers.r[s] = self.registers.r_bank[to][s];
        }
    }

    /// Copies the live r0-r7 into the shadow of `to` without switching.
    pub fn synchronize_register_bank(&mut self, to: usize) {
        self.registers.r_bank[to].copy_from_slice(&self.registers.r[..8]);
    }

    pub fn swap_fp_registers(&mut self) {
        std::mem::swap(&mut self.registers.fr, &mut self.registers.xf);
    }

    pub fn set_sr(&mut self, mut value: u32) {
        value &= SR_MASK;

        let old_sr = self.registers.sr;
        self.registers.sr = value;

        if old_sr.check_bit(SR_RB) != value.check_bit(SR_RB) {
            self.change_register_bank(value.field(SR_RB, 1) as usize);
        }
    }

    pub fn set_fpscr(&mut self, mut value: u32) {
        value &= 0x003f_ffff;

        if value.check_bit(FPSCR_FR) != self.registers.fpscr.check_bit(FPSCR_FR) {
            self.swap_fp_registers();
        }

        self.registers.fpscr = value;
    }

    /// Bank-aware view of rN_BANK as seen by `stc Rm_BANK`.
    pub fn get_banked_register_by_index(&self, index: usize) -> u32 {
        let inactive = (self.registers.sr.field(SR_RB, 1) ^ 1) as usize;
        self.registers.r_bank[inactive][index & 0x7]
    }

    pub fn set_banked_register_by_index(&mut self, index: usize, value: u32) {
        let inactive = (self.registers.sr.field(SR_RB, 1) ^ 1) as usize;
        self.registers.r_bank[inactive][index & 0x7] = value;
    }

    pub fn sleep(&mut self) {
        self.state = CpuState::Sleeping;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bank_switch_round_trip() {
        let mut cpu = Cpu::new();
        cpu.set_sr(0); // bank 0

        for i in 0..8 {
            cpu.registers.r[i] = i as u32;
        }
        cpu.set_banked_register_by_index(3, 0xdead);

        cpu.set_sr(1 << SR_RB);
        assert_eq!(cpu.registers.r[3], 0xdead);
        assert_eq!(cpu.get_banked_register_by_index(3), 3);

        cpu.set_sr(0);
        assert_eq!(cpu.registers.r[3], 3);
        assert_eq!(cpu.get_banked_register_by_index(3), 0xdead);
    }

    #[test]
    fn synchronize_does_not_switch() {
        let mut cpu = Cpu::new();
        cpu.registers.r[0] = 42;
        cpu.synchronize_register_bank(1);
        assert_eq!(cpu.registers.r_bank[1][0], 42);
        assert_eq!(cpu.registers.r[0], 42);
    }

    #[test]
    fn fpscr_fr_swaps_banks() {
        let mut cpu = Cpu::new();
        cpu.registers.fr[2] = 0x3f80_0000;
        cpu.set_fpscr(1 << FPSCR_FR);
        assert_eq!(cpu.registers.xf[2], 0x3f80_0000);
        assert_eq!(cpu.registers.fr[2], 0);
    }

    #[test]
    fn imask_and_block() {
        let mut cpu = Cpu::new();
        assert!(cpu.is_blocked());
        assert_eq!(cpu.imask(), 0xf);
        cpu.set_sr(0x20);
        assert!(!cpu.is_blocked());
        assert_eq!(cpu.imask(), 2);
    }
}
