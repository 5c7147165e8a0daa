// bus state controller: dram refresh timer and the two gpio ports
use serde::{Deserialize, Serialize};

use super::{
    regs::{self, RegisterFile},
    IoPort, SH4EventData, Sh4Devices,
};
use crate::{config::Clocks, hw::extensions::BitManipulation, scheduler::Scheduler};

/// Bus clock divisor per RTCSR.CKS; 0 stops the counter.
pub const REFRESH_DIVISORS: [u64; 8] = [0, 4, 16, 64, 256, 1024, 2048, 4096];

const RTCSR_CMF: u32 = 0x80;
const RTCSR_OVF: u32 = 0x04;
const RTCSR_LMTS: u32 = 0x01;

const MCR_RFSH: u32 = 0x04;
const MCR_RMODE: u32 = 0x02;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Bsc {
    /// RTCNT when the refresh timer was last armed.
    refresh_base: u32,

    pub port16_direction: u32,
    pub port16_pullup: u32,
    pub port4_direction: u32,
    pub port4_pullup: u32,
}

fn refresh_divisor(rtcsr: u32) -> u64 {
    REFRESH_DIVISORS[((rtcsr >> 3) & 7) as usize]
}

/// Splits a PCTRx value into (direction, pull-up) masks for `pins` pins.
fn decode_port_control(pctr: u32, pins: usize) -> (u32, u32) {
    let mut direction = 0;
    let mut pullup = 0;
    for pin in 0..pins {
        if pctr.check_bit(pin * 2) {
            direction |= 1 << pin;
        }
        if pctr.check_bit(pin * 2 + 1) {
            pullup |= 1 << pin;
        }
    }

    let all = (1u32 << pins) - 1;
    (direction, (pullup | direction) ^ all)
}

impl Bsc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refresh_active(registers: &RegisterFile) -> bool {
        refresh_divisor(registers.get(regs::RTCSR)) != 0
    }

    fn compute_ticks(&self, divisor: u64, clocks: &Clocks, scheduler: &Scheduler) -> u32 {
        let elapsed = scheduler.elapsed(SH4EventData::RefreshTimer);
        let ticks = clocks.ticks_in(elapsed, clocks.bus, divisor);
        (self.refresh_base as u64 + ticks) as u32 & 0xff
    }

    /// Live RTCNT.
    pub fn read_refresh_count(
        &self,
        registers: &RegisterFile,
        clocks: &Clocks,
        scheduler: &Scheduler,
    ) -> u32 {
        let divisor = refresh_divisor(registers.get(regs::RTCSR));
        if divisor != 0 {
            self.compute_ticks(divisor, clocks, scheduler)
        } else {
            registers.get(regs::RTCNT)
        }
    }

    /// Arms the compare match counting from cycle `start`.
    fn recompute_refresh(
        &mut self,
        start: u64,
        registers: &RegisterFile,
        clocks: &Clocks,
        scheduler: &mut Scheduler,
    ) {
        let rtcnt = registers.get(regs::RTCNT);
        let rtcor = registers.get(regs::RTCOR);

        let mut ticks = rtcor.wrapping_sub(rtcnt) as u64 & 0xff;
        if ticks == 0 {
            ticks = 256;
        }

        let divisor = refresh_divisor(registers.get(regs::RTCSR));
        let delay = clocks.to_cpu_cycles(clocks.bus, divisor * ticks);
        scheduler.reschedule_at(start, delay, SH4EventData::RefreshTimer);
        self.refresh_base = rtcnt;
    }

    pub fn write_rtcsr(
        &mut self,
        old: u32,
        registers: &mut RegisterFile,
        clocks: &Clocks,
        scheduler: &mut Scheduler,
    ) {
        registers.update(regs::RTCSR, |v| v & 0xff);

        let old_divisor = refresh_divisor(old);
        if old_divisor != 0 {
            let count = self.compute_ticks(old_divisor, clocks, scheduler);
            registers.set(regs::RTCNT, count);
        }

        if Self::refresh_active(registers) {
            self.recompute_refresh(scheduler.now(), registers, clocks, scheduler);
        } else {
            scheduler.cancel(SH4EventData::RefreshTimer);
        }
    }

    pub fn write_rtcnt(
        &mut self,
        registers: &mut RegisterFile,
        clocks: &Clocks,
        scheduler: &mut Scheduler,
    ) {
        registers.update(regs::RTCNT, |v| v & 0xff);
        if Self::refresh_active(registers) {
            self.recompute_refresh(scheduler.now(), registers, clocks, scheduler);
        }
    }

    pub fn write_rtcor(
        &mut self,
        registers: &mut RegisterFile,
        clocks: &Clocks,
        scheduler: &mut Scheduler,
    ) {
        registers.update(regs::RTCOR, |v| v & 0xff);
        let divisor = refresh_divisor(registers.get(regs::RTCSR));
        if divisor != 0 {
            let count = self.compute_ticks(divisor, clocks, scheduler);
            registers.set(regs::RTCNT, count);
            self.recompute_refresh(scheduler.now(), registers, clocks, scheduler);
        }
    }

    pub fn write_rfcr(registers: &mut RegisterFile) {
        registers.update(regs::RFCR, |v| v & 1023);
    }

    /// Compare match due at `deadline`: restart from zero and advance the refresh counter.
    pub fn refresh_timer_expired(
        &mut self,
        deadline: u64,
        registers: &mut RegisterFile,
        clocks: &Clocks,
        scheduler: &mut Scheduler,
    ) {
        registers.set(regs::RTCNT, 0);
        self.recompute_refresh(deadline, registers, clocks, scheduler);
        registers.update(regs::RTCSR, |v| v | RTCSR_CMF);

        let mcr = registers.get(regs::MCR);
        if mcr & MCR_RFSH != 0 && mcr & MCR_RMODE == 0 {
            let rfcr = (registers.get(regs::RFCR) + 1) & 1023;
            registers.set(regs::RFCR, rfcr);

            let limit_512 = registers.get(regs::RTCSR) & RTCSR_LMTS != 0;
            if (limit_512 && rfcr == 512) || rfcr == 0 {
                registers.set(regs::RFCR, 0);
                registers.update(regs::RTCSR, |v| v | RTCSR_OVF);
            }
        }
    }

    fn ports_enabled(registers: &RegisterFile) -> bool {
        registers.get(regs::BCR2).check_bit(0)
    }

    pub fn write_pctra(&mut self, registers: &RegisterFile, devices: &mut dyn Sh4Devices) {
        let (direction, pullup) = decode_port_control(registers.get(regs::PCTRA), 16);
        self.port16_direction = direction;
        self.port16_pullup = pullup;
        self.write_pdtra(registers, devices);
    }

    pub fn write_pdtra(&self, registers: &RegisterFile, devices: &mut dyn Sh4Devices) {
        if Self::ports_enabled(registers) {
            let data = (registers.get(regs::PDTRA) & self.port16_direction) as u64
                | (registers.get(regs::PCTRA) as u64) << 16;
            devices.port_write(IoPort::Port16, data);
        }
    }

    pub fn write_pctrb(&mut self, registers: &RegisterFile, devices: &mut dyn Sh4Devices) {
        let (direction, pullup) = decode_port_control(registers.get(regs::PCTRB), 4);
        self.port4_direction = direction;
        self.port4_pullup = pullup;
        self.write_pdtrb(registers, devices);
    }

    pub fn write_pdtrb(&self, registers: &RegisterFile, devices: &mut dyn Sh4Devices) {
        if Self::ports_enabled(registers) {
            let data = (registers.get(regs::PDTRB) & self.port4_direction) as u64
                | (registers.get(regs::PCTRB) as u64) << 16;
            devices.port_write(IoPort::Port4, data);
        }
    }

    /// Input pins come from the device, output pins from PDTRx.
    pub fn read_pdtra(&self, registers: &RegisterFile, devices: &mut dyn Sh4Devices) -> u32 {
        let latched = registers.get(regs::PDTRA);
        if Self::ports_enabled(registers) {
            (devices.port_read(IoPort::Port16) & !self.port16_direction)
                | (latched & self.port16_direction)
        } else {
            latched
        }
    }

    pub fn read_pdtrb(&self, registers: &RegisterFile, devices: &mut dyn Sh4Devices) -> u32 {
        let latched = registers.get(regs::PDTRB);
        if Self::ports_enabled(registers) {
            (devices.port_read(IoPort::Port4) & !self.port4_direction)
                | (latched & self.port4_direction)
        } else {
            latched
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Pins {
        writes: Vec<(IoPort, u64)>,
        input: u32,
    }

    impl Sh4Devices for Pins {
        fn port_write(&mut self, port: IoPort, value: u64) {
            self.writes.push((port, value));
        }

        fn port_read(&mut self, _port: IoPort) -> u32 {
            self.input
        }
    }

    #[test]
    fn port_control_decodes_direction_and_pullup() {
        // pin 0 output, pin 1 pull-up off, pins 2 and 3 pulled up
        let (direction, pullup) = decode_port_control(0b00_10_01, 4);
        assert_eq!(direction, 0b0001);
        assert_eq!(pullup, 0b1100);
    }

    #[test]
    fn port_writes_reach_the_device_only_when_enabled() {
        let mut registers = RegisterFile::new();
        let mut bsc = Bsc::new();
        let mut pins = Pins::default();

        registers.set(regs::PCTRA, 0x0005); // pins 0 and 1 output
        registers.set(regs::PDTRA, 0x000f);
        bsc.write_pctra(&registers, &mut pins);
        assert!(pins.writes.is_empty());

        registers.set(regs::BCR2, 1);
        bsc.write_pdtra(&registers, &mut pins);
        assert_eq!(pins.writes, vec![(IoPort::Port16, 0x0005_0003)]);
    }

    #[test]
    fn port_reads_mix_inputs_and_latched_outputs() {
        let mut registers = RegisterFile::new();
        let mut bsc = Bsc::new();
        let mut pins = Pins {
            input: 0xfff0,
            ..Default::default()
        };

        registers.set(regs::BCR2, 1);
        registers.set(regs::PCTRB, 0x01);
        registers.set(regs::PDTRB, 0x1);
        bsc.write_pctrb(&registers, &mut pins);

        assert_eq!(bsc.read_pdtrb(&registers, &mut pins), 0xfff1);
    }

    #[test]
    fn divisor_change_keeps_elapsed_ticks() {
        let clocks = Clocks::default();
        let mut scheduler = Scheduler::new();
        let mut registers = RegisterFile::new();
        let mut bsc = Bsc::new();

        registers.set(regs::RTCOR, 200);
        registers.set(regs::RTCSR, 1 << 3); // /4 of 100 MHz = 8 cpu cycles per tick
        bsc.write_rtcsr(0, &mut registers, &clocks, &mut scheduler);
        assert_eq!(scheduler.remaining(SH4EventData::RefreshTimer), Some(200 * 8));

        scheduler.add_cycles(80);
        assert_eq!(bsc.read_refresh_count(&registers, &clocks, &scheduler), 10);

        let old = registers.get(regs::RTCSR);
        registers.set(regs::RTCSR, 2 << 3); // /16
        bsc.write_rtcsr(old, &mut registers, &clocks, &mut scheduler);

        assert_eq!(registers.get(regs::RTCNT), 10);
        assert_eq!(scheduler.remaining(SH4EventData::RefreshTimer), Some(190 * 32));

        // stopping latches the count too
        let old = registers.get(regs::RTCSR);
        scheduler.add_cycles(64);
        registers.set(regs::RTCSR, 0);
        bsc.write_rtcsr(old, &mut registers, &clocks, &mut scheduler);
        assert_eq!(registers.get(regs::RTCNT), 12);
        assert!(!scheduler.is_scheduled(SH4EventData::RefreshTimer));
    }

    #[test]
    fn compare_match_counts_refreshes() {
        let clocks = Clocks::default();
        let mut scheduler = Scheduler::new();
        let mut registers = RegisterFile::new();
        let mut bsc = Bsc::new();

        registers.set(regs::RTCSR, (1 << 3) | RTCSR_LMTS);
        registers.set(regs::MCR, MCR_RFSH);
        registers.set(regs::RFCR, 511);
        registers.set(regs::RTCNT, 77);

        bsc.refresh_timer_expired(0, &mut registers, &clocks, &mut scheduler);
        assert_eq!(registers.get(regs::RTCNT), 0);
        assert_eq!(registers.get(regs::RFCR), 0);
        assert_ne!(registers.get(regs::RTCSR) & RTCSR_CMF, 0);
        assert_ne!(registers.get(regs::RTCSR) & RTCSR_OVF, 0);
        assert!(scheduler.is_scheduled(SH4EventData::RefreshTimer));
    }

    #[test]
    fn late_pass_catches_up_every_compare_match() {
        let clocks = Clocks::default();
        let mut scheduler = Scheduler::new();
        let mut registers = RegisterFile::new();
        let mut bsc = Bsc::new();

        registers.set(regs::MCR, MCR_RFSH);
        registers.set(regs::RTCOR, 10);
        registers.set(regs::RTCSR, 1 << 3); // 8 cpu cycles per count, 80 per match
        bsc.write_rtcsr(0, &mut registers, &clocks, &mut scheduler);

        scheduler.add_cycles(250);
        while let Some(event) = scheduler.tick() {
            bsc.refresh_timer_expired(event.deadline, &mut registers, &clocks, &mut scheduler);
        }

        assert_eq!(registers.get(regs::RFCR), 3);
        assert_eq!(scheduler.remaining(SH4EventData::RefreshTimer), Some(70));
        assert_eq!(bsc.read_refresh_count(&registers, &clocks, &scheduler), 1);
    }

    #[test]
    fn register_widths_are_clamped() {
        let mut registers = RegisterFile::new();
        registers.set(regs::RFCR, 0xffff);
        Bsc::write_rfcr(&mut registers);
        assert_eq!(registers.get(regs::RFCR), 1023);
    }
}
