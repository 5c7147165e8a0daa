// timers
//
// Channels are not stepped. A running channel keeps the TCNT it was armed with
// and an underflow event; reads compute the live count from elapsed time.
use serde::{Deserialize, Serialize};

use super::{
    intc::ExceptionSource,
    regs::{self, RegisterFile},
    SH4EventData,
};
use crate::{config::Clocks, hw::extensions::BitManipulation, scheduler::Scheduler};

pub const CHANNELS: usize = 3;

/// Peripheral clock divisor per TCR.TPSC; 5-7 (external, rtc) are treated as 1.
pub const DIVISORS: [u64; 8] = [4, 16, 64, 256, 1024, 1, 1, 1];

pub const TCR_UNIE: usize = 5;
pub const TCR_UNF: usize = 8;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Tmu {
    /// TCNT at the moment each channel was (re)armed.
    base: [u32; CHANNELS],
}

impl Tmu {
    pub fn new() -> Self {
        Self::default()
    }

    fn divisor(tcr: u32) -> u64 {
        DIVISORS[(tcr & 7) as usize]
    }

    pub fn is_running(registers: &RegisterFile, channel: usize) -> bool {
        registers.get(regs::TSTR).check_bit(channel)
    }

    fn count_with(
        &self,
        channel: usize,
        divisor: u64,
        clocks: &Clocks,
        scheduler: &Scheduler,
    ) -> u32 {
        let elapsed = scheduler.elapsed(SH4EventData::TmuUnderflow { channel });
        let ticks = clocks.ticks_in(elapsed, clocks.peripheral, divisor);
        self.base[channel].saturating_sub(ticks.min(u32::MAX as u64) as u32)
    }

    /// Live TCNT of a channel.
    pub fn read_count(
        &self,
        channel: usize,
        registers: &RegisterFile,
        clocks: &Clocks,
        scheduler: &Scheduler,
    ) -> u32 {
        if Self::is_running(registers, channel) {
            let divisor = Self::divisor(registers.get(regs::tcr(channel)));
            self.count_with(channel, divisor, clocks, scheduler)
        } else {
            registers.get(regs::tcnt(channel))
        }
    }

    fn snapshot(
        &mut self,
        channel: usize,
        divisor: u64,
        registers: &mut RegisterFile,
        clocks: &Clocks,
        scheduler: &Scheduler,
    ) {
        let count = self.count_with(channel, divisor, clocks, scheduler);
        registers.set(regs::tcnt(channel), count);
    }

    /// Arms the underflow counting from cycle `start`.
    fn arm(
        &mut self,
        channel: usize,
        start: u64,
        registers: &RegisterFile,
        clocks: &Clocks,
        scheduler: &mut Scheduler,
    ) {
        let event = SH4EventData::TmuUnderflow { channel };
        if !Self::is_running(registers, channel) {
            scheduler.cancel(event);
            return;
        }

        let tcnt = registers.get(regs::tcnt(channel));
        let divisor = Self::divisor(registers.get(regs::tcr(channel)));
        self.base[channel] = tcnt;

        // counting down through zero takes tcnt + 1 ticks
        let ticks = (tcnt as u64 + 1) * divisor;
        scheduler.reschedule_at(start, clocks.to_cpu_cycles(clocks.peripheral, ticks), event);
    }

    pub fn write_start(
        &mut self,
        old_tstr: u32,
        registers: &mut RegisterFile,
        clocks: &Clocks,
        scheduler: &mut Scheduler,
    ) {
        for channel in 0..CHANNELS {
            let was_running = old_tstr.check_bit(channel);
            let running = Self::is_running(registers, channel);
            if was_running == running {
                continue;
            }

            if was_running {
                let divisor = Self::divisor(registers.get(regs::tcr(channel)));
                self.snapshot(channel, divisor, registers, clocks, scheduler);
            }
            self.arm(channel, scheduler.now(), registers, clocks, scheduler);
        }
    }

    pub fn write_control(
        &mut self,
        channel: usize,
        old_tcr: u32,
        registers: &mut RegisterFile,
        clocks: &Clocks,
        scheduler: &mut Scheduler,
    ) {
        if Self::is_running(registers, channel) {
            self.snapshot(channel, Self::divisor(old_tcr), registers, clocks, scheduler);
            self.arm(channel, scheduler.now(), registers, clocks, scheduler);
        }
    }

    pub fn write_count(
        &mut self,
        channel: usize,
        registers: &RegisterFile,
        clocks: &Clocks,
        scheduler: &mut Scheduler,
    ) {
        if Self::is_running(registers, channel) {
            self.arm(channel, scheduler.now(), registers, clocks, scheduler);
        }
    }

    /// Reload from TCOR and flag UNF for the underflow due at `deadline`.
    /// Returns the interrupt to request, if enabled.
    pub fn underflow(
        &mut self,
        channel: usize,
        deadline: u64,
        registers: &mut RegisterFile,
        clocks: &Clocks,
        scheduler: &mut Scheduler,
    ) -> Option<ExceptionSource> {
        registers.set(regs::tcnt(channel), registers.get(regs::tcor(channel)));
        self.arm(channel, deadline, registers, clocks, scheduler);

        registers.update(regs::tcr(channel), |tcr| tcr.set_bit(TCR_UNF));
        registers
            .get(regs::tcr(channel))
            .check_bit(TCR_UNIE)
            .then(|| ExceptionSource::tuni(channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(tmu: &mut Tmu, registers: &mut RegisterFile, clocks: &Clocks, scheduler: &mut Scheduler, tstr: u32) {
        let old = registers.get(regs::TSTR);
        registers.set(regs::TSTR, tstr);
        tmu.write_start(old, registers, clocks, scheduler);
    }

    #[test]
    fn running_channel_counts_down_from_elapsed_time() {
        let clocks = Clocks::default();
        let mut scheduler = Scheduler::new();
        let mut registers = RegisterFile::new();
        let mut tmu = Tmu::new();

        registers.set(regs::tcnt(0), 1000);
        registers.set(regs::tcr(0), 0); // /4 of 50 MHz = 16 cpu cycles per tick
        start(&mut tmu, &mut registers, &clocks, &mut scheduler, 1);

        assert_eq!(
            scheduler.remaining(SH4EventData::TmuUnderflow { channel: 0 }),
            Some(1001 * 16)
        );

        scheduler.add_cycles(160);
        assert_eq!(tmu.read_count(0, &registers, &clocks, &scheduler), 990);

        // stopping latches the live count
        start(&mut tmu, &mut registers, &clocks, &mut scheduler, 0);
        assert_eq!(registers.get(regs::tcnt(0)), 990);
        assert!(!scheduler.is_scheduled(SH4EventData::TmuUnderflow { channel: 0 }));
    }

    #[test]
    fn divisor_change_snapshots_with_the_old_divisor() {
        let clocks = Clocks::default();
        let mut scheduler = Scheduler::new();
        let mut registers = RegisterFile::new();
        let mut tmu = Tmu::new();

        registers.set(regs::tcnt(1), 100);
        start(&mut tmu, &mut registers, &clocks, &mut scheduler, 2);
        scheduler.add_cycles(32); // two ticks at /4

        let old = registers.get(regs::tcr(1));
        registers.set(regs::tcr(1), 1); // /16
        tmu.write_control(1, old, &mut registers, &clocks, &mut scheduler);

        assert_eq!(registers.get(regs::tcnt(1)), 98);
        assert_eq!(
            scheduler.remaining(SH4EventData::TmuUnderflow { channel: 1 }),
            Some(99 * 64)
        );
    }

    #[test]
    fn underflow_reloads_and_requests_tuni() {
        let clocks = Clocks::default();
        let mut scheduler = Scheduler::new();
        let mut registers = RegisterFile::new();
        let mut tmu = Tmu::new();

        registers.set(regs::tcor(2), 50);
        registers.set(regs::tcr(2), 1 << TCR_UNIE);
        start(&mut tmu, &mut registers, &clocks, &mut scheduler, 4);

        let source = tmu.underflow(2, 0, &mut registers, &clocks, &mut scheduler);
        assert_eq!(source, Some(ExceptionSource::TUNI2));
        assert_eq!(registers.get(regs::tcnt(2)), 50);
        assert!(registers.get(regs::tcr(2)).check_bit(TCR_UNF));
        assert!(scheduler.is_scheduled(SH4EventData::TmuUnderflow { channel: 2 }));

        registers.set(regs::tcr(2), 0);
        assert_eq!(tmu.underflow(2, 0, &mut registers, &clocks, &mut scheduler), None);
    }
}
