// real time clock
//
// The calendar lives in the BCD counter registers. A 128 Hz tick drives R64CNT
// and every 64 ticks the seconds counter carries upwards.
use chrono::{Datelike, NaiveDateTime, Timelike};
use log::debug;

use super::{
    regs::{self, RegisterFile},
    SH4EventData,
};
use crate::{config::Clocks, scheduler::Scheduler};

const DAYS_IN_MONTH: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

pub const TICK_HZ: u64 = 128;

const RCR1_CF: u32 = 0x80;
const RCR2_RESET: u32 = 0x02;
const RCR2_ADJ: u32 = 0x04;
const RCR2_START: u32 = 0x08;

fn bcd_to_decimal(value: u32) -> u32 {
    (value & 0xf) + ((value >> 4) & 0xf) * 10 + ((value >> 8) & 0xf) * 100 + ((value >> 12) & 0xf) * 1000
}

fn decimal_to_bcd(mut value: u32) -> u32 {
    let mut bcd = 0;
    let mut shift = 0;
    while value > 0 {
        bcd |= (value % 10) << shift;
        value /= 10;
        shift += 4;
    }
    bcd
}

/// Adds `carry` to a two digit BCD counter, fixing up the low digit.
fn bcd_add(value: u32, carry: u32) -> u32 {
    let value = value + carry;
    if value & 0xf == 0xa {
        value + 6
    } else {
        value
    }
}

fn is_leap_year(year: u32) -> bool {
    if year % 100 == 0 {
        year % 400 == 0
    } else {
        year % 4 == 0
    }
}

fn tick_period(clocks: &Clocks) -> u64 {
    clocks.cpu / TICK_HZ
}

/// Advances the calendar by one second, or by one minute when `minute_carry` is set.
pub fn increment_time(registers: &mut RegisterFile, minute_carry: bool) {
    let mut carry = 1;

    if !minute_carry {
        let seconds = bcd_add(registers.get(regs::RSECCNT), 1);
        if seconds == 0x60 {
            registers.set(regs::RSECCNT, 0);
        } else {
            registers.set(regs::RSECCNT, seconds);
            return;
        }
    }

    let mut minutes = bcd_add(registers.get(regs::RMINCNT), carry);
    carry = 0;
    if minutes == 0x60 {
        minutes = 0;
        carry = 1;
    }
    registers.set(regs::RMINCNT, minutes);

    let mut hours = bcd_add(registers.get(regs::RHRCNT), carry);
    carry = 0;
    if hours == 0x24 {
        hours = 0;
        carry = 1;
    }
    registers.set(regs::RHRCNT, hours);

    let mut weekday = registers.get(regs::RWKCNT) + carry;
    if weekday == 7 {
        weekday = 0;
    }
    registers.set(regs::RWKCNT, weekday);

    let year = bcd_to_decimal(registers.get(regs::RYRCNT));
    let month = registers.get(regs::RMONCNT);
    let mut days = 0;
    if month != 0 {
        let index = (bcd_to_decimal(month).clamp(1, 12) - 1) as usize;
        days = DAYS_IN_MONTH[index];
    }
    if month == 2 && is_leap_year(year) {
        days += 1;
    }

    let mut day = bcd_add(registers.get(regs::RDAYCNT), carry);
    carry = 0;
    if bcd_to_decimal(day) > days {
        day = 1;
        carry = 1;
    }
    registers.set(regs::RDAYCNT, day);

    let mut month = bcd_add(month, carry);
    carry = 0;
    if month == 0x13 {
        month = 1;
        carry = 1;
    }
    registers.set(regs::RMONCNT, month);

    let mut year = registers.get(regs::RYRCNT) + carry;
    if year & 0xf >= 0xa {
        year += 6;
    }
    if year & 0xf0 >= 0xa0 {
        year += 0x60;
    }
    if year & 0xf00 >= 0xa00 {
        year += 0x600;
    }
    if year & 0xf000 >= 0xa000 {
        year = 0;
    }
    registers.set(regs::RYRCNT, year);
}

/// One 1/128 s tick. `deadline` is when this tick was due; the next one is
/// armed a period after it.
pub fn tick(registers: &mut RegisterFile, clocks: &Clocks, scheduler: &mut Scheduler, deadline: u64) {
    scheduler.reschedule_at(deadline, tick_period(clocks), SH4EventData::RtcTick);

    let r64cnt = (registers.get(regs::R64CNT) + 1) & 0x7f;
    registers.set(regs::R64CNT, r64cnt);
    if r64cnt == 64 {
        registers.update(regs::RCR1, |v| v | RCR1_CF);
        increment_time(registers, false);
    }
}

pub fn write_rcr1(old: u32, registers: &mut RegisterFile) {
    let rcr1 = registers.get(regs::RCR1);
    if rcr1 & 8 != 0 && old & 8 == 0 {
        registers.set(regs::RCR1, rcr1 ^ 1);
    }
}

pub fn write_rcr2(
    old: u32,
    registers: &mut RegisterFile,
    clocks: &Clocks,
    scheduler: &mut Scheduler,
) {
    if registers.get(regs::RCR2) & RCR2_RESET != 0 {
        registers.set(regs::R64CNT, 0);
        registers.update(regs::RCR2, |v| v ^ RCR2_RESET);
    }

    if registers.get(regs::RCR2) & RCR2_ADJ != 0 {
        registers.set(regs::R64CNT, 0);
        if registers.get(regs::RSECCNT) >= 0x30 {
            increment_time(registers, true);
        }
        registers.set(regs::RSECCNT, 0);
    }

    let rcr2 = registers.get(regs::RCR2);
    if rcr2 & RCR2_START != 0 && old & RCR2_START == 0 {
        debug!("rtc: started");
        scheduler.reschedule(tick_period(clocks), SH4EventData::RtcTick);
    } else if rcr2 & RCR2_START == 0 {
        scheduler.cancel(SH4EventData::RtcTick);
    }
}

/// Loads the BCD counters from a host date and time.
pub fn set_calendar(registers: &mut RegisterFile, now: NaiveDateTime) {
    registers.set(regs::RSECCNT, decimal_to_bcd(now.second()));
    registers.set(regs::RMINCNT, decimal_to_bcd(now.minute()));
    registers.set(regs::RHRCNT, decimal_to_bcd(now.hour()));
    registers.set(regs::RWKCNT, now.weekday().num_days_from_sunday());
    registers.set(regs::RDAYCNT, decimal_to_bcd(now.day()));
    registers.set(regs::RMONCNT, decimal_to_bcd(now.month()));
    registers.set(regs::RYRCNT, decimal_to_bcd(now.year().clamp(0, 9999) as u32));
}
