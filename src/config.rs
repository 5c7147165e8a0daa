use serde::{Deserialize, Serialize};

use crate::hw::sh4::Sh4Error;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum CpuKind {
    #[default]
    Sh4,
    /// Best-effort only; the exception path is not verified against hardware.
    Sh3,
}

/// Levels of the MD pins sampled at power-on reset.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ModePins {
    /// Input clock in Hz.
    pub clock: u64,
    pub md0: bool,
    pub md1: bool,
    pub md2: bool,
    /// Low selects slave mode.
    pub md7: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Clocks {
    pub cpu: u64,
    pub bus: u64,
    pub peripheral: u64,
    pub is_slave: bool,
}

impl Default for Clocks {
    fn default() -> Self {
        Self {
            cpu: 200_000_000,
            bus: 100_000_000,
            peripheral: 50_000_000,
            is_slave: false,
        }
    }
}

impl Clocks {
    /// Converts `ticks` of a clock running at `hertz` into CPU cycles.
    pub fn to_cpu_cycles(&self, hertz: u64, ticks: u64) -> u64 {
        ((ticks as u128 * self.cpu as u128) / hertz as u128) as u64
    }

    /// Number of whole `hertz / divisor` ticks that fit in `cycles` CPU cycles.
    pub fn ticks_in(&self, cycles: u64, hertz: u64, divisor: u64) -> u64 {
        ((cycles as u128 * hertz as u128) / (self.cpu as u128 * divisor as u128)) as u64
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Sh4Config {
    pub kind: CpuKind,
    /// `None` selects a 200/100/50 MHz master setup.
    pub pins: Option<ModePins>,
}

impl Sh4Config {
    pub fn from_ron(text: &str) -> Result<Self, Sh4Error> {
        let config: Sh4Config = ron::from_str(text)?;
        config.clocks()?;
        Ok(config)
    }

    pub fn clocks(&self) -> Result<Clocks, Sh4Error> {
        let Some(pins) = self.pins else {
            return Ok(Clocks::default());
        };

        let mode = (pins.md2 as u8) << 2 | (pins.md1 as u8) << 1 | pins.md0 as u8;
        let (bus, peripheral) = match mode {
            0 => (pins.clock / 4, pins.clock / 4),
            1 => (pins.clock / 6, pins.clock / 6),
            2 | 3 => (pins.clock / 3, pins.clock / 6),
            4 | 5 => (pins.clock / 2, pins.clock / 4),
            _ => return Err(Sh4Error::UnsupportedClockMode(mode)),
        };

        Ok(Clocks {
            cpu: pins.clock,
            bus,
            peripheral,
            is_slave: !pins.md7,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_clocks() {
        let clocks = Sh4Config::default().clocks().unwrap();
        assert_eq!(clocks.cpu, 200_000_000);
        assert_eq!(clocks.bus, 100_000_000);
        assert_eq!(clocks.peripheral, 50_000_000);
        assert!(!clocks.is_slave);
    }

    #[test]
    fn mode_pins_from_ron() {
        let config = Sh4Config::from_ron(
            "(kind: Sh4, pins: Some((clock: 200000000, md0: false, md1: true, md2: false, md7: false)))",
        )
        .unwrap();

        let clocks = config.clocks().unwrap();
        assert_eq!(clocks.bus, 66_666_666);
        assert_eq!(clocks.peripheral, 33_333_333);
        assert!(clocks.is_slave);
    }

    #[test]
    fn reserved_modes_are_rejected() {
        let config = Sh4Config {
            kind: CpuKind::Sh4,
            pins: Some(ModePins {
                clock: 200_000_000,
                md0: false,
                md1: true,
                md2: true,
                md7: true,
            }),
        };

        assert!(matches!(
            config.clocks(),
            Err(Sh4Error::UnsupportedClockMode(6))
        ));
        assert!(Sh4Config::from_ron("(kind: Sh5)").is_err());
    }

    #[test]
    fn tick_conversions() {
        let clocks = Clocks::default();
        // 10 bus ticks at 100 MHz are 20 cpu cycles at 200 MHz
        assert_eq!(clocks.to_cpu_cycles(clocks.bus, 10), 20);
        // 400 cpu cycles = 200 bus ticks = 50 ticks of a /4 divider
        assert_eq!(clocks.ticks_in(400, clocks.bus, 4), 50);
    }
}
