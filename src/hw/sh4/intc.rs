// interrupt controller
//
// Every exception source, synchronous or not, lives in one table. A source has a
// requesting flag and a packed priority key `level << 16 | sub << 8 | id`:
//   level 3  nmi
//   level 2  general exceptions and traps
//   level 1  resets and tlb multi-hit
//   level 0  maskable interrupts, sub is the IRL or IPR priority (0-15)
// `key >> 8` is compared against SR.IMASK, so anything above level 0 always
// clears the mask.
use serde::{Deserialize, Serialize};

use super::Sh4Error;

#[allow(non_camel_case_types)]
#[repr(usize)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ExceptionSource {
    // resets
    PowerOnReset,
    ManualReset,
    HudiReset,
    ItlbMultiHit,
    DtlbMultiHit,

    // general exceptions
    UserBreakBefore,
    InstructionAddressError,
    ItlbMiss,
    ItlbProtection,
    IllegalInstruction,
    SlotIllegalInstruction,
    FpuDisable,
    SlotFpuDisable,
    DataAddressErrorRead,
    DataAddressErrorWrite,
    DtlbMissRead,
    DtlbMissWrite,
    DtlbProtectionRead,
    DtlbProtectionWrite,
    FpuException,
    InitialPageWrite,
    Trap,
    UserBreakAfter,

    NMI,

    // level encoded irl, IRLn0 is the highest level
    IRLn0,
    IRLn1,
    IRLn2,
    IRLn3,
    IRLn4,
    IRLn5,
    IRLn6,
    IRLn7,
    IRLn8,
    IRLn9,
    IRLnA,
    IRLnB,
    IRLnC,
    IRLnD,
    IRLnE,

    // discrete irl lines
    IRL0,
    IRL1,
    IRL2,
    IRL3,

    // on-chip peripherals
    HUDI,
    GPOI,
    DMTE0,
    DMTE1,
    DMTE2,
    DMTE3,
    DMTE4,
    DMTE5,
    DMTE6,
    DMTE7,
    DMAE,
    TUNI3,
    TUNI4,
    TUNI0,
    TUNI1,
    TUNI2,
    TICPI2,
    ATI,
    PRI,
    CUI,
    SCI1_ERI,
    SCI1_RXI,
    SCI1_TXI,
    SCI1_TEI,
    SCIF_ERI,
    SCIF_RXI,
    SCIF_BRI,
    SCIF_TXI,
    ITI,
    RCMI,
    ROVI,
}

pub const SOURCE_COUNT: usize = ExceptionSource::ROVI as usize + 1;

const CODES: [u32; SOURCE_COUNT] = [
    0x000, 0x020, 0x000, 0x140, 0x140, // resets
    0x1e0, 0x0e0, 0x040, 0x0a0, 0x180, 0x1a0, 0x800, 0x820, 0x0e0, 0x100, 0x040, 0x060, 0x0a0,
    0x0c0, 0x120, 0x080, 0x160, 0x1e0, // general
    0x1c0, // nmi
    0x200, 0x220, 0x240, 0x260, 0x280, 0x2a0, 0x2c0, 0x2e0, 0x300, 0x320, 0x340, 0x360, 0x380,
    0x3a0, 0x3c0, // IRLn
    0x240, 0x2a0, 0x300, 0x360, // IRL0-3
    0x600, 0x620, 0x640, 0x660, 0x680, 0x6a0, 0x780, 0x7a0, 0x7c0, 0x7e0, 0x6c0, // hudi, gpoi, dmac
    0xb00, 0xb80, 0x400, 0x420, 0x440, 0x460, // tmu
    0x480, 0x4a0, 0x4c0, // rtc
    0x4e0, 0x500, 0x520, 0x540, // sci1
    0x700, 0x720, 0x740, 0x760, // scif
    0x560, 0x580, 0x5a0, // wdt, refresh
];

// hardware priority classes of the synchronous sources, 1 is the most urgent
const RESET_CLASSES: [u32; 5] = [1, 2, 1, 3, 4];
const GENERAL_CLASSES: [u32; 18] = [0, 1, 2, 3, 4, 4, 4, 4, 5, 5, 6, 6, 7, 7, 8, 9, 4, 10];

impl ExceptionSource {
    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        if index < SOURCE_COUNT {
            // SAFETY: repr(usize) with contiguous discriminants 0..SOURCE_COUNT
            Some(unsafe { std::mem::transmute::<usize, ExceptionSource>(index) })
        } else {
            None
        }
    }

    /// Value written to INTEVT/EXPEVT when this source is taken.
    pub fn code(self) -> u32 {
        CODES[self as usize]
    }

    pub fn is_reset(self) -> bool {
        self.index() <= ExceptionSource::DtlbMultiHit.index()
    }

    /// Resets, faults and traps; everything below NMI.
    pub fn is_synchronous(self) -> bool {
        self.index() < ExceptionSource::NMI.index()
    }

    pub fn is_discrete_irl(self) -> bool {
        (ExceptionSource::IRL0.index()..=ExceptionSource::IRL3.index()).contains(&self.index())
    }

    /// Cleared by the controller itself when the exception is taken.
    pub fn auto_clears(self) -> bool {
        matches!(
            self,
            ExceptionSource::NMI
                | ExceptionSource::DMTE0
                | ExceptionSource::DMTE1
                | ExceptionSource::DMTE2
                | ExceptionSource::DMTE3
        ) || self.is_synchronous()
    }

    pub fn irln(level: usize) -> Self {
        assert!(level < 15, "irl level out of range");
        Self::from_index(ExceptionSource::IRLn0.index() + level).unwrap_or(ExceptionSource::IRLnE)
    }

    /// One of the four discrete IRL inputs.
    pub fn irl(line: usize) -> Self {
        [
            ExceptionSource::IRL0,
            ExceptionSource::IRL1,
            ExceptionSource::IRL2,
            ExceptionSource::IRL3,
        ][line]
    }

    pub fn dmte(channel: usize) -> Self {
        [
            ExceptionSource::DMTE0,
            ExceptionSource::DMTE1,
            ExceptionSource::DMTE2,
            ExceptionSource::DMTE3,
        ][channel]
    }

    pub fn tuni(channel: usize) -> Self {
        [ExceptionSource::TUNI0, ExceptionSource::TUNI1, ExceptionSource::TUNI2][channel]
    }
}

pub const fn priority_key(level: u32, sub: u32, source: ExceptionSource) -> u32 {
    (level << 16) | (sub << 8) | source as u32
}

/// Level plus sub-priority, the part of the key compared against the mask.
pub const fn effective_level(key: u32) -> u32 {
    key >> 8
}

pub fn default_priorities() -> Vec<u32> {
    use ExceptionSource::*;

    let mut table = vec![0; SOURCE_COUNT];
    for (i, class) in RESET_CLASSES.iter().enumerate() {
        table[i] = (1 << 16) | ((10 - class) << 8) | i as u32;
    }
    for (i, class) in GENERAL_CLASSES.iter().enumerate() {
        let id = UserBreakBefore.index() + i;
        table[id] = (2 << 16) | ((10 - class) << 8) | id as u32;
    }
    table[NMI.index()] = priority_key(3, 16, NMI);

    for level in 0..15 {
        let source = ExceptionSource::irln(level);
        table[source.index()] = priority_key(0, 15 - level as u32, source);
    }
    table[IRL0.index()] = priority_key(0, 13, IRL0);
    table[IRL1.index()] = priority_key(0, 10, IRL1);
    table[IRL2.index()] = priority_key(0, 7, IRL2);
    table[IRL3.index()] = priority_key(0, 4, IRL3);

    for id in HUDI.index()..SOURCE_COUNT {
        table[id] = id as u32;
    }
    table
}

/// Sources sharing each nibble of IPRA, IPRB and IPRC, lowest nibble first.
pub fn ipr_sources(ipr: usize, nibble: usize) -> &'static [ExceptionSource] {
    use ExceptionSource::*;

    const IPRA: [&[ExceptionSource]; 4] = [&[ATI, PRI, CUI], &[TUNI2, TICPI2], &[TUNI1], &[TUNI0]];
    const IPRB: [&[ExceptionSource]; 4] = [
        &[],
        &[SCI1_ERI, SCI1_RXI, SCI1_TXI, SCI1_TEI],
        &[RCMI, ROVI],
        &[ITI],
    ];
    const IPRC: [&[ExceptionSource]; 4] = [
        &[HUDI],
        &[SCIF_ERI, SCIF_RXI, SCIF_BRI, SCIF_TXI],
        &[DMTE0, DMTE1, DMTE2, DMTE3, DMAE],
        &[GPOI],
    ];

    match ipr {
        0 => IPRA[nibble],
        1 => IPRB[nibble],
        2 => IPRC[nibble],
        _ => &[],
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Intc {
    requesting: Vec<bool>,
    priorities: Vec<u32>,
    pending: u32,
    /// Sticky flag polled by the instruction core at every boundary.
    pub test_irq: bool,
    #[serde(skip)]
    pub recompute_count: u64,
}

impl Default for Intc {
    fn default() -> Self {
        Self::new()
    }
}

impl Intc {
    pub fn new() -> Self {
        Self {
            requesting: vec![false; SOURCE_COUNT],
            priorities: default_priorities(),
            pending: 0,
            test_irq: false,
            recompute_count: 0,
        }
    }

    pub fn is_requesting(&self, source: ExceptionSource) -> bool {
        self.requesting[source.index()]
    }

    pub fn pending_count(&self) -> u32 {
        self.pending
    }

    pub fn priority(&self, source: ExceptionSource) -> u32 {
        self.priorities[source.index()]
    }

    pub fn request(&mut self, source: ExceptionSource, sr: u32) {
        if !self.requesting[source.index()] {
            #[cfg(feature = "log_ints")]
            log::debug!("intc: request {:?}", source);

            self.requesting[source.index()] = true;
            self.pending += 1;
            self.recompute(sr);
        }
    }

    pub fn unrequest(&mut self, source: ExceptionSource, sr: u32) {
        if self.requesting[source.index()] {
            self.requesting[source.index()] = false;
            self.pending -= 1;
            self.recompute(sr);
        }
    }

    pub fn recompute(&mut self, sr: u32) {
        self.recompute_count += 1;
        self.test_irq = false;

        let blocked = sr & (1 << 28) != 0;
        if self.pending == 0 || (blocked && !self.is_requesting(ExceptionSource::NMI)) {
            return;
        }

        let imask = (sr >> 4) & 0xf;
        self.test_irq = self
            .requesting
            .iter()
            .zip(&self.priorities)
            .any(|(&requesting, &key)| requesting && effective_level(key) > imask);
    }

    /// The requesting source with the greatest priority key.
    pub fn highest_pending(&self) -> Option<ExceptionSource> {
        self.requesting
            .iter()
            .zip(&self.priorities)
            .enumerate()
            .filter(|(_, (&requesting, _))| requesting)
            .max_by_key(|(_, (_, &key))| key)
            .and_then(|(id, _)| ExceptionSource::from_index(id))
    }

    /// Sets the maskable priority (0-15) of a peripheral or IRL source.
    pub fn set_interrupt_priority(
        &mut self,
        source: ExceptionSource,
        priority: u32,
    ) -> Result<(), Sh4Error> {
        if priority > 15 {
            return Err(Sh4Error::PriorityOutOfRange { priority });
        }
        if source.index() <= ExceptionSource::NMI.index() {
            return Err(Sh4Error::PriorityOutOfRange { priority });
        }

        self.priorities[source.index()] = priority_key(0, priority, source);
        Ok(())
    }

    /// Reloads the sources of IPRA (0), IPRB (1) or IPRC (2) from `value` and recomputes once.
    pub fn update_ipr(&mut self, ipr: usize, value: u32, sr: u32) {
        for nibble in 0..4 {
            let priority = (value >> (nibble * 4)) & 0xf;
            for &source in ipr_sources(ipr, nibble) {
                self.priorities[source.index()] = priority_key(0, priority, source);
            }
        }
        self.recompute(sr);
    }
}
