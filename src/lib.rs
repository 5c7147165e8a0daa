pub mod config;
pub mod context;
pub mod hw;
pub mod scheduler;

pub use crate::{
    config::{Clocks, CpuKind, ModePins, Sh4Config},
    context::Context,
    hw::sh4::{
        bus::{MemoryBus, SystemRam},
        dmac::{DdtMode, DdtTransfer, DmaDataStatus},
        intc::ExceptionSource,
        InterruptLine, IoPort, LineState, NullDevices, SH4EventData, Sh4, Sh4Devices, Sh4Error,
    },
    scheduler::Scheduler,
};
