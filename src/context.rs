use crate::{
    hw::sh4::{bus::MemoryBus, Sh4Devices},
    scheduler::Scheduler,
};

/// Host-side state threaded through every call that can arm a timer, move
/// memory or talk to the board.
pub struct Context<'b> {
    pub scheduler: &'b mut Scheduler,
    pub bus: &'b mut dyn MemoryBus,
    pub devices: &'b mut dyn Sh4Devices,

    /// Mirrors the register bank on every exception so a debugger always sees both banks.
    pub debugger_attached: bool,
}

impl<'b> Context<'b> {
    pub fn new(
        scheduler: &'b mut Scheduler,
        bus: &'b mut dyn MemoryBus,
        devices: &'b mut dyn Sh4Devices,
    ) -> Self {
        Self {
            scheduler,
            bus,
            devices,
            debugger_attached: false,
        }
    }
}
