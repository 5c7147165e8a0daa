pub mod extensions;
pub mod sh4;
