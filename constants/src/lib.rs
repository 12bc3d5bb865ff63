pub mod coordinate_system;
pub mod defaults;
pub mod format;
