//! Architecture-specific code: interrupt flag control and context switching.

pub mod context;
pub mod interrupts;
