//! # Architecture Layer
//!
//! Processor-specific bindings of the generic port. Only the Tuman32 core is
//! supported; the module is compiled for `riscv32` targets alone so the rest
//! of the crate stays testable on the host.

#[cfg(target_arch = "riscv32")]
pub mod tuman32;
