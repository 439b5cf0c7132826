//! Core of a paravirtual 2D GPU driver.
//!
//! This crate covers the two hard parts of such a driver: the ring-based
//! request/response transport that talks to the device through a
//! memory-mapped register window, and the GPU state machine that brings a
//! scanout from reset into an active framebuffer-backed display.
//!
//! Device bus discovery, feature negotiation beyond the bits this core
//! needs, and the higher-level character/shell surfaces that would sit on
//! top of [`gpu::GpuDevice`] are out of scope: the enclosing kernel is
//! expected to discover the device, initialize a [`transport::Transport`],
//! and hand it to [`gpu::GpuDevice::new`].

#![no_std]
#![cfg_attr(not(feature = "alloc"), allow(dead_code))]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(not(target_os = "none"))]
extern crate std;

#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

pub mod dma;
pub mod error;
pub mod gpu;
pub mod transport;

pub use error::{GpuError, GpuResult};
#[cfg(feature = "alloc")]
pub use gpu::{GpuDevice, GpuOps};
pub use transport::Transport;
