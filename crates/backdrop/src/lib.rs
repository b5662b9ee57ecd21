//! wgpu fluid backdrop.
//!
//! [`gpu`] implements the `flowfield` kernel seam on textures and render
//! passes; [`app`] hosts it in a winit window with a scrolling card layout.

pub mod app;
pub mod config;
pub mod gpu;
pub mod layout;

pub use config::BackdropConfig;
pub use gpu::{GpuBackend, GpuField};
pub use layout::CardLayout;
