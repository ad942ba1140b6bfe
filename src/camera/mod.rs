// Camera domain: device lifecycle, frame buffers, and the emulation service seam.

pub mod backend;
pub mod buffers;
pub mod dummy;
pub mod error;
pub mod remote;
pub mod types;
