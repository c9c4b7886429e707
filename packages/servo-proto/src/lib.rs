//! Shared wire types for the ground-station servo bus, IMU stream, and the
//! bench simulator that stands in for real hardware.
//!
//! This crate holds everything that must agree byte-for-byte between
//! `groundstation-core` (the consumer) and `servo-sim` (the producer used in
//! place of real hardware during development): frame layout, checksums,
//! opcodes, and the numeric conversions the command catalog depends on.

pub mod axis;
pub mod error;
pub mod frame;
pub mod numeric;
pub mod opcode;
pub mod status;

pub use axis::AxisTag;
pub use error::CodecError;
pub use frame::{RequestFrame, ResponseFrame, REQUEST_HEADER};
pub use opcode::Opcode;
pub use status::{AllParametersBundle, BaudRate, HomeStatus, IoBitmap, MotionMode, StatusBundle};
