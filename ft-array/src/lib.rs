// vim: tw=80

//! The fault-tolerance (FT) translation layer of a striped block array.
//!
//! This crate maps logical reads/writes on a striped volume onto physical
//! devices, computes and places parity for RAID0 and RAID6, and
//! reconstructs lost chunks when one or two devices fail. Everything
//! around it — device-state observation, hugepage/NUMA allocation, I/O
//! dispatch, and on-device metadata persistence — is modeled as a trait the
//! caller implements; this crate only consumes those traits.

#![allow(clippy::type_complexity)]

pub mod config;
pub mod debug_info;
pub mod device;
pub mod error;
pub mod geometry;
pub mod io;
pub mod numa;
pub mod pbr;
pub mod raid;
pub mod rebuild;

mod buffer;
mod buffer_pool;
mod codec;

pub use buffer::{BufferEntry, FtWriteEntry, LogicalWriteEntry, PhysicalWriteEntry};
pub use buffer_pool::{BufferInfo, BufferPool};
pub use codec::Codec;
pub use error::Error;

/// Crate-wide `Result` alias; every fallible compute-level routine in this
/// crate returns one of these rather than panicking or throwing across an
/// async boundary.
pub type Result<T> = std::result::Result<T, Error>;
