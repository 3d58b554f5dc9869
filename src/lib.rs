//! Low level AT hard disk driver.
//!
//! Requests are pulled from a block request queue, translated to
//! cylinder/head/sector coordinates and sent to the controller. Every
//! transfer completes asynchronously: the controller raises IRQ14 and the
//! completion handler armed by the last issued command runs. The driver never
//! sleeps, all its waits are bounded busy polls.
#![cfg_attr(not(test), no_std)]
#![cfg_attr(feature = "irq", feature(abi_x86_interrupt))]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc; // Vec & VecDeque for requests and buffers

pub mod drivers;
#[cfg(target_arch = "x86_64")]
pub mod logger;
pub mod sim;
#[cfg(target_arch = "x86_64")]
pub mod state;
pub mod sync;

pub use drivers::*;
pub use drivers::disk::*;
