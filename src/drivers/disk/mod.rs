use core::fmt::Display;

pub mod ata;
pub mod geometry;
pub mod partition;
pub mod request;
pub mod setup;

pub use ata::driver::{ControllerSession, Handler, HdDriver};
pub use ata::{Controller, PortIo};
pub use geometry::{Chs, DriveGeometry, PartitionExtent, Registry};
pub use request::{BlockQueue, Request, RequestKind, RequestQueue};
pub use setup::{BufferCache, SetupHooks, SetupParams};

/// Max read/write errors per sector before the request is failed
pub const MAX_ERRORS: u32 = 7;
/// The controller handles a master and a slave
pub const MAX_HD: usize = 2;
/// Whole disk + 4 primary partitions per drive
pub const PARTITIONS_PER_DRIVE: usize = 5;
pub const SECTOR_SIZE: usize = 512;
/// Most sectors one command moves, the count register holds 0 for 256
pub const MAX_SECTORS: u32 = 256;
/// Buffer cache blocks are two sectors
pub const BLOCK_SIZE: usize = 1024;
pub const HD_MAJOR: u16 = 3;

/// Iterations to wait for the controller to become ready
pub const READY_POLLS: u32 = 10_000;
/// Iterations to wait for DRQ after a write command
pub const DRQ_POLLS: u32 = 3000;
/// Spins with the reset bit held in the control register
pub const RESET_DELAY: u32 = 100;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub enum HdError {
    /// Bootstrap may only run once
    AlreadySetup,
    /// BIOS parameter block shorter than two drive records
    ShortBiosBlock,
    PartitionTableUnreadable { drive: usize },
    /// Sector 0 doesn't end with 0x55 0xAA
    BadPartitionTable { drive: usize },
    /// Status register reported a failed command
    Controller { status: u8, error: u8 },
}

impl Display for HdError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            HdError::AlreadySetup => f.write_str("hd setup already done"),
            HdError::ShortBiosBlock => f.write_str("BIOS hd parameter block too short"),
            HdError::PartitionTableUnreadable { drive } => {
                write!(f, "Unable to read partition table of drive {drive}")
            }
            HdError::BadPartitionTable { drive } => {
                write!(f, "Bad partition table on drive {drive}")
            }
            HdError::Controller { status, error } => {
                write!(f, "controller error (status 0x{status:02X}, error 0x{error:02X})")
            }
        }
    }
}

/// Device number the buffer cache knows a minor of this driver by
pub const fn device_number(minor: u16) -> u16 {
    (HD_MAJOR << 8) | minor
}
