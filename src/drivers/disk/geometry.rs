use core::fmt::Display;

use super::{MAX_HD, PARTITIONS_PER_DRIVE};

/// Parameters of one drive, as handed over by the BIOS (or compiled in)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DriveGeometry {
    pub heads: u32,
    /// Sectors per track
    pub sectors: u32,
    pub cylinders: u32,
    /// First cylinder using write precompensation
    pub write_precomp: u32,
    /// Cylinder the heads park on
    pub landing_zone: u32,
    pub control: u8,
}
impl DriveGeometry {
    pub const fn new(heads: u32, sectors: u32, cylinders: u32) -> Self {
        Self {
            heads,
            sectors,
            cylinders,
            write_precomp: 0,
            landing_zone: 0,
            control: 0,
        }
    }
    pub const fn total_sectors(&self) -> u32 {
        self.heads * self.sectors * self.cylinders
    }
}

/// Holds the absolute start sector of a partition & its size in sectors
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionExtent {
    pub start_sect: u32,
    pub nr_sects: u32,
}
impl PartitionExtent {
    pub const fn new(start_sect: u32, nr_sects: u32) -> Self {
        Self {
            start_sect,
            nr_sects,
        }
    }
}

/// Cylinder/head/sector address, sector is 1 based
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chs {
    pub cylinder: u32,
    pub head: u32,
    pub sector: u32,
}
impl Chs {
    pub fn from_lba(block: u32, geometry: &DriveGeometry) -> Self {
        let track = block / geometry.sectors;
        let sector = block % geometry.sectors;
        Self {
            cylinder: track / geometry.heads,
            head: track % geometry.heads,
            sector: sector + 1,
        }
    }
    pub fn to_lba(&self, geometry: &DriveGeometry) -> u32 {
        (self.cylinder * geometry.heads + self.head) * geometry.sectors + (self.sector - 1)
    }
}
impl Display for Chs {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "({}, {}, {})", self.cylinder, self.head, self.sector)
    }
}

/// Per drive geometry and the partition extents derived from it.
///
/// Minor `5 * drive` is the whole disk, `5 * drive + 1..=4` the primary
/// partitions. Filled once at bootstrap then only read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registry {
    drives: usize,
    info: [DriveGeometry; MAX_HD],
    hd: [PartitionExtent; PARTITIONS_PER_DRIVE * MAX_HD],
}
impl Registry {
    pub const fn empty() -> Self {
        Self {
            drives: 0,
            info: [DriveGeometry::new(0, 0, 0); MAX_HD],
            hd: [PartitionExtent::new(0, 0); PARTITIONS_PER_DRIVE * MAX_HD],
        }
    }
    /// Registers the drives and their whole disk extents, partitions stay empty
    pub fn new(geometries: &[DriveGeometry]) -> Self {
        assert!(geometries.len() <= MAX_HD, "Only {MAX_HD} drives supported");
        let mut registry = Self::empty();
        for (drive, geometry) in geometries.iter().enumerate() {
            registry.info[drive] = *geometry;
            registry.hd[drive * PARTITIONS_PER_DRIVE] =
                PartitionExtent::new(0, geometry.total_sectors());
        }
        registry.drives = geometries.len();
        registry
    }
    pub fn drive_count(&self) -> usize {
        self.drives
    }
    pub fn geometry(&self, drive: usize) -> &DriveGeometry {
        assert!(drive < self.drives, "No hd drive {drive}");
        &self.info[drive]
    }
    pub fn extent(&self, minor: usize) -> PartitionExtent {
        assert!(minor < self.minors(), "No hd minor {minor}");
        self.hd[minor]
    }
    pub fn minors(&self) -> usize {
        PARTITIONS_PER_DRIVE * self.drives
    }
    /// Whether a transfer starting at `sector` of `minor` may reach the controller.
    /// Two sectors (one cache block) must fit before the end of the extent.
    pub fn is_valid(&self, minor: usize, sector: u32) -> bool {
        minor < self.minors() && sector as u64 + 2 <= self.hd[minor].nr_sects as u64
    }

    /// Drops the drives past `count`, their whole disk extents are zeroed
    pub(crate) fn truncate(&mut self, count: usize) {
        for drive in count..MAX_HD {
            self.hd[drive * PARTITIONS_PER_DRIVE] = PartitionExtent::default();
        }
        self.drives = self.drives.min(count);
    }
    pub(crate) fn set_partitions(&mut self, drive: usize, partitions: [PartitionExtent; 4]) {
        let first = drive * PARTITIONS_PER_DRIVE + 1;
        self.hd[first..first + 4].copy_from_slice(&partitions);
    }
}
impl Default for Registry {
    fn default() -> Self {
        Self::empty()
    }
}
