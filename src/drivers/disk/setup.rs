//! One time discovery of the drives and their partitions.
//!
//! Geometry comes from a compiled in table or from the BIOS parameter block,
//! the CMOS then tells how many of those drives are AT compatible. Partition
//! tables are read through the buffer cache, so the driver must already serve
//! requests on the whole disk minors when [`bootstrap`] runs.
use alloc::vec::Vec;
use log::{debug, info, warn};

use super::ata::PortIo;
use super::geometry::{DriveGeometry, PartitionExtent, Registry};
use super::partition::parse_partition_table;
use super::{device_number, HdError, MAX_HD, PARTITIONS_PER_DRIVE};

pub const CMOS_ADDRESS: u16 = 0x70;
pub const CMOS_DATA: u16 = 0x71;
/// CMOS byte holding the types of the two fixed disks
pub const CMOS_DISK_TYPES: u8 = 0x12;

/// One drive of the BIOS hard disk parameter table (INT 41h/46h vectors)
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BiosDriveRecord {
    pub cylinders: u16,
    pub heads: u8,
    pub reduced_write: u16,
    pub write_precomp: u16,
    pub ecc_burst: u8,
    pub control: u8,
    pub std_timeout: u8,
    pub fmt_timeout: u8,
    pub check_timeout: u8,
    pub landing_zone: u16,
    pub sectors: u8,
    pub reserved: u8,
}
impl BiosDriveRecord {
    pub fn geometry(&self) -> DriveGeometry {
        let (cylinders, precomp, lzone) = (self.cylinders, self.write_precomp, self.landing_zone);
        DriveGeometry {
            heads: self.heads as u32,
            sectors: self.sectors as u32,
            cylinders: u16::from_le(cylinders) as u32,
            write_precomp: u16::from_le(precomp) as u32,
            landing_zone: u16::from_le(lzone) as u32,
            control: self.control,
        }
    }
}

/// Two records back to back. A second record with 0 cylinders means there's only one drive.
pub fn parse_bios(bios: &[u8]) -> Result<Vec<DriveGeometry>, HdError> {
    let size = core::mem::size_of::<BiosDriveRecord>();
    if bios.len() < size * MAX_HD {
        return Err(HdError::ShortBiosBlock);
    }
    let mut drives: Vec<DriveGeometry> = bios
        .chunks_exact(size)
        .take(MAX_HD)
        .map(|raw| bytemuck::pod_read_unaligned::<BiosDriveRecord>(raw).geometry())
        .collect();
    if drives[1].cylinders == 0 {
        drives.truncate(1);
    }
    Ok(drives)
}

pub fn read_cmos<P: PortIo>(ports: &mut P, addr: u8) -> u8 {
    // bit 7 keeps NMIs disabled
    ports.outb(CMOS_ADDRESS, 0x80 | addr);
    ports.inb(CMOS_DATA)
}

/// Drives the CMOS disk type byte vouches for. High nibble is drive 0, low nibble drive 1.
/// A drive 1 without a drive 0 doesn't count.
pub fn cmos_drive_count(disk_types: u8) -> usize {
    match (disk_types & 0xF0 != 0, disk_types & 0x0F != 0) {
        (false, _) => 0,
        (true, false) => 1,
        (true, true) => 2,
    }
}

/// What the kernel knows about the drives at boot
#[derive(Debug, Clone, Copy, Default)]
pub struct SetupParams<'a> {
    /// Raw BIOS drive parameter block, 2 records of 16 bytes
    pub bios: &'a [u8],
    /// Compiled in geometry, takes precedence over the BIOS block
    pub fixed: Option<&'a [DriveGeometry]>,
    /// CMOS byte 0x12 if it was queried
    pub cmos_disks: Option<u8>,
}

/// Read side of the block buffer cache
pub trait BufferCache {
    /// A block of the device, `None` when it couldn't be read
    fn bread(&mut self, dev: u16, block: u32) -> Option<Vec<u8>>;
    fn brelse(&mut self, _block: Vec<u8>) {}
}

/// What the kernel does once the drives are known
pub trait SetupHooks {
    fn load_ramdisk(&mut self) {}
    fn mount_root(&mut self);
}

/// Builds the drive table with whole disk extents, partitions stay empty
pub fn drive_table(params: &SetupParams) -> Result<Registry, HdError> {
    let mut drives = match params.fixed {
        Some(fixed) => fixed.to_vec(),
        None => parse_bios(params.bios)?,
    };
    if drives.len() > MAX_HD {
        warn!("hd: only {} drives supported, ignoring {}", MAX_HD, drives.len() - MAX_HD);
        drives.truncate(MAX_HD);
    }
    let mut registry = Registry::new(&drives);
    if let Some(disk_types) = params.cmos_disks {
        let count = cmos_drive_count(disk_types);
        debug!("hd: CMOS disk types 0x{:02x}, {} AT drive(s)", disk_types, count);
        registry.truncate(count);
    }
    for drive in 0..registry.drive_count() {
        let geometry = registry.geometry(drive);
        info!(
            "hd{}: {} cylinders, {} heads, {} sectors/track",
            drive, geometry.cylinders, geometry.heads, geometry.sectors
        );
    }
    Ok(registry)
}

/// Reads sector 0 of every drive. Nothing is returned unless every table is valid.
pub fn read_partition_tables<C: BufferCache>(
    registry: &Registry,
    cache: &mut C,
) -> Result<Vec<[PartitionExtent; 4]>, HdError> {
    let mut tables = Vec::with_capacity(registry.drive_count());
    for drive in 0..registry.drive_count() {
        let dev = device_number((drive * PARTITIONS_PER_DRIVE) as u16);
        let block = cache
            .bread(dev, 0)
            .ok_or(HdError::PartitionTableUnreadable { drive })?;
        let table = parse_partition_table(&block, drive);
        cache.brelse(block);
        tables.push(table?);
    }
    Ok(tables)
}

/// Reads the partition tables, hands them to `install` then runs the kernel hooks.
pub fn bootstrap<C, H, F>(registry: &Registry, cache: &mut C, install: F, hooks: &mut H) -> Result<(), HdError>
where
    C: BufferCache,
    H: SetupHooks,
    F: FnOnce(&[[PartitionExtent; 4]]),
{
    let tables = read_partition_tables(registry, cache)?;
    install(&tables);
    info!("Partition table{} ok.", if registry.drive_count() > 1 { "s" } else { "" });
    hooks.load_ramdisk();
    hooks.mount_root();
    Ok(())
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;
    use crate::sim::{mbr_sector, MemoryCache, RecordingHooks, SimulatedController};

    fn record(cylinders: u16, heads: u8, sectors: u8) -> [u8; 16] {
        let mut raw = [0u8; 16];
        raw[0..2].copy_from_slice(&cylinders.to_le_bytes());
        raw[2] = heads;
        raw[5..7].copy_from_slice(&300u16.to_le_bytes());
        raw[8] = 0x08;
        raw[12..14].copy_from_slice(&305u16.to_le_bytes());
        raw[14] = sectors;
        raw
    }

    fn bios(second: Option<[u8; 16]>) -> Vec<u8> {
        let mut block = record(306, 4, 17).to_vec();
        block.extend_from_slice(&second.unwrap_or([0; 16]));
        block
    }

    #[test]
    fn record_is_16_bytes() {
        assert_eq!(core::mem::size_of::<BiosDriveRecord>(), 16);
    }

    #[test]
    fn bios_single_drive() {
        let drives = parse_bios(&bios(None)).unwrap();
        assert_eq!(drives.len(), 1);
        let drive = drives[0];
        assert_eq!((drive.cylinders, drive.heads, drive.sectors), (306, 4, 17));
        assert_eq!(drive.write_precomp, 300);
        assert_eq!(drive.landing_zone, 305);
        assert_eq!(drive.control, 0x08);
    }

    #[test]
    fn bios_two_drives() {
        let drives = parse_bios(&bios(Some(record(615, 6, 17)))).unwrap();
        assert_eq!(drives.len(), 2);
        assert_eq!(drives[1].total_sectors(), 615 * 6 * 17);
    }

    #[test]
    fn bios_block_too_short() {
        assert_eq!(parse_bios(&[0; 20]), Err(HdError::ShortBiosBlock));
    }

    #[test]
    fn cmos_counts() {
        assert_eq!(cmos_drive_count(0x00), 0);
        assert_eq!(cmos_drive_count(0x0F), 0);
        assert_eq!(cmos_drive_count(0xF0), 1);
        assert_eq!(cmos_drive_count(0x20), 1);
        assert_eq!(cmos_drive_count(0xFF), 2);
    }

    #[test]
    fn cmos_read_goes_through_ports() {
        let mut sim = SimulatedController::new(&[DriveGeometry::new(4, 17, 306)]);
        assert_eq!(read_cmos(&mut sim, CMOS_DISK_TYPES), 0xF0);
    }

    #[test]
    fn cmos_limits_bios_drives() {
        let block = bios(Some(record(615, 6, 17)));
        let params = SetupParams {
            bios: &block,
            fixed: None,
            cmos_disks: Some(0xF0),
        };
        let registry = drive_table(&params).unwrap();
        assert_eq!(registry.drive_count(), 1);
        assert_eq!(registry.minors(), 5);

        let registry = drive_table(&SetupParams { cmos_disks: Some(0), ..params }).unwrap();
        assert_eq!(registry.drive_count(), 0);
    }

    #[test]
    fn fixed_table_wins() {
        let fixed = [DriveGeometry::new(2, 17, 100)];
        let params = SetupParams {
            bios: &[],
            fixed: Some(&fixed),
            cmos_disks: None,
        };
        let registry = drive_table(&params).unwrap();
        assert_eq!(registry.extent(0), PartitionExtent::new(0, 3400));
    }

    #[test]
    fn reads_sector_zero_of_each_drive() {
        let registry = Registry::new(&[DriveGeometry::new(4, 17, 306), DriveGeometry::new(2, 17, 100)]);
        let mut cache = MemoryCache::default();
        let mut first = mbr_sector(&[PartitionExtent::new(17, 1000)]);
        first.resize(1024, 0);
        cache.blocks.insert((0x300, 0), first);
        cache.blocks.insert((0x305, 0), mbr_sector(&[]));
        let tables = read_partition_tables(&registry, &mut cache).unwrap();
        assert_eq!(cache.reads, vec![(0x300, 0), (0x305, 0)]);
        assert_eq!(cache.released, 2);
        assert_eq!(tables[0][0], PartitionExtent::new(17, 1000));
        assert_eq!(tables[1], [PartitionExtent::default(); 4]);
    }

    #[test]
    fn unreadable_table() {
        let registry = Registry::new(&[DriveGeometry::new(4, 17, 306)]);
        let mut cache = MemoryCache::default();
        assert_eq!(
            read_partition_tables(&registry, &mut cache),
            Err(HdError::PartitionTableUnreadable { drive: 0 })
        );
    }

    #[test]
    fn bad_second_table_installs_nothing() {
        let registry = Registry::new(&[DriveGeometry::new(4, 17, 306), DriveGeometry::new(2, 17, 100)]);
        let mut cache = MemoryCache::default();
        cache.blocks.insert((0x300, 0), mbr_sector(&[PartitionExtent::new(17, 1000)]));
        cache.blocks.insert((0x305, 0), vec![0; 1024]);
        let mut hooks = RecordingHooks::default();
        let mut installed = false;
        let result = bootstrap(&registry, &mut cache, |_| installed = true, &mut hooks);
        assert_eq!(result, Err(HdError::BadPartitionTable { drive: 1 }));
        assert!(!installed);
        assert!(hooks.events.is_empty());
    }

    #[test]
    fn no_drives_still_mounts() {
        let registry = Registry::new(&[]);
        let mut cache = MemoryCache::default();
        let mut hooks = RecordingHooks::default();
        bootstrap(&registry, &mut cache, |tables| assert!(tables.is_empty()), &mut hooks).unwrap();
        assert!(cache.reads.is_empty());
        assert_eq!(hooks.events, ["load_ramdisk", "mount_root"]);
    }
}
