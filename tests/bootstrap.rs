use std::cell::RefCell;

use hd::setup::{bootstrap, drive_table, read_cmos, CMOS_DISK_TYPES};
use hd::sim::{drain_interrupts, mbr_sector, DriverCache, RecordingHooks, SimulatedController};
use hd::{BlockQueue, DriveGeometry, HdDriver, HdError, PartitionExtent, Request, SetupParams, SECTOR_SIZE};

const FIRST: DriveGeometry = DriveGeometry::new(4, 17, 306);
const SECOND: DriveGeometry = DriveGeometry::new(2, 17, 100);

fn bios_record(geometry: &DriveGeometry) -> [u8; 16] {
    let mut raw = [0u8; 16];
    raw[0..2].copy_from_slice(&(geometry.cylinders as u16).to_le_bytes());
    raw[2] = geometry.heads as u8;
    raw[14] = geometry.sectors as u8;
    raw
}

fn bios_block(drives: &[DriveGeometry]) -> Vec<u8> {
    let mut block = vec![0u8; 32];
    for (i, drive) in drives.iter().enumerate() {
        block[i * 16..(i + 1) * 16].copy_from_slice(&bios_record(drive));
    }
    block
}

/// Runs setup on a simulated machine, the partition tables are read through the driver
fn boot(
    mut sim: SimulatedController,
    bios: &[u8],
) -> (RefCell<HdDriver<SimulatedController, BlockQueue>>, Result<(), HdError>, RecordingHooks) {
    let cmos_disks = Some(read_cmos(&mut sim, CMOS_DISK_TYPES));
    let registry = drive_table(&SetupParams {
        bios,
        fixed: None,
        cmos_disks,
    })
    .unwrap();
    let hd = RefCell::new(HdDriver::new(sim, registry.clone(), BlockQueue::new()));
    let mut hooks = RecordingHooks::default();
    let result = {
        let mut cache = DriverCache::new(&hd);
        bootstrap(
            &registry,
            &mut cache,
            |tables| hd.borrow_mut().install_partitions(tables),
            &mut hooks,
        )
    };
    (hd, result, hooks)
}

#[test]
fn two_drives_from_bios_block() {
    let mut sim = SimulatedController::new(&[FIRST, SECOND]);
    let first = mbr_sector(&[PartitionExtent::new(17, 10_000), PartitionExtent::new(10_017, 10_000)]);
    sim.disk_mut(0)[..SECTOR_SIZE].copy_from_slice(&first);
    sim.disk_mut(1)[..SECTOR_SIZE].copy_from_slice(&mbr_sector(&[PartitionExtent::new(34, 3000)]));

    let (hd, result, hooks) = boot(sim, &bios_block(&[FIRST, SECOND]));
    assert_eq!(result, Ok(()));
    assert_eq!(hooks.events, ["load_ramdisk", "mount_root"]);

    let mut hd = hd.into_inner();
    let registry = hd.registry();
    assert_eq!(registry.drive_count(), 2);
    assert_eq!(registry.extent(0), PartitionExtent::new(0, 20808));
    assert_eq!(registry.extent(2), PartitionExtent::new(10_017, 10_000));
    assert_eq!(registry.extent(5), PartitionExtent::new(0, 3400));
    assert_eq!(registry.extent(6), PartitionExtent::new(34, 3000));

    // the installed partitions serve requests right away
    hd.ports_mut().disk_mut(1)[34 * SECTOR_SIZE] = 0x42;
    hd.submit(Request::read(6, 0, 2));
    drain_interrupts(&mut hd);
    let done = hd.queue_mut().take_finished();
    assert!(done[0].uptodate);
    assert_eq!(done[0].request.buffer[0], 0x42);
}

#[test]
fn bad_signature_leaves_only_whole_disk() {
    let mut sim = SimulatedController::new(&[FIRST]);
    let mut sector = mbr_sector(&[PartitionExtent::new(17, 10_000)]);
    sector[510] = 0x00;
    sector[511] = 0x00;
    sim.disk_mut(0)[..SECTOR_SIZE].copy_from_slice(&sector);

    let (hd, result, hooks) = boot(sim, &bios_block(&[FIRST]));
    assert_eq!(result, Err(HdError::BadPartitionTable { drive: 0 }));
    assert!(hooks.events.is_empty());
    let hd = hd.into_inner();
    assert_eq!(hd.registry().extent(0), PartitionExtent::new(0, 20808));
    for minor in 1..5 {
        assert_eq!(hd.registry().extent(minor), PartitionExtent::default());
    }
}

#[test]
fn bad_second_drive_keeps_first_table_out() {
    let mut sim = SimulatedController::new(&[FIRST, SECOND]);
    sim.disk_mut(0)[..SECTOR_SIZE].copy_from_slice(&mbr_sector(&[PartitionExtent::new(17, 100)]));
    let (hd, result, _) = boot(sim, &bios_block(&[FIRST, SECOND]));
    assert_eq!(result, Err(HdError::BadPartitionTable { drive: 1 }));
    assert_eq!(hd.into_inner().registry().extent(1), PartitionExtent::default());
}

#[test]
fn cmos_without_drives() {
    let mut sim = SimulatedController::new(&[FIRST]);
    sim.cmos[0x12] = 0x00;
    let (hd, result, hooks) = boot(sim, &bios_block(&[FIRST]));
    assert_eq!(result, Ok(()));
    assert_eq!(hooks.events.len(), 2);
    let mut hd = hd.into_inner();
    assert_eq!(hd.registry().drive_count(), 0);
    assert!(hd.ports().commands.is_empty());
    // every minor is out of range now
    hd.submit(Request::read(0, 0, 1));
    assert!(!hd.queue_mut().take_finished()[0].uptodate);
}

#[test]
fn cmos_drops_second_bios_drive() {
    let mut sim = SimulatedController::new(&[FIRST, SECOND]);
    sim.cmos[0x12] = 0x30;
    sim.disk_mut(0)[..SECTOR_SIZE].copy_from_slice(&mbr_sector(&[]));
    let (hd, result, _) = boot(sim, &bios_block(&[FIRST, SECOND]));
    assert_eq!(result, Ok(()));
    let hd = hd.into_inner();
    assert_eq!(hd.registry().drive_count(), 1);
    // only drive 0 was asked for its table
    assert!(hd.ports().commands.iter().all(|c| c.drive_head & 0x10 == 0));
}
