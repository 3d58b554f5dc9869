//! In-memory stand-in for the controller, used by the unit and integration tests.
//! Commands run against a disk image per drive, interrupts are latched in a flag
//! the test collects with [`SimulatedController::take_irq`].
use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::RefCell;

use crate::disk::ata::driver::HdDriver;
use crate::disk::ata::{Command, PortIo, Reg, Status, CONTROL_RESET, HD_CMD, RESET_OK};
use crate::disk::geometry::{DriveGeometry, PartitionExtent};
use crate::disk::request::{BlockQueue, Request, RequestQueue};
use crate::disk::setup::{BufferCache, SetupHooks, CMOS_ADDRESS, CMOS_DATA};
use crate::disk::{BLOCK_SIZE, PARTITIONS_PER_DRIVE, SECTOR_SIZE};

/// Error register values the simulation reports
pub const ERROR_ABORTED: u8 = 0x04;
pub const ERROR_TRACK0: u8 = 0x02;
pub const ERROR_ID_NOT_FOUND: u8 = 0x10;

const IDLE: u8 = Status::READY | Status::SEEK;
const FAILED: u8 = IDLE | Status::ERR;

/// A command as the registers held it when the opcode was written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssuedCommand {
    pub command: u8,
    pub drive_head: u8,
    pub nsect: u8,
    pub sector: u8,
    pub cylinder: u16,
    pub precomp: u8,
    pub control: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Reading { drive: usize, lba: usize, remaining: u8 },
    Writing { drive: usize, lba: usize, remaining: u8, fail: bool },
}

#[derive(Debug)]
pub struct SimulatedController {
    geometries: Vec<DriveGeometry>,
    disks: Vec<Vec<u8>>,
    status: u8,
    error: u8,
    in_reset: bool,
    irq: bool,
    phase: Phase,
    data: Vec<u8>,
    data_pos: usize,
    latch: [u8; 7],
    cmos_index: u8,
    pub cmos: [u8; 128],
    /// Current normal control byte
    pub control: u8,
    /// Every byte written to a controller register, the control port included
    pub register_writes: Vec<(u16, u8)>,
    pub commands: Vec<IssuedCommand>,
    /// Full sectors received on the data port
    pub sector_pushes: usize,
    pub resets: usize,
    pub error_reads: usize,
    /// Error register value after a reset
    pub reset_error: u8,
    /// Never leaves busy
    pub stuck_busy: bool,
    /// Write commands never raise DRQ
    pub no_drq: bool,
    /// The next n read/write commands end in an error
    pub fail_transfers: u32,
    /// The next n restore commands end in an error
    pub fail_recalibrations: u32,
}
impl SimulatedController {
    pub fn new(geometries: &[DriveGeometry]) -> Self {
        let mut cmos = [0u8; 128];
        cmos[0x12] = match geometries.len() {
            0 => 0,
            1 => 0xF0,
            _ => 0xFF,
        };
        Self {
            geometries: geometries.to_vec(),
            disks: geometries
                .iter()
                .map(|g| vec![0; g.total_sectors() as usize * SECTOR_SIZE])
                .collect(),
            status: IDLE,
            error: 0,
            in_reset: false,
            irq: false,
            phase: Phase::Idle,
            data: vec![0; SECTOR_SIZE],
            data_pos: 0,
            latch: [0; 7],
            cmos_index: 0,
            cmos,
            control: 0,
            register_writes: Vec::new(),
            commands: Vec::new(),
            sector_pushes: 0,
            resets: 0,
            error_reads: 0,
            reset_error: RESET_OK,
            stuck_busy: false,
            no_drq: false,
            fail_transfers: 0,
            fail_recalibrations: 0,
        }
    }

    pub fn disk(&self, drive: usize) -> &[u8] {
        &self.disks[drive]
    }
    pub fn disk_mut(&mut self, drive: usize) -> &mut [u8] {
        &mut self.disks[drive]
    }
    /// Returns and clears the pending interrupt
    pub fn take_irq(&mut self) -> bool {
        core::mem::take(&mut self.irq)
    }
    pub fn command_bytes(&self) -> Vec<u8> {
        self.commands.iter().map(|c| c.command).collect()
    }
    /// Forgets what was recorded so far, the disks and fault settings stay
    pub fn clear_records(&mut self) {
        self.register_writes.clear();
        self.commands.clear();
        self.sector_pushes = 0;
        self.resets = 0;
        self.error_reads = 0;
    }

    fn finish(&mut self, status: u8, error: u8) {
        self.status = status;
        self.error = error;
        self.phase = Phase::Idle;
        self.irq = true;
    }

    /// Linear sector the task registers point at
    fn target(&self) -> Option<(usize, usize)> {
        let drive_head = self.latch[6];
        let drive = ((drive_head >> 4) & 1) as usize;
        let geometry = self.geometries.get(drive)?;
        let sector = self.latch[3] as u32;
        let head = (drive_head & 0x0F) as u32;
        let cylinder = u16::from_le_bytes([self.latch[4], self.latch[5]]) as u32;
        if sector == 0 || sector > geometry.sectors || head >= geometry.heads {
            return None;
        }
        let lba = (cylinder * geometry.heads + head) * geometry.sectors + sector - 1;
        (lba < geometry.total_sectors()).then_some((drive, lba as usize))
    }

    fn load_sector(&mut self, drive: usize, lba: usize) {
        let start = lba * SECTOR_SIZE;
        self.data.copy_from_slice(&self.disks[drive][start..start + SECTOR_SIZE]);
        self.data_pos = 0;
    }

    fn execute(&mut self, opcode: u8) {
        self.commands.push(IssuedCommand {
            command: opcode,
            drive_head: self.latch[6],
            nsect: self.latch[2],
            sector: self.latch[3],
            cylinder: u16::from_le_bytes([self.latch[4], self.latch[5]]),
            precomp: self.latch[1],
            control: self.control,
        });
        self.data_pos = 0;
        let count = self.latch[2];
        match opcode {
            op if op == Command::Specify as u8 => self.finish(IDLE, 0),
            op if op == Command::Restore as u8 => {
                if self.fail_recalibrations > 0 {
                    self.fail_recalibrations -= 1;
                    self.finish(FAILED, ERROR_TRACK0);
                } else {
                    self.finish(IDLE, 0);
                }
            }
            op if op == Command::Read as u8 => {
                if self.fail_transfers > 0 {
                    self.fail_transfers -= 1;
                    return self.finish(FAILED, ERROR_ABORTED);
                }
                let Some((drive, lba)) = self.target() else {
                    return self.finish(FAILED, ERROR_ID_NOT_FOUND);
                };
                self.load_sector(drive, lba);
                self.phase = Phase::Reading {
                    drive,
                    lba,
                    remaining: count,
                };
                self.status = IDLE | Status::DRQ;
                self.irq = true;
            }
            op if op == Command::Write as u8 => {
                let Some((drive, lba)) = self.target() else {
                    return self.finish(FAILED, ERROR_ID_NOT_FOUND);
                };
                if self.no_drq {
                    self.status = IDLE;
                    self.phase = Phase::Idle;
                    return;
                }
                let fail = self.fail_transfers > 0;
                if fail {
                    self.fail_transfers -= 1;
                }
                self.phase = Phase::Writing {
                    drive,
                    lba,
                    remaining: count,
                    fail,
                };
                self.status = IDLE | Status::DRQ;
            }
            _ => self.finish(FAILED, ERROR_ABORTED),
        }
    }

    fn read_data(&mut self) -> u16 {
        let Phase::Reading {
            drive,
            lba,
            remaining,
        } = self.phase
        else {
            return 0;
        };
        let word = u16::from_le_bytes([self.data[self.data_pos], self.data[self.data_pos + 1]]);
        self.data_pos += 2;
        if self.data_pos == SECTOR_SIZE {
            let remaining = remaining.wrapping_sub(1);
            if remaining == 0 || lba + 1 >= self.disks[drive].len() / SECTOR_SIZE {
                self.status = IDLE;
                self.phase = Phase::Idle;
            } else {
                self.load_sector(drive, lba + 1);
                self.phase = Phase::Reading {
                    drive,
                    lba: lba + 1,
                    remaining,
                };
                self.irq = true;
            }
        }
        word
    }

    fn write_data(&mut self, word: u16) {
        let Phase::Writing {
            drive,
            lba,
            remaining,
            fail,
        } = self.phase
        else {
            return;
        };
        self.data[self.data_pos..self.data_pos + 2].copy_from_slice(&word.to_le_bytes());
        self.data_pos += 2;
        if self.data_pos < SECTOR_SIZE {
            return;
        }
        self.sector_pushes += 1;
        self.data_pos = 0;
        if fail {
            return self.finish(FAILED, ERROR_ABORTED);
        }
        let start = lba * SECTOR_SIZE;
        self.disks[drive][start..start + SECTOR_SIZE].copy_from_slice(&self.data);
        let remaining = remaining.wrapping_sub(1);
        if remaining == 0 || lba + 1 >= self.disks[drive].len() / SECTOR_SIZE {
            return self.finish(IDLE, 0);
        }
        self.phase = Phase::Writing {
            drive,
            lba: lba + 1,
            remaining,
            fail,
        };
        self.status = IDLE | Status::DRQ;
        self.irq = true;
    }
}
impl PortIo for SimulatedController {
    fn inb(&mut self, port: u16) -> u8 {
        match port {
            p if p == Reg::Status.port() => {
                if self.stuck_busy {
                    Status::BUSY
                } else {
                    self.status
                }
            }
            p if p == Reg::Error.port() => {
                self.error_reads += 1;
                self.error
            }
            p if (Reg::SectorCount.port()..=Reg::DriveHead.port()).contains(&p) => {
                self.latch[(p - Reg::Data.port()) as usize]
            }
            CMOS_DATA => self.cmos[self.cmos_index as usize],
            _ => 0xFF,
        }
    }
    fn outb(&mut self, port: u16, value: u8) {
        if port == CMOS_ADDRESS {
            self.cmos_index = value & 0x7F;
            return;
        }
        self.register_writes.push((port, value));
        match port {
            HD_CMD => {
                if value & CONTROL_RESET != 0 {
                    self.resets += 1;
                    self.in_reset = true;
                    self.status = Status::BUSY;
                    self.phase = Phase::Idle;
                    self.irq = false;
                } else {
                    self.control = value;
                    if self.in_reset {
                        self.in_reset = false;
                        self.status = IDLE;
                        self.error = self.reset_error;
                    }
                }
            }
            p if p == Reg::Command.port() => self.execute(value),
            p if (Reg::Precomp.port()..=Reg::DriveHead.port()).contains(&p) => {
                self.latch[(p - Reg::Data.port()) as usize] = value
            }
            _ => {}
        }
    }
    fn inw(&mut self, port: u16) -> u16 {
        if port == Reg::Data.port() {
            self.read_data()
        } else {
            0xFFFF
        }
    }
    fn outw(&mut self, port: u16, value: u16) {
        if port == Reg::Data.port() {
            self.write_data(value)
        }
    }
}

pub type SimulatedDriver = HdDriver<SimulatedController, BlockQueue>;

/// Delivers interrupts until the controller stops raising them.
/// Returns how many were handled.
pub fn drain_interrupts<Q: RequestQueue>(hd: &mut HdDriver<SimulatedController, Q>) -> usize {
    let mut handled = 0;
    while hd.ports_mut().take_irq() {
        hd.interrupt();
        handled += 1;
        assert!(handled < 100_000, "interrupt storm");
    }
    handled
}

/// Block cache handing out canned blocks
#[derive(Debug, Default)]
pub struct MemoryCache {
    pub blocks: BTreeMap<(u16, u32), Vec<u8>>,
    pub reads: Vec<(u16, u32)>,
    pub released: usize,
}
impl BufferCache for MemoryCache {
    fn bread(&mut self, dev: u16, block: u32) -> Option<Vec<u8>> {
        self.reads.push((dev, block));
        self.blocks.get(&(dev, block)).cloned()
    }
    fn brelse(&mut self, _block: Vec<u8>) {
        self.released += 1;
    }
}

/// Block cache reading through a simulated driver, the way the kernel reads
/// partition tables through the live driver
#[derive(Debug)]
pub struct DriverCache<'a> {
    pub hd: &'a RefCell<SimulatedDriver>,
    pub released: usize,
}
impl<'a> DriverCache<'a> {
    pub fn new(hd: &'a RefCell<SimulatedDriver>) -> Self {
        Self { hd, released: 0 }
    }
}
impl BufferCache for DriverCache<'_> {
    fn bread(&mut self, dev: u16, block: u32) -> Option<Vec<u8>> {
        let mut hd = self.hd.borrow_mut();
        let sectors_per_block = (BLOCK_SIZE / SECTOR_SIZE) as u32;
        hd.submit(Request::read(
            dev & 0xFF,
            block * sectors_per_block,
            sectors_per_block,
        ));
        drain_interrupts(&mut *hd);
        hd.queue_mut()
            .take_finished()
            .into_iter()
            .find(|finished| finished.uptodate)
            .map(|finished| finished.request.buffer)
    }
    fn brelse(&mut self, _block: Vec<u8>) {
        self.released += 1;
    }
}

/// Records which setup steps ran
#[derive(Debug, Default)]
pub struct RecordingHooks {
    pub events: Vec<&'static str>,
}
impl SetupHooks for RecordingHooks {
    fn load_ramdisk(&mut self) {
        self.events.push("load_ramdisk");
    }
    fn mount_root(&mut self) {
        self.events.push("mount_root");
    }
}

/// Disk image sector 0 holding the given primary partitions
pub fn mbr_sector(partitions: &[PartitionExtent]) -> Vec<u8> {
    let mut sector = vec![0u8; SECTOR_SIZE];
    for (i, extent) in partitions.iter().take(PARTITIONS_PER_DRIVE - 1).enumerate() {
        let entry = 0x1BE + i * 16;
        sector[entry + 4] = 0x83;
        sector[entry + 8..entry + 12].copy_from_slice(&extent.start_sect.to_le_bytes());
        sector[entry + 12..entry + 16].copy_from_slice(&extent.nr_sects.to_le_bytes());
    }
    sector[510] = 0x55;
    sector[511] = 0xAA;
    sector
}
