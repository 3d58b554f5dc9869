//! The kernel's driver instance and the entry points that reach it.
//! Foreground code locks [`HD`] with interrupts disabled, the interrupt
//! handler never waits on it for long.
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use log::error;
use spin::Mutex;
use x86_64::instructions::interrupts;

use crate::disk::ata::irq::unexpected_hd_interrupt;
use crate::disk::ata::X86Ports;
use crate::disk::geometry::{DriveGeometry, PartitionExtent};
use crate::disk::request::{BlockQueue, Request};
use crate::disk::setup::{bootstrap, drive_table, BufferCache, SetupHooks, SetupParams};
use crate::disk::{HdDriver, HdError, RequestQueue, BLOCK_SIZE, SECTOR_SIZE};
use crate::sync::TimeOutMutex;

pub type KernelDriver = HdDriver<X86Ports, BlockQueue>;

pub static HD: Mutex<Option<KernelDriver>> = Mutex::new(None);
static SETUP_DONE: AtomicBool = AtomicBool::new(false);

/// Compiled in drive geometry, replaces the BIOS table when set
pub const HD_TYPE: Option<&[DriveGeometry]> = None;
/// Halts to sit through while a partition table read is in flight
const BREAD_WAITS: u32 = 10_000;

/// Runs `f` on the driver with interrupts disabled, `None` before setup
pub fn with_driver<R>(f: impl FnOnce(&mut KernelDriver) -> R) -> Option<R> {
    interrupts::without_interrupts(|| HD.lock().as_mut().map(f))
}

/// Queues a request, the controller is started if it was idle
pub fn submit(request: Request) {
    if with_driver(|hd| hd.submit(request)).is_none() {
        error!("hd: request before setup");
    }
}

/// Body of the IRQ14 handler
pub fn hd_interrupt() {
    match HD.try_lock_with_timeout() {
        Some(mut guard) => match guard.as_mut() {
            Some(hd) => hd.interrupt(),
            None => unexpected_hd_interrupt(),
        },
        None => error!("hd: driver lock timed out in interrupt"),
    }
}

/// Reads blocks through the live driver, sleeping on `hlt` until the interrupt finishes them
struct HdCache;
impl BufferCache for HdCache {
    fn bread(&mut self, dev: u16, block: u32) -> Option<Vec<u8>> {
        let minor = dev & 0xFF;
        let sectors = (BLOCK_SIZE / SECTOR_SIZE) as u32;
        submit(Request::read(minor, block * sectors, sectors));
        for _ in 0..BREAD_WAITS {
            interrupts::disable();
            let done = HD.lock().as_mut().and_then(|hd| {
                if hd.queue().is_empty() {
                    hd.queue_mut().take_finished().pop()
                } else {
                    None
                }
            });
            if let Some(finished) = done {
                interrupts::enable();
                return finished.uptodate.then_some(finished.request.buffer);
            }
            // no wakeup lost, sti only takes effect with the hlt
            interrupts::enable_and_hlt();
        }
        error!("hd: timed out reading block {} of dev {:04x}", block, dev);
        None
    }
}

/// Discovers the drives and reads their partition tables, then lets the kernel
/// load the ramdisk and mount root. Only the first call does anything.
///
/// # Panics
/// If a partition table can't be read or is invalid.
pub fn sys_setup<H: SetupHooks>(bios: &[u8], hooks: &mut H) -> Result<(), HdError> {
    if SETUP_DONE.swap(true, Ordering::AcqRel) {
        return Err(HdError::AlreadySetup);
    }
    // Safety: this is the only place ports are handed out, and only once
    #[allow(unused_mut)]
    let mut ports = unsafe { X86Ports::new() };
    #[cfg(feature = "cmos")]
    let cmos_disks = Some(crate::disk::setup::read_cmos(
        &mut ports,
        crate::disk::setup::CMOS_DISK_TYPES,
    ));
    #[cfg(not(feature = "cmos"))]
    let cmos_disks = None;
    let registry = drive_table(&SetupParams {
        bios,
        fixed: HD_TYPE,
        cmos_disks,
    })?;
    let driver = HdDriver::new(ports, registry.clone(), BlockQueue::new());
    interrupts::without_interrupts(|| *HD.lock() = Some(driver));

    let install = |tables: &[[PartitionExtent; 4]]| {
        with_driver(|hd| hd.install_partitions(tables));
    };
    match bootstrap(&registry, &mut HdCache, install, hooks) {
        Err(err @ (HdError::PartitionTableUnreadable { .. } | HdError::BadPartitionTable { .. })) => {
            panic!("{}", err)
        }
        other => other,
    }
}
