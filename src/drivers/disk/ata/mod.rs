use bit_field::BitField;
use log::{error, trace};

use super::geometry::DriveGeometry;
use super::{HdError, DRQ_POLLS, READY_POLLS, RESET_DELAY, SECTOR_SIZE};

use self::driver::{ControllerSession, Handler};

pub mod driver;
pub mod irq;

/// Byte/word port access, so the driver can run against real ports or a simulation
pub trait PortIo {
    fn inb(&mut self, port: u16) -> u8;
    fn outb(&mut self, port: u16, value: u8);
    fn inw(&mut self, port: u16) -> u16;
    fn outw(&mut self, port: u16, value: u16);
}

/// The real I/O ports of the primary controller
#[derive(Debug)]
pub struct X86Ports(());
impl X86Ports {
    /// # Safety
    /// Caller must own the controller ports (0x1F0-0x1F7 & 0x3F6), nothing else may touch them.
    pub const unsafe fn new() -> Self {
        Self(())
    }
}
#[cfg(target_arch = "x86_64")]
impl PortIo for X86Ports {
    fn inb(&mut self, port: u16) -> u8 {
        use x86_64::instructions::port::PortRead;
        unsafe { u8::read_from_port(port) }
    }
    fn outb(&mut self, port: u16, value: u8) {
        use x86_64::instructions::port::PortWrite;
        unsafe { u8::write_to_port(port, value) }
    }
    fn inw(&mut self, port: u16) -> u16 {
        use x86_64::instructions::port::PortRead;
        unsafe { u16::read_from_port(port) }
    }
    fn outw(&mut self, port: u16, value: u16) {
        use x86_64::instructions::port::PortWrite;
        unsafe { u16::write_to_port(port, value) }
    }
}

pub const HD_BASE: u16 = 0x1F0;
/// Device control register, holds the control byte & the reset bit
pub const HD_CMD: u16 = 0x3F6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
    Data,
    Error,
    /// Write precompensation cylinder / 4, same port as Error
    Precomp,
    SectorCount,
    Sector,
    CylinderLow,
    CylinderHigh,
    DriveHead,
    Status,
    Command,
}
impl Reg {
    pub fn offset(&self) -> u16 {
        match self {
            Reg::Data => 0,
            Reg::Error => 1,
            Reg::Precomp => 1,
            Reg::SectorCount => 2,
            Reg::Sector => 3,
            Reg::CylinderLow => 4,
            Reg::CylinderHigh => 5,
            Reg::DriveHead => 6,
            Reg::Status => 7,
            Reg::Command => 7,
        }
    }
    pub fn port(&self) -> u16 {
        HD_BASE + self.offset()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Recalibrate, moves the heads to track 0
    Restore = 0x10,
    Read = 0x20,
    Write = 0x30,
    /// Set drive parameters (sectors per track, heads)
    Specify = 0x91,
}

/// Written to the control register to reset the controller
pub const CONTROL_RESET: u8 = 4;
/// Error register value after a clean reset
pub const RESET_OK: u8 = 1;

bitfield::bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Status(u8);
    impl Debug;
    pub error, _: 0;
    pub index, _: 1;
    pub corrected, _: 2;
    // drive wants PIO data moved
    pub data_request, _: 3;
    pub seek_complete, _: 4;
    pub write_fault, _: 5;
    pub ready, _: 6;
    pub busy, _: 7;
}
impl Status {
    pub const ERR: u8 = 0x01;
    pub const INDEX: u8 = 0x02;
    pub const ECC: u8 = 0x04;
    pub const DRQ: u8 = 0x08;
    pub const SEEK: u8 = 0x10;
    pub const WRERR: u8 = 0x20;
    pub const READY: u8 = 0x40;
    pub const BUSY: u8 = 0x80;

    /// Only ready & seek complete among the bits that matter
    pub fn is_ok(&self) -> bool {
        self.ready() && self.seek_complete() && !(self.busy() || self.write_fault() || self.error())
    }
}

bitfield::bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct DriveHead(u8);
    impl Debug;
    pub u8, head, set_head: 3, 0;
    pub drive, set_drive: 4;
}
impl DriveHead {
    /// Bits 5 & 7 are always set (512 bytes sectors, no ECC)
    pub fn new(drive: u8, head: u8) -> Self {
        let mut dh = Self(0xA0);
        dh.set_drive(drive == 1);
        dh.set_head(head);
        dh
    }
}

const ERROR_NAMES: [&str; 8] = [
    "address mark not found",
    "track 0 not found",
    "command aborted",
    "media change request",
    "ID not found",
    "media changed",
    "uncorrectable data error",
    "bad block",
];
/// Name of the lowest error bit set, for logs
pub fn describe_error(error: u8) -> &'static str {
    (0..8)
        .find(|bit| error.get_bit(*bit))
        .map_or("no error bit", |bit| ERROR_NAMES[bit])
}

/// A command and its parameter registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskFile {
    pub drive: u32,
    pub nsect: u32,
    pub sector: u32,
    pub head: u32,
    pub cylinder: u32,
    pub command: Command,
}

/// Register level protocol of the controller. Every wait in here is bounded.
#[derive(Debug)]
pub struct Controller<P: PortIo> {
    ports: P,
}
impl<P: PortIo> Controller<P> {
    pub fn new(ports: P) -> Self {
        Self { ports }
    }
    pub fn ports(&self) -> &P {
        &self.ports
    }
    pub fn ports_mut(&mut self) -> &mut P {
        &mut self.ports
    }
    fn read_reg(&mut self, reg: Reg) -> u8 {
        self.ports.inb(reg.port())
    }
    fn write_reg(&mut self, reg: Reg, value: u8) {
        self.ports.outb(reg.port(), value)
    }
    pub fn status(&mut self) -> Status {
        Status(self.read_reg(Reg::Status))
    }
    /// Used to retrieve any error generated by the last command executed.
    pub fn error(&mut self) -> u8 {
        self.read_reg(Reg::Error)
    }

    /// Waits for ready with busy clear, false if it never happened
    pub fn controller_ready(&mut self) -> bool {
        for _ in 0..READY_POLLS {
            let status = self.status();
            if status.ready() && !status.busy() {
                return true;
            }
        }
        false
    }

    /// Result of the last command. On failure the error register is read,
    /// which the controller requires to drop the error condition.
    pub fn win_result(&mut self) -> Result<(), HdError> {
        let status = self.status();
        if status.is_ok() {
            return Ok(());
        }
        let error = if status.error() { self.error() } else { 0 };
        Err(HdError::Controller {
            status: status.0,
            error,
        })
    }

    /// Bounded wait after a reset, the drive must end up ready with seek complete
    pub fn drive_settled(&mut self) -> bool {
        for _ in 0..READY_POLLS {
            let status = self.status();
            if status.ready() && !status.busy() {
                break;
            }
        }
        let status = self.status();
        if status.ready() && status.seek_complete() && !status.busy() {
            return true;
        }
        error!("HD controller times out (status 0x{:02X})", status.0);
        false
    }

    /// Polls for the data request bit a write command raises once it accepts data
    pub fn wait_data_request(&mut self) -> bool {
        (0..DRQ_POLLS).any(|_| self.status().data_request())
    }

    /// Sends a command. The completion handler is armed before any register is
    /// written since the interrupt may fire before we return.
    pub fn issue_command(
        &mut self,
        session: &mut ControllerSession,
        geometry: &DriveGeometry,
        task: TaskFile,
        handler: Handler,
    ) {
        if task.drive > 1 || task.head > 15 {
            panic!("Trying to write bad sector (drive {}, head {})", task.drive, task.head);
        }
        if !self.controller_ready() {
            panic!("HD controller not ready");
        }
        trace!(
            "hd{}: {:?} nsect {} chs ({}, {}, {})",
            task.drive,
            task.command,
            task.nsect,
            task.cylinder,
            task.head,
            task.sector
        );
        session.arm(handler);
        self.ports.outb(HD_CMD, geometry.control);
        self.write_reg(Reg::Precomp, (geometry.write_precomp >> 2) as u8);
        self.write_reg(Reg::SectorCount, task.nsect as u8);
        self.write_reg(Reg::Sector, task.sector as u8);
        self.write_reg(Reg::CylinderLow, task.cylinder as u8);
        self.write_reg(Reg::CylinderHigh, (task.cylinder >> 8) as u8);
        self.write_reg(Reg::DriveHead, DriveHead::new(task.drive as u8, task.head as u8).0);
        // Must come last, starts execution
        self.write_reg(Reg::Command, task.command as u8);
    }

    /// Pulses the reset bit then restores the normal control byte.
    /// Failures are only logged, the next command will fail too and go through error handling.
    pub fn reset_controller(&mut self, control: u8) {
        self.ports.outb(HD_CMD, CONTROL_RESET);
        for _ in 0..RESET_DELAY {
            core::hint::spin_loop();
        }
        self.ports.outb(HD_CMD, control & 0x0F);
        if !self.drive_settled() {
            error!("HD-controller still busy");
        }
        let error = self.error();
        if error != RESET_OK {
            error!("HD-controller reset failed: {:02x}", error);
        }
    }

    /// Reads one sector from the data port
    pub fn port_read(&mut self, sector: &mut [u8]) {
        for word in sector[..SECTOR_SIZE].chunks_exact_mut(2) {
            word.copy_from_slice(&self.ports.inw(Reg::Data.port()).to_le_bytes());
        }
    }
    /// Writes one sector to the data port
    pub fn port_write(&mut self, sector: &[u8]) {
        for word in sector[..SECTOR_SIZE].chunks_exact(2) {
            self.ports.outw(Reg::Data.port(), u16::from_le_bytes([word[0], word[1]]));
        }
    }
}
