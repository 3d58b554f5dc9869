use log::debug;

use super::{Command, Controller, PortIo, TaskFile};
use crate::disk::geometry::{Chs, PartitionExtent, Registry};
use crate::disk::request::{Request, RequestKind, RequestQueue};
use crate::disk::{MAX_ERRORS, PARTITIONS_PER_DRIVE};

/// What runs when the next interrupt of the controller arrives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Handler {
    #[default]
    None,
    Read,
    Write,
    /// Completion of a specify or restore command
    Recalibrate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recovery {
    Normal,
    ControllerReset,
    DriveRecalibrate,
}

/// Controller wide state. Both flags start set so the first dispatch
/// resets and recalibrates before any transfer.
#[derive(Debug)]
pub struct ControllerSession {
    reset: bool,
    recalibrate: bool,
    handler: Handler,
    recovery: Recovery,
}
impl ControllerSession {
    pub const fn new() -> Self {
        Self {
            reset: true,
            recalibrate: true,
            handler: Handler::None,
            recovery: Recovery::ControllerReset,
        }
    }
    pub fn needs_reset(&self) -> bool {
        self.reset
    }
    pub fn needs_recalibrate(&self) -> bool {
        self.recalibrate
    }
    pub fn active_handler(&self) -> Handler {
        self.handler
    }
    pub fn recovery(&self) -> Recovery {
        self.recovery
    }
    pub(crate) fn arm(&mut self, handler: Handler) {
        self.handler = handler;
    }
    /// The interrupt clears the handler before running it
    pub(crate) fn take_handler(&mut self) -> Handler {
        core::mem::take(&mut self.handler)
    }
    pub(crate) fn recalibrated(&mut self) {
        self.recovery = Recovery::Normal;
    }
}
impl Default for ControllerSession {
    fn default() -> Self {
        Self::new()
    }
}

/// One controller: its ports, the drive tables, the session and the request queue it serves
#[derive(Debug)]
pub struct HdDriver<P: PortIo, Q: RequestQueue> {
    pub(super) controller: Controller<P>,
    registry: Registry,
    pub(super) session: ControllerSession,
    pub(super) queue: Q,
}
impl<P: PortIo, Q: RequestQueue> HdDriver<P, Q> {
    pub fn new(ports: P, registry: Registry, queue: Q) -> Self {
        Self {
            controller: Controller::new(ports),
            registry,
            session: ControllerSession::new(),
            queue,
        }
    }
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
    pub fn session(&self) -> &ControllerSession {
        &self.session
    }
    pub fn queue(&self) -> &Q {
        &self.queue
    }
    pub fn queue_mut(&mut self) -> &mut Q {
        &mut self.queue
    }
    pub fn ports(&self) -> &P {
        self.controller.ports()
    }
    pub fn ports_mut(&mut self) -> &mut P {
        self.controller.ports_mut()
    }

    /// Bootstrap hands the partition tables over once they were read
    pub fn install_partitions(&mut self, tables: &[[PartitionExtent; 4]]) {
        for (drive, table) in tables.iter().enumerate() {
            self.registry.set_partitions(drive, *table);
        }
    }

    /// Queues a request. The dispatcher only runs when the queue was empty,
    /// otherwise the head request is in flight and its completion picks this one up.
    pub fn submit(&mut self, request: Request) {
        let idle = self.queue.is_empty();
        self.queue.push(request);
        if idle {
            self.do_request();
        }
    }

    /// Sends the command the head request needs, or a reset/recalibration first.
    /// Returns once one command is in flight or the queue is empty.
    pub fn do_request(&mut self) {
        loop {
            let Some(request) = self.queue.current() else {
                return;
            };
            let minor = request.minor as usize;
            if !request.is_well_formed() || !self.registry.is_valid(minor, request.sector) {
                debug!(
                    "hd: rejecting minor {} sector {} ({} sectors)",
                    minor, request.sector, request.nr_sectors
                );
                self.queue.end_request(false);
                continue;
            }
            // extents come from the on-disk table unchecked
            let block = request.sector.wrapping_add(self.registry.extent(minor).start_sect);
            let drive = minor / PARTITIONS_PER_DRIVE;
            let geometry = *self.registry.geometry(drive);
            let chs = Chs::from_lba(block, &geometry);
            let nsect = request.nr_sectors;
            let kind = request.kind();

            if self.session.reset {
                self.session.reset = false;
                self.session.recalibrate = true;
                self.reset_hd(drive);
                return;
            }
            if self.session.recalibrate {
                self.session.recalibrate = false;
                debug!("hd{}: recalibrating", drive);
                self.hd_out(
                    TaskFile {
                        drive: drive as u32,
                        nsect: geometry.sectors,
                        sector: 0,
                        head: 0,
                        cylinder: 0,
                        command: Command::Restore,
                    },
                    Handler::Recalibrate,
                );
                self.session.recovery = Recovery::DriveRecalibrate;
                return;
            }
            let task = |command| TaskFile {
                drive: drive as u32,
                nsect,
                sector: chs.sector,
                head: chs.head,
                cylinder: chs.cylinder,
                command,
            };
            match kind {
                Ok(RequestKind::Write) => {
                    self.hd_out(task(Command::Write), Handler::Write);
                    if !self.controller.wait_data_request() {
                        debug!("hd{}: no DRQ after write command", drive);
                        self.bad_rw_intr();
                        continue;
                    }
                    // Unlike reads the first sector goes out before any interrupt
                    if let Some(request) = self.queue.current() {
                        self.controller.port_write(request.current_sector());
                    }
                }
                Ok(RequestKind::Read) => self.hd_out(task(Command::Read), Handler::Read),
                Err(cmd) => panic!("unknown hd-command {cmd}"),
            }
            return;
        }
    }

    fn hd_out(&mut self, task: TaskFile, handler: Handler) {
        let geometry = *self.registry.geometry(task.drive as usize);
        self.controller
            .issue_command(&mut self.session, &geometry, task, handler);
    }

    /// Resets the controller then re-specifies the drive parameters,
    /// the completion goes through the recalibration handler.
    fn reset_hd(&mut self, drive: usize) {
        self.session.recovery = Recovery::ControllerReset;
        debug!("hd{}: resetting controller", drive);
        let control = self.registry.geometry(0).control;
        self.controller.reset_controller(control);
        let geometry = *self.registry.geometry(drive);
        self.hd_out(
            TaskFile {
                drive: drive as u32,
                nsect: geometry.sectors,
                sector: geometry.sectors,
                head: geometry.heads.saturating_sub(1),
                cylinder: geometry.cylinders,
                command: Command::Specify,
            },
            Handler::Recalibrate,
        );
        self.session.recovery = Recovery::DriveRecalibrate;
    }

    /// Counts a failed attempt on the head request. Never issues a command,
    /// the following dispatch acts on what is decided here.
    pub(crate) fn bad_rw_intr(&mut self) {
        let Some(request) = self.queue.current_mut() else {
            return;
        };
        request.errors += 1;
        let errors = request.errors;
        if errors >= MAX_ERRORS {
            self.queue.end_request(false);
        }
        if errors > MAX_ERRORS / 2 {
            self.session.reset = true;
        }
    }
}
