use log::{error, warn};

use super::driver::{Handler, HdDriver};
use super::{describe_error, PortIo};
use crate::disk::request::RequestQueue;
use crate::disk::HdError;

pub fn unexpected_hd_interrupt() {
    warn!("Unexpected HD interrupt");
}

fn log_failure(what: &str, err: &HdError) {
    match err {
        HdError::Controller { status, error } => error!(
            "hd: {} failed, status 0x{:02X} error 0x{:02X} ({})",
            what,
            status,
            error,
            describe_error(*error)
        ),
        other => error!("hd: {} failed: {}", what, other),
    }
}

impl<P: PortIo, Q: RequestQueue> HdDriver<P, Q> {
    /// Entry point of IRQ14. Runs the armed handler, which is cleared first so
    /// a handler that wants the next interrupt too has to re-arm itself.
    pub fn interrupt(&mut self) {
        match self.session.take_handler() {
            Handler::None => unexpected_hd_interrupt(),
            Handler::Read => self.read_intr(),
            Handler::Write => self.write_intr(),
            Handler::Recalibrate => self.recal_intr(),
        }
    }

    fn read_intr(&mut self) {
        if let Err(err) = self.controller.win_result() {
            log_failure("read", &err);
            self.bad_rw_intr();
            self.do_request();
            return;
        }
        let Some(request) = self.queue.current_mut() else {
            error!("hd: read interrupt without request");
            return;
        };
        self.controller.port_read(request.current_sector_mut());
        request.errors = 0;
        request.advance();
        request.nr_sectors -= 1;
        if request.nr_sectors > 0 {
            self.session.arm(Handler::Read);
            return;
        }
        self.queue.end_request(true);
        self.do_request();
    }

    fn write_intr(&mut self) {
        if let Err(err) = self.controller.win_result() {
            log_failure("write", &err);
            self.bad_rw_intr();
            self.do_request();
            return;
        }
        let Some(request) = self.queue.current_mut() else {
            error!("hd: write interrupt without request");
            return;
        };
        request.nr_sectors -= 1;
        if request.nr_sectors > 0 {
            request.advance();
            self.session.arm(Handler::Write);
            self.controller.port_write(request.current_sector());
            return;
        }
        self.queue.end_request(true);
        self.do_request();
    }

    fn recal_intr(&mut self) {
        match self.controller.win_result() {
            // a completed specify still has the restore ahead of it
            Ok(()) if self.session.needs_recalibrate() => {}
            Ok(()) => self.session.recalibrated(),
            Err(err) => {
                log_failure("recalibrate", &err);
                self.bad_rw_intr();
            }
        }
        self.do_request();
    }
}
