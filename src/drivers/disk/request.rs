use alloc::collections::VecDeque;
use alloc::vec;
use alloc::vec::Vec;
use log::error;

use super::{device_number, MAX_SECTORS, SECTOR_SIZE};

pub const READ: u8 = 0;
pub const WRITE: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Read,
    Write,
}
impl TryFrom<u8> for RequestKind {
    type Error = u8;
    fn try_from(cmd: u8) -> Result<Self, Self::Error> {
        match cmd {
            READ => Ok(Self::Read),
            WRITE => Ok(Self::Write),
            other => Err(other),
        }
    }
}

/// A block request as the block layer queues it.
/// The driver moves `sector`, `cursor` and `nr_sectors` forward as sectors complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub minor: u16,
    /// Partition relative
    pub sector: u32,
    pub nr_sectors: u32,
    /// Raw block layer command, see [`READ`] and [`WRITE`]
    pub cmd: u8,
    pub buffer: Vec<u8>,
    /// Byte offset of the next sector in `buffer`
    pub cursor: usize,
    pub errors: u32,
}
impl Request {
    pub fn read(minor: u16, sector: u32, nr_sectors: u32) -> Self {
        Self {
            minor,
            sector,
            nr_sectors,
            cmd: READ,
            buffer: vec![0; nr_sectors as usize * SECTOR_SIZE],
            cursor: 0,
            errors: 0,
        }
    }
    /// `data` is padded with zeroes up to a whole number of sectors
    pub fn write(minor: u16, sector: u32, data: &[u8]) -> Self {
        let nr_sectors = data.len().div_ceil(SECTOR_SIZE).max(1);
        let mut buffer = vec![0; nr_sectors * SECTOR_SIZE];
        buffer[..data.len()].copy_from_slice(data);
        Self {
            minor,
            sector,
            nr_sectors: nr_sectors as u32,
            cmd: WRITE,
            buffer,
            cursor: 0,
            errors: 0,
        }
    }
    pub fn kind(&self) -> Result<RequestKind, u8> {
        RequestKind::try_from(self.cmd)
    }
    /// Sector at the cursor
    pub fn current_sector(&self) -> &[u8] {
        &self.buffer[self.cursor..self.cursor + SECTOR_SIZE]
    }
    pub fn current_sector_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[self.cursor..self.cursor + SECTOR_SIZE]
    }
    /// Whether the remaining sectors fit one command and the buffer past the cursor
    pub fn is_well_formed(&self) -> bool {
        (1..=MAX_SECTORS).contains(&self.nr_sectors)
            && self.buffer.len() >= self.cursor + self.nr_sectors as usize * SECTOR_SIZE
    }
    /// Moves to the next sector of the transfer
    pub fn advance(&mut self) {
        self.cursor += SECTOR_SIZE;
        self.sector += 1;
    }
}

/// The block layer side the driver talks to. The head of the queue is the
/// request being worked on.
pub trait RequestQueue {
    fn current(&self) -> Option<&Request>;
    fn current_mut(&mut self) -> Option<&mut Request>;
    /// Retires the head request, `uptodate` tells waiters whether the buffer is valid
    fn end_request(&mut self, uptodate: bool);
    fn push(&mut self, request: Request);
    fn is_empty(&self) -> bool {
        self.current().is_none()
    }
}

/// A finished request and whether its buffer holds valid data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    pub request: Request,
    pub uptodate: bool,
}

/// FIFO request queue keeping finished requests until they are collected
#[derive(Debug, Default)]
pub struct BlockQueue {
    pending: VecDeque<Request>,
    finished: Vec<Finished>,
}
impl BlockQueue {
    pub const fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            finished: Vec::new(),
        }
    }
    pub fn len(&self) -> usize {
        self.pending.len()
    }
    pub fn take_finished(&mut self) -> Vec<Finished> {
        core::mem::take(&mut self.finished)
    }
}
impl RequestQueue for BlockQueue {
    fn current(&self) -> Option<&Request> {
        self.pending.front()
    }
    fn current_mut(&mut self) -> Option<&mut Request> {
        self.pending.front_mut()
    }
    fn end_request(&mut self, uptodate: bool) {
        let Some(request) = self.pending.pop_front() else {
            return;
        };
        if !uptodate {
            error!(
                "I/O error: dev {:04x}, sector {}",
                device_number(request.minor),
                request.sector
            );
        }
        self.finished.push(Finished { request, uptodate });
    }
    fn push(&mut self, request: Request) {
        self.pending.push_back(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_pads_to_sectors() {
        let request = Request::write(0, 4, &[7u8; 600]);
        assert_eq!(request.nr_sectors, 2);
        assert_eq!(request.buffer.len(), 1024);
        assert_eq!(request.buffer[599], 7);
        assert_eq!(request.buffer[600], 0);
        assert_eq!(request.kind(), Ok(RequestKind::Write));
    }

    #[test]
    fn unknown_command() {
        let mut request = Request::read(0, 0, 1);
        request.cmd = 9;
        assert_eq!(request.kind(), Err(9));
    }

    #[test]
    fn queue_is_fifo() {
        let mut queue = BlockQueue::new();
        assert!(queue.is_empty());
        queue.push(Request::read(0, 1, 1));
        queue.push(Request::read(0, 2, 1));
        assert_eq!(queue.current().unwrap().sector, 1);
        queue.end_request(true);
        assert_eq!(queue.current().unwrap().sector, 2);
        queue.end_request(false);
        assert!(queue.is_empty());
        let finished = queue.take_finished();
        assert_eq!(finished.len(), 2);
        assert!(finished[0].uptodate);
        assert!(!finished[1].uptodate);
        assert!(queue.take_finished().is_empty());
    }

    #[test]
    fn well_formed_requests() {
        assert!(Request::read(0, 0, 1).is_well_formed());
        assert!(Request::read(0, 0, MAX_SECTORS).is_well_formed());
        assert!(!Request::read(0, 0, 0).is_well_formed());
        assert!(!Request::read(0, 0, MAX_SECTORS + 1).is_well_formed());
        let mut request = Request::read(0, 0, 2);
        request.nr_sectors = 3;
        assert!(!request.is_well_formed());
        // halfway through, one sector left past the cursor
        request.nr_sectors = 1;
        request.advance();
        assert!(request.is_well_formed());
        request.nr_sectors = 2;
        assert!(!request.is_well_formed());
    }

    #[test]
    fn advance_moves_cursor_and_sector() {
        let mut request = Request::read(1, 10, 3);
        request.current_sector_mut()[0] = 1;
        request.advance();
        assert_eq!(request.cursor, SECTOR_SIZE);
        assert_eq!(request.sector, 11);
        assert_eq!(request.current_sector()[0], 0);
        assert_eq!(request.buffer[0], 1);
    }
}
