use bit_field::BitField;
use pic8259::ChainedPics;
use spin::Mutex;
use x86_64::instructions::port::Port;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame};

pub const PIC_1_OFFSET: u8 = 32;
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

pub static PICS: Mutex<ChainedPics> =
    Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

const MASTER_MASK: u16 = 0x21;
const SLAVE_MASK: u16 = 0xA1;

#[derive(Debug, Clone, Copy)]
#[repr(u8)]
pub enum InterruptIndex {
    /// Slave PIC line on the master
    Cascade = 2,
    PrimaryAtaDisk = 14,
}
impl InterruptIndex {
    pub fn vector(self) -> u8 {
        PIC_1_OFFSET + self as u8
    }
}

pub extern "x86-interrupt" fn hd_interrupt(_stack_frame: InterruptStackFrame) {
    crate::state::hd_interrupt();
    notify_end_of_interrupt(InterruptIndex::PrimaryAtaDisk);
}

/// Installs the IRQ14 gate then unmasks the cascade line and IRQ14
pub fn hd_init(idt: &mut InterruptDescriptorTable) {
    idt[InterruptIndex::PrimaryAtaDisk.vector() as usize].set_handler_fn(hd_interrupt);
    unmask(MASTER_MASK, InterruptIndex::Cascade as usize);
    unmask(SLAVE_MASK, InterruptIndex::PrimaryAtaDisk as usize - 8);
}

fn unmask(port: u16, line: usize) {
    let mut port: Port<u8> = Port::new(port);
    // Safety: the PIC mask registers only gate interrupt lines
    unsafe {
        let mut mask = port.read();
        mask.set_bit(line, false);
        port.write(mask);
    }
}

// Safe wrapper because the interrupt index should always be valid (if InterruptIndex enum is right...)
fn notify_end_of_interrupt(interrupt: InterruptIndex) {
    unsafe {
        PICS.lock().notify_end_of_interrupt(interrupt.vector());
    }
}
