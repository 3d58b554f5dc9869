use lazy_static::lazy_static;
use spin::Mutex;
use uart_16550::SerialPort;

/// COM1, where qemu puts `-serial stdio`
pub const COM1: u16 = 0x3F8;

lazy_static! {
    pub static ref SERIAL1: Mutex<SerialPort> = {
        let mut serial_port = unsafe { SerialPort::new(COM1) };
        serial_port.init();
        Mutex::new(serial_port)
    };
}

use core::fmt::Write;
use x86_64::instructions::interrupts;

#[doc(hidden)]
pub fn _print(args: ::core::fmt::Arguments) {
    // Without this the hd interrupt could log while we hold the port
    interrupts::without_interrupts(|| {
        // Nowhere to report a failed log line
        let _ = SERIAL1.lock().write_fmt(args);
    });
}

/// Prints to the host through the serial interface.
#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::drivers::serial::_print(format_args!($($arg)*))
    };
}

/// Prints to the host through the serial interface, appending a newline.
#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($fmt:expr) => ($crate::serial_print!(concat!($fmt, "\n")));
    ($fmt:expr, $($arg:tt)*) => ($crate::serial_print!(
        concat!($fmt, "\n"), $($arg)*));
}
