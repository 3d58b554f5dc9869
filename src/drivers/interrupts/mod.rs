pub mod hardware;

pub use hardware::{hd_init, InterruptIndex, PICS};
