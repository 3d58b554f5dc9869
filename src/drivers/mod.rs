pub mod disk;
#[cfg(feature = "irq")]
pub mod interrupts;
#[cfg(target_arch = "x86_64")]
pub mod serial;
