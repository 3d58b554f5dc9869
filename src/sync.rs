/// Spins before a lock attempt gives up
pub const LOCK_SPINS: u32 = 100_000;

/// Locking that gives up instead of spinning forever. Interrupt handlers use it
/// since the code they interrupted may hold the lock.
pub trait TimeOutMutex<'a, T> {
    type Guard;
    fn try_lock_with_timeout(&'a self) -> Option<Self::Guard>;
}

impl<'a, M: 'a> TimeOutMutex<'a, M> for spin::Mutex<M> {
    type Guard = spin::MutexGuard<'a, M>;
    fn try_lock_with_timeout(&'a self) -> Option<Self::Guard> {
        for _ in 0..LOCK_SPINS {
            if let Some(guard) = self.try_lock() {
                return Some(guard);
            }
            core::hint::spin_loop()
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spin::Mutex;

    #[test]
    fn free_lock_is_taken() {
        let mutex = Mutex::new(3);
        *mutex.try_lock_with_timeout().unwrap() += 1;
        assert_eq!(*mutex.lock(), 4);
    }

    #[test]
    fn held_lock_times_out() {
        let mutex = Mutex::new(());
        let _guard = mutex.lock();
        assert!(mutex.try_lock_with_timeout().is_none());
    }
}
