use core::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard, TryLockError};

use crate::{OneWireError, OneWireResult};

/// A bus shared between threads, handed out one owner at a time.
///
/// A multi-pass operation such as a device search must hold the guard for its whole
/// duration, so that no other caller's operations land between its round trips.
#[derive(Debug, Default)]
pub struct ExclusiveBus<B> {
    bus: Mutex<B>,
}

impl<B> ExclusiveBus<B> {
    /// Wrap a bus.
    pub fn new(bus: B) -> Self {
        Self { bus: Mutex::new(bus) }
    }

    /// Wait until the bus is free and take it.
    ///
    /// A previous owner that panicked mid-operation does not lock the bus forever; the
    /// next owner is expected to reset the bus before relying on its state.
    pub fn begin_exclusive(&self) -> ExclusiveGuard<'_, B> {
        let guard = self.bus.lock().unwrap_or_else(|poisoned| {
            log::debug!("previous bus owner panicked");
            poisoned.into_inner()
        });
        ExclusiveGuard { guard }
    }

    /// Take the bus if nobody holds it.
    pub fn try_begin_exclusive(&self) -> Option<ExclusiveGuard<'_, B>> {
        match self.bus.try_lock() {
            Ok(guard) => Some(ExclusiveGuard { guard }),
            Err(TryLockError::Poisoned(poisoned)) => Some(ExclusiveGuard {
                guard: poisoned.into_inner(),
            }),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Run `op` with the bus if nobody holds it.
    ///
    /// # Errors
    /// [`OneWireError::BusInUse`] if another owner holds the bus, otherwise whatever
    /// `op` returns.
    pub fn try_run<R, E>(
        &self,
        op: impl FnOnce(&mut B) -> OneWireResult<R, E>,
    ) -> OneWireResult<R, E> {
        let mut guard = self.try_begin_exclusive().ok_or(OneWireError::BusInUse)?;
        op(&mut guard)
    }

    /// Release the wrapper and return the bus.
    pub fn into_inner(self) -> B {
        self.bus
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Ownership of the bus. Released when dropped.
#[derive(Debug)]
pub struct ExclusiveGuard<'a, B> {
    guard: MutexGuard<'a, B>,
}

impl<B> Deref for ExclusiveGuard<'_, B> {
    type Target = B;
    fn deref(&self) -> &B {
        &self.guard
    }
}

impl<B> DerefMut for ExclusiveGuard<'_, B> {
    fn deref_mut(&mut self) -> &mut B {
        &mut self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread, vec::Vec};

    #[test]
    fn second_owner_is_refused() {
        let bus = ExclusiveBus::new(0u32);
        let mut first = bus.begin_exclusive();
        *first += 1;
        assert!(bus.try_begin_exclusive().is_none());
        drop(first);
        let second = bus.try_begin_exclusive();
        assert_eq!(second.as_deref(), Some(&1));
    }

    #[test]
    fn held_bus_refuses_operations() {
        let bus = ExclusiveBus::new(0u32);
        let held = bus.begin_exclusive();
        let refused = bus.try_run(|count| -> OneWireResult<u32, ()> {
            *count += 1;
            Ok(*count)
        });
        assert!(matches!(refused, Err(OneWireError::BusInUse)));
        drop(held);
        let done = bus.try_run(|count| -> OneWireResult<u32, ()> {
            *count += 1;
            Ok(*count)
        });
        assert!(matches!(done, Ok(1)));
    }

    #[test]
    fn owners_do_not_interleave() {
        let bus = Arc::new(ExclusiveBus::new(Vec::new()));
        let handles: Vec<_> = (0..4u8)
            .map(|id| {
                let bus = Arc::clone(&bus);
                thread::spawn(move || {
                    let mut log = bus.begin_exclusive();
                    for _ in 0..16 {
                        log.push(id);
                        thread::yield_now();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let log = Arc::try_unwrap(bus).unwrap().into_inner();
        assert_eq!(log.len(), 64);
        for run in log.chunks(16) {
            assert!(run.iter().all(|&id| id == run[0]));
        }
    }
}
