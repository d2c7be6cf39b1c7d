//! Thread-safe runtime handle
//!
//! VM threads share one [`Runtime`] behind a lock. Every reference
//! transition happens with the lock held, and a sweep holds it for its whole
//! duration, which stops every other VM thread at its next call site.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use super::Runtime;
use crate::gc::SweepReport;

/// Cloneable handle to a lock-guarded [`Runtime`]
#[derive(Debug, Clone, Default)]
pub struct SharedRuntime {
    inner: Arc<Mutex<Runtime>>,
}

impl SharedRuntime {
    /// Wrap a runtime
    pub fn new(runtime: Runtime) -> Self {
        Self {
            inner: Arc::new(Mutex::new(runtime)),
        }
    }

    /// Lock the runtime
    pub fn lock(&self) -> MutexGuard<'_, Runtime> {
        self.inner.lock()
    }

    /// Run `f` with the runtime locked
    pub fn with<R>(&self, f: impl FnOnce(&mut Runtime) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// Stop the world and collect
    pub fn collect(&self) -> SweepReport {
        self.inner.lock().collect()
    }

    /// Stop the world and shut the runtime down
    pub fn shutdown(&self) -> SweepReport {
        self.inner.lock().shutdown()
    }

    /// Number of handles sharing this runtime
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Class;
    use crate::value::Value;
    use crate::VmResult;

    #[test]
    fn test_handles_share_state() {
        let shared = SharedRuntime::default();
        let other = shared.clone();
        assert_eq!(shared.handle_count(), 2);

        let class = shared
            .with(|rt| rt.load_class(Class::new("demo/Shared", 1, 0)))
            .unwrap();
        assert!(other.lock().heap().classes.get(class).is_some());
    }

    #[test]
    fn test_threads_collect_through_lock() {
        let shared = SharedRuntime::default();
        let class = shared
            .with(|rt| rt.load_class(Class::new("demo/Worker", 0, 0)))
            .unwrap();

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let rt = shared.clone();
                std::thread::spawn(move || {
                    rt.with(|rt| -> VmResult<usize> {
                        let thread = rt.spawn_thread();
                        rt.invoke(thread, class, 0, 1, &[])?;
                        let obj = rt.new_object(class)?;
                        rt.store_local(thread, 0, Value::reference(obj))?;
                        rt.return_from(thread)?;
                        rt.exit_thread(thread)
                    })
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap().unwrap();
        }

        let report = shared.collect();
        assert_eq!(report.objects_reclaimed, 4);
        assert!(shared.lock().heap().objects.is_empty());
    }
}
