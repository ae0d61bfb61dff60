use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

fn recover<G>(
    poisoned: PoisonError<G>,
    target: &'static str,
    op: &'static str,
    lock_kind: &'static str,
) -> G {
    warn!(
        op,
        target_module = target,
        lock_kind,
        result = "poisoned_recovered",
        hint = "cached state may be stale after a panic in another thread",
        "Recovered from poisoned lock"
    );
    poisoned.into_inner()
}

pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    target: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    lock.read()
        .unwrap_or_else(|poisoned| recover(poisoned, target, op, "rwlock.read"))
}

pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    target: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    lock.write()
        .unwrap_or_else(|poisoned| recover(poisoned, target, op, "rwlock.write"))
}

pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    lock.lock()
        .unwrap_or_else(|poisoned| recover(poisoned, target, op, "mutex.lock"))
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    #[test]
    fn poisoned_rwlock_is_recovered() {
        let lock = RwLock::new(1);
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = lock.write().expect("first write");
            panic!("poison");
        }));
        assert!(lock.is_poisoned());

        *rw_write(&lock, "cache::lock", "test") += 1;
        assert_eq!(*rw_read(&lock, "cache::lock", "test"), 2);
    }

    #[test]
    fn poisoned_mutex_is_recovered() {
        let lock = Mutex::new(vec![1]);
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = lock.lock().expect("first lock");
            panic!("poison");
        }));

        mutex_lock(&lock, "cache::lock", "test").push(2);
        assert_eq!(*mutex_lock(&lock, "cache::lock", "test"), vec![1, 2]);
    }
}
