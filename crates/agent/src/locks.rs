use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::OwnedMutexGuard;

use noor_core::domain::session::SenderId;

/// Per-sender turn serialization. Entries are weak so a sender's lock is
/// freed once no turn holds or waits for it.
#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<SenderId, Weak<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    /// Waits until no other turn for `sender_id` is running. The guard
    /// releases on drop, including on error paths.
    pub async fn acquire(&self, sender_id: &SenderId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = match self.locks.lock() {
                Ok(locks) => locks,
                Err(poisoned) => poisoned.into_inner(),
            };
            locks.retain(|_, lock| lock.strong_count() > 0);
            match locks.get(sender_id).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(tokio::sync::Mutex::new(()));
                    locks.insert(sender_id.clone(), Arc::downgrade(&lock));
                    lock
                }
            }
        };
        lock.lock_owned().await
    }

    pub fn tracked(&self) -> usize {
        match self.locks.lock() {
            Ok(locks) => locks.values().filter(|lock| lock.strong_count() > 0).count(),
            Err(poisoned) => {
                poisoned.into_inner().values().filter(|lock| lock.strong_count() > 0).count()
            }
        }
    }
}
