//! Per-account nonce sequencing.
//!
//! A [`NonceLease`] is exclusive per Safe: while one is held, no other
//! caller can match, allocate or publish for the same account. When the relay
//! listing was read, it is authoritative for the next nonce. The locally
//! committed nonce only fills in while the listing is unavailable, and only for
//! a short time after it was committed.

use alloy::primitives::Address;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// How long a committed nonce stands in for the relay listing.
pub const DEFAULT_COMMIT_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct Committed {
    nonce: u64,
    at: Instant,
}

#[derive(Debug, Default)]
struct AccountSlot {
    committed: Option<Committed>,
}

impl AccountSlot {
    fn fresh(&self, ttl: Duration) -> Option<u64> {
        self.committed.filter(|c| c.at.elapsed() < ttl).map(|c| c.nonce)
    }
}

type Slot = Arc<AsyncMutex<AccountSlot>>;

#[derive(Debug)]
pub struct NonceSequencer {
    accounts: Mutex<HashMap<Address, Slot>>,
    ttl: Duration,
}

impl Default for NonceSequencer {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_COMMIT_TTL)
    }
}

impl NonceSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self { accounts: Mutex::default(), ttl }
    }

    /// Waits for exclusive access to `safe`.
    pub async fn lease(&self, safe: Address) -> NonceLease {
        let slot = {
            let mut accounts = self.accounts.lock();
            self.prune(&mut accounts, safe);
            accounts.entry(safe).or_default().clone()
        };
        let guard = slot.lock_owned().await;
        NonceLease { safe, guard, ttl: self.ttl, allocated: None }
    }

    /// Drops slots nobody holds or waits on and whose commit has expired.
    fn prune(&self, accounts: &mut HashMap<Address, Slot>, keep: Address) {
        accounts.retain(|address, slot| {
            *address == keep
                || Arc::strong_count(slot) > 1
                || slot.try_lock().map_or(true, |guard| guard.fresh(self.ttl).is_some())
        });
    }
}

/// Exclusive access to one account's nonce. Dropping it uncommitted leaves the
/// sequencer unchanged.
#[derive(Debug)]
pub struct NonceLease {
    safe: Address,
    guard: OwnedMutexGuard<AccountSlot>,
    ttl: Duration,
    allocated: Option<u64>,
}

impl NonceLease {
    pub fn safe(&self) -> Address {
        self.safe
    }

    /// The last committed nonce, if it has not expired.
    pub fn last_committed(&self) -> Option<u64> {
        self.guard.fresh(self.ttl)
    }

    /// Next free nonce. `relay_next` is `None` when the relay listing could not
    /// be read.
    pub fn allocate(&mut self, chain_nonce: u64, relay_next: Option<u64>) -> u64 {
        let nonce = match relay_next {
            Some(relay_next) => chain_nonce.max(relay_next),
            None => {
                let local_next = self.last_committed().map_or(0, |nonce| nonce + 1);
                chain_nonce.max(local_next)
            }
        };
        debug!(safe = %self.safe, chain_nonce, ?relay_next, nonce, "Allocated nonce");
        self.allocated = Some(nonce);
        nonce
    }

    /// Records the allocated nonce as published.
    pub fn commit(mut self) {
        if let Some(nonce) = self.allocated.take() {
            self.guard.committed = Some(Committed { nonce, at: Instant::now() });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAFE: Address = Address::repeat_byte(0x5a);

    #[tokio::test]
    async fn relay_listing_is_authoritative() {
        let sequencer = NonceSequencer::new();

        let mut lease = sequencer.lease(SAFE).await;
        assert_eq!(lease.allocate(0, Some(0)), 0);
        lease.commit();

        // The entry at nonce 0 disappeared from the relay: nonce 0 is free again.
        let mut lease = sequencer.lease(SAFE).await;
        assert_eq!(lease.last_committed(), Some(0));
        assert_eq!(lease.allocate(0, Some(0)), 0);
        lease.commit();

        let mut lease = sequencer.lease(SAFE).await;
        assert_eq!(lease.allocate(9, Some(4)), 9);
    }

    #[tokio::test]
    async fn committed_nonce_covers_unavailable_listing() {
        let sequencer = NonceSequencer::new();

        let mut lease = sequencer.lease(SAFE).await;
        assert_eq!(lease.allocate(3, None), 3);
        lease.commit();

        let mut lease = sequencer.lease(SAFE).await;
        assert_eq!(lease.allocate(3, None), 4);
        lease.commit();

        let mut lease = sequencer.lease(SAFE).await;
        assert_eq!(lease.allocate(7, None), 7);
    }

    #[tokio::test]
    async fn committed_nonce_expires() {
        let sequencer = NonceSequencer::with_ttl(Duration::ZERO);

        let mut lease = sequencer.lease(SAFE).await;
        lease.allocate(3, None);
        lease.commit();

        let mut lease = sequencer.lease(SAFE).await;
        assert_eq!(lease.last_committed(), None);
        assert_eq!(lease.allocate(3, None), 3);
    }

    #[tokio::test]
    async fn dropped_lease_commits_nothing() {
        let sequencer = NonceSequencer::new();
        {
            let mut lease = sequencer.lease(SAFE).await;
            lease.allocate(5, Some(6));
        }
        let mut lease = sequencer.lease(SAFE).await;
        assert_eq!(lease.last_committed(), None);
        assert_eq!(lease.allocate(5, None), 5);
    }

    #[tokio::test]
    async fn idle_expired_slots_are_pruned() {
        let sequencer = NonceSequencer::with_ttl(Duration::ZERO);
        for byte in 1..=4 {
            let mut lease = sequencer.lease(Address::repeat_byte(byte)).await;
            lease.allocate(0, None);
            lease.commit();
        }

        let held = sequencer.lease(SAFE).await;
        assert_eq!(sequencer.accounts.lock().len(), 1);

        // Held slots survive pruning.
        let _other = sequencer.lease(Address::repeat_byte(9)).await;
        let accounts = sequencer.accounts.lock();
        assert!(accounts.contains_key(&SAFE));
        assert_eq!(accounts.len(), 2);
        drop(accounts);
        drop(held);
    }

    #[tokio::test]
    async fn fresh_slots_are_kept() {
        let sequencer = NonceSequencer::new();
        let mut lease = sequencer.lease(Address::repeat_byte(1)).await;
        lease.allocate(0, None);
        lease.commit();

        let _lease = sequencer.lease(SAFE).await;
        assert_eq!(sequencer.accounts.lock().len(), 2);
    }

    #[tokio::test]
    async fn leases_are_exclusive_per_account() {
        let sequencer = Arc::new(NonceSequencer::new());
        let held = sequencer.lease(SAFE).await;

        let contender = {
            let sequencer = sequencer.clone();
            tokio::spawn(async move { sequencer.lease(SAFE).await.safe() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        // Other accounts are unaffected.
        let other = sequencer.lease(Address::repeat_byte(0x01)).await;
        drop(other);

        drop(held);
        assert_eq!(contender.await.unwrap(), SAFE);
    }
}
