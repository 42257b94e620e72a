use std::{
    collections::HashSet,
    fmt,
    hash::Hash,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
};

type Held<K> = Arc<Mutex<HashSet<K>>>;

/// Keyed mutual exclusion: at most one live [`Ticket`] per key.
pub struct TicketBook<K: Eq + Hash> {
    held: Held<K>,
}

impl<K: Eq + Hash> Clone for TicketBook<K> {
    fn clone(&self) -> Self {
        Self {
            held: Arc::clone(&self.held),
        }
    }
}

impl<K: Eq + Hash> Default for TicketBook<K> {
    fn default() -> Self {
        Self {
            held: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

impl<K: Eq + Hash + fmt::Debug> fmt::Debug for TicketBook<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(lock(&self.held).iter()).finish()
    }
}

impl<K: Eq + Hash + Clone> TicketBook<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `None` while another ticket for `key` is alive.
    pub fn try_acquire(&self, key: K) -> Option<Ticket<K>> {
        if !lock(&self.held).insert(key.clone()) {
            return None;
        }
        Some(Ticket {
            key,
            held: Arc::clone(&self.held),
        })
    }

    pub fn contains(&self, key: &K) -> bool {
        lock(&self.held).contains(key)
    }

    pub fn len(&self) -> usize {
        lock(&self.held).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Released on drop, whichever way its holder exits.
#[must_use = "the key is released as soon as the ticket is dropped"]
pub struct Ticket<K: Eq + Hash> {
    key: K,
    held: Held<K>,
}

impl<K: Eq + Hash> Ticket<K> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash> Drop for Ticket<K> {
    fn drop(&mut self) {
        lock(&self.held).remove(&self.key);
    }
}

fn lock<K>(held: &Mutex<HashSet<K>>) -> MutexGuard<'_, HashSet<K>> {
    held.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;

    #[test]
    fn try_acquire__refuses_second_ticket_for_same_key() {
        // given
        let book = TicketBook::new();
        let _first = book.try_acquire("alice").unwrap();

        // when
        let second = book.try_acquire("alice");

        // then
        assert!(second.is_none());
        assert!(book.contains(&"alice"));
    }

    #[test]
    fn try_acquire__keys_are_independent() {
        let book = TicketBook::new();
        let alice = book.try_acquire("alice");
        let bob = book.try_acquire("bob");
        assert!(alice.is_some());
        assert!(bob.is_some());
        assert_eq!(book.len(), 2);
    }

    #[test]
    fn drop__releases_key() {
        // given
        let book = TicketBook::new();
        let ticket = book.try_acquire(7u8).unwrap();
        assert_eq!(ticket.key(), &7);

        // when
        drop(ticket);

        // then
        assert!(book.is_empty());
        assert!(book.try_acquire(7u8).is_some());
    }

    #[test]
    fn drop__releases_key_when_holder_panics() {
        let book = TicketBook::new();
        let shared = book.clone();
        let result = std::panic::catch_unwind(move || {
            let _ticket = shared.try_acquire(1u8).unwrap();
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(!book.contains(&1));
    }

    #[tokio::test]
    async fn drop__aborted_holder_releases_ticket() {
        // given
        let book = TicketBook::new();
        let ticket = book.try_acquire(1u8).unwrap();
        let holder = tokio::spawn(async move {
            let _ticket = ticket;
            std::future::pending::<()>().await;
        });

        // when
        holder.abort();
        let _ = holder.await;

        // then
        assert!(!book.contains(&1));
    }
}
