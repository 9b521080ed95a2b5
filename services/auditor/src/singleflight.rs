//! Per-key single-flight.
//!
//! At most one flight per key is in progress. Later requesters join the
//! existing flight and observe the same result, success or failure. A flight
//! removes itself from the map once its future has produced a value, so no
//! caller has to release anything.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

/// A shareable handle on an in-progress computation.
pub type Flight<V> = Shared<BoxFuture<'static, V>>;

/// Result of [`SingleFlight::join_or_start`].
pub struct Joined<V: Clone> {
    pub flight: Flight<V>,
    /// This caller started the flight and is responsible for driving it.
    pub leader: bool,
}

pub struct SingleFlight<K, V: Clone> {
    flights: Arc<Mutex<HashMap<K, Flight<V>>>>,
}

impl<K, V: Clone> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the flight for `key`, or start one with `start`.
    ///
    /// `start` runs while the flight map is locked, so no other flight for
    /// `key` can begin concurrently. It may return `None` to decline (for
    /// example, because the value is already known), in which case nothing
    /// is registered and `None` is returned.
    pub fn join_or_start<F, S>(&self, key: K, start: S) -> Option<Joined<V>>
    where
        S: FnOnce() -> Option<F>,
        F: Future<Output = V> + Send + 'static,
    {
        let mut flights = self.flights.lock();
        if let Some(flight) = flights.get(&key) {
            return Some(Joined {
                flight: flight.clone(),
                leader: false,
            });
        }

        let work = start()?;
        let registry = Arc::clone(&self.flights);
        let owned_key = key.clone();
        let flight = async move {
            let value = work.await;
            registry.lock().remove(&owned_key);
            value
        }
        .boxed()
        .shared();

        flights.insert(key, flight.clone());
        Some(Joined {
            flight,
            leader: true,
        })
    }

    /// The in-progress flight for `key`, if any.
    pub fn get(&self, key: &K) -> Option<Flight<V>> {
        self.flights.lock().get(key).cloned()
    }

    /// Number of flights in progress.
    pub fn len(&self) -> usize {
        self.flights.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_second_requester_joins_existing_flight() {
        let flights: SingleFlight<&'static str, u64> = SingleFlight::new();
        let starts = Arc::new(AtomicUsize::new(0));

        let start = |starts: Arc<AtomicUsize>| {
            move || {
                starts.fetch_add(1, Ordering::SeqCst);
                Some(async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    42u64
                })
            }
        };

        let first = flights
            .join_or_start("blob", start(starts.clone()))
            .unwrap();
        let second = flights
            .join_or_start("blob", start(starts.clone()))
            .unwrap();

        assert!(first.leader);
        assert!(!second.leader);
        assert_eq!(starts.load(Ordering::SeqCst), 1);

        let (a, b) = tokio::join!(first.flight, second.flight);
        assert_eq!((a, b), (42, 42));
        assert!(flights.is_empty());
    }

    #[tokio::test]
    async fn test_declined_start_registers_nothing() {
        let flights: SingleFlight<u32, u32> = SingleFlight::new();
        let joined = flights.join_or_start(1, || None::<std::future::Ready<u32>>);
        assert!(joined.is_none());
        assert!(flights.get(&1).is_none());
    }

    #[tokio::test]
    async fn test_failure_reaches_every_waiter() {
        let flights: SingleFlight<u32, Result<u32, Arc<String>>> = SingleFlight::new();
        let leader = flights
            .join_or_start(7, || {
                Some(async {
                    tokio::task::yield_now().await;
                    Err(Arc::new("boom".to_string()))
                })
            })
            .unwrap();

        let waiters: Vec<_> = (0..5).map(|_| flights.get(&7).unwrap()).collect();
        let driver = tokio::spawn(leader.flight);

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap_err().as_str(), "boom");
        }
        assert!(driver.await.unwrap().is_err());
        assert!(flights.is_empty());
    }

    #[tokio::test]
    async fn test_new_flight_after_completion() {
        let flights: SingleFlight<u32, u32> = SingleFlight::new();

        let first = flights
            .join_or_start(1, || Some(async { 1 }))
            .unwrap();
        assert_eq!(first.flight.await, 1);

        let second = flights
            .join_or_start(1, || Some(async { 2 }))
            .unwrap();
        assert!(second.leader);
        assert_eq!(second.flight.await, 2);
    }
}
