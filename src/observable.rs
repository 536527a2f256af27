//! In-memory last-value cache and observer lists.
//!
//! Callbacks run synchronously on whichever task delivers the value, so they
//! must return quickly. No lock is held while a callback runs, which makes it
//! legal to subscribe or unsubscribe from inside a callback.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Callback<T> = dyn Fn(&T) + Send + Sync;

struct Registration<T> {
    id: u64,
    active: AtomicBool,
    callback: Box<Callback<T>>,
}

struct Registrations<T> {
    entries: Vec<Arc<Registration<T>>>,
}

trait Detach: Send + Sync {
    fn detach(&self, id: u64);
}

impl<T: 'static> Detach for Mutex<Registrations<T>> {
    fn detach(&self, id: u64) {
        let mut registrations = self.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(index) = registrations.entries.iter().position(|r| r.id == id) {
            let registration = registrations.entries.remove(index);
            registration.active.store(false, Ordering::Release);
        }
    }
}

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Handle returned by [`Registry::subscribe`].
///
/// Dropping the handle keeps the registration alive; call
/// [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    id: u64,
    registry: Weak<dyn Detach>,
}

impl Subscription {
    /// Removes exactly this registration. Calling it again is a no-op.
    pub fn unsubscribe(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.detach(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Ordered observer list. Broadcasts reach callbacks in registration order.
pub struct Registry<T> {
    inner: Arc<Mutex<Registrations<T>>>,
}

impl<T> Clone for Registry<T> {
    fn clone(&self) -> Self {
        Registry {
            inner: self.inner.clone(),
        }
    }
}

impl<T: 'static> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Registry<T> {
    pub fn new() -> Self {
        Registry {
            inner: Arc::new(Mutex::new(Registrations {
                entries: Vec::new(),
            })),
        }
    }

    fn registrations(&self) -> MutexGuard<'_, Registrations<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed);

        self.registrations().entries.push(Arc::new(Registration {
            id,
            active: AtomicBool::new(true),
            callback: Box::new(callback),
        }));

        let inner: Arc<dyn Detach> = self.inner.clone();
        Subscription {
            id,
            registry: Arc::downgrade(&inner),
        }
    }

    pub fn broadcast(&self, value: &T) {
        let snapshot = self.registrations().entries.clone();

        for registration in snapshot {
            // Unsubscribed by an earlier callback of this same broadcast
            if registration.active.load(Ordering::Acquire) {
                (registration.callback)(value);
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.registrations().entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Last received value plus the observers interested in it.
pub struct Observable<T> {
    last: Arc<Mutex<Option<T>>>,
    registry: Registry<T>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Observable {
            last: self.last.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl<T: Clone + 'static> Default for Observable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + 'static> Observable<T> {
    pub fn new() -> Self {
        Observable {
            last: Arc::new(Mutex::new(None)),
            registry: Registry::new(),
        }
    }

    pub fn with_value(value: T) -> Self {
        Observable {
            last: Arc::new(Mutex::new(Some(value))),
            registry: Registry::new(),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<T>> {
        self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores `value` unconditionally, then hands it to every subscriber.
    pub fn record_and_broadcast(&self, value: T) {
        *self.slot() = Some(value.clone());
        self.registry.broadcast(&value);
    }

    /// Mutates the cached value in place and broadcasts the result.
    /// Does nothing while no value has been recorded.
    pub fn update(&self, mutate: impl FnOnce(&mut T)) {
        let updated = {
            let mut slot = self.slot();
            match slot.as_mut() {
                Some(value) => {
                    mutate(value);
                    value.clone()
                }
                None => return,
            }
        };

        self.registry.broadcast(&updated);
    }

    pub fn last(&self) -> Option<T> {
        self.slot().clone()
    }

    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        self.registry.subscribe(callback)
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder<T: Clone + Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(&T) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |value: &T| sink.lock().unwrap().push(value.clone()))
    }

    #[test]
    fn test_last_is_absent_until_recorded() {
        let observable = Observable::<u8>::new();
        assert_eq!(observable.last(), None);

        observable.record_and_broadcast(42);
        assert_eq!(observable.last(), Some(42));

        observable.record_and_broadcast(7);
        assert_eq!(observable.last(), Some(7));
    }

    #[test]
    fn test_every_subscriber_gets_each_broadcast_once() {
        let observable = Observable::<u8>::new();
        let (first, first_cb) = recorder();
        let (second, second_cb) = recorder();
        let _a = observable.subscribe(first_cb);
        let _b = observable.subscribe(second_cb);

        observable.record_and_broadcast(1);
        observable.record_and_broadcast(2);

        assert_eq!(*first.lock().unwrap(), vec![1, 2]);
        assert_eq!(*second.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_unsubscribed_callback_receives_nothing() {
        let observable = Observable::<u8>::new();
        let (seen, callback) = recorder();
        let (other, other_cb) = recorder();
        let subscription = observable.subscribe(callback);
        let _other = observable.subscribe(other_cb);

        observable.record_and_broadcast(1);
        subscription.unsubscribe();
        subscription.unsubscribe();
        observable.record_and_broadcast(2);
        observable.record_and_broadcast(3);

        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert_eq!(*other.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(observable.subscriber_count(), 1);
    }

    #[test]
    fn test_broadcast_in_registration_order() {
        let registry = Registry::<u8>::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let subscriptions: Vec<_> = (0..4)
            .map(|index| {
                let order = order.clone();
                registry.subscribe(move |_| order.lock().unwrap().push(index))
            })
            .collect();

        registry.broadcast(&0);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(subscriptions.len(), 4);
    }

    #[test]
    fn test_unsubscribe_from_inside_callback() {
        let registry = Registry::<u8>::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let (later, later_cb) = recorder();

        let own_slot = slot.clone();
        let subscription = registry.subscribe(move |_| {
            if let Some(subscription) = own_slot.lock().unwrap().as_ref() {
                subscription.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(subscription);
        let _later = registry.subscribe(later_cb);

        registry.broadcast(&1);
        registry.broadcast(&2);

        assert_eq!(registry.len(), 1);
        assert_eq!(*later.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_callback_unsubscribing_a_later_one_mid_broadcast() {
        let registry = Registry::<u8>::new();
        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let (seen, victim_cb) = recorder();

        let target = victim.clone();
        let _killer = registry.subscribe(move |_| {
            if let Some(subscription) = target.lock().unwrap().as_ref() {
                subscription.unsubscribe();
            }
        });
        *victim.lock().unwrap() = Some(registry.subscribe(victim_cb));

        registry.broadcast(&1);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_update_requires_value() {
        let observable = Observable::<u8>::new();
        let (seen, callback) = recorder();
        let _s = observable.subscribe(callback);

        observable.update(|v| *v += 1);
        assert_eq!(observable.last(), None);

        let observable = Observable::with_value(10u8);
        let (seen_with_value, callback) = recorder();
        let _s = observable.subscribe(callback);
        observable.update(|v| *v += 1);

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(observable.last(), Some(11));
        assert_eq!(*seen_with_value.lock().unwrap(), vec![11]);
    }

    #[test]
    fn test_subscription_outliving_registry() {
        let subscription = {
            let registry = Registry::<u8>::new();
            registry.subscribe(|_| {})
        };
        subscription.unsubscribe();
    }
}
