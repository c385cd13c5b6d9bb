//! Reactive glue for UI layers.
//!
//! A [`StateHook`] mirrors a store into a `tokio::sync::watch` channel so a
//! render loop can await changes instead of registering callbacks. While the
//! store is still hydrating, the hook reports the default value.

use tokio::sync::watch;

use crate::store::{Store, SubscriptionId};
use crate::value::StateValue;

/// A store subscription exposed as a watch channel.
///
/// Dropping the hook unsubscribes from the store.
pub struct StateHook<T: StateValue> {
    store: Store<T>,
    subscription: SubscriptionId,
    rx: watch::Receiver<T>,
}

impl<T: StateValue> Store<T> {
    /// Observe this store through a watch channel.
    pub fn hook(&self) -> StateHook<T> {
        let initial = self
            .get()
            .unwrap_or_else(|_| self.default_value().clone());
        let (tx, rx) = watch::channel(initial);
        let subscription = self.subscribe(move |state: &T| {
            tx.send_replace(state.clone());
        });

        StateHook {
            store: self.clone(),
            subscription,
            rx,
        }
    }
}

impl<T: StateValue> StateHook<T> {
    /// The latest observed state.
    pub fn current(&self) -> T {
        self.rx.borrow().clone()
    }

    /// The observed store.
    pub fn store(&self) -> &Store<T> {
        &self.store
    }

    /// Wait for the next change and return the new state.
    pub async fn changed(&mut self) -> Option<T> {
        self.rx.changed().await.ok()?;
        let state = self.rx.borrow_and_update().clone();
        Some(state)
    }

    /// Observe a projection of the state. The selector only signals when
    /// the projection changes.
    pub fn select<S, F>(&self, select: F) -> Selector<T, S>
    where
        S: PartialEq + Clone,
        F: Fn(&T) -> S + Send + Sync + 'static,
    {
        let mut rx = self.rx.clone();
        let last = select(&*rx.borrow_and_update());
        Selector {
            rx,
            select: Box::new(select),
            last,
        }
    }
}

impl<T: StateValue> Drop for StateHook<T> {
    fn drop(&mut self) {
        self.store.unsubscribe(self.subscription);
    }
}

/// A projection of a [`StateHook`].
pub struct Selector<T, S> {
    rx: watch::Receiver<T>,
    select: Box<dyn Fn(&T) -> S + Send + Sync>,
    last: S,
}

impl<T, S: PartialEq + Clone> Selector<T, S> {
    /// The last projection handed out.
    pub fn get(&self) -> S {
        self.last.clone()
    }

    /// Wait until the projection differs from the last one handed out.
    ///
    /// Returns `None` once the hook it came from is dropped.
    pub async fn changed(&mut self) -> Option<S> {
        loop {
            self.rx.changed().await.ok()?;
            let next = (self.select)(&*self.rx.borrow_and_update());
            if next != self.last {
                self.last = next.clone();
                return Some(next);
            }
        }
    }
}
