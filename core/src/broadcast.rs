//! Change notifications consumed by widgets (`aliasesChanged`, `filtersChanged`).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

use tokio::sync::mpsc::UnboundedSender;

/// A registered recipient of change notifications
pub enum Listener<T> {
    /// Called synchronously on the notifying thread
    Callback(Arc<dyn Fn(&T) + Send + Sync + 'static>),
    /// Receives a clone of every notification. Dropped automatically once the receiver is gone.
    Channel(UnboundedSender<T>),
}

impl<T> Clone for Listener<T> {
    fn clone(&self) -> Self {
        match self {
            Listener::Callback(callback) => Listener::Callback(callback.clone()),
            Listener::Channel(sender) => Listener::Channel(sender.clone()),
        }
    }
}

pub trait IntoListener<T> {
    fn into_listener(self) -> Listener<T>;
}

impl<F, T> IntoListener<T> for F
where F: Fn(&T) + Send + Sync + 'static
{
    fn into_listener(self) -> Listener<T> { Listener::Callback(Arc::new(self)) }
}

impl<T> IntoListener<T> for UnboundedSender<T> {
    fn into_listener(self) -> Listener<T> { Listener::Channel(self) }
}

impl<T> IntoListener<T> for Listener<T> {
    fn into_listener(self) -> Listener<T> { self }
}

/// Fan-out of one notification type to any number of listeners.
///
/// Listeners are invoked in registration order, outside of any lock, so a listener may register
/// or drop other listeners while being notified.
pub struct ChangeBroadcast<T>(Arc<Inner<T>>);

struct Inner<T> {
    listeners: RwLock<BTreeMap<usize, Listener<T>>>,
    next_id: AtomicUsize,
}

impl<T> Clone for ChangeBroadcast<T> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<T> Default for ChangeBroadcast<T> {
    fn default() -> Self { Self::new() }
}

impl<T> std::fmt::Debug for ChangeBroadcast<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeBroadcast").field("listeners", &self.listener_count()).finish()
    }
}

impl<T> ChangeBroadcast<T> {
    pub fn new() -> Self { Self(Arc::new(Inner { listeners: RwLock::new(BTreeMap::new()), next_id: AtomicUsize::new(0) })) }

    /// Register a listener. It stays registered until the returned guard is dropped.
    #[must_use = "the listener is removed when the guard is dropped"]
    pub fn listen(&self, listener: impl IntoListener<T>) -> ListenerGuard<T> {
        let id = self.0.next_id.fetch_add(1, Ordering::Relaxed);
        self.0.listeners.write().expect("Failed to lock listeners").insert(id, listener.into_listener());
        ListenerGuard { inner: Arc::downgrade(&self.0), id }
    }

    pub fn listener_count(&self) -> usize { self.0.listeners.read().expect("Failed to lock listeners").len() }
}

impl<T: Clone> ChangeBroadcast<T> {
    pub fn send(&self, value: T) {
        let listeners: Vec<(usize, Listener<T>)> =
            self.0.listeners.read().expect("Failed to lock listeners").iter().map(|(id, l)| (*id, l.clone())).collect();

        let mut closed = Vec::new();
        for (id, listener) in listeners {
            match listener {
                Listener::Callback(callback) => callback(&value),
                Listener::Channel(sender) => {
                    if sender.send(value.clone()).is_err() {
                        closed.push(id);
                    }
                }
            }
        }

        if !closed.is_empty() {
            let mut listeners = self.0.listeners.write().expect("Failed to lock listeners");
            for id in closed {
                listeners.remove(&id);
            }
        }
    }
}

/// Keeps a listener registered; dropping it unsubscribes
pub struct ListenerGuard<T> {
    inner: Weak<Inner<T>>,
    id: usize,
}

impl<T> Drop for ListenerGuard<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.listeners.write().expect("Failed to lock listeners").remove(&self.id);
        }
    }
}
