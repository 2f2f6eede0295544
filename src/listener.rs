//! Listener registrations for live subscriptions
//!
//! Both gateways hand out a [`ListenerRegistration`] when a caller subscribes
//! to session changes or to a record collection. Each subscription is served
//! by one tokio task which feeds values through a [`Dispatcher`]; the
//! registration and the dispatcher share a small piece of state that provides
//! the cancellation guarantees:
//!
//! - once [`ListenerRegistration::remove`] returns, the callback is never
//!   invoked again, even if a value was already on its way;
//! - `remove` is idempotent;
//! - `remove` may be called from inside the callback itself, or from inside
//!   another listener's callback.
//!
//! Dropping a registration does NOT cancel the subscription. Use the stream
//! variants ([`ListenerStream`]) for drop-to-cancel behavior.

use futures::Stream;
use std::pin::Pin;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};

thread_local! {
    /// Listener callbacks currently running on this thread
    static DISPATCH_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Handle for removing a live listener
///
/// Cloning the handle yields another handle to the same subscription, which is
/// how a callback gets hold of its own registration.
#[derive(Clone)]
pub struct ListenerRegistration {
    state: Arc<ListenerState>,
}

struct ListenerState {
    cancelled: AtomicBool,
    /// Held for the whole duration of one callback invocation
    in_flight: Mutex<()>,
    /// Stops the task pumping backend events
    cancel_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl ListenerRegistration {
    /// Removes the listener and stops receiving updates
    ///
    /// When called from outside any listener callback while this listener's
    /// callback is running on another thread, this blocks until that
    /// invocation has returned.
    ///
    /// Called from inside a callback (this listener's or another one's) it
    /// returns without waiting: no new invocation starts afterwards, but one
    /// already running on another thread may still be finishing.
    pub fn remove(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);

        if let Some(tx) = lock(&self.state.cancel_tx).take() {
            // Pump task may already be gone
            let _ = tx.send(());
        }

        // Inside a callback: the running one may be waiting on us
        if DISPATCH_DEPTH.with(Cell::get) > 0 {
            return;
        }

        // Wait out an invocation that started before the flag was set
        drop(lock(&self.state.in_flight));
    }

    /// Whether [`remove`](Self::remove) has been called
    pub fn is_removed(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("removed", &self.is_removed())
            .finish()
    }
}

/// Delivers values to a subscriber callback, honoring cancellation
pub(crate) struct Dispatcher<T> {
    state: Arc<ListenerState>,
    callback: Box<dyn FnMut(T) + Send>,
}

impl<T> Dispatcher<T> {
    /// Invoke the callback with `value` unless the listener was removed
    ///
    /// Returns `false` once the listener is removed, telling the pump task to
    /// stop.
    pub(crate) fn deliver(&mut self, value: T) -> bool {
        let _in_flight = lock(&self.state.in_flight);
        if self.state.cancelled.load(Ordering::SeqCst) {
            return false;
        }

        {
            let _mark = DispatchMark::enter();
            (self.callback)(value);
        }

        !self.state.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn is_removed(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }
}

/// Marks this thread as running a callback; unwound on drop so a panicking
/// callback does not leave a stale mark behind.
struct DispatchMark;

impl DispatchMark {
    fn enter() -> Self {
        DISPATCH_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self
    }
}

impl Drop for DispatchMark {
    fn drop(&mut self) {
        DISPATCH_DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

/// Create a registration, its dispatcher, and the pump task's cancel signal
pub(crate) fn register<T, F>(callback: F) -> (ListenerRegistration, Dispatcher<T>, oneshot::Receiver<()>)
where
    F: FnMut(T) + Send + 'static,
{
    let (cancel_tx, cancel_rx) = oneshot::channel();
    let state = Arc::new(ListenerState {
        cancelled: AtomicBool::new(false),
        in_flight: Mutex::new(()),
        cancel_tx: Mutex::new(Some(cancel_tx)),
    });

    let registration = ListenerRegistration {
        state: Arc::clone(&state),
    };
    let dispatcher = Dispatcher {
        state,
        callback: Box::new(callback),
    };

    (registration, dispatcher, cancel_rx)
}

/// A stream of listener updates
///
/// Wraps a [`ListenerRegistration`] whose callback forwards into a channel.
/// When dropped, the underlying listener is removed.
pub struct ListenerStream<T> {
    receiver: mpsc::UnboundedReceiver<T>,
    registration: ListenerRegistration,
}

impl<T: Send + 'static> ListenerStream<T> {
    /// Build the forwarding callback and the stream that drains it
    ///
    /// The registration must be attached with [`attach`](Self::attach) once
    /// the caller has subscribed with the returned callback.
    pub(crate) fn channel() -> (impl FnMut(T) + Send + 'static, mpsc::UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let forward = move |value: T| {
            // Receiver gone means the stream was dropped; removal follows
            let _ = tx.send(value);
        };
        (forward, rx)
    }

    pub(crate) fn attach(receiver: mpsc::UnboundedReceiver<T>, registration: ListenerRegistration) -> Self {
        Self {
            receiver,
            registration,
        }
    }

    /// The registration backing this stream
    pub fn registration(&self) -> &ListenerRegistration {
        &self.registration
    }
}

impl<T> Stream for ListenerStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl<T> Drop for ListenerStream<T> {
    fn drop(&mut self) {
        self.registration.remove();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking callback poisons the mutex; the guarded data stays valid
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_deliver_invokes_callback() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let (_registration, mut dispatcher, _cancel_rx) = register(move |n: usize| {
            counter.fetch_add(n, Ordering::SeqCst);
        });

        assert!(dispatcher.deliver(2));
        assert!(dispatcher.deliver(3));
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_remove_stops_delivery() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let (registration, mut dispatcher, _cancel_rx) = register(move |_: ()| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        registration.remove();

        assert!(!dispatcher.deliver(()));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(registration.is_removed());
        assert!(dispatcher.is_removed());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let (registration, _dispatcher, mut cancel_rx) = register(|_: ()| {});

        registration.remove();
        registration.remove();
        registration.clone().remove();

        assert!(cancel_rx.try_recv().is_ok());
    }

    #[test]
    fn test_remove_from_inside_callback() {
        let slot: Arc<Mutex<Option<ListenerRegistration>>> = Arc::new(Mutex::new(None));
        let count = Arc::new(AtomicUsize::new(0));

        let inner_slot = Arc::clone(&slot);
        let counter = Arc::clone(&count);
        let (registration, mut dispatcher, _cancel_rx) = register(move |_: ()| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(reg) = inner_slot.lock().unwrap().as_ref() {
                reg.remove();
            }
        });
        *slot.lock().unwrap() = Some(registration);

        // Removal inside the callback must not deadlock and ends the pump
        assert!(!dispatcher.deliver(()));
        assert!(!dispatcher.deliver(()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_waits_for_running_callback() {
        let finished = Arc::new(AtomicBool::new(false));
        let done = Arc::clone(&finished);
        let (started_tx, started_rx) = std::sync::mpsc::channel();

        let (registration, mut dispatcher, _cancel_rx) = register(move |_: ()| {
            started_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(50));
            done.store(true, Ordering::SeqCst);
        });

        let pump = thread::spawn(move || dispatcher.deliver(()));
        started_rx.recv().unwrap();

        registration.remove();
        // The in-flight invocation completed before remove returned
        assert!(finished.load(Ordering::SeqCst));
        assert!(!pump.join().unwrap());
    }

    #[test]
    fn test_callbacks_removing_each_other_do_not_deadlock() {
        let slots: [Arc<Mutex<Option<ListenerRegistration>>>; 2] = Default::default();
        let barrier = Arc::new(std::sync::Barrier::new(2));

        let mut dispatchers = Vec::new();
        let mut registrations = Vec::new();
        for i in 0..2 {
            let other = Arc::clone(&slots[1 - i]);
            let both_running = Arc::clone(&barrier);
            let (registration, dispatcher, _cancel_rx) = register(move |_: ()| {
                both_running.wait();
                if let Some(reg) = other.lock().unwrap().as_ref() {
                    reg.remove();
                }
            });
            registrations.push(registration);
            dispatchers.push(dispatcher);
        }
        for (slot, registration) in slots.iter().zip(&registrations) {
            *slot.lock().unwrap() = Some(registration.clone());
        }

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        for mut dispatcher in dispatchers {
            let done_tx = done_tx.clone();
            thread::spawn(move || {
                dispatcher.deliver(());
                done_tx.send(dispatcher.is_removed()).unwrap();
            });
        }

        for _ in 0..2 {
            let removed = done_rx
                .recv_timeout(Duration::from_secs(5))
                .expect("callbacks removing each other deadlocked");
            assert!(removed);
        }
        assert!(registrations.iter().all(ListenerRegistration::is_removed));
    }

    #[tokio::test]
    async fn test_listener_stream_drop_removes() {
        use futures::StreamExt;

        let (forward, rx) = ListenerStream::<u32>::channel();
        let (registration, mut dispatcher, mut cancel_rx) = register(forward);

        let mut stream = ListenerStream::attach(rx, registration.clone());
        assert!(dispatcher.deliver(7));
        assert_eq!(stream.next().await, Some(7));

        drop(stream);

        assert!(registration.is_removed());
        assert!(cancel_rx.try_recv().is_ok());
        assert!(!dispatcher.deliver(8));
    }
}
