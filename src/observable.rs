//! Single value with ordered, awaited change notification.
//!
//! Listeners run one after another in registration order and `set` resolves
//! only after the last listener's future has completed. Every emission works
//! on a snapshot of the listener list taken when it starts, so subscribing or
//! unsubscribing from inside a listener only affects later emissions.
//!
//! A `set` issued from inside one of the observable's own listeners (directly
//! or further down the listener's call chain) is queued: it returns at once
//! and the emission already in progress applies and emits the queued values
//! afterwards, in FIFO order. Any other `set` that lands while an emission is
//! running, such as one from another task, waits for that emission to finish
//! and then stores and emits its own value before returning. Emissions of one
//! observable therefore never interleave.

use futures::future::LocalBoxFuture;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::rc::Rc;
use tokio::sync::Mutex;

type Listener<T> = Rc<dyn Fn(T) -> LocalBoxFuture<'static, ()>>;

tokio::task_local! {
    /// Observables whose listeners the current future is running under.
    static EMITTING: Vec<usize>;
}

/// Handle returned by [`Observable::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Inner<T> {
    value: T,
    listeners: Vec<(ListenerId, Listener<T>)>,
    next_id: u64,
    queued: VecDeque<T>,
}

struct Shared<T> {
    state: RefCell<Inner<T>>,
    emission: Mutex<()>,
}

/// Shared observable value. Clones refer to the same value and listener set.
pub struct Observable<T> {
    shared: Rc<Shared<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + Default + 'static> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + 'static> Observable<T> {
    pub fn new(value: T) -> Self {
        Self {
            shared: Rc::new(Shared {
                state: RefCell::new(Inner {
                    value,
                    listeners: Vec::new(),
                    next_id: 0,
                    queued: VecDeque::new(),
                }),
                emission: Mutex::new(()),
            }),
        }
    }

    pub fn get(&self) -> T {
        self.shared.state.borrow().value.clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.shared.state.borrow().value)
    }

    pub fn subscribe<F, Fut>(&self, listener: F) -> ListenerId
    where
        F: Fn(T) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let mut state = self.shared.state.borrow_mut();
        let id = ListenerId(state.next_id);
        state.next_id += 1;
        let listener: Listener<T> = Rc::new(move |value| Box::pin(listener(value)));
        state.listeners.push((id, listener));
        id
    }

    /// Subscribes on behalf of `target` without keeping it alive. The listener
    /// becomes a no-op once `target` is dropped.
    pub fn subscribe_weak<S, F, Fut>(&self, target: &Rc<S>, listener: F) -> ListenerId
    where
        S: 'static,
        F: Fn(Rc<S>, T) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let target = Rc::downgrade(target);
        self.subscribe(move |value| {
            let pending = target.upgrade().map(|target| listener(target, value));
            async move {
                if let Some(pending) = pending {
                    pending.await;
                }
            }
        })
    }

    /// Returns `false` if the listener was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut state = self.shared.state.borrow_mut();
        let before = state.listeners.len();
        state.listeners.retain(|(listener_id, _)| *listener_id != id);
        state.listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.shared.state.borrow().listeners.len()
    }

    fn key(&self) -> usize {
        Rc::as_ptr(&self.shared) as usize
    }

    /// Replaces the value and awaits every listener in registration order.
    pub async fn set(&self, value: T) {
        let key = self.key();
        if EMITTING.try_with(|chain| chain.contains(&key)).unwrap_or(false) {
            self.shared.state.borrow_mut().queued.push_back(value);
            return;
        }

        let _emission = self.shared.emission.lock().await;
        self.shared.state.borrow_mut().value = value.clone();
        let _guard = QueueGuard {
            state: &self.shared.state,
        };
        let mut chain = EMITTING.try_with(|chain| chain.clone()).unwrap_or_default();
        chain.push(key);

        let mut next = Some(value);
        while let Some(current) = next {
            let snapshot: Vec<Listener<T>> = self
                .shared
                .state
                .borrow()
                .listeners
                .iter()
                .map(|(_, listener)| listener.clone())
                .collect();

            for listener in snapshot {
                EMITTING.scope(chain.clone(), listener(current.clone())).await;
            }

            let mut state = self.shared.state.borrow_mut();
            next = state.queued.pop_front();
            if let Some(queued) = &next {
                state.value = queued.clone();
            }
        }
    }
}

impl Observable<bool> {
    pub async fn toggle(&self) {
        let value = !self.get();
        self.set(value).await;
    }
}

/// Discards values queued by listeners when an emission ends, including when
/// the emitting future is dropped part-way.
struct QueueGuard<'a, T> {
    state: &'a RefCell<Inner<T>>,
}

impl<T> Drop for QueueGuard<'_, T> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.try_borrow_mut() {
            state.queued.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test]
    async fn notifies_in_registration_order() {
        let value = Observable::new(0);
        let log = Rc::new(RefCell::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let log = log.clone();
            value.subscribe(move |v: i32| {
                let log = log.clone();
                async move { log.borrow_mut().push(format!("{name}:{v}")) }
            });
        }

        value.set(7).await;
        assert_eq!(*log.borrow(), vec!["first:7", "second:7", "third:7"]);
        assert_eq!(value.get(), 7);
    }

    #[tokio::test]
    async fn set_waits_for_asynchronous_listener_work() {
        let value = Observable::new(false);
        let done = Rc::new(Cell::new(false));
        let flag = done.clone();
        value.subscribe(move |_| {
            let flag = flag.clone();
            async move {
                tokio::task::yield_now().await;
                tokio::task::yield_now().await;
                flag.set(true);
            }
        });

        value.set(true).await;
        assert!(done.get());
    }

    #[tokio::test]
    async fn unsubscribing_mid_emission_keeps_the_snapshot() {
        let value = Observable::new(0);
        let calls = Rc::new(Cell::new(0));
        let second_id = Rc::new(Cell::new(None));

        {
            let value_handle = value.clone();
            let second_id = second_id.clone();
            value.subscribe(move |_| {
                let value_handle = value_handle.clone();
                let second_id = second_id.clone();
                async move {
                    if let Some(id) = second_id.get() {
                        value_handle.unsubscribe(id);
                    }
                }
            });
        }
        let counter = calls.clone();
        let id = value.subscribe(move |_| {
            let counter = counter.clone();
            async move { counter.set(counter.get() + 1) }
        });
        second_id.set(Some(id));

        value.set(1).await;
        assert_eq!(calls.get(), 1, "removed listener still sees the in-flight emission");

        value.set(2).await;
        assert_eq!(calls.get(), 1);
        assert_eq!(value.listener_count(), 1);
    }

    #[tokio::test]
    async fn reentrant_set_is_queued_until_emission_completes() {
        let value = Observable::new(0);
        let log = Rc::new(RefCell::new(Vec::new()));

        {
            let handle = value.clone();
            let log = log.clone();
            value.subscribe(move |v: i32| {
                let handle = handle.clone();
                let log = log.clone();
                async move {
                    log.borrow_mut().push(format!("a:{v}"));
                    if v == 1 {
                        handle.set(2).await;
                        log.borrow_mut().push(format!("a:after-set:{}", handle.get()));
                    }
                }
            });
        }
        {
            let log = log.clone();
            value.subscribe(move |v: i32| {
                let log = log.clone();
                async move { log.borrow_mut().push(format!("b:{v}")) }
            });
        }

        value.set(1).await;
        assert_eq!(
            *log.borrow(),
            vec!["a:1", "a:after-set:1", "b:1", "a:2", "b:2"]
        );
        assert_eq!(value.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn set_from_another_task_waits_for_running_emission() {
        let value = Observable::new(0);
        let log = Rc::new(RefCell::new(Vec::new()));
        {
            let log = log.clone();
            value.subscribe(move |v: i32| {
                let log = log.clone();
                async move {
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    log.borrow_mut().push(format!("listener:{v}"));
                }
            });
        }

        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let first = {
                    let value = value.clone();
                    tokio::task::spawn_local(async move { value.set(1).await })
                };
                let second = {
                    let value = value.clone();
                    let log = log.clone();
                    tokio::task::spawn_local(async move {
                        value.set(2).await;
                        log.borrow_mut().push(format!("after-set:{}", value.get()));
                    })
                };
                first.await.unwrap();
                second.await.unwrap();
            })
            .await;

        assert_eq!(
            *log.borrow(),
            vec!["listener:1", "listener:2", "after-set:2"]
        );
    }

    #[tokio::test]
    async fn set_cycle_through_another_observable_is_queued() {
        let a = Observable::new(0);
        let b = Observable::new(0);
        let log = Rc::new(RefCell::new(Vec::new()));
        {
            let b = b.clone();
            let log = log.clone();
            a.subscribe(move |v: i32| {
                let b = b.clone();
                let log = log.clone();
                async move {
                    log.borrow_mut().push(format!("a:{v}"));
                    if v == 1 {
                        b.set(10).await;
                    }
                }
            });
        }
        {
            let a = a.clone();
            let log = log.clone();
            b.subscribe(move |v: i32| {
                let a = a.clone();
                let log = log.clone();
                async move {
                    log.borrow_mut().push(format!("b:{v}"));
                    a.set(2).await;
                }
            });
        }

        a.set(1).await;
        assert_eq!(*log.borrow(), vec!["a:1", "b:10", "a:2"]);
        assert_eq!(a.get(), 2);
        assert_eq!(b.get(), 10);
    }

    #[tokio::test]
    async fn toggle_flips_boolean() {
        let paused = Observable::new(false);
        paused.toggle().await;
        assert!(paused.get());
        paused.toggle().await;
        assert!(!paused.get());
    }
}
