use log::trace;
use std::cell::Cell;
use std::collections::VecDeque;
use tinyvec::tiny_vec;
use tinyvec::TinyVec;

const INLINE_HANDLERS: usize = 2;

/// A structural change to a [crate::KeyedList], delivered to subscribed
/// handlers once the sequence and the key index both reflect the new state.
///
/// `Replaced` is a distinct variant: an in-place value swap is not
/// observable as a remove followed by an add.
pub enum ListChange<'a, V> {
    Added { position: usize, value: &'a V },
    Removed { position: usize, value: &'a V },
    Replaced { position: usize, old: &'a V, new: &'a V },
    Reset,
}

impl<'a, V> Clone for ListChange<'a, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, V> Copy for ListChange<'a, V> {}

/// Handle returned by subscription, used to unsubscribe. Slots are reused:
/// once a key has been unsubscribed it may later address a new subscriber.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct SubscriptionKey {
    index: usize,
}

struct HandlerSlot<V> {
    name: &'static str,
    callback: Box<dyn FnMut(ListChange<V>)>,
}

pub(crate) struct ChangeNotifier<V> {
    slots: TinyVec<[Option<HandlerSlot<V>>; INLINE_HANDLERS]>,
    holes: VecDeque<usize>,
    dispatching: Cell<bool>,
}

impl<V> ChangeNotifier<V> {
    pub(crate) fn new() -> ChangeNotifier<V> {
        ChangeNotifier {
            slots: tiny_vec!(),
            holes: Default::default(),
            dispatching: Cell::new(false),
        }
    }

    pub(crate) fn subscribe(
        &mut self,
        name: &'static str,
        callback: impl FnMut(ListChange<V>) + 'static,
    ) -> SubscriptionKey {
        let slot = HandlerSlot {
            name,
            callback: Box::new(callback),
        };
        let index = match self.holes.pop_front() {
            Some(index) => {
                *self
                    .slots
                    .get_mut(index)
                    .expect("holes contains index outside the slot bounds") = Some(slot);
                index
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        trace!("subscribed handler {} at slot {}", name, index);
        SubscriptionKey { index }
    }

    pub(crate) fn unsubscribe(&mut self, key: SubscriptionKey) -> bool {
        match self.slots.get_mut(key.index).and_then(|it| it.take()) {
            Some(slot) => {
                self.holes.push_back(key.index);
                trace!("unsubscribed handler {} from slot {}", slot.name, key.index);
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_dispatching(&self) -> bool {
        self.dispatching.get()
    }

    pub(crate) fn dispatch(&mut self, change: ListChange<V>) {
        let _guard = DispatchGuard::raise(&self.dispatching);
        for slot in self.slots.iter_mut().flatten() {
            trace!("notifying handler {}", slot.name);
            (slot.callback)(change);
        }
    }
}

// keeps the flag honest even if a handler panics
struct DispatchGuard<'a> {
    flag: &'a Cell<bool>,
}

impl<'a> DispatchGuard<'a> {
    fn raise(flag: &'a Cell<bool>) -> DispatchGuard<'a> {
        flag.set(true);
        DispatchGuard { flag }
    }
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

#[cfg(test)]
impl<V> ChangeNotifier<V> {
    pub(crate) fn force_dispatching(&self, value: bool) {
        self.dispatching.set(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn counting(hits: &Rc<RefCell<Vec<&'static str>>>, name: &'static str) -> impl FnMut(ListChange<i32>) + 'static {
        let hits = hits.clone();
        move |_| hits.borrow_mut().push(name)
    }

    #[test]
    fn every_subscriber_sees_the_change() {
        let hits = Rc::new(RefCell::new(Vec::new()));
        let mut notifier = ChangeNotifier::new();
        notifier.subscribe("first", counting(&hits, "first"));
        notifier.subscribe("second", counting(&hits, "second"));
        notifier.dispatch(ListChange::Reset);
        assert_eq!(*hits.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn unsubscribed_handler_not_called() {
        let hits = Rc::new(RefCell::new(Vec::new()));
        let mut notifier = ChangeNotifier::new();
        let first = notifier.subscribe("first", counting(&hits, "first"));
        notifier.subscribe("second", counting(&hits, "second"));
        assert!(notifier.unsubscribe(first));
        notifier.dispatch(ListChange::Reset);
        assert_eq!(*hits.borrow(), vec!["second"]);
    }

    #[test]
    fn unsubscribe_twice_reports_stale_key() {
        let mut notifier = ChangeNotifier::<i32>::new();
        let key = notifier.subscribe("first", |_| {});
        assert!(notifier.unsubscribe(key));
        assert!(!notifier.unsubscribe(key));
    }

    #[test]
    fn vacated_slot_reused_by_next_subscriber() {
        let mut notifier = ChangeNotifier::<i32>::new();
        let first = notifier.subscribe("first", |_| {});
        notifier.subscribe("second", |_| {});
        notifier.unsubscribe(first);
        let third = notifier.subscribe("third", |_| {});
        assert_eq!(third, first);
    }

    #[test]
    fn flag_lowered_after_dispatch() {
        let mut notifier = ChangeNotifier::<i32>::new();
        notifier.subscribe("noop", |_| {});
        notifier.dispatch(ListChange::Reset);
        assert!(!notifier.is_dispatching());
    }
}
