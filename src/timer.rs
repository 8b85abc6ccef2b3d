// src/timer.rs
//
// A priority-ordered set of deadline callbacks, one-shot or persistent.
// Grounded on the original's timer class; the id allocator here is a
// plain monotonic counter rather than the original's `__get_id()`, which
// could hand out a duplicate id depending on insertion/removal order.

use std::collections::BinaryHeap;
use std::cmp::Ordering;
use std::time::{Duration, Instant};

pub type TimerId = u32;
pub type TimerCallback = Box<dyn FnMut()>;

struct Entry {
    deadline: Instant,
    id: TimerId,
    interval: Duration,
    persistent: bool,
    callback: TimerCallback,
}

// Min-heap on (deadline, id): BinaryHeap is a max-heap, so ordering is
// reversed.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}
impl Eq for Entry {}

pub struct TimerSet {
    heap: BinaryHeap<Entry>,
    removed: std::collections::HashSet<TimerId>,
    next_id: TimerId,
}

impl TimerSet {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            removed: std::collections::HashSet::new(),
            next_id: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    fn alloc_id(&mut self) -> TimerId {
        if self.heap.is_empty() {
            self.next_id = 0;
        }
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    pub fn set_timer(
        &mut self,
        interval: Duration,
        persistent: bool,
        callback: TimerCallback,
    ) -> TimerId {
        let id = self.alloc_id();
        let deadline = Instant::now() + interval;
        self.heap.push(Entry {
            deadline,
            id,
            interval,
            persistent,
            callback,
        });
        id
    }

    /// Mark a timer for removal. O(log n) amortised: the entry is dropped
    /// lazily the next time it would otherwise fire.
    pub fn remove(&mut self, id: TimerId) {
        self.removed.insert(id);
    }

    /// Milliseconds until the next live timer fires, 0 if already due,
    /// `None` if the set is empty (the reactor should block indefinitely).
    pub fn shortest_timeout_ms(&mut self) -> Option<i32> {
        self.drop_removed_heads();
        let top = self.heap.peek()?;
        let now = Instant::now();
        if top.deadline <= now {
            Some(0)
        } else {
            let ms = (top.deadline - now).as_millis();
            Some(ms.min(i32::MAX as u128) as i32)
        }
    }

    fn drop_removed_heads(&mut self) {
        while let Some(top) = self.heap.peek() {
            if self.removed.contains(&top.id) {
                let entry = self.heap.pop().unwrap();
                self.removed.remove(&entry.id);
            } else {
                break;
            }
        }
    }

    /// Fire every entry whose deadline has passed, in deadline order.
    /// Persistent entries are re-armed from `now`, which lets them drift
    /// under scheduling jitter rather than trying to catch up.
    pub fn process(&mut self) {
        let now = Instant::now();
        loop {
            self.drop_removed_heads();
            match self.heap.peek() {
                Some(top) if top.deadline <= now => {
                    let mut entry = self.heap.pop().unwrap();
                    (entry.callback)();
                    if entry.persistent && !self.removed.remove(&entry.id) {
                        entry.deadline = now + entry.interval;
                        self.heap.push(entry);
                    }
                }
                _ => break,
            }
        }
    }
}

impl Default for TimerSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn fires_in_deadline_order() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut timers = TimerSet::new();

        let o1 = order.clone();
        timers.set_timer(Duration::from_millis(0), false, Box::new(move || o1.borrow_mut().push(1)));
        let o2 = order.clone();
        timers.set_timer(Duration::from_millis(0), false, Box::new(move || o2.borrow_mut().push(2)));

        std::thread::sleep(Duration::from_millis(5));
        timers.process();
        assert_eq!(*order.borrow(), vec![1, 2]);
        assert!(timers.is_empty());
    }

    #[test]
    fn removed_timer_does_not_fire() {
        let fired = Rc::new(RefCell::new(false));
        let f = fired.clone();
        let mut timers = TimerSet::new();
        let id = timers.set_timer(Duration::from_millis(0), false, Box::new(move || *f.borrow_mut() = true));
        timers.remove(id);
        std::thread::sleep(Duration::from_millis(2));
        timers.process();
        assert!(!*fired.borrow());
    }

    #[test]
    fn persistent_timer_rearms() {
        let count = Rc::new(RefCell::new(0));
        let mut timers = TimerSet::new();
        let c = count.clone();
        timers.set_timer(Duration::from_millis(0), true, Box::new(move || *c.borrow_mut() += 1));

        std::thread::sleep(Duration::from_millis(2));
        timers.process();
        assert_eq!(*count.borrow(), 1);

        std::thread::sleep(Duration::from_millis(2));
        timers.process();
        assert_eq!(*count.borrow(), 2);
        assert!(!timers.is_empty());
    }

    #[test]
    fn ids_restart_once_set_is_empty() {
        let mut timers = TimerSet::new();
        let id1 = timers.set_timer(Duration::from_millis(0), false, Box::new(|| {}));
        timers.remove(id1);
        std::thread::sleep(Duration::from_millis(2));
        timers.process();
        assert!(timers.is_empty());

        let id2 = timers.set_timer(Duration::from_millis(10), false, Box::new(|| {}));
        assert_eq!(id2, 0);
    }
}
