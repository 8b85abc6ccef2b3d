// src/reactor.rs
//
// Single-threaded, cooperative event loop: one I/O back-end, one timer
// set, one fd -> channel map. Grounded on the original's templated
// `reactor<IoMultiplex>` class (model/reactor.hh); the back-end template
// parameter becomes the `Backend` trait so three back-ends (bitset,
// array, edge) are interchangeable at construction.

use crate::error::Result;
use crate::io::{Backend, READ, WRITE};
use crate::timer::{TimerCallback, TimerId, TimerSet};
use std::cell::RefCell;
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::Duration;

pub type Callback = Box<dyn FnMut()>;

#[derive(Default)]
struct Channel {
    read: Option<Callback>,
    write: Option<Callback>,
    error: Option<Callback>,
    /// Interest the reactor currently wants registered — independent of
    /// whether a callback is set, so `add_read`/`remove_read` can pause a
    /// direction without touching the callable.
    desired: u8,
    /// Interest last told to the back-end, so `sync_interest` can tell
    /// `add` from `modify` from `remove`.
    registered: u8,
}

impl Channel {
    fn is_empty(&self) -> bool {
        self.read.is_none() && self.write.is_none() && self.error.is_none()
    }
}

pub struct Reactor<B: Backend> {
    backend: B,
    timers: TimerSet,
    channels: HashMap<RawFd, Channel>,
    pending_cleanup: Vec<RawFd>,
    terminated: bool,
}

impl<B: Backend> Reactor<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            timers: TimerSet::new(),
            channels: HashMap::new(),
            pending_cleanup: Vec::new(),
            terminated: false,
        }
    }

    fn channel_mut(&mut self, fd: RawFd) -> &mut Channel {
        self.channels.entry(fd).or_default()
    }

    fn sync_interest(&mut self, fd: RawFd) -> Result<()> {
        let (desired, registered) = {
            let ch = self.channels.get(&fd).expect("channel must exist");
            (ch.desired, ch.registered)
        };
        if registered == 0 && desired != 0 {
            self.backend.add(fd, desired)?;
        } else if desired == 0 && registered != 0 {
            self.backend.remove(fd)?;
        } else if desired != registered {
            self.backend.modify(fd, desired)?;
        }
        self.channels.get_mut(&fd).unwrap().registered = desired;
        Ok(())
    }

    pub fn set_read_handler(&mut self, fd: RawFd, callback: Callback) -> Result<()> {
        crate::syscalls::set_nonblocking(fd)?;
        let ch = self.channel_mut(fd);
        ch.read = Some(callback);
        ch.desired |= READ;
        self.sync_interest(fd)
    }

    pub fn set_write_handler(&mut self, fd: RawFd, callback: Callback) -> Result<()> {
        crate::syscalls::set_nonblocking(fd)?;
        let ch = self.channel_mut(fd);
        ch.write = Some(callback);
        ch.desired |= WRITE;
        self.sync_interest(fd)
    }

    pub fn set_error_handler(&mut self, fd: RawFd, callback: Callback) {
        self.channel_mut(fd).error = Some(callback);
    }

    pub fn remove_read_handler(&mut self, fd: RawFd) {
        if let Some(ch) = self.channels.get_mut(&fd) {
            ch.read = None;
            ch.desired &= !READ;
            let _ = self.sync_interest(fd);
            if self.channels.get(&fd).map(|c| c.is_empty()).unwrap_or(false) {
                self.pending_cleanup.push(fd);
            }
        }
        // A second call with nothing left to remove is a no-op.
    }

    pub fn remove_write_handler(&mut self, fd: RawFd) {
        if let Some(ch) = self.channels.get_mut(&fd) {
            ch.write = None;
            ch.desired &= !WRITE;
            let _ = self.sync_interest(fd);
            if self.channels.get(&fd).map(|c| c.is_empty()).unwrap_or(false) {
                self.pending_cleanup.push(fd);
            }
        }
    }

    pub fn add_read(&mut self, fd: RawFd) -> Result<()> {
        if let Some(ch) = self.channels.get_mut(&fd) {
            ch.desired |= READ;
        }
        self.sync_interest(fd)
    }

    pub fn remove_read(&mut self, fd: RawFd) -> Result<()> {
        if let Some(ch) = self.channels.get_mut(&fd) {
            ch.desired &= !READ;
        }
        self.sync_interest(fd)
    }

    pub fn add_write(&mut self, fd: RawFd) -> Result<()> {
        if let Some(ch) = self.channels.get_mut(&fd) {
            ch.desired |= WRITE;
        }
        self.sync_interest(fd)
    }

    pub fn remove_write(&mut self, fd: RawFd) -> Result<()> {
        if let Some(ch) = self.channels.get_mut(&fd) {
            ch.desired &= !WRITE;
        }
        self.sync_interest(fd)
    }

    pub fn erase(&mut self, fd: RawFd) {
        let _ = self.backend.remove(fd);
        self.channels.remove(&fd);
        self.pending_cleanup.retain(|&x| x != fd);
    }

    pub fn set_timer(
        &mut self,
        interval: Duration,
        persistent: bool,
        callback: TimerCallback,
    ) -> TimerId {
        self.timers.set_timer(interval, persistent, callback)
    }

    pub fn remove_timer(&mut self, id: TimerId) {
        self.timers.remove(id);
    }

    pub fn set_terminated(&mut self) {
        self.terminated = true;
    }

    fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Run one tick: compute the timeout, wait, fire timers, dispatch
    /// ready fds, drain deferred cleanup. Returns `true` if the loop
    /// should keep going.
    fn tick(&mut self, nonblocking: bool) -> Result<bool> {
        let timeout_ms = if nonblocking {
            0
        } else {
            self.timers.shortest_timeout_ms().unwrap_or(-1)
        };

        match self.backend.wait(timeout_ms) {
            Ok(_) => {}
            Err(e) => {
                eprintln!("reactor: back-end wait error: {}", e);
                return Ok(true);
            }
        }

        self.timers.process();

        let ready: Vec<(RawFd, bool, bool)> = self.backend.ready_set().to_vec();
        for (fd, readable, writable) in ready {
            if readable {
                self.invoke(fd, ChannelSlot::Read);
            }
            if writable {
                self.invoke(fd, ChannelSlot::Write);
            }
        }

        let to_clean: Vec<RawFd> = self.pending_cleanup.drain(..).collect();
        for fd in to_clean {
            if self.channels.get(&fd).map(|c| c.is_empty()).unwrap_or(false) {
                self.channels.remove(&fd);
            }
        }

        if self.terminated {
            return Ok(false);
        }
        if self.channel_count() == 0 && self.timers.is_empty() {
            return Ok(false);
        }
        Ok(true)
    }

    /// Take the callback out of its slot, invoke it with the slot
    /// released, then restore it unless the callback itself replaced or
    /// removed it. This is what lets a callback mutate the reactor that
    /// owns it (including removing itself) without a `RefCell` borrow
    /// ever being held across user code.
    fn invoke(&mut self, fd: RawFd, slot: ChannelSlot) {
        let taken = self.channels.get_mut(&fd).and_then(|ch| match slot {
            ChannelSlot::Read => ch.read.take(),
            ChannelSlot::Write => ch.write.take(),
        });
        let Some(mut cb) = taken else { return };
        cb();
        if let Some(ch) = self.channels.get_mut(&fd) {
            let slot_ref = match slot {
                ChannelSlot::Read => &mut ch.read,
                ChannelSlot::Write => &mut ch.write,
            };
            if slot_ref.is_none() {
                *slot_ref = Some(cb);
            }
        }
    }
}

enum ChannelSlot {
    Read,
    Write,
}

/// Drive `reactor` until `set_terminated()` or it goes idle (no channels,
/// no timers). `nonblocking` forces every `wait()` to return immediately;
/// `once` runs a single tick regardless of idle/terminated state.
pub fn run<B: Backend>(reactor: &Rc<RefCell<Reactor<B>>>, nonblocking: bool, once: bool) -> Result<()> {
    loop {
        let keep_going = reactor.borrow_mut().tick(nonblocking)?;
        if once || !keep_going {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::bitset::BitsetBackend;
    use std::cell::Cell;

    #[test]
    fn read_handler_fires_on_readable_pipe() {
        let (r, w) = crate::syscalls::create_pipe().unwrap();
        let mut reactor = Reactor::new(BitsetBackend::new());
        let fired = Rc::new(Cell::new(false));
        let f = fired.clone();
        reactor
            .set_read_handler(
                r,
                Box::new(move || {
                    f.set(true);
                }),
            )
            .unwrap();

        unsafe {
            libc::write(w, b"x".as_ptr() as *const _, 1);
        }

        reactor.tick(false).unwrap();
        assert!(fired.get());
        unsafe {
            libc::close(r);
            libc::close(w);
        }
    }

    #[test]
    fn idempotent_handler_removal() {
        let (r, w) = crate::syscalls::create_pipe().unwrap();
        let mut reactor = Reactor::new(BitsetBackend::new());
        reactor.set_read_handler(r, Box::new(|| {})).unwrap();
        reactor.remove_read_handler(r);
        reactor.remove_read_handler(r);
        assert!(reactor.channels.get(&r).map(|c| c.is_empty()).unwrap_or(true));
        unsafe {
            libc::close(r);
            libc::close(w);
        }
    }

    #[test]
    fn callback_can_remove_itself_safely() {
        let (r, w) = crate::syscalls::create_pipe().unwrap();
        let reactor = Rc::new(RefCell::new(Reactor::new(BitsetBackend::new())));
        let reactor_clone = reactor.clone();
        reactor
            .borrow_mut()
            .set_read_handler(
                r,
                Box::new(move || {
                    reactor_clone.borrow_mut().remove_read_handler(r);
                }),
            )
            .unwrap();

        unsafe {
            libc::write(w, b"x".as_ptr() as *const _, 1);
        }

        run(&reactor, false, true).unwrap();
        assert!(reactor.borrow().channels.get(&r).is_none() || reactor.borrow().channels.get(&r).unwrap().is_empty());
        unsafe {
            libc::close(r);
            libc::close(w);
        }
    }

    #[test]
    fn timer_fires_and_loop_goes_idle() {
        let reactor = Rc::new(RefCell::new(Reactor::new(BitsetBackend::new())));
        let fired = Rc::new(Cell::new(false));
        let f = fired.clone();
        reactor.borrow_mut().set_timer(Duration::from_millis(1), false, Box::new(move || f.set(true)));
        run(&reactor, false, false).unwrap();
        assert!(fired.get());
    }
}
