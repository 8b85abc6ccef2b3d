// src/io/edge.rs
//
// epoll(2)-based back-end on Linux, a kqueue shim exposing the same
// shape on macOS. Grounded on the teacher's `Epoll` struct in
// syscalls.rs, generalised from a slab-index token to the `Backend`
// trait and taught to track per-fd registered mask itself so `add`
// versus `modify` (EPOLL_CTL_ADD vs MOD) is chosen correctly on mask
// transitions, and so HUP/ERR are reported as both readable and
// writable. Registered level-triggered (no EPOLLET/EV_CLEAR), matching
// the other two back-ends and the trait's must-not-lose-events contract.

use super::{Backend, READ, WRITE};
use crate::error::Result;
use std::collections::HashMap;
use std::os::unix::io::RawFd;

#[cfg(target_os = "linux")]
mod sys {
    use crate::error::Result;
    use libc::{c_int, epoll_event, EPOLLIN, EPOLLOUT};
    use std::io;
    use std::os::unix::io::RawFd;

    pub struct Poller {
        epfd: c_int,
    }

    impl Poller {
        pub fn new() -> Result<Self> {
            let epfd = unsafe { libc::epoll_create1(0) };
            if epfd < 0 {
                return Err(io::Error::last_os_error().into());
            }
            Ok(Self { epfd })
        }

        fn to_events(mask: u8) -> u32 {
            // Level-triggered: no EPOLLET. A fd that stays ready must be
            // reported ready again on every subsequent wait().
            let mut ev = 0u32;
            if mask & super::READ != 0 {
                ev |= EPOLLIN;
            }
            if mask & super::WRITE != 0 {
                ev |= EPOLLOUT;
            }
            ev as u32
        }

        pub fn ctl(&self, op: c_int, fd: RawFd, mask: u8) -> Result<()> {
            let mut event = epoll_event {
                events: Self::to_events(mask),
                u64: fd as u64,
            };
            let rc = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut event) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if op == libc::EPOLL_CTL_DEL && err.raw_os_error() == Some(libc::ENOENT) {
                    return Ok(());
                }
                return Err(err.into());
            }
            Ok(())
        }

        pub fn add(&self, fd: RawFd, mask: u8) -> Result<()> {
            self.ctl(libc::EPOLL_CTL_ADD, fd, mask)
        }
        pub fn modify(&self, fd: RawFd, mask: u8) -> Result<()> {
            self.ctl(libc::EPOLL_CTL_MOD, fd, mask)
        }
        pub fn remove(&self, fd: RawFd) -> Result<()> {
            self.ctl(libc::EPOLL_CTL_DEL, fd, 0)
        }

        pub fn wait(&self, buf: &mut Vec<epoll_event>, timeout_ms: i32) -> Result<usize> {
            let n = unsafe {
                libc::epoll_wait(self.epfd, buf.as_mut_ptr(), buf.capacity() as c_int, timeout_ms)
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    return Ok(0);
                }
                return Err(err.into());
            }
            unsafe {
                buf.set_len(n as usize);
            }
            Ok(n as usize)
        }
    }

    impl Drop for Poller {
        fn drop(&mut self) {
            unsafe {
                libc::close(self.epfd);
            }
        }
    }

    pub fn is_read(ev: &epoll_event) -> bool {
        ev.events & (EPOLLIN as u32 | libc::EPOLLHUP as u32 | libc::EPOLLERR as u32) != 0
    }
    pub fn is_write(ev: &epoll_event) -> bool {
        ev.events & (EPOLLOUT as u32 | libc::EPOLLHUP as u32 | libc::EPOLLERR as u32) != 0
    }
    pub fn token(ev: &epoll_event) -> RawFd {
        ev.u64 as RawFd
    }
    pub type Event = epoll_event;
}

#[cfg(target_os = "macos")]
mod sys {
    use crate::error::Result;
    use libc::{c_int, kevent, kqueue, timespec, EVFILT_READ, EVFILT_WRITE, EV_ADD, EV_DELETE};
    use std::io;
    use std::os::unix::io::RawFd;
    use std::ptr;

    #[derive(Clone, Copy)]
    pub struct Event {
        pub fd: RawFd,
        pub readable: bool,
        pub writable: bool,
    }

    pub struct Poller {
        kq: c_int,
    }

    impl Poller {
        pub fn new() -> Result<Self> {
            let kq = unsafe { kqueue() };
            if kq < 0 {
                return Err(io::Error::last_os_error().into());
            }
            Ok(Self { kq })
        }

        fn apply(&self, fd: RawFd, mask: u8, action: u16) -> Result<()> {
            let mut changes: [kevent; 2] = unsafe { std::mem::zeroed() };
            let mut n = 0;
            if mask & super::READ != 0 || action == EV_DELETE {
                changes[n] = kevent {
                    ident: fd as usize,
                    filter: EVFILT_READ,
                    flags: action,
                    fflags: 0,
                    data: 0,
                    udata: ptr::null_mut(),
                };
                n += 1;
            }
            if mask & super::WRITE != 0 || action == EV_DELETE {
                changes[n] = kevent {
                    ident: fd as usize,
                    filter: EVFILT_WRITE,
                    flags: action,
                    fflags: 0,
                    data: 0,
                    udata: ptr::null_mut(),
                };
                n += 1;
            }
            let rc = unsafe { libc::kevent(self.kq, changes.as_ptr(), n as c_int, ptr::null_mut(), 0, ptr::null()) };
            if rc < 0 && action != EV_DELETE {
                return Err(io::Error::last_os_error().into());
            }
            Ok(())
        }

        // Level-triggered: no EV_CLEAR. A descriptor that stays ready must
        // be reported ready again on every subsequent wait().
        pub fn add(&self, fd: RawFd, mask: u8) -> Result<()> {
            self.apply(fd, mask, EV_ADD)
        }
        pub fn modify(&self, fd: RawFd, mask: u8) -> Result<()> {
            self.apply(fd, mask, EV_ADD)
        }
        pub fn remove(&self, fd: RawFd) -> Result<()> {
            self.apply(fd, 0, EV_DELETE)
        }

        pub fn wait(&self, buf: &mut Vec<Event>, timeout_ms: i32) -> Result<usize> {
            const MAX_BATCH: usize = 256;
            let mut kevents: [kevent; MAX_BATCH] = unsafe { std::mem::zeroed() };

            let ts = if timeout_ms >= 0 {
                Some(timespec {
                    tv_sec: (timeout_ms / 1000) as libc::time_t,
                    tv_nsec: ((timeout_ms % 1000) * 1_000_000) as libc::c_long,
                })
            } else {
                None
            };
            let ts_ptr = match &ts {
                Some(t) => t as *const timespec,
                None => ptr::null(),
            };

            let n = unsafe {
                libc::kevent(self.kq, ptr::null(), 0, kevents.as_mut_ptr(), MAX_BATCH as c_int, ts_ptr)
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    return Ok(0);
                }
                return Err(err.into());
            }

            buf.clear();
            for kev in &kevents[..n as usize] {
                let hup = kev.flags & libc::EV_EOF != 0;
                buf.push(Event {
                    fd: kev.ident as RawFd,
                    readable: kev.filter == EVFILT_READ || hup,
                    writable: kev.filter == EVFILT_WRITE || hup,
                });
            }
            Ok(buf.len())
        }
    }

    impl Drop for Poller {
        fn drop(&mut self) {
            unsafe {
                libc::close(self.kq);
            }
        }
    }

    pub fn is_read(ev: &Event) -> bool {
        ev.readable
    }
    pub fn is_write(ev: &Event) -> bool {
        ev.writable
    }
    pub fn token(ev: &Event) -> RawFd {
        ev.fd
    }
}

pub struct EdgeBackend {
    poller: sys::Poller,
    registered: HashMap<RawFd, u8>,
    raw_events: Vec<sys::Event>,
    ready: Vec<(RawFd, bool, bool)>,
}

impl EdgeBackend {
    pub fn new() -> Result<Self> {
        Ok(Self {
            poller: sys::Poller::new()?,
            registered: HashMap::new(),
            raw_events: Vec::with_capacity(1024),
            ready: Vec::new(),
        })
    }
}

impl Backend for EdgeBackend {
    fn add(&mut self, fd: RawFd, mask: u8) -> Result<()> {
        self.poller.add(fd, mask)?;
        self.registered.insert(fd, mask);
        Ok(())
    }

    fn modify(&mut self, fd: RawFd, mask: u8) -> Result<()> {
        self.poller.modify(fd, mask)?;
        self.registered.insert(fd, mask);
        Ok(())
    }

    fn remove(&mut self, fd: RawFd) -> Result<()> {
        self.poller.remove(fd)?;
        self.registered.remove(&fd);
        Ok(())
    }

    fn wait(&mut self, timeout_ms: i32) -> Result<usize> {
        self.raw_events.reserve(1024);
        let n = self.poller.wait(&mut self.raw_events, timeout_ms)?;
        self.ready.clear();
        for ev in self.raw_events.iter() {
            let r = sys::is_read(ev);
            let w = sys::is_write(ev);
            if r || w {
                self.ready.push((sys::token(ev), r, w));
            }
        }
        Ok(n)
    }

    fn ready_set(&self) -> &[(RawFd, bool, bool)] {
        &self.ready
    }
}
