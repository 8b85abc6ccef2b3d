// src/io/array.rs
//
// poll(2)-based back-end: keep a fd -> index map, flatten it into a
// contiguous `pollfd` array for each wait, then rebuild the ready list
// from the results.

use super::{Backend, READ, WRITE};
use crate::error::Result;
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;

pub struct ArrayBackend {
    index: HashMap<RawFd, usize>,
    fds: Vec<libc::pollfd>,
    ready: Vec<(RawFd, bool, bool)>,
}

fn to_poll_events(mask: u8) -> i16 {
    let mut ev = 0;
    if mask & READ != 0 {
        ev |= libc::POLLIN;
    }
    if mask & WRITE != 0 {
        ev |= libc::POLLOUT;
    }
    ev as i16
}

impl ArrayBackend {
    pub fn new() -> Self {
        Self {
            index: HashMap::new(),
            fds: Vec::new(),
            ready: Vec::new(),
        }
    }
}

impl Default for ArrayBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for ArrayBackend {
    fn add(&mut self, fd: RawFd, mask: u8) -> Result<()> {
        if let Some(&i) = self.index.get(&fd) {
            self.fds[i].events = to_poll_events(mask);
            return Ok(());
        }
        self.index.insert(fd, self.fds.len());
        self.fds.push(libc::pollfd {
            fd,
            events: to_poll_events(mask),
            revents: 0,
        });
        Ok(())
    }

    fn modify(&mut self, fd: RawFd, mask: u8) -> Result<()> {
        self.add(fd, mask)
    }

    fn remove(&mut self, fd: RawFd) -> Result<()> {
        if let Some(i) = self.index.remove(&fd) {
            let last = self.fds.len() - 1;
            self.fds.swap_remove(i);
            if i != last {
                let moved_fd = self.fds[i].fd;
                self.index.insert(moved_fd, i);
            }
        }
        Ok(())
    }

    fn wait(&mut self, timeout_ms: i32) -> Result<usize> {
        self.ready.clear();
        if self.fds.is_empty() {
            if timeout_ms > 0 {
                std::thread::sleep(std::time::Duration::from_millis(timeout_ms as u64));
            }
            return Ok(0);
        }

        let n = unsafe { libc::poll(self.fds.as_mut_ptr(), self.fds.len() as libc::nfds_t, timeout_ms) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err.into());
        }

        for pfd in &self.fds {
            if pfd.revents == 0 {
                continue;
            }
            let hup_or_err = pfd.revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0;
            let r = hup_or_err || pfd.revents & libc::POLLIN != 0;
            let w = hup_or_err || pfd.revents & libc::POLLOUT != 0;
            if r || w {
                self.ready.push((pfd.fd, r, w));
            }
        }

        Ok(self.ready.len())
    }

    fn ready_set(&self) -> &[(RawFd, bool, bool)] {
        &self.ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_readable_pipe() {
        let (r, w) = crate::syscalls::create_pipe().unwrap();
        let mut b = ArrayBackend::new();
        b.add(r, READ).unwrap();
        unsafe {
            libc::write(w, b"x".as_ptr() as *const _, 1);
        }
        let n = b.wait(100).unwrap();
        assert_eq!(n, 1);
        assert!(b.ready_set()[0].1);
        unsafe {
            libc::close(r);
            libc::close(w);
        }
    }

    #[test]
    fn remove_keeps_index_consistent() {
        let mut b = ArrayBackend::new();
        b.add(3, READ).unwrap();
        b.add(4, READ).unwrap();
        b.add(5, READ).unwrap();
        b.remove(3).unwrap();
        assert_eq!(b.fds.len(), 2);
        assert!(b.index.contains_key(&4));
        assert!(b.index.contains_key(&5));
    }
}
