// src/io/bitset.rs
//
// select(2)-based back-end: copy the registered interest into in/out
// bitsets every wait, then scan every registered fd to build the ready
// set. Portable but capped at FD_SETSIZE; intended for portability
// testing, not production concurrency.

use super::{Backend, READ, WRITE};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::io;
use std::os::unix::io::RawFd;
use std::ptr;

pub struct BitsetBackend {
    registered: BTreeMap<RawFd, u8>,
    ready: Vec<(RawFd, bool, bool)>,
}

impl BitsetBackend {
    pub fn new() -> Self {
        Self {
            registered: BTreeMap::new(),
            ready: Vec::new(),
        }
    }
}

impl Default for BitsetBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for BitsetBackend {
    fn add(&mut self, fd: RawFd, mask: u8) -> Result<()> {
        if fd as usize >= libc::FD_SETSIZE {
            return Err(Error::Other(format!(
                "fd {} exceeds select() capacity of {}",
                fd,
                libc::FD_SETSIZE
            )));
        }
        self.registered.insert(fd, mask);
        Ok(())
    }

    fn modify(&mut self, fd: RawFd, mask: u8) -> Result<()> {
        self.add(fd, mask)
    }

    fn remove(&mut self, fd: RawFd) -> Result<()> {
        self.registered.remove(&fd);
        Ok(())
    }

    fn wait(&mut self, timeout_ms: i32) -> Result<usize> {
        self.ready.clear();

        let mut read_set: libc::fd_set = unsafe { std::mem::zeroed() };
        let mut write_set: libc::fd_set = unsafe { std::mem::zeroed() };
        let mut err_set: libc::fd_set = unsafe { std::mem::zeroed() };
        unsafe {
            libc::FD_ZERO(&mut read_set);
            libc::FD_ZERO(&mut write_set);
            libc::FD_ZERO(&mut err_set);
        }

        let mut max_fd: RawFd = -1;
        for (&fd, &mask) in self.registered.iter() {
            unsafe {
                if mask & READ != 0 {
                    libc::FD_SET(fd, &mut read_set);
                }
                if mask & WRITE != 0 {
                    libc::FD_SET(fd, &mut write_set);
                }
                libc::FD_SET(fd, &mut err_set);
            }
            max_fd = max_fd.max(fd);
        }

        let mut tv;
        let tv_ptr: *mut libc::timeval = if timeout_ms < 0 {
            ptr::null_mut()
        } else {
            tv = libc::timeval {
                tv_sec: (timeout_ms / 1000) as libc::time_t,
                tv_usec: ((timeout_ms % 1000) * 1000) as libc::suseconds_t,
            };
            &mut tv
        };

        let n = unsafe {
            libc::select(
                max_fd + 1,
                &mut read_set,
                &mut write_set,
                &mut err_set,
                tv_ptr,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err.into());
        }

        for (&fd, _) in self.registered.iter() {
            let r = unsafe { libc::FD_ISSET(fd, &read_set) };
            let w = unsafe { libc::FD_ISSET(fd, &write_set) };
            let e = unsafe { libc::FD_ISSET(fd, &err_set) };
            if r || w || e {
                self.ready.push((fd, r || e, w || e));
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
        let mut b = BitsetBackend::new();
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
}
