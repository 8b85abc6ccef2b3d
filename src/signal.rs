// src/signal.rs
//
// Converts delivered POSIX signals into callbacks safely runnable inside
// the reactor loop. Grounded on the original's signal class, with one
// deliberate fix: the original's handler invokes the user callback
// directly from signal-handler context, which is not async-signal-safe
// in general (the callback can allocate, lock, or otherwise do things a
// signal handler must never do). Here the real OS handler only flips an
// atomic flag and writes a wakeup byte to a self-pipe; the callback runs
// later, from `process_pending`, on whichever thread owns the bridge —
// normally the reactor thread, after its `wait` call returns.

use crate::error::Result;
use crate::syscalls;
use libc::c_int;
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, AtomicBool, Ordering};

const MAX_SIGNALS: usize = 32;

static PENDING: [AtomicBool; MAX_SIGNALS] = [const { AtomicBool::new(false) }; MAX_SIGNALS];
static WAKE_WRITE_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn trampoline(sig: c_int) {
    let idx = sig as usize;
    if idx < MAX_SIGNALS {
        PENDING[idx].store(true, Ordering::Release);
    }
    let fd = WAKE_WRITE_FD.load(Ordering::Acquire);
    if fd >= 0 {
        let byte = 1u8;
        unsafe {
            libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
        }
    }
}

struct Registration {
    callback: Box<dyn FnMut()>,
    persistent: bool,
}

/// Process-wide registry of signal -> callback, paired with a self-pipe
/// used to wake a blocked reactor `wait()` when a signal arrives.
pub struct SignalBridge {
    read_fd: RawFd,
    write_fd: RawFd,
    registry: HashMap<c_int, Registration>,
}

impl SignalBridge {
    pub fn new() -> Result<Self> {
        let (read_fd, write_fd) = syscalls::create_pipe()?;
        WAKE_WRITE_FD.store(write_fd, Ordering::Release);
        Ok(Self {
            read_fd,
            write_fd,
            registry: HashMap::new(),
        })
    }

    /// The read end of the self-pipe; register it for read interest on a
    /// reactor so signal delivery can break a blocking `wait()`.
    pub fn wake_fd(&self) -> RawFd {
        self.read_fd
    }

    /// Register `callback` to run (on the thread that later calls
    /// `process_pending`) whenever `sig` is delivered. Applies
    /// `SIG_UNBLOCK` for this signal on the calling thread.
    pub fn register(
        &mut self,
        sig: c_int,
        persistent: bool,
        callback: Box<dyn FnMut()>,
    ) -> Result<()> {
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = trampoline as usize;
            libc::sigemptyset(&mut action.sa_mask);
            if libc::sigaction(sig, &action, std::ptr::null_mut()) < 0 {
                return Err(std::io::Error::last_os_error().into());
            }
        }
        self.registry.insert(
            sig,
            Registration {
                callback,
                persistent,
            },
        );
        self.unblock_registered()
    }

    fn registered_set(&self) -> libc::sigset_t {
        unsafe {
            let mut set: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut set);
            for &sig in self.registry.keys() {
                libc::sigaddset(&mut set, sig);
            }
            set
        }
    }

    /// Apply `SIG_BLOCK` for every signal currently registered on this
    /// bridge, on the calling thread. A thread other than the bridge's
    /// owner can't call this directly (the bridge isn't `Send`); see
    /// [`block`] for blocking the same signals from elsewhere.
    pub fn block_registered(&self) -> Result<()> {
        let set = self.registered_set();
        unsafe {
            if libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) != 0 {
                return Err(std::io::Error::last_os_error().into());
            }
        }
        Ok(())
    }

    fn unblock_registered(&self) -> Result<()> {
        let set = self.registered_set();
        unsafe {
            if libc::pthread_sigmask(libc::SIG_UNBLOCK, &set, std::ptr::null_mut()) != 0 {
                return Err(std::io::Error::last_os_error().into());
            }
        }
        Ok(())
    }

    /// Drain the wakeup pipe and run the callback for every signal whose
    /// flag was set since the last call. Non-persistent registrations are
    /// removed and their disposition restored to `SIG_DFL`.
    pub fn process_pending(&mut self) {
        let mut drain = [0u8; 64];
        loop {
            match syscalls::read_nonblocking(self.read_fd, &mut drain) {
                Ok(Some(n)) if n > 0 => continue,
                _ => break,
            }
        }

        let mut to_restore = Vec::new();
        for (&sig, reg) in self.registry.iter_mut() {
            let idx = sig as usize;
            if idx < MAX_SIGNALS && PENDING[idx].swap(false, Ordering::AcqRel) {
                (reg.callback)();
                if !reg.persistent {
                    to_restore.push(sig);
                }
            }
        }
        for sig in to_restore {
            self.registry.remove(&sig);
            unsafe {
                libc::signal(sig, libc::SIG_DFL);
            }
        }
    }
}

impl Drop for SignalBridge {
    fn drop(&mut self) {
        WAKE_WRITE_FD.store(-1, Ordering::Release);
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

/// Block `sigs` on the calling thread without needing a [`SignalBridge`]
/// handle. Worker threads, which never own the bridge, call this with the
/// same signals the acceptor thread registered so delivery is funneled to
/// the one thread that does.
pub fn block(sigs: &[c_int]) -> Result<()> {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        for &sig in sigs {
            libc::sigaddset(&mut set, sig);
        }
        if libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
    }
    Ok(())
}
