// src/syscalls.rs
use crate::error::{Error, Result};
use libc::{c_int, c_void, socklen_t};
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::ptr;

// ---- Socket operations ----

/// Create a non-blocking, listening TCP socket bound to `host:port`. Used
/// once by the acceptor; workers never bind their own listening socket
/// (see worker.rs / server.rs: connections arrive over the hand-off
/// queue, not via SO_REUSEPORT).
pub fn create_listen_socket(host: &str, port: u16) -> Result<RawFd> {
    let addr_str = format!("{}:{}", host, port);
    let addr: std::net::SocketAddr = addr_str
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let is_ipv6 = matches!(addr, std::net::SocketAddr::V6(_));
    let domain = if is_ipv6 {
        libc::AF_INET6
    } else {
        libc::AF_INET
    };

    #[cfg(target_os = "linux")]
    let fd = unsafe { libc::socket(domain, libc::SOCK_STREAM | libc::SOCK_NONBLOCK, 0) };
    #[cfg(target_os = "macos")]
    let fd = unsafe { libc::socket(domain, libc::SOCK_STREAM, 0) };

    if fd < 0 {
        return Err(io::Error::last_os_error().into());
    }

    #[cfg(target_os = "macos")]
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err.into());
        }
    }

    let one: c_int = 1;
    unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &one as *const _ as *const c_void,
            mem::size_of_val(&one) as socklen_t,
        );
    }

    if let Err(e) = bind_addr(fd, &addr) {
        unsafe {
            libc::close(fd);
        }
        return Err(e);
    }

    if unsafe { libc::listen(fd, libc::SOMAXCONN) } < 0 {
        let err = io::Error::last_os_error();
        unsafe {
            libc::close(fd);
        }
        return Err(err.into());
    }

    Ok(fd)
}

fn bind_addr(fd: RawFd, addr: &std::net::SocketAddr) -> Result<()> {
    unsafe {
        match addr {
            std::net::SocketAddr::V4(a) => {
                #[cfg(target_os = "macos")]
                let sin = libc::sockaddr_in {
                    sin_len: mem::size_of::<libc::sockaddr_in>() as u8,
                    sin_family: libc::AF_INET as libc::sa_family_t,
                    sin_port: a.port().to_be(),
                    sin_addr: libc::in_addr {
                        s_addr: u32::from_ne_bytes(a.ip().octets()),
                    },
                    sin_zero: [0; 8],
                };
                #[cfg(target_os = "linux")]
                let sin = libc::sockaddr_in {
                    sin_family: libc::AF_INET as libc::sa_family_t,
                    sin_port: a.port().to_be(),
                    sin_addr: libc::in_addr {
                        s_addr: u32::from_ne_bytes(a.ip().octets()),
                    },
                    sin_zero: [0; 8],
                };
                if libc::bind(
                    fd,
                    &sin as *const _ as *const libc::sockaddr,
                    mem::size_of_val(&sin) as socklen_t,
                ) < 0
                {
                    return Err(io::Error::last_os_error().into());
                }
            }
            std::net::SocketAddr::V6(a) => {
                #[cfg(target_os = "macos")]
                let sin6 = libc::sockaddr_in6 {
                    sin6_len: mem::size_of::<libc::sockaddr_in6>() as u8,
                    sin6_family: libc::AF_INET6 as libc::sa_family_t,
                    sin6_port: a.port().to_be(),
                    sin6_flowinfo: a.flowinfo(),
                    sin6_addr: libc::in6_addr {
                        s6_addr: a.ip().octets(),
                    },
                    sin6_scope_id: a.scope_id(),
                };
                #[cfg(target_os = "linux")]
                let sin6 = libc::sockaddr_in6 {
                    sin6_family: libc::AF_INET6 as libc::sa_family_t,
                    sin6_port: a.port().to_be(),
                    sin6_flowinfo: a.flowinfo(),
                    sin6_addr: libc::in6_addr {
                        s6_addr: a.ip().octets(),
                    },
                    sin6_scope_id: a.scope_id(),
                };
                if libc::bind(
                    fd,
                    &sin6 as *const _ as *const libc::sockaddr,
                    mem::size_of_val(&sin6) as socklen_t,
                ) < 0
                {
                    return Err(io::Error::last_os_error().into());
                }
            }
        }
    }
    Ok(())
}

/// Accept one pending connection, non-blocking. `Ok(None)` means the
/// accept queue is currently empty.
pub fn accept_connection(listen_fd: RawFd) -> Result<Option<RawFd>> {
    #[cfg(target_os = "linux")]
    unsafe {
        let fd = libc::accept4(
            listen_fd,
            ptr::null_mut(),
            ptr::null_mut(),
            libc::SOCK_NONBLOCK,
        );
        if fd < 0 {
            let err = io::Error::last_os_error();
            return if err.kind() == io::ErrorKind::WouldBlock {
                Ok(None)
            } else {
                Err(err.into())
            };
        }
        let one: c_int = 1;
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_NODELAY,
            &one as *const _ as *const c_void,
            mem::size_of_val(&one) as socklen_t,
        );
        Ok(Some(fd))
    }

    #[cfg(target_os = "macos")]
    unsafe {
        let fd = libc::accept(listen_fd, ptr::null_mut(), ptr::null_mut());
        if fd < 0 {
            let err = io::Error::last_os_error();
            return if err.raw_os_error() == Some(libc::EWOULDBLOCK)
                || err.kind() == io::ErrorKind::WouldBlock
            {
                Ok(None)
            } else {
                Err(err.into())
            };
        }
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err.into());
        }
        let one: c_int = 1;
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_NOSIGPIPE,
            &one as *const _ as *const c_void,
            mem::size_of_val(&one) as socklen_t,
        );
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_NODELAY,
            &one as *const _ as *const c_void,
            mem::size_of_val(&one) as socklen_t,
        );
        Ok(Some(fd))
    }
}

/// Non-blocking read. `None` = transient (EAGAIN/EINTR, try again later),
/// `Some(0)` = peer EOF, `Some(n)` = `n` bytes read. Replaces the
/// original convention of returning `Ok(0)` for both EOF and would-block,
/// which a caller cannot tell apart without extra state.
pub fn read_nonblocking(fd: RawFd, buf: &mut [u8]) -> Result<Option<usize>> {
    let res = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut c_void, buf.len()) };
    if res < 0 {
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(None),
            _ => Err(Error::Io(err)),
        }
    } else {
        Ok(Some(res as usize))
    }
}

/// Non-blocking write, same `None`/`Some(n)` convention as
/// [`read_nonblocking`] (a write can never report EOF, so `Some(0)` only
/// happens when `buf` was empty).
pub fn write_nonblocking(fd: RawFd, buf: &[u8]) -> Result<Option<usize>> {
    if buf.is_empty() {
        return Ok(Some(0));
    }
    let res = unsafe { libc::write(fd, buf.as_ptr() as *const c_void, buf.len()) };
    if res < 0 {
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(None),
            _ => Err(Error::Io(err)),
        }
    } else {
        Ok(Some(res as usize))
    }
}

pub fn set_nonblocking(fd: RawFd) -> Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 {
            return Err(io::Error::last_os_error().into());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error().into());
        }
    }
    Ok(())
}

pub fn close(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

/// Create a non-blocking Unix pipe, `(read_fd, write_fd)`. Grounds the
/// signal bridge's wakeup channel and, on macOS, the worker wakeup fd
/// (Linux uses a real eventfd instead, see [`WakeFd`]).
pub fn create_pipe() -> Result<(RawFd, RawFd)> {
    let mut fds = [0 as c_int; 2];
    unsafe {
        if libc::pipe(fds.as_mut_ptr()) < 0 {
            return Err(io::Error::last_os_error().into());
        }
    }
    set_nonblocking(fds[0])?;
    Ok((fds[0], fds[1]))
}

/// A single-fd wakeup primitive a producer thread can signal and a
/// reactor can register for read interest. An eventfd on Linux; a
/// self-pipe on platforms without one.
pub struct WakeFd {
    #[cfg(target_os = "linux")]
    fd: RawFd,
    #[cfg(not(target_os = "linux"))]
    read_fd: RawFd,
    #[cfg(not(target_os = "linux"))]
    write_fd: RawFd,
}

impl WakeFd {
    pub fn new() -> Result<Self> {
        #[cfg(target_os = "linux")]
        {
            let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK) };
            if fd < 0 {
                return Err(io::Error::last_os_error().into());
            }
            Ok(Self { fd })
        }
        #[cfg(not(target_os = "linux"))]
        {
            let (read_fd, write_fd) = create_pipe()?;
            Ok(Self { read_fd, write_fd })
        }
    }

    #[cfg(target_os = "linux")]
    pub fn read_fd(&self) -> RawFd {
        self.fd
    }
    #[cfg(not(target_os = "linux"))]
    pub fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    /// Wake up whoever is blocked on the reactor owning this fd.
    pub fn notify(&self) {
        #[cfg(target_os = "linux")]
        unsafe {
            let one: u64 = 1;
            libc::write(self.fd, &one as *const u64 as *const c_void, 8);
        }
        #[cfg(not(target_os = "linux"))]
        unsafe {
            let one: u8 = 1;
            libc::write(self.write_fd, &one as *const u8 as *const c_void, 1);
        }
    }

    /// Drain accumulated wakeups after waking; must be called from the
    /// read side before re-arming, or level-triggered back-ends will spin.
    pub fn drain(&self) {
        #[cfg(target_os = "linux")]
        unsafe {
            let mut buf: u64 = 0;
            libc::read(self.fd, &mut buf as *mut u64 as *mut c_void, 8);
        }
        #[cfg(not(target_os = "linux"))]
        {
            let mut buf = [0u8; 64];
            loop {
                match read_nonblocking(self.read_fd, &mut buf) {
                    Ok(Some(n)) if n > 0 => continue,
                    _ => break,
                }
            }
        }
    }
}

impl Drop for WakeFd {
    fn drop(&mut self) {
        #[cfg(target_os = "linux")]
        unsafe {
            libc::close(self.fd);
        }
        #[cfg(not(target_os = "linux"))]
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}
