// src/server.rs
//
// Single acceptor reactor on the main thread, round-robin hand-off to
// `n` worker threads each running its own reactor — grounded on the
// original `http_multithread_server` (http/http_multithread_server.hh/
// .cc), generalised from the teacher's SO_REUSEPORT-per-worker listener
// (each worker binding its own socket) to a single bind shared via a
// thread-safe hand-off queue per worker, per DESIGN.md's resolution of
// the architecture Open Question.

use crate::error::{Error, Result};
use crate::io::EdgeBackend;
use crate::reactor::{self, Reactor};
use crate::router::{Handler, Router};
use crate::signal::{self, SignalBridge};
use crate::syscalls;
use crate::worker::{Inbound, InboundQueue, Worker};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

pub struct Server {
    host: String,
    port: u16,
    workers: usize,
    router: Router,
}

impl Server {
    pub fn bind(addr: &str) -> Result<Self> {
        let (host, port) = parse_host_port(addr)?;
        Ok(Self {
            host,
            port,
            workers: num_cpus::get(),
            router: Router::new(),
        })
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.workers = n.max(1);
        self
    }

    pub fn set_request_handler(mut self, uri_pattern: &str, handler: Handler) -> Self {
        self.router.set_request_handler(uri_pattern, handler);
        self
    }

    pub fn set_general_handler(mut self, handler: Handler) -> Self {
        self.router.set_general_handler(handler);
        self
    }

    /// Bind the listening socket, spin up `workers` threads, and run the
    /// acceptor loop on the calling thread until SIGINT or SIGTERM
    /// requests shutdown.
    pub fn serve(self) -> Result<()> {
        let core_ids = core_affinity::get_core_ids().unwrap_or_default();
        let shutdown_flag = Arc::new(AtomicBool::new(false));

        // Only the acceptor thread owns a SignalBridge and observes
        // SIGINT/SIGTERM; worker threads block both so delivery funnels
        // here instead of landing on an arbitrary thread.
        let mut bridge = SignalBridge::new()
            .map_err(|e| Error::Other(format!("failed to create signal bridge: {}", e)))?;
        for &sig in &[libc::SIGINT, libc::SIGTERM] {
            let shutdown_signal = shutdown_flag.clone();
            bridge
                .register(
                    sig,
                    true,
                    Box::new(move || {
                        println!("server: received shutdown signal, draining connections");
                        shutdown_signal.store(true, Ordering::Release);
                    }),
                )
                .map_err(|e| Error::Other(format!("failed to register signal {}: {}", sig, e)))?;
        }

        let router = Arc::new(self.router);
        let mut queues = Vec::with_capacity(self.workers);
        let mut handles = Vec::with_capacity(self.workers);

        for i in 0..self.workers {
            let queue = Arc::new(InboundQueue::new()?);
            queues.push(queue.clone());

            let core_id = core_ids.get(i % core_ids.len().max(1)).copied();
            let router_clone = router.clone();
            let shutdown = shutdown_flag.clone();

            let handle = thread::Builder::new()
                .name(format!("worker-{}", i))
                .spawn(move || {
                    if let Err(e) = signal::block(&[libc::SIGINT, libc::SIGTERM]) {
                        eprintln!("worker {}: failed to block shutdown signals: {}", i, e);
                    }
                    if let Some(id) = core_id {
                        core_affinity::set_for_current(id);
                    }
                    let backend = match EdgeBackend::new() {
                        Ok(b) => b,
                        Err(e) => {
                            eprintln!("worker {}: failed to create I/O backend: {}", i, e);
                            return;
                        }
                    };
                    let mut worker = Worker::new(i, router_clone, queue, backend);
                    worker.run(shutdown);
                })
                .map_err(|e| Error::WorkerPanic(format!("failed to spawn worker {}: {}", i, e)))?;

            handles.push(handle);
        }

        let listen_fd = syscalls::create_listen_socket(&self.host, self.port)?;
        println!(
            "server: listening on {}:{} with {} workers",
            self.host, self.port, self.workers
        );

        let acceptor = Rc::new(RefCell::new(Reactor::new(
            EdgeBackend::new().map_err(|e| Error::Other(format!("acceptor backend: {}", e)))?,
        )));
        let next_worker = Arc::new(AtomicUsize::new(0));
        let n_workers = self.workers;
        let queues_for_accept = queues;
        let accept_shutdown = shutdown_flag.clone();

        acceptor.borrow_mut().set_read_handler(
            listen_fd,
            Box::new(move || {
                if accept_shutdown.load(Ordering::Acquire) {
                    return;
                }
                loop {
                    match syscalls::accept_connection(listen_fd) {
                        Ok(Some(fd)) => {
                            let idx = next_worker.fetch_add(1, Ordering::Relaxed) % n_workers;
                            queues_for_accept[idx].push(Inbound {
                                fd,
                                address: String::new(),
                                port: 0,
                            });
                        }
                        Ok(None) => break,
                        Err(e) => {
                            eprintln!("server: accept error: {}", e);
                            break;
                        }
                    }
                }
            }),
        )?;

        let wake_fd = bridge.wake_fd();
        acceptor.borrow_mut().set_read_handler(
            wake_fd,
            Box::new(move || {
                bridge.process_pending();
            }),
        )?;

        loop {
            if shutdown_flag.load(Ordering::Acquire) {
                acceptor.borrow_mut().set_terminated();
            }
            reactor::run(&acceptor, false, true)?;
            if shutdown_flag.load(Ordering::Acquire) {
                break;
            }
        }

        syscalls::close(listen_fd);
        for (i, handle) in handles.into_iter().enumerate() {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if let Err(panic) = handle.join() {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic payload".to_string());
                let err = Error::WorkerPanic(format!("{} ({}) panicked: {}", name, i, msg));
                eprintln!("server: {}", err);
            }
        }
        Ok(())
    }
}

fn parse_host_port(addr: &str) -> Result<(String, u16)> {
    let idx = addr
        .rfind(':')
        .ok_or_else(|| Error::Other("missing port in address".to_string()))?;
    let host = if addr[..idx].is_empty() {
        "0.0.0.0".to_string()
    } else {
        addr[..idx].to_string()
    };
    let port = addr[idx + 1..]
        .parse::<u16>()
        .map_err(|_| Error::Other("invalid port number".to_string()))?;
    Ok((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_port() {
        let (host, port) = parse_host_port("127.0.0.1:8080").unwrap();
        assert_eq!(host, "127.0.0.1");
        assert_eq!(port, 8080);
    }

    #[test]
    fn defaults_host_when_omitted() {
        let (host, port) = parse_host_port(":9090").unwrap();
        assert_eq!(host, "0.0.0.0");
        assert_eq!(port, 9090);
    }

    #[test]
    fn rejects_missing_port() {
        assert!(parse_host_port("localhost").is_err());
    }
}
