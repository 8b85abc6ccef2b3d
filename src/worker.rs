// src/worker.rs
//
// One worker owns a reactor, a wakeup fd registered for read on that
// reactor, a table of live connections, and a free pool of released
// connections reused on the next hand-off — grounded on the original
// `http_thread` (http/http_thread.hh/.cc) and generalised from its
// SO_REUSEPORT-per-worker accept loop to the hand-off-queue design
// described in DESIGN.md (Open Question resolution on connection
// storage: a `HashMap<RawFd, _>` replaces the slab's pre-sized array
// because connections here own growable buffers, not fixed records).

use crate::connection::{self, ConnStatus, HttpConnection};
use crate::io::Backend;
use crate::reactor::{self, Reactor};
use crate::router::Router;
use crate::syscalls::{self, WakeFd};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub struct Inbound {
    pub fd: RawFd,
    pub address: String,
    pub port: u16,
}

/// Thread-safe hand-off point the acceptor pushes into and the owning
/// worker drains after being woken via [`WakeFd`].
pub struct InboundQueue {
    queue: Mutex<VecDeque<Inbound>>,
    wake: WakeFd,
}

impl InboundQueue {
    pub fn new() -> crate::error::Result<Self> {
        Ok(Self {
            queue: Mutex::new(VecDeque::new()),
            wake: WakeFd::new()?,
        })
    }

    pub fn push(&self, item: Inbound) {
        self.queue.lock().unwrap().push_back(item);
        self.wake.notify();
    }

    fn drain(&self) -> Vec<Inbound> {
        self.wake.drain();
        let mut q = self.queue.lock().unwrap();
        q.drain(..).collect()
    }

    fn read_fd(&self) -> RawFd {
        self.wake.read_fd()
    }
}

pub struct Worker<B: Backend> {
    id: usize,
    router: Arc<Router>,
    inbound: Arc<InboundQueue>,
    reactor: Rc<RefCell<Reactor<B>>>,
    active: Rc<RefCell<HashMap<RawFd, Rc<RefCell<HttpConnection>>>>>,
    free_pool: Rc<RefCell<Vec<Rc<RefCell<HttpConnection>>>>>,
}

impl<B: Backend + 'static> Worker<B> {
    pub fn new(id: usize, router: Arc<Router>, inbound: Arc<InboundQueue>, backend: B) -> Self {
        Self {
            id,
            router,
            inbound,
            reactor: Rc::new(RefCell::new(Reactor::new(backend))),
            active: Rc::new(RefCell::new(HashMap::new())),
            free_pool: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Drive this worker's reactor until `shutdown` is observed. Called
    /// on the worker's dedicated thread.
    pub fn run(&mut self, shutdown: Arc<AtomicBool>) {
        let wake_fd = self.inbound.read_fd();
        let inbound = self.inbound.clone();
        let router = self.router.clone();
        let active = self.active.clone();
        let free_pool = self.free_pool.clone();
        let reactor_for_wake = self.reactor.clone();

        let register_result = self.reactor.borrow_mut().set_read_handler(
            wake_fd,
            Box::new(move || {
                for item in inbound.drain() {
                    accept_into_worker(
                        &reactor_for_wake,
                        &active,
                        &free_pool,
                        router.clone(),
                        item,
                    );
                }
            }),
        );
        if let Err(e) = register_result {
            eprintln!("worker {}: failed to register wakeup fd: {}", self.id, e);
            return;
        }

        println!("worker {}: entering event loop", self.id);

        loop {
            if shutdown.load(Ordering::Acquire) {
                self.reactor.borrow_mut().set_terminated();
            }
            match reactor::run(&self.reactor, false, true) {
                Ok(()) => {}
                Err(e) => {
                    eprintln!("worker {}: reactor tick error: {}", self.id, e);
                }
            }
            if shutdown.load(Ordering::Acquire) {
                break;
            }
        }

        println!("worker {}: exiting", self.id);
        for (&fd, _) in self.active.borrow().iter() {
            syscalls::close(fd);
        }
    }
}

fn accept_into_worker<B: Backend + 'static>(
    reactor: &Rc<RefCell<Reactor<B>>>,
    active: &Rc<RefCell<HashMap<RawFd, Rc<RefCell<HttpConnection>>>>>,
    free_pool: &Rc<RefCell<Vec<Rc<RefCell<HttpConnection>>>>>,
    router: Arc<Router>,
    item: Inbound,
) {
    let conn = match free_pool.borrow_mut().pop() {
        Some(reused) => {
            reused.borrow_mut().rebind(item.fd, item.address, item.port);
            reused
        }
        None => Rc::new(RefCell::new(HttpConnection::new(item.fd, item.address, item.port))),
    };

    active.borrow_mut().insert(item.fd, conn.clone());

    let active_for_close = active.clone();
    let free_pool_for_close = free_pool.clone();
    let on_closed = move |fd: RawFd| {
        if let Some(c) = active_for_close.borrow_mut().remove(&fd) {
            free_pool_for_close.borrow_mut().push(c);
        }
    };

    match connection::register(reactor, conn.clone(), router, on_closed) {
        Ok(()) => {
            let _ = reactor.borrow_mut().add_read(item.fd);
        }
        Err(e) => {
            eprintln!("worker: failed to register connection fd {}: {}", item.fd, e);
            active.borrow_mut().remove(&item.fd);
            conn.borrow_mut().status = ConnStatus::Closed;
            syscalls::close(item.fd);
        }
    }
}
