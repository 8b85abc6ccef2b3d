// src/connection.rs
//
// Wires one accepted socket to the HTTP codec. Grounded on the original
// `http_connection` (http/http_connection.hh/.cc): read callback drives
// the parse loop into a FIFO of in-flight requests (pipelining), write
// callback drains the output buffer, and the chunked send helpers format
// `size_hex\r\ndata\r\n` framing directly onto the output buffer.

use crate::buffer::ByteBuffer;
use crate::error::{Error, Result};
use crate::http::{Message, ParseStatus};
use crate::reactor::Reactor;
use crate::router::Router;
use crate::syscalls;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    Connected,
    Closing,
    Closed,
}

/// One socket's parse/write state. Reused across accept cycles via the
/// worker's free pool: `rebind` replaces the fd and re-registers reactor
/// callbacks rather than allocating a fresh connection.
pub struct HttpConnection {
    pub fd: RawFd,
    pub address: String,
    pub port: u16,
    pub status: ConnStatus,

    pub input: ByteBuffer,
    pub output: ByteBuffer,
    requests: VecDeque<Message>,
}

impl HttpConnection {
    pub fn new(fd: RawFd, address: String, port: u16) -> Self {
        Self {
            fd,
            address,
            port,
            status: ConnStatus::Connected,
            input: ByteBuffer::new(),
            output: ByteBuffer::new(),
            requests: VecDeque::new(),
        }
    }

    /// Recycle a pooled connection for a newly accepted fd. The fd
    /// changed, so the caller must re-register reactor callbacks
    /// afterwards — this only resets in-memory state.
    pub fn rebind(&mut self, fd: RawFd, address: String, port: u16) {
        self.fd = fd;
        self.address = address;
        self.port = port;
        self.status = ConnStatus::Connected;
        self.input.clear();
        self.output.clear();
        self.requests.clear();
    }

    fn queued_wants_close(&self) -> bool {
        self.requests.front().map(|r| r.wants_close()).unwrap_or(false)
    }

    /// Drive as much of the pipelined parse loop as the buffered bytes
    /// allow, dispatching each fully parsed request to `router` in
    /// arrival order. Returns `Error::Parse` (after already queuing the
    /// 400 reply and closing) if the peer's bytes are not a request.
    fn parse_requests(&mut self, router: &Router) -> Result<()> {
        loop {
            if self.requests.is_empty() {
                self.requests.push_back(Message::new_request());
            }

            let status = {
                let req = self.requests.front_mut().unwrap();
                req.parse(&mut self.input)
            };

            match status {
                ParseStatus::AllRead => {
                    let req = self.requests.pop_front().unwrap();
                    let close_after = req.wants_close();
                    router.dispatch(&req, self);
                    if close_after {
                        self.begin_close_for_read();
                        break;
                    }
                }
                ParseStatus::NeedMore => break,
                ParseStatus::Corrupted | ParseStatus::Canceled => {
                    self.requests.clear();
                    self.begin_close_for_read();
                    self.send_reply(
                        400,
                        "bad request",
                        Some(ByteBuffer::from_text("400 Bad Request")),
                    );
                    return Err(Error::Parse(format!(
                        "malformed request on fd {}",
                        self.fd
                    )));
                }
            }
        }
        Ok(())
    }

    /// Peer sent EOF while a request was mid-body with an until-close
    /// length. Resolve the stuck NEEDMORE into a dispatchable request.
    fn handle_eof(&mut self, router: &Router) {
        if let Some(front) = self.requests.front_mut() {
            if front.mark_eof() == ParseStatus::AllRead {
                let req = self.requests.pop_front().unwrap();
                router.dispatch(&req, self);
            }
        }
    }

    fn begin_close_for_read(&mut self) {
        unsafe {
            libc::shutdown(self.fd, libc::SHUT_RD);
        }
        self.status = ConnStatus::Closing;
    }

    pub fn send_reply(&mut self, code: u16, reason: &str, content: Option<ByteBuffer>) {
        let mut resp = Message::new_response();
        resp.set_response(code, reason, content);
        if self.queued_wants_close() || self.status == ConnStatus::Closing {
            resp.set_header("Connection", "close");
        }
        self.send_message(&resp);
    }

    pub fn send_message(&mut self, msg: &Message) {
        msg.send_to(&mut self.output);
    }

    pub fn send_chunk_start(&mut self, code: u16, reason: &str) {
        let mut resp = Message::new_response();
        resp.set_response(code, reason, None);
        resp.set_header("Transfer-Encoding", "chunked");
        self.send_message(&resp);
    }

    pub fn send_chunk(&mut self, chunk: &[u8]) {
        self.output.push_str(&format!("{:x}\r\n", chunk.len()));
        self.output.push(chunk);
        self.output.push_str("\r\n");
    }

    pub fn send_chunk_end(&mut self) {
        self.output.push_str("0\r\n\r\n");
    }
}

/// Register `connection`'s fd on `reactor`, wiring the read/write
/// callbacks that drive its parse loop and output flush. `router` and
/// `free_slot`/`active` let a callback release the connection back to
/// the worker's pool on close without the worker itself polling state.
pub fn register(
    reactor: &Rc<RefCell<Reactor<impl crate::io::Backend + 'static>>>,
    connection: Rc<RefCell<HttpConnection>>,
    router: Arc<Router>,
    on_closed: impl Fn(RawFd) + 'static,
) -> Result<()> {
    let fd = connection.borrow().fd;

    let read_conn = connection.clone();
    let read_reactor = reactor.clone();
    let read_router = router.clone();
    let read_closed = std::rc::Rc::new(on_closed);
    let write_closed = read_closed.clone();

    reactor.borrow_mut().set_read_handler(
        fd,
        Box::new(move || {
            let mut conn = read_conn.borrow_mut();
            let fd = conn.fd;
            match conn.input.read_from(fd) {
                Ok(None) => {}
                Ok(Some(0)) => {
                    conn.status = ConnStatus::Closing;
                    read_reactor.borrow_mut().remove_read_handler(fd);
                    conn.handle_eof(&read_router);
                }
                Ok(Some(_)) => {
                    if let Err(e) = conn.parse_requests(&read_router) {
                        eprintln!("connection: fd {}: {}", fd, e);
                    }
                    if !conn.output.is_empty() {
                        let _ = read_reactor.borrow_mut().add_write(fd);
                    }
                }
                Err(e) => {
                    eprintln!("connection: read error on fd {}: {}", fd, e);
                    conn.status = ConnStatus::Closing;
                    read_reactor.borrow_mut().remove_read_handler(fd);
                }
            }
            if conn.status == ConnStatus::Closing && conn.output.is_empty() {
                drop(conn);
                finish_close(&read_conn, &read_reactor, read_closed.as_ref());
            }
        }),
    )?;
    // Mirrors the original constructor: start with read interest
    // disarmed. The caller (the worker's accept/wakeup handler) arms it
    // explicitly once the connection is registered.
    reactor.borrow_mut().remove_read(fd)?;

    let write_conn = connection.clone();
    let write_reactor = reactor.clone();
    reactor.borrow_mut().set_write_handler(
        fd,
        Box::new(move || {
            let mut conn = write_conn.borrow_mut();
            let fd = conn.fd;
            if conn.output.is_empty() {
                write_reactor.borrow_mut().remove_write(fd);
                if conn.status == ConnStatus::Closing {
                    drop(conn);
                    finish_close(&write_conn, &write_reactor, write_closed.as_ref());
                }
                return;
            }
            match conn.output.write_to(fd) {
                Ok(None) => {}
                Ok(Some(_)) => {
                    if conn.output.is_empty() {
                        write_reactor.borrow_mut().remove_write(fd);
                        if conn.status == ConnStatus::Closing {
                            drop(conn);
                            finish_close(&write_conn, &write_reactor, write_closed.as_ref());
                        }
                    }
                }
                Err(e) => {
                    eprintln!("connection: write error on fd {}: {}", fd, e);
                    conn.status = ConnStatus::Closing;
                    write_reactor.borrow_mut().remove_write(fd);
                }
            }
        }),
    )?;
    reactor.borrow_mut().remove_write(fd)?;

    Ok(())
}

fn finish_close<B: crate::io::Backend>(
    conn: &Rc<RefCell<HttpConnection>>,
    reactor: &Rc<RefCell<Reactor<B>>>,
    on_closed: &dyn Fn(RawFd),
) {
    let fd = conn.borrow().fd;
    reactor.borrow_mut().remove_read_handler(fd);
    reactor.borrow_mut().remove_write_handler(fd);
    reactor.borrow_mut().erase(fd);
    syscalls::close(fd);
    conn.borrow_mut().status = ConnStatus::Closed;
    on_closed(fd);
}
