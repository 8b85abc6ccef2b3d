// End-to-end scenarios driving a real `Server` over a loopback TCP socket,
// per the literal cases described for the HTTP codec and connection
// pipeline: a bare GET, a malformed request line, folded headers, a body
// with Content-Length, a chunked response, and a pipelined keep-alive
// burst.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use wxreactor::http::Method;
use wxreactor::{HttpConnection, Message, Server};

// `Server::serve` installs a process-wide SIGINT/SIGTERM handler backed by
// a single static wakeup fd (see `signal::SignalBridge`); a second instance
// in the same process would stomp the first one's fd. Cargo runs tests in
// the same process on separate threads, so every scenario shares one
// server instance rather than each standing up its own.
static SERVER_PORT: OnceLock<u16> = OnceLock::new();

fn spawn_server() -> u16 {
    *SERVER_PORT.get_or_init(|| {
        let port = 18080u16;
        let addr = format!("127.0.0.1:{}", port);

        thread::spawn(move || {
            let server = Server::bind(&addr)
                .unwrap()
                .workers(2)
                .set_request_handler(
                    "/echo",
                    Arc::new(|req: &Message, conn: &mut HttpConnection| {
                        let body = req.body.as_slice().to_vec();
                        conn.send_reply(
                            200,
                            "OK",
                            Some(wxreactor::ByteBuffer::from_text(&String::from_utf8_lossy(
                                &body,
                            ))),
                        );
                    }),
                )
                .set_request_handler(
                    "/hello",
                    Arc::new(|_req: &Message, conn: &mut HttpConnection| {
                        conn.send_reply(200, "OK", Some(wxreactor::ByteBuffer::from_text("hello")));
                    }),
                )
                .set_request_handler(
                    "/chunked",
                    Arc::new(|_req: &Message, conn: &mut HttpConnection| {
                        conn.send_chunk_start(200, "OK");
                        conn.send_chunk(b"abc");
                        conn.send_chunk(b"defg");
                        conn.send_chunk_end();
                    }),
                )
                .set_general_handler(Arc::new(|req: &Message, conn: &mut HttpConnection| {
                    if req.method == Method::Get && req.uri == "/ping" {
                        conn.send_reply(200, "OK", Some(wxreactor::ByteBuffer::from_text("pong")));
                    } else {
                        conn.send_reply(404, "NOT FOUND", None);
                    }
                }));
            let _ = server.serve();
        });

        // Give the acceptor a moment to bind and the worker threads to enter
        // their event loops before the first test opens a connection.
        thread::sleep(Duration::from_millis(200));
        port
    })
}

fn connect(port: u16) -> TcpStream {
    for _ in 0..20 {
        if let Ok(s) = TcpStream::connect(("127.0.0.1", port)) {
            s.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
            return s;
        }
        thread::sleep(Duration::from_millis(50));
    }
    panic!("could not connect to test server");
}

/// Read until the peer closes its end. Every scenario below sends
/// `Connection: close` on its final (or only) request, so the server
/// closes the socket once its last response is flushed.
fn read_response(stream: &mut TcpStream) -> String {
    let mut out = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&chunk[..n]),
            Err(_) => break,
        }
    }
    String::from_utf8_lossy(&out).to_string()
}

#[test]
fn basic_get_round_trip() {
    let port = spawn_server();
    let mut stream = connect(port);
    stream
        .write_all(b"GET /hello HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .unwrap();

    let response = read_response(&mut stream);
    assert!(response.starts_with("HTTP/1.1 200"), "got: {}", response);
    assert!(response.contains("hello"), "got: {}", response);
}

#[test]
fn malformed_first_line_gets_400() {
    let port = spawn_server();
    let mut stream = connect(port);
    stream.write_all(b"NOTAMETHOD ???\r\n\r\n").unwrap();

    let response = read_response(&mut stream);
    assert!(response.starts_with("HTTP/1.1 400"), "got: {}", response);
}

#[test]
fn folded_header_continuation_is_accepted() {
    let port = spawn_server();
    let mut stream = connect(port);
    stream
        .write_all(
            b"GET /hello HTTP/1.1\r\n\
              Host: localhost\r\n\
              X-Folded: first\r\n \r\n \tsecond\r\n\
              Connection: close\r\n\r\n",
        )
        .unwrap();

    let response = read_response(&mut stream);
    assert!(response.starts_with("HTTP/1.1 200"), "got: {}", response);
}

#[test]
fn post_body_round_trips_through_echo_handler() {
    let port = spawn_server();
    let mut stream = connect(port);
    let body = b"ping payload";
    let request = format!(
        "POST /echo HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(request.as_bytes()).unwrap();
    stream.write_all(body).unwrap();

    let response = read_response(&mut stream);
    assert!(response.starts_with("HTTP/1.1 200"), "got: {}", response);
    assert!(response.contains("ping payload"), "got: {}", response);
}

#[test]
fn chunked_response_is_well_formed() {
    let port = spawn_server();
    let mut stream = connect(port);
    stream
        .write_all(b"GET /chunked HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .unwrap();

    let response = read_response(&mut stream);
    assert!(response.starts_with("HTTP/1.1 200"), "got: {}", response);
    assert!(response.to_lowercase().contains("transfer-encoding: chunked"));
    assert!(response.contains("3\r\nabc\r\n"));
    assert!(response.contains("4\r\ndefg\r\n"));
    assert!(response.contains("0\r\n\r\n"));
}

#[test]
fn keep_alive_pipeline_of_twenty() {
    let port = spawn_server();
    let mut stream = connect(port);

    let mut request = String::new();
    for _ in 0..19 {
        request.push_str("GET /hello HTTP/1.1\r\nHost: localhost\r\n\r\n");
    }
    request.push_str("GET /hello HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).unwrap();

    let response = read_response(&mut stream);
    let count = response.matches("HTTP/1.1 200").count();
    assert_eq!(count, 20, "expected 20 pipelined responses, got: {}", response);
}
