// src/http/message.rs
//
// Incremental HTTP/1.1 request/response parser and serializer, grounded
// on the original `request` class (http/request.cc, request.hh,
// http.hh). The same type parses both directions; `kind` selects which
// firstline grammar applies, matching the original's `request_kind_t`.

use crate::buffer::ByteBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Head,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Head => "HEAD",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    AllRead,
    NeedMore,
    Corrupted,
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    FirstLine,
    Headers,
    Body,
    Trailer,
}

enum HeaderOutcome {
    NeedMore,
    Corrupted,
    /// Headers finished. For non-trailer headers, `true` means this
    /// message has no body (respond/return immediately).
    Done(bool),
}

enum BodyOutcome {
    NeedMore,
    Corrupted,
    AllRead,
    Trailer,
}

pub struct Message {
    pub kind: MessageKind,
    pub method: Method,
    state: State,

    pub major: u8,
    pub minor: u8,

    pub uri: String,
    pub query: String,

    pub response_code: u16,
    pub response_reason: String,

    headers: Vec<(String, String)>,
    last_header_key: Option<String>,

    pub body: ByteBuffer,
    chunked: bool,
    ntoread: i64,
}

impl Message {
    pub fn new_request() -> Self {
        Self::new(MessageKind::Request)
    }

    pub fn new_response() -> Self {
        Self::new(MessageKind::Response)
    }

    fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            method: Method::Get,
            state: State::FirstLine,
            major: 1,
            minor: 1,
            uri: String::new(),
            query: String::new(),
            response_code: 200,
            response_reason: String::new(),
            headers: Vec::new(),
            last_header_key: None,
            body: ByteBuffer::new(),
            chunked: false,
            ntoread: -1,
        }
    }

    /// Reset parser state so the same object can parse the next pipelined
    /// message of the same kind.
    pub fn reset_for_next(&mut self) {
        self.state = State::FirstLine;
        self.uri.clear();
        self.query.clear();
        self.headers.clear();
        self.last_header_key = None;
        self.body.clear();
        self.chunked = false;
        self.ntoread = -1;
    }

    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_header(&mut self, key: &str, value: &str) {
        if let Some(entry) = self.headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
            entry.1 = value.to_string();
        } else {
            self.headers.push((key.to_string(), value.to_string()));
        }
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Does either side of this exchange want the connection closed?
    pub fn wants_close(&self) -> bool {
        match self.get_header("Connection") {
            Some(v) => v.eq_ignore_ascii_case("close"),
            None => self.major == 1 && self.minor == 0,
        }
    }

    // ---- parsing ----

    pub fn parse(&mut self, buf: &mut ByteBuffer) -> ParseStatus {
        loop {
            match self.state {
                State::FirstLine => match self.parse_firstline(buf) {
                    Ok(()) => self.state = State::Headers,
                    Err(st) => return st,
                },
                State::Headers => match self.parse_header_lines(buf, false) {
                    HeaderOutcome::NeedMore => return ParseStatus::NeedMore,
                    HeaderOutcome::Corrupted => return ParseStatus::Corrupted,
                    HeaderOutcome::Done(no_body) => {
                        if no_body {
                            return ParseStatus::AllRead;
                        }
                        self.state = State::Body;
                        if let ParseStatus::Corrupted = self.start_body() {
                            return ParseStatus::Corrupted;
                        }
                    }
                },
                State::Body => match self.parse_body(buf) {
                    BodyOutcome::NeedMore => return ParseStatus::NeedMore,
                    BodyOutcome::Corrupted => return ParseStatus::Corrupted,
                    BodyOutcome::AllRead => return ParseStatus::AllRead,
                    BodyOutcome::Trailer => self.state = State::Trailer,
                },
                State::Trailer => match self.parse_header_lines(buf, true) {
                    HeaderOutcome::NeedMore => return ParseStatus::NeedMore,
                    HeaderOutcome::Corrupted => return ParseStatus::Corrupted,
                    HeaderOutcome::Done(_) => return ParseStatus::AllRead,
                },
            }
        }
    }

    /// Call when the peer has closed the connection while this message is
    /// mid-body with an unknown (until-close) length. Turns the implicit
    /// EOF into a definite ALLREAD/CORRUPTED rather than leaving the
    /// caller stuck on NEEDMORE forever.
    pub fn mark_eof(&mut self) -> ParseStatus {
        if self.state == State::Body && !self.chunked && self.ntoread < 0 {
            ParseStatus::AllRead
        } else {
            ParseStatus::Corrupted
        }
    }

    fn parse_firstline(&mut self, buf: &mut ByteBuffer) -> Result<(), ParseStatus> {
        let line = buf.pop_line().ok_or(ParseStatus::NeedMore)?;
        if line.is_empty() {
            return Err(ParseStatus::Corrupted);
        }
        let line = String::from_utf8_lossy(&line).into_owned();
        let ok = match self.kind {
            MessageKind::Request => self.parse_request_line(&line),
            MessageKind::Response => self.parse_response_line(&line),
        };
        ok.ok_or(ParseStatus::Corrupted)
    }

    fn parse_request_line(&mut self, line: &str) -> Option<()> {
        let mut parts = line.splitn(3, ' ');
        let method = parts.next()?;
        let uri = parts.next()?;
        let protocol = parts.next()?;

        self.method = match method {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "HEAD" => Method::Head,
            _ => return None,
        };

        if let Some(pos) = uri.find('?') {
            self.uri = url_decode(&uri[..pos]);
            self.query = uri[pos + 1..].to_string();
        } else {
            self.uri = url_decode(uri);
            self.query.clear();
        }

        self.set_protocol(protocol)
    }

    fn parse_response_line(&mut self, line: &str) -> Option<()> {
        let mut parts = line.splitn(3, ' ');
        let protocol = parts.next()?;
        let code = parts.next()?;
        let reason = parts.next().unwrap_or("").to_string();

        self.set_protocol(protocol)?;
        self.response_code = code.parse().ok()?;
        self.response_reason = reason;
        Some(())
    }

    fn set_protocol(&mut self, protocol: &str) -> Option<()> {
        match protocol {
            "HTTP/1.0" => {
                self.major = 1;
                self.minor = 0;
            }
            "HTTP/1.1" => {
                self.major = 1;
                self.minor = 1;
            }
            _ => return None,
        }
        Some(())
    }

    fn parse_header_lines(&mut self, buf: &mut ByteBuffer, is_trailer: bool) -> HeaderOutcome {
        loop {
            let line = match buf.pop_line() {
                None => return HeaderOutcome::NeedMore,
                Some(l) => l,
            };

            if line.is_empty() {
                if is_trailer {
                    return HeaderOutcome::Done(true);
                }
                let no_body = match self.kind {
                    MessageKind::Request => !matches!(self.method, Method::Post),
                    MessageKind::Response => {
                        matches!(self.response_code, 204 | 304)
                            || (100..200).contains(&self.response_code)
                    }
                };
                return HeaderOutcome::Done(no_body);
            }

            if line[0] == b' ' || line[0] == b'\t' {
                let Some(key) = self.last_header_key.clone() else {
                    return HeaderOutcome::Corrupted;
                };
                let cont = String::from_utf8_lossy(&line);
                let cont = cont.trim_start_matches([' ', '\t']);
                if let Some(entry) = self.headers.iter_mut().find(|(k, _)| *k == key) {
                    entry.1.push_str(cont);
                }
                continue;
            }

            let line_str = String::from_utf8_lossy(&line);
            let Some(pos) = line_str.find(':') else {
                return HeaderOutcome::Corrupted;
            };
            let key = line_str[..pos].trim().to_string();
            let value = line_str[pos + 1..].trim().to_string();
            self.last_header_key = Some(key.clone());
            self.set_header(&key, &value);
        }
    }

    fn start_body(&mut self) -> ParseStatus {
        if let Some(te) = self.get_header("Transfer-Encoding") {
            if te.eq_ignore_ascii_case("chunked") {
                self.chunked = true;
                self.ntoread = -1;
                return ParseStatus::NeedMore;
            }
        }

        match self.get_header("Content-Length") {
            None => self.ntoread = -1,
            Some(cl) => match cl.trim().parse::<i64>() {
                Ok(n) if n >= 0 => self.ntoread = n,
                _ => return ParseStatus::Corrupted,
            },
        }
        ParseStatus::NeedMore
    }

    fn parse_body(&mut self, buf: &mut ByteBuffer) -> BodyOutcome {
        if self.chunked {
            loop {
                if self.ntoread < 0 {
                    match buf.pop_line() {
                        None => return BodyOutcome::NeedMore,
                        Some(line) => {
                            if line.is_empty() {
                                return BodyOutcome::Corrupted;
                            }
                            let line_str = String::from_utf8_lossy(&line);
                            let hex = line_str.split(';').next().unwrap_or("").trim();
                            match i64::from_str_radix(hex, 16) {
                                Ok(n) if n >= 0 => self.ntoread = n,
                                _ => return BodyOutcome::Corrupted,
                            }
                            if self.ntoread == 0 {
                                return BodyOutcome::Trailer;
                            }
                        }
                    }
                } else {
                    let need = self.ntoread as usize + 2;
                    if buf.len() < need {
                        return BodyOutcome::NeedMore;
                    }
                    self.body.push_from(buf, self.ntoread as usize);
                    buf.discard(2);
                    self.ntoread = -1;
                }
            }
        } else if self.ntoread < 0 {
            self.body.push_all_from(buf);
            BodyOutcome::NeedMore
        } else {
            let n = self.ntoread as usize;
            if buf.len() >= n {
                self.body.push_from(buf, n);
                BodyOutcome::AllRead
            } else {
                BodyOutcome::NeedMore
            }
        }
    }

    // ---- building & serialising ----

    pub fn set_request(&mut self, method: Method, uri: &str, content: Option<ByteBuffer>) {
        self.kind = MessageKind::Request;
        self.method = method;
        self.uri = uri.to_string();
        self.headers.clear();
        self.body = content.unwrap_or_default();

        self.set_header("Content-Type", "text/html; charset=utf-8");
        if matches!(method, Method::Post) {
            self.set_header("Content-Length", &self.body.len().to_string());
        }
    }

    /// Build a response with `code`/`reason`. When `content` is `None`, a
    /// default body is generated for 404 and other non-2xx codes (the
    /// original's `push_not_found`/`push_error`). `Connection: close` is
    /// not decided here — the connection layer overrides the default
    /// `keep-alive` afterwards when either side wants the socket closed.
    pub fn set_response(&mut self, code: u16, reason: &str, content: Option<ByteBuffer>) {
        self.kind = MessageKind::Response;
        self.response_code = code;
        self.response_reason = reason.to_string();
        self.headers.clear();
        self.body = ByteBuffer::new();

        match content {
            Some(c) => self.body = c,
            None => match code {
                200 | 204 => {}
                404 => self.push_not_found(),
                _ => self.push_error(code, reason),
            },
        }

        if self.major == 1 && self.minor == 1 {
            self.set_header("Date", &httpdate::fmt_http_date(std::time::SystemTime::now()));
            self.set_header("Connection", "keep-alive");
        }

        if !self.body.is_empty() {
            self.set_header("Content-Length", &self.body.len().to_string());
            self.set_header("Content-Type", "text/html; charset=utf-8");
        }
    }

    pub fn send_to(&self, out: &mut ByteBuffer) {
        let firstline = match self.kind {
            MessageKind::Request => {
                let uri = if self.query.is_empty() {
                    self.uri.clone()
                } else {
                    format!("{}?{}", self.uri, self.query)
                };
                format!("{} {} HTTP/{}.{}\r\n", self.method.as_str(), uri, self.major, self.minor)
            }
            MessageKind::Response => format!(
                "HTTP/{}.{} {} {}\r\n",
                self.major, self.minor, self.response_code, self.response_reason
            ),
        };
        out.push_str(&firstline);

        for (k, v) in &self.headers {
            if !v.is_empty() {
                out.push_str(k);
                out.push_str(": ");
                out.push_str(v);
                out.push_str("\r\n");
            }
        }
        out.push_str("\r\n");

        if !self.body.is_empty() {
            out.push(self.body.as_slice());
        }
    }

    fn push_not_found(&mut self) {
        let escaped = html_escape(&self.uri);
        self.body.push_str("<html><head><title>404 Not Found</title></head>\n");
        self.body.push_str("<body><h1>Not Found</h1>\n");
        self.body.push_str(&format!(
            "<p>The requested URL {} was not found on this server.</p>",
            escaped
        ));
        self.body.push_str("</body></html>\n");
    }

    fn push_error(&mut self, code: u16, reason: &str) {
        self.body
            .push_str(&format!("<html><head><title>{} {}</title></head>\n", code, html_escape(reason)));
        self.body.push_str("<body>\n<h1>Error</h1>\n");
        self.body.push_str(&format!("<p>{}</p>\n", html_escape(reason)));
        self.body.push_str("</body></html>\n");
    }
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(h), Some(l)) = (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                out.push(h * 16 + l);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf_of(s: &str) -> ByteBuffer {
        let mut b = ByteBuffer::new();
        b.push_str(s);
        b
    }

    #[test]
    fn basic_get_round_trip() {
        let mut req = Message::new_request();
        let status = req.parse(&mut buf_of("GET /test HTTP/1.1\r\nConnection: close\r\n\r\n"));
        assert_eq!(status, ParseStatus::AllRead);
        assert_eq!(req.uri, "/test");
        assert!(matches!(req.method, Method::Get));
        assert_eq!(req.get_header("Connection"), Some("close"));
    }

    #[test]
    fn malformed_firstline_is_corrupted() {
        let mut req = Message::new_request();
        let status = req.parse(&mut buf_of("illegal request\r\n"));
        assert_eq!(status, ParseStatus::Corrupted);
    }

    #[test]
    fn header_folding_continuation() {
        let mut req = Message::new_request();
        let raw = "GET /x HTTP/1.1\r\nX-Multi:  aaaaaaaa\r\n a\r\n\tEND\r\n\r\n";
        let status = req.parse(&mut buf_of(raw));
        assert_eq!(status, ParseStatus::AllRead);
        assert_eq!(req.get_header("X-Multi"), Some("aaaaaaaaaEND"));
    }

    #[test]
    fn content_length_body() {
        let mut req = Message::new_request();
        let raw = "POST /post HTTP/1.1\r\nContent-Length: 19\r\nConnection: close\r\n\r\nmessage from client";
        let status = req.parse(&mut buf_of(raw));
        assert_eq!(status, ParseStatus::AllRead);
        assert_eq!(req.body.as_slice(), b"message from client");
    }

    #[test]
    fn chunked_body_parses_all_chunks() {
        let mut req = Message::new_request();
        let raw = "POST /c HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
        let status = req.parse(&mut buf_of(raw));
        assert_eq!(status, ParseStatus::AllRead);
        assert_eq!(req.body.as_slice(), b"hello world");
    }

    #[test]
    fn needs_more_on_partial_body() {
        let mut req = Message::new_request();
        let raw = "POST /post HTTP/1.1\r\nContent-Length: 19\r\n\r\nmessage";
        let status = req.parse(&mut buf_of(raw));
        assert_eq!(status, ParseStatus::NeedMore);
    }

    #[test]
    fn response_serialisation_sets_content_length() {
        let mut resp = Message::new_response();
        resp.set_response(200, "OK", Some(buf_of("This is funny")));
        let mut out = ByteBuffer::new();
        resp.send_to(&mut out);
        let serialised = String::from_utf8_lossy(out.as_slice()).into_owned();
        assert!(serialised.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(serialised.contains("Content-Length: 13\r\n"));
        assert!(serialised.ends_with("This is funny"));
    }

    #[test]
    fn not_found_escapes_uri() {
        let mut resp = Message::new_response();
        let mut req = Message::new_request();
        req.uri = "/<script>".to_string();
        resp.uri = req.uri.clone();
        resp.set_response(404, "Not Found", None);
        let body = String::from_utf8_lossy(resp.body.as_slice()).into_owned();
        assert!(body.contains("&lt;script&gt;"));
    }
}
