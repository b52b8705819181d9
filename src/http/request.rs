//! HTTP/1.1 request parser.
//!
//! A request-line -> headers -> body state machine that consumes complete
//! CRLF-terminated lines from the connection's read buffer and leaves partial
//! input untouched until more bytes arrive. POST bodies are read to the
//! declared `Content-Length` and, for urlencoded forms, decoded into a
//! key/value map.

use std::collections::HashMap;

use crate::buffer::Buffer;
use crate::error::{Error, Result};

const CRLF: &[u8] = b"\r\n";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    RequestLine,
    Headers,
    Body,
    Finished,
}

#[derive(Debug)]
pub struct HttpRequest {
    method: String,
    path: String,
    version: String,
    headers: HashMap<String, String>,
    body: String,
    form: HashMap<String, String>,
    state: ParseState,
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpRequest {
    pub fn new() -> Self {
        Self {
            method: String::new(),
            path: String::new(),
            version: String::new(),
            headers: HashMap::new(),
            body: String::new(),
            form: HashMap::new(),
            state: ParseState::RequestLine,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|v| v.as_str())
    }

    pub fn form_value(&self, key: &str) -> Option<&str> {
        self.form.get(key).map(|v| v.as_str())
    }

    pub fn is_complete(&self) -> bool {
        self.state == ParseState::Finished
    }

    pub fn is_keep_alive(&self) -> bool {
        match self.header("connection") {
            Some(value) => value.eq_ignore_ascii_case("keep-alive"),
            None => self.version == "1.1",
        }
    }

    /// Consumes as much of `buf` as possible. `Ok(true)` when a full request
    /// has been parsed, `Ok(false)` when more bytes are needed.
    pub fn parse(&mut self, buf: &mut Buffer) -> Result<bool> {
        loop {
            match self.state {
                ParseState::Finished => return Ok(true),
                ParseState::Body => {
                    let need = self.content_length();
                    if buf.readable() < need {
                        return Ok(false);
                    }
                    self.body = String::from_utf8_lossy(&buf.peek()[..need]).into_owned();
                    buf.retrieve(need);
                    self.parse_form();
                    self.state = ParseState::Finished;
                }
                ParseState::RequestLine | ParseState::Headers => {
                    let Some(line_len) = find_crlf(buf.peek()) else {
                        return Ok(false);
                    };
                    let line = String::from_utf8_lossy(&buf.peek()[..line_len]).into_owned();
                    buf.retrieve(line_len + CRLF.len());
                    if self.state == ParseState::RequestLine {
                        self.parse_request_line(&line)?;
                        self.state = ParseState::Headers;
                    } else if line.is_empty() {
                        self.state = if self.content_length() > 0 {
                            ParseState::Body
                        } else {
                            ParseState::Finished
                        };
                    } else {
                        self.parse_header_line(&line)?;
                    }
                }
            }
        }
    }

    fn content_length(&self) -> usize {
        self.header("content-length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    fn parse_request_line(&mut self, line: &str) -> Result<()> {
        let mut parts = line.split_whitespace();
        let (Some(method), Some(path), Some(version)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::Protocol("malformed request line"));
        };
        let Some(version) = version.strip_prefix("HTTP/") else {
            return Err(Error::Protocol("malformed http version"));
        };
        self.method = method.to_string();
        self.path = path.to_string();
        self.version = version.to_string();
        Ok(())
    }

    fn parse_header_line(&mut self, line: &str) -> Result<()> {
        let Some((name, value)) = line.split_once(':') else {
            return Err(Error::Protocol("malformed header line"));
        };
        self.headers
            .insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        Ok(())
    }

    fn parse_form(&mut self) {
        let is_form = self
            .header("content-type")
            .map(|v| v.starts_with(FORM_CONTENT_TYPE))
            .unwrap_or(false);
        if !is_form {
            return;
        }
        for pair in self.body.split('&') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            let key = decode_component(key);
            let value = decode_component(value);
            self.form.insert(key, value);
        }
    }
}

fn decode_component(raw: &str) -> String {
    let plus_decoded = raw.replace('+', " ");
    urlencoding::decode(&plus_decoded)
        .map(|v| v.into_owned())
        .unwrap_or(plus_decoded)
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}
