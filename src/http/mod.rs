//! HTTP/1.1 handler: static content plus the legacy form login flow.

pub mod request;
pub mod response;

use std::path::Path;

use log::{info, warn};
use memmap2::Mmap;

use crate::buffer::Buffer;
use crate::error::Result;
use crate::http::request::HttpRequest;
use crate::service::Services;

/// A mapped file body being streamed by the egress path.
pub struct FileRegion {
    pub mmap: Mmap,
    pub offset: usize,
}

impl FileRegion {
    pub fn remaining(&self) -> &[u8] {
        &self.mmap[self.offset..]
    }

    pub fn advance(&mut self, n: usize) {
        self.offset = (self.offset + n).min(self.mmap.len());
    }

    pub fn is_done(&self) -> bool {
        self.offset >= self.mmap.len()
    }
}

/// Routes served with an implicit `.html` suffix.
const HTML_ROUTES: [&str; 5] = ["/index", "/login", "/register", "/welcome", "/error"];

fn resolve_alias(path: &str) -> String {
    if path == "/" {
        return "/index.html".to_string();
    }
    if HTML_ROUTES.contains(&path) {
        return format!("{path}.html");
    }
    path.to_string()
}

pub struct HttpHandler {
    request: HttpRequest,
    keep_alive: bool,
}

impl Default for HttpHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpHandler {
    pub fn new() -> Self {
        Self {
            request: HttpRequest::new(),
            keep_alive: false,
        }
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Parses one request and emits its response. `Ok(None)` means more bytes
    /// are needed; a parse failure produces a 400 and closes the connection.
    pub fn process(
        &mut self,
        read_buf: &mut Buffer,
        write_buf: &mut Buffer,
        services: &Services,
        root: &Path,
    ) -> Result<Option<Option<FileRegion>>> {
        match self.request.parse(read_buf) {
            Ok(true) => {}
            Ok(false) => return Ok(None),
            Err(err) => {
                warn!("bad http request: {err}");
                response::build_bad_request(write_buf);
                self.keep_alive = false;
                self.request = HttpRequest::new();
                return Ok(Some(None));
            }
        }

        self.keep_alive = self.request.is_keep_alive();
        let target = self.route(services);
        info!(
            "http {} {} -> {}",
            self.request.method(),
            self.request.path(),
            target
        );

        let (_code, mmap) = response::build(write_buf, root, &target, self.keep_alive);
        self.request = HttpRequest::new();
        Ok(Some(mmap.map(|mmap| FileRegion { mmap, offset: 0 })))
    }

    /// The form endpoints run auth and pick the success or error page; every
    /// other path goes through the alias map.
    fn route(&self, services: &Services) -> String {
        if self.request.method() == "POST" {
            let username = self.request.form_value("username").unwrap_or_default();
            let password = self.request.form_value("password").unwrap_or_default();
            let verified = match self.request.path() {
                "/login" | "/login.html" => Some(services.auth.verify_form(username, password)),
                "/register" | "/register.html" => {
                    Some(services.auth.register_form(username, password))
                }
                _ => None,
            };
            if let Some(ok) = verified {
                return if ok {
                    "/welcome.html".to_string()
                } else {
                    "/error.html".to_string()
                };
            }
        }
        resolve_alias(self.request.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_map_to_html_files() {
        assert_eq!(resolve_alias("/"), "/index.html");
        assert_eq!(resolve_alias("/login"), "/login.html");
        assert_eq!(resolve_alias("/welcome"), "/welcome.html");
        assert_eq!(resolve_alias("/style.css"), "/style.css");
    }
}
