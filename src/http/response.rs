//! HTTP response builder.
//!
//! Status line and headers are appended to the connection's write buffer;
//! file bodies are memory-mapped and handed back so the egress path can emit
//! them as a second iovec without copying. Error responses carry a small
//! inline page instead.

use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

use memmap2::Mmap;

use crate::buffer::Buffer;

fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        _ => "Internal Error",
    }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html",
        Some("css") => "text/css",
        Some("js") => "text/javascript",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        _ => "text/plain",
    }
}

fn error_page(code: u16) -> String {
    format!(
        "<html><head><title>{code} {text}</title></head>\
         <body><h1>{code} {text}</h1><hr>courier</body></html>",
        code = code,
        text = status_text(code)
    )
}

fn append_headers(buf: &mut Buffer, code: u16, keep_alive: bool, kind: &str, length: usize) {
    buf.append(format!("HTTP/1.1 {} {}\r\n", code, status_text(code)).as_bytes());
    if keep_alive {
        buf.append(b"Connection: keep-alive\r\n");
        buf.append(b"Keep-Alive: max=6, timeout=120\r\n");
    } else {
        buf.append(b"Connection: close\r\n");
    }
    buf.append(format!("Content-Type: {kind}\r\n").as_bytes());
    buf.append(format!("Content-Length: {length}\r\n\r\n").as_bytes());
}

/// Emits a full response for `request_path` resolved under `root`.
///
/// Returns the status code and, for files that mapped successfully, the map
/// the egress path streams from.
pub fn build(
    buf: &mut Buffer,
    root: &Path,
    request_path: &str,
    keep_alive: bool,
) -> (u16, Option<Mmap>) {
    let relative = request_path.trim_start_matches('/');
    let target = root.join(relative);

    let open_result = match target.metadata() {
        Ok(meta) if meta.is_dir() => Err(ErrorKind::NotFound),
        Ok(_) => File::open(&target).map_err(|e| e.kind()),
        Err(e) => Err(e.kind()),
    };

    match open_result {
        Ok(file) => {
            let len = file.metadata().map(|m| m.len()).unwrap_or(0) as usize;
            append_headers(buf, 200, keep_alive, content_type(&target), len);
            if len == 0 {
                return (200, None);
            }
            // SAFETY: the mapping is read-only and outlives every borrow the
            // egress path takes from it; served files are not truncated while
            // the server runs.
            match unsafe { Mmap::map(&file) } {
                Ok(mmap) => (200, Some(mmap)),
                Err(_) => (200, None),
            }
        }
        Err(ErrorKind::PermissionDenied) => {
            let page = error_page(403);
            append_headers(buf, 403, keep_alive, "text/html", page.len());
            buf.append(page.as_bytes());
            (403, None)
        }
        Err(_) => {
            let page = error_page(404);
            append_headers(buf, 404, keep_alive, "text/html", page.len());
            buf.append(page.as_bytes());
            (404, None)
        }
    }
}

/// Emits a 400 for requests the parser rejected.
pub fn build_bad_request(buf: &mut Buffer) {
    let page = error_page(400);
    append_headers(buf, 400, false, "text/html", page.len());
    buf.append(page.as_bytes());
}
