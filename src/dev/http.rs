//! HTTP binding of the dev server.
//!
//! Requests are answered on a small thread pool, each blocking on the
//! async [`DevServer::handle_request`]. `GET /__simmer__/hot` upgrades to
//! a WebSocket that pushes [`HotReloadMessage`]s for the client's runtime.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tiny_http::{Header, Method, Request, Response, Server, StatusCode};
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tungstenite::protocol::{Message, Role, WebSocket};

use super::{DevResponse, DevServer, runtime_of};
use crate::hmr::HotReloadMessage;
use crate::{debug, log};

/// Path of the hot reload WebSocket.
pub const HOT_PATH: &str = "/__simmer__/hot";

const MAX_PORT_RETRIES: u16 = 10;
const REQUEST_THREADS: usize = 4;

/// A listening server, not yet answering.
pub struct BoundServer {
    server: Arc<Server>,
    addr: SocketAddr,
}

/// Bind `interface:port`, trying the next ports when it is taken.
pub fn bind(interface: IpAddr, port: u16) -> io::Result<BoundServer> {
    let mut last_error = None;
    for offset in 0..MAX_PORT_RETRIES {
        let addr = SocketAddr::new(interface, port.saturating_add(offset));
        match Server::http(addr) {
            Ok(server) => {
                if offset > 0 {
                    log!("serve"; "port {} in use, using {} instead", port, addr.port());
                }
                return Ok(BoundServer {
                    server: Arc::new(server),
                    addr,
                });
            }
            Err(e) => last_error = Some(e),
        }
    }
    Err(io::Error::other(format!(
        "failed to bind after {MAX_PORT_RETRIES} attempts (ports {port}-{}): {}",
        port.saturating_add(MAX_PORT_RETRIES - 1),
        last_error.map(|e| e.to_string()).unwrap_or_default()
    )))
}

impl BoundServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Handle to stop [`run`](Self::run) from another thread (`unblock`).
    pub fn server(&self) -> Arc<Server> {
        Arc::clone(&self.server)
    }

    /// Answer requests until the server is unblocked.
    pub fn run(self, dev: Arc<DevServer>, runtime: Handle) -> io::Result<()> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(REQUEST_THREADS)
            .build()
            .map_err(io::Error::other)?;

        log!("serve"; "http://{}", self.addr);
        for request in self.server.incoming_requests() {
            if request.url() == HOT_PATH && is_websocket_upgrade(&request) {
                let dev = Arc::clone(&dev);
                std::thread::spawn(move || serve_hot_client(request, &dev));
                continue;
            }
            let dev = Arc::clone(&dev);
            let runtime = runtime.clone();
            pool.spawn(move || {
                if let Err(e) = respond(request, &dev, &runtime) {
                    debug!("serve"; "request error: {}", e);
                }
            });
        }
        Ok(())
    }
}

fn respond(request: Request, dev: &DevServer, runtime: &Handle) -> io::Result<()> {
    if !matches!(request.method(), Method::Get | Method::Head) {
        let response = Response::from_string("405 Method Not Allowed").with_status_code(StatusCode(405));
        return request.respond(response);
    }

    let client = runtime_of(header(&request, "User-Agent"));
    let if_none_match = header(&request, "If-None-Match").map(str::to_string);
    let path = request.url().to_string();
    let answer = runtime.block_on(dev.handle_request(&path, client, if_none_match.as_deref()));
    debug!("serve"; "{} {} ({})", answer.status, path, client);

    let is_head = request.method() == &Method::Head;
    request.respond(to_response(answer, is_head))
}

fn to_response(answer: DevResponse, is_head: bool) -> Response<io::Cursor<Vec<u8>>> {
    let body = if is_head || answer.status == 304 {
        Vec::new()
    } else {
        answer.body.as_bytes().to_vec()
    };
    let mut response = Response::from_data(body).with_status_code(StatusCode(answer.status));
    for (name, value) in &answer.headers {
        if let Ok(header) = Header::from_bytes(name.as_bytes(), value.as_bytes()) {
            response.add_header(header);
        }
    }
    response
}

fn header<'r>(request: &'r Request, name: &'static str) -> Option<&'r str> {
    request
        .headers()
        .iter()
        .find(|h| h.field.equiv(name))
        .map(|h| h.value.as_str())
}

fn is_websocket_upgrade(request: &Request) -> bool {
    header(request, "Upgrade").is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

// ============================================================================
// Hot reload channel
// ============================================================================

fn serve_hot_client(request: Request, dev: &DevServer) {
    let Some(key) = header(&request, "Sec-WebSocket-Key") else {
        let _ = request.respond(Response::empty(StatusCode(400)));
        return;
    };
    let accept = tungstenite::handshake::derive_accept_key(key.as_bytes());
    let client = runtime_of(header(&request, "User-Agent"));
    let Ok(accept) = Header::from_bytes("Sec-WebSocket-Accept", accept.as_bytes()) else {
        return;
    };

    // subscribe before the handshake so nothing is lost in between
    let mut events = dev.subscribe();
    let stream = request.upgrade("websocket", Response::empty(StatusCode(101)).with_header(accept));
    let mut ws = WebSocket::from_raw_socket(stream, Role::Server, None);
    debug!("serve"; "hot client connected ({})", client);

    if ws.send(Message::Text(HotReloadMessage::connected().to_json().into())).is_err() {
        return;
    }
    loop {
        let message = match events.blocking_recv() {
            Ok(event) if event.runtime == client => event.message,
            Ok(_) => continue,
            Err(RecvError::Lagged(missed)) => HotReloadMessage::full(format!("missed {missed} updates")),
            Err(RecvError::Closed) => break,
        };
        if ws.send(Message::Text(message.to_json().into())).is_err() {
            break;
        }
    }
    let _ = ws.close(None);
    debug!("serve"; "hot client gone ({})", client);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Content;

    #[test]
    fn test_head_and_304_have_no_body() {
        let ok = DevResponse::ok(Content::from("body"), "text/plain", Some("\"a_b\"".into()));
        assert_eq!(to_response(ok.clone(), false).data_length(), Some(4));
        assert_eq!(to_response(ok, true).data_length(), Some(0));

        let cached = to_response(DevResponse::not_modified("\"a_b\"".into()), false);
        assert_eq!(cached.status_code(), StatusCode(304));
        assert_eq!(cached.data_length(), Some(0));
    }

    #[test]
    fn test_headers_are_forwarded() {
        let response = to_response(DevResponse::ok(Content::from("x"), "text/css", None), false);
        let content_type = response
            .headers()
            .iter()
            .find(|h| h.field.equiv("content-type"))
            .map(|h| h.value.as_str().to_string());
        assert_eq!(content_type.as_deref(), Some("text/css"));
    }
}
