//! Tiny, unassuming HTTP server

use crate::constants;
use crate::thread;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

/// An incoming request.
pub type Request = tiny_http::Request;
/// A buffered response.
pub type Response = tiny_http::Response<io::Cursor<Vec<u8>>>;
/// A response or request header.
pub type Header = tiny_http::Header;

/// Simple single threaded HTTP request handler.
pub trait Handler: Sync + Send {
    /// Answer `request`. The handler owns responding.
    fn handle(&self, request: Request);
}

/// Single threaded HTTP server.
pub struct Server {
    addr: Option<SocketAddr>,
    thread: thread::ThreadHandle,
}

fn http_server<H>(shutdown: &thread::Shutdown, server: &tiny_http::Server, handler: &H)
where
    H: Handler,
{
    let timeout = Duration::from_millis(constants::ACCEPT_TIMEOUT_MS);
    while !shutdown.is_triggered() {
        match server.recv_timeout(timeout) {
            Ok(Some(request)) => handler.handle(request),
            Ok(None) => continue,
            Err(e) => {
                warn!("failed to receive request: {}", e);
            }
        }
    }
}

impl Server {
    /// Bind `host_port` and serve requests with `handler` on a new thread.
    ///
    /// Binding happens on the calling thread so a taken port is reported to
    /// the caller instead of killing the server thread.
    pub fn new<H>(host_port: &str, handler: H) -> io::Result<Server>
    where
        H: Handler + 'static,
    {
        let server = tiny_http::Server::http(host_port)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        let addr = server.server_addr().to_ip();
        if let Some(addr) = addr {
            info!("listening on {}", addr);
        }
        let thread = thread::spawn("http", move |shutdown| {
            http_server(&shutdown, &server, &handler);
            debug!("http server stopped accepting");
        })?;
        Ok(Server { addr, thread })
    }

    /// The address actually bound, useful when binding port zero.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    /// Block until the server thread exits.
    pub fn join(self) {
        self.thread.join();
    }

    /// Stop accepting requests and wait for the server thread.
    pub fn shutdown(self) {
        self.thread.shutdown();
    }
}

/// A plain-text response with `status`.
pub fn text(status: u16, body: &str) -> Response {
    tiny_http::Response::from_string(body).with_status_code(status)
}

/// A header from its parts, `None` if either part is not ASCII.
pub fn header(field: &str, value: &str) -> Option<Header> {
    tiny_http::Header::from_bytes(field.as_bytes(), value.as_bytes()).ok()
}
