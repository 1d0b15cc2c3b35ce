//! Live reload over a plain WebSocket.
//!
//! Browsers connect from a small injected script and reload the page when
//! they receive a message. One thread accepts connections, another
//! broadcasts reload requests to every client it knows about.

use std::io::ErrorKind;
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use tungstenite::WebSocket;

use crate::engine::{POLL, Shutdown};

type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

/// Oldest connections beyond this many are closed.
const MAX_CLIENTS: usize = 10;

/// Handle to the live-reload endpoint. Dropping it closes the endpoint.
pub(crate) struct Reloader {
    port: u16,
    sender: Sender<()>,
    stop: Shutdown,
}

impl Reloader {
    /// Listens on `preferred` port, or on any free port if it is taken.
    pub fn start(preferred: u16) -> std::io::Result<Self> {
        let (listener, port) = reserve_port(preferred)?;
        let clients = Clients::default();
        let stop = Shutdown::default();

        new_thread_ws_incoming(listener, clients.clone(), stop.clone())?;

        let (sender, receiver) = std::sync::mpsc::channel();
        new_thread_ws_reload(receiver, clients)?;

        Ok(Self { port, sender, stop })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Tells every connected browser to reload.
    pub fn reload(&self) {
        // The broadcast thread only ends once this handle is dropped.
        let _ = self.sender.send(());
    }
}

impl Drop for Reloader {
    fn drop(&mut self) {
        self.stop.trigger();
    }
}

/// Script that reloads the page on any message from the endpoint.
pub(crate) fn client_script(port: u16) -> String {
    format!(
        "(() => {{ const ws = new WebSocket(\"ws://localhost:{port}\"); \
         ws.onmessage = () => location.reload(); }})();"
    )
}

/// Inserts `script` right before the closing body tag, or at the end of
/// the document if there is none.
pub(crate) fn inject_script(html: &str, script: &str) -> String {
    let tag = format!("<script>{script}</script>");

    match html.to_ascii_lowercase().rfind("</body>") {
        Some(index) => {
            let mut out = String::with_capacity(html.len() + tag.len());
            out.push_str(&html[..index]);
            out.push_str(&tag);
            out.push_str(&html[index..]);
            out
        }
        None => format!("{html}{tag}"),
    }
}

fn reserve_port(preferred: u16) -> std::io::Result<(TcpListener, u16)> {
    let listener = match TcpListener::bind(("127.0.0.1", preferred)) {
        Ok(sock) => sock,
        Err(_) => TcpListener::bind("127.0.0.1:0")?,
    };

    let addr = listener.local_addr()?;
    let port = addr.port();
    Ok((listener, port))
}

fn new_thread_ws_incoming(
    server: TcpListener,
    clients: Clients,
    stop: Shutdown,
) -> std::io::Result<JoinHandle<()>> {
    server.set_nonblocking(true)?;

    std::thread::Builder::new()
        .name(String::from("reload-accept"))
        .spawn(move || {
            while !stop.is_triggered() {
                let stream = match server.accept() {
                    Ok((stream, _)) => stream,
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {
                        std::thread::sleep(POLL);
                        continue;
                    }
                    Err(e) => {
                        tracing::error!("reload endpoint: {e}");
                        continue;
                    }
                };

                if let Err(e) = stream.set_nonblocking(false) {
                    tracing::error!("reload endpoint: {e}");
                    continue;
                }

                match tungstenite::accept(stream) {
                    Ok(socket) => clients
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(socket),
                    Err(e) => tracing::warn!("reload handshake failed: {e}"),
                }
            }
        })
}

fn new_thread_ws_reload(receiver: Receiver<()>, clients: Clients) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(String::from("reload-broadcast"))
        .spawn(move || {
            while receiver.recv().is_ok() {
                let mut clients = clients.lock().unwrap_or_else(PoisonError::into_inner);
                let mut broken = vec![];

                for (i, socket) in clients.iter_mut().enumerate() {
                    match socket.send("reload".into()) {
                        Ok(_) => {}
                        Err(tungstenite::Error::Io(e)) if e.kind() == ErrorKind::BrokenPipe => {
                            broken.push(i);
                        }
                        Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                            broken.push(i);
                        }
                        Err(e) => {
                            tracing::error!("reload broadcast: {e}");
                        }
                    }
                }

                for i in broken.into_iter().rev() {
                    clients.remove(i);
                }

                let len = clients.len();
                if len > MAX_CLIENTS {
                    for mut socket in clients.drain(0..len - MAX_CLIENTS) {
                        socket.close(None).ok();
                    }
                }
            }
        })
}
