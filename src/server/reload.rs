use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread;

use tungstenite::WebSocket;

/// Connected browsers, appended by the acceptor, iterated by the broadcaster.
/// There is no cap; a client leaves the set only when a send finds it closed.
pub(super) type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

/// Binds the WebSocket port: 1337 when free, otherwise any free port.
pub(super) fn reserve_port() -> io::Result<(TcpListener, u16)> {
    let listener = match TcpListener::bind("127.0.0.1:1337") {
        Ok(sock) => sock,
        Err(_) => TcpListener::bind("127.0.0.1:0")?,
    };

    let port = listener.local_addr()?.port();
    Ok((listener, port))
}

pub(super) fn spawn_acceptor(server: TcpListener, clients: Clients) {
    thread::spawn(move || {
        for stream in server.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("websocket connection failed: {e}");
                    continue;
                }
            };

            match tungstenite::accept(stream) {
                Ok(socket) => match clients.lock() {
                    Ok(mut clients) => clients.push(socket),
                    Err(_) => return,
                },
                Err(e) => tracing::warn!("websocket handshake failed: {e}"),
            }
        }
    });
}

fn is_gone(e: &tungstenite::Error) -> bool {
    match e {
        tungstenite::Error::Io(e) => matches!(
            e.kind(),
            io::ErrorKind::BrokenPipe
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
        ),
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => true,
        _ => false,
    }
}

/// Sends every message to all clients. A failed send only drops that client.
pub(super) fn spawn_broadcaster(clients: Clients) -> Sender<String> {
    let (tx, rx) = channel::<String>();

    thread::spawn(move || {
        while let Ok(message) = rx.recv() {
            let Ok(mut clients) = clients.lock() else {
                return;
            };
            let mut broken = vec![];

            for (i, socket) in clients.iter_mut().enumerate() {
                if let Err(e) = socket.send(message.as_str().into()) {
                    if is_gone(&e) {
                        broken.push(i);
                    } else {
                        tracing::error!("websocket send failed: {e}");
                    }
                }
            }

            for i in broken.into_iter().rev() {
                clients.remove(i);
            }

            tracing::debug!(clients = clients.len(), "sent {message}");
        }
    });

    tx
}

#[cfg(test)]
mod tests {
    use std::thread::sleep;
    use std::time::{Duration, Instant};

    use super::*;

    #[test]
    fn test_broadcast_reaches_every_client() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let clients = Clients::default();
        spawn_acceptor(listener, clients.clone());
        let tx = spawn_broadcaster(clients.clone());

        let mut sockets: Vec<_> = (0..12)
            .map(|_| tungstenite::connect(format!("ws://127.0.0.1:{port}")).unwrap().0)
            .collect();

        let deadline = Instant::now() + Duration::from_secs(5);
        while clients.lock().unwrap().len() < sockets.len() {
            assert!(Instant::now() < deadline, "clients never registered");
            sleep(Duration::from_millis(10));
        }

        tx.send("reload".to_string()).unwrap();

        for socket in &mut sockets {
            assert_eq!(socket.read().unwrap().to_text().unwrap(), "reload");
        }
        assert_eq!(clients.lock().unwrap().len(), 12);
    }
}
