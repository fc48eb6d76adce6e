//! Development server: static files over HTTP plus a WebSocket channel that
//! tells open pages to reload or swap stylesheets.
//!
//! Each HTML response gets a small client script injected before `</body>`.
//! The script connects back to the WebSocket port and understands two
//! messages:
//!
//! - `reload` reloads the page,
//! - `inject:<json array>` re-fetches the listed stylesheets in place.

mod http;
mod reload;

use std::io;
use std::net::TcpListener;
use std::sync::mpsc::Sender;

use camino::{Utf8Path, Utf8PathBuf};
use console::style;

use crate::error::ServerError;
use crate::schedule::{Notify, Signal};

const RELOAD: &str = "reload";
const INJECT: &str = "inject:";

/// A running development server. Dropping it doesn't stop the threads, they
/// live until the process exits.
pub struct DevServer {
    root: Utf8PathBuf,
    http_port: u16,
    tx: Sender<String>,
}

impl DevServer {
    /// Binds the HTTP port right away, so a taken port is reported here and
    /// not from some background thread.
    pub fn start(root: impl Into<Utf8PathBuf>, port: u16) -> Result<Self, ServerError> {
        let root = root.into();

        let listener = TcpListener::bind(("127.0.0.1", port)).map_err(|source| {
            if source.kind() == io::ErrorKind::AddrInUse {
                ServerError::PortInUse { port, source }
            } else {
                ServerError::Io(source)
            }
        })?;
        listener.set_nonblocking(true)?;
        let http_port = listener.local_addr()?.port();

        let (ws, ws_port) = reload::reserve_port()?;
        let clients = reload::Clients::default();
        reload::spawn_acceptor(ws, clients.clone());
        let tx = reload::spawn_broadcaster(clients);

        http::spawn(listener, root.clone(), client_script(ws_port));

        tracing::info!(
            url = %style(format!("http://localhost:{http_port}/")).yellow(),
            ws_port,
            "serving {root}"
        );

        Ok(Self {
            root,
            http_port,
            tx,
        })
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }
}

impl Notify for DevServer {
    fn notify(&self, signal: Signal) {
        if self.tx.send(message(&signal, &self.root)).is_err() {
            tracing::warn!("reload channel is closed");
        }
    }
}

/// Wire text of a signal. Stylesheets are addressed by their URL path below
/// `root`; anything outside it degrades to a full reload.
fn message(signal: &Signal, root: &Utf8Path) -> String {
    let Signal::Inject(paths) = signal else {
        return RELOAD.to_string();
    };

    let urls: Option<Vec<String>> = paths
        .iter()
        .map(|path| path.strip_prefix(root).ok().map(|rel| format!("/{rel}")))
        .collect();

    match urls.and_then(|urls| serde_json::to_string(&urls).ok()) {
        Some(json) => format!("{INJECT}{json}"),
        None => RELOAD.to_string(),
    }
}

fn client_script(port: u16) -> String {
    format!(
        r#"
const socket = new WebSocket("ws://" + window.location.hostname + ":{port}");
socket.addEventListener("message", event => {{
    if (!event.data.startsWith("{INJECT}")) {{
        window.location.reload();
        return;
    }}
    const paths = JSON.parse(event.data.slice({len}));
    for (const link of document.querySelectorAll('link[rel="stylesheet"]')) {{
        const url = new URL(link.href);
        if (paths.includes(url.pathname)) {{
            url.searchParams.set("v", Date.now());
            link.href = url.href;
        }}
    }}
}});
"#,
        len = INJECT.len(),
    )
}
