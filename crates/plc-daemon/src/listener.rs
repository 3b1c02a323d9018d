//! TCP accept loop: binds one listening socket per fieldbus module and
//! hands each accepted connection to the fieldbus registry on its own
//! thread, so slow or stuck peers never hold up new connections.

use std::net::TcpListener;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use plc_fieldbus::FieldbusRegistry;
use tracing::{info, warn};

use crate::signals::SignalHandler;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Bind `host:port` and accept connections for it until `signals` reports a
/// shutdown request.
///
/// Each accepted connection is serviced on its own thread via `registry`,
/// so one slow peer cannot delay the next `accept`.
pub fn spawn_listener(
    host: String,
    port: u16,
    registry: Arc<FieldbusRegistry>,
    signals: SignalHandler,
) -> std::io::Result<JoinHandle<()>> {
    let listener = TcpListener::bind((host.as_str(), port))?;
    listener.set_nonblocking(true)?;

    thread::Builder::new()
        .name(format!("listen-{port}"))
        .spawn(move || {
            info!(port, host = %host, "fieldbus listener bound");
            loop {
                if signals.shutdown_requested() {
                    break;
                }
                match listener.accept() {
                    Ok((stream, peer)) => {
                        let registry = Arc::clone(&registry);
                        thread::spawn(move || {
                            if let Err(e) = registry.serve(port, stream) {
                                warn!(port, peer = %peer, error = %e, "connection ended with an error");
                            }
                        });
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(POLL_INTERVAL);
                    }
                    Err(e) => {
                        warn!(port, error = %e, "accept failed");
                        thread::sleep(POLL_INTERVAL);
                    }
                }
            }
            info!(port, "fieldbus listener stopped");
        })
}
