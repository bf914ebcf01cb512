//! TCP bridge
//!
//! Exposes a virtual serial port on a TCP socket so any host that can speak
//! to a network serial device can drive the printer. One connection maps to
//! one session; a second connection is refused while the first is open.

use std::sync::Arc;
use std::time::Duration;

use bambulink_core::TransportError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};

use super::transport::{ReadOutcome, VirtualSerial};

/// How long the reply pump waits per `readline` before checking the socket
const READ_POLL: Duration = Duration::from_millis(200);

/// Reply sent to a connection refused because the port is in use
pub const PORT_BUSY_REPLY: &[u8] = b"Error:Port busy\n";

/// Accept connections forever, opening a session for each
///
/// `open` is called once per accepted connection.
pub async fn serve<F>(listener: TcpListener, open: F) -> std::io::Result<()>
where
    F: Fn() -> Result<VirtualSerial, TransportError> + Send + Sync + 'static,
{
    let open = Arc::new(open);
    let port_lock = Arc::new(Semaphore::new(1));

    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Serial bridge listening on {}", addr);
    }

    loop {
        let (mut stream, peer) = listener.accept().await?;

        let Ok(permit) = Arc::clone(&port_lock).try_acquire_owned() else {
            tracing::warn!("Refusing {}: port already in use", peer);
            let _ = stream.write_all(PORT_BUSY_REPLY).await;
            continue;
        };

        let open = Arc::clone(&open);
        tokio::spawn(async move {
            let serial = match tokio::task::spawn_blocking(move || open()).await {
                Ok(Ok(serial)) => serial,
                Ok(Err(e)) => {
                    tracing::error!("Failed to open session for {}: {}", peer, e);
                    let _ = stream.write_all(format!("Error:{}\n", e).as_bytes()).await;
                    return;
                }
                Err(e) => {
                    tracing::error!("Session open task failed: {}", e);
                    return;
                }
            };

            tracing::info!("Host connected from {}", peer);
            if let Err(e) = handle_connection(stream, serial).await {
                tracing::warn!("Connection from {} ended with error: {}", peer, e);
            }
            tracing::info!("Host {} disconnected", peer);
            drop(permit);
        });
    }
}

/// Shuttle bytes between one socket and one session until either side ends
pub async fn handle_connection(stream: TcpStream, serial: VirtualSerial) -> std::io::Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);

    let pump_serial = serial.clone();
    let pump = tokio::task::spawn_blocking(move || loop {
        match pump_serial.readline(READ_POLL) {
            Ok(ReadOutcome::Line(bytes)) => {
                if tx.blocking_send(bytes).is_err() {
                    break;
                }
            }
            Ok(ReadOutcome::Timeout) => {
                if tx.is_closed() {
                    break;
                }
            }
            Err(_) => break,
        }
    });

    let forward = async move {
        while let Some(bytes) = rx.recv().await {
            writer.write_all(&bytes).await?;
        }
        writer.shutdown().await
    };

    let host_serial = serial.clone();
    let inbound = async move {
        let mut buf = [0u8; 1024];
        let result = loop {
            match reader.read(&mut buf).await {
                Ok(0) => break Ok(()),
                Ok(n) => {
                    if let Err(e) = host_serial.write(&buf[..n]) {
                        tracing::info!("Session stopped accepting input: {}", e);
                        break Ok(());
                    }
                }
                Err(e) => break Err(e),
            }
        };
        // Closing the session ends the pump, which ends `forward`
        let closing = host_serial.clone();
        let _ = tokio::task::spawn_blocking(move || closing.close()).await;
        result
    };

    let (inbound_result, forward_result) = tokio::join!(inbound, forward);
    let _ = pump.await;
    serial.close();

    inbound_result?;
    match forward_result {
        Err(e) if e.kind() != std::io::ErrorKind::NotConnected => Err(e),
        _ => Ok(()),
    }
}
