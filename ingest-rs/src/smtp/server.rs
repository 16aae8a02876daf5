use crate::engine::Engine;
use crate::error::{Rejection, Result};
use crate::smtp::reply::Reply;
use crate::smtp::session::SmtpSession;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, info_span, warn, Instrument};

pub struct SmtpServer {
    engine: Arc<Engine>,
}

impl SmtpServer {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    /// Bind `smtp.listen_addr` and serve forever.
    pub async fn run(&self) -> Result<()> {
        let listen_addr = &self.engine.config().smtp.listen_addr;
        let listener = TcpListener::bind(listen_addr).await?;
        info!("SMTP server listening on {}", listen_addr);

        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, addr)) => {
                    info!("New SMTP connection from {}", addr);

                    let engine = self.engine.clone();
                    let span = info_span!("smtp", client_ip = %addr.ip());
                    tokio::spawn(
                        async move {
                            if let Err(e) = handle_connection(engine, socket, addr).await {
                                error!("Session error: {}", e);
                            }
                        }
                        .instrument(span),
                    );
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

async fn handle_connection(
    engine: Arc<Engine>,
    mut socket: TcpStream,
    addr: SocketAddr,
) -> Result<()> {
    let peer = match socket.peer_addr() {
        Ok(peer) if peer == addr && !peer.ip().is_unspecified() => peer,
        other => {
            warn!("Refusing connection with unusable peer address: {:?}", other);
            let reply = Reply::from(Rejection::BadConnection);
            socket.write_all(reply.to_string().as_bytes()).await?;
            socket.shutdown().await?;
            return Ok(());
        }
    };

    SmtpSession::new(engine, peer.ip()).handle(socket).await
}
