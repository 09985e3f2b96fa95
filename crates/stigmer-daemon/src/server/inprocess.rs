// In-process transport.
//
// The same tonic router (and thus the same interceptor chain) serves both
// the network listener and internal callers. Internal connections are
// in-memory duplex pipes: the connector side hands one half to the server
// task, wraps the other half as a client connection. Swapping the channel
// for a real network endpoint changes nothing above this layer.

use hyper_util::rt::TokioIo;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;

use super::DaemonRouter;

const PIPE_BUFFER: usize = 1024 * 1024;

/// Running in-process server plus a connector for clients.
#[derive(Clone)]
pub struct InProcessTransport {
    conn_tx: mpsc::UnboundedSender<DuplexStream>,
}

impl InProcessTransport {
    /// Spawn the router on an in-memory listener.
    pub fn start(router: DaemonRouter) -> Self {
        let (conn_tx, conn_rx) = mpsc::unbounded_channel::<DuplexStream>();
        let incoming = UnboundedReceiverStream::new(conn_rx).map(Ok::<_, std::io::Error>);
        tokio::spawn(async move {
            if let Err(err) = router.serve_with_incoming(incoming).await {
                tracing::error!(error = %err, "in-process transport stopped");
            }
        });
        Self { conn_tx }
    }

    /// Open a client channel into the in-process server.
    pub async fn channel(&self) -> Result<Channel, tonic::transport::Error> {
        let conn_tx = self.conn_tx.clone();
        Endpoint::try_from("http://in.process")?
            .connect_with_connector(service_fn(move |_: Uri| {
                let conn_tx = conn_tx.clone();
                async move {
                    let (client_io, server_io) = tokio::io::duplex(PIPE_BUFFER);
                    conn_tx.send(server_io).map_err(|_| {
                        std::io::Error::new(
                            std::io::ErrorKind::ConnectionRefused,
                            "in-process server is not running",
                        )
                    })?;
                    Ok::<_, std::io::Error>(TokioIo::new(client_io))
                }
            }))
            .await
    }
}
