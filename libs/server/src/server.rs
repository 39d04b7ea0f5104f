use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use switchboard_core::codec::{BincodeCodec, Codec};
use switchboard_core::error::Result;
use switchboard_core::message::{Request, Response};
use switchboard_core::worker::WorkerPool;
use switchboard_discovery::{format_registration, ServiceRegistry, SessionEvent};
use switchboard_fabric::transport::{framed, TcpTransportListener};
use switchboard_fabric::ServerCodec;

use crate::config::{DispatchPolicy, ServerConfig};
use crate::dispatch::ServiceTable;
use crate::service::ServiceDefinition;

/// Responses queued per connection before handlers wait on the writer.
const RESPONSE_QUEUE: usize = 256;

/// Collects services and settings, then binds and starts a [`Server`].
pub struct ServerBuilder<C: Codec = BincodeCodec> {
    config: ServerConfig,
    table: ServiceTable,
    registry: Option<Arc<dyn ServiceRegistry>>,
    codec: C,
}

impl ServerBuilder<BincodeCodec> {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_codec(config, BincodeCodec)
    }
}

impl<C: Codec> ServerBuilder<C> {
    pub fn with_codec(config: ServerConfig, codec: C) -> Self {
        Self {
            config,
            table: ServiceTable::new(),
            registry: None,
            codec,
        }
    }

    /// Announce services and the node through `registry` once listening.
    pub fn registry(mut self, registry: Arc<dyn ServiceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Expose a service. Fails if its service key is already taken.
    pub fn service(mut self, definition: ServiceDefinition<C>) -> Result<Self> {
        self.table.insert(definition)?;
        Ok(self)
    }

    /// Bind the listener, start accepting, and announce to the registry.
    pub async fn start(self) -> Result<Server> {
        let listener = TcpTransportListener::bind(&self.config.bind).await?;
        let local_addr = listener.local_addr()?;
        let advertise = self
            .config
            .advertise
            .clone()
            .unwrap_or_else(|| local_addr.to_string());

        let dispatch = match self.config.dispatch {
            DispatchPolicy::Inline => Dispatch::Inline,
            DispatchPolicy::Offload { workers, queue } => {
                Dispatch::Offload(WorkerPool::new("server-dispatch", workers, queue))
            }
        };

        let token = CancellationToken::new();
        let tracker = TaskTracker::new();
        let table = Arc::new(self.table);
        let codec = ServerCodec::new(self.codec).max_frame_size(self.config.max_frame_size);

        tracker.spawn(accept_loop(
            listener,
            codec,
            table.clone(),
            dispatch.clone(),
            token.clone(),
            tracker.clone(),
        ));

        let server = Server {
            local_addr,
            advertise,
            name: self.config.name,
            weight: self.config.weight,
            table,
            registry: self.registry,
            dispatch,
            token,
            tracker,
        };

        if let Some(registry) = server.registry.clone() {
            // Listen before announcing so a session loss in between is seen.
            let events = registry.session_events();
            let announcement = server.announcement();
            if let Err(e) = announcement.publish(registry.as_ref()).await {
                error!(error = %e, "failed to announce services");
                server.shutdown().await;
                return Err(e);
            }
            server.tracker.spawn(reannounce_loop(
                registry,
                events,
                announcement,
                server.token.clone(),
            ));
        }

        info!(
            name = %server.name,
            address = %server.local_addr,
            advertise = %server.advertise,
            services = ?server.table.service_keys(),
            "server started"
        );
        Ok(server)
    }
}

/// A running RPC server.
pub struct Server {
    local_addr: SocketAddr,
    advertise: String,
    name: String,
    weight: u32,
    table: Arc<ServiceTable>,
    registry: Option<Arc<dyn ServiceRegistry>>,
    dispatch: Dispatch,
    token: CancellationToken,
    tracker: TaskTracker,
}

impl Server {
    pub fn builder(config: ServerConfig) -> ServerBuilder<BincodeCodec> {
        ServerBuilder::new(config)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The address clients are told to connect to.
    pub fn advertise_address(&self) -> &str {
        &self.advertise
    }

    pub fn service_keys(&self) -> Vec<String> {
        self.table.service_keys()
    }

    /// Withdraw registry announcements, stop accepting, close every
    /// connection, and let offloaded work drain.
    pub async fn shutdown(&self) {
        if self.token.is_cancelled() {
            return;
        }
        if let Some(registry) = &self.registry {
            if let Err(e) = registry.stop().await {
                warn!(error = %e, "failed to stop registry session");
            }
        }

        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;

        if let Dispatch::Offload(pool) = &self.dispatch {
            pool.shutdown().await;
        }
        info!(name = %self.name, address = %self.local_addr, "server stopped");
    }

    fn announcement(&self) -> Announcement {
        Announcement {
            name: self.name.clone(),
            address: self.advertise.clone(),
            data: format_registration(&self.advertise, self.weight),
            service_keys: self.table.service_keys(),
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// What the server tells the registry about itself.
struct Announcement {
    name: String,
    address: String,
    data: String,
    service_keys: Vec<String>,
}

impl Announcement {
    async fn publish(&self, registry: &dyn ServiceRegistry) -> Result<()> {
        for key in &self.service_keys {
            registry.register_service(key, &self.data).await?;
        }
        registry.register_node(&self.name, &self.address).await?;
        info!(
            name = %self.name,
            data = %self.data,
            services = self.service_keys.len(),
            "announced services"
        );
        Ok(())
    }
}

/// Ephemeral announcements die with the registry session; make them again
/// each time a session comes back, or whenever events were missed and a
/// reconnect may have gone unseen.
async fn reannounce_loop(
    registry: Arc<dyn ServiceRegistry>,
    mut events: broadcast::Receiver<SessionEvent>,
    announcement: Announcement,
    token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(SessionEvent::Reconnected) => {
                info!("registry session reconnected, announcing services again");
                if let Err(e) = announcement.publish(registry.as_ref()).await {
                    error!(error = %e, "failed to announce services after reconnect");
                }
            }
            Ok(SessionEvent::Lost) => warn!("registry session lost"),
            Ok(SessionEvent::Connected) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "missed registry session events, announcing services again");
                if let Err(e) = announcement.publish(registry.as_ref()).await {
                    error!(error = %e, "failed to announce services after missed events");
                }
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[derive(Clone)]
enum Dispatch {
    Inline,
    Offload(WorkerPool),
}

impl Dispatch {
    /// Handle one request and queue its response. Returns false once the
    /// connection can no longer take responses.
    async fn submit(
        &self,
        table: &Arc<ServiceTable>,
        request: Request,
        responses: &mpsc::Sender<Response>,
    ) -> bool {
        match self {
            Self::Inline => match table.handle(request).await {
                Some(response) => responses.send(response).await.is_ok(),
                None => true,
            },
            Self::Offload(pool) => {
                let request_id = request.id.clone();
                let table = table.clone();
                let sender = responses.clone();
                let job = async move {
                    if let Some(response) = table.handle(request).await {
                        let _ = sender.send(response).await;
                    }
                };
                if let Err(e) = pool.execute(job).await {
                    warn!(%request_id, error = %e, "dropping request");
                }
                !responses.is_closed()
            }
        }
    }
}

async fn accept_loop<C: Codec>(
    listener: TcpTransportListener,
    codec: ServerCodec<C>,
    table: Arc<ServiceTable>,
    dispatch: Dispatch,
    token: CancellationToken,
    tracker: TaskTracker,
) {
    loop {
        let accepted = tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                debug!(%peer, "accepted connection");
                tracker.spawn(serve_connection(
                    stream,
                    peer,
                    codec.clone(),
                    table.clone(),
                    dispatch.clone(),
                    token.clone(),
                ));
            }
            Err(e) => warn!(error = %e, "failed to accept connection"),
        }
    }
    debug!("listener closed");
}

async fn serve_connection<C: Codec>(
    stream: TcpStream,
    peer: SocketAddr,
    codec: ServerCodec<C>,
    table: Arc<ServiceTable>,
    dispatch: Dispatch,
    token: CancellationToken,
) {
    let (mut requests, mut writer) = framed(stream, codec);
    let (responses, mut outbound) = mpsc::channel::<Response>(RESPONSE_QUEUE);

    let write_loop = async move {
        while let Some(response) = outbound.recv().await {
            if let Err(e) = writer.send(response).await {
                warn!(%peer, error = %e, "failed to write response, closing connection");
                break;
            }
        }
        let _ = writer.close().await;
    };

    let read_loop = async move {
        loop {
            let frame = tokio::select! {
                _ = token.cancelled() => break,
                frame = requests.next() => frame,
            };
            match frame {
                Some(Ok(request)) => {
                    if !dispatch.submit(&table, request, &responses).await {
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!(%peer, error = %e, "closing connection after transport failure");
                    break;
                }
                None => break,
            }
        }
    };

    tokio::join!(read_loop, write_loop);
    debug!(%peer, "connection closed");
}
