use crate::{
    device_identity::DeviceIdentity,
    error::MeterError,
    modbus_frame::{
        encode_exception, encode_response, ExceptionCode, Header, Request, Response,
        MAX_READ_REGISTERS, MBAP_HEADER_LEN,
    },
    register_store::RegisterStore,
};
use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::{oneshot, watch},
    task::{JoinHandle, JoinSet},
    time::sleep,
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Listening,
    Stopped,
}

/// Answers decoded requests from the register store. Cheap to clone, one
/// copy per connection.
#[derive(Clone)]
pub struct MeterService {
    store: RegisterStore,
    identity: Arc<DeviceIdentity>,
}

impl MeterService {
    pub fn new(store: RegisterStore, identity: DeviceIdentity) -> Self {
        Self {
            store,
            identity: Arc::new(identity),
        }
    }

    pub fn call(&self, req: Request) -> Result<Response, ExceptionCode> {
        match req {
            Request::ReadHoldingRegisters { start, count } => {
                debug!("Holding register read for {start}/{count}");
                register_read(&self.store, start, count).map(Response::ReadHoldingRegisters)
            }
            Request::ReadDeviceIdentification { code, object_id } => {
                debug!("Device identification read code {code} object {object_id}");
                self.identity
                    .read(code, object_id)
                    .map(Response::ReadDeviceIdentification)
            }
            Request::Unsupported(function) => {
                let err = MeterError::UnsupportedOperation(function);
                debug!("Exception::IllegalFunction - {err}");
                Err(ExceptionCode::from(&err))
            }
        }
    }

    /// Builds the complete response ADU for one request PDU
    pub fn respond(&self, header: &Header, pdu: &[u8]) -> Vec<u8> {
        let function = pdu.first().copied().unwrap_or_default();
        match Request::parse(pdu).and_then(|req| self.call(req)) {
            Ok(response) => encode_response(header, &response),
            Err(code) => encode_exception(header, function, code),
        }
    }
}

/// Copies registers out of the store, translating failures into exceptions
fn register_read(store: &RegisterStore, addr: u16, cnt: u16) -> Result<Vec<u16>, ExceptionCode> {
    if cnt == 0 || cnt > MAX_READ_REGISTERS {
        debug!("Exception::IllegalDataValue - register count {cnt}");
        return Err(ExceptionCode::IllegalDataValue);
    }
    store.read_range(addr, cnt).map_err(|err| {
        debug!("Register read rejected: {err}");
        ExceptionCode::from(&err)
    })
}

/// Modbus TCP server in front of a [`RegisterStore`]
pub struct ProtocolServer {
    listener: TcpListener,
    service: MeterService,
}

impl ProtocolServer {
    pub async fn bind(
        addr: SocketAddr,
        store: RegisterStore,
        identity: DeviceIdentity,
    ) -> Result<Self, MeterError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| MeterError::ListenFailure { addr, source })?;
        Ok(Self {
            listener,
            service: MeterService::new(store, identity),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, MeterError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until `shutdown` resolves. Connections still open
    /// at that point are dropped.
    pub async fn serve<F>(self, shutdown: F, state: watch::Sender<ServerState>)
    where
        F: Future<Output = ()>,
    {
        let Self {
            mut listener,
            service,
        } = self;
        if let Ok(addr) = listener.local_addr() {
            info!("Listening for Modbus TCP clients on {addr}");
        }
        accept_loop(&mut listener, service, shutdown, state).await;
    }

    /// Runs [`ProtocolServer::serve`] in the background
    pub fn spawn(self) -> Result<ServerHandle, MeterError> {
        let local_addr = self.local_addr()?;
        let (state_tx, state_rx) = watch::channel(ServerState::Listening);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(self.serve(
            async move {
                let _ = shutdown_rx.await;
            },
            state_tx,
        ));
        Ok(ServerHandle {
            local_addr,
            state: state_rx,
            shutdown: shutdown_tx,
            task,
        })
    }
}

/// Source of incoming connections for [`accept_loop`]
trait Accept {
    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl Accept for TcpListener {
    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// Pause after an accept error that is not about a single connection, such
/// as running out of file descriptors
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

async fn accept_loop<A, F>(
    listener: &mut A,
    service: MeterService,
    shutdown: F,
    state: watch::Sender<ServerState>,
) where
    A: Accept,
    F: Future<Output = ()>,
{
    let _ = state.send(ServerState::Listening);
    tokio::pin!(shutdown);
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Accepted connection from {peer}");
                    let service = service.clone();
                    connections.spawn(async move {
                        if let Err(e) = handle_connection(stream, service).await {
                            debug!("Connection from {peer} closed: {e}");
                        }
                    });
                }
                Err(e) if is_connection_error(&e) => warn!("Failed to accept connection: {e}"),
                Err(e) => {
                    warn!("Failed to accept connection, retrying in {ACCEPT_BACKOFF:?}: {e}");
                    sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
    connections.shutdown().await;
    let _ = state.send(ServerState::Stopped);
    info!("Modbus server stopped");
}

fn is_connection_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

/// Serves one client until it disconnects or sends a broken header
async fn handle_connection(mut stream: TcpStream, service: MeterService) -> Result<(), MeterError> {
    let mut header_bytes = [0u8; MBAP_HEADER_LEN];
    loop {
        match stream.read_exact(&mut header_bytes).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        let header = Header::parse(&header_bytes)?;
        let mut pdu = vec![0u8; header.pdu_len()];
        stream.read_exact(&mut pdu).await?;

        // The store lock is released before any bytes go back on the wire
        let reply = service.respond(&header, &pdu);
        stream.write_all(&reply).await?;
    }
}

/// Control handle of a spawned [`ProtocolServer`]. Dropping it shuts the
/// server down.
pub struct ServerHandle {
    local_addr: SocketAddr,
    state: watch::Receiver<ServerState>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.clone()
    }

    /// Stops accepting connections and waits for the accept loop to finish
    pub async fn shutdown(self) -> Result<(), MeterError> {
        let _ = self.shutdown.send(());
        self.task
            .await
            .map_err(|e| MeterError::Io(io::Error::other(e)))
    }
}
