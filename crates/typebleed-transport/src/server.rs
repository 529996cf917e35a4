use crate::dispatcher::{router, AppState};
use axum::Router;
use socket2::{Domain, Protocol, Socket, Type};
use std::future::Future;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use typebleed_codec::{FontFaceSheet, Lexicon, ReconstructionEngine, TemplateCatalog};
use typebleed_core::{CapturePipeline, EvictionSweeper, Result, TypeBleedConfig, TypeBleedError};

const LISTEN_BACKLOG: i32 = 1024;

/// The HTTP front of the pipeline: page, stylesheet, capture ingress and
/// the reconstruction API on one listener.
pub struct TypeBleedServer {
    addr: SocketAddr,
    state: AppState,
    sweep_interval: Duration,
}

impl TypeBleedServer {
    /// Wires every component from `config`. Any inconsistency is fatal here,
    /// before a single request is served.
    pub fn from_config(config: &TypeBleedConfig) -> Result<Self> {
        let pipeline = Arc::new(CapturePipeline::from_config(config)?);
        let catalog = TemplateCatalog::from_config(config, &pipeline.registry)?;
        let engine = ReconstructionEngine::from_config(&config.reconstruction)
            .with_lexicon(Lexicon::from_config(config));
        let sheet = FontFaceSheet::new(config.server.font_family.clone(), &config.capture);

        let addr = (config.server.host.as_str(), config.server.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                TypeBleedError::config(format!(
                    "{}:{} does not resolve to an address",
                    config.server.host, config.server.port
                ))
            })?;

        Ok(Self {
            addr,
            state: AppState {
                pipeline,
                catalog: Arc::new(catalog),
                engine: Arc::new(engine),
                sheet: Arc::new(sheet),
                fonts_dir: config.server.fonts_dir.clone(),
                page: config.server.page.clone(),
                static_dir: config.server.static_dir.clone(),
                bucket_width_ms: config.capture.bucket_width_ms,
                font_extension: config.capture.extension.clone(),
            },
            sweep_interval: config.capture.sweep_interval(),
        })
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Binds the listening socket with `SO_REUSEADDR` so a restart does not
    /// wait out `TIME_WAIT`.
    pub fn bind(&self) -> Result<std::net::TcpListener> {
        let socket = Socket::new(Domain::for_address(self.addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_nodelay(true)?;
        socket.bind(&self.addr.into())?;
        socket.listen(LISTEN_BACKLOG)?;
        socket.set_nonblocking(true)?;
        Ok(socket.into())
    }

    /// Serves on `listener` until `shutdown` resolves, then stops the
    /// sweeper and tears the session store down.
    pub async fn serve(
        self,
        listener: std::net::TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let listener = tokio::net::TcpListener::from_std(listener)?;
        let local = listener.local_addr()?;
        let store = self.state.pipeline.store.clone();

        let (stop_tx, stop_rx) = watch::channel(false);
        let sweeper = EvictionSweeper::new(store.clone(), self.sweep_interval).spawn(stop_rx);

        tracing::info!(
            "TypeBleedServer: listening on http://{} ({} codepoints, {} templates)",
            local,
            self.state.pipeline.registry.len(),
            self.state.catalog.len()
        );

        let app = self.router();
        let served = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown)
            .await;

        let _ = stop_tx.send(true);
        if let Err(e) = sweeper.await {
            tracing::error!("TypeBleedServer: sweeper task failed: {}", e);
        }
        store.teardown();
        tracing::info!("TypeBleedServer: stopped");
        served.map_err(TypeBleedError::from)
    }

    /// Binds the configured address and serves until Ctrl-C.
    pub async fn start(self) -> Result<()> {
        let listener = self.bind()?;
        self.serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("TypeBleedServer: cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("TypeBleedServer: shutdown requested");
        })
        .await
    }
}
