#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod core;
pub mod descriptor;
pub mod engine;
mod error;
pub mod fingerprint;
pub mod graph;
mod io;
pub mod server;
pub mod task;
pub mod transform;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use crate::core::as_overhead;
use crate::graph::DevGraph;
use crate::task::Compiler;

pub use crate::core::Mode;
pub use crate::descriptor::{Config, TaskDescriptor};
pub use crate::engine::Diagnostics;
pub use crate::error::*;
pub use crate::server::{DevServer, Headless, LiveServer, ServerConfig};
pub use crate::transform::{Toolchain, Transform};

/// A configured build pipeline, ready to run in either mode.
///
/// ```no_run
/// use gulpless::{Config, Mode, Pipeline};
///
/// let config = Config::load("pipeline.json")?;
/// Pipeline::new(config).run(Mode::Prod)?;
/// # Ok::<(), gulpless::PipelineError>(())
/// ```
pub struct Pipeline {
    config: Config,
    transform: Arc<dyn Transform>,
    server: Arc<dyn DevServer>,
    server_config: ServerConfig,
}

impl Pipeline {
    /// Pipeline using the stock [`Toolchain`] and [`LiveServer`].
    pub fn new(config: Config) -> Self {
        let server_config = ServerConfig {
            root: config.build.clone(),
            route_base: config.route_base.clone(),
            ..ServerConfig::default()
        };

        Self {
            config,
            transform: Arc::new(Toolchain::default()),
            server: Arc::new(LiveServer::default()),
            server_config,
        }
    }

    pub fn with_transform(mut self, transform: impl Transform + 'static) -> Self {
        self.transform = Arc::new(transform);
        self
    }

    pub fn with_server(mut self, server: impl DevServer + 'static) -> Self {
        self.server = Arc::new(server);
        self
    }

    /// Where `/api` requests are forwarded in dev mode. Certificates of the
    /// target are only verified when `secure` is set.
    pub fn with_proxy(mut self, target: impl Into<String>, secure: bool) -> Self {
        self.server_config.api_proxy = target.into();
        self.server_config.api_proxy_secure = secure;
        self
    }

    /// Address the dev server listens on.
    pub fn with_address(mut self, address: SocketAddr) -> Self {
        self.server_config.address = address;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn server_config(&self) -> &ServerConfig {
        &self.server_config
    }

    /// Runs the pipeline. In dev mode this only returns once the file
    /// watcher stops.
    pub fn run(&self, mode: Mode) -> Result<Diagnostics, PipelineError> {
        tracing::info!("running in {mode} mode");

        match mode {
            Mode::Dev => self.develop(),
            Mode::Prod => self.build(),
        }
    }

    /// Production build: every base task in parallel, then the fingerprint
    /// groups one after another. The first failure aborts the build.
    pub fn build(&self) -> Result<Diagnostics, PipelineError> {
        let s = Instant::now();

        let compiler = Compiler::new(self.transform.clone(), Mode::Prod);
        let graph = graph::compose_prod(&self.config, &compiler)?;

        io::clear_dir(&self.config.build)?;

        tracing::info!("running {} tasks", graph.task_count());
        let diagnostics = engine::run_graph(&graph)?;
        tracing::info!("production build done {}", as_overhead(s));

        Ok(diagnostics)
    }

    /// Dev build followed by the watch loop. Failing tasks are logged and
    /// retried on the next change of their sources.
    #[cfg(feature = "live")]
    pub fn develop(&self) -> Result<Diagnostics, PipelineError> {
        let (dev, diagnostics) = self.prepare()?;
        engine::watch(&dev.watch, self.server.clone())?;
        Ok(diagnostics)
    }

    #[cfg(not(feature = "live"))]
    pub fn develop(&self) -> Result<Diagnostics, PipelineError> {
        Err(PipelineError::LiveDisabled)
    }

    /// Everything dev mode does before it starts watching.
    fn prepare(&self) -> Result<(DevGraph, Diagnostics), PipelineError> {
        let compiler = Compiler::new(self.transform.clone(), Mode::Dev);
        let dev = graph::compose_dev(&self.config, &compiler)?;

        io::clear_dir(&self.config.build)?;

        self.server
            .start(&self.server_config)
            .map_err(PipelineError::Server)?;

        tracing::info!("running initial build...");
        let diagnostics = engine::run_reporting(&dev.graph);

        Ok((dev, diagnostics))
    }
}
