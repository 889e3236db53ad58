//! Development server: static files, API proxy and browser reloads.

#[cfg(feature = "server")]
mod http;
#[cfg(feature = "live")]
mod reload;

use std::net::SocketAddr;
use std::sync::Mutex;
use std::sync::mpsc::Sender;

use camino::Utf8PathBuf;

/// Where and how the development build is served.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Build output directory.
    pub root: Utf8PathBuf,
    /// URL prefix the application lives under.
    pub route_base: String,
    /// Origin every `/api` request is forwarded to.
    pub api_proxy: String,
    /// Verify TLS certificates of the proxy target.
    pub api_proxy_secure: bool,
    /// Serve `index.html` for unknown page routes.
    pub fallback: bool,
    /// Where the dev server listens, must differ from the proxy target.
    pub address: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root: Utf8PathBuf::from("build/web"),
            route_base: String::from("/"),
            api_proxy: String::from("http://127.0.0.1:8080"),
            api_proxy_secure: false,
            fallback: true,
            address: SocketAddr::from(([127, 0, 0, 1], 3000)),
        }
    }
}

/// A server the pipeline can start before the first dev build and notify
/// after every successful rebuild.
pub trait DevServer: Send + Sync {
    fn start(&self, config: &ServerConfig) -> anyhow::Result<()>;

    /// Never blocks.
    fn reload(&self);
}

/// Server which does nothing, for builds without a browser attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct Headless;

impl DevServer for Headless {
    fn start(&self, _: &ServerConfig) -> anyhow::Result<()> {
        tracing::debug!("running without a dev server");
        Ok(())
    }

    fn reload(&self) {}
}

/// The stock dev server. Serving files needs the `server` feature, browser
/// reloads need the `live` feature.
#[derive(Debug, Default)]
pub struct LiveServer {
    reload: Mutex<Option<Sender<()>>>,
}

impl DevServer for LiveServer {
    fn start(&self, config: &ServerConfig) -> anyhow::Result<()> {
        #[cfg(feature = "live")]
        let port = {
            let (listener, port) = reload::reserve_port()?;
            let sender = reload::start(listener);
            *self.reload.lock().unwrap_or_else(|poison| poison.into_inner()) = Some(sender);
            tracing::info!("reload socket listening on port {port}");
            Some(port)
        };
        #[cfg(not(feature = "live"))]
        let port: Option<u16> = None;

        #[cfg(feature = "server")]
        let _thread = http::start(config, port)?;
        #[cfg(not(feature = "server"))]
        {
            let _ = (config, port);
            tracing::warn!("built without the `server` feature, not serving files");
        }

        Ok(())
    }

    fn reload(&self) {
        let guard = self.reload.lock().unwrap_or_else(|poison| poison.into_inner());
        if let Some(sender) = guard.as_ref() {
            // The broadcast thread only exits with the process.
            let _ = sender.send(());
        }
    }
}
