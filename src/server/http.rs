use std::net::{IpAddr, TcpListener};
use std::sync::Arc;
use std::thread;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use console::style;
use tower_http::services::{ServeDir, ServeFile};
use tracing::info;

use super::ServerConfig;

struct Proxy {
    client: reqwest::Client,
    target: String,
}

/// Binds the listener on the calling thread so address errors surface
/// immediately, then serves on a dedicated thread.
pub(super) fn start(
    config: &ServerConfig,
    reload_port: Option<u16>,
) -> anyhow::Result<thread::JoinHandle<()>> {
    if proxies_to_itself(config)? {
        anyhow::bail!(
            "API proxy target {} is the dev server's own address {}, set API_PROXY to the backend",
            config.api_proxy,
            config.address
        );
    }

    let listener = TcpListener::bind(config.address)?;
    listener.set_nonblocking(true)?;

    let router = router(config, reload_port)?;
    let url = format!("http://{}{}", config.address, route_base(&config.route_base));

    info!(url = %style(url).yellow(), "starting a HTTP server");

    Ok(thread::spawn(move || {
        let result = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(anyhow::Error::from)
            .and_then(|runtime| runtime.block_on(serve(listener, router)));

        if let Err(e) = result {
            tracing::error!("HTTP server stopped: {e}");
        }
    }))
}

async fn serve(listener: TcpListener, router: Router) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::from_std(listener)?;
    axum::serve(listener, router).await?;
    Ok(())
}

fn router(config: &ServerConfig, reload_port: Option<u16>) -> anyhow::Result<Router> {
    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(!config.api_proxy_secure)
        .redirect(reqwest::redirect::Policy::none())
        .build()?;

    let proxy = Arc::new(Proxy {
        client,
        target: config.api_proxy.trim_end_matches('/').to_string(),
    });

    let base = route_base(&config.route_base);
    let site = config.root.join(base.trim_matches('/'));

    // Missing assets are real 404s, only page routes fall back to the index.
    let mut router = Router::new()
        .route("/api", any(forward))
        .route("/api/{*rest}", any(forward))
        .with_state(proxy)
        .nest_service(&format!("{base}assets"), ServeDir::new(site.join("assets")));

    #[cfg(feature = "live")]
    if let Some(port) = reload_port {
        let script = super::reload::script(port);
        router = router.route(
            "/__reload.js",
            axum::routing::get(move || {
                let script = script.clone();
                async move { ([(header::CONTENT_TYPE, "text/javascript")], script) }
            }),
        );
    }
    #[cfg(not(feature = "live"))]
    let _ = reload_port;

    let files = ServeDir::new(&config.root);
    let router = if config.fallback {
        router.fallback_service(files.fallback(ServeFile::new(site.join("index.html"))))
    } else {
        router.fallback_service(files)
    };

    Ok(router)
}

async fn forward(
    State(proxy): State<Arc<Proxy>>,
    method: Method,
    uri: Uri,
    mut headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path_and_query().map_or(uri.path(), |pq| pq.as_str());
    let url = format!("{}{}", proxy.target, path);

    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);

    tracing::debug!("proxying {method} {url}");

    let response = match proxy
        .client
        .request(method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => return bad_gateway(&url, e),
    };

    let status = response.status();
    let mut headers = response.headers().clone();
    headers.remove(header::TRANSFER_ENCODING);
    headers.remove(header::CONNECTION);
    headers.remove(header::CONTENT_LENGTH);

    match response.bytes().await {
        Ok(bytes) => {
            let mut out = Response::new(Body::from(bytes));
            *out.status_mut() = status;
            *out.headers_mut() = headers;
            out
        }
        Err(e) => bad_gateway(&url, e),
    }
}

fn bad_gateway(url: &str, e: reqwest::Error) -> Response {
    tracing::error!("proxying {url} failed: {e}");
    (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
}

/// Whether forwarding `/api` would send requests back to this server.
fn proxies_to_itself(config: &ServerConfig) -> anyhow::Result<bool> {
    let target = reqwest::Url::parse(&config.api_proxy)?;

    if target.port_or_known_default() != Some(config.address.port()) {
        return Ok(false);
    }

    let bound = config.address.ip();
    let same_host = match target.host_str() {
        Some("localhost") => bound.is_loopback() || bound.is_unspecified(),
        Some(host) => match host.trim_matches(['[', ']']).parse::<IpAddr>() {
            Ok(ip) => ip == bound || bound.is_unspecified() || (ip.is_loopback() && bound.is_loopback()),
            Err(_) => false,
        },
        None => false,
    };

    Ok(same_host)
}

/// Route base with exactly one leading and one trailing slash.
pub(super) fn route_base(base: &str) -> String {
    let trimmed = base.trim_matches('/');
    if trimmed.is_empty() {
        String::from("/")
    } else {
        format!("/{trimmed}/")
    }
}
