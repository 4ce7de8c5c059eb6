use clap::Parser;
use ipatool_web::config::{DEFAULT_KEYCHAIN_PASSPHRASE, DEFAULT_SEARCH_LIMIT};
use ipatool_web::{redirect_router, router, tls, Config, Orchestrator, Result};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "ipatool-web")]
#[command(about = "Search, download and OTA-install iOS apps through ipatool")]
#[command(version)]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "IPATOOL_WEB_BIND", default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 443)]
    port: u16,

    /// Path to the ipatool binary
    #[arg(long = "ipatool", env = "IPATOOL_PATH", default_value = "ipatool")]
    ipatool: PathBuf,

    /// Passphrase ipatool uses for its keychain
    #[arg(long, env = "IPATOOL_KEYCHAIN_PASSPHRASE", default_value = DEFAULT_KEYCHAIN_PASSPHRASE, hide_env_values = true)]
    keychain_passphrase: String,

    /// Where acquisition directories are created (defaults to the system temp dir)
    #[arg(long, env = "IPATOOL_WEB_STAGING_DIR")]
    staging_dir: Option<PathBuf>,

    /// Seconds before an ipatool invocation is killed
    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,

    /// Maximum number of search results requested from ipatool
    #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
    search_limit: u32,

    /// Host name to put in manifest URLs instead of the request's Host header
    #[arg(long, env = "IPATOOL_WEB_PUBLIC_HOST")]
    public_host: Option<String>,

    /// Directory containing cert.pem and key.pem
    #[arg(long, env = "IPATOOL_WEB_SSL_DIR", default_value = "ssl")]
    ssl_dir: PathBuf,

    /// Also listen here and redirect plain HTTP to HTTPS
    #[arg(long, env = "REDIRECT_PORT")]
    redirect_port: Option<u16>,
}

impl Cli {
    fn into_config(self) -> Config {
        let mut config = Config {
            tool_path: self.ipatool,
            keychain_passphrase: self.keychain_passphrase,
            tool_timeout: Duration::from_secs(self.timeout_secs),
            search_limit: self.search_limit,
            public_host: self.public_host,
            ssl_dir: self.ssl_dir,
            ..Config::default()
        };
        if let Some(dir) = self.staging_dir {
            config.staging_root = dir;
        }
        config.tls_enabled = config.has_tls_identity();
        config
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    if let Err(e) = run(Cli::parse()).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let addr = SocketAddr::new(cli.bind, cli.port);
    let redirect_port = cli.redirect_port;
    let config = cli.into_config();
    let tls_enabled = config.tls_enabled;
    let acceptor = if tls_enabled {
        Some(tls::load_acceptor(&config.cert_path(), &config.key_path())?)
    } else {
        None
    };

    info!(
        staging_root = %config.staging_root.display(),
        ipatool = %config.tool_path.display(),
        "configuration loaded"
    );

    let app = router(Arc::new(Orchestrator::new(config)));
    let listener = TcpListener::bind(addr).await?;

    match acceptor {
        Some(acceptor) => {
            info!("starting HTTPS server on https://{}", addr);
            info!("OTA installation enabled");
            info!(
                "self-signed certificates must be trusted on the device: https://<your-ip>:{}/ssl/cert.pem",
                addr.port()
            );

            if let Some(port) = redirect_port {
                spawn_redirect(SocketAddr::new(addr.ip(), port), addr.port()).await?;
            }

            let listener = tls::TlsListener::new(listener, acceptor)?;
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
        None => {
            info!("starting HTTP server on http://{}", addr);
            warn!("OTA installation disabled: cert.pem and key.pem not found");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
    }

    info!("server stopped");
    Ok(())
}

async fn spawn_redirect(addr: SocketAddr, https_port: u16) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("redirecting http://{} to HTTPS", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, redirect_router(https_port)).await {
            error!(error = %e, "redirect server failed");
        }
    });
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
