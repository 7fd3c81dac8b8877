use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use course_server::{
    api::{AppState, app},
    config::Config,
    db,
    purchase::provider::StripeProvider,
    utils::init_log,
};
use rustls::crypto::{CryptoProvider, aws_lc_rs};
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file, secrets may also come from the environment
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    #[arg(short, long, default_value = "8080")]
    port: u16,
    #[arg(short, long, default_value = "database/course.db")]
    database: PathBuf,
    /// Write daily rotated logs here instead of stdout
    #[arg(short, long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _guard = init_log(args.log_dir.clone())?;
    let config = Config::load(args.config.as_deref())?;
    let database = db::connect(&args.database).await?;
    let payments = Arc::new(StripeProvider::new(&config.payment)?);
    let tls = config.tls.clone();
    let router = app(AppState::new(database, config, payments));

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    match tls {
        Some(tls) => {
            CryptoProvider::install_default(aws_lc_rs::default_provider()).map_err(|e| {
                anyhow::anyhow!("Failed to initialize rustls crypto provider: {:?}", e)
            })?;
            let rustls = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path).await?;
            info!("listening on https://{}", addr);
            info!("Swagger UI available at https://{}/swagger-ui/", addr);
            axum_server::bind_rustls(addr, rustls)
                .serve(router.into_make_service())
                .await?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            info!("listening on http://{}", addr);
            info!("Swagger UI available at http://{}/swagger-ui/", addr);
            axum::serve(listener, router).await?;
        }
    }
    Ok(())
}
