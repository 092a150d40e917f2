use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use log::{info, warn};
use warp::Filter;

use forumx_live::api;
use forumx_live::chat::ChatGateway;
use forumx_live::config::Config;
use forumx_live::discussion::{DiscussionAccess, OpenAccess};
use forumx_live::signal::SignalRelay;
use forumx_live::store::{MessageStore, SqliteStore};

fn tls_material_ok(cert_path: &str, key_path: &str) -> bool {
    let cert_file = match File::open(cert_path) {
        Ok(file) => file,
        Err(e) => {
            info!("no certificate at {cert_path}: {e}");
            return false;
        }
    };
    let key_file = match File::open(key_path) {
        Ok(file) => file,
        Err(e) => {
            info!("no private key at {key_path}: {e}");
            return false;
        }
    };

    let certs: Vec<_> = match rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<Result<_, _>>()
    {
        Ok(certs) => certs,
        Err(e) => {
            warn!("failed to parse certificate {cert_path}: {e}");
            return false;
        }
    };
    let keys: Vec<_> = match rustls_pemfile::pkcs8_private_keys(&mut BufReader::new(key_file))
        .collect::<Result<_, _>>()
    {
        Ok(keys) => keys,
        Err(e) => {
            warn!("failed to parse private key {key_path}: {e}");
            return false;
        }
    };

    !certs.is_empty() && !keys.is_empty()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    env_logger::init();

    let config = Config::from_env();

    let store: Arc<dyn MessageStore> =
        Arc::new(SqliteStore::connect(&config.database_url).await?);
    let access: Arc<dyn DiscussionAccess> = Arc::new(OpenAccess);

    let gateway = ChatGateway::new(store.clone(), access.clone());
    let relay = SignalRelay::new(access);

    let routes = gateway
        .route(config.jwt_secret.clone())
        .or(relay.route(config.jwt_secret.clone()))
        .or(api::routes(store, config.jwt_secret.clone()))
        .recover(api::handle_rejection)
        .with(warp::cors().allow_any_origin());

    let addr = ([0, 0, 0, 0], config.port);
    if tls_material_ok(&config.tls_cert_path, &config.tls_key_path) {
        info!("starting secure server (https/wss) on port {}", config.port);
        warp::serve(routes)
            .tls()
            .cert_path(&config.tls_cert_path)
            .key_path(&config.tls_key_path)
            .run(addr)
            .await;
    } else {
        info!(
            "TLS material unavailable, serving plaintext (http/ws) on port {}",
            config.port
        );
        warp::serve(routes).run(addr).await;
    }

    Ok(())
}
