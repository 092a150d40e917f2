use log::warn;

const DEFAULT_PORT: u16 = 2052;
const DEFAULT_DATABASE_URL: &str = "sqlite:forumx.db?mode=rwc";
// Development fallback only; deployments must set JWT_SECRET.
const DEV_JWT_SECRET: &str = "your_jwt_secret_key_for_forumx";

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub jwt_secret: String,
    pub tls_cert_path: String,
    pub tls_key_path: String,
}

impl Config {
    pub fn from_env() -> Self {
        let port = match std::env::var("FORUMX_PORT") {
            Ok(raw) => raw.parse().unwrap_or_else(|_| {
                warn!("config: FORUMX_PORT {:?} is not a valid port, using {}", raw, DEFAULT_PORT);
                DEFAULT_PORT
            }),
            Err(_) => DEFAULT_PORT,
        };

        let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| {
            warn!("config: JWT_SECRET not set, using the development secret");
            DEV_JWT_SECRET.to_string()
        });

        Config {
            port,
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            jwt_secret,
            tls_cert_path: std::env::var("TLS_CERT_PATH")
                .unwrap_or_else(|_| "ssl/certificate.pem".to_string()),
            tls_key_path: std::env::var("TLS_KEY_PATH")
                .unwrap_or_else(|_| "ssl/private.key".to_string()),
        }
    }
}
