use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use envconfig::Envconfig;
use once_cell::sync::Lazy;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use tokio::net::TcpListener;
use tokio::sync::Notify;

use meta_registry::config::Config;
use meta_registry::server::serve;

pub static DEFAULT_CONFIG: Lazy<Config> = Lazy::new(|| {
    let vars: HashMap<String, String> = [
        ("BIND_HOST", "127.0.0.1"),
        ("BIND_PORT", "0"),
        ("MEMORY_STORE", "true"),
        ("EXPORT_PROMETHEUS", "false"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    Config::init_from_hashmap(&vars).expect("default test config should load")
});

pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: Arc<Notify>,
}

impl ServerHandle {
    pub async fn for_config(config: Config) -> ServerHandle {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let notify = Arc::new(Notify::new());
        let shutdown = notify.clone();

        tokio::spawn(async move {
            serve(config, listener, async move { notify.notified().await }).await
        });
        ServerHandle { addr, shutdown }
    }

    pub async fn register<T: Into<reqwest::Body>>(&self, body: T) -> reqwest::Response {
        let client = reqwest::Client::new();
        client
            .post(format!("http://{:?}/register", self.addr))
            .body(body)
            .header(CONTENT_TYPE, "application/x-ndjson")
            .send()
            .await
            .expect("failed to send request")
    }

    pub async fn register_gzipped<T: Into<reqwest::Body>>(&self, body: T) -> reqwest::Response {
        let client = reqwest::Client::new();
        client
            .post(format!("http://{:?}/register", self.addr))
            .body(body)
            .header(CONTENT_TYPE, "application/x-ndjson")
            .header(CONTENT_ENCODING, "gzip")
            .send()
            .await
            .expect("failed to send request")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        reqwest::get(format!("http://{:?}{}", self.addr, path))
            .await
            .expect("failed to send request")
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown.notify_one()
    }
}
