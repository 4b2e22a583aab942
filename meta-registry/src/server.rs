use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::Config;
use crate::registry::Registrar;
use crate::router;
use crate::store::{MemoryStore, MetaStore, PgStore};

pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let mut pg_store = None;
    let store: Arc<dyn MetaStore> = if *config.memory_store {
        tracing::warn!("using the in-memory store, nothing will be persisted");
        Arc::new(MemoryStore::new())
    } else {
        match PgStore::new(&config).await {
            Ok(store) => {
                pg_store = Some(store.clone());
                Arc::new(store)
            }
            Err(e) => {
                tracing::error!(
                    "Failed to connect to {}: {}",
                    config.redacted_database_url(),
                    e
                );
                return;
            }
        }
    };

    let app = router::router(
        Registrar::new(store),
        *config.export_prometheus,
        config.max_body_size,
    );

    match listener.local_addr() {
        Ok(addr) => tracing::info!("listening on {}", addr),
        Err(e) => tracing::warn!("listening on an unknown address: {}", e),
    }

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::error!("server stopped with an error: {}", e);
    }

    if let Some(store) = pg_store {
        store.close().await;
        tracing::info!("connection pool closed");
    }
}
