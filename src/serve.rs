//! Local static file server over the output root.
//!
//! The build itself is synchronous; only this module runs on a tokio
//! runtime. Directory requests resolve to their `index.html`.

use axum::Router;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tracing::info;

#[derive(Error, Debug)]
pub enum ServeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

pub fn router(root: &Path) -> Router {
    Router::new().fallback_service(ServeDir::new(root).append_index_html_on_directories(true))
}

/// Serve `root` on an already bound listener until the task is dropped.
pub async fn serve_on(listener: TcpListener, root: PathBuf) -> Result<(), ServeError> {
    axum::serve(listener, router(&root)).await?;
    Ok(())
}

/// Bind `host:port` and serve `root`. Blocks the calling thread.
pub fn serve(root: &Path, host: &str, port: u16) -> Result<(), ServeError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|source| ServeError::Bind {
                addr: format!("{host}:{port}"),
                source,
            })?;
        info!(root = %root.display(), "Serving on http://{}:{}/", host, port);
        serve_on(listener, root.to_path_buf()).await
    })
}
