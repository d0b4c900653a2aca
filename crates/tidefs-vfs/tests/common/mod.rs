//! Common helpers for VFS integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use tidefs_vfs::testing::MemBackend;
use tidefs_vfs::{FileSystem, OpContext, VfsConfig};

/// A filesystem over a fresh in-memory backend.
pub struct TestFs {
    pub fs: FileSystem,
    pub backend: Arc<MemBackend>,
}

impl TestFs {
    pub async fn new(config: VfsConfig) -> Self {
        Self::with_backend(config, MemBackend::new()).await
    }

    pub async fn with_backend(config: VfsConfig, backend: MemBackend) -> Self {
        let backend = Arc::new(backend);
        let fs = FileSystem::new(config, backend.clone(), backend.clone(), backend.clone()).await;
        Self { fs, backend }
    }

    /// Component-walk resolution with the default cache timeouts.
    pub async fn walking() -> Self {
        Self::new(VfsConfig::default().fast_resolve(false)).await
    }

    /// Writes `content` to a new file at `path` and closes it.
    pub async fn write_file(&self, ctx: &OpContext, path: &str, content: &[u8]) {
        let file = self
            .fs
            .create(ctx, path, 0o644, 0o022)
            .await
            .expect("create failed");
        file.write(ctx, content).await.expect("write failed");
        file.close(ctx).await.expect("close failed");
    }
}

/// An unprivileged caller.
pub fn user() -> OpContext {
    OpContext::new(1000, 1000, 4242)
}

/// Installs a test subscriber honouring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
