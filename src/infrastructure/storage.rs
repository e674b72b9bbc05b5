use crate::config::StorageConfig;
use crate::services::storage::StorageRoots;
use std::sync::Arc;
use tracing::info;

pub async fn setup_storage(config: &StorageConfig) -> anyhow::Result<Arc<StorageRoots>> {
    let roots = StorageRoots::from_config(config);

    let active_root = roots.resolve(roots.active_key())?.to_path_buf();
    info!(
        "🗄️  Local Storage: {} -> {:?} (temp: {:?})",
        roots.active_key(),
        active_root,
        roots.temp_root()
    );

    // Only the active roots are created; a stale key may point at an unmounted disk
    for dir in [active_root.as_path(), roots.temp_root()] {
        if tokio::fs::try_exists(dir).await? {
            info!("✅ Directory {:?} is ready", dir);
        } else {
            info!("📁 Directory {:?} not found, creating...", dir);
            tokio::fs::create_dir_all(dir).await?;
        }
    }

    Ok(Arc::new(roots))
}
