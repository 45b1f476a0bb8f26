use std::path::Path;

use akari_resources::MetadataStore;
use uuid::Uuid;

pub fn register(
    store: &mut MetadataStore,
    path: &Path,
    uuid: Option<Uuid>,
) -> anyhow::Result<Uuid> {
    if !path.is_file() {
        log::warn!("Registering {:?} which doesn't exist yet", path);
    }

    let uuid = uuid.unwrap_or_else(Uuid::new_v4);
    store.add(uuid, path)?;

    log::info!("Registered {:?} as {}", path, uuid);
    Ok(uuid)
}

pub fn relocate(store: &mut MetadataStore, uuid: &Uuid, new_path: &Path) -> anyhow::Result<()> {
    store.update(uuid, new_path)?;

    log::info!("Moved {} to {:?}", uuid, new_path);
    Ok(())
}

pub fn remove(store: &mut MetadataStore, uuid: &Uuid) -> anyhow::Result<()> {
    if store.remove(uuid)? {
        log::info!("Removed {}", uuid);
    }
    Ok(())
}
