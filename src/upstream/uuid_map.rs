use std::collections::BTreeMap;
use std::fs;
use std::sync::Mutex;

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiResult;

/// One persisted group identity pairing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UuidMapping {
    pub diyhue_uuid: Uuid,
    pub bridge_uuid: Uuid,
    pub bridge_group_id: Option<u32>,
    pub last_updated: DateTime<Utc>,
}

/// Persists `group name -> (local uuid, upstream uuid, upstream group
/// id)` so entertainment identity survives restarts. The file is
/// authoritative on read but reconciled against the upstream bridge at
/// session start.
#[derive(Debug)]
pub struct UuidMapper {
    path: Utf8PathBuf,
    state: Mutex<BTreeMap<String, UuidMapping>>,
}

impl UuidMapper {
    #[must_use]
    pub fn load(path: Utf8PathBuf) -> Self {
        let state = fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default();

        Self {
            path,
            state: Mutex::new(state),
        }
    }

    pub fn get(&self, group_name: &str) -> Option<UuidMapping> {
        self.lock().get(group_name).cloned()
    }

    pub fn add_mapping(
        &self,
        group_name: &str,
        diyhue_uuid: Uuid,
        bridge_uuid: Uuid,
        bridge_group_id: Option<u32>,
    ) -> ApiResult<()> {
        let mut state = self.lock();
        state.insert(
            group_name.to_string(),
            UuidMapping {
                diyhue_uuid,
                bridge_uuid,
                bridge_group_id,
                last_updated: Utc::now(),
            },
        );

        let text = serde_json::to_string_pretty(&*state)?;
        fs::write(&self.path, text)?;

        log::info!("Mapped group {group_name:?}: {diyhue_uuid} -> {bridge_uuid}");
        Ok(())
    }

    pub fn remove(&self, group_name: &str) -> ApiResult<()> {
        let mut state = self.lock();
        if state.remove(group_name).is_some() {
            let text = serde_json::to_string_pretty(&*state)?;
            fs::write(&self.path, text)?;
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, UuidMapping>> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;
    use uuid::Uuid;

    use crate::upstream::uuid_map::UuidMapper;

    fn temp_path(tag: &str) -> Utf8PathBuf {
        let dir = std::env::temp_dir();
        let file = format!("prisma-uuidmap-{}-{tag}.json", std::process::id());
        Utf8PathBuf::from_path_buf(dir.join(file)).unwrap()
    }

    #[test]
    fn roundtrips_through_the_file() {
        let path = temp_path("roundtrip");
        let diy = Uuid::new_v4();
        let bridge = Uuid::new_v4();

        let mapper = UuidMapper::load(path.clone());
        mapper
            .add_mapping("Living room", diy, bridge, Some(7))
            .unwrap();

        let reloaded = UuidMapper::load(path.clone());
        let mapping = reloaded.get("Living room").unwrap();

        assert_eq!(mapping.diyhue_uuid, diy);
        assert_eq!(mapping.bridge_uuid, bridge);
        assert_eq!(mapping.bridge_group_id, Some(7));

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn missing_file_yields_empty_map() {
        let mapper = UuidMapper::load(temp_path("missing-nonexistent"));
        assert!(mapper.get("anything").is_none());
    }

    #[test]
    fn remove_persists() {
        let path = temp_path("remove");
        let mapper = UuidMapper::load(path.clone());
        mapper
            .add_mapping("TV", Uuid::new_v4(), Uuid::new_v4(), None)
            .unwrap();
        mapper.remove("TV").unwrap();

        let reloaded = UuidMapper::load(path.clone());
        assert!(reloaded.get("TV").is_none());

        std::fs::remove_file(path).ok();
    }
}
