use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::engine::Engine;
use crate::limits::*;
use crate::notify::NotifyHub;
use crate::sweeper;

/// Manages per-site engines. Each makerspace site gets its own Engine +
/// WAL + sweeper + compactor. Site = database name from the connection.
pub struct SiteManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    horizon_days: u32,
}

impl SiteManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, horizon_days: u32) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            horizon_days,
        }
    }

    /// Get or lazily create an engine for the given site.
    pub fn get_or_create(&self, site: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(site) {
            return Ok(engine.value().clone());
        }
        if site.len() > MAX_SITE_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "site name too long",
            ));
        }
        if self.engines.len() >= MAX_SITES {
            return Err(std::io::Error::other("too many sites"));
        }

        // Sanitize the site name to prevent path traversal
        let safe_name: String = site
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty site name",
            ));
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(wal_path, notify, self.horizon_days)?);

        // Spawn sweeper + compactor for this site
        let sweep_engine = engine.clone();
        tokio::spawn(async move {
            sweeper::run_sweeper(sweep_engine).await;
        });
        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            sweeper::run_compactor(compactor_engine, threshold).await;
        });

        self.engines.insert(site.to_string(), engine.clone());
        metrics::gauge!(crate::observability::SITES_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Actor;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("shoptime_test_site").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn tender() -> Actor {
        Actor::from_login("toolmaster:tender")
    }

    #[tokio::test]
    async fn site_isolation() {
        let dir = test_data_dir("isolation");
        let sm = SiteManager::new(dir, 1000, 60);

        let eng_a = sm.get_or_create("site_a").unwrap();
        let eng_b = sm.get_or_create("site_b").unwrap();

        let rid = Ulid::new();

        // Same resource id in both sites
        eng_a.create_resource(&tender(), rid, None, None, 1, None).await.unwrap();
        eng_b.create_resource(&tender(), rid, None, None, 1, None).await.unwrap();

        eng_a
            .add_hours(&tender(), Ulid::new(), rid, "MO", "09:00", "17:00")
            .await
            .unwrap();

        // Site B's resource has no opening hours
        let hours_b = eng_b.get_hours(rid).await.unwrap();
        assert!(hours_b.is_empty());

        let hours_a = eng_a.get_hours(rid).await.unwrap();
        assert_eq!(hours_a.len(), 1);
    }

    #[tokio::test]
    async fn site_lazy_creation() {
        let dir = test_data_dir("lazy");
        let sm = SiteManager::new(dir.clone(), 1000, 60);

        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        let _eng = sm.get_or_create("downtown").unwrap();
        assert!(dir.join("downtown.wal").exists());
    }

    #[tokio::test]
    async fn site_same_engine_returned() {
        let dir = test_data_dir("same_eng");
        let sm = SiteManager::new(dir, 1000, 60);

        let eng1 = sm.get_or_create("foo").unwrap();
        let eng2 = sm.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn site_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let sm = SiteManager::new(dir.clone(), 1000, 60);

        // Path traversal attempt
        let _eng = sm.get_or_create("../evil").unwrap();
        assert!(dir.join("evil.wal").exists());

        // Empty after sanitization
        let result = sm.get_or_create("../..");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn site_name_too_long() {
        let dir = test_data_dir("name_too_long");
        let sm = SiteManager::new(dir, 1000, 60);

        let long_name = "x".repeat(MAX_SITE_NAME_LEN + 1);
        let result = sm.get_or_create(&long_name);
        assert!(result.is_err());
        assert!(result.err().unwrap().to_string().contains("site name too long"));
    }

    #[tokio::test]
    async fn site_count_limit() {
        let dir = test_data_dir("count_limit");
        let sm = SiteManager::new(dir, 1000, 60);

        for i in 0..MAX_SITES {
            sm.get_or_create(&format!("s{i}")).unwrap();
        }
        let result = sm.get_or_create("one_more");
        assert!(result.is_err());
        assert!(result.err().unwrap().to_string().contains("too many sites"));
    }
}
