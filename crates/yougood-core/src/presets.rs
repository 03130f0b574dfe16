//! **PresetStore**: saved call plans in sled.
//!
//! All plans live as one JSON array under a single key, kept in most-recently-used
//! order: `last_used_at`, falling back to `created_at`, newest first.

use crate::error::{CoreError, CoreResult};
use crate::model::CallConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

const PLANS_TREE: &str = "saved_plans";
const PLANS_KEY: &[u8] = b"plans";

/// A named call configuration kept across sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedPlan {
    pub id: String,
    pub name: String,
    pub config: CallConfig,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl SavedPlan {
    fn recency(&self) -> DateTime<Utc> {
        self.last_used_at.unwrap_or(self.created_at)
    }
}

fn sort_mru(plans: &mut [SavedPlan]) {
    plans.sort_by(|a, b| b.recency().cmp(&a.recency()));
}

pub struct PresetStore {
    tree: sled::Tree,
    // Serializes read-modify-write of the single plans key.
    write_lock: Mutex<()>,
}

impl PresetStore {
    /// Opens or creates the store at `path` (a sled directory).
    pub fn open_path<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let db = sled::open(path.as_ref())?;
        let store = Self::from_db(&db)?;
        info!(path = %path.as_ref().display(), "preset store opened");
        Ok(store)
    }

    /// In-memory store that is discarded on drop.
    pub fn temporary() -> CoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(&db)
    }

    fn from_db(db: &sled::Db) -> CoreResult<Self> {
        Ok(Self {
            tree: db.open_tree(PLANS_TREE)?,
            write_lock: Mutex::new(()),
        })
    }

    fn load(&self) -> CoreResult<Vec<SavedPlan>> {
        let mut plans: Vec<SavedPlan> = match self.tree.get(PLANS_KEY)? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => Vec::new(),
        };
        sort_mru(&mut plans);
        Ok(plans)
    }

    fn store(&self, plans: &mut Vec<SavedPlan>) -> CoreResult<()> {
        sort_mru(plans);
        let bytes = serde_json::to_vec(plans)?;
        self.tree.insert(PLANS_KEY, bytes)?;
        self.tree.flush()?;
        Ok(())
    }

    fn modify<T>(&self, f: impl FnOnce(&mut Vec<SavedPlan>) -> CoreResult<T>) -> CoreResult<T> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut plans = self.load()?;
        let out = f(&mut plans)?;
        self.store(&mut plans)?;
        Ok(out)
    }

    /// All plans, most recently used first.
    pub fn list(&self) -> CoreResult<Vec<SavedPlan>> {
        self.load()
    }

    pub fn get(&self, id: &str) -> CoreResult<Option<SavedPlan>> {
        Ok(self.load()?.into_iter().find(|p| p.id == id))
    }

    pub fn save(&self, name: &str, config: CallConfig) -> CoreResult<SavedPlan> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::InvalidConfig("plan name must not be empty".to_string()));
        }
        let plan = SavedPlan {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            config,
            created_at: Utc::now(),
            last_used_at: None,
        };
        let saved = plan.clone();
        self.modify(move |plans| {
            plans.push(plan);
            Ok(())
        })?;
        debug!(id = %saved.id, name = %saved.name, "plan saved");
        Ok(saved)
    }

    /// Rename and/or replace the configuration of an existing plan.
    pub fn update(&self, id: &str, name: Option<&str>, config: Option<CallConfig>) -> CoreResult<SavedPlan> {
        self.modify(|plans| {
            let plan = plans
                .iter_mut()
                .find(|p| p.id == id)
                .ok_or_else(|| CoreError::PlanNotFound(id.to_string()))?;
            if let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) {
                plan.name = name.to_string();
            }
            if let Some(config) = config {
                plan.config = config;
            }
            Ok(plan.clone())
        })
    }

    pub fn mark_used(&self, id: &str) -> CoreResult<SavedPlan> {
        self.modify(|plans| {
            let plan = plans
                .iter_mut()
                .find(|p| p.id == id)
                .ok_or_else(|| CoreError::PlanNotFound(id.to_string()))?;
            plan.last_used_at = Some(Utc::now());
            Ok(plan.clone())
        })
    }

    /// Mark the plan used and hand back its configuration, ready to arm.
    pub fn launch(&self, id: &str) -> CoreResult<CallConfig> {
        Ok(self.mark_used(id)?.config)
    }

    /// Returns false when no plan had that id.
    pub fn delete(&self, id: &str) -> CoreResult<bool> {
        self.modify(|plans| {
            let before = plans.len();
            plans.retain(|p| p.id != id);
            Ok(plans.len() != before)
        })
    }

    pub fn clear_all(&self) -> CoreResult<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.tree.remove(PLANS_KEY)?;
        self.tree.flush()?;
        Ok(())
    }
}
