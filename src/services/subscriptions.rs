//! Watcher subscription registry.
//!
//! Maps each watcher to the set of members they want to hear about. The JSON
//! file on disk is the authoritative copy: every mutation reads the file,
//! applies the change, writes it back atomically and reloads the in-memory
//! view from what was written.

use crate::error::StorageError;
use serde::{Deserialize, Serialize};
use serenity::all::UserId;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    users: BTreeMap<String, WatcherRecord>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WatcherRecord {
    #[serde(default)]
    selected_members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherEntry {
    pub watcher_id: UserId,
    pub targets: HashSet<UserId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionCommandKind {
    Register,
    Add,
    Remove,
    Replace,
    Clear,
}

/// A registry mutation requested by the interactive layer.
#[derive(Debug, Clone)]
pub struct SubscriptionCommand {
    pub kind: SubscriptionCommandKind,
    pub watcher_id: UserId,
    pub payload: HashSet<UserId>,
}

impl SubscriptionCommand {
    pub fn new(
        kind: SubscriptionCommandKind,
        watcher_id: UserId,
        payload: impl IntoIterator<Item = UserId>,
    ) -> Self {
        Self {
            kind,
            watcher_id,
            payload: payload.into_iter().collect(),
        }
    }
}

/// Result of an applied command. Counts are identities actually changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Registered { targets: usize },
    Added(usize),
    Removed(usize),
    Replaced { added: usize, removed: usize },
    Cleared(usize),
}

#[derive(Clone)]
pub struct SubscriptionRegistry {
    path: Arc<PathBuf>,
    state: Arc<Mutex<HashMap<UserId, HashSet<UserId>>>>,
    /// Serializes writers across the whole read-modify-write cycle.
    writer: Arc<Mutex<()>>,
}

impl SubscriptionRegistry {
    /// Opens the store at `path`, creating `{"users": {}}` if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        if !path.exists() {
            info!("Subscriptions: creating empty store at {:?}", path);
            write_store(&path, &StoreFile::default())?;
        }

        let state = into_memory(read_store(&path)?);
        info!(
            "Subscriptions: loaded {} watcher(s) from {:?}",
            state.len(),
            path
        );

        Ok(Self {
            path: Arc::new(path),
            state: Arc::new(Mutex::new(state)),
            writer: Arc::new(Mutex::new(())),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs a registry call on the blocking pool; file I/O must not stall the gateway.
    pub async fn run_blocking<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&SubscriptionRegistry) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let registry = self.clone();
        tokio::task::spawn_blocking(move || f(&registry))
            .await
            .map_err(|e| StorageError::Task(e.to_string()))?
    }

    pub fn get_or_create(&self, watcher_id: UserId) -> Result<WatcherEntry, StorageError> {
        let existing = self.lock()?.get(&watcher_id).cloned();
        if let Some(targets) = existing {
            return Ok(WatcherEntry { watcher_id, targets });
        }

        self.mutate(watcher_id, |_| ())?;
        info!("Subscriptions: registered watcher {}", watcher_id);
        Ok(WatcherEntry {
            watcher_id,
            targets: self.list_targets(watcher_id)?,
        })
    }

    /// Returns how many candidates were not already targeted.
    pub fn add_targets(
        &self,
        watcher_id: UserId,
        candidates: &HashSet<UserId>,
    ) -> Result<usize, StorageError> {
        let added = self.mutate(watcher_id, |targets| {
            let before = targets.len();
            targets.extend(candidates.iter().copied());
            targets.len() - before
        })?;
        info!(
            "Subscriptions: watcher {} added {} of {} requested target(s)",
            watcher_id,
            added,
            candidates.len()
        );
        Ok(added)
    }

    pub fn remove_targets(
        &self,
        watcher_id: UserId,
        candidates: &HashSet<UserId>,
    ) -> Result<usize, StorageError> {
        let removed = self.mutate(watcher_id, |targets| {
            let before = targets.len();
            targets.retain(|id| !candidates.contains(id));
            before - targets.len()
        })?;
        info!(
            "Subscriptions: watcher {} removed {} of {} requested target(s)",
            watcher_id,
            removed,
            candidates.len()
        );
        Ok(removed)
    }

    /// Overwrites the target set. Returns `(added, removed)`.
    pub fn replace_targets(
        &self,
        watcher_id: UserId,
        selection: &HashSet<UserId>,
    ) -> Result<(usize, usize), StorageError> {
        let (added, removed) = self.mutate(watcher_id, |targets| {
            let added = selection.difference(targets).count();
            let removed = targets.difference(selection).count();
            *targets = selection.clone();
            (added, removed)
        })?;
        info!(
            "Subscriptions: watcher {} replaced targets (+{} -{})",
            watcher_id, added, removed
        );
        Ok((added, removed))
    }

    /// Empties the target set; the watcher entry itself is kept.
    pub fn clear_targets(&self, watcher_id: UserId) -> Result<usize, StorageError> {
        let removed = self.mutate(watcher_id, |targets| {
            let n = targets.len();
            targets.clear();
            n
        })?;
        info!(
            "Subscriptions: watcher {} cleared {} target(s)",
            watcher_id, removed
        );
        Ok(removed)
    }

    pub fn list_targets(&self, watcher_id: UserId) -> Result<HashSet<UserId>, StorageError> {
        Ok(self.lock()?.get(&watcher_id).cloned().unwrap_or_default())
    }

    pub fn snapshot(&self) -> Result<Vec<WatcherEntry>, StorageError> {
        let state = self.lock()?;
        Ok(state
            .iter()
            .map(|(watcher_id, targets)| WatcherEntry {
                watcher_id: *watcher_id,
                targets: targets.clone(),
            })
            .collect())
    }

    pub fn apply(&self, command: SubscriptionCommand) -> Result<CommandOutcome, StorageError> {
        let SubscriptionCommand {
            kind,
            watcher_id,
            payload,
        } = command;
        debug!(
            "Subscriptions: applying {:?} for watcher {} ({} id(s))",
            kind,
            watcher_id,
            payload.len()
        );

        match kind {
            SubscriptionCommandKind::Register => {
                let entry = self.get_or_create(watcher_id)?;
                Ok(CommandOutcome::Registered {
                    targets: entry.targets.len(),
                })
            }
            SubscriptionCommandKind::Add => {
                self.add_targets(watcher_id, &payload).map(CommandOutcome::Added)
            }
            SubscriptionCommandKind::Remove => self
                .remove_targets(watcher_id, &payload)
                .map(CommandOutcome::Removed),
            SubscriptionCommandKind::Replace => self
                .replace_targets(watcher_id, &payload)
                .map(|(added, removed)| CommandOutcome::Replaced { added, removed }),
            SubscriptionCommandKind::Clear => {
                self.clear_targets(watcher_id).map(CommandOutcome::Cleared)
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn poison_for_test(&self) {
        let _guard = self.state.lock();
        panic!("poisoning subscription state");
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<UserId, HashSet<UserId>>>, StorageError> {
        self.state.lock().map_err(|_| StorageError::Poisoned)
    }

    /// Read-modify-write against the file, then resync memory from it.
    /// Memory is left untouched if any step fails. Readers only wait for the
    /// final swap, never for file I/O.
    fn mutate<T>(
        &self,
        watcher_id: UserId,
        f: impl FnOnce(&mut HashSet<UserId>) -> T,
    ) -> Result<T, StorageError> {
        let _writer = self.writer.lock().map_err(|_| StorageError::Poisoned)?;

        let mut durable = match read_store(&self.path) {
            Err(StorageError::Io { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                warn!(
                    "Subscriptions: store {:?} disappeared, starting from an empty one",
                    self.path
                );
                StoreFile::default()
            }
            other => other?,
        };
        let record = durable.users.entry(watcher_id.to_string()).or_default();
        let mut targets = parse_ids(&record.selected_members);
        let result = f(&mut targets);
        record.selected_members = targets
            .iter()
            .map(|id| id.get())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|id| id.to_string())
            .collect();

        write_store(&self.path, &durable)?;
        let reloaded = into_memory(read_store(&self.path)?);
        *self.lock()? = reloaded;
        Ok(result)
    }
}

fn read_store(path: &Path) -> Result<StoreFile, StorageError> {
    let raw = fs::read_to_string(path).map_err(|source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| StorageError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn write_store(path: &Path, store: &StoreFile) -> Result<(), StorageError> {
    let io_err = |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let content = serde_json::to_string_pretty(store)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, content).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}

fn parse_id(raw: &str) -> Option<UserId> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .map(UserId::new)
}

fn parse_ids(raw: &[String]) -> HashSet<UserId> {
    raw.iter()
        .filter_map(|s| {
            let id = parse_id(s);
            if id.is_none() {
                warn!("Subscriptions: ignoring malformed member id {:?}", s);
            }
            id
        })
        .collect()
}

fn into_memory(store: StoreFile) -> HashMap<UserId, HashSet<UserId>> {
    store
        .users
        .into_iter()
        .filter_map(|(watcher, record)| match parse_id(&watcher) {
            Some(id) => Some((id, parse_ids(&record.selected_members))),
            None => {
                warn!("Subscriptions: ignoring malformed watcher id {:?}", watcher);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ids(raw: &[u64]) -> HashSet<UserId> {
        raw.iter().copied().map(UserId::new).collect()
    }

    fn open_temp() -> (SubscriptionRegistry, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let registry = SubscriptionRegistry::open(dir.path().join("users.json")).unwrap();
        (registry, dir)
    }

    #[test]
    fn open_initializes_missing_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("users.json");
        let registry = SubscriptionRegistry::open(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw, serde_json::json!({ "users": {} }));
        assert!(registry.snapshot().unwrap().is_empty());
    }

    #[test]
    fn get_or_create_persists_empty_entry() {
        let (registry, _dir) = open_temp();
        let watcher = UserId::new(10);

        let entry = registry.get_or_create(watcher).unwrap();
        assert!(entry.targets.is_empty());

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(registry.path()).unwrap()).unwrap();
        assert_eq!(raw["users"]["10"]["selected_members"], serde_json::json!([]));
    }

    #[test]
    fn add_then_remove() {
        let (registry, _dir) = open_temp();
        let watcher = UserId::new(1);
        registry.get_or_create(watcher).unwrap();

        assert_eq!(registry.add_targets(watcher, &ids(&[100, 200])).unwrap(), 2);
        assert_eq!(registry.list_targets(watcher).unwrap(), ids(&[100, 200]));

        assert_eq!(registry.remove_targets(watcher, &ids(&[100])).unwrap(), 1);
        assert_eq!(registry.list_targets(watcher).unwrap(), ids(&[200]));
    }

    #[test]
    fn repeated_add_reports_zero_new() {
        let (registry, _dir) = open_temp();
        let watcher = UserId::new(1);

        assert_eq!(registry.add_targets(watcher, &ids(&[5, 6])).unwrap(), 2);
        let after_first = registry.list_targets(watcher).unwrap();
        assert_eq!(registry.add_targets(watcher, &ids(&[5, 6])).unwrap(), 0);
        assert_eq!(registry.list_targets(watcher).unwrap(), after_first);

        // Partial overlap counts only the genuinely new member.
        assert_eq!(registry.add_targets(watcher, &ids(&[6, 7])).unwrap(), 1);
    }

    #[test]
    fn remove_counts_only_present_members() {
        let (registry, _dir) = open_temp();
        let watcher = UserId::new(1);
        registry.add_targets(watcher, &ids(&[5])).unwrap();

        assert_eq!(registry.remove_targets(watcher, &ids(&[5, 9])).unwrap(), 1);
        assert_eq!(registry.remove_targets(watcher, &ids(&[5])).unwrap(), 0);
    }

    #[test]
    fn replace_and_clear_keep_entry() {
        let (registry, _dir) = open_temp();
        let watcher = UserId::new(1);
        registry.add_targets(watcher, &ids(&[1, 2, 3])).unwrap();

        assert_eq!(
            registry.replace_targets(watcher, &ids(&[3, 4])).unwrap(),
            (1, 2)
        );
        assert_eq!(registry.list_targets(watcher).unwrap(), ids(&[3, 4]));

        assert_eq!(registry.clear_targets(watcher).unwrap(), 2);
        let snapshot = registry.snapshot().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].targets.is_empty());
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.json");
        {
            let registry = SubscriptionRegistry::open(&path).unwrap();
            registry.add_targets(UserId::new(1), &ids(&[42])).unwrap();
        }
        let reopened = SubscriptionRegistry::open(&path).unwrap();
        assert_eq!(reopened.list_targets(UserId::new(1)).unwrap(), ids(&[42]));
    }

    #[test]
    fn mutation_picks_up_external_edits() {
        let (registry, _dir) = open_temp();
        fs::write(
            registry.path(),
            r#"{"users": {"7": {"selected_members": ["70"]}}}"#,
        )
        .unwrap();

        registry.add_targets(UserId::new(1), &ids(&[10])).unwrap();
        assert_eq!(registry.list_targets(UserId::new(7)).unwrap(), ids(&[70]));
        assert_eq!(registry.list_targets(UserId::new(1)).unwrap(), ids(&[10]));
    }

    #[test]
    fn corrupt_store_fails_mutation_and_keeps_memory() {
        let (registry, _dir) = open_temp();
        registry.add_targets(UserId::new(1), &ids(&[10])).unwrap();
        fs::write(registry.path(), "{ not json").unwrap();

        let err = registry.add_targets(UserId::new(1), &ids(&[11])).unwrap_err();
        assert!(matches!(err, StorageError::Parse { .. }));
        assert_eq!(registry.list_targets(UserId::new(1)).unwrap(), ids(&[10]));
    }

    #[test]
    fn store_deleted_after_open_is_recreated() {
        let (registry, _dir) = open_temp();
        let watcher = UserId::new(1);
        registry.add_targets(watcher, &ids(&[10])).unwrap();
        fs::remove_file(registry.path()).unwrap();

        assert_eq!(registry.add_targets(watcher, &ids(&[11])).unwrap(), 1);
        assert_eq!(registry.list_targets(watcher).unwrap(), ids(&[11]));

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(registry.path()).unwrap()).unwrap();
        assert_eq!(raw["users"]["1"]["selected_members"], serde_json::json!(["11"]));
    }

    #[test]
    fn malformed_ids_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.json");
        fs::write(
            &path,
            r#"{"users": {"abc": {"selected_members": ["1"]}, "2": {"selected_members": ["x", "0", "3"]}}}"#,
        )
        .unwrap();

        let registry = SubscriptionRegistry::open(&path).unwrap();
        let snapshot = registry.snapshot().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].targets, ids(&[3]));
    }

    #[test]
    fn apply_routes_commands() {
        let (registry, _dir) = open_temp();
        let watcher = UserId::new(1);

        let outcome = registry
            .apply(SubscriptionCommand::new(
                SubscriptionCommandKind::Register,
                watcher,
                ids(&[]),
            ))
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Registered { targets: 0 });

        let outcome = registry
            .apply(SubscriptionCommand::new(
                SubscriptionCommandKind::Add,
                watcher,
                ids(&[2, 3]),
            ))
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Added(2));

        let outcome = registry
            .apply(SubscriptionCommand::new(
                SubscriptionCommandKind::Replace,
                watcher,
                ids(&[3]),
            ))
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Replaced { added: 0, removed: 1 });

        let outcome = registry
            .apply(SubscriptionCommand::new(
                SubscriptionCommandKind::Clear,
                watcher,
                ids(&[]),
            ))
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Cleared(1));
    }

    #[tokio::test]
    async fn run_blocking_executes_off_runtime() {
        let (registry, _dir) = open_temp();
        let added = registry
            .run_blocking(|r| r.add_targets(UserId::new(1), &ids(&[4, 5])))
            .await
            .unwrap();
        assert_eq!(added, 2);
    }
}
