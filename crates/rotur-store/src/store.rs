//! The process-wide [`Store`]: one [`Collection`] per entity kind plus the
//! OFSF file store.
//!
//! # Lock order
//!
//! Operations that need more than one collection take the locks in this
//! order and release them before scheduling flushes:
//!
//! `keys` → `items` → `groups` → `posts` → `followers` → `users` → `events_history`
//!
//! Taking them in any other order risks deadlock. The OFSF lock is disjoint
//! from all of these.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rotur_shared::constants::{
    DEFAULT_FLUSH_COALESCE_MS, MAX_HISTORY_EVENTS, USERS_WATCH_DEBOUNCE_MS, USERS_WATCH_POLL_MS,
};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::collection::{Collection, SnapshotFormat};
use crate::error::Result;
use crate::models::{
    EventsHistory, Followers, Groups, HistoryEvent, Items, Keys, Posts, Systems, Users,
};
use crate::ofsf::OfsfStore;

/// Locations of every collection file.
#[derive(Debug, Clone)]
pub struct StorePaths {
    pub users: PathBuf,
    pub followers: PathBuf,
    pub posts: PathBuf,
    pub items: PathBuf,
    pub keys: PathBuf,
    pub systems: PathBuf,
    pub events_history: PathBuf,
    pub groups: PathBuf,
    pub ofsf_root: PathBuf,
}

impl StorePaths {
    /// Default file names inside one data directory.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            users: dir.join("users.json"),
            followers: dir.join("followers.json"),
            posts: dir.join("posts.json"),
            items: dir.join("items.json"),
            keys: dir.join("keys.json"),
            systems: dir.join("systems.json"),
            events_history: dir.join("events_history.json"),
            groups: dir.join("groups.json"),
            ofsf_root: dir.join("ofsf"),
        }
    }
}

/// Settings for [`Store::spawn_background`].
#[derive(Debug, Clone)]
pub struct BackgroundOptions {
    /// How long a flusher waits after the first mutation of a burst.
    pub coalesce: Duration,
    /// Reload the users file when it is edited externally.
    pub watch_users: bool,
}

impl Default for BackgroundOptions {
    fn default() -> Self {
        Self {
            coalesce: Duration::from_millis(DEFAULT_FLUSH_COALESCE_MS),
            watch_users: true,
        }
    }
}

/// Handle to all process state. Cheap to clone; clones share the data.
#[derive(Clone)]
pub struct Store {
    pub(crate) users: Collection<Users>,
    pub(crate) followers: Collection<Followers>,
    pub(crate) posts: Collection<Posts>,
    pub(crate) items: Collection<Items>,
    pub(crate) keys: Collection<Keys>,
    pub(crate) systems: Collection<Systems>,
    pub(crate) history: Collection<EventsHistory>,
    pub(crate) groups: Collection<Groups>,
    ofsf: OfsfStore,
}

impl Store {
    /// Empty store; nothing is read from disk.
    pub fn new(paths: &StorePaths) -> Self {
        use SnapshotFormat::{Compact, Pretty};
        Self {
            users: Collection::new("users", &paths.users, Compact),
            followers: Collection::new("followers", &paths.followers, Pretty),
            posts: Collection::new("posts", &paths.posts, Pretty),
            items: Collection::new("items", &paths.items, Pretty),
            keys: Collection::new("keys", &paths.keys, Pretty),
            systems: Collection::new("systems", &paths.systems, Pretty),
            history: Collection::new("events_history", &paths.events_history, Pretty),
            groups: Collection::new("groups", &paths.groups, Pretty),
            ofsf: OfsfStore::new(paths.ofsf_root.clone()),
        }
    }

    /// Build the store and load every collection from disk.
    pub async fn open(paths: &StorePaths) -> Self {
        let store = Self::new(paths);
        store.load_all().await;
        store
    }

    /// Load collections in dependency order. Failures are logged and the
    /// affected collection keeps its current (at startup: empty) contents.
    pub async fn load_all(&self) {
        let results = [
            ("users", self.users.load().await),
            ("followers", self.followers.load().await),
            ("posts", self.posts.load().await),
            ("items", self.items.load().await),
            ("keys", self.keys.load().await),
            ("systems", self.systems.load().await),
            ("events_history", self.history.load().await),
            ("groups", self.groups.load().await),
        ];
        for (name, result) in results {
            if let Err(e) = result {
                error!(collection = name, error = %e, "Collection not loaded, continuing with previous contents");
            }
        }
        info!("Store loaded");
    }

    /// Start one flusher per collection and, if enabled, the users watcher.
    pub fn spawn_background(&self, opts: &BackgroundOptions) -> Vec<JoinHandle<()>> {
        let mut handles = vec![
            self.users.spawn_flusher(opts.coalesce),
            self.followers.spawn_flusher(opts.coalesce),
            self.posts.spawn_flusher(opts.coalesce),
            self.items.spawn_flusher(opts.coalesce),
            self.keys.spawn_flusher(opts.coalesce),
            self.systems.spawn_flusher(opts.coalesce),
            self.history.spawn_flusher(opts.coalesce),
            self.groups.spawn_flusher(opts.coalesce),
        ];
        if opts.watch_users {
            handles.push(self.users.spawn_watcher(
                Duration::from_millis(USERS_WATCH_POLL_MS),
                Duration::from_millis(USERS_WATCH_DEBOUNCE_MS),
            ));
        }
        handles
    }

    /// Write every collection now (used on shutdown). All collections are
    /// attempted; the first error is returned.
    pub async fn flush_all(&self) -> Result<()> {
        let (users, followers, posts, items, keys, systems, history, groups) = futures::join!(
            self.users.flush(),
            self.followers.flush(),
            self.posts.flush(),
            self.items.flush(),
            self.keys.flush(),
            self.systems.flush(),
            self.history.flush(),
            self.groups.flush(),
        );
        users?;
        followers?;
        posts?;
        items?;
        keys?;
        systems?;
        history?;
        groups?;
        Ok(())
    }

    pub fn ofsf(&self) -> &OfsfStore {
        &self.ofsf
    }

    /// Append events to the bounded history. Must be called with no other
    /// collection lock held, or only ones earlier in the lock order.
    pub(crate) async fn record_events(&self, events: Vec<HistoryEvent>) {
        if events.is_empty() {
            return;
        }
        self.history
            .mutate(|history| {
                history.extend(events);
                if history.len() > MAX_HISTORY_EVENTS {
                    let excess = history.len() - MAX_HISTORY_EVENTS;
                    history.drain(..excess);
                }
            })
            .await;
    }

    pub(crate) async fn record_event(&self, event: HistoryEvent) {
        self.record_events(vec![event]).await;
    }

    /// The most recent `limit` history events, newest first.
    pub async fn recent_events(&self, limit: usize) -> Vec<HistoryEvent> {
        self.history
            .read(|h| h.iter().rev().take(limit).cloned().collect())
            .await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use rotur_shared::Credits;
    use tempfile::TempDir;

    pub const PW: &str = "00112233445566778899aabbccddeeff";

    pub async fn store() -> (Store, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&StorePaths::in_dir(dir.path())).await;
        (store, dir)
    }

    /// Register `name` and give them `credits` whole credits.
    pub async fn user_with(store: &Store, name: &str, credits: i64) -> String {
        store
            .register(name, &format!("{name}@example.com"), PW, None)
            .await
            .unwrap();
        if credits > 0 {
            store.mint(name, Credits::whole(credits)).await.unwrap();
        }
        rotur_shared::types::fold_username(name)
    }

    pub async fn credits_of(store: &Store, name: &str) -> Credits {
        store.get_user(name).await.unwrap().credits
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use rotur_shared::Credits;

    #[tokio::test]
    async fn test_flush_all_and_reopen() {
        let (store, dir) = store().await;
        user_with(&store, "alice", 10).await;
        store.flush_all().await.unwrap();

        let reopened = Store::open(&StorePaths::in_dir(dir.path())).await;
        assert_eq!(credits_of(&reopened, "alice").await, Credits::whole(10));
    }

    #[tokio::test]
    async fn test_corrupt_collection_does_not_abort_startup() {
        let (store, dir) = store().await;
        user_with(&store, "alice", 0).await;
        store.flush_all().await.unwrap();
        std::fs::write(dir.path().join("posts.json"), b"[{").unwrap();

        let reopened = Store::open(&StorePaths::in_dir(dir.path())).await;
        assert!(reopened.get_user("alice").await.is_ok());
        assert!(reopened.feed(10, 0).await.is_empty());
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let (store, _dir) = store().await;
        let events = (0..(MAX_HISTORY_EVENTS + 3))
            .map(|i| HistoryEvent::new(crate::models::EventKind::Mint, "a", i as i64))
            .collect();
        store.record_events(events).await;

        let recent = store.recent_events(1).await;
        assert_eq!(recent[0].timestamp, (MAX_HISTORY_EVENTS + 2) as i64);
        assert_eq!(store.history.read(|h| h.len()).await, MAX_HISTORY_EVENTS);
    }
}
