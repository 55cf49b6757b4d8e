//! Account lifecycle: registration, authentication, user-defined keys,
//! friends, standing, bans and deletion.

use rotur_shared::constants::{MAX_USER_KEY_LEN, RESERVED_FIELDS, RESERVED_PREFIX, USER_DATA_BUDGET};
use rotur_shared::types::{
    fold_username, generate_token, now_millis, validate_email, validate_password_hash,
    validate_username,
};
use rotur_shared::{Standing, StandingLevel};
use serde_json::Value;
use tracing::info;

use crate::error::{Result, StoreError};
use crate::models::{EventKind, HistoryEvent, LoginRecord, User, Users};
use crate::store::Store;

/// Fields nobody may rewrite through the generic key API, admins included.
const IMMUTABLE_FIELDS: &[&str] = &["username", "key", "sys.id"];

fn is_reserved(key: &str) -> bool {
    key.starts_with(RESERVED_PREFIX) || RESERVED_FIELDS.contains(&key)
}

/// Invariants an admin write to a reserved field must keep: a balance is
/// never negative and emails stay unique ignoring case.
fn check_reserved_write(users: &Users, name: &str, updated: &User) -> Result<()> {
    if updated.credits.is_negative() {
        return Err(StoreError::BadInput("Credits must not be negative".to_string()));
    }
    let unchanged = users.get(name).is_some_and(|u| u.email == updated.email);
    if !unchanged {
        validate_email(&updated.email)?;
        let email = updated.email.trim().to_lowercase();
        if users
            .iter()
            .any(|(other, u)| other != name && u.email.to_lowercase() == email)
        {
            return Err(StoreError::Conflict("Email".to_string()));
        }
    }
    Ok(())
}

impl Store {
    // ------------------------------------------------------------------
    // Registration & authentication
    // ------------------------------------------------------------------

    /// Create an account. Username and email are unique ignoring case.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
        system: Option<&str>,
    ) -> Result<User> {
        let username = username.trim();
        validate_username(username)?;
        validate_email(email)?;
        validate_password_hash(password_hash)?;

        let system = match system {
            Some(name) => {
                let folded = name.trim().to_lowercase();
                let known = self.systems.read(|s| s.contains_key(&folded)).await;
                if !known {
                    return Err(StoreError::not_found(format!("System '{name}'")));
                }
                Some(folded)
            }
            None => None,
        };

        let folded = fold_username(username);
        let email_folded = email.trim().to_lowercase();

        let user = self
            .users
            .try_mutate(|users| {
                if users.contains_key(&folded) {
                    return Err(StoreError::Conflict(format!("Username '{username}'")));
                }
                if users.values().any(|u| u.email.to_lowercase() == email_folded) {
                    return Err(StoreError::Conflict("Email".to_string()));
                }

                let mut user = User::new(username, email, password_hash, generate_token(), now_millis());
                user.system = system;
                users.insert(folded.clone(), user.clone());
                Ok(user)
            })
            .await?;

        info!(user = %folded, "Registered user");
        Ok(user)
    }

    /// Resolve a bearer token to its user.
    pub async fn authenticate(&self, token: &str) -> Result<User> {
        if token.is_empty() {
            return Err(StoreError::not_found("User"));
        }
        let user = self
            .users
            .read(|users| users.values().find(|u| u.key == token).cloned())
            .await
            .ok_or_else(|| StoreError::not_found("User"))?;
        if user.banned {
            return Err(StoreError::forbidden("Account is banned"));
        }
        Ok(user)
    }

    /// Check a username/password pair and record the login.
    pub async fn login(
        &self,
        username: &str,
        password_hash: &str,
        origin: Option<String>,
    ) -> Result<User> {
        let folded = fold_username(username);
        self.users
            .try_mutate(|users| {
                let user = users
                    .get_mut(&folded)
                    .ok_or_else(|| StoreError::not_found("User"))?;
                if user.banned {
                    return Err(StoreError::forbidden("Account is banned"));
                }
                if !user.password.eq_ignore_ascii_case(password_hash) {
                    return Err(StoreError::forbidden("Invalid credentials"));
                }
                user.push_login(LoginRecord {
                    timestamp: now_millis(),
                    origin,
                });
                Ok(user.clone())
            })
            .await
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    pub async fn get_user(&self, username: &str) -> Result<User> {
        let folded = fold_username(username);
        self.users
            .read(|users| users.get(&folded).cloned())
            .await
            .ok_or_else(|| StoreError::not_found(format!("User '{username}'")))
    }

    /// Folded username of an existing account whose standing allows writes.
    pub(crate) async fn require_active(&self, username: &str) -> Result<String> {
        let folded = fold_username(username);
        let now = now_millis();
        self.users
            .read(|users| match users.get(&folded) {
                None => Err(StoreError::not_found("User")),
                Some(u) if u.banned || !u.standing.can_act(now) => {
                    Err(StoreError::forbidden("Account is restricted"))
                }
                Some(_) => Ok(folded.clone()),
            })
            .await
    }

    pub async fn user_exists(&self, username: &str) -> bool {
        let folded = fold_username(username);
        self.users.read(|users| users.contains_key(&folded)).await
    }

    /// Usernames starting with `prefix` (case-insensitive), banned excluded.
    pub async fn search_users(&self, prefix: &str, limit: usize) -> Vec<String> {
        let prefix = fold_username(prefix);
        self.users
            .read(|users| {
                users
                    .range(prefix.clone()..)
                    .take_while(|(name, _)| name.starts_with(&prefix))
                    .filter(|(_, u)| !u.banned)
                    .map(|(_, u)| u.username.clone())
                    .take(limit)
                    .collect()
            })
            .await
    }

    // ------------------------------------------------------------------
    // User-defined keys
    // ------------------------------------------------------------------

    /// Set a key on the user document.
    ///
    /// Reserved names (`username`, `email`, `password`, `key`, `sys.*`) are
    /// refused unless `admin` is set; admins write them through the typed
    /// record so the value must decode. User-defined keys are limited in
    /// length and in total serialized size.
    pub async fn set_user_key(
        &self,
        username: &str,
        key: &str,
        value: Value,
        admin: bool,
    ) -> Result<()> {
        if key.is_empty() {
            return Err(StoreError::BadInput("Key must not be empty".to_string()));
        }
        if key.chars().count() > MAX_USER_KEY_LEN {
            return Err(StoreError::BadInput(format!(
                "Key exceeds {MAX_USER_KEY_LEN} characters"
            )));
        }
        let reserved = is_reserved(key);
        if reserved && (!admin || IMMUTABLE_FIELDS.contains(&key)) {
            return Err(StoreError::forbidden(format!("'{key}' is a reserved key")));
        }

        let folded = fold_username(username);
        self.users
            .try_mutate(|users| {
                if reserved {
                    let current = users
                        .get(&folded)
                        .ok_or_else(|| StoreError::not_found("User"))?;
                    let mut doc = serde_json::to_value(current)?;
                    doc[key] = value;
                    let updated: User = serde_json::from_value(doc)
                        .map_err(|e| StoreError::BadInput(format!("Invalid value for '{key}': {e}")))?;
                    check_reserved_write(users, &folded, &updated)?;
                    users.insert(folded.clone(), updated);
                    return Ok(());
                }

                let user = users
                    .get_mut(&folded)
                    .ok_or_else(|| StoreError::not_found("User"))?;
                let previous = user.data.insert(key.to_string(), value);
                if user.data_size() > USER_DATA_BUDGET {
                    match previous {
                        Some(prev) => user.data.insert(key.to_string(), prev),
                        None => user.data.remove(key),
                    };
                    return Err(StoreError::BadInput(format!(
                        "User data would exceed {USER_DATA_BUDGET} bytes"
                    )));
                }
                Ok(())
            })
            .await
    }

    pub async fn delete_user_key(&self, username: &str, key: &str) -> Result<()> {
        if is_reserved(key) {
            return Err(StoreError::forbidden(format!("'{key}' is a reserved key")));
        }
        let folded = fold_username(username);
        self.users
            .try_mutate(|users| {
                let user = users
                    .get_mut(&folded)
                    .ok_or_else(|| StoreError::not_found("User"))?;
                user.data
                    .remove(key)
                    .map(|_| ())
                    .ok_or_else(|| StoreError::not_found(format!("Key '{key}'")))
            })
            .await
    }

    // ------------------------------------------------------------------
    // Friends
    // ------------------------------------------------------------------

    /// Send a friend request. If `to` already asked `from`, the two become
    /// friends immediately.
    pub async fn send_friend_request(&self, from: &str, to: &str) -> Result<()> {
        let from = fold_username(from);
        let to = fold_username(to);
        if from == to {
            return Err(StoreError::precondition("You cannot befriend yourself"));
        }
        self.users
            .try_mutate(|users| {
                let target = users.get(&to).ok_or_else(|| StoreError::not_found("User"))?;
                let sender = users.get(&from).ok_or_else(|| StoreError::not_found("User"))?;
                if sender.friends.contains(&to) {
                    return Err(StoreError::precondition("Already friends"));
                }
                if target.blocked.contains(&from) || sender.blocked.contains(&to) {
                    return Err(StoreError::precondition("User is blocked"));
                }
                if target.requests.contains(&from) {
                    return Err(StoreError::precondition("Request already sent"));
                }

                if sender.requests.contains(&to) {
                    make_friends(users, &from, &to);
                } else if let Some(target) = users.get_mut(&to) {
                    target.requests.insert(from.clone());
                }
                Ok(())
            })
            .await
    }

    pub async fn accept_friend_request(&self, user: &str, from: &str) -> Result<()> {
        let user = fold_username(user);
        let from = fold_username(from);
        self.users
            .try_mutate(|users| {
                let me = users.get(&user).ok_or_else(|| StoreError::not_found("User"))?;
                if !me.requests.contains(&from) {
                    return Err(StoreError::precondition("No pending request"));
                }
                if !users.contains_key(&from) {
                    return Err(StoreError::not_found("User"));
                }
                make_friends(users, &user, &from);
                Ok(())
            })
            .await
    }

    pub async fn reject_friend_request(&self, user: &str, from: &str) -> Result<()> {
        let user = fold_username(user);
        let from = fold_username(from);
        self.users
            .try_mutate(|users| {
                let me = users.get_mut(&user).ok_or_else(|| StoreError::not_found("User"))?;
                if !me.requests.remove(&from) {
                    return Err(StoreError::precondition("No pending request"));
                }
                Ok(())
            })
            .await
    }

    pub async fn remove_friend(&self, user: &str, other: &str) -> Result<()> {
        let user = fold_username(user);
        let other = fold_username(other);
        self.users
            .try_mutate(|users| {
                let me = users.get(&user).ok_or_else(|| StoreError::not_found("User"))?;
                if !me.friends.contains(&other) {
                    return Err(StoreError::precondition("Not friends"));
                }
                if let Some(me) = users.get_mut(&user) {
                    me.friends.remove(&other);
                }
                if let Some(them) = users.get_mut(&other) {
                    them.friends.remove(&user);
                }
                Ok(())
            })
            .await
    }

    /// Block `other`, dropping any friendship or pending request between
    /// the two.
    pub async fn block_user(&self, user: &str, other: &str) -> Result<()> {
        let user = fold_username(user);
        let other = fold_username(other);
        if user == other {
            return Err(StoreError::precondition("You cannot block yourself"));
        }
        self.users
            .try_mutate(|users| {
                if !users.contains_key(&other) {
                    return Err(StoreError::not_found("User"));
                }
                let me = users.get_mut(&user).ok_or_else(|| StoreError::not_found("User"))?;
                if !me.blocked.insert(other.clone()) {
                    return Err(StoreError::precondition("Already blocked"));
                }
                me.friends.remove(&other);
                me.requests.remove(&other);
                if let Some(them) = users.get_mut(&other) {
                    them.friends.remove(&user);
                    them.requests.remove(&user);
                }
                Ok(())
            })
            .await
    }

    pub async fn unblock_user(&self, user: &str, other: &str) -> Result<()> {
        let user = fold_username(user);
        let other = fold_username(other);
        self.users
            .try_mutate(|users| {
                let me = users.get_mut(&user).ok_or_else(|| StoreError::not_found("User"))?;
                if !me.blocked.remove(&other) {
                    return Err(StoreError::precondition("Not blocked"));
                }
                Ok(())
            })
            .await
    }

    // ------------------------------------------------------------------
    // Standing, bans, deletion
    // ------------------------------------------------------------------

    pub async fn set_standing(
        &self,
        username: &str,
        level: StandingLevel,
        reason: Option<String>,
    ) -> Result<Standing> {
        let folded = fold_username(username);
        let standing = Standing::new(level, now_millis(), reason);
        self.users
            .try_mutate(|users| {
                let user = users
                    .get_mut(&folded)
                    .ok_or_else(|| StoreError::not_found("User"))?;
                user.standing = standing.clone();
                Ok(standing)
            })
            .await
    }

    /// Soft-ban: the record keeps only username, email and the banned flag.
    pub async fn ban_user(&self, username: &str) -> Result<()> {
        let folded = fold_username(username);
        self.users
            .try_mutate(|users| {
                let user = users
                    .get_mut(&folded)
                    .ok_or_else(|| StoreError::not_found("User"))?;
                user.soft_ban();
                Ok(())
            })
            .await?;
        info!(user = %folded, "User soft-banned");
        self.record_event(HistoryEvent::new(EventKind::UserBanned, &folded, now_millis()))
            .await;
        Ok(())
    }

    /// Remove an account and every reference to it in keys, groups, the
    /// follower graph and other users' friend lists. Posts and items stay.
    pub async fn delete_user(&self, username: &str) -> Result<()> {
        let folded = fold_username(username);
        if !self.user_exists(&folded).await {
            return Err(StoreError::not_found("User"));
        }

        self.keys
            .mutate(|keys| {
                for key in keys.values_mut() {
                    key.users.remove(&folded);
                    key.refresh_next_billing();
                }
            })
            .await;

        self.groups
            .mutate(|groups| {
                for group in groups.values_mut() {
                    if group.owner != folded {
                        group.members.remove(&folded);
                    }
                }
            })
            .await;

        self.followers
            .mutate(|followers| {
                followers.remove(&folded);
                for set in followers.values_mut() {
                    set.remove(&folded);
                }
            })
            .await;

        self.users
            .mutate(|users| {
                users.remove(&folded);
                for other in users.values_mut() {
                    other.friends.remove(&folded);
                    other.requests.remove(&folded);
                    other.blocked.remove(&folded);
                }
            })
            .await;

        info!(user = %folded, "User deleted");
        self.record_event(HistoryEvent::new(EventKind::UserDeleted, &folded, now_millis()))
            .await;
        Ok(())
    }
}

fn make_friends(users: &mut crate::models::Users, a: &str, b: &str) {
    if let Some(ua) = users.get_mut(a) {
        ua.requests.remove(b);
        ua.friends.insert(b.to_string());
    }
    if let Some(ub) = users.get_mut(b) {
        ub.requests.remove(a);
        ub.friends.insert(a.to_string());
    }
}

#[cfg(test)]
mod tests {
    use crate::store::test_support::*;
    use crate::StoreError;
    use rotur_shared::{Credits, StandingLevel, Tier};
    use serde_json::json;

    #[tokio::test]
    async fn test_username_and_email_unique_ignoring_case() {
        let (store, _dir) = store().await;
        store.register("Alice", "alice@x.io", PW, None).await.unwrap();

        let dup_name = store.register("ALICE", "other@x.io", PW, None).await;
        assert!(matches!(dup_name, Err(StoreError::Conflict(_))));

        let dup_mail = store.register("alice2", "ALICE@X.IO", PW, None).await;
        assert!(matches!(dup_mail, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_register_validates_input() {
        let (store, _dir) = store().await;
        assert!(matches!(
            store.register("a b", "a@x.io", PW, None).await,
            Err(StoreError::BadInput(_))
        ));
        assert!(matches!(
            store.register("alice", "a@x.io", "short", None).await,
            Err(StoreError::BadInput(_))
        ));
        assert!(matches!(
            store.register("alice", "a@x.io", PW, Some("nosuchos")).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_authenticate_and_login() {
        let (store, _dir) = store().await;
        let user = store.register("alice", "a@x.io", PW, None).await.unwrap();

        assert_eq!(store.authenticate(&user.key).await.unwrap().username, "alice");
        assert!(store.authenticate("bogus").await.is_err());

        let logged = store.login("ALICE", PW, Some("web".into())).await.unwrap();
        assert_eq!(logged.logins.len(), 1);
        assert!(matches!(
            store.login("alice", &"ff".repeat(16), None).await,
            Err(StoreError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_reserved_keys_need_admin() {
        let (store, _dir) = store().await;
        user_with(&store, "alice", 0).await;

        let denied = store
            .set_user_key("alice", "sys.currency", json!(1000), false)
            .await;
        assert!(matches!(denied, Err(StoreError::Forbidden(_))));

        store
            .set_user_key("alice", "sys.subscription", json!("Pro"), true)
            .await
            .unwrap();
        assert_eq!(store.get_user("alice").await.unwrap().tier, Tier::Pro);

        assert!(store
            .set_user_key("alice", "username", json!("mallory"), true)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_admin_writes_keep_balance_and_email_rules() {
        let (store, _dir) = store().await;
        user_with(&store, "alice", 5).await;
        user_with(&store, "bob", 0).await;

        assert!(matches!(
            store.set_user_key("alice", "sys.currency", json!(-50), true).await,
            Err(StoreError::BadInput(_))
        ));
        assert_eq!(credits_of(&store, "alice").await, Credits::whole(5));

        assert!(matches!(
            store.set_user_key("bob", "email", json!("ALICE@example.com"), true).await,
            Err(StoreError::Conflict(_))
        ));
        assert!(matches!(
            store.set_user_key("bob", "email", json!("not-an-email"), true).await,
            Err(StoreError::BadInput(_))
        ));
        assert_eq!(store.get_user("bob").await.unwrap().email, "bob@example.com");

        store
            .set_user_key("bob", "email", json!("robert@example.com"), true)
            .await
            .unwrap();
        store
            .set_user_key("alice", "sys.currency", json!(12.5), true)
            .await
            .unwrap();
        assert_eq!(credits_of(&store, "alice").await, Credits::from_cents(1250));
    }

    #[tokio::test]
    async fn test_user_data_budget() {
        let (store, _dir) = store().await;
        user_with(&store, "alice", 0).await;

        store
            .set_user_key("alice", "bio", json!("hello"), false)
            .await
            .unwrap();
        let huge = "x".repeat(30_000);
        assert!(matches!(
            store.set_user_key("alice", "bio", json!(huge), false).await,
            Err(StoreError::BadInput(_))
        ));
        // The previous value survives the refused write.
        let user = store.get_user("alice").await.unwrap();
        assert_eq!(user.data.get("bio"), Some(&json!("hello")));

        store.delete_user_key("alice", "bio").await.unwrap();
        assert!(store.delete_user_key("alice", "bio").await.is_err());
    }

    #[tokio::test]
    async fn test_friend_flow() {
        let (store, _dir) = store().await;
        user_with(&store, "alice", 0).await;
        user_with(&store, "bob", 0).await;

        store.send_friend_request("alice", "bob").await.unwrap();
        assert!(matches!(
            store.send_friend_request("alice", "bob").await,
            Err(StoreError::PreconditionFailed(_))
        ));
        store.accept_friend_request("bob", "alice").await.unwrap();

        let alice = store.get_user("alice").await.unwrap();
        assert!(alice.friends.contains("bob"));
        assert!(matches!(
            store.send_friend_request("bob", "alice").await,
            Err(StoreError::PreconditionFailed(m)) if m == "Already friends"
        ));

        store.block_user("bob", "alice").await.unwrap();
        assert!(!store.get_user("alice").await.unwrap().friends.contains("bob"));
        assert!(store.send_friend_request("alice", "bob").await.is_err());
    }

    #[tokio::test]
    async fn test_standing_and_ban() {
        let (store, _dir) = store().await;
        let alice = store.register("alice", "a@x.io", PW, None).await.unwrap();

        store
            .set_standing("alice", StandingLevel::Warning, Some("spam".into()))
            .await
            .unwrap();
        assert_eq!(
            store.get_user("alice").await.unwrap().standing.level,
            StandingLevel::Warning
        );

        store.ban_user("alice").await.unwrap();
        let banned = store.get_user("alice").await.unwrap();
        assert!(banned.banned);
        assert_eq!(banned.email, "a@x.io");
        assert!(store.authenticate(&alice.key).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_user_removes_references() {
        let (store, _dir) = store().await;
        user_with(&store, "alice", 0).await;
        user_with(&store, "bob", 0).await;
        store.send_friend_request("alice", "bob").await.unwrap();
        store.accept_friend_request("bob", "alice").await.unwrap();
        store.follow("bob", "alice").await.unwrap();

        store.delete_user("alice").await.unwrap();

        assert!(!store.user_exists("alice").await);
        assert!(store.get_user("bob").await.unwrap().friends.is_empty());
        assert!(store.following("bob").await.is_empty());
    }

    #[tokio::test]
    async fn test_search_users_by_prefix() {
        let (store, _dir) = store().await;
        user_with(&store, "alice", 0).await;
        user_with(&store, "alfred", 0).await;
        user_with(&store, "bob", 0).await;

        let found = store.search_users("AL", 10).await;
        assert_eq!(found, vec!["alfred".to_string(), "alice".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_registrations_admit_one() {
        let (store, _dir) = store().await;

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            // Even tasks fight over the name, odd ones over the email.
            let (name, email) = if i % 2 == 0 {
                let name = if i == 0 { "Alice" } else { "ALICE" };
                (name.to_string(), format!("a{i}@x.io"))
            } else {
                (format!("user{i}"), "shared@x.io".to_string())
            };
            handles.push(tokio::spawn(async move {
                store.register(&name, &email, PW, None).await.map(|u| u.username)
            }));
        }

        let mut created = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                Ok(name) => created.push(name),
                Err(StoreError::Conflict(_)) => {}
                Err(e) => panic!("unexpected register error: {e}"),
            }
        }

        assert_eq!(created.len(), 2);
        assert_eq!(created.iter().filter(|n| n.eq_ignore_ascii_case("alice")).count(), 1);
        let with_shared = store
            .users
            .read(|users| users.values().filter(|u| u.email == "shared@x.io").count())
            .await;
        assert_eq!(with_shared, 1);
    }
}
