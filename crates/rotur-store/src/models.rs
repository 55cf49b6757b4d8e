//! Domain model structs held in memory and persisted as JSON collections.
//!
//! Entities never point at each other; they refer to one another by
//! identity (folded username, key token, item name, group tag) so any
//! collection can be reloaded from disk independently.

use std::collections::{BTreeMap, BTreeSet};

use rotur_shared::constants::{MAX_LOGINS, MAX_TRANSACTIONS};
use rotur_shared::{BillingCycle, Credits, Standing, Tier};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A user document.
///
/// Well-known fields are typed and serialized under reserved names (`sys.`
/// prefix); everything else a user stores lives in [`User::data`], which is
/// flattened into the same JSON object on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Display username. The collection key is its folded form.
    pub username: String,
    #[serde(default)]
    pub email: String,
    /// Client-side hash, 32 hex chars.
    #[serde(default)]
    pub password: String,
    /// Bearer token.
    #[serde(default)]
    pub key: String,

    #[serde(rename = "sys.id", default)]
    pub id: Uuid,
    #[serde(rename = "sys.currency", default)]
    pub credits: Credits,
    #[serde(rename = "sys.created", default)]
    pub created: i64,
    #[serde(rename = "sys.subscription", default)]
    pub tier: Tier,
    #[serde(rename = "sys.standing", default)]
    pub standing: Standing,
    #[serde(rename = "sys.banned", default)]
    pub banned: bool,
    #[serde(rename = "sys.system", default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(rename = "sys.last_claim", default, skip_serializing_if = "Option::is_none")]
    pub last_claim: Option<i64>,

    #[serde(rename = "sys.friends", default)]
    pub friends: BTreeSet<String>,
    /// Incoming friend requests (folded usernames).
    #[serde(rename = "sys.requests", default)]
    pub requests: BTreeSet<String>,
    #[serde(rename = "sys.blocked", default)]
    pub blocked: BTreeSet<String>,

    #[serde(rename = "sys.logins", default)]
    pub logins: Vec<LoginRecord>,
    #[serde(rename = "sys.transactions", default)]
    pub transactions: Vec<Transaction>,

    /// User-defined keys.
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl User {
    pub fn new(username: &str, email: &str, password: &str, key: String, now: i64) -> Self {
        Self {
            username: username.to_string(),
            email: email.trim().to_string(),
            password: password.to_string(),
            key,
            id: Uuid::new_v4(),
            credits: Credits::ZERO,
            created: now,
            tier: Tier::Free,
            standing: Standing::new(Default::default(), now, None),
            banned: false,
            system: None,
            last_claim: None,
            friends: BTreeSet::new(),
            requests: BTreeSet::new(),
            blocked: BTreeSet::new(),
            logins: Vec::new(),
            transactions: Vec::new(),
            data: Map::new(),
        }
    }

    /// Record a transaction, keeping only the most recent ones.
    pub fn push_transaction(&mut self, tx: Transaction) {
        self.transactions.push(tx);
        if self.transactions.len() > MAX_TRANSACTIONS {
            let excess = self.transactions.len() - MAX_TRANSACTIONS;
            self.transactions.drain(..excess);
        }
    }

    pub fn push_login(&mut self, login: LoginRecord) {
        self.logins.push(login);
        if self.logins.len() > MAX_LOGINS {
            let excess = self.logins.len() - MAX_LOGINS;
            self.logins.drain(..excess);
        }
    }

    /// Serialized size of the user-defined keys.
    pub fn data_size(&self) -> usize {
        serde_json::to_vec(&self.data).map(|v| v.len()).unwrap_or(usize::MAX)
    }

    /// Strip the account down to username, email and the banned flag.
    pub fn soft_ban(&mut self) {
        let username = std::mem::take(&mut self.username);
        let email = std::mem::take(&mut self.email);
        let mut banned = User::new(&username, &email, "", String::new(), 0);
        banned.id = Uuid::nil();
        banned.standing = Standing::default();
        banned.banned = true;
        *self = banned;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRecord {
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Transfer,
    DailyClaim,
    Mint,
    KeyPurchase,
    KeySale,
    SubscriptionCharge,
    SubscriptionIncome,
    ItemPurchase,
    ItemSale,
    Tip,
}

/// One entry in a user's bounded transaction log. `amount` is signed from
/// the owner's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub counterparty: String,
    pub amount: Credits,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

// ---------------------------------------------------------------------------
// Post
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    /// Folded author username.
    pub user: String,
    pub content: String,
    /// Milliseconds since epoch.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
    #[serde(default)]
    pub profile_only: bool,
    #[serde(default)]
    pub replies: Vec<Reply>,
    #[serde(default)]
    pub likes: BTreeSet<String>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub is_repost: bool,
    /// Id of the reposted post when `is_repost` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_post: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub id: String,
    pub user: String,
    pub content: String,
    pub timestamp: i64,
}

// ---------------------------------------------------------------------------
// Item
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub owner: String,
    pub author: String,
    pub price: Credits,
    #[serde(default)]
    pub selling: bool,
    pub created: i64,
    #[serde(default)]
    pub transfer_history: Vec<TransferRecord>,
    #[serde(default)]
    pub total_income: Credits,
    /// Visible only to the current owner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<Value>,
}

impl Item {
    /// Copy of the item as `viewer` may see it.
    pub fn view_for(&self, viewer: Option<&str>) -> Item {
        let mut item = self.clone();
        if viewer != Some(self.owner.as_str()) {
            item.private = None;
        }
        item
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    Purchase,
    Transfer,
}

/// Ownership change of an item. `timestamp` is in seconds, unlike every
/// other timestamp in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    #[serde(rename = "type")]
    pub kind: TransferKind,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Credits>,
    pub timestamp: i64,
}

// ---------------------------------------------------------------------------
// Key
// ---------------------------------------------------------------------------

/// A shareable access key, optionally billed on a recurring schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Key {
    /// Opaque token, primary identity.
    pub key: String,
    /// Unique among keys.
    pub name: String,
    pub creator: String,
    /// Whole credits charged per purchase or billing cycle.
    pub price: u64,
    pub created: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<Subscription>,
    #[serde(default)]
    pub users: BTreeMap<String, Holder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Key {
    /// `None` when the stored price is outside the credit range.
    pub fn price_credits(&self) -> Option<Credits> {
        i64::try_from(self.price).ok().and_then(Credits::checked_whole)
    }

    pub fn cycle(&self) -> Option<BillingCycle> {
        self.subscription.as_ref().map(|s| s.cycle)
    }

    /// The creator always has access; everyone else must be a holder.
    pub fn has_access(&self, user: &str) -> bool {
        self.creator == user || self.users.contains_key(user)
    }

    /// Refresh the key-level `next_billing` to the earliest holder due date.
    pub fn refresh_next_billing(&mut self) {
        let earliest = self.users.values().filter_map(|h| h.next_billing).min();
        if let Some(sub) = self.subscription.as_mut() {
            sub.next_billing = earliest;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(flatten)]
    pub cycle: BillingCycle,
    /// Earliest due instant among holders (ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_billing: Option<i64>,
}

/// Per-holder record. `next_billing` is present iff the key has a
/// subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holder {
    /// Joined at (ms).
    pub time: i64,
    /// Price paid on joining, in whole credits.
    pub price: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_billing: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_at: Option<i64>,
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Kick,
    Announce,
    ManageRoles,
    ManageEvents,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    Owner,
    Member,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub name: String,
    pub kind: RoleKind,
    #[serde(default)]
    pub permissions: BTreeSet<Permission>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub joined: i64,
    #[serde(default)]
    pub roles: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub id: String,
    pub author: String,
    pub content: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEvent {
    pub id: String,
    pub title: String,
    pub starts_at: i64,
    pub created_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tip {
    pub from: String,
    pub amount: Credits,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Alphanumeric, at most 20 chars, stored upper-case.
    pub tag: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// `sys.id` of the owning user.
    pub owner_id: Uuid,
    /// Folded username of the owning user.
    pub owner: String,
    pub created: i64,
    #[serde(default)]
    pub members: BTreeMap<String, GroupMember>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub announcements: Vec<Announcement>,
    #[serde(default)]
    pub events: Vec<GroupEvent>,
    #[serde(default)]
    pub tips: Vec<Tip>,
}

impl Group {
    pub fn role(&self, id: &str) -> Option<&Role> {
        self.roles.iter().find(|r| r.id == id)
    }

    pub fn role_of_kind(&self, kind: RoleKind) -> Option<&Role> {
        self.roles.iter().find(|r| r.kind == kind)
    }

    /// Whether `user` holds `perm` through any of their roles. The owner
    /// holds every permission.
    pub fn has_permission(&self, user: &str, perm: Permission) -> bool {
        let Some(member) = self.members.get(user) else {
            return false;
        };
        member.roles.iter().filter_map(|id| self.role(id)).any(|role| {
            role.kind == RoleKind::Owner || role.permissions.contains(&perm)
        })
    }
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

/// A client system users can declare at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct System {
    pub name: String,
    pub owner: String,
    #[serde(default)]
    pub designation: String,
    pub created: i64,
}

// ---------------------------------------------------------------------------
// Events history
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Transfer,
    DailyClaim,
    Mint,
    KeyPurchase,
    KeyGrant,
    KeyRevoke,
    KeyCancel,
    SubscriptionCharge,
    SubscriptionEviction,
    ItemPurchase,
    ItemTransfer,
    GroupTip,
    UserBanned,
    UserDeleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub kind: EventKind,
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Credits>,
    pub timestamp: i64,
}

impl HistoryEvent {
    pub fn new(kind: EventKind, user: &str, timestamp: i64) -> Self {
        Self {
            kind,
            user: user.to_string(),
            target: None,
            amount: None,
            timestamp,
        }
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn amount(mut self, amount: Credits) -> Self {
        self.amount = Some(amount);
        self
    }
}

// ---------------------------------------------------------------------------
// Collection shapes
// ---------------------------------------------------------------------------

/// Folded username -> user.
pub type Users = BTreeMap<String, User>;
/// Newest last.
pub type Posts = Vec<Post>;
pub type Items = Vec<Item>;
/// Key token -> key.
pub type Keys = BTreeMap<String, Key>;
/// Target username -> follower usernames.
pub type Followers = BTreeMap<String, BTreeSet<String>>;
/// Tag -> group.
pub type Groups = BTreeMap<String, Group>;
/// Folded system name -> system.
pub type Systems = BTreeMap<String, System>;
/// Oldest first, bounded.
pub type EventsHistory = Vec<HistoryEvent>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_user_document_round_trips_extensions() {
        let raw = json!({
            "username": "Alice",
            "email": "a@x.io",
            "password": "00112233445566778899aabbccddeeff",
            "key": "tok",
            "sys.currency": "12.5",
            "theme": {"accent": "#fff"},
            "pfp": "https://example/a.png"
        });
        let user: User = serde_json::from_value(raw).unwrap();
        assert_eq!(user.credits, Credits::from_cents(1250));
        assert_eq!(user.data.get("theme"), Some(&json!({"accent": "#fff"})));

        let back = serde_json::to_value(&user).unwrap();
        assert_eq!(back["sys.currency"], json!(12.5));
        assert_eq!(back["pfp"], json!("https://example/a.png"));
    }

    #[test]
    fn test_transactions_are_bounded() {
        let mut user = User::new("bob", "b@x.io", "", "k".into(), 0);
        for i in 0..(MAX_TRANSACTIONS + 5) {
            user.push_transaction(Transaction {
                kind: TransactionKind::Transfer,
                counterparty: "alice".into(),
                amount: Credits::whole(1),
                timestamp: i as i64,
                note: None,
            });
        }
        assert_eq!(user.transactions.len(), MAX_TRANSACTIONS);
        assert_eq!(user.transactions[0].timestamp, 5);
    }

    #[test]
    fn test_soft_ban_keeps_identity_only() {
        let mut user = User::new("Eve", "e@x.io", "pw", "token".into(), 10);
        user.credits = Credits::whole(99);
        user.data.insert("bio".into(), json!("hi"));
        user.friends.insert("bob".into());

        user.soft_ban();

        assert_eq!(user.username, "Eve");
        assert_eq!(user.email, "e@x.io");
        assert!(user.banned);
        assert!(user.key.is_empty());
        assert_eq!(user.credits, Credits::ZERO);
        assert!(user.data.is_empty());
        assert!(user.friends.is_empty());
    }

    #[test]
    fn test_item_private_payload_hidden_from_others() {
        let item = Item {
            name: "Sword".into(),
            description: String::new(),
            owner: "eve".into(),
            author: "eve".into(),
            price: Credits::whole(50),
            selling: true,
            created: 0,
            transfer_history: Vec::new(),
            total_income: Credits::ZERO,
            private: Some(json!("secret")),
        };
        assert!(item.view_for(Some("eve")).private.is_some());
        assert!(item.view_for(Some("frank")).private.is_none());
        assert!(item.view_for(None).private.is_none());
    }
}
