/// Username of the credit fountain that pays out daily claims.
pub const FOUNTAIN_USER: &str = "rotur";

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 5602;

/// Milliseconds in one day
pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

// -- Users --

/// Username length bounds (characters)
pub const MIN_USERNAME_LEN: usize = 3;
pub const MAX_USERNAME_LEN: usize = 20;

/// Length of the client-side password hash (hex characters)
pub const PASSWORD_HASH_LEN: usize = 32;

/// Random bytes in a bearer token (rendered as hex, so twice as many chars)
pub const TOKEN_BYTES: usize = 32;

/// Maximum login records kept per user
pub const MAX_LOGINS: usize = 10;

/// Maximum transaction records kept per user
pub const MAX_TRANSACTIONS: usize = 20;

/// Maximum length of a user-defined key
pub const MAX_USER_KEY_LEN: usize = 64;

/// Serialized size budget for all user-defined keys of one user (bytes)
pub const USER_DATA_BUDGET: usize = 25_000;

/// Prefix of system-managed user document fields
pub const RESERVED_PREFIX: &str = "sys.";

/// Top-level user document fields that are system-managed without the prefix
pub const RESERVED_FIELDS: &[&str] = &["username", "email", "password", "key"];

// -- Content --

/// Post length limits (characters)
pub const MAX_POST_LEN: usize = 300;
pub const MAX_EXTENDED_POST_LEN: usize = 600;
pub const MAX_REPLY_LEN: usize = 300;

/// Item and key name length limit (characters)
pub const MAX_ITEM_NAME_LEN: usize = 50;
pub const MAX_KEY_NAME_LEN: usize = 50;

/// Highest key price (whole credits)
pub const MAX_KEY_PRICE: u64 = 1_000_000_000;

/// Group tag length limit (characters)
pub const MAX_GROUP_TAG_LEN: usize = 20;

/// Events history cap (oldest entries dropped first)
pub const MAX_HISTORY_EVENTS: usize = 10_000;

// -- OFSF --

/// Positional fields per OFSF entry; the last one carries the UUID
pub const OFSF_ENTRY_FIELDS: usize = 14;

/// Extension of the legacy monolithic OFSF file
pub const OFSF_LEGACY_EXT: &str = "ofsf";

// -- Background tasks --

/// Subscription sweep interval (seconds)
pub const DEFAULT_SUBSCRIPTION_CHECK_INTERVAL_SECS: u64 = 3600;

/// Key ownership cache TTL (seconds)
pub const DEFAULT_KEY_OWNERSHIP_CACHE_TTL_SECS: u64 = 60;

/// Users file watcher poll interval and debounce (milliseconds)
pub const USERS_WATCH_POLL_MS: u64 = 500;
pub const USERS_WATCH_DEBOUNCE_MS: u64 = 500;

/// Snapshot coalescing window (milliseconds)
pub const DEFAULT_FLUSH_COALESCE_MS: u64 = 250;
