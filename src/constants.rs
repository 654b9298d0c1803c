// -
// Key namespace

/// Separator between application / profile / label segments of a store key
pub const KEY_DELIMITER: char = '.';

/// Application identity used when a key cannot be attributed to one application
pub const WILDCARD_APPLICATION: &str = "*";

/// Separator between key and value inside a lock name
pub const LOCK_NAME_SEPARATOR: char = ':';

/// Start key for a full-range etcd read or watch (`\0` with `from_key`)
pub(crate) const FULL_RANGE_KEY: &str = "\0";

// -
// Endpoint schemes

pub(crate) const HTTP_PREFIX: &str = "http://";
pub(crate) const HTTPS_PREFIX: &str = "https://";
pub(crate) const REDIS_CONNECTION_PREFIX: &str = "redis://";

// -
// Defaults

/// Bus id used as the origin of refresh events when none is configured
pub(crate) const DEFAULT_BUS_ID: &str = "application";

/// Environment variable prefix for configuration overrides
pub(crate) const ENV_PREFIX: &str = "REFRESH";
