/// Default pub/sub channel for invalidation messages.
pub const DEFAULT_INVALIDATION_CHANNEL: &str = "cache-invalidate";

/// Separator between the logical cache name and the caller key in the shared store.
pub const KEY_SEPARATOR: &str = "::";

/// Returns the shared-store key for `key` within the logical cache `cache_name`.
pub fn shared_key(cache_name: &str, key: &str) -> String {
    format!("{}{}{}", cache_name, KEY_SEPARATOR, key)
}

/// Returns the Redis Set key tracking every shared-store key of a logical cache.
///
/// Clearing a cache reads this set instead of scanning the keyspace. It sits
/// outside the `name::` namespace so it can never collide with a caller key.
pub fn tracking_key(cache_name: &str) -> String {
    format!("{}:_keys", cache_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_key() {
        assert_eq!(shared_key("price", "p1"), "price::p1");
    }

    #[test]
    fn test_shared_key_keeps_separators_in_key() {
        assert_eq!(shared_key("price", "a::b"), "price::a::b");
    }

    #[test]
    fn test_tracking_key_outside_namespace() {
        let tracking = tracking_key("price");
        assert_eq!(tracking, "price:_keys");
        assert!(!tracking.starts_with(&shared_key("price", "")));
    }
}
