//! Fast cache store contract.
//!
//! The cache holds the authoritative values of hot counters between
//! reconciliation ticks. It offers the small set of hash, set, list and
//! sorted-set primitives the engine needs, plus one server-side atomic
//! reservation script.
//!
//! # Implementation Notes
//!
//! - Every method is a single round trip and must not be retried inline
//! - [`CacheStore::reserve`] and [`CacheStore::hash_incr_existing`] must be
//!   indivisible on the server: no other client may observe or mutate the
//!   touched keys between their steps

use crate::error::CacheResult;
use crate::model::ReserveOutcome;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

/// Fast in-memory key/value store with set, list and sorted-set types.
pub trait CacheStore: Send + Sync {
    /// Reads every field of a hash. Absent keys yield an empty map.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    fn hash_get_all(
        &self,
        key: &str,
    ) -> impl Future<Output = CacheResult<HashMap<String, String>>> + Send;

    /// Reads one hash field.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    fn hash_get(
        &self,
        key: &str,
        field: &str,
    ) -> impl Future<Output = CacheResult<Option<String>>> + Send;

    /// Writes hash fields, creating the hash if needed.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    fn hash_set(
        &self,
        key: &str,
        fields: &[(String, String)],
    ) -> impl Future<Output = CacheResult<()>> + Send;

    /// Increments an integer hash field, creating it at zero if needed.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable or the field is not an integer.
    fn hash_incr(
        &self,
        key: &str,
        field: &str,
        delta: i64,
    ) -> impl Future<Output = CacheResult<i64>> + Send;

    /// Increments an integer hash field only if the hash already exists.
    ///
    /// Returns the new value, or `None` when the key is absent. The existence
    /// check and the increment are one atomic step.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable or the field is not an integer.
    fn hash_incr_existing(
        &self,
        key: &str,
        field: &str,
        delta: i64,
    ) -> impl Future<Output = CacheResult<Option<i64>>> + Send;

    /// Sets a time-to-live on a key. Returns `false` if the key is absent.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    fn expire(&self, key: &str, ttl: Duration) -> impl Future<Output = CacheResult<bool>> + Send;

    /// Deletes keys. Missing keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    fn delete(&self, keys: &[String]) -> impl Future<Output = CacheResult<()>> + Send;

    /// Adds a set member. Returns `true` if it was not already present.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    fn set_add(&self, key: &str, member: &str) -> impl Future<Output = CacheResult<bool>> + Send;

    /// Removes a set member. Returns `true` if it was present.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    fn set_remove(&self, key: &str, member: &str)
    -> impl Future<Output = CacheResult<bool>> + Send;

    /// Checks set membership.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    fn set_is_member(
        &self,
        key: &str,
        member: &str,
    ) -> impl Future<Output = CacheResult<bool>> + Send;

    /// Reads every member of a set.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    fn set_members(&self, key: &str) -> impl Future<Output = CacheResult<Vec<String>>> + Send;

    /// Members present in every listed set. An absent key is an empty set.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    fn set_intersect(&self, keys: &[String]) -> impl Future<Output = CacheResult<Vec<String>>> + Send;

    /// Pushes a value onto the head of a list.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    fn list_push(&self, key: &str, value: &str) -> impl Future<Output = CacheResult<()>> + Send;

    /// Reads an inclusive index range of a list; negative indices count from
    /// the tail, so `(0, -1)` is the whole list.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    fn list_range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> impl Future<Output = CacheResult<Vec<String>>> + Send;

    /// Adds `delta` to a member's score, creating it at zero if needed.
    /// Returns the new score.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    fn sorted_set_incr(
        &self,
        key: &str,
        member: &str,
        delta: f64,
    ) -> impl Future<Output = CacheResult<f64>> + Send;

    /// Sets a member's score.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    fn sorted_set_add(
        &self,
        key: &str,
        member: &str,
        score: f64,
    ) -> impl Future<Output = CacheResult<()>> + Send;

    /// Reads a member's score.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    fn sorted_set_score(
        &self,
        key: &str,
        member: &str,
    ) -> impl Future<Output = CacheResult<Option<f64>>> + Send;

    /// Stores into `destination` the intersection of the weighted `sources`,
    /// summing weighted scores. Plain sets count as score 1 per member. The
    /// destination is overwritten. Returns the resulting cardinality.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    fn sorted_set_intersect_store(
        &self,
        destination: &str,
        sources: &[(String, f64)],
    ) -> impl Future<Output = CacheResult<u64>> + Send;

    /// Reads every member with its score, highest score first.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    fn sorted_set_range_desc(
        &self,
        key: &str,
    ) -> impl Future<Output = CacheResult<Vec<(String, f64)>>> + Send;

    /// Lists keys matching a glob pattern (`*` wildcard).
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    fn scan_keys(&self, pattern: &str) -> impl Future<Output = CacheResult<Vec<String>>> + Send;

    /// Atomically reserves one unit of an item for `actor`.
    ///
    /// As one indivisible unit:
    /// 1. if `actor` is in the set at `members_key`, returns
    ///    [`ReserveOutcome::AlreadyReserved`]
    /// 2. if the `remain` field of the hash at `item_key` is absent or not
    ///    positive, returns [`ReserveOutcome::OutOfStock`]
    /// 3. decrements `remain` and adds `actor` to the members set, returning
    ///    [`ReserveOutcome::Reserved`]
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable or the script reply is
    /// outside the three outcomes.
    fn reserve(
        &self,
        members_key: &str,
        item_key: &str,
        actor: &str,
    ) -> impl Future<Output = CacheResult<ReserveOutcome>> + Send;
}
