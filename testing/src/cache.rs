//! In-memory cache stores.

use neighborly_core::cache::CacheStore;
use neighborly_core::error::{CacheError, CacheResult};
use neighborly_core::model::{REMAIN_FIELD, ReserveOutcome};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
enum Value {
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    List(VecDeque<String>),
    SortedSet(HashMap<String, f64>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    const fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }
}

type Entries = HashMap<String, Entry>;

fn wrong_type(key: &str) -> CacheError {
    CacheError::Unavailable(format!(
        "WRONGTYPE Operation against key '{key}' holding the wrong kind of value"
    ))
}

fn hash_mut<'a>(entries: &'a mut Entries, key: &str) -> CacheResult<&'a mut HashMap<String, String>> {
    match &mut entries
        .entry(key.to_string())
        .or_insert_with(|| Entry::new(Value::Hash(HashMap::new())))
        .value
    {
        Value::Hash(hash) => Ok(hash),
        _ => Err(wrong_type(key)),
    }
}

fn hash_ref<'a>(entries: &'a Entries, key: &str) -> CacheResult<Option<&'a HashMap<String, String>>> {
    match entries.get(key).map(|entry| &entry.value) {
        None => Ok(None),
        Some(Value::Hash(hash)) => Ok(Some(hash)),
        Some(_) => Err(wrong_type(key)),
    }
}

fn set_mut<'a>(entries: &'a mut Entries, key: &str) -> CacheResult<&'a mut HashSet<String>> {
    match &mut entries
        .entry(key.to_string())
        .or_insert_with(|| Entry::new(Value::Set(HashSet::new())))
        .value
    {
        Value::Set(set) => Ok(set),
        _ => Err(wrong_type(key)),
    }
}

fn set_ref<'a>(entries: &'a Entries, key: &str) -> CacheResult<Option<&'a HashSet<String>>> {
    match entries.get(key).map(|entry| &entry.value) {
        None => Ok(None),
        Some(Value::Set(set)) => Ok(Some(set)),
        Some(_) => Err(wrong_type(key)),
    }
}

fn sorted_set_mut<'a>(entries: &'a mut Entries, key: &str) -> CacheResult<&'a mut HashMap<String, f64>> {
    match &mut entries
        .entry(key.to_string())
        .or_insert_with(|| Entry::new(Value::SortedSet(HashMap::new())))
        .value
    {
        Value::SortedSet(zset) => Ok(zset),
        _ => Err(wrong_type(key)),
    }
}

fn parse_int(key: &str, field: &str, raw: &str) -> CacheResult<i64> {
    raw.parse().map_err(|_| CacheError::Corrupt {
        key: key.to_string(),
        reason: format!("field '{field}' is not an integer"),
    })
}

/// Drops the key once its last member is removed, as Redis does.
fn remove_if_empty(entries: &mut Entries, key: &str) {
    let empty = match entries.get(key).map(|entry| &entry.value) {
        Some(Value::Hash(hash)) => hash.is_empty(),
        Some(Value::Set(set)) => set.is_empty(),
        Some(Value::List(list)) => list.is_empty(),
        Some(Value::SortedSet(zset)) => zset.is_empty(),
        None => false,
    };
    if empty {
        entries.remove(key);
    }
}

/// Glob matching with `*` (any run) and `?` (any one character).
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            },
            Some(&c) if c == '?' || c == text[t] => {
                p += 1;
                t += 1;
            },
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                },
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

/// Resolves a Redis-style inclusive index into a list of `len` elements.
fn list_index(index: isize, len: usize) -> isize {
    if index < 0 {
        isize::try_from(len).unwrap_or(isize::MAX) + index
    } else {
        index
    }
}

/// In-memory cache store for fast, deterministic tests.
///
/// Every operation runs under one lock, so [`CacheStore::reserve`] and
/// [`CacheStore::hash_incr_existing`] are atomic just like their Redis
/// scripts. Expiry is checked lazily against the wall clock.
///
/// # Example
///
/// ```
/// use neighborly_testing::InMemoryCacheStore;
/// use neighborly_core::cache::CacheStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let cache = InMemoryCacheStore::new();
/// cache.set_add("likes:1", "42").await?;
/// assert!(cache.set_is_member("likes:1", "42").await?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryCacheStore {
    entries: Arc<Mutex<Entries>>,
}

impl InMemoryCacheStore {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a key currently exists.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.with(|entries| Ok(entries.contains_key(key)))
            .unwrap_or(false)
    }

    /// Number of live keys.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.with(|entries| Ok(entries.len())).unwrap_or(0)
    }

    /// Runs `f` against the live entries under the lock.
    fn with<T>(&self, f: impl FnOnce(&mut Entries) -> CacheResult<T>) -> CacheResult<T> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CacheError::Unavailable("Mutex lock failed".to_string()))?;

        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at.is_none_or(|at| at > now));

        f(&mut entries)
    }
}

impl CacheStore for InMemoryCacheStore {
    async fn hash_get_all(&self, key: &str) -> CacheResult<HashMap<String, String>> {
        self.with(|entries| Ok(hash_ref(entries, key)?.cloned().unwrap_or_default()))
    }

    async fn hash_get(&self, key: &str, field: &str) -> CacheResult<Option<String>> {
        self.with(|entries| Ok(hash_ref(entries, key)?.and_then(|hash| hash.get(field).cloned())))
    }

    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> CacheResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        self.with(|entries| {
            let hash = hash_mut(entries, key)?;
            for (field, value) in fields {
                hash.insert(field.clone(), value.clone());
            }
            Ok(())
        })
    }

    async fn hash_incr(&self, key: &str, field: &str, delta: i64) -> CacheResult<i64> {
        self.with(|entries| {
            let hash = hash_mut(entries, key)?;
            let current = hash
                .get(field)
                .map_or(Ok(0), |raw| parse_int(key, field, raw))?;
            let next = current + delta;
            hash.insert(field.to_string(), next.to_string());
            Ok(next)
        })
    }

    async fn hash_incr_existing(
        &self,
        key: &str,
        field: &str,
        delta: i64,
    ) -> CacheResult<Option<i64>> {
        self.with(|entries| {
            if hash_ref(entries, key)?.is_none() {
                return Ok(None);
            }
            let hash = hash_mut(entries, key)?;
            let current = hash
                .get(field)
                .map_or(Ok(0), |raw| parse_int(key, field, raw))?;
            let next = current + delta;
            hash.insert(field.to_string(), next.to_string());
            Ok(Some(next))
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        self.with(|entries| {
            Ok(entries.get_mut(key).is_some_and(|entry| {
                entry.expires_at = Some(Instant::now() + ttl);
                true
            }))
        })
    }

    async fn delete(&self, keys: &[String]) -> CacheResult<()> {
        self.with(|entries| {
            for key in keys {
                entries.remove(key);
            }
            Ok(())
        })
    }

    async fn set_add(&self, key: &str, member: &str) -> CacheResult<bool> {
        self.with(|entries| Ok(set_mut(entries, key)?.insert(member.to_string())))
    }

    async fn set_remove(&self, key: &str, member: &str) -> CacheResult<bool> {
        self.with(|entries| {
            if set_ref(entries, key)?.is_none() {
                return Ok(false);
            }
            let removed = set_mut(entries, key)?.remove(member);
            remove_if_empty(entries, key);
            Ok(removed)
        })
    }

    async fn set_is_member(&self, key: &str, member: &str) -> CacheResult<bool> {
        self.with(|entries| Ok(set_ref(entries, key)?.is_some_and(|set| set.contains(member))))
    }

    async fn set_members(&self, key: &str) -> CacheResult<Vec<String>> {
        self.with(|entries| {
            let mut members: Vec<String> = set_ref(entries, key)?
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default();
            members.sort();
            Ok(members)
        })
    }

    async fn set_intersect(&self, keys: &[String]) -> CacheResult<Vec<String>> {
        self.with(|entries| {
            let Some((first, rest)) = keys.split_first() else {
                return Ok(Vec::new());
            };
            let Some(first) = set_ref(entries, first)? else {
                return Ok(Vec::new());
            };
            let mut members: Vec<String> = Vec::new();
            'member: for member in first {
                for key in rest {
                    if !set_ref(entries, key)?.is_some_and(|set| set.contains(member)) {
                        continue 'member;
                    }
                }
                members.push(member.clone());
            }
            members.sort();
            Ok(members)
        })
    }

    async fn list_push(&self, key: &str, value: &str) -> CacheResult<()> {
        self.with(|entries| {
            let entry = entries
                .entry(key.to_string())
                .or_insert_with(|| Entry::new(Value::List(VecDeque::new())));
            match &mut entry.value {
                Value::List(list) => {
                    list.push_front(value.to_string());
                    Ok(())
                },
                _ => Err(wrong_type(key)),
            }
        })
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> CacheResult<Vec<String>> {
        self.with(|entries| {
            let list = match entries.get(key).map(|entry| &entry.value) {
                None => return Ok(Vec::new()),
                Some(Value::List(list)) => list,
                Some(_) => return Err(wrong_type(key)),
            };

            let start = list_index(start, list.len()).max(0);
            let stop = list_index(stop, list.len());
            if stop < start {
                return Ok(Vec::new());
            }
            let skip = usize::try_from(start).unwrap_or(usize::MAX);
            let take = usize::try_from(stop - start + 1).unwrap_or(0);

            Ok(list.iter().skip(skip).take(take).cloned().collect())
        })
    }

    async fn sorted_set_incr(&self, key: &str, member: &str, delta: f64) -> CacheResult<f64> {
        self.with(|entries| {
            let score = sorted_set_mut(entries, key)?
                .entry(member.to_string())
                .or_insert(0.0);
            *score += delta;
            Ok(*score)
        })
    }

    async fn sorted_set_add(&self, key: &str, member: &str, score: f64) -> CacheResult<()> {
        self.with(|entries| {
            sorted_set_mut(entries, key)?.insert(member.to_string(), score);
            Ok(())
        })
    }

    async fn sorted_set_score(&self, key: &str, member: &str) -> CacheResult<Option<f64>> {
        self.with(|entries| match entries.get(key).map(|entry| &entry.value) {
            None => Ok(None),
            Some(Value::SortedSet(zset)) => Ok(zset.get(member).copied()),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn sorted_set_intersect_store(
        &self,
        destination: &str,
        sources: &[(String, f64)],
    ) -> CacheResult<u64> {
        self.with(|entries| {
            let mut result: Option<HashMap<String, f64>> = None;

            for (key, weight) in sources {
                // Plain sets contribute a score of 1 per member
                let scores: HashMap<String, f64> = match entries.get(key).map(|entry| &entry.value) {
                    None => HashMap::new(),
                    Some(Value::SortedSet(zset)) => zset.clone(),
                    Some(Value::Set(set)) => set.iter().map(|m| (m.clone(), 1.0)).collect(),
                    Some(_) => return Err(wrong_type(key)),
                };

                result = Some(match result {
                    None => scores
                        .into_iter()
                        .map(|(member, score)| (member, score * weight))
                        .collect(),
                    Some(acc) => acc
                        .into_iter()
                        .filter_map(|(member, sum)| {
                            scores.get(&member).map(|score| (member, sum + score * weight))
                        })
                        .collect(),
                });
            }

            let result = result.unwrap_or_default();
            let cardinality = result.len() as u64;

            entries.remove(destination);
            if !result.is_empty() {
                entries.insert(destination.to_string(), Entry::new(Value::SortedSet(result)));
            }

            Ok(cardinality)
        })
    }

    async fn sorted_set_range_desc(&self, key: &str) -> CacheResult<Vec<(String, f64)>> {
        self.with(|entries| {
            let mut members: Vec<(String, f64)> = match entries.get(key).map(|entry| &entry.value) {
                None => Vec::new(),
                Some(Value::SortedSet(zset)) => {
                    zset.iter().map(|(m, s)| (m.clone(), *s)).collect()
                },
                Some(_) => return Err(wrong_type(key)),
            };
            // Redis orders equal scores by member, reversed
            members.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
            Ok(members)
        })
    }

    async fn scan_keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        self.with(|entries| {
            let mut keys: Vec<String> = entries
                .keys()
                .filter(|key| glob_match(pattern, key))
                .cloned()
                .collect();
            keys.sort();
            Ok(keys)
        })
    }

    async fn reserve(
        &self,
        members_key: &str,
        item_key: &str,
        actor: &str,
    ) -> CacheResult<ReserveOutcome> {
        self.with(|entries| {
            if set_ref(entries, members_key)?.is_some_and(|set| set.contains(actor)) {
                return Ok(ReserveOutcome::AlreadyReserved);
            }

            let remain = match hash_ref(entries, item_key)?.and_then(|hash| hash.get(REMAIN_FIELD)) {
                Some(raw) => raw.parse::<i64>().ok(),
                None => None,
            };
            let Some(remain) = remain.filter(|remain| *remain > 0) else {
                return Ok(ReserveOutcome::OutOfStock);
            };

            hash_mut(entries, item_key)?.insert(REMAIN_FIELD.to_string(), (remain - 1).to_string());
            set_mut(entries, members_key)?.insert(actor.to_string());

            Ok(ReserveOutcome::Reserved)
        })
    }
}

#[derive(Debug)]
struct FaultRule {
    fragment: String,
    allowed_calls: usize,
}

/// Cache wrapper that fails chosen calls, for exercising compensation and
/// error paths.
///
/// Hash increments (`hash_incr`, `hash_incr_existing`) against a key
/// containing a registered fragment succeed `allowed_calls` times and fail
/// with [`CacheError::Unavailable`] afterwards. [`FaultyCacheStore::set_offline`]
/// makes every call fail.
#[derive(Debug, Clone)]
pub struct FaultyCacheStore<C> {
    inner: C,
    rules: Arc<Mutex<Vec<FaultRule>>>,
    offline: Arc<Mutex<bool>>,
}

impl<C: CacheStore> FaultyCacheStore<C> {
    /// Wrap a cache.
    #[must_use]
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            rules: Arc::new(Mutex::new(Vec::new())),
            offline: Arc::new(Mutex::new(false)),
        }
    }

    /// The wrapped cache.
    pub const fn inner(&self) -> &C {
        &self.inner
    }

    /// Lets `allowed_calls` increments on keys containing `fragment`
    /// through, then fails the rest.
    pub fn fail_after(&self, fragment: &str, allowed_calls: usize) {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(FaultRule {
                fragment: fragment.to_string(),
                allowed_calls,
            });
        }
    }

    /// Removes every increment rule.
    pub fn heal(&self) {
        if let Ok(mut rules) = self.rules.lock() {
            rules.clear();
        }
    }

    /// Fails every call while `offline` is true.
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut flag) = self.offline.lock() {
            *flag = offline;
        }
    }

    fn check_online(&self) -> CacheResult<()> {
        let offline = self
            .offline
            .lock()
            .map_err(|_| CacheError::Unavailable("Mutex lock failed".to_string()))?;
        if *offline {
            return Err(CacheError::Unavailable("injected: cache offline".to_string()));
        }
        Ok(())
    }

    fn check_increment(&self, key: &str) -> CacheResult<()> {
        self.check_online()?;
        let mut rules = self
            .rules
            .lock()
            .map_err(|_| CacheError::Unavailable("Mutex lock failed".to_string()))?;
        for rule in rules.iter_mut().filter(|rule| key.contains(&rule.fragment)) {
            if rule.allowed_calls == 0 {
                return Err(CacheError::Unavailable(format!(
                    "injected: increment on '{key}' failed"
                )));
            }
            rule.allowed_calls -= 1;
        }
        Ok(())
    }
}

impl<C: CacheStore> CacheStore for FaultyCacheStore<C> {
    async fn hash_get_all(&self, key: &str) -> CacheResult<HashMap<String, String>> {
        self.check_online()?;
        self.inner.hash_get_all(key).await
    }

    async fn hash_get(&self, key: &str, field: &str) -> CacheResult<Option<String>> {
        self.check_online()?;
        self.inner.hash_get(key, field).await
    }

    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> CacheResult<()> {
        self.check_online()?;
        self.inner.hash_set(key, fields).await
    }

    async fn hash_incr(&self, key: &str, field: &str, delta: i64) -> CacheResult<i64> {
        self.check_increment(key)?;
        self.inner.hash_incr(key, field, delta).await
    }

    async fn hash_incr_existing(
        &self,
        key: &str,
        field: &str,
        delta: i64,
    ) -> CacheResult<Option<i64>> {
        self.check_increment(key)?;
        self.inner.hash_incr_existing(key, field, delta).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        self.check_online()?;
        self.inner.expire(key, ttl).await
    }

    async fn delete(&self, keys: &[String]) -> CacheResult<()> {
        self.check_online()?;
        self.inner.delete(keys).await
    }

    async fn set_add(&self, key: &str, member: &str) -> CacheResult<bool> {
        self.check_online()?;
        self.inner.set_add(key, member).await
    }

    async fn set_remove(&self, key: &str, member: &str) -> CacheResult<bool> {
        self.check_online()?;
        self.inner.set_remove(key, member).await
    }

    async fn set_is_member(&self, key: &str, member: &str) -> CacheResult<bool> {
        self.check_online()?;
        self.inner.set_is_member(key, member).await
    }

    async fn set_members(&self, key: &str) -> CacheResult<Vec<String>> {
        self.check_online()?;
        self.inner.set_members(key).await
    }

    async fn set_intersect(&self, keys: &[String]) -> CacheResult<Vec<String>> {
        self.check_online()?;
        self.inner.set_intersect(keys).await
    }

    async fn list_push(&self, key: &str, value: &str) -> CacheResult<()> {
        self.check_online()?;
        self.inner.list_push(key, value).await
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> CacheResult<Vec<String>> {
        self.check_online()?;
        self.inner.list_range(key, start, stop).await
    }

    async fn sorted_set_incr(&self, key: &str, member: &str, delta: f64) -> CacheResult<f64> {
        self.check_online()?;
        self.inner.sorted_set_incr(key, member, delta).await
    }

    async fn sorted_set_add(&self, key: &str, member: &str, score: f64) -> CacheResult<()> {
        self.check_online()?;
        self.inner.sorted_set_add(key, member, score).await
    }

    async fn sorted_set_score(&self, key: &str, member: &str) -> CacheResult<Option<f64>> {
        self.check_online()?;
        self.inner.sorted_set_score(key, member).await
    }

    async fn sorted_set_intersect_store(
        &self,
        destination: &str,
        sources: &[(String, f64)],
    ) -> CacheResult<u64> {
        self.check_online()?;
        self.inner.sorted_set_intersect_store(destination, sources).await
    }

    async fn sorted_set_range_desc(&self, key: &str) -> CacheResult<Vec<(String, f64)>> {
        self.check_online()?;
        self.inner.sorted_set_range_desc(key).await
    }

    async fn scan_keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        self.check_online()?;
        self.inner.scan_keys(pattern).await
    }

    async fn reserve(
        &self,
        members_key: &str,
        item_key: &str,
        actor: &str,
    ) -> CacheResult<ReserveOutcome> {
        self.check_online()?;
        self.inner.reserve(members_key, item_key, actor).await
    }
}
