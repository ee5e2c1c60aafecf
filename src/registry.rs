//! The [ResourceRegistry] maps `(type, name)` to loaded resources, and keeps each type's group under its memory
//! budget by evicting the coldest resources nobody is using.
//!
//! The registry owns one `Arc` per resource.  Callers holding clones of that `Arc` mark the resource as in use, which
//! both zeroes its use timer and exempts it from eviction and from non-forced releases.  Callers which want a
//! non-owning reference should keep the name and look it up again.
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;

use ahash::RandomState;

use crate::*;

type CacheHashMap<V> = HashMap<String, V, RandomState>;

/// Identity of a cached resource.
pub type ResourceKey = (ResourceType, String);

#[derive(Debug)]
pub struct ResourceEntry {
    resource: Arc<dyn Resource>,
    last_used_ms: u64,
    memory_use: u64,
}

impl ResourceEntry {
    fn new(resource: Arc<dyn Resource>, now_ms: u64) -> ResourceEntry {
        ResourceEntry {
            memory_use: resource.memory_use(),
            resource,
            last_used_ms: now_ms,
        }
    }

    pub fn resource(&self) -> &Arc<dyn Resource> {
        &self.resource
    }

    pub fn memory_use(&self) -> u64 {
        self.memory_use
    }

    /// Whether anything outside the registry holds the resource.
    pub fn is_in_use(&self) -> bool {
        Arc::strong_count(&self.resource) > 1
    }

    /// Milliseconds since last access, or zero while in use.
    pub fn use_timer(&self, now_ms: u64) -> u64 {
        if self.is_in_use() {
            0
        } else {
            now_ms.saturating_sub(self.last_used_ms)
        }
    }
}

/// All cached resources of one type.
#[derive(Debug, Default)]
pub struct ResourceGroup {
    /// Zero means unlimited.
    memory_budget: u64,
    memory_use: u64,
    entries: CacheHashMap<ResourceEntry>,
}

impl ResourceGroup {
    fn recompute_memory_use(&mut self) {
        for e in self.entries.values_mut() {
            e.memory_use = e.resource.memory_use();
        }
        self.memory_use = self.entries.values().map(|e| e.memory_use).sum();
    }

    fn remove(&mut self, name: &str) -> Option<ResourceEntry> {
        let removed = self.entries.remove(name)?;
        self.memory_use = self.memory_use.saturating_sub(removed.memory_use);
        Some(removed)
    }
}

/// What an eviction pass did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EvictionOutcome {
    pub evicted: usize,
    /// The group is still over budget because everything left is in use.
    pub over_budget: bool,
}

pub struct ResourceRegistry {
    groups: HashMap<ResourceType, ResourceGroup, RandomState>,
    clock: Arc<dyn Clock>,
}

impl ResourceRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> ResourceRegistry {
        ResourceRegistry {
            groups: Default::default(),
            clock,
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Insert or replace without running an eviction pass.  Returns the replaced resource, if any.
    pub fn insert(
        &mut self,
        ty: ResourceType,
        name: &str,
        resource: Arc<dyn Resource>,
    ) -> Option<Arc<dyn Resource>> {
        let now = self.now_ms();
        let group = self.groups.entry(ty).or_default();
        let entry = ResourceEntry::new(resource, now);
        group.memory_use += entry.memory_use;
        let old = group.entries.insert(name.to_string(), entry)?;
        group.memory_use = group.memory_use.saturating_sub(old.memory_use);
        Some(old.resource)
    }

    /// Register a resource created outside the cache, then run an eviction pass for its type.
    pub fn add_manual(
        &mut self,
        ty: ResourceType,
        name: &str,
        resource: Arc<dyn Resource>,
    ) -> Result<EvictionOutcome, ResourceError> {
        if name.is_empty() {
            return Err(ResourceError::EmptyName);
        }
        self.insert(ty, name, resource);
        Ok(self.update_group(ty))
    }

    /// Look up a resource, resetting its use timer.
    pub fn get(&mut self, ty: ResourceType, name: &str) -> Option<Arc<dyn Resource>> {
        let now = self.now_ms();
        let entry = self.groups.get_mut(&ty)?.entries.get_mut(name)?;
        entry.last_used_ms = now;
        Some(entry.resource.clone())
    }

    /// Look at an entry without touching its use timer.
    pub fn peek(&self, ty: ResourceType, name: &str) -> Option<&ResourceEntry> {
        self.groups.get(&ty)?.entries.get(name)
    }

    pub fn contains(&self, ty: ResourceType, name: &str) -> bool {
        self.peek(ty, name).is_some()
    }

    pub fn use_timer(&self, ty: ResourceType, name: &str) -> Option<u64> {
        let now = self.now_ms();
        self.peek(ty, name).map(|e| e.use_timer(now))
    }

    /// Types which currently hold a resource of this name.
    pub fn types_with(&self, name: &str) -> Vec<ResourceType> {
        let mut out: Vec<ResourceType> = self
            .groups
            .iter()
            .filter(|(_, g)| g.entries.contains_key(name))
            .map(|(t, _)| *t)
            .collect();
        out.sort();
        out
    }

    pub fn release(&mut self, ty: ResourceType, name: &str, force: bool) -> bool {
        let group = match self.groups.get_mut(&ty) {
            Some(g) => g,
            None => return false,
        };
        match group.entries.get(name) {
            Some(e) if force || !e.is_in_use() => {}
            _ => return false,
        }
        group.remove(name).is_some()
    }

    fn release_matching(
        &mut self,
        ty: Option<ResourceType>,
        force: bool,
        mut pred: impl FnMut(&str) -> bool,
    ) -> usize {
        let mut released = 0;
        for (t, group) in self.groups.iter_mut() {
            if ty.map_or(false, |x| x != *t) {
                continue;
            }
            let doomed: Vec<String> = group
                .entries
                .iter()
                .filter(|(n, e)| pred(n.as_str()) && (force || !e.is_in_use()))
                .map(|(n, _)| n.clone())
                .collect();
            for n in doomed {
                group.remove(&n);
                released += 1;
            }
        }
        released
    }

    pub fn release_type(&mut self, ty: ResourceType, force: bool) -> usize {
        self.release_matching(Some(ty), force, |_| true)
    }

    /// Release resources whose names contain `partial`, optionally only of one type.
    pub fn release_partial(&mut self, ty: Option<ResourceType>, partial: &str, force: bool) -> usize {
        self.release_matching(ty, force, |n| n.contains(partial))
    }

    /// Release everything.  Without `force`, keeps going until a pass frees nothing, since releasing one resource can
    /// drop the last outside reference to another.
    pub fn release_all(&mut self, force: bool) -> usize {
        let mut total = 0;
        loop {
            let released = self.release_matching(None, force, |_| true);
            total += released;
            if force || released == 0 {
                return total;
            }
        }
    }

    pub fn set_memory_budget(&mut self, ty: ResourceType, budget: u64) -> EvictionOutcome {
        self.groups.entry(ty).or_default().memory_budget = budget;
        self.update_group(ty)
    }

    pub fn memory_budget(&self, ty: ResourceType) -> u64 {
        self.groups.get(&ty).map_or(0, |g| g.memory_budget)
    }

    pub fn memory_use(&self, ty: ResourceType) -> u64 {
        self.groups.get(&ty).map_or(0, |g| g.memory_use)
    }

    pub fn total_memory_use(&self) -> u64 {
        self.groups.values().map(|g| g.memory_use).sum()
    }

    pub fn len(&self) -> usize {
        self.groups.values().map(|g| g.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn names(&self, ty: ResourceType) -> Vec<String> {
        let mut names: Vec<String> = self
            .groups
            .get(&ty)
            .map(|g| g.entries.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn resources(&self, ty: ResourceType) -> Vec<Arc<dyn Resource>> {
        self.groups
            .get(&ty)
            .map(|g| g.entries.values().map(|e| e.resource.clone()).collect())
            .unwrap_or_default()
    }

    /// Recompute a group's memory use, then evict until it fits its budget.
    ///
    /// Each step removes the entry with the largest use timer.  Entries with a zero timer are in use and never
    /// evicted; if only those remain, the group stays over budget.
    pub fn update_group(&mut self, ty: ResourceType) -> EvictionOutcome {
        let now = self.now_ms();
        let group = match self.groups.get_mut(&ty) {
            Some(g) => g,
            None => return Default::default(),
        };
        group.recompute_memory_use();

        let mut outcome = EvictionOutcome::default();
        while group.memory_budget > 0 && group.memory_use > group.memory_budget {
            let coldest = group
                .entries
                .iter()
                .map(|(n, e)| (e.use_timer(now), n))
                .filter(|(t, _)| *t > 0)
                .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(a.1)))
                .map(|(_, n)| n.clone());
            match coldest {
                Some(name) => {
                    tracing::debug!(resource_type = %ty, "Evicting {}", name);
                    group.remove(&name);
                    outcome.evicted += 1;
                }
                None => {
                    tracing::warn!(
                        resource_type = %ty,
                        memory_use = group.memory_use,
                        budget = group.memory_budget,
                        "Memory budget exceeded with no evictable resources"
                    );
                    outcome.over_budget = true;
                    break;
                }
            }
        }
        outcome
    }

    /// A human-readable per-type table of counts and memory use.
    pub fn memory_report(&self) -> String {
        let mut types: Vec<_> = self.groups.iter().collect();
        types.sort_by_key(|(t, _)| **t);

        let mut out = String::new();
        for (ty, group) in types {
            let count = group.entries.len() as u64;
            let largest = group.entries.values().map(|e| e.memory_use).max().unwrap_or(0);
            let average = if count > 0 { group.memory_use / count } else { 0 };
            // Writing to a String can't fail.
            let _ = writeln!(
                out,
                "{:<24} count {:>6}  avg {:>10}  max {:>10}  budget {:>12}  use {:>12}",
                ty.name(),
                count,
                average,
                largest,
                group.memory_budget,
                group.memory_use
            );
        }
        let _ = writeln!(out, "{:<24} total memory use {}", "", self.total_memory_use());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    use crate::test_support::*;

    const SOUND: ResourceType = ResourceType::new("Sound");

    fn registry() -> (Arc<ManualClock>, ResourceRegistry) {
        let clock = Arc::new(ManualClock::default());
        (clock.clone(), ResourceRegistry::new(clock))
    }

    #[test]
    fn test_basic_ops() {
        let (_, mut reg) = registry();
        reg.add_manual(MESH, "a", blob("a", 10)).unwrap();
        reg.add_manual(SOUND, "a", blob("a", 5)).unwrap();
        assert!(matches!(reg.add_manual(MESH, "", blob("x", 1)), Err(ResourceError::EmptyName)));

        assert_eq!(reg.memory_use(MESH), 10);
        assert_eq!(reg.total_memory_use(), 15);
        assert_eq!(reg.types_with("a"), vec![MESH, SOUND]);
        assert!(reg.get(MESH, "a").is_some());
        assert!(reg.get(MESH, "b").is_none());

        // Replacing keeps the accounting straight.
        let old = reg.insert(MESH, "a", blob("a2", 3)).expect("Should replace");
        assert_eq!(old.memory_use(), 10);
        assert_eq!(reg.memory_use(MESH), 3);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_use_timer() {
        let (clock, mut reg) = registry();
        reg.add_manual(MESH, "a", blob("a", 1)).unwrap();
        clock.advance(50);
        assert_eq!(reg.use_timer(MESH, "a"), Some(50));

        // Holding it makes it in use.
        let held = reg.get(MESH, "a").unwrap();
        clock.advance(50);
        assert_eq!(reg.use_timer(MESH, "a"), Some(0));
        drop(held);
        // Access reset the timer.
        assert_eq!(reg.use_timer(MESH, "a"), Some(50));
    }

    #[test]
    fn test_eviction_picks_coldest() {
        let (clock, mut reg) = registry();
        reg.set_memory_budget(MESH, 30);
        for name in &["old", "mid", "new"] {
            reg.add_manual(MESH, name, blob(name, 10)).unwrap();
            clock.advance(10);
        }
        assert_eq!(reg.memory_use(MESH), 30);

        let outcome = reg.add_manual(MESH, "newest", blob("newest", 10)).unwrap();
        assert_eq!(outcome, EvictionOutcome { evicted: 1, over_budget: false });
        assert_eq!(reg.names(MESH), vec!["mid", "new", "newest"]);

        // Touching "mid" makes "new" the coldest.
        clock.advance(10);
        reg.get(MESH, "mid");
        clock.advance(1);
        reg.set_memory_budget(MESH, 20);
        assert_eq!(reg.names(MESH), vec!["mid", "newest"]);
    }

    #[test]
    fn test_in_use_is_never_evicted() {
        let (clock, mut reg) = registry();
        reg.add_manual(MESH, "a", blob("a", 10)).unwrap();
        reg.add_manual(MESH, "b", blob("b", 10)).unwrap();
        let a = reg.get(MESH, "a").unwrap();
        let b = reg.get(MESH, "b").unwrap();
        clock.advance(100);

        let outcome = reg.set_memory_budget(MESH, 5);
        assert_eq!(outcome, EvictionOutcome { evicted: 0, over_budget: true });
        assert_eq!(reg.len(), 2);

        drop(b);
        let outcome = reg.update_group(MESH);
        assert_eq!(outcome, EvictionOutcome { evicted: 1, over_budget: true });
        assert_eq!(reg.names(MESH), vec!["a"]);
        drop(a);
    }

    /// A just-touched resource has a zero timer, which also exempts it.
    #[test]
    fn test_fresh_resources_are_exempt() {
        let (_, mut reg) = registry();
        reg.set_memory_budget(MESH, 5);
        let outcome = reg.add_manual(MESH, "a", blob("a", 10)).unwrap();
        assert!(outcome.over_budget);
        assert!(reg.contains(MESH, "a"));
    }

    #[test]
    fn test_memory_use_follows_resources() {
        let (_, mut reg) = registry();
        let r = Arc::new(TestResource::new("grow", 4));
        reg.add_manual(MESH, "grow", r.clone()).unwrap();
        r.set_size(40);
        assert_eq!(reg.memory_use(MESH), 4);
        reg.update_group(MESH);
        assert_eq!(reg.memory_use(MESH), 40);
    }

    #[test]
    fn test_releases() {
        let (_, mut reg) = registry();
        for name in &["Textures/a.png", "Textures/b.png", "Models/c.mdl"] {
            reg.add_manual(MESH, name, blob(name, 1)).unwrap();
        }
        reg.add_manual(SOUND, "Textures/s.wav", blob("s", 1)).unwrap();
        let held = reg.get(MESH, "Textures/a.png").unwrap();

        assert!(!reg.release(MESH, "Textures/a.png", false));
        assert!(!reg.release(MESH, "missing", true));
        assert_eq!(reg.release_partial(Some(MESH), "Textures/", false), 1);
        assert_eq!(reg.names(MESH), vec!["Models/c.mdl", "Textures/a.png"]);

        assert_eq!(reg.release_partial(None, "Textures/", true), 2);
        assert_eq!(reg.names(SOUND), Vec::<String>::new());

        assert_eq!(reg.release_type(MESH, false), 1);
        assert!(reg.is_empty());
        assert_eq!(reg.memory_use(MESH), 0);
        drop(held);
    }

    /// One resource holding another only frees the inner one on a later pass.
    #[test]
    fn test_release_all_repeats() {
        let (_, mut reg) = registry();
        let inner = blob("inner", 1);
        let outer = Arc::new(TestResource::holding("outer", 1, inner.clone()));
        reg.add_manual(MESH, "inner", inner).unwrap();
        reg.add_manual(MESH, "outer", outer).unwrap();

        assert_eq!(reg.release_all(false), 2);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_release_all_force() {
        let (_, mut reg) = registry();
        reg.add_manual(MESH, "a", blob("a", 1)).unwrap();
        let _held = reg.get(MESH, "a").unwrap();
        assert_eq!(reg.release_all(false), 0);
        assert_eq!(reg.release_all(true), 1);
    }

    #[test]
    fn test_memory_report() {
        let (_, mut reg) = registry();
        reg.add_manual(MESH, "a", blob("a", 10)).unwrap();
        reg.add_manual(MESH, "b", blob("b", 30)).unwrap();
        reg.set_memory_budget(SOUND, 99);
        let report = reg.memory_report();
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Mesh"));
        assert!(lines[0].contains("count      2"));
        assert!(lines[0].contains("avg         20"));
        assert!(lines[1].starts_with("Sound"));
        assert!(lines[2].ends_with("total memory use 40"));
    }

    #[derive(Clone, Copy, Debug)]
    enum Command {
        Add(u8, u64),
        Get(u8),
        Hold(u8),
        Drop(u8),
        Advance(u64),
        Release(u8),
        Budget(u64),
    }

    fn command_strat() -> impl Strategy<Value = Command> {
        prop_oneof![
            (0..8u8, 1..50u64).prop_map(|(k, s)| Command::Add(k, s)),
            (0..8u8).prop_map(Command::Get),
            (0..8u8).prop_map(Command::Hold),
            (0..8u8).prop_map(Command::Drop),
            (0..100u64).prop_map(Command::Advance),
            (0..8u8).prop_map(Command::Release),
            (0..200u64).prop_map(Command::Budget),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 500,
            ..Default::default()
        })]
        #[test]
        fn test_eviction_invariants(commands in prop::collection::vec(command_strat(), 0..200)) {
            let (clock, mut reg) = registry();
            let mut held: HashMap<String, Arc<dyn Resource>> = HashMap::new();

            for c in commands {
                let in_use_before: Vec<String> = reg
                    .names(MESH)
                    .into_iter()
                    .filter(|n| reg.use_timer(MESH, n) == Some(0))
                    .collect();

                let mut ran_pass = true;
                match c {
                    Command::Add(k, s) => {
                        let name = k.to_string();
                        held.remove(&name);
                        reg.add_manual(MESH, &name, blob(&name, s)).unwrap();
                    }
                    Command::Budget(b) => {
                        reg.set_memory_budget(MESH, b);
                    }
                    Command::Get(k) => {
                        reg.get(MESH, &k.to_string());
                        ran_pass = false;
                    }
                    Command::Hold(k) => {
                        if let Some(r) = reg.get(MESH, &k.to_string()) {
                            held.insert(k.to_string(), r);
                        }
                        ran_pass = false;
                    }
                    Command::Drop(k) => {
                        held.remove(&k.to_string());
                        ran_pass = false;
                    }
                    Command::Advance(ms) => {
                        clock.advance(ms);
                        ran_pass = false;
                    }
                    Command::Release(k) => {
                        let name = k.to_string();
                        let was_held = held.contains_key(&name);
                        let released = reg.release(MESH, &name, false);
                        prop_assert!(!(released && was_held));
                        ran_pass = false;
                    }
                }

                if ran_pass {
                    // Nothing that had a zero timer before the pass was evicted by it.  A replaced key is a new
                    // resource, so it's exempt from this check.
                    for n in &in_use_before {
                        if let Command::Add(k, _) = c {
                            if *n == k.to_string() {
                                continue;
                            }
                        }
                        prop_assert!(reg.contains(MESH, n), "{} was evicted while in use", n);
                    }

                    let budget = reg.memory_budget(MESH);
                    let now = reg.now_ms();
                    let all_exempt = reg
                        .names(MESH)
                        .iter()
                        .all(|n| reg.peek(MESH, n).map_or(true, |e| e.use_timer(now) == 0));
                    prop_assert!(budget == 0 || reg.memory_use(MESH) <= budget || all_exempt);
                }

                let expected: u64 = reg.resources(MESH).iter().map(|r| r.memory_use()).sum();
                prop_assert_eq!(reg.memory_use(MESH), expected);
            }
        }
    }
}
