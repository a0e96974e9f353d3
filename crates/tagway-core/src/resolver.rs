// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Wildcard path resolution over a browsable address space.
//!
//! A Path topic such as `Objects/+/Temperature` names a set of concrete
//! leaves. [`PathResolver`] walks the backend address space one level per
//! segment and returns the matching leaves with their full browse paths.
//!
//! # Segment tokens
//!
//! | Token | Filter | Descends into objects |
//! |-------|--------|-----------------------|
//! | literal | exact browse name | yes, next segment |
//! | `+` | none | yes, next segment |
//! | `#` | none | no, variables only |
//!
//! The first segment is a root alias (`Objects`, `$objects`, ...) that the
//! browser maps to its well-known root node.
//!
//! Results are cached per path in a [`PathCache`] bounded by size and access
//! expiry.

use std::collections::{HashSet, VecDeque};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::DriverResult;
use crate::topic::{split_path, PathSegment};

/// Number of browsed children between progress checks.
const PROGRESS_CHECK_INTERVAL: u64 = 1000;

/// Minimum time between two progress log lines.
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Resolutions slower than this are logged as warnings.
const SLOW_RESOLUTION: Duration = Duration::from_millis(100);

// =============================================================================
// ResolvedNode
// =============================================================================

/// A concrete leaf produced by resolving a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedNode {
    /// Backend identifier of the leaf.
    pub node_id: String,
    /// Matched browse names joined with `/`.
    pub browse_path: String,
}

impl ResolvedNode {
    /// Creates a resolved node.
    pub fn new(node_id: impl Into<String>, browse_path: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            browse_path: browse_path.into(),
        }
    }
}

// =============================================================================
// Browser Abstraction
// =============================================================================

/// Structural role of a browsed child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// A container that may have children.
    Object,
    /// A value-bearing leaf.
    Variable,
    /// Anything else. Ignored by resolution.
    Other,
}

/// One child reference returned by a browse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseChild {
    /// Backend identifier of the child.
    pub node_id: String,
    /// Browse name used for segment matching.
    pub browse_name: String,
    /// Structural role.
    pub kind: NodeKind,
}

impl BrowseChild {
    /// Creates an object child.
    pub fn object(node_id: impl Into<String>, browse_name: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            browse_name: browse_name.into(),
            kind: NodeKind::Object,
        }
    }

    /// Creates a variable child.
    pub fn variable(node_id: impl Into<String>, browse_name: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            browse_name: browse_name.into(),
            kind: NodeKind::Variable,
        }
    }
}

/// One page of browse results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrowsePage {
    /// Children on this page.
    pub children: Vec<BrowseChild>,
    /// Cursor for the next page, `None` on the last page.
    pub continuation: Option<String>,
}

impl BrowsePage {
    /// Creates a final page.
    pub fn last(children: Vec<BrowseChild>) -> Self {
        Self {
            children,
            continuation: None,
        }
    }

    /// Creates a page followed by more results.
    pub fn more(children: Vec<BrowseChild>, continuation: impl Into<String>) -> Self {
        Self {
            children,
            continuation: Some(continuation.into()),
        }
    }
}

/// Forward hierarchical browsing, restricted to objects and variables.
#[async_trait]
pub trait AddressSpaceBrowser: Send + Sync {
    /// Browses the children of a node. Returns the first page.
    async fn browse(&self, node_id: &str) -> DriverResult<BrowsePage>;

    /// Fetches the page following a continuation point.
    async fn browse_next(&self, continuation: &str) -> DriverResult<BrowsePage>;

    /// Maps a first path segment to the backend's root identifier.
    ///
    /// Returns `None` when the segment is not an alias, in which case it is
    /// used as a literal node identifier.
    fn root_alias(&self, segment: &str) -> Option<String> {
        let _ = segment;
        None
    }
}

// =============================================================================
// PathCache
// =============================================================================

struct CacheEntry {
    leaves: Vec<ResolvedNode>,
    last_access: Instant,
}

/// Resolved path cache bounded by entry count and access expiry.
///
/// An entry that has not been read for `expire_after` is dropped on its next
/// lookup. Entries are never invalidated otherwise.
pub struct PathCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    expire_after: Duration,
}

impl PathCache {
    /// Default maximum number of cached paths.
    pub const DEFAULT_MAXIMUM_SIZE: usize = 1000;

    /// Default access expiry.
    pub const DEFAULT_EXPIRE_AFTER: Duration = Duration::from_secs(60);

    /// Creates a cache.
    pub fn new(maximum_size: usize, expire_after: Duration) -> Self {
        let capacity = NonZeroUsize::new(maximum_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            expire_after,
        }
    }

    /// Returns the cached leaves for a path and refreshes its access time.
    pub fn get(&self, path: &str) -> Option<Vec<ResolvedNode>> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        let expired = match entries.get_mut(path) {
            Some(entry) if now.duration_since(entry.last_access) < self.expire_after => {
                entry.last_access = now;
                return Some(entry.leaves.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(path);
        }
        None
    }

    /// Stores the leaves for a path.
    pub fn put(&self, path: impl Into<String>, leaves: Vec<ResolvedNode>) {
        self.entries.lock().put(
            path.into(),
            CacheEntry {
                leaves,
                last_access: Instant::now(),
            },
        );
    }

    /// Returns the number of cached paths, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for PathCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAXIMUM_SIZE, Self::DEFAULT_EXPIRE_AFTER)
    }
}

impl std::fmt::Debug for PathCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathCache")
            .field("len", &self.len())
            .field("expire_after", &self.expire_after)
            .finish()
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Resolver counters.
#[derive(Debug, Default)]
pub struct ResolverStats {
    resolutions: AtomicU64,
    cache_hits: AtomicU64,
    browse_calls: AtomicU64,
    browse_errors: AtomicU64,
    leaves: AtomicU64,
}

impl ResolverStats {
    /// Returns a point-in-time copy of the counters.
    pub fn snapshot(&self) -> ResolverStatsSnapshot {
        ResolverStatsSnapshot {
            resolutions: self.resolutions.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            browse_calls: self.browse_calls.load(Ordering::Relaxed),
            browse_errors: self.browse_errors.load(Ordering::Relaxed),
            leaves: self.leaves.load(Ordering::Relaxed),
        }
    }
}

/// Copy of [`ResolverStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolverStatsSnapshot {
    /// Calls to `resolve`.
    pub resolutions: u64,
    /// Resolutions answered from the cache.
    pub cache_hits: u64,
    /// Backend browse and browse-next calls.
    pub browse_calls: u64,
    /// Browse calls that failed.
    pub browse_errors: u64,
    /// Leaves produced by uncached resolutions.
    pub leaves: u64,
}

// =============================================================================
// PathResolver
// =============================================================================

struct Progress {
    items: u64,
    last_log: Instant,
}

impl Progress {
    fn new() -> Self {
        Self {
            items: 0,
            last_log: Instant::now(),
        }
    }

    fn record(&mut self, path: &str, count: usize) {
        let before = self.items / PROGRESS_CHECK_INTERVAL;
        self.items += count as u64;
        if self.items / PROGRESS_CHECK_INTERVAL == before {
            return;
        }
        let now = Instant::now();
        if now.duration_since(self.last_log) >= PROGRESS_LOG_INTERVAL {
            self.last_log = now;
            info!(path, items = self.items, "Browsing address space");
        }
    }
}

/// Resolves wildcard paths to leaves through an [`AddressSpaceBrowser`].
pub struct PathResolver<B> {
    browser: B,
    cache: PathCache,
    stats: ResolverStats,
}

impl<B: AddressSpaceBrowser> PathResolver<B> {
    /// Creates a resolver with a default cache.
    pub fn new(browser: B) -> Self {
        Self::with_cache(browser, PathCache::default())
    }

    /// Creates a resolver with the given cache.
    pub fn with_cache(browser: B, cache: PathCache) -> Self {
        Self {
            browser,
            cache,
            stats: ResolverStats::default(),
        }
    }

    /// Returns the browser.
    pub fn browser(&self) -> &B {
        &self.browser
    }

    /// Returns the cache.
    pub fn cache(&self) -> &PathCache {
        &self.cache
    }

    /// Returns the counters.
    pub fn stats(&self) -> &ResolverStats {
        &self.stats
    }

    /// Resolves a path to its leaves.
    ///
    /// Browse failures are logged and yield whatever was found on the other
    /// branches. They are never returned as errors.
    pub async fn resolve(&self, path: &str) -> Vec<ResolvedNode> {
        self.stats.resolutions.fetch_add(1, Ordering::Relaxed);
        if let Some(leaves) = self.cache.get(path) {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            return leaves;
        }

        let started = Instant::now();
        let leaves = self.find(path).await;
        let elapsed = started.elapsed();
        if elapsed > SLOW_RESOLUTION {
            warn!(
                path,
                leaves = leaves.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Slow path resolution"
            );
        } else {
            debug!(path, leaves = leaves.len(), "Path resolved");
        }

        self.stats.leaves.fetch_add(leaves.len() as u64, Ordering::Relaxed);
        self.cache.put(path, leaves.clone());
        leaves
    }

    async fn find(&self, path: &str) -> Vec<ResolvedNode> {
        let raw = split_path(path);
        let segments: Vec<PathSegment> = raw.iter().map(|s| PathSegment::parse(s)).collect();
        let raw_root = raw.into_iter().next().unwrap_or_default();
        if segments.len() < 2 {
            debug!(path, "Path has no segments below its root");
            return Vec::new();
        }

        let root = self
            .browser
            .root_alias(&raw_root)
            .unwrap_or_else(|| raw_root.clone());

        let mut leaves = Vec::new();
        let mut visited: HashSet<(String, usize)> = HashSet::new();
        let mut pending: VecDeque<(String, usize, String)> = VecDeque::new();
        let mut progress = Progress::new();
        pending.push_back((root, 1, raw_root));

        while let Some((node_id, idx, prefix)) = pending.pop_front() {
            if !visited.insert((node_id.clone(), idx)) {
                continue;
            }

            let segment = &segments[idx];
            let is_last = idx + 1 == segments.len();
            let next_idx = if is_last || *segment == PathSegment::AllDescendants {
                idx
            } else {
                idx + 1
            };

            let children = self.browse_all(&node_id, path, &mut progress).await;
            let mut matched = 0usize;
            for child in children.into_iter().filter(|c| segment.matches(&c.browse_name)) {
                let child_path = format!("{}/{}", prefix, child.browse_name);
                match child.kind {
                    NodeKind::Variable => {
                        matched += 1;
                        leaves.push(ResolvedNode::new(child.node_id, child_path));
                    }
                    NodeKind::Object if *segment != PathSegment::AllDescendants => {
                        matched += 1;
                        pending.push_back((child.node_id, next_idx, child_path));
                    }
                    NodeKind::Object | NodeKind::Other => {}
                }
            }

            if matched == 0 {
                debug!(path, node = %node_id, segment = %segment, "No children match segment");
            }
        }

        leaves
    }

    /// Browses a node and drains every continuation page.
    async fn browse_all(&self, node_id: &str, path: &str, progress: &mut Progress) -> Vec<BrowseChild> {
        let mut children = Vec::new();

        self.stats.browse_calls.fetch_add(1, Ordering::Relaxed);
        let mut page = match self.browser.browse(node_id).await {
            Ok(page) => page,
            Err(e) => {
                self.stats.browse_errors.fetch_add(1, Ordering::Relaxed);
                warn!(path, node = node_id, error = %e, "Browse failed");
                return children;
            }
        };

        loop {
            progress.record(path, page.children.len());
            children.append(&mut page.children);

            let Some(continuation) = page.continuation.take() else {
                break;
            };
            self.stats.browse_calls.fetch_add(1, Ordering::Relaxed);
            page = match self.browser.browse_next(&continuation).await {
                Ok(next) => next,
                Err(e) => {
                    self.stats.browse_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(path, node = node_id, error = %e, "Browse continuation failed");
                    break;
                }
            };
        }

        children
    }
}

impl<B> std::fmt::Debug for PathResolver<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathResolver")
            .field("cache", &self.cache)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DriverError;
    use std::collections::HashMap;

    /// In-memory tree keyed by node id, paged by `page_size`.
    struct TreeBrowser {
        children: HashMap<String, Vec<BrowseChild>>,
        page_size: usize,
        calls: AtomicU64,
        failing: HashSet<String>,
    }

    impl TreeBrowser {
        fn new(page_size: usize) -> Self {
            Self {
                children: HashMap::new(),
                page_size,
                calls: AtomicU64::new(0),
                failing: HashSet::new(),
            }
        }

        fn add(mut self, parent: &str, child: BrowseChild) -> Self {
            self.children.entry(parent.to_string()).or_default().push(child);
            self
        }

        fn page(&self, node_id: &str, offset: usize) -> BrowsePage {
            let all = self.children.get(node_id).cloned().unwrap_or_default();
            let end = (offset + self.page_size).min(all.len());
            let children = all[offset.min(all.len())..end].to_vec();
            if end < all.len() {
                BrowsePage::more(children, format!("{node_id}|{end}"))
            } else {
                BrowsePage::last(children)
            }
        }
    }

    #[async_trait]
    impl AddressSpaceBrowser for TreeBrowser {
        async fn browse(&self, node_id: &str) -> DriverResult<BrowsePage> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.failing.contains(node_id) {
                return Err(DriverError::browse(node_id, "BadNodeIdUnknown"));
            }
            Ok(self.page(node_id, 0))
        }

        async fn browse_next(&self, continuation: &str) -> DriverResult<BrowsePage> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            let (node_id, offset) = continuation
                .rsplit_once('|')
                .ok_or_else(|| DriverError::protocol("bad continuation"))?;
            let offset = offset.parse().map_err(|_| DriverError::protocol("bad offset"))?;
            Ok(self.page(node_id, offset))
        }

        fn root_alias(&self, segment: &str) -> Option<String> {
            match segment.trim_start_matches('$').to_ascii_lowercase().as_str() {
                "objects" => Some("i=85".to_string()),
                _ => None,
            }
        }
    }

    fn plant() -> TreeBrowser {
        TreeBrowser::new(100)
            .add("i=85", BrowseChild::object("plc1", "PLC1"))
            .add("i=85", BrowseChild::object("plc2", "PLC2"))
            .add("plc1", BrowseChild::variable("plc1.tag1", "Tag1"))
            .add("plc1", BrowseChild::variable("plc1.tag2", "Tag2"))
            .add("plc1", BrowseChild::object("plc1.sub", "Sub"))
            .add("plc1.sub", BrowseChild::variable("plc1.sub.deep", "Deep"))
            .add("plc2", BrowseChild::variable("plc2.tag1", "Tag1"))
    }

    fn paths(mut leaves: Vec<ResolvedNode>) -> Vec<String> {
        leaves.sort_by(|a, b| a.browse_path.cmp(&b.browse_path));
        leaves.into_iter().map(|l| l.browse_path).collect()
    }

    #[tokio::test]
    async fn test_hash_takes_variables_only() {
        let resolver = PathResolver::new(plant());
        let leaves = resolver.resolve("Objects/PLC1/#").await;

        assert_eq!(paths(leaves.clone()), vec!["Objects/PLC1/Tag1", "Objects/PLC1/Tag2"]);
        assert!(leaves.iter().all(|l| l.node_id != "plc1.sub.deep"));
    }

    #[tokio::test]
    async fn test_plus_matches_every_sibling() {
        let resolver = PathResolver::new(plant());
        let leaves = resolver.resolve("Objects/+/Tag1").await;

        assert_eq!(paths(leaves), vec!["Objects/PLC1/Tag1", "Objects/PLC2/Tag1"]);
    }

    #[tokio::test]
    async fn test_literal_path_to_single_leaf() {
        let resolver = PathResolver::new(plant());
        let leaves = resolver.resolve("$objects/PLC2/Tag1").await;

        assert_eq!(leaves, vec![ResolvedNode::new("plc2.tag1", "$objects/PLC2/Tag1")]);
    }

    #[tokio::test]
    async fn test_unmatched_segment_is_empty() {
        let resolver = PathResolver::new(plant());
        assert!(resolver.resolve("Objects/PLC9/#").await.is_empty());
        assert!(resolver.resolve("Objects").await.is_empty());
    }

    #[tokio::test]
    async fn test_continuation_pages_are_drained() {
        let mut browser = TreeBrowser::new(3);
        for n in 0..10 {
            browser = browser.add("i=85", BrowseChild::variable(format!("v{n}"), format!("V{n}")));
        }
        let resolver = PathResolver::new(browser);

        let leaves = resolver.resolve("Objects/#").await;
        assert_eq!(leaves.len(), 10);
        assert_eq!(resolver.browser().calls.load(Ordering::Relaxed), 4);
    }

    #[tokio::test]
    async fn test_browse_failure_keeps_other_branches() {
        let mut browser = plant();
        browser.failing.insert("plc1".to_string());
        let resolver = PathResolver::new(browser);

        let leaves = resolver.resolve("Objects/+/Tag1").await;
        assert_eq!(paths(leaves), vec!["Objects/PLC2/Tag1"]);
        assert_eq!(resolver.stats().snapshot().browse_errors, 1);
    }

    #[tokio::test]
    async fn test_repeat_resolution_hits_cache() {
        let resolver = PathResolver::new(plant());

        let first = resolver.resolve("Objects/+/Tag1").await;
        let calls = resolver.browser().calls.load(Ordering::Relaxed);
        let second = resolver.resolve("Objects/+/Tag1").await;

        assert_eq!(first, second);
        assert_eq!(resolver.browser().calls.load(Ordering::Relaxed), calls);
        assert_eq!(resolver.stats().snapshot().cache_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_entry_expires_after_idle() {
        let cache = PathCache::new(10, Duration::from_secs(60));
        cache.put("a/b", vec![ResolvedNode::new("n", "a/b")]);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get("a/b").is_some());

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get("a/b").is_some());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get("a/b").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_cache_evicts_least_recently_used() {
        let cache = PathCache::new(2, Duration::from_secs(60));
        cache.put("a", Vec::new());
        cache.put("b", Vec::new());
        assert!(cache.get("a").is_some());
        cache.put("c", Vec::new());

        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }
}
