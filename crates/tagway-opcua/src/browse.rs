// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Address space browsing over an [`OpcUaTransport`].
//!
//! Two consumers share this module:
//!
//! - [`TransportBrowser`] feeds the core `PathResolver` one page at a time.
//! - [`NodeBrowser`] answers the `Browse` and `Schema` bus operations and
//!   drains continuation points itself.
//!
//! Both follow hierarchical references only (`Organizes`, `HasComponent`,
//! `HasProperty`) and see objects and variables only.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tagway_core::{
    AddressSpaceBrowser, BrowseChild, BrowseEntry, BrowsePage, DriverError, DriverResult,
    NodeKind, SchemaNode,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::transport::OpcUaTransport;
use crate::types::{
    root_alias, BrowseDirection, BrowseResult, NodeClass, NodeId, ReferenceDescription,
    OBJECTS_AND_VARIABLES,
};

/// Browse items between progress checks.
const PROGRESS_CHECK_INTERVAL: usize = 1000;

/// Minimum time between progress log lines.
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(1);

fn parse_node(node_id: &str) -> DriverResult<NodeId> {
    node_id
        .parse()
        .map_err(|e: crate::error::OpcUaError| DriverError::browse(node_id, e.to_string()))
}

// =============================================================================
// TransportBrowser
// =============================================================================

/// Page-wise browser for path resolution.
pub struct TransportBrowser<T> {
    transport: Arc<T>,
}

impl<T> TransportBrowser<T> {
    /// Creates a browser over a shared transport.
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }
}

impl<T: OpcUaTransport> TransportBrowser<T> {
    fn to_page(node: &str, result: BrowseResult) -> DriverResult<BrowsePage> {
        if result.status.is_bad() {
            return Err(DriverError::browse(node, result.status.name()));
        }
        let children = result
            .references
            .into_iter()
            .filter(ReferenceDescription::is_hierarchical)
            .filter_map(|r| {
                let kind = match r.node_class {
                    NodeClass::Object => NodeKind::Object,
                    NodeClass::Variable => NodeKind::Variable,
                    _ => return None,
                };
                Some(BrowseChild {
                    node_id: r.node_id.to_opc_string(),
                    browse_name: r.browse_name,
                    kind,
                })
            })
            .collect();
        Ok(BrowsePage {
            children,
            continuation: result.continuation_point,
        })
    }
}

#[async_trait]
impl<T: OpcUaTransport> AddressSpaceBrowser for TransportBrowser<T> {
    async fn browse(&self, node_id: &str) -> DriverResult<BrowsePage> {
        let node = parse_node(node_id)?;
        let result = self
            .transport
            .browse(&node, BrowseDirection::Forward, OBJECTS_AND_VARIABLES)
            .await?;
        Self::to_page(node_id, result)
    }

    async fn browse_next(&self, continuation: &str) -> DriverResult<BrowsePage> {
        let result = self.transport.browse_next(continuation).await?;
        Self::to_page(continuation, result)
    }

    fn root_alias(&self, segment: &str) -> Option<String> {
        root_alias(segment).map(|node| node.to_opc_string())
    }
}

// =============================================================================
// NodeBrowser
// =============================================================================

struct Progress {
    started: Instant,
    last_log: Instant,
    count: usize,
}

impl Progress {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last_log: now,
            count: 0,
        }
    }

    fn tick(&mut self) {
        self.count += 1;
        if self.count % PROGRESS_CHECK_INTERVAL == 0 && self.last_log.elapsed() > PROGRESS_LOG_INTERVAL {
            self.last_log = Instant::now();
            info!(items = self.count, "Browsed items...");
        }
    }

    fn finish(&self) {
        let elapsed = self.started.elapsed();
        if elapsed > PROGRESS_LOG_INTERVAL {
            let rate = self.count as f64 / elapsed.as_secs_f64();
            info!(items = self.count, elapsed_ms = elapsed.as_millis() as u64, rate, "Browse finished");
        }
    }
}

/// Browser for the `Browse` and `Schema` operations.
pub struct NodeBrowser<T> {
    transport: Arc<T>,
}

type TreeFuture<'a> = Pin<Box<dyn Future<Output = Vec<SchemaNode>> + Send + 'a>>;

impl<T: OpcUaTransport> NodeBrowser<T> {
    /// Creates a browser over a shared transport.
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    /// Browses every hierarchical reference of a node, draining all pages.
    async fn references(
        &self,
        node: &NodeId,
        direction: BrowseDirection,
        progress: &mut Progress,
    ) -> DriverResult<Vec<ReferenceDescription>> {
        let mut page = self
            .transport
            .browse(node, direction, OBJECTS_AND_VARIABLES)
            .await?;
        let mut references = Vec::new();

        loop {
            if page.status.is_bad() {
                return Err(DriverError::browse(node.to_opc_string(), page.status.name()));
            }
            for reference in page.references {
                if reference.is_hierarchical() {
                    progress.tick();
                    references.push(reference);
                }
            }
            match page.continuation_point {
                Some(point) => page = self.transport.browse_next(&point).await?,
                None => break,
            }
        }
        Ok(references)
    }

    /// Browses one level below a node, or its inverse references up to the root.
    pub async fn browse(&self, node_id: &str, reverse: bool) -> DriverResult<Vec<BrowseEntry>> {
        let start = parse_node(node_id)?;
        let mut progress = Progress::new();

        if !reverse {
            let references = self
                .references(&start, BrowseDirection::Forward, &mut progress)
                .await?;
            progress.finish();
            return Ok(references
                .into_iter()
                .map(|r| entry(r, String::new()))
                .collect());
        }

        let mut entries = Vec::new();
        let mut visited = HashSet::from([start.clone()]);
        let mut pending = vec![(start, String::new())];

        while let Some((node, path)) = pending.pop() {
            let parents = match self.references(&node, BrowseDirection::Inverse, &mut progress).await {
                Ok(parents) => parents,
                Err(e) if entries.is_empty() => return Err(e),
                Err(e) => {
                    warn!(node = %node, error = %e, "Inverse browse failed");
                    continue;
                }
            };
            for parent in parents {
                let parent_path = format!("{}{}/", path, parent.browse_name);
                if parent.node_class == NodeClass::Object && visited.insert(parent.node_id.clone()) {
                    pending.push((parent.node_id.clone(), parent_path));
                }
                entries.push(entry(parent, path.clone()));
            }
        }

        progress.finish();
        Ok(entries)
    }

    /// Browses the full subtree below each node.
    pub async fn schema(&self, node_ids: &[String]) -> DriverResult<Vec<SchemaNode>> {
        let mut schema = Vec::with_capacity(node_ids.len());
        for node_id in node_ids {
            let node = parse_node(node_id)?;
            let attributes = self.transport.read_attributes(&node).await?;
            info!(node = %node, "Schema browse started");

            let mut progress = Progress::new();
            let mut visited = HashSet::from([node.clone()]);
            let nodes = self.tree(node, &mut visited, &mut progress).await;
            progress.finish();

            schema.push(SchemaNode {
                browse_name: attributes.browse_name,
                display_name: attributes.display_name,
                node_id: attributes.node_id.to_opc_string(),
                node_class: attributes.node_class.to_string(),
                data_type: attributes.data_type.map(|t| t.to_opc_string()),
                nodes,
            });
        }
        Ok(schema)
    }

    fn tree<'a>(
        &'a self,
        node: NodeId,
        visited: &'a mut HashSet<NodeId>,
        progress: &'a mut Progress,
    ) -> TreeFuture<'a> {
        Box::pin(async move {
            let references = match self.references(&node, BrowseDirection::Forward, progress).await {
                Ok(references) => references,
                Err(e) => {
                    warn!(node = %node, error = %e, "Browse failed, subtree skipped");
                    return Vec::new();
                }
            };

            let mut nodes = Vec::with_capacity(references.len());
            for reference in references {
                let children = if reference.node_class == NodeClass::Object
                    && visited.insert(reference.node_id.clone())
                {
                    self.tree(reference.node_id.clone(), visited, progress).await
                } else {
                    Vec::new()
                };
                nodes.push(SchemaNode {
                    browse_name: reference.browse_name,
                    display_name: reference.display_name,
                    node_id: reference.node_id.to_opc_string(),
                    node_class: reference.node_class.to_string(),
                    data_type: None,
                    nodes: children,
                });
            }
            debug!(node = %node, children = nodes.len(), "Schema level browsed");
            nodes
        })
    }
}

fn entry(reference: ReferenceDescription, path: String) -> BrowseEntry {
    BrowseEntry {
        browse_path: format!("{}{}", path, reference.browse_name),
        browse_name: reference.browse_name,
        display_name: reference.display_name,
        node_id: reference.node_id.to_opc_string(),
        node_class: reference.node_class.to_string(),
        reference_type: reference.reference_type,
    }
}
