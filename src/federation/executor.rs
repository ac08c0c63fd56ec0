//! Federating executor
//!
//! Runs one client request against the federated namespace.
//!
//! # Reads
//!
//! 1. The cache projection is consulted first. A cached node is served only
//!    while it carries an unexpired merge plan.
//! 2. On a miss the parent is resolved first (recursively, so missing
//!    ancestors land in the cache top-down); a parent that does not list the
//!    target proves the target absent.
//! 3. Every covering source projection is read, placeholders are added for
//!    projections whose regions lie below the target, and the contributions
//!    are merged in declaration order.
//! 4. The merged node is written back to the cache. Cache failures are
//!    logged and never fail the read.
//!
//! # Writes
//!
//! A write goes to the single writable projection that owns its target,
//! then the affected cache entries are invalidated.
//!
//! An executor owns every source connection it opens. They are closed when
//! it is dropped, on every exit path.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::connector::{
    ConnectionFactory, ConnectorError, NoOpListener, RepositoryConnection, RepositoryListener,
};
use crate::graph::{
    is_internal_property, CachePolicy, CopyBranchRequest, CreateNodeRequest, DeleteBranchRequest,
    ExecutionContext, MoveBranchRequest, Path, Properties, ReadAllChildrenRequest,
    ReadAllPropertiesRequest, ReadNodeRequest, Request, RequestError, UpdatePropertiesRequest,
    MERGE_PLAN_PROPERTY, UUID_PROPERTY,
};
use crate::lock::{InProcessLockProvider, LockProvider};
use crate::observability::{log_event_with_fields, Event, FederationMetrics};

use super::config::FederatedRepositoryConfig;
use super::errors::{FederationError, FederationResult};
use super::listeners::ForwardingListener;
use super::merge::{expiry_for, merge, Contribution, FederatedNode, MergePlan};
use super::projection::Projection;

/// Outcome of resolving one federated path
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found(FederatedNode),
    Missing { lowest_existing_ancestor: Option<Path> },
}

/// What the cache holds for a path
enum Cached {
    Fresh(FederatedNode),
    Stale(CachedEntry),
    Absent,
}

/// A cache entry that can no longer be served but still carries identity
struct CachedEntry {
    uuid: Option<Uuid>,
    properties: Properties,
}

/// Connections opened by one executor, closed together
struct SourceConnections {
    repository: String,
    open: BTreeMap<String, Box<dyn RepositoryConnection>>,
}

impl SourceConnections {
    fn new(repository: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            open: BTreeMap::new(),
        }
    }

    fn close_all(&mut self) {
        for (source_name, mut connection) in std::mem::take(&mut self.open) {
            if let Err(err) = connection.close() {
                let message = err.to_string();
                log_event_with_fields(
                    Event::SourceCloseFailed,
                    &[
                        ("repository", &self.repository),
                        ("source", &source_name),
                        ("code", err.code()),
                        ("error", &message),
                    ],
                );
            }
        }
    }
}

impl Drop for SourceConnections {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// Single-use executor bound to one configuration snapshot
pub struct FederatingExecutor {
    config: Arc<FederatedRepositoryConfig>,
    factory: Arc<dyn ConnectionFactory>,
    listener: Arc<dyn RepositoryListener>,
    metrics: Arc<FederationMetrics>,
    lock_provider: Arc<dyn LockProvider>,
    connections: SourceConnections,
    now: DateTime<Utc>,
}

impl FederatingExecutor {
    pub fn new(config: Arc<FederatedRepositoryConfig>, factory: Arc<dyn ConnectionFactory>) -> Self {
        let connections = SourceConnections::new(config.name());
        Self {
            config,
            factory,
            listener: NoOpListener::shared(),
            metrics: Arc::new(FederationMetrics::new()),
            lock_provider: Arc::new(InProcessLockProvider::new()),
            connections,
            now: Utc::now(),
        }
    }

    /// Receive source change events, translated into federated paths
    pub fn with_listener(mut self, listener: Arc<dyn RepositoryListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<FederationMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Provider serializing cache updates; executors of one repository must
    /// share it
    pub fn with_lock_provider(mut self, provider: Arc<dyn LockProvider>) -> Self {
        self.lock_provider = provider;
        self
    }

    pub fn config(&self) -> &FederatedRepositoryConfig {
        &self.config
    }

    /// Source connections currently held
    pub fn open_connections(&self) -> usize {
        self.connections.open.len()
    }

    /// Close every source connection now rather than on drop
    pub fn close(mut self) {
        self.connections.close_all();
    }

    /// Process `request` in place. Absent paths on reads are recorded on the
    /// request; everything else that goes wrong is returned.
    pub fn execute(&mut self, context: &ExecutionContext, request: &mut Request) -> FederationResult<()> {
        self.metrics.increment_requests_executed();
        let result = self.process(context, request);
        if let Err(err) = &result {
            self.metrics.increment_requests_failed();
            let message = err.to_string();
            let request_id = context.request_id.to_string();
            log_event_with_fields(
                Event::RequestFailed,
                &[
                    ("repository", self.config.name()),
                    ("request", request.name()),
                    ("request_id", &request_id),
                    ("code", err.code()),
                    ("error", &message),
                ],
            );
        }
        result
    }

    /// Resolve the node at `path`, through the cache when possible
    pub fn get_node(
        &mut self,
        context: &ExecutionContext,
        path: &Path,
        workspace: &str,
    ) -> FederationResult<Lookup> {
        let previous = match self.read_cache(context, path, workspace) {
            Cached::Fresh(node) => {
                self.metrics.increment_cache_hits();
                return Ok(Lookup::Found(node));
            }
            Cached::Stale(entry) => Some(entry),
            Cached::Absent => None,
        };
        self.metrics.increment_cache_misses();

        if let Some(parent) = path.parent() {
            match self.get_node(context, &parent, workspace)? {
                Lookup::Missing {
                    lowest_existing_ancestor,
                } => {
                    return Ok(Lookup::Missing {
                        lowest_existing_ancestor,
                    })
                }
                Lookup::Found(parent_node) if !parent_node.children.contains(path) => {
                    if previous.is_some() {
                        self.evict(context, path, workspace);
                    }
                    return Ok(Lookup::Missing {
                        lowest_existing_ancestor: Some(parent),
                    });
                }
                Lookup::Found(_) => {}
            }
        }

        let contributions = self.collect_contributions(context, path, workspace)?;
        if contributions.is_empty() {
            let path_text = path.to_string();
            log_event_with_fields(
                Event::ProjectionUnresolved,
                &[("repository", self.config.name()), ("path", &path_text)],
            );
        }

        let uuid = previous
            .as_ref()
            .and_then(|entry| entry.uuid)
            .unwrap_or_else(Uuid::new_v4);
        match merge(path, &contributions, uuid) {
            Some(mut node) => {
                self.update_cache(context, &mut node, workspace, previous.as_ref());
                Ok(Lookup::Found(node))
            }
            None => {
                if previous.is_some() {
                    self.evict(context, path, workspace);
                }
                Ok(Lookup::Missing {
                    lowest_existing_ancestor: path.parent(),
                })
            }
        }
    }

    fn process(&mut self, context: &ExecutionContext, request: &mut Request) -> FederationResult<()> {
        if let Request::Composite(composite) = request {
            for request in &mut composite.requests {
                self.process(context, request)?;
            }
            return Ok(());
        }

        let result = match request {
            Request::ReadNode(r) => self.read_node(context, r),
            Request::ReadAllChildren(r) => self.read_all_children(context, r),
            Request::ReadAllProperties(r) => self.read_all_properties(context, r),
            Request::CreateNode(r) => self.create_node(context, r),
            Request::UpdateProperties(r) => self.update_properties(context, r),
            Request::CopyBranch(r) => self.copy_branch(context, r),
            Request::MoveBranch(r) => self.move_branch(context, r),
            Request::DeleteBranch(r) => self.delete_branch(context, r),
            Request::Composite(_) => Ok(()),
        };
        if let Err(FederationError::Request { error, .. }) = &result {
            request.set_error(error.clone());
        }
        result
    }

    // =========================================================================
    // Reads
    // =========================================================================

    fn read_node(&mut self, context: &ExecutionContext, r: &mut ReadNodeRequest) -> FederationResult<()> {
        match self.get_node(context, &r.at, &r.workspace)? {
            Lookup::Found(node) => {
                r.actual_location = Some(node.location);
                r.uuid = Some(node.uuid);
                r.properties = node.properties;
                r.children = node.children;
                r.cache_policy = self.config.default_cache_policy();
            }
            Lookup::Missing {
                lowest_existing_ancestor,
            } => {
                r.error = Some(RequestError::PathNotFound {
                    path: r.at.clone(),
                    lowest_existing_ancestor,
                })
            }
        }
        Ok(())
    }

    fn read_all_children(
        &mut self,
        context: &ExecutionContext,
        r: &mut ReadAllChildrenRequest,
    ) -> FederationResult<()> {
        match self.get_node(context, &r.of, &r.workspace)? {
            Lookup::Found(node) => {
                r.actual_location = Some(node.location);
                r.children = node.children;
            }
            Lookup::Missing {
                lowest_existing_ancestor,
            } => {
                r.error = Some(RequestError::PathNotFound {
                    path: r.of.clone(),
                    lowest_existing_ancestor,
                })
            }
        }
        Ok(())
    }

    fn read_all_properties(
        &mut self,
        context: &ExecutionContext,
        r: &mut ReadAllPropertiesRequest,
    ) -> FederationResult<()> {
        match self.get_node(context, &r.at, &r.workspace)? {
            Lookup::Found(node) => {
                r.actual_location = Some(node.location);
                r.properties = node.properties;
            }
            Lookup::Missing {
                lowest_existing_ancestor,
            } => {
                r.error = Some(RequestError::PathNotFound {
                    path: r.at.clone(),
                    lowest_existing_ancestor,
                })
            }
        }
        Ok(())
    }

    /// One contribution per covering source path, plus a placeholder per
    /// projection with regions strictly below `path`
    fn collect_contributions(
        &mut self,
        context: &ExecutionContext,
        path: &Path,
        workspace: &str,
    ) -> FederationResult<Vec<Contribution>> {
        let config = Arc::clone(&self.config);
        let placeholder_expiry = expiry_for(config.default_cache_policy(), self.now);
        let mut contributions = Vec::new();

        for projection in config.source_projections() {
            for source_path in projection.paths_in_source(path) {
                let contribution = self.read_from_source(context, projection, path, source_path, workspace)?;
                contributions.push(contribution);
            }

            let mut seen = BTreeSet::new();
            let below: Vec<Path> = projection
                .top_level_paths()
                .iter()
                .filter(|top| path.is_ancestor_of(top))
                .filter_map(|top| top.ancestor_at_depth(path.depth() + 1))
                .filter(|child| seen.insert(child.clone()))
                .collect();
            if !below.is_empty() {
                contributions.push(Contribution::placeholder(
                    projection.source_name(),
                    below,
                    placeholder_expiry,
                ));
            }
        }
        Ok(contributions)
    }

    fn read_from_source(
        &mut self,
        context: &ExecutionContext,
        projection: &Projection,
        path: &Path,
        source_path: Path,
        workspace: &str,
    ) -> FederationResult<Contribution> {
        let source_name = projection.source_name();
        let mut request = Request::ReadNode(ReadNodeRequest::new(
            source_path,
            projection.workspace_for(workspace),
        ));
        let connection_policy = self.run(context, source_name, path, &mut request)?;
        let Request::ReadNode(read) = request else {
            return Ok(Contribution::empty(source_name, None));
        };

        let policy = read
            .cache_policy
            .or(connection_policy)
            .or(self.config.default_cache_policy());
        let expires_at = expiry_for(policy, self.now);

        match read.error {
            Some(error) if error.is_not_found() => Ok(Contribution::empty(source_name, expires_at)),
            Some(error) => Err(FederationError::Request {
                source_name: source_name.to_string(),
                path: path.clone(),
                error,
            }),
            None => {
                let children = read
                    .children
                    .iter()
                    .flat_map(|child| projection.paths_in_repository(child))
                    .filter(|child| child.parent().as_ref() == Some(path))
                    .collect();
                Ok(Contribution::node(source_name, read.properties, children, expires_at))
            }
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    fn create_node(&mut self, context: &ExecutionContext, r: &mut CreateNodeRequest) -> FederationResult<()> {
        let projection = self.owner(&r.under, "create a node")?;
        let sub = CreateNodeRequest::new(
            self.to_source(&projection, &r.under)?,
            projection.workspace_for(&r.workspace),
            r.name.clone(),
            r.properties.clone(),
        )
        .with_conflict(r.conflict);
        let sub = self.push_down(context, &projection, &r.under, Request::CreateNode(sub), |request| match request {
            Request::CreateNode(sub) => Some(sub),
            _ => None,
        })?;

        r.actual_location = sub
            .actual_location
            .and_then(|location| to_repository(&projection, &location));
        self.invalidate(context, &r.under, &r.workspace);
        if let Some(created) = r.actual_location.clone() {
            self.invalidate(context, &created, &r.workspace);
        }
        Ok(())
    }

    fn update_properties(
        &mut self,
        context: &ExecutionContext,
        r: &mut UpdatePropertiesRequest,
    ) -> FederationResult<()> {
        let projection = self.owner(&r.on, "update properties")?;
        let sub = UpdatePropertiesRequest::new(
            self.to_source(&projection, &r.on)?,
            projection.workspace_for(&r.workspace),
            r.properties.clone(),
        );
        let sub = self.push_down(context, &projection, &r.on, Request::UpdateProperties(sub), |request| match request {
            Request::UpdateProperties(sub) => Some(sub),
            _ => None,
        })?;

        r.actual_location = sub
            .actual_location
            .and_then(|location| to_repository(&projection, &location));
        self.invalidate(context, &r.on, &r.workspace);
        Ok(())
    }

    fn delete_branch(&mut self, context: &ExecutionContext, r: &mut DeleteBranchRequest) -> FederationResult<()> {
        let projection = self.owner(&r.at, "delete a branch")?;
        let sub = DeleteBranchRequest::new(
            self.to_source(&projection, &r.at)?,
            projection.workspace_for(&r.workspace),
        );
        let sub = self.push_down(context, &projection, &r.at, Request::DeleteBranch(sub), |request| match request {
            Request::DeleteBranch(sub) => Some(sub),
            _ => None,
        })?;

        r.actual_location = sub
            .actual_location
            .and_then(|location| to_repository(&projection, &location));
        self.evict(context, &r.at, &r.workspace);
        if let Some(parent) = r.at.parent() {
            self.invalidate(context, &parent, &r.workspace);
        }
        Ok(())
    }

    fn copy_branch(&mut self, context: &ExecutionContext, r: &mut CopyBranchRequest) -> FederationResult<()> {
        let projection = self.owner(&r.into, "copy a branch")?;
        let Some(from) = projection.paths_in_source(&r.from).into_iter().next() else {
            return Err(FederationError::Unsupported(format!(
                "copying {} into {} crosses projections",
                r.from, r.into
            )));
        };
        let mut sub = CopyBranchRequest::new(
            from,
            projection.workspace_for(&r.from_workspace),
            self.to_source(&projection, &r.into)?,
            projection.workspace_for(&r.into_workspace),
        );
        sub.desired_name = r.desired_name.clone();
        let sub = self.push_down(context, &projection, &r.into, Request::CopyBranch(sub), |request| match request {
            Request::CopyBranch(sub) => Some(sub),
            _ => None,
        })?;

        r.actual_location_after = sub
            .actual_location_after
            .and_then(|location| to_repository(&projection, &location));
        self.invalidate(context, &r.into, &r.into_workspace);
        Ok(())
    }

    fn move_branch(&mut self, context: &ExecutionContext, r: &mut MoveBranchRequest) -> FederationResult<()> {
        let projection = self.owner(&r.from, "move a branch")?;
        let target = self.owner(&r.into, "move a branch")?;
        if target.source_name() != projection.source_name() {
            return Err(FederationError::Unsupported(format!(
                "moving {} into {} crosses projections",
                r.from, r.into
            )));
        }
        let mut sub = MoveBranchRequest::new(
            self.to_source(&projection, &r.from)?,
            self.to_source(&projection, &r.into)?,
            projection.workspace_for(&r.workspace),
        );
        sub.desired_name = r.desired_name.clone();
        let sub = self.push_down(context, &projection, &r.from, Request::MoveBranch(sub), |request| match request {
            Request::MoveBranch(sub) => Some(sub),
            _ => None,
        })?;

        r.actual_location_after = sub
            .actual_location_after
            .and_then(|location| to_repository(&projection, &location));
        self.evict(context, &r.from, &r.workspace);
        if let Some(parent) = r.from.parent() {
            self.invalidate(context, &parent, &r.workspace);
        }
        self.invalidate(context, &r.into, &r.workspace);
        Ok(())
    }

    /// The single writable projection owning `path`
    fn owner(&self, path: &Path, operation: &'static str) -> FederationResult<Projection> {
        let covering = self.config.resolve_projections(path);
        let Some(first) = covering.first() else {
            let path_text = path.to_string();
            log_event_with_fields(
                Event::ProjectionUnresolved,
                &[("repository", self.config.name()), ("path", &path_text)],
            );
            return Err(FederationError::NotCovered {
                repository: self.config.name().to_string(),
                path: path.clone(),
            });
        };

        let writable: Vec<&Projection> = covering
            .iter()
            .copied()
            .filter(|projection| !projection.is_read_only())
            .collect();
        match writable.as_slice() {
            [owner] => Ok((*owner).clone()),
            [] => Err(FederationError::ReadOnly {
                source_name: first.source_name().to_string(),
                path: path.clone(),
                operation,
            }),
            owners => Err(FederationError::AmbiguousOwnership {
                path: path.clone(),
                sources: owners
                    .iter()
                    .map(|projection| projection.source_name().to_string())
                    .collect(),
            }),
        }
    }

    /// The source path a write at `path` is routed to (first matching rule)
    fn to_source(&self, projection: &Projection, path: &Path) -> FederationResult<Path> {
        projection
            .paths_in_source(path)
            .into_iter()
            .next()
            .ok_or_else(|| FederationError::NotCovered {
                repository: self.config.name().to_string(),
                path: path.clone(),
            })
    }

    /// Run a write on its owning source and hand back the processed request.
    /// An outcome error recorded by the source becomes `FederationError::Request`.
    fn push_down<T>(
        &mut self,
        context: &ExecutionContext,
        projection: &Projection,
        path: &Path,
        mut request: Request,
        extract: impl FnOnce(Request) -> Option<T>,
    ) -> FederationResult<T> {
        let source_name = projection.source_name();
        self.run(context, source_name, path, &mut request)?;
        if let Some(error) = request.error() {
            return Err(FederationError::Request {
                source_name: source_name.to_string(),
                path: path.clone(),
                error: to_repository_error(projection, error),
            });
        }
        extract(request).ok_or_else(|| {
            FederationError::Unsupported(format!("source '{}' changed the request kind", source_name))
        })
    }

    // =========================================================================
    // Source access
    // =========================================================================

    /// Execute `request` on `source_name`, opening a connection on first
    /// use. Returns the connection's default cache policy.
    fn run(
        &mut self,
        context: &ExecutionContext,
        source_name: &str,
        path: &Path,
        request: &mut Request,
    ) -> FederationResult<Option<CachePolicy>> {
        let connection = match self.connections.open.entry(source_name.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let mut connection = self
                    .factory
                    .create_connection(source_name)
                    .map_err(|cause| source_failure(&self.config, source_name, path, cause))?;
                if let Some(projection) = self
                    .config
                    .source_projections()
                    .iter()
                    .find(|projection| projection.source_name() == source_name)
                {
                    connection.set_listener(Some(Arc::new(ForwardingListener::new(
                        self.config.name(),
                        projection.clone(),
                        Arc::clone(&self.listener),
                    ))));
                }
                entry.insert(connection)
            }
        };

        self.metrics.increment_source_requests();
        let policy = connection.default_cache_policy();
        connection
            .execute(context, request)
            .map_err(|cause| source_failure(&self.config, source_name, path, cause))?;
        Ok(policy)
    }

    // =========================================================================
    // Cache
    // =========================================================================

    fn read_cache(&mut self, context: &ExecutionContext, path: &Path, workspace: &str) -> Cached {
        let config = Arc::clone(&self.config);
        let cache = config.cache_projection();
        let Some(cache_path) = cache.paths_in_source(path).into_iter().next() else {
            return Cached::Absent;
        };

        let mut request = Request::read_node(cache_path, cache.workspace_for(workspace));
        if !self.on_cache(context, path, &mut request) {
            return Cached::Absent;
        }
        let Request::ReadNode(read) = request else {
            return Cached::Absent;
        };
        if read.error.is_some() {
            return Cached::Absent;
        }

        let uuid = read
            .properties
            .get(UUID_PROPERTY)
            .and_then(Value::as_str)
            .and_then(|text| Uuid::parse_str(text).ok());
        let plan = read
            .properties
            .get(MERGE_PLAN_PROPERTY)
            .and_then(MergePlan::from_value);

        match (uuid, plan) {
            (Some(uuid), Some(plan)) if !plan.is_expired(self.now) => Cached::Fresh(FederatedNode {
                location: path.clone(),
                uuid,
                properties: visible(&read.properties),
                children: read
                    .children
                    .iter()
                    .filter_map(|child| to_repository(cache, child))
                    .collect(),
                plan,
            }),
            _ => Cached::Stale(CachedEntry {
                uuid,
                properties: read.properties,
            }),
        }
    }

    /// Store `node` and line up its cached children, then its merge plan.
    /// Updates of one cache workspace run one at a time; when another reader
    /// refreshed the node meanwhile, `node` adopts its identifier instead.
    fn update_cache(
        &mut self,
        context: &ExecutionContext,
        node: &mut FederatedNode,
        workspace: &str,
        previous: Option<&CachedEntry>,
    ) {
        let config = Arc::clone(&self.config);
        let cache = config.cache_projection();
        let Some(cache_path) = cache.paths_in_source(&node.location).into_iter().next() else {
            return;
        };
        let cache_workspace = cache.workspace_for(workspace).to_string();

        let domain = format!("{}:cache:{}", config.name(), cache_workspace);
        let held = match self.lock_provider.write_lock_for(&domain) {
            Ok(held) => held,
            Err(err) => {
                cache_failure(&config, &node.location, &err.to_string());
                return;
            }
        };
        if let Cached::Fresh(current) = self.read_cache(context, &node.location, workspace) {
            node.uuid = current.uuid;
            held.release();
            return;
        }

        let mut properties = node.properties.clone();
        properties.insert(UUID_PROPERTY.to_string(), Value::String(node.uuid.to_string()));
        if let Some(previous) = previous {
            for name in previous.properties.keys() {
                properties.entry(name.clone()).or_insert(Value::Null);
            }
        }
        properties.remove(MERGE_PLAN_PROPERTY);

        let mut update = Request::update_properties(cache_path.clone(), &cache_workspace, properties.clone());
        if !self.on_cache(context, &node.location, &mut update) {
            return;
        }
        if update.error().is_some_and(RequestError::is_not_found) {
            let (Some(parent), Some(segment)) = (cache_path.parent(), cache_path.last_segment()) else {
                return;
            };
            properties.retain(|_, value| !value.is_null());
            let mut create = Request::create_node(parent, &cache_workspace, segment.name(), properties);
            if !self.on_cache(context, &node.location, &mut create) || create.has_error() {
                cache_failure(&config, &node.location, "cached parent is missing");
                return;
            }
        }

        let mut listing = Request::read_all_children(cache_path.clone(), &cache_workspace);
        if !self.on_cache(context, &node.location, &mut listing) {
            return;
        }
        let Request::ReadAllChildren(listing) = listing else {
            return;
        };
        let existing: BTreeSet<Path> = listing.children.into_iter().collect();
        let wanted: Vec<Path> = node
            .children
            .iter()
            .filter_map(|child| cache.paths_in_source(child).into_iter().next())
            .collect();

        for stale in existing.iter().rev().filter(|child| !wanted.contains(child)) {
            let mut delete = Request::delete_branch(stale.clone(), &cache_workspace);
            self.on_cache(context, &node.location, &mut delete);
        }
        for child in wanted.iter().filter(|child| !existing.contains(*child)) {
            let Some(segment) = child.last_segment() else {
                continue;
            };
            let mut create =
                Request::create_node(cache_path.clone(), &cache_workspace, segment.name(), Properties::new());
            self.on_cache(context, &node.location, &mut create);
        }

        // Readers treat the node as cached once the plan is present.
        let mut plan = Properties::new();
        plan.insert(MERGE_PLAN_PROPERTY.to_string(), node.plan.to_value());
        let mut commit = Request::update_properties(cache_path, &cache_workspace, plan);
        self.on_cache(context, &node.location, &mut commit);
        held.release();
    }

    /// Drop the merge plan so the next read reloads from the sources
    fn invalidate(&mut self, context: &ExecutionContext, path: &Path, workspace: &str) {
        let config = Arc::clone(&self.config);
        let cache = config.cache_projection();
        let Some(cache_path) = cache.paths_in_source(path).into_iter().next() else {
            return;
        };
        let mut properties = Properties::new();
        properties.insert(MERGE_PLAN_PROPERTY.to_string(), Value::Null);
        let mut request = Request::update_properties(cache_path, cache.workspace_for(workspace), properties);
        self.on_cache(context, path, &mut request);
    }

    /// Remove the cached branch at `path`
    fn evict(&mut self, context: &ExecutionContext, path: &Path, workspace: &str) {
        if path.is_root() {
            self.invalidate(context, path, workspace);
            return;
        }
        let config = Arc::clone(&self.config);
        let cache = config.cache_projection();
        let Some(cache_path) = cache.paths_in_source(path).into_iter().next() else {
            return;
        };
        let mut request = Request::delete_branch(cache_path, cache.workspace_for(workspace));
        self.on_cache(context, path, &mut request);
    }

    /// Run `request` on the cache source; failures are logged and reported as false
    fn on_cache(&mut self, context: &ExecutionContext, path: &Path, request: &mut Request) -> bool {
        let cache_source = self.config.cache_projection().source_name().to_string();
        match self.run(context, &cache_source, path, request) {
            Ok(_) => true,
            Err(err) => {
                cache_failure(&self.config, path, &err.to_string());
                false
            }
        }
    }
}

fn source_failure(
    config: &FederatedRepositoryConfig,
    source_name: &str,
    path: &Path,
    cause: ConnectorError,
) -> FederationError {
    FederationError::SourceFailure {
        repository: config.name().to_string(),
        source_name: source_name.to_string(),
        path: path.clone(),
        cause,
    }
}

fn cache_failure(config: &FederatedRepositoryConfig, path: &Path, error: &str) {
    let path_text = path.to_string();
    log_event_with_fields(
        Event::CacheUpdateFailed,
        &[
            ("repository", config.name()),
            ("cache", config.cache_projection().source_name()),
            ("path", &path_text),
            ("error", error),
        ],
    );
}

fn to_repository(projection: &Projection, source_path: &Path) -> Option<Path> {
    projection.paths_in_repository(source_path).into_iter().next()
}

/// Rewrite the source paths inside an outcome error into federated paths
fn to_repository_error(projection: &Projection, error: &RequestError) -> RequestError {
    match error {
        RequestError::PathNotFound {
            path,
            lowest_existing_ancestor,
        } => RequestError::PathNotFound {
            path: to_repository(projection, path).unwrap_or_else(|| path.clone()),
            lowest_existing_ancestor: lowest_existing_ancestor
                .as_ref()
                .and_then(|lowest| to_repository(projection, lowest)),
        },
        RequestError::AlreadyExists(path) => {
            RequestError::AlreadyExists(to_repository(projection, path).unwrap_or_else(|| path.clone()))
        }
        other => other.clone(),
    }
}

fn visible(properties: &Properties) -> Properties {
    properties
        .iter()
        .filter(|(name, _)| !is_internal_property(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}
