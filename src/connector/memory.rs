//! In-memory backing source
//!
//! A tree of nodes per workspace, held entirely in memory. Processes every
//! request kind, including same-name siblings and node-conflict behaviour.
//! Used as the cache source of a federated repository and for tests.
//!
//! Workspaces spring into existence on first write. Reads against a
//! workspace that was never written see only an empty root.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use uuid::Uuid;

use crate::graph::{
    CachePolicy, CopyBranchRequest, CreateNodeRequest, DeleteBranchRequest, ExecutionContext,
    MoveBranchRequest, NodeConflictBehavior, Path, Properties, ReadAllChildrenRequest,
    ReadAllPropertiesRequest, ReadNodeRequest, Request, RequestError, Segment,
    UpdatePropertiesRequest,
};
use crate::lock::{LockManager, LockSettings, LockStrategy};

use super::errors::{ConnectorError, ConnectorResult};
use super::listener::{ChangeEvent, ChangeKind, NoOpListener, RepositoryListener};
use super::{RepositoryConnection, RepositorySource};

#[derive(Debug, Clone)]
struct NodeRecord {
    parent: Option<Uuid>,
    name: String,
    properties: Properties,
    children: Vec<Uuid>,
}

/// A branch lifted out of a workspace, ready to be attached elsewhere
#[derive(Debug, Clone)]
struct DetachedBranch {
    name: String,
    properties: Properties,
    children: Vec<DetachedBranch>,
}

#[derive(Debug)]
struct Workspace {
    root: Uuid,
    nodes: HashMap<Uuid, NodeRecord>,
}

impl Workspace {
    fn new(root: Uuid) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            NodeRecord {
                parent: None,
                name: String::new(),
                properties: Properties::new(),
                children: Vec::new(),
            },
        );
        Self { root, nodes }
    }

    /// Resolve `path`; on failure returns the lowest existing ancestor
    fn find(&self, path: &Path) -> Result<Uuid, Path> {
        let mut current = self.root;
        for (depth, segment) in path.segments().iter().enumerate() {
            match self.child_named(current, segment) {
                Some(child) => current = child,
                None => return Err(path.ancestor_at_depth(depth).unwrap_or_default()),
            }
        }
        Ok(current)
    }

    fn child_named(&self, parent: Uuid, segment: &Segment) -> Option<Uuid> {
        self.nodes
            .get(&parent)?
            .children
            .iter()
            .copied()
            .filter(|child| self.name_of(*child) == Some(segment.name()))
            .nth(segment.index().saturating_sub(1))
    }

    fn name_of(&self, id: Uuid) -> Option<&str> {
        self.nodes.get(&id).map(|node| node.name.as_str())
    }

    /// Segment of `id` within its parent, with its same-name-sibling index
    fn segment_of(&self, parent: Uuid, id: Uuid, name: &str) -> Segment {
        let index = self
            .nodes
            .get(&parent)
            .map(|p| {
                p.children
                    .iter()
                    .take_while(|child| **child != id)
                    .filter(|child| self.name_of(**child) == Some(name))
                    .count()
            })
            .unwrap_or(0);
        Segment::with_index(name, index + 1)
    }

    fn path_of(&self, id: Uuid) -> Path {
        let mut segments = Vec::new();
        let mut current = id;
        while let Some(node) = self.nodes.get(&current) {
            let Some(parent) = node.parent else { break };
            segments.push(self.segment_of(parent, current, &node.name));
            current = parent;
        }
        segments.reverse();
        Path::from_segments(segments)
    }

    fn children_of(&self, id: Uuid, path: &Path) -> Vec<Path> {
        let Some(node) = self.nodes.get(&id) else {
            return Vec::new();
        };
        let mut seen: HashMap<&str, usize> = HashMap::new();
        node.children
            .iter()
            .filter_map(|child| self.name_of(*child))
            .map(|name| {
                let index = seen.entry(name).or_insert(0);
                *index += 1;
                path.child(Segment::with_index(name, *index))
            })
            .collect()
    }

    fn properties_of(&self, id: Uuid) -> Properties {
        self.nodes
            .get(&id)
            .map(|node| node.properties.clone())
            .unwrap_or_default()
    }

    fn position_in_parent(&self, id: Uuid) -> Option<usize> {
        let parent = self.nodes.get(&id)?.parent?;
        self.nodes.get(&parent)?.children.iter().position(|c| *c == id)
    }

    fn insert_child(
        &mut self,
        parent: Uuid,
        name: &str,
        properties: Properties,
        position: Option<usize>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.nodes.insert(
            id,
            NodeRecord {
                parent: Some(parent),
                name: name.to_string(),
                properties,
                children: Vec::new(),
            },
        );
        if let Some(p) = self.nodes.get_mut(&parent) {
            match position {
                Some(at) if at <= p.children.len() => p.children.insert(at, id),
                _ => p.children.push(id),
            }
        }
        id
    }

    /// Apply an update: `null` removes, anything else sets
    fn merge_properties(&mut self, id: Uuid, updates: &Properties) {
        if let Some(node) = self.nodes.get_mut(&id) {
            for (name, value) in updates {
                if value.is_null() {
                    node.properties.remove(name);
                } else {
                    node.properties.insert(name.clone(), value.clone());
                }
            }
        }
    }

    fn unlink(&mut self, id: Uuid) {
        let parent = self.nodes.get(&id).and_then(|node| node.parent);
        if let Some(p) = parent.and_then(|parent| self.nodes.get_mut(&parent)) {
            p.children.retain(|child| *child != id);
        }
    }

    fn remove_branch(&mut self, id: Uuid) {
        self.unlink(id);
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            if let Some(node) = self.nodes.remove(&next) {
                pending.extend(node.children);
            }
        }
    }

    fn clear_root(&mut self) {
        let children = self
            .nodes
            .get(&self.root)
            .map(|root| root.children.clone())
            .unwrap_or_default();
        for child in children {
            self.remove_branch(child);
        }
        if let Some(root) = self.nodes.get_mut(&self.root) {
            root.properties.clear();
        }
    }

    fn detach_copy(&self, id: Uuid) -> Option<DetachedBranch> {
        let node = self.nodes.get(&id)?;
        Some(DetachedBranch {
            name: node.name.clone(),
            properties: node.properties.clone(),
            children: node
                .children
                .iter()
                .filter_map(|child| self.detach_copy(*child))
                .collect(),
        })
    }

    fn attach(&mut self, parent: Uuid, branch: DetachedBranch) -> Uuid {
        let id = self.insert_child(parent, &branch.name, branch.properties, None);
        for child in branch.children {
            self.attach(id, child);
        }
        id
    }
}

fn without_nulls(properties: &Properties) -> Properties {
    properties
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

fn not_found(path: &Path, lowest_existing_ancestor: Path) -> RequestError {
    RequestError::PathNotFound {
        path: path.clone(),
        lowest_existing_ancestor: Some(lowest_existing_ancestor),
    }
}

/// State shared between a source and its connections
#[derive(Debug)]
struct Shared {
    root_uuid: Uuid,
    workspaces: RwLock<HashMap<String, Workspace>>,
    available: AtomicBool,
    open_connections: AtomicUsize,
}

impl Shared {
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Workspace>> {
        self.workspaces.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Workspace>> {
        self.workspaces
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn workspace_mut<'a>(
    workspaces: &'a mut HashMap<String, Workspace>,
    name: &str,
    root: Uuid,
) -> &'a mut Workspace {
    workspaces
        .entry(name.to_string())
        .or_insert_with(|| Workspace::new(root))
}

/// In-memory source
pub struct InMemoryRepositorySource {
    name: String,
    cache_policy: Option<CachePolicy>,
    lock_manager: LockManager,
    locking: Arc<dyn LockStrategy>,
    shared: Arc<Shared>,
}

impl InMemoryRepositorySource {
    /// A source with default locking and no cache policy
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let lock_manager = LockManager::new(LockSettings::default());
        let locking = lock_manager.resolve(&name).strategy;
        Self {
            name,
            cache_policy: None,
            lock_manager,
            locking,
            shared: Arc::new(Shared {
                root_uuid: Uuid::new_v4(),
                workspaces: RwLock::new(HashMap::new()),
                available: AtomicBool::new(true),
                open_connections: AtomicUsize::new(0),
            }),
        }
    }

    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = Some(policy);
        self
    }

    /// Lock with the given provider/strategy identifiers (defaults on unknown ones)
    pub fn with_locking(mut self, settings: LockSettings) -> Self {
        self.lock_manager = LockManager::new(settings);
        self.locking = self.lock_manager.resolve(&self.name).strategy;
        self
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    pub fn lock_strategy_name(&self) -> &'static str {
        self.locking.name()
    }

    pub fn root_uuid(&self) -> Uuid {
        self.shared.root_uuid
    }

    /// Make the source refuse (or accept again) connections and requests
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::SeqCst);
    }

    pub fn open_connections(&self) -> usize {
        self.shared.open_connections.load(Ordering::SeqCst)
    }

    /// Create the node at `path` (and any missing ancestors), merging
    /// `properties` into it. Bypasses locking and listeners.
    pub fn seed(&self, workspace: &str, path: &Path, properties: Properties) {
        let mut workspaces = self.shared.write();
        let ws = workspace_mut(&mut workspaces, workspace, self.shared.root_uuid);
        let mut current = ws.root;
        for segment in path.segments() {
            current = match ws.child_named(current, segment) {
                Some(child) => child,
                None => ws.insert_child(current, segment.name(), Properties::new(), None),
            };
        }
        ws.merge_properties(current, &properties);
    }

    /// Number of nodes in `workspace`, root included
    pub fn node_count(&self, workspace: &str) -> usize {
        self.shared
            .read()
            .get(workspace)
            .map(|ws| ws.nodes.len())
            .unwrap_or(1)
    }

    /// Names of workspaces that have been written to, sorted
    pub fn workspace_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl RepositorySource for InMemoryRepositorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&self) -> ConnectorResult<Box<dyn RepositoryConnection>> {
        if !self.shared.available.load(Ordering::SeqCst) {
            return Err(ConnectorError::unavailable(&self.name, "source is offline"));
        }
        self.shared.open_connections.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemoryConnection {
            source_name: self.name.clone(),
            cache_policy: self.cache_policy,
            locking: Arc::clone(&self.locking),
            listener: NoOpListener::shared(),
            shared: Arc::clone(&self.shared),
            closed: false,
        }))
    }

    fn default_cache_policy(&self) -> Option<CachePolicy> {
        self.cache_policy
    }
}

impl fmt::Debug for InMemoryRepositorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryRepositorySource")
            .field("name", &self.name)
            .field("cache_policy", &self.cache_policy)
            .field("locking", &self.locking.name())
            .finish()
    }
}

/// Connection to an `InMemoryRepositorySource`
pub struct InMemoryConnection {
    source_name: String,
    cache_policy: Option<CachePolicy>,
    locking: Arc<dyn LockStrategy>,
    listener: Arc<dyn RepositoryListener>,
    shared: Arc<Shared>,
    closed: bool,
}

impl InMemoryConnection {
    fn process(&self, request: &mut Request, events: &mut Vec<ChangeEvent>) {
        match request {
            Request::ReadNode(r) => self.read_node(r),
            Request::ReadAllChildren(r) => self.read_all_children(r),
            Request::ReadAllProperties(r) => self.read_all_properties(r),
            Request::CreateNode(r) => self.create_node(r, events),
            Request::UpdateProperties(r) => self.update_properties(r, events),
            Request::CopyBranch(r) => self.copy_branch(r, events),
            Request::MoveBranch(r) => self.move_branch(r, events),
            Request::DeleteBranch(r) => self.delete_branch(r, events),
            Request::Composite(c) => {
                for request in &mut c.requests {
                    self.process(request, events);
                }
            }
        }
    }

    fn read_node(&self, r: &mut ReadNodeRequest) {
        let workspaces = self.shared.read();
        let empty;
        let ws = match workspaces.get(&r.workspace) {
            Some(ws) => ws,
            None => {
                empty = Workspace::new(self.shared.root_uuid);
                &empty
            }
        };
        match ws.find(&r.at) {
            Ok(id) => {
                r.actual_location = Some(r.at.clone());
                r.uuid = Some(id);
                r.properties = ws.properties_of(id);
                r.children = ws.children_of(id, &r.at);
                r.cache_policy = self.cache_policy;
            }
            Err(lowest) => r.error = Some(not_found(&r.at, lowest)),
        }
    }

    fn read_all_children(&self, r: &mut ReadAllChildrenRequest) {
        let workspaces = self.shared.read();
        let empty;
        let ws = match workspaces.get(&r.workspace) {
            Some(ws) => ws,
            None => {
                empty = Workspace::new(self.shared.root_uuid);
                &empty
            }
        };
        match ws.find(&r.of) {
            Ok(id) => {
                r.actual_location = Some(r.of.clone());
                r.children = ws.children_of(id, &r.of);
            }
            Err(lowest) => r.error = Some(not_found(&r.of, lowest)),
        }
    }

    fn read_all_properties(&self, r: &mut ReadAllPropertiesRequest) {
        let workspaces = self.shared.read();
        let empty;
        let ws = match workspaces.get(&r.workspace) {
            Some(ws) => ws,
            None => {
                empty = Workspace::new(self.shared.root_uuid);
                &empty
            }
        };
        match ws.find(&r.at) {
            Ok(id) => {
                r.actual_location = Some(r.at.clone());
                r.properties = ws.properties_of(id);
            }
            Err(lowest) => r.error = Some(not_found(&r.at, lowest)),
        }
    }

    fn create_node(&self, r: &mut CreateNodeRequest, events: &mut Vec<ChangeEvent>) {
        if Segment::parse(&r.name).is_err() {
            r.error = Some(RequestError::InvalidRequest(format!(
                "invalid node name '{}'",
                r.name
            )));
            return;
        }

        let mut workspaces = self.shared.write();
        let ws = workspace_mut(&mut workspaces, &r.workspace, self.shared.root_uuid);
        let parent = match ws.find(&r.under) {
            Ok(parent) => parent,
            Err(lowest) => {
                r.error = Some(not_found(&r.under, lowest));
                return;
            }
        };

        let existing = ws.child_named(parent, &Segment::new(r.name.as_str()));
        let (id, kind) = match (existing, r.conflict) {
            (Some(existing), NodeConflictBehavior::DoNotReplace) => (existing, None),
            (Some(existing), NodeConflictBehavior::Update) => {
                ws.merge_properties(existing, &r.properties);
                (existing, Some(ChangeKind::PropertiesUpdated))
            }
            (Some(existing), NodeConflictBehavior::Replace) => {
                let position = ws.position_in_parent(existing);
                ws.remove_branch(existing);
                let id = ws.insert_child(parent, &r.name, without_nulls(&r.properties), position);
                (id, Some(ChangeKind::NodeCreated))
            }
            _ => {
                let id = ws.insert_child(parent, &r.name, without_nulls(&r.properties), None);
                (id, Some(ChangeKind::NodeCreated))
            }
        };

        let location = ws.path_of(id);
        if let Some(kind) = kind {
            events.push(ChangeEvent::new(&r.workspace, location.clone(), kind));
        }
        r.actual_location = Some(location);
    }

    fn update_properties(&self, r: &mut UpdatePropertiesRequest, events: &mut Vec<ChangeEvent>) {
        let mut workspaces = self.shared.write();
        let ws = workspace_mut(&mut workspaces, &r.workspace, self.shared.root_uuid);
        match ws.find(&r.on) {
            Ok(id) => {
                ws.merge_properties(id, &r.properties);
                r.actual_location = Some(r.on.clone());
                events.push(ChangeEvent::new(
                    &r.workspace,
                    r.on.clone(),
                    ChangeKind::PropertiesUpdated,
                ));
            }
            Err(lowest) => r.error = Some(not_found(&r.on, lowest)),
        }
    }

    fn copy_branch(&self, r: &mut CopyBranchRequest, events: &mut Vec<ChangeEvent>) {
        let mut workspaces = self.shared.write();
        let root = self.shared.root_uuid;

        let from_ws = workspace_mut(&mut workspaces, &r.from_workspace, root);
        let mut branch = match from_ws.find(&r.from) {
            Ok(id) => match from_ws.detach_copy(id) {
                Some(branch) => branch,
                None => return,
            },
            Err(lowest) => {
                r.error = Some(not_found(&r.from, lowest));
                return;
            }
        };
        if let Some(name) = &r.desired_name {
            branch.name = name.clone();
        }
        if branch.name.is_empty() {
            r.error = Some(RequestError::InvalidRequest(
                "copying the root node requires a new name".to_string(),
            ));
            return;
        }

        let into_ws = workspace_mut(&mut workspaces, &r.into_workspace, root);
        let parent = match into_ws.find(&r.into) {
            Ok(parent) => parent,
            Err(lowest) => {
                r.error = Some(not_found(&r.into, lowest));
                return;
            }
        };
        let id = into_ws.attach(parent, branch);
        let location = into_ws.path_of(id);
        events.push(ChangeEvent::new(
            &r.into_workspace,
            location.clone(),
            ChangeKind::BranchCopied {
                from: r.from.clone(),
            },
        ));
        r.actual_location_after = Some(location);
    }

    fn move_branch(&self, r: &mut MoveBranchRequest, events: &mut Vec<ChangeEvent>) {
        let mut workspaces = self.shared.write();
        let ws = workspace_mut(&mut workspaces, &r.workspace, self.shared.root_uuid);
        let node = match ws.find(&r.from) {
            Ok(node) => node,
            Err(lowest) => {
                r.error = Some(not_found(&r.from, lowest));
                return;
            }
        };
        if node == ws.root {
            r.error = Some(RequestError::InvalidRequest(
                "the root node cannot be moved".to_string(),
            ));
            return;
        }
        let new_parent = match ws.find(&r.into) {
            Ok(parent) => parent,
            Err(lowest) => {
                r.error = Some(not_found(&r.into, lowest));
                return;
            }
        };
        if r.from.is_at_or_above(&r.into) {
            r.error = Some(RequestError::InvalidRequest(format!(
                "cannot move {} below itself",
                r.from
            )));
            return;
        }

        ws.unlink(node);
        if let Some(record) = ws.nodes.get_mut(&node) {
            record.parent = Some(new_parent);
            if let Some(name) = &r.desired_name {
                record.name = name.clone();
            }
        }
        if let Some(parent) = ws.nodes.get_mut(&new_parent) {
            parent.children.push(node);
        }

        let location = ws.path_of(node);
        events.push(ChangeEvent::new(
            &r.workspace,
            location.clone(),
            ChangeKind::BranchMoved {
                from: r.from.clone(),
            },
        ));
        r.actual_location_after = Some(location);
    }

    fn delete_branch(&self, r: &mut DeleteBranchRequest, events: &mut Vec<ChangeEvent>) {
        let mut workspaces = self.shared.write();
        let ws = workspace_mut(&mut workspaces, &r.workspace, self.shared.root_uuid);
        match ws.find(&r.at) {
            Ok(id) if id == ws.root => ws.clear_root(),
            Ok(id) => ws.remove_branch(id),
            Err(lowest) => {
                r.error = Some(not_found(&r.at, lowest));
                return;
            }
        }
        r.actual_location = Some(r.at.clone());
        events.push(ChangeEvent::new(
            &r.workspace,
            r.at.clone(),
            ChangeKind::BranchDeleted,
        ));
    }
}

impl RepositoryConnection for InMemoryConnection {
    fn source_name(&self) -> &str {
        &self.source_name
    }

    fn ping(&self, _timeout: Duration) -> bool {
        !self.closed && self.shared.available.load(Ordering::SeqCst)
    }

    fn default_cache_policy(&self) -> Option<CachePolicy> {
        self.cache_policy
    }

    fn set_listener(&mut self, listener: Option<Arc<dyn RepositoryListener>>) {
        self.listener = listener.unwrap_or_else(NoOpListener::shared);
    }

    fn execute(&mut self, _context: &ExecutionContext, request: &mut Request) -> ConnectorResult<()> {
        if self.closed {
            return Err(ConnectorError::Closed(self.source_name.clone()));
        }
        if !self.shared.available.load(Ordering::SeqCst) {
            return Err(ConnectorError::unavailable(&self.source_name, "source is offline"));
        }

        let held = self
            .locking
            .lock(request)
            .map_err(|err| ConnectorError::unavailable(&self.source_name, err.to_string()))?;
        let mut events = Vec::new();
        self.process(request, &mut events);
        held.release();

        if !events.is_empty() {
            self.listener.notify(&self.source_name, &events);
        }
        Ok(())
    }

    fn close(&mut self) -> ConnectorResult<()> {
        if !self.closed {
            self.closed = true;
            self.shared.open_connections.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl fmt::Debug for InMemoryConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryConnection")
            .field("source_name", &self.source_name)
            .field("closed", &self.closed)
            .finish()
    }
}
