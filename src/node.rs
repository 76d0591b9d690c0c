//! Node registry
//!
//! Parses endpoint URIs into nodes and owns their mount lifecycle. Every
//! other component refers to a node by role and index only.
//!
//! URI grammar (the last field takes the rest of the string):
//!
//! ```text
//! protocol:server:port:volume:path          GlusterFS, untagged
//! glfs:protocol:server:port:volume:path     GlusterFS
//! cfs:monitors:id:keyringFile:root:path     CephFS
//! file:path                                 local directory
//! ```

use crate::backend::{Backend, CephConfig, Endpoint, GlusterConfig, MountOptions};
use crate::error::{FanCopyError, Result};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Mode of the destination roots created before a run
pub const DESTINATION_ROOT_MODE: u32 = 0o755;

/// Whether a node is read from or written to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// Source tree
    Source,
    /// Destination tree
    Destination,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Source => "src",
            Self::Destination => "dst",
        })
    }
}

/// Parsed endpoint URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    /// URI as given on the command line
    pub uri: String,
    /// Backend connection parameters
    pub endpoint: Endpoint,
    /// Root of the tree inside the backend
    pub path: String,
}

impl NodeSpec {
    /// Parse an endpoint URI
    pub fn parse(uri: &str) -> Result<Self> {
        let (tag, rest) = uri
            .split_once(':')
            .ok_or_else(|| FanCopyError::endpoint(uri, "expected colon-delimited fields"))?;

        match tag {
            "glfs" => parse_gluster(uri, rest),
            "cfs" => parse_ceph(uri, rest),
            "file" => {
                let path = required(uri, "path", rest)?;
                Ok(Self {
                    uri: uri.to_string(),
                    endpoint: Endpoint::Local,
                    path: path.to_string(),
                })
            }
            _ => match uri.split(':').count() {
                5 => parse_gluster(uri, uri),
                6 => Err(FanCopyError::endpoint(uri, format!("unknown backend tag '{}'", tag))),
                n => Err(FanCopyError::endpoint(
                    uri,
                    format!("expected protocol:server:port:volume:path, got {} fields", n),
                )),
            },
        }
    }
}

impl FromStr for NodeSpec {
    type Err = FanCopyError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Split `rest` into exactly `names.len()` fields, the last one taking the remainder
fn split_fields<'a>(uri: &str, rest: &'a str, names: &[&str]) -> Result<Vec<&'a str>> {
    let fields: Vec<&str> = rest.splitn(names.len(), ':').collect();
    if fields.len() < names.len() {
        return Err(FanCopyError::endpoint(
            uri,
            format!("missing {} field", names[fields.len()]),
        ));
    }
    Ok(fields)
}

fn required<'a>(uri: &str, name: &str, value: &'a str) -> Result<&'a str> {
    if value.is_empty() {
        Err(FanCopyError::endpoint(uri, format!("{} must not be empty", name)))
    } else {
        Ok(value)
    }
}

fn parse_port(uri: &str, value: &str) -> Result<u16> {
    if value.is_empty() {
        return Ok(0);
    }
    value
        .parse()
        .map_err(|_| FanCopyError::endpoint(uri, format!("port '{}' is not a valid number", value)))
}

fn parse_gluster(uri: &str, rest: &str) -> Result<NodeSpec> {
    let f = split_fields(uri, rest, &["protocol", "server", "port", "volume", "path"])?;
    let server = required(uri, "server", f[1])?;
    let port = parse_port(uri, f[2])?;
    let volume = required(uri, "volume", f[3])?;
    let path = required(uri, "path", f[4])?;

    Ok(NodeSpec {
        uri: uri.to_string(),
        endpoint: Endpoint::Gluster(GlusterConfig::new(f[0], server, port, volume)),
        path: path.to_string(),
    })
}

fn parse_ceph(uri: &str, rest: &str) -> Result<NodeSpec> {
    let f = split_fields(uri, rest, &["monitors", "id", "keyringFile", "root", "path"])?;
    let monitors = required(uri, "monitors", f[0])?;
    let id = required(uri, "id", f[1])?;
    let keyring = required(uri, "keyringFile", f[2])?;
    let root = required(uri, "root", f[3])?;
    let path = required(uri, "path", f[4])?;

    let config = CephConfig::new(monitors, id, keyring, root)
        .map_err(|e| FanCopyError::endpoint(uri, e.to_string()))?;

    Ok(NodeSpec {
        uri: uri.to_string(),
        endpoint: Endpoint::Ceph(config),
        path: path.to_string(),
    })
}

/// One endpoint of the run
#[derive(Debug)]
pub struct Node {
    role: NodeRole,
    index: usize,
    spec: NodeSpec,
    backend: Option<Arc<dyn Backend>>,
}

impl Node {
    /// Unopened node
    pub fn new(role: NodeRole, index: usize, spec: NodeSpec) -> Self {
        Self {
            role,
            index,
            spec,
            backend: None,
        }
    }

    /// Node already attached to a backend
    pub fn with_backend(role: NodeRole, index: usize, spec: NodeSpec, backend: Arc<dyn Backend>) -> Self {
        Self {
            role,
            index,
            spec,
            backend: Some(backend),
        }
    }

    /// Name used in logs, e.g. `dst-1`
    pub fn label(&self) -> String {
        format!("{}-{}", self.role, self.index)
    }

    /// Role of the node
    pub fn role(&self) -> NodeRole {
        self.role
    }

    /// Index within its role
    pub fn index(&self) -> usize {
        self.index
    }

    /// Parsed URI
    pub fn spec(&self) -> &NodeSpec {
        &self.spec
    }

    /// Root path inside the backend
    pub fn root(&self) -> &str {
        &self.spec.path
    }

    /// Whether the backend is attached
    pub fn is_open(&self) -> bool {
        self.backend.is_some()
    }

    /// Attached backend
    pub fn backend(&self) -> Result<&Arc<dyn Backend>> {
        self.backend
            .as_ref()
            .ok_or_else(|| FanCopyError::NodeUnavailable(format!("{} is not open", self.label())))
    }

    /// Attach the backend
    pub fn open(&mut self, options: &MountOptions) -> Result<()> {
        if self.backend.is_none() {
            self.backend = Some(self.spec.endpoint.mount(&self.label(), options)?);
        }
        Ok(())
    }

    /// Detach the backend; failures are logged only
    pub fn close(&mut self) {
        if let Some(backend) = self.backend.take() {
            match backend.unmount() {
                Ok(()) => tracing::debug!("Closed {}", self.label()),
                Err(e) => tracing::warn!("{}", e),
            }
        }
    }
}

/// All nodes of a run
#[derive(Debug, Default)]
pub struct NodeRegistry {
    sources: Vec<Node>,
    destinations: Vec<Node>,
}

impl NodeRegistry {
    /// Parse every URI; any malformed one fails the whole registry
    pub fn from_uris<S: AsRef<str>>(sources: &[S], destinations: &[S]) -> Result<Self> {
        if sources.is_empty() {
            return Err(FanCopyError::config("no source endpoints given"));
        }
        if destinations.is_empty() {
            return Err(FanCopyError::config("no destination endpoints given"));
        }

        let build = |role: NodeRole, uris: &[S]| -> Result<Vec<Node>> {
            uris.iter()
                .enumerate()
                .map(|(i, uri)| Ok(Node::new(role, i, NodeSpec::parse(uri.as_ref())?)))
                .collect()
        };

        Ok(Self {
            sources: build(NodeRole::Source, sources)?,
            destinations: build(NodeRole::Destination, destinations)?,
        })
    }

    /// Registry from already built nodes
    pub fn from_nodes(sources: Vec<Node>, destinations: Vec<Node>) -> Self {
        Self {
            sources,
            destinations,
        }
    }

    /// Attach every node, sources first, in registration order
    ///
    /// Stops at the first failure; nodes opened so far stay open until
    /// [`close_all`](Self::close_all) or drop.
    pub fn open_all(&mut self, options: &MountOptions) -> Result<()> {
        for node in self.sources.iter_mut().chain(self.destinations.iter_mut()) {
            tracing::debug!("Opening {} ({})", node.label(), node.spec.endpoint);
            node.open(options)?;
        }
        Ok(())
    }

    /// Make sure every destination root exists
    pub fn create_destination_roots(&self) -> Result<()> {
        for node in &self.destinations {
            node.backend()?
                .mkdir_idempotent(node.root(), DESTINATION_ROOT_MODE)?;
            tracing::debug!("Destination root {} ready on {}", node.root(), node.label());
        }
        Ok(())
    }

    /// Detach every node; safe to call more than once
    pub fn close_all(&mut self) {
        for node in self.sources.iter_mut().chain(self.destinations.iter_mut()) {
            node.close();
        }
    }

    /// Source node by index
    pub fn source(&self, index: usize) -> Result<&Node> {
        self.sources
            .get(index)
            .ok_or_else(|| FanCopyError::NodeUnavailable(format!("no source node {}", index)))
    }

    /// Destination node by index
    pub fn destination(&self, index: usize) -> Result<&Node> {
        self.destinations
            .get(index)
            .ok_or_else(|| FanCopyError::NodeUnavailable(format!("no destination node {}", index)))
    }

    /// Number of source nodes
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Number of destination nodes
    pub fn destination_count(&self) -> usize {
        self.destinations.len()
    }

    /// Source nodes
    pub fn sources(&self) -> &[Node] {
        &self.sources
    }

    /// Destination nodes
    pub fn destinations(&self) -> &[Node] {
        &self.destinations
    }
}

impl Drop for NodeRegistry {
    fn drop(&mut self) {
        self.close_all();
    }
}
