//! GlusterFS endpoints
//!
//! Volumes are attached with `mount -t glusterfs`, the volfile server and
//! transport taken from the endpoint.

use super::mount::MountRequest;

/// Transport used when the endpoint leaves the protocol empty
pub const GLUSTER_DEFAULT_PROTOCOL: &str = "tcp";

/// Volfile server port used when the endpoint leaves the port empty or zero
pub const GLUSTER_DEFAULT_PORT: u16 = 24007;

/// GlusterFS connection parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlusterConfig {
    /// Transport (tcp, rdma, unix)
    pub protocol: String,
    /// Volfile server host
    pub server: String,
    /// Volfile server port
    pub port: u16,
    /// Volume name
    pub volume: String,
}

impl GlusterConfig {
    /// Build a config, applying defaults for an empty protocol and a zero port
    pub fn new(protocol: &str, server: &str, port: u16, volume: &str) -> Self {
        Self {
            protocol: if protocol.is_empty() {
                GLUSTER_DEFAULT_PROTOCOL.to_string()
            } else {
                protocol.to_string()
            },
            server: server.to_string(),
            port: if port == 0 { GLUSTER_DEFAULT_PORT } else { port },
            volume: volume.to_string(),
        }
    }

    /// Mount source as shown by the mount table
    pub fn mount_source(&self) -> String {
        format!("{}:/{}", self.server, self.volume.trim_start_matches('/'))
    }

    /// Request for the mount helper
    pub fn mount_request(&self) -> MountRequest {
        MountRequest {
            fstype: "glusterfs",
            table_fstypes: &["fuse.glusterfs", "glusterfs"],
            source: self.mount_source(),
            options: vec![
                format!("transport={}", self.protocol),
                format!("volfile-server-port={}", self.port),
            ],
        }
    }
}
