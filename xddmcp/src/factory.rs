//! Instantiates one [`common::flow_builder::FlowBuilder`] per shard,
//! locally or through a [`remote::Transport`], and applies the uniform
//! per-side parameters (spec.md §4.7).
//!
//! Grounded on `original_source/.../xdd/factory.py`'s `EndpointFactory`:
//! sinks are built before sources, each gets a stable shard index in
//! construction order, and every endpoint is handed the same per-side
//! request size / direct-I/O / ordering / verbose / timestamp flags.

use std::sync::Arc;

use anyhow::Context;
use common::config::SideConfig;
use common::flow_builder::{FlowBuilder, LocalFlowBuilder};
use common::model::{BuildFlowRequest, Iface, Ordering, ShardIdentity, ShardRole, SideFlags};
use remote::{SshSession, Transport};

/// One source or sink host as parsed from a CLI spec string plus the
/// thread count assigned to it by [`common::spec::partition_threads`].
#[derive(Debug, Clone)]
pub struct HostDescriptor {
    pub user: Option<String>,
    /// Hostname or IP address used both to reach the host over SSH and,
    /// absent an explicit interface list, as the sole `-e2e` interface.
    pub host: String,
    pub threads: u32,
    pub ifaces: Vec<String>,
    pub port: u16,
}

impl HostDescriptor {
    fn is_local(&self) -> bool {
        matches!(self.host.as_str(), "localhost" | "127.0.0.1" | "::1")
    }

    fn iface_list(&self, port: u16, threads: u32) -> Vec<Iface> {
        let hosts: &[String] = if self.ifaces.is_empty() {
            std::slice::from_ref(&self.host)
        } else {
            &self.ifaces
        };
        hosts
            .iter()
            .map(|h| Iface {
                host: h.clone(),
                port,
                threads,
                numa: None,
            })
            .collect()
    }
}

/// Options controlling how a remote `xddmcp-agent` is located and, if
/// missing, deployed.
#[derive(Debug, Clone, Default)]
pub struct AgentOptions {
    pub explicit_path: Option<String>,
    pub auto_deploy: bool,
}

/// A constructed endpoint: its `FlowBuilder` handle plus, for remote
/// endpoints, the owning `Transport` kept alive until teardown.
enum Endpoint {
    Local(Arc<LocalFlowBuilder>),
    Remote(Transport),
}

impl Endpoint {
    fn flow_builder(&self) -> Arc<dyn FlowBuilder> {
        match self {
            Endpoint::Local(b) => b.clone() as Arc<dyn FlowBuilder>,
            Endpoint::Remote(t) => t.flow_builder() as Arc<dyn FlowBuilder>,
        }
    }
}

/// Builds and owns every endpoint (local or tunneled) participating in a
/// transfer, and tears them all down together on [`EndpointFactory::shutdown`].
pub struct EndpointFactory {
    req_size: u64,
    source_side: SideConfig,
    source_mover_path: String,
    sources: Vec<HostDescriptor>,
    sink_side: SideConfig,
    sink_mover_path: String,
    sinks: Vec<HostDescriptor>,
    agent_opts: AgentOptions,
    endpoints: Vec<Endpoint>,
    sink_handles: Vec<Arc<dyn FlowBuilder>>,
    source_handles: Vec<Arc<dyn FlowBuilder>>,
}

impl EndpointFactory {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        req_size: u64,
        source_side: SideConfig,
        source_mover_path: String,
        sources: Vec<HostDescriptor>,
        sink_side: SideConfig,
        sink_mover_path: String,
        sinks: Vec<HostDescriptor>,
        agent_opts: AgentOptions,
    ) -> Self {
        Self {
            req_size,
            source_side,
            source_mover_path,
            sources,
            sink_side,
            sink_mover_path,
            sinks,
            agent_opts,
            endpoints: Vec::new(),
            sink_handles: Vec::new(),
            source_handles: Vec::new(),
        }
    }

    async fn build_one(&mut self, host: &HostDescriptor) -> anyhow::Result<Arc<dyn FlowBuilder>> {
        let endpoint = if host.is_local() {
            Endpoint::Local(LocalFlowBuilder::shared())
        } else {
            let ssh = SshSession {
                user: host.user.clone(),
                host: host.host.clone(),
                port: None,
            };
            let transport = Transport::connect(
                &ssh,
                self.agent_opts.explicit_path.as_deref(),
                self.agent_opts.auto_deploy,
            )
            .await
            .with_context(|| format!("failed to create endpoint for host '{}'", host.host))?;
            Endpoint::Remote(transport)
        };
        let handle = endpoint.flow_builder();
        self.endpoints.push(endpoint);
        Ok(handle)
    }

    fn side_flags(side: &SideConfig, role: ShardRole) -> SideFlags {
        let ordering = match role {
            ShardRole::Sink if side.serial_ordering => Ordering::Serial,
            ShardRole::Sink => Ordering::None,
            ShardRole::Source => Ordering::Loose,
        };
        SideFlags {
            direct_io: side.direct_io,
            ordering,
            verbose: side.verbose,
            timestamp: side.timestamp,
        }
    }

    /// Build every sink endpoint, then every source endpoint, calling
    /// `build_flow` on each with its shard identity and side flags. Runs
    /// the post-creation protocol-version and preallocate-support checks
    /// before returning.
    pub async fn create_endpoints(&mut self) -> anyhow::Result<()> {
        let sinks = self.sinks.clone();
        let total_sinks = sinks.len() as u64;
        for (idx, host) in sinks.iter().enumerate() {
            let handle = self.build_one(host).await?;
            let ifaces = host.iface_list(host.port, host.threads);
            handle
                .build_flow(BuildFlowRequest {
                    identity: ShardIdentity {
                        role: ShardRole::Sink,
                        index: idx as u64,
                        total: total_sinks,
                    },
                    req_size: self.req_size,
                    ifaces,
                    flags: Self::side_flags(&self.sink_side, ShardRole::Sink),
                    mover_path: self.sink_mover_path.clone(),
                })
                .await
                .with_context(|| format!("failed to configure sink flow on '{}'", host.host))?;
            self.sink_handles.push(handle);
        }

        let sources = self.sources.clone();
        let total_sources = sources.len() as u64;
        for (idx, host) in sources.iter().enumerate() {
            let handle = self.build_one(host).await?;
            let ifaces = host.iface_list(host.port, host.threads);
            handle
                .build_flow(BuildFlowRequest {
                    identity: ShardIdentity {
                        role: ShardRole::Source,
                        index: idx as u64,
                        total: total_sources,
                    },
                    req_size: self.req_size,
                    ifaces,
                    flags: Self::side_flags(&self.source_side, ShardRole::Source),
                    mover_path: self.source_mover_path.clone(),
                })
                .await
                .with_context(|| format!("failed to configure source flow on '{}'", host.host))?;
            self.source_handles.push(handle);
        }

        self.post_create_checks().await
    }

    async fn post_create_checks(&self) -> anyhow::Result<()> {
        let mut base: Option<String> = None;
        for handle in self.all_handles() {
            let version = handle.protocol_version().await?;
            if version.is_empty() {
                anyhow::bail!("endpoint reported an empty protocol version");
            }
            match &base {
                None => base = Some(version),
                Some(b) if b != &version => {
                    anyhow::bail!("endpoint protocol versions do not match: '{b}' vs '{version}'");
                }
                _ => {}
            }
        }
        for handle in &self.sink_handles {
            if !handle.has_preallocate_available().await? {
                tracing::warn!("sink endpoint does not support mover preallocation");
            }
        }
        Ok(())
    }

    fn all_handles(&self) -> impl Iterator<Item = &Arc<dyn FlowBuilder>> {
        self.sink_handles.iter().chain(self.source_handles.iter())
    }

    pub fn sink_endpoints(&self) -> &[Arc<dyn FlowBuilder>] {
        &self.sink_handles
    }

    pub fn source_endpoints(&self) -> &[Arc<dyn FlowBuilder>] {
        &self.source_handles
    }

    pub fn all_endpoints(&self) -> Vec<Arc<dyn FlowBuilder>> {
        self.all_handles().cloned().collect()
    }

    /// Shut down every remote transport. Safe to call even if
    /// `create_endpoints` failed partway through.
    pub async fn shutdown(self) {
        for endpoint in self.endpoints {
            if let Endpoint::Remote(transport) = endpoint {
                transport.shutdown().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn localhost_variants_are_local() {
        let mk = |host: &str| HostDescriptor {
            user: None,
            host: host.to_string(),
            threads: 1,
            ifaces: vec![],
            port: 40010,
        };
        assert!(mk("localhost").is_local());
        assert!(mk("127.0.0.1").is_local());
        assert!(!mk("otherhost").is_local());
    }

    #[test]
    fn iface_list_falls_back_to_host_when_no_explicit_ifaces() {
        let host = HostDescriptor {
            user: None,
            host: "10.0.0.1".to_string(),
            threads: 4,
            ifaces: vec![],
            port: 40010,
        };
        let ifaces = host.iface_list(40010, 4);
        assert_eq!(ifaces.len(), 1);
        assert_eq!(ifaces[0].host, "10.0.0.1");
        assert_eq!(ifaces[0].threads, 4);
    }

    #[test]
    fn iface_list_uses_explicit_interfaces() {
        let host = HostDescriptor {
            user: None,
            host: "10.0.0.1".to_string(),
            threads: 4,
            ifaces: vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()],
            port: 40010,
        };
        let ifaces = host.iface_list(40010, 4);
        assert_eq!(ifaces.len(), 2);
    }

    #[test]
    fn sink_ordering_defaults_to_none_source_to_loose() {
        let side = SideConfig::default();
        assert_eq!(
            EndpointFactory::side_flags(&side, ShardRole::Sink).ordering,
            Ordering::None
        );
        assert_eq!(
            EndpointFactory::side_flags(&side, ShardRole::Source).ordering,
            Ordering::Loose
        );
    }

    #[test]
    fn serial_flag_forces_serial_ordering_on_sink() {
        let side = SideConfig {
            serial_ordering: true,
            ..Default::default()
        };
        assert_eq!(
            EndpointFactory::side_flags(&side, ShardRole::Sink).ordering,
            Ordering::Serial
        );
    }
}
