//! docker-compose descriptor for the provisioned nodes.

use serde::Serialize;
use serde_yaml::{Mapping, Value};

use crate::node_config::P2P_PORT;

pub const IMAGE_REPOSITORY: &str = "publicawesome/stargaze";
pub const API_CONTAINER_PORT: u16 = 1317;
pub const GRPC_CONTAINER_PORT: u16 = 9090;

/// Host ports reserved per node: three P2P/RPC ports, then API, then gRPC.
pub const PORTS_PER_NODE: u16 = 5;

const HEADER: &str = "# Stargaze Testnet\n";
const COMPOSE_VERSION: &str = "3.1";

/// Port assignment for one node's container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestnetNode {
    pub name: String,
    pub outside_port_range: (u16, u16),
    pub inside_port_range: (u16, u16),
    pub api_port: u16,
    pub grpc_port: u16,
}

impl TestnetNode {
    /// All host ports this node binds.
    pub fn host_ports(&self) -> std::ops::RangeInclusive<u16> {
        self.outside_port_range.0..=self.grpc_port
    }
}

/// Hands out consecutive port blocks starting at the configured port.
#[derive(Debug)]
pub struct PortAllocator {
    next: u32,
}

impl PortAllocator {
    pub fn new(starting_port: u16) -> Self {
        Self { next: starting_port.into() }
    }

    /// Whether `nodes` blocks fit below port 65535 starting at `starting_port`.
    pub fn fits(starting_port: u16, nodes: usize) -> bool {
        (nodes as u64)
            .checked_mul(u64::from(PORTS_PER_NODE))
            .is_some_and(|needed| u64::from(starting_port) + needed <= u64::from(u16::MAX) + 1)
    }

    pub fn allocate(&mut self, name: &str) -> Option<TestnetNode> {
        let start = u16::try_from(self.next).ok()?;
        let end = start.checked_add(PORTS_PER_NODE - 1)?;
        self.next = u32::from(end) + 1;
        Some(TestnetNode {
            name: name.to_string(),
            outside_port_range: (start, start + 2),
            inside_port_range: (P2P_PORT, P2P_PORT + 2),
            api_port: start + 3,
            grpc_port: end,
        })
    }
}

#[derive(Serialize)]
struct Service {
    image: String,
    restart: &'static str,
    ports: Vec<String>,
    volumes: Vec<String>,
}

#[derive(Serialize)]
struct ComposeFile {
    version: &'static str,
    services: Mapping,
}

fn range(ports: (u16, u16)) -> String {
    format!("{}-{}", ports.0, ports.1)
}

/// Renders the compose file; `daemon_home` names each node's data directory.
pub fn render_compose(
    nodes: &[TestnetNode],
    tag: &str,
    daemon_home: &str,
) -> Result<String, serde_yaml::Error> {
    let mut services = Mapping::new();
    for node in nodes {
        let service = Service {
            image: format!("{IMAGE_REPOSITORY}:{tag}"),
            restart: "always",
            ports: vec![
                format!("{}:{}", range(node.outside_port_range), range(node.inside_port_range)),
                format!("{}:{}", node.api_port, API_CONTAINER_PORT),
                format!("{}:{}", node.grpc_port, GRPC_CONTAINER_PORT),
            ],
            volumes: vec![format!("./{}/{daemon_home}:/data/.{daemon_home}/", node.name)],
        };
        services.insert(Value::String(node.name.clone()), serde_yaml::to_value(service)?);
    }
    let body = serde_yaml::to_string(&ComposeFile { version: COMPOSE_VERSION, services })?;
    Ok(format!("{HEADER}{body}"))
}
