pub mod forward;
pub mod http;
pub mod upgrade;

pub use forward::{strip_credentials, ForwardService, Forwarder, PhysicalGateway, VirtualCluster};
pub use http::{is_upgrade_request, strip_hop_by_hop, ClusterTransport, Credentials, LazyTransport};
