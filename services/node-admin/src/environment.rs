//! Environment descriptor shared by every node agent on a host.

use std::fmt::Debug;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use nodeadm_id::HostName;

/// How containers are attached to the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkType {
    /// Containers get their own address on the container network.
    Normal,
    /// Containers share the host network (development setups).
    Local,
    /// The host is itself a VM; containers get their own address.
    Vm,
}

impl NetworkType {
    /// Whether containers need an address of their own.
    pub fn assigns_container_address(&self) -> bool {
        !matches!(self, Self::Local)
    }
}

impl std::str::FromStr for NetworkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Self::Normal),
            "local" => Ok(Self::Local),
            "vm" => Ok(Self::Vm),
            other => Err(format!("unknown network type: {other}")),
        }
    }
}

/// Resolves a node's hostname to the address its container should use.
#[async_trait]
pub trait AddressResolver: Send + Sync + Debug {
    async fn resolve(&self, hostname: &HostName) -> io::Result<IpAddr>;
}

/// Resolver backed by the system's name service.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl AddressResolver for SystemResolver {
    async fn resolve(&self, hostname: &HostName) -> io::Result<IpAddr> {
        tokio::net::lookup_host((hostname.as_str(), 0))
            .await?
            .map(|addr| addr.ip())
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no address found for {hostname}"),
                )
            })
    }
}

/// Where this node admin runs.
#[derive(Debug, Clone)]
pub struct Environment {
    pub network_type: NetworkType,
    pub environment: String,
    pub region: String,
    pub zone: Option<String>,
    pub resolver: Arc<dyn AddressResolver>,
}

impl Environment {
    pub fn new(
        network_type: NetworkType,
        environment: impl Into<String>,
        region: impl Into<String>,
        resolver: Arc<dyn AddressResolver>,
    ) -> Self {
        Self {
            network_type,
            environment: environment.into(),
            region: region.into(),
            zone: None,
            resolver,
        }
    }

    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }

    /// Resolve the container address for a node, if this network assigns one.
    pub async fn container_address(&self, hostname: &HostName) -> io::Result<Option<IpAddr>> {
        if !self.network_type.assigns_container_address() {
            return Ok(None);
        }
        self.resolver.resolve(hostname).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::StaticResolver;

    #[test]
    fn test_network_type_parse() {
        assert_eq!("normal".parse::<NetworkType>(), Ok(NetworkType::Normal));
        assert_eq!("local".parse::<NetworkType>(), Ok(NetworkType::Local));
        assert_eq!("vm".parse::<NetworkType>(), Ok(NetworkType::Vm));
        assert!("bridge".parse::<NetworkType>().is_err());
    }

    #[tokio::test]
    async fn test_local_network_skips_resolution() {
        let resolver = Arc::new(StaticResolver::new("1.1.1.1".parse().unwrap()));
        let env = Environment::new(NetworkType::Local, "dev", "us-east-1", resolver);
        let host = HostName::parse("host1").unwrap();
        assert_eq!(env.container_address(&host).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_normal_network_resolves() {
        let resolver = Arc::new(StaticResolver::new("1.1.1.1".parse().unwrap()));
        let env = Environment::new(NetworkType::Normal, "dev", "us-east-1", resolver)
            .with_zone("zone-a");
        let host = HostName::parse("host1").unwrap();
        assert_eq!(
            env.container_address(&host).await.unwrap(),
            Some("1.1.1.1".parse().unwrap())
        );
        assert_eq!(env.zone.as_deref(), Some("zone-a"));
    }
}
