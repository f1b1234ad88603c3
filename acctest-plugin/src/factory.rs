//! Provider factories grouped by plugin protocol

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use acctest_core::BoxError;

use crate::PluginError;
use crate::server::ProviderServer;

/// Zero-argument constructor for a provider server
pub type ServerConstructor =
    Arc<dyn Fn() -> Result<Arc<dyn ProviderServer>, BoxError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Protocol {
    Legacy,
    ProtoV5,
    ProtoV6,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Legacy => write!(f, "legacy"),
            Protocol::ProtoV5 => write!(f, "protocol v5"),
            Protocol::ProtoV6 => write!(f, "protocol v6"),
        }
    }
}

#[derive(Clone)]
pub enum ProviderFactory {
    /// SDK provider served over protocol 5; needs an explicit stop
    Legacy(ServerConstructor),
    ProtoV5(ServerConstructor),
    ProtoV6(ServerConstructor),
}

impl ProviderFactory {
    pub fn legacy<F>(f: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn ProviderServer>, BoxError> + Send + Sync + 'static,
    {
        ProviderFactory::Legacy(Arc::new(f))
    }

    pub fn proto_v5<F>(f: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn ProviderServer>, BoxError> + Send + Sync + 'static,
    {
        ProviderFactory::ProtoV5(Arc::new(f))
    }

    pub fn proto_v6<F>(f: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn ProviderServer>, BoxError> + Send + Sync + 'static,
    {
        ProviderFactory::ProtoV6(Arc::new(f))
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            ProviderFactory::Legacy(_) => Protocol::Legacy,
            ProviderFactory::ProtoV5(_) => Protocol::ProtoV5,
            ProviderFactory::ProtoV6(_) => Protocol::ProtoV6,
        }
    }

    /// Wire protocol version announced in the reattach record
    pub fn protocol_version(&self) -> u32 {
        match self {
            ProviderFactory::Legacy(_) | ProviderFactory::ProtoV5(_) => 5,
            ProviderFactory::ProtoV6(_) => 6,
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, ProviderFactory::Legacy(_))
    }

    pub fn construct(&self) -> Result<Arc<dyn ProviderServer>, BoxError> {
        match self {
            ProviderFactory::Legacy(f) | ProviderFactory::ProtoV5(f) | ProviderFactory::ProtoV6(f) => f(),
        }
    }
}

impl fmt::Debug for ProviderFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProviderFactory({})", self.protocol())
    }
}

/// Named provider factories in registration order
#[derive(Debug, Clone, Default)]
pub struct ProviderFactories {
    entries: Vec<(String, ProviderFactory)>,
}

impl ProviderFactories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a factory, replacing one with the same name and protocol
    pub fn insert(&mut self, name: impl Into<String>, factory: ProviderFactory) {
        let name = name.into();
        let protocol = factory.protocol();
        match self
            .entries
            .iter_mut()
            .find(|(n, f)| *n == name && f.protocol() == protocol)
        {
            Some(entry) => entry.1 = factory,
            None => self.entries.push((name, factory)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, factory: ProviderFactory) -> Self {
        self.insert(name, factory);
        self
    }

    pub fn legacy<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn ProviderServer>, BoxError> + Send + Sync + 'static,
    {
        self.with(name, ProviderFactory::legacy(f))
    }

    pub fn proto_v5<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn ProviderServer>, BoxError> + Send + Sync + 'static,
    {
        self.with(name, ProviderFactory::proto_v5(f))
    }

    pub fn proto_v6<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn ProviderServer>, BoxError> + Send + Sync + 'static,
    {
        self.with(name, ProviderFactory::proto_v6(f))
    }

    /// Copy of `self` with the entries of `other` added on top
    pub fn merge(&self, other: &ProviderFactories) -> ProviderFactories {
        let mut merged = self.clone();
        for (name, factory) in &other.entries {
            merged.insert(name.clone(), factory.clone());
        }
        merged
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ProviderFactory)> {
        self.entries.iter().map(|(n, f)| (n.as_str(), f))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fail if a provider name is registered under more than one protocol
    pub fn check_overlap(&self) -> Result<(), PluginError> {
        let mut seen: BTreeMap<&str, Protocol> = BTreeMap::new();
        for (name, factory) in &self.entries {
            let protocol = factory.protocol();
            match seen.get(name.as_str()) {
                Some(first) if *first != protocol => {
                    let (first, second) = if *first < protocol {
                        (*first, protocol)
                    } else {
                        (protocol, *first)
                    };
                    return Err(PluginError::Overlap {
                        name: name.clone(),
                        first,
                        second,
                    });
                }
                Some(_) => {}
                None => {
                    seen.insert(name.as_str(), protocol);
                }
            }
        }
        Ok(())
    }
}
