//! Configuration types for phdeem

/// Environment variable that overrides the node identity
pub const NODE_NAME_ENV: &str = "PHDEEM_NODE_NAME";

/// Coordinator configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Node identity used for grouping instead of the substrate's processor
    /// name. Every process on a node must see the same value.
    pub node_name: Option<String>,
}

impl CoordinatorConfig {
    /// Create a configuration with a fixed node name
    pub fn with_node_name(name: impl Into<String>) -> Self {
        Self {
            node_name: Some(name.into()),
        }
    }

    /// Read the configuration from the environment
    ///
    /// An empty `PHDEEM_NODE_NAME` counts as unset.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let node_name = lookup(NODE_NAME_ENV).filter(|name| !name.trim().is_empty());
        Self { node_name }
    }
}
