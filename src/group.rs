//! Node-local grouping and leader election
//!
//! Processes that share a physical node are gathered into one subgroup by
//! splitting the parent group on a hash of the node's name. Within each
//! subgroup the substrate hands out ranks; whoever gets rank
//! [`LEADER_RANK`] is the node leader. The resolver never re-elects: the
//! outcome is entirely the substrate's split semantics applied to the key.
//!
//! Two distinct nodes whose names hash to the same key end up in the same
//! subgroup and share one leader. With a 32-bit hash over the hostnames of
//! a single job this is unlikely, and it is not guarded against.

use std::fmt;

/// Local rank of the node leader within its subgroup
pub const LEADER_RANK: i32 = 0;

/// Substrate status code meaning success
pub const GROUP_OK: i32 = 0;

/// Split key shared by every process on the same physical node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(pub u32);

impl NodeKey {
    /// Hash a node identity with the sdbm function
    ///
    /// `hash = hash * 65599 + byte` over the identity's bytes, left to right,
    /// in wrapping 32-bit arithmetic. Pure: identical bytes give identical
    /// keys on every process.
    pub fn from_identity(identity: &str) -> Self {
        let hash = identity.bytes().fold(0u32, |hash, byte| {
            u32::from(byte)
                .wrapping_add(hash << 6)
                .wrapping_add(hash << 16)
                .wrapping_sub(hash)
        });
        NodeKey(hash)
    }

    /// Raw hash value
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Key folded into the non-negative `i32` range
    ///
    /// For substrates that reject negative split keys. Folding drops the top
    /// bit, so two keys differing only there map to the same color.
    pub fn as_color(&self) -> i32 {
        (self.0 & i32::MAX as u32) as i32
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// The distributed group-communication substrate
///
/// `split` and the rank queries are collective in a real substrate: every
/// member of the parent group must make the matching call, in the same
/// order, or the call blocks forever. Errors carry the substrate's raw code.
pub trait GroupSubstrate {
    /// Handle to a group (a communicator)
    type Group;

    /// Stable name of the physical node this process runs on
    fn processor_identity(&self) -> Result<String, i32>;

    /// This process's rank in `group`
    fn rank_in(&self, group: &Self::Group) -> Result<i32, i32>;

    /// Split `group` into subgroups of processes with equal `key`
    ///
    /// Within a subgroup, ranks are ordered by `preferred_rank`.
    fn split(
        &self,
        group: &Self::Group,
        key: NodeKey,
        preferred_rank: i32,
    ) -> Result<Self::Group, i32>;

    /// Release a group obtained from `split`
    fn free(&self, group: Self::Group) -> Result<(), i32>;
}

/// Where a process landed after resolution
#[derive(Debug)]
pub struct NodePlacement<G> {
    /// Key of this process's node
    pub node_key: NodeKey,
    /// Rank in the parent group
    pub parent_rank: i32,
    /// Rank within the node-local subgroup
    pub local_rank: i32,
    /// The node-local subgroup
    pub subgroup: G,
}

impl<G> NodePlacement<G> {
    /// Whether this process is the node leader
    pub fn is_leader(&self) -> bool {
        self.local_rank == LEADER_RANK
    }
}

/// Step of resolution that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStage {
    /// Looking up the node identity
    Identity,
    /// Querying the rank in the parent group
    ParentRank,
    /// Splitting the parent group
    Split,
    /// Querying the rank in the new subgroup
    LocalRank,
}

/// Failed resolution
///
/// If the split already succeeded, the subgroup is handed back so the
/// caller can release it.
#[derive(Debug)]
pub struct PlacementError<G> {
    /// Raw substrate code
    pub code: i32,
    /// Step that failed
    pub stage: ResolveStage,
    /// Key computed before the failure, if any
    pub node_key: Option<NodeKey>,
    /// Subgroup created before the failure, if any
    pub subgroup: Option<G>,
}

/// Partitions a parent group into node-local subgroups
pub struct NodeGroupResolver<'a, S: GroupSubstrate> {
    substrate: &'a S,
    identity_override: Option<&'a str>,
}

impl<'a, S: GroupSubstrate> NodeGroupResolver<'a, S> {
    /// Create a resolver over `substrate`
    pub fn new(substrate: &'a S) -> Self {
        Self {
            substrate,
            identity_override: None,
        }
    }

    /// Use `identity` instead of asking the substrate
    pub fn with_identity(mut self, identity: Option<&'a str>) -> Self {
        self.identity_override = identity;
        self
    }

    /// Node identity used for the split key
    pub fn identity(&self) -> Result<String, i32> {
        match self.identity_override {
            Some(name) => Ok(name.to_string()),
            None => self.substrate.processor_identity(),
        }
    }

    /// Split `parent` by node and report this process's placement
    ///
    /// Collective over `parent`. Stops at the first substrate failure.
    pub fn resolve(
        &self,
        parent: &S::Group,
    ) -> Result<NodePlacement<S::Group>, PlacementError<S::Group>> {
        let identity = self.identity().map_err(|code| PlacementError {
            code,
            stage: ResolveStage::Identity,
            node_key: None,
            subgroup: None,
        })?;
        let node_key = NodeKey::from_identity(&identity);

        let parent_rank = self.substrate.rank_in(parent).map_err(|code| PlacementError {
            code,
            stage: ResolveStage::ParentRank,
            node_key: Some(node_key),
            subgroup: None,
        })?;

        let subgroup = self
            .substrate
            .split(parent, node_key, parent_rank)
            .map_err(|code| PlacementError {
                code,
                stage: ResolveStage::Split,
                node_key: Some(node_key),
                subgroup: None,
            })?;

        let local_rank = match self.substrate.rank_in(&subgroup) {
            Ok(rank) => rank,
            Err(code) => {
                return Err(PlacementError {
                    code,
                    stage: ResolveStage::LocalRank,
                    node_key: Some(node_key),
                    subgroup: Some(subgroup),
                })
            }
        };

        log::trace!(
            "node {} ({}): parent rank {} -> local rank {}",
            identity,
            node_key,
            parent_rank,
            local_rank
        );

        Ok(NodePlacement {
            node_key,
            parent_rank,
            local_rank,
            subgroup,
        })
    }
}
