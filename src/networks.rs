/// Per-network connection data: the default node endpoint and the type-alias
/// table handed to the chain client at connect time.
///
/// Networks differ only in these tables, so they are kept as plain data and
/// looked up by name. Nothing in the stall decision reads them.
use std::collections::BTreeMap;

/// Endpoint used when neither the CLI nor the config file names one.
pub const DEFAULT_NODE_URL: &str = "ws://localhost:9944";

/// Name of the network selected when none is given.
pub const DEFAULT_NETWORK: &str = "mainnet";

/// Aliases shared by every network: identity, signaling and voting modules.
const COMMON_ALIASES: &[(&str, &str)] = &[
    ("IdentityType", "Text"),
    ("Attestation", "Bytes"),
    ("IdentityStage", "u8"),
    ("ProposalStage", "u8"),
    ("ProposalCategory", "u8"),
    ("ProposalTitle", "Bytes"),
    ("ProposalContents", "Bytes"),
    ("VoteStage", "u8"),
    ("VoteType", "u8"),
    ("TallyType", "u8"),
    ("VoteOutcome", "[u8; 32]"),
];

const MAINNET_ALIASES: &[(&str, &str)] = &[("Balance2", "u128")];

const TESTNET_ALIASES: &[(&str, &str)] = &[("Balance2", "u128"), ("Keys", "SessionKeys4")];

/// A named network entry.
#[derive(Debug, Clone, Copy)]
pub struct Network {
    pub name: &'static str,
    pub default_url: &'static str,
    aliases: &'static [(&'static str, &'static str)],
}

const NETWORKS: &[Network] = &[
    Network {
        name: "mainnet",
        default_url: DEFAULT_NODE_URL,
        aliases: MAINNET_ALIASES,
    },
    Network {
        name: "testnet",
        default_url: DEFAULT_NODE_URL,
        aliases: TESTNET_ALIASES,
    },
];

/// Type aliases registered with the chain client, keyed by alias name.
pub type TypeRegistry = BTreeMap<String, String>;

impl Network {
    /// Build the full alias table: common aliases plus this network's extras.
    /// Network-specific entries win over common ones with the same name.
    pub fn type_registry(&self) -> TypeRegistry {
        COMMON_ALIASES
            .iter()
            .chain(self.aliases.iter())
            .map(|(alias, ty)| (alias.to_string(), ty.to_string()))
            .collect()
    }
}

/// Look up a network by name (case-insensitive).
pub fn lookup(name: &str) -> Option<Network> {
    NETWORKS
        .iter()
        .find(|n| n.name.eq_ignore_ascii_case(name))
        .copied()
}

/// Names of all known networks, for error messages.
pub fn known_names() -> Vec<&'static str> {
    NETWORKS.iter().map(|n| n.name).collect()
}
