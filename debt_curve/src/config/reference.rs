use std::{
    collections::{HashMap, HashSet},
    path::Path,
};

use alloy::primitives::Address;
use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Static description of one Compound-style deployment, as stored in the protocol reference file
/// under `<protocol>.<network>`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolReference {
    pub comptroller: Address,
    /// Native-coin market, it has no `underlying()`
    #[serde(rename = "cETH")]
    pub ceth: Address,
    #[serde(rename = "cETH2", default)]
    pub ceth2: Option<Address>,
    pub deploy_block: u64,
    /// Block window used when scanning `MarketEntered` logs
    pub block_step_in_init: u64,
    /// Number of users per multicall batch
    pub multicall_size: usize,
    #[serde(default)]
    pub non_borrowable_markets: Vec<Address>,
    /// Markets whose collateral can't accrue interest, queried with a plain `balanceOf`
    #[serde(rename = "rektMarkets", default)]
    pub non_supplyable_markets: Vec<Address>,
    #[serde(default)]
    pub stablecoin_markets: Vec<Address>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddressTable {
    multicall_address: HashMap<String, Address>,
}

/// Reference data loaded once at startup and handed to the harvester and the market loader.
#[derive(Debug, Clone)]
pub struct ReferenceData {
    pub protocol_name: String,
    pub network: String,
    pub protocol: ProtocolReference,
    pub multicall_address: Address,
}

impl ReferenceData {
    /// Loads the protocol reference and the multicall address table from disk
    ///
    /// # Arguments
    /// * `protocol_reference_path` - JSON keyed by protocol then network
    /// * `addresses_path` - JSON with a `multicallAddress` table keyed by network
    /// * `protocol_name` - Protocol key, e.g. `compound`
    /// * `network` - Network key, e.g. `ETH`
    pub fn load(
        protocol_reference_path: impl AsRef<Path>,
        addresses_path: impl AsRef<Path>,
        protocol_name: &str,
        network: &str,
    ) -> Result<Self> {
        let protocol_reference_path = protocol_reference_path.as_ref();
        let addresses_path = addresses_path.as_ref();

        let references = std::fs::read_to_string(protocol_reference_path).with_context(|| {
            format!("Failed to read {}", protocol_reference_path.display())
        })?;
        let addresses = std::fs::read_to_string(addresses_path)
            .with_context(|| format!("Failed to read {}", addresses_path.display()))?;

        Self::from_json(&references, &addresses, protocol_name, network)
    }

    pub fn from_json(
        references: &str,
        addresses: &str,
        protocol_name: &str,
        network: &str,
    ) -> Result<Self> {
        let mut references: HashMap<String, HashMap<String, ProtocolReference>> =
            serde_json::from_str(references).context("Malformed protocol reference file")?;
        let addresses: AddressTable =
            serde_json::from_str(addresses).context("Malformed addresses file")?;

        let protocol = references
            .get_mut(protocol_name)
            .and_then(|networks| networks.remove(network))
            .with_context(|| format!("No reference for {} on {}", protocol_name, network))?;

        if protocol.block_step_in_init == 0 {
            bail!("blockStepInInit must be greater than zero");
        }
        if protocol.multicall_size == 0 {
            bail!("multicallSize must be greater than zero");
        }

        let multicall_address = *addresses
            .multicall_address
            .get(network)
            .with_context(|| format!("No multicall address for {}", network))?;

        Ok(Self {
            protocol_name: protocol_name.to_string(),
            network: network.to_string(),
            protocol,
            multicall_address,
        })
    }

    pub fn native_markets(&self) -> Vec<Address> {
        std::iter::once(self.protocol.ceth)
            .chain(self.protocol.ceth2)
            .collect()
    }

    pub fn is_native_market(&self, market: &Address) -> bool {
        self.native_markets().contains(market)
    }

    pub fn is_borrowable(&self, market: &Address) -> bool {
        !self.protocol.non_borrowable_markets.contains(market)
    }

    pub fn is_supplyable(&self, market: &Address) -> bool {
        !self.protocol.non_supplyable_markets.contains(market)
    }

    pub fn stablecoin_markets(&self) -> HashSet<Address> {
        self.protocol.stablecoin_markets.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;

    use super::*;

    const REFERENCES: &str = r#"{
        "compound": {
            "ETH": {
                "comptroller": "0x3d9819210a31b4961b30ef54be2aed79b9c9cd3b",
                "cETH": "0x4Ddc2D193948926D02f9B1fE9e1daa0718270ED5",
                "deployBlock": 7710671,
                "blockStepInInit": 50000,
                "multicallSize": 50,
                "rektMarkets": ["0x158079Ee67Fce2f58472A96584A73C7Ab9AC95c1"],
                "nonBorrowableMarkets": ["0x35A18000230DA775CAc24873d00Ff85BccdeD550"],
                "stablecoinMarkets": ["0x5d3a536E4D6DbD6114cc1Ead35777bAB948E3643"]
            }
        }
    }"#;

    const ADDRESSES: &str = r#"{
        "multicallAddress": { "ETH": "0xcA11bde05977b3631167028862bE2a173976CA11" }
    }"#;

    #[test]
    fn test_load_reference_from_json() {
        let reference = ReferenceData::from_json(REFERENCES, ADDRESSES, "compound", "ETH").unwrap();

        assert_eq!(reference.protocol.deploy_block, 7710671);
        assert_eq!(reference.protocol.multicall_size, 50);
        assert_eq!(
            reference.multicall_address,
            address!("cA11bde05977b3631167028862bE2a173976CA11")
        );
        assert_eq!(
            reference.native_markets(),
            vec![address!("4Ddc2D193948926D02f9B1fE9e1daa0718270ED5")]
        );
        assert!(!reference.is_supplyable(&address!("158079Ee67Fce2f58472A96584A73C7Ab9AC95c1")));
        assert!(!reference.is_borrowable(&address!("35A18000230DA775CAc24873d00Ff85BccdeD550")));
        assert!(reference.is_borrowable(&address!("4Ddc2D193948926D02f9B1fE9e1daa0718270ED5")));
        assert!(reference
            .stablecoin_markets()
            .contains(&address!("5d3a536E4D6DbD6114cc1Ead35777bAB948E3643")));
    }

    #[test]
    fn test_bundled_reference_discounts_every_stablecoin_market() {
        let reference = ReferenceData::from_json(
            include_str!("../../../data/protocol_reference.json"),
            include_str!("../../../data/addresses.json"),
            "compound",
            "ETH",
        )
        .unwrap();

        let stablecoins = reference.stablecoin_markets();
        assert_eq!(stablecoins.len(), 4);
        for market in [
            address!("5d3a536E4D6DbD6114cc1Ead35777bAB948E3643"),
            address!("39AA39c021dfbaE8faC545936693aC917d5E7563"),
            address!("f650C3d88D12dB855b8bf7D11Be6C55A4e07dCC9"),
            address!("12392F67bdf24faE0AF363c24aC620a2f67DAd86"),
        ] {
            assert!(stablecoins.contains(&market));
        }
    }

    #[test]
    fn test_unknown_network_is_an_error() {
        assert!(ReferenceData::from_json(REFERENCES, ADDRESSES, "compound", "CRO").is_err());
        assert!(ReferenceData::from_json(REFERENCES, ADDRESSES, "tectonic", "ETH").is_err());
    }
}
