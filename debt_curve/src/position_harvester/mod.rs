pub mod models;

use std::collections::{HashMap, HashSet};

use alloy::{
    network::Ethereum,
    primitives::{Address, Bytes},
    providers::Provider,
    rpc::types::{Filter, Log},
    sol_types::{SolCall, SolEvent},
};
use anyhow::{bail, Context, Result};
use tracing::{info, instrument, warn};

use crate::{
    blockchain_manager::multicall::{CallOutcome, MulticallManager},
    config::ReferenceData,
    utils::contracts::{CToken, Comptroller},
};
use models::{BorrowerPosition, LegValue, Market, PositionLeg};

/// Inclusive block range covered by one log query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockWindow {
    pub from_block: u64,
    pub to_block: u64,
}

/// Splits `[from_block, to_block]` into contiguous windows of at most `window_size` blocks.
///
/// Windows never overlap and leave no gap; the last one is clipped to `to_block`.
pub fn block_windows(from_block: u64, to_block: u64, window_size: u64) -> Vec<BlockWindow> {
    let window_size = window_size.max(1);
    let mut windows = vec![];
    let mut start = from_block;

    while start <= to_block {
        let end = start.saturating_add(window_size - 1).min(to_block);
        windows.push(BlockWindow {
            from_block: start,
            to_block: end,
        });
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }

    windows
}

/// Addresses in discovery order, deduplicated, optionally capped.
#[derive(Debug, Default)]
pub struct MembershipSet {
    seen: HashSet<Address>,
    ordered: Vec<Address>,
    limit: Option<usize>,
}

impl MembershipSet {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    /// Adds `account` unless already known or the limit is reached.
    pub fn insert(&mut self, account: Address) {
        if self.is_full() {
            return;
        }
        if self.seen.insert(account) {
            self.ordered.push(account);
        }
    }

    pub fn is_full(&self) -> bool {
        self.limit.is_some_and(|limit| self.ordered.len() >= limit)
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn into_addresses(self) -> Vec<Address> {
        self.ordered
    }
}

/// Extracts the `account` of every `MarketEntered` log, skipping logs that don't decode.
pub fn decode_market_entered(logs: &[Log]) -> Vec<Address> {
    logs.iter()
        .filter_map(
            |log| match Comptroller::MarketEntered::decode_log(&log.inner, false) {
                Ok(event) => Some(event.data.account),
                Err(e) => {
                    warn!(
                        "Skipping undecodable log in tx {:?}: {}",
                        log.transaction_hash, e
                    );
                    None
                }
            },
        )
        .collect()
}

/// Calldata of the collateral balance query of `user` in `market`.
///
/// Markets that can't be supplied hold no interest-bearing balance and are queried with a
/// plain `balanceOf`.
pub fn collateral_call(market: &Market, user: Address) -> Bytes {
    if market.supplyable {
        CToken::balanceOfUnderlyingCall { owner: user }.abi_encode().into()
    } else {
        CToken::balanceOfCall { owner: user }.abi_encode().into()
    }
}

/// Calldata of the borrow balance query of `user` in `market`.
pub fn borrow_call(market: &Market, user: Address) -> Bytes {
    if market.borrowable {
        CToken::borrowBalanceStoredCall { account: user }.abi_encode().into()
    } else {
        CToken::balanceOfCall { owner: user }.abi_encode().into()
    }
}

fn decode_balance(outcome: &CallOutcome) -> LegValue {
    // All three balance queries return a single uint256
    match outcome.decode::<CToken::balanceOfCall>() {
        Some(balance) => LegValue::Decoded(balance._0),
        None => LegValue::Failed,
    }
}

/// Builds the positions of one batch from the outcomes of its three grouped calls.
///
/// `entered` holds one outcome per address; `collateral` and `borrow` hold one outcome per
/// (address, market) pair, addresses outermost. Every leg is decoded on its own: a failed
/// sub-call only marks the value it belongs to as [`LegValue::Failed`].
pub fn assemble_positions(
    addresses: &[Address],
    markets: &[Market],
    entered: &[CallOutcome],
    collateral: &[CallOutcome],
    borrow: &[CallOutcome],
) -> Result<HashMap<Address, BorrowerPosition>> {
    let legs_count = addresses.len() * markets.len();
    if entered.len() != addresses.len()
        || collateral.len() != legs_count
        || borrow.len() != legs_count
    {
        bail!(
            "Unexpected multicall result sizes: {} entered, {} collateral, {} borrow for {} users and {} markets",
            entered.len(),
            collateral.len(),
            borrow.len(),
            addresses.len(),
            markets.len()
        );
    }

    let mut positions = HashMap::with_capacity(addresses.len());

    for (user_index, user) in addresses.iter().enumerate() {
        let markets_entered = match entered[user_index].decode::<Comptroller::getAssetsInCall>() {
            Some(assets) => assets._0,
            None => {
                warn!("Failed to decode markets entered by {}", user);
                vec![]
            }
        };

        let legs = markets
            .iter()
            .enumerate()
            .map(|(market_index, market)| {
                let index = user_index * markets.len() + market_index;
                let leg = PositionLeg {
                    market: market.address,
                    collateral_raw: decode_balance(&collateral[index]),
                    borrow_raw: decode_balance(&borrow[index]),
                };
                (market.address, leg)
            })
            .collect();

        positions.insert(
            *user,
            BorrowerPosition {
                address: *user,
                markets_entered,
                legs,
            },
        );
    }

    Ok(positions)
}

/// Discovers the protocol's users and pulls their balances from the chain.
pub struct PositionHarvester<'a, P: Provider<Ethereum>> {
    provider: &'a P,
    reference: &'a ReferenceData,
    multicall_manager: MulticallManager<&'a P>,
}

impl<'a, P: Provider<Ethereum>> PositionHarvester<'a, P> {
    pub fn new(provider: &'a P, reference: &'a ReferenceData) -> Self {
        Self {
            provider,
            reference,
            multicall_manager: MulticallManager::new(provider, reference.multicall_address),
        }
    }

    /// Current head minus `safety_margin`, the last block considered final enough to scan.
    pub async fn safe_head(&self, safety_margin: u64) -> Result<u64> {
        let head = self
            .provider
            .get_block_number()
            .await
            .context("Failed to get current block")?;
        Ok(head.saturating_sub(safety_margin))
    }

    /// Scans `MarketEntered` logs window by window and collects the accounts they name
    ///
    /// # Arguments
    /// * `from_block` - First block to scan, usually the deploy block
    /// * `to_block` - Last block to scan, inclusive
    /// * `window_size` - Maximum number of blocks per log query
    /// * `limit` - Stop once this many unique accounts are known
    ///
    /// # Returns
    /// * `Result<Vec<Address>>` - Unique accounts in discovery order
    #[instrument("HARVESTER", skip(self))]
    pub async fn scan_memberships(
        &self,
        from_block: u64,
        to_block: u64,
        window_size: u64,
        limit: Option<usize>,
    ) -> Result<Vec<Address>> {
        if window_size == 0 {
            bail!("Window size must be greater than zero");
        }

        let windows = block_windows(from_block, to_block, window_size);
        let mut memberships = MembershipSet::new(limit);

        for (index, window) in windows.iter().enumerate() {
            let logs = self.fetch_logs(window).await?;
            for account in decode_market_entered(&logs) {
                memberships.insert(account);
            }

            info!(
                "Scanned blocks {} to {} | {}/{} windows | {} accounts",
                window.from_block,
                window.to_block,
                index + 1,
                windows.len(),
                memberships.len()
            );

            if memberships.is_full() {
                info!("Reached the limit of {:?} accounts", limit);
                break;
            }
        }

        if memberships.is_empty() {
            warn!(
                "No MarketEntered logs between blocks {} and {}",
                from_block, to_block
            );
        }

        Ok(memberships.into_addresses())
    }

    async fn fetch_logs(&self, window: &BlockWindow) -> Result<Vec<Log>> {
        let filter = Filter::new()
            .address(self.reference.protocol.comptroller)
            .event_signature(Comptroller::MarketEntered::SIGNATURE_HASH)
            .from_block(window.from_block)
            .to_block(window.to_block);

        self.provider.get_logs(&filter).await.with_context(|| {
            format!(
                "Failed to fetch logs from block {} to {}",
                window.from_block, window.to_block
            )
        })
    }

    /// Fetches the positions of `addresses` in `markets`, `batch_size` users per multicall
    ///
    /// Batches run one after the other. A failing sub-call only voids its own leg, any transport
    /// error aborts the whole harvest.
    #[instrument("HARVESTER", skip_all)]
    pub async fn fetch_positions_batch(
        &mut self,
        addresses: &[Address],
        markets: &[Market],
        batch_size: usize,
    ) -> Result<HashMap<Address, BorrowerPosition>> {
        if batch_size == 0 {
            bail!("Batch size must be greater than zero");
        }

        let mut positions = HashMap::with_capacity(addresses.len());

        for (index, chunk) in addresses.chunks(batch_size).enumerate() {
            info!(
                "Updating users {} / {}",
                index * batch_size,
                addresses.len()
            );
            positions.extend(self.fetch_chunk(chunk, markets).await?);
        }

        Ok(positions)
    }

    async fn fetch_chunk(
        &mut self,
        chunk: &[Address],
        markets: &[Market],
    ) -> Result<HashMap<Address, BorrowerPosition>> {
        let comptroller = self.reference.protocol.comptroller;

        for user in chunk {
            self.multicall_manager.add_sol_call(
                &comptroller,
                &Comptroller::getAssetsInCall { account: *user },
            );
        }
        let entered = self
            .multicall_manager
            .execute_calls(false)
            .await
            .context("Failed to fetch markets entered")?;

        for user in chunk {
            for market in markets {
                self.multicall_manager
                    .add_call(&market.address, collateral_call(market, *user));
            }
        }
        let collateral = self
            .multicall_manager
            .execute_calls(false)
            .await
            .context("Failed to fetch collateral balances")?;

        for user in chunk {
            for market in markets {
                self.multicall_manager
                    .add_call(&market.address, borrow_call(market, *user));
            }
        }
        let borrow = self
            .multicall_manager
            .execute_calls(false)
            .await
            .context("Failed to fetch borrow balances")?;

        assemble_positions(chunk, markets, &entered, &collateral, &borrow)
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{address, U256};
    use alloy::sol_types::SolValue;

    use super::*;

    fn market(address: Address, supplyable: bool, borrowable: bool) -> Market {
        Market {
            address,
            symbol: "TKN".to_string(),
            underlying: None,
            price_usd: 1.0,
            borrowable,
            supplyable,
        }
    }

    fn balance(value: u64) -> CallOutcome {
        CallOutcome::new(true, U256::from(value).abi_encode())
    }

    fn entered(markets: Vec<Address>) -> CallOutcome {
        CallOutcome::new(true, (markets,).abi_encode_params())
    }

    #[test]
    fn test_block_windows_cover_range_without_overlap() {
        let windows = block_windows(0, 25, 10);

        assert_eq!(
            windows,
            vec![
                BlockWindow { from_block: 0, to_block: 9 },
                BlockWindow { from_block: 10, to_block: 19 },
                BlockWindow { from_block: 20, to_block: 25 },
            ]
        );
    }

    #[test]
    fn test_block_windows_edge_cases() {
        assert_eq!(
            block_windows(5, 5, 10),
            vec![BlockWindow { from_block: 5, to_block: 5 }]
        );
        assert_eq!(block_windows(10, 9, 10), vec![]);
        assert_eq!(block_windows(0, 19, 10).len(), 2);
    }

    #[test]
    fn test_membership_set_keeps_first_accounts_up_to_limit() {
        let a = address!("0000000000000000000000000000000000000001");
        let b = address!("0000000000000000000000000000000000000002");
        let c = address!("0000000000000000000000000000000000000003");

        let mut memberships = MembershipSet::new(Some(2));
        for account in [a, a, b, c] {
            memberships.insert(account);
        }

        assert!(memberships.is_full());
        assert_eq!(memberships.into_addresses(), vec![a, b]);

        let mut unlimited = MembershipSet::new(None);
        assert!(unlimited.is_empty());
        for account in [c, a, c, b] {
            unlimited.insert(account);
        }
        assert!(!unlimited.is_full());
        assert_eq!(unlimited.into_addresses(), vec![c, a, b]);
    }

    #[test]
    fn test_decode_market_entered_logs() {
        let comptroller = address!("3d9819210A31b4961b30EF54bE2aeD79B9c9Cd3B");
        let account = address!("00000000000000000000000000000000000000aa");
        let event = Comptroller::MarketEntered {
            cToken: address!("4Ddc2D193948926D02f9B1fE9e1daa0718270ED5"),
            account,
        };
        let log = Log {
            inner: alloy::primitives::Log {
                address: comptroller,
                data: event.encode_log_data(),
            },
            ..Default::default()
        };

        assert_eq!(decode_market_entered(&[log]), vec![account]);
    }

    #[test]
    fn test_balance_calls_follow_market_flags() {
        let user = address!("00000000000000000000000000000000000000aa");
        let address = address!("4Ddc2D193948926D02f9B1fE9e1daa0718270ED5");

        let regular = market(address, true, true);
        assert_eq!(
            &collateral_call(&regular, user)[..4],
            CToken::balanceOfUnderlyingCall::SELECTOR.as_slice()
        );
        assert_eq!(
            &borrow_call(&regular, user)[..4],
            CToken::borrowBalanceStoredCall::SELECTOR.as_slice()
        );

        let rekt = market(address, false, false);
        assert_eq!(
            &collateral_call(&rekt, user)[..4],
            CToken::balanceOfCall::SELECTOR.as_slice()
        );
        assert_eq!(
            &borrow_call(&rekt, user)[..4],
            CToken::balanceOfCall::SELECTOR.as_slice()
        );
    }

    #[test]
    fn test_failed_leg_does_not_poison_siblings() {
        let user = address!("00000000000000000000000000000000000000aa");
        let eth = address!("4Ddc2D193948926D02f9B1fE9e1daa0718270ED5");
        let dai = address!("5d3a536E4D6DbD6114cc1Ead35777bAB948E3643");
        let usdc = address!("39AA39c021dfbaE8faC545936693aC917d5E7563");
        let markets = vec![
            market(eth, true, true),
            market(dai, true, true),
            market(usdc, true, true),
        ];

        let positions = assemble_positions(
            &[user],
            &markets,
            &[entered(vec![eth, dai, usdc])],
            &[balance(10), CallOutcome::failed(), balance(30)],
            &[balance(1), balance(2), CallOutcome::new(true, vec![1u8, 2, 3])],
        )
        .unwrap();

        let position = &positions[&user];
        assert_eq!(position.markets_entered, vec![eth, dai, usdc]);
        assert_eq!(
            position.legs[&eth].balances(),
            Some((U256::from(10u64), U256::from(1u64)))
        );
        assert_eq!(position.legs[&dai].collateral_raw, LegValue::Failed);
        assert_eq!(position.legs[&dai].borrow_raw, LegValue::Decoded(U256::from(2u64)));
        assert_eq!(position.legs[&usdc].borrow_raw, LegValue::Failed);
        assert_eq!(position.failed_legs(), 2);
    }

    #[test]
    fn test_failed_markets_entered_call_yields_empty_list() {
        let first = address!("00000000000000000000000000000000000000aa");
        let second = address!("00000000000000000000000000000000000000bb");
        let eth = address!("4Ddc2D193948926D02f9B1fE9e1daa0718270ED5");
        let markets = vec![market(eth, true, true)];

        let positions = assemble_positions(
            &[first, second],
            &markets,
            &[CallOutcome::failed(), entered(vec![eth])],
            &[balance(5), balance(6)],
            &[balance(0), balance(1)],
        )
        .unwrap();

        assert!(positions[&first].markets_entered.is_empty());
        assert_eq!(positions[&second].markets_entered, vec![eth]);
        assert_eq!(
            positions[&second].legs[&eth].balances(),
            Some((U256::from(6u64), U256::from(1u64)))
        );
    }

    #[test]
    fn test_mismatched_result_sizes_are_rejected() {
        let user = address!("00000000000000000000000000000000000000aa");
        let markets = vec![market(address!("4Ddc2D193948926D02f9B1fE9e1daa0718270ED5"), true, true)];

        assert!(assemble_positions(&[user], &markets, &[], &[balance(1)], &[balance(1)]).is_err());
    }
}
