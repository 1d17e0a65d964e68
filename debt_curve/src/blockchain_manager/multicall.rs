use alloy::{
    network::Ethereum,
    primitives::{Address, Bytes},
    providers::Provider,
    sol_types::SolCall,
};
use anyhow::{bail, Result};

use crate::utils::contracts::Multicall::{self, Call, MulticallInstance};

/// Outcome of one sub-call of an aggregate call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    pub success: bool,
    pub return_data: Bytes,
}

impl CallOutcome {
    pub fn new(success: bool, return_data: impl Into<Bytes>) -> Self {
        Self {
            success,
            return_data: return_data.into(),
        }
    }

    pub fn failed() -> Self {
        Self::new(false, Bytes::new())
    }

    /// Decodes the return data as the output of `C`.
    ///
    /// `None` when the sub-call reverted or returned data that doesn't match the call's outputs.
    pub fn decode<C: SolCall>(&self) -> Option<C::Return> {
        if !self.success || self.return_data.is_empty() {
            return None;
        }
        C::abi_decode_returns(self.return_data.as_ref(), false).ok()
    }
}

/// Collects calls and sends them through Multicall's `tryAggregate` in one request.
pub struct MulticallManager<P: Provider<Ethereum>> {
    multicall_contract: MulticallInstance<(), P>,
    calls: Vec<Call>,
}

impl<P: Provider<Ethereum>> MulticallManager<P> {
    pub fn new(provider: P, multicall_address: Address) -> Self {
        Self {
            multicall_contract: Multicall::new(multicall_address, provider),
            calls: vec![],
        }
    }

    pub fn add_call(&mut self, target: &Address, call_data: impl Into<Bytes>) {
        self.calls.push(Call {
            target: *target,
            callData: call_data.into(),
        });
    }

    pub fn add_sol_call<C: SolCall>(&mut self, target: &Address, call: &C) {
        self.add_call(target, call.abi_encode());
    }

    /// Executes the queued calls and drains the queue.
    ///
    /// With `require_success = false` a reverting sub-call is reported through its
    /// [`CallOutcome`] and never fails its siblings. Transport errors are returned as is.
    ///
    /// # Returns
    /// * `Result<Vec<CallOutcome>>` - One outcome per queued call, in queue order
    pub async fn execute_calls(&mut self, require_success: bool) -> Result<Vec<CallOutcome>> {
        let calls = std::mem::take(&mut self.calls);
        if calls.is_empty() {
            return Ok(vec![]);
        }

        let expected = calls.len();
        let multicall_result = self
            .multicall_contract
            .tryAggregate(require_success, calls)
            .call()
            .await?;

        if multicall_result.returnData.len() != expected {
            bail!(
                "Multicall returned {} results for {} calls",
                multicall_result.returnData.len(),
                expected
            );
        }

        Ok(multicall_result
            .returnData
            .into_iter()
            .map(|result| CallOutcome::new(result.success, result.returnData))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::U256;

    use super::*;
    use crate::utils::contracts::CToken;

    #[test]
    fn test_decode_successful_outcome() {
        let data = U256::from(42u64).to_be_bytes::<32>().to_vec();
        let outcome = CallOutcome::new(true, data);

        let decoded = outcome.decode::<CToken::balanceOfCall>().unwrap();
        assert_eq!(decoded._0, U256::from(42u64));
    }

    #[test]
    fn test_decode_failed_or_malformed_outcome() {
        let data = U256::from(42u64).to_be_bytes::<32>().to_vec();

        assert!(CallOutcome::new(false, data)
            .decode::<CToken::balanceOfCall>()
            .is_none());
        assert!(CallOutcome::failed()
            .decode::<CToken::balanceOfCall>()
            .is_none());
        assert!(CallOutcome::new(true, vec![0u8; 7])
            .decode::<CToken::balanceOfCall>()
            .is_none());
    }
}
