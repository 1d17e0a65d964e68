use alloy::sol;

// Compound-style Comptroller
sol!(
    #[allow(missing_docs)]
    #[sol(rpc)]
    #[derive(Debug)]
    interface Comptroller {
        event MarketEntered(address cToken, address account);

        function getAllMarkets() external view returns (address[] memory);
        function getAssetsIn(address account) external view returns (address[] memory);
    }
);

// Compound-style market (cToken)
sol!(
    #[allow(missing_docs)]
    #[sol(rpc)]
    #[derive(Debug)]
    interface CToken {
        function underlying() external view returns (address);
        function balanceOf(address owner) external view returns (uint256);
        function balanceOfUnderlying(address owner) external returns (uint256);
        function borrowBalanceStored(address account) external view returns (uint256);
    }
);

// --------- ERC20 ---------
sol!(
    #[allow(missing_docs)]
    #[sol(rpc)]
    #[derive(Debug)]
    interface Erc20 {
        function symbol() external view returns (string memory);
    }
);

// --------- Multicall ---------
sol!(
    #[allow(missing_docs)]
    #[sol(rpc)]
    #[derive(Debug)]
    interface Multicall {
        struct Call {
            address target;
            bytes callData;
        }

        struct CallResult {
            bool success;
            bytes returnData;
        }

        function tryAggregate(bool requireSuccess, Call[] calldata calls)
            external
            payable
            returns (CallResult[] memory returnData);
    }
);
