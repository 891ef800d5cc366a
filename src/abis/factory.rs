use alloy::sol;

sol! {
    #[sol(rpc)]
    interface IFactory {
        function allPairsLength() external view returns (uint256);
        function allPairs(uint256 index) external view returns (address);
    }
}
