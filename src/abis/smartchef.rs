use alloy::sol;

sol! {
    #[sol(rpc)]
    interface ISmartChef {
        function rewardToken() external view returns (address);
    }
}
