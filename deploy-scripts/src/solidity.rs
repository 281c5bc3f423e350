//! Definitions of Solidity functions called during deployment

use alloy::sol;

sol! {
    /// The admin contract shared by every transparent proxy a deployer owns.
    ///
    /// Upgrade calls can only reach a `TransparentUpgradeableProxy` through its admin.
    interface IProxyAdmin {
        function owner() external view returns (address);
        function upgrade(address proxy, address implementation) external;
        function upgradeAndCall(address proxy, address implementation, bytes memory data) external payable;
    }
}
