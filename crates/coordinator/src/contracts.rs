//! Contract bindings for Safe v1.4.1 and its proxy factory.

use alloy::{
    primitives::{Address, address},
    sol,
};

/// Canonical SafeL2 v1.4.1 singleton.
pub const SAFE_L2_SINGLETON: Address = address!("29fcb43b46531bca003ddc8fcb67ffe91900c762");

/// Canonical SafeProxyFactory v1.4.1.
pub const SAFE_PROXY_FACTORY: Address = address!("4e1dcf7ad4e460cfd30791ccc4f9c8a4f820ec67");

/// Canonical CompatibilityFallbackHandler v1.4.1.
pub const SAFE_FALLBACK_HANDLER: Address = address!("fd0732dc9e303f09fcef3a7388ad10a83459ec99");

/// Owners linked-list sentinel, never a valid owner.
pub const SENTINEL_OWNER: Address = address!("0000000000000000000000000000000000000001");

sol! {
    /// EIP-712 struct signed by every owner. Field names and order are part of the
    /// type hash and must not change.
    #[derive(Debug, PartialEq, Eq)]
    struct SafeTx {
        address to;
        uint256 value;
        bytes data;
        uint8 operation;
        uint256 safeTxGas;
        uint256 baseGas;
        uint256 gasPrice;
        address gasToken;
        address refundReceiver;
        uint256 nonce;
    }

    /// Safe v1.4.1 interface
    #[derive(Debug, PartialEq, Eq)]
    interface ISafe {
        function setup(
            address[] calldata _owners,
            uint256 _threshold,
            address to,
            bytes calldata data,
            address fallbackHandler,
            address paymentToken,
            uint256 payment,
            address payable paymentReceiver
        ) external;

        function execTransaction(
            address to,
            uint256 value,
            bytes calldata data,
            uint8 operation,
            uint256 safeTxGas,
            uint256 baseGas,
            uint256 gasPrice,
            address gasToken,
            address payable refundReceiver,
            bytes memory signatures
        ) external payable returns (bool success);

        function nonce() external view returns (uint256);

        function getThreshold() external view returns (uint256);

        function getOwners() external view returns (address[] memory);

        event ExecutionSuccess(bytes32 indexed txHash, uint256 payment);
        event ExecutionFailure(bytes32 indexed txHash, uint256 payment);
    }

    /// SafeProxyFactory v1.4.1 interface
    #[derive(Debug, PartialEq, Eq)]
    interface ISafeProxyFactory {
        function proxyCreationCode() external pure returns (bytes memory);

        function createProxyWithNonce(
            address _singleton,
            bytes memory initializer,
            uint256 saltNonce
        ) external returns (address proxy);

        event ProxyCreation(address indexed proxy, address singleton);
    }
}
