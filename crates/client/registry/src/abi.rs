//! Solidity bindings for the keeper registry.
//!
//! Declarations shared by every supported registry version live at the top
//! of this module, version specific ones in [v2_0] and [v2_1].

#![allow(clippy::too_many_arguments)]

use alloy::sol;

sol! {
    #[derive(Debug, PartialEq, Eq)]
    struct UpkeepInfo {
        address target;
        uint32 executeGas;
        bytes checkData;
        uint96 balance;
        address admin;
        uint64 maxValidBlocknumber;
        uint32 lastPerformBlockNumber;
        uint96 amountSpent;
        bool paused;
        bytes offchainConfig;
    }

    function getUpkeep(uint256 id) external view returns (UpkeepInfo memory upkeepInfo);
    function getActiveUpkeepIDs(uint256 startIndex, uint256 maxCount) external view returns (uint256[] memory);
    function simulatePerformUpkeep(uint256 id, bytes calldata performData) external returns (bool success, uint256 gasUsed);
    function transmit(
        bytes32[3] calldata reportContext,
        bytes calldata rawReport,
        bytes32[] calldata rs,
        bytes32[] calldata ss,
        bytes32 rawVs
    ) external;

    #[derive(Debug)]
    event UpkeepRegistered(uint256 indexed id, uint32 executeGas, address admin);
    #[derive(Debug)]
    event UpkeepReceived(uint256 indexed id, uint256 startingBalance, address importedFrom);
    #[derive(Debug)]
    event UpkeepUnpaused(uint256 indexed id);
    #[derive(Debug)]
    event UpkeepGasLimitSet(uint256 indexed id, uint96 gasLimit);
    #[derive(Debug)]
    event UpkeepPaused(uint256 indexed id);
    #[derive(Debug)]
    event UpkeepCanceled(uint256 indexed id, uint64 indexed atBlockHeight);
    #[derive(Debug)]
    event UpkeepMigrated(uint256 indexed id, uint256 remainingBalance, address destination);

    // Off-chain data requests raised by `checkUpkeep`. All share one shape.
    #[derive(Debug, PartialEq, Eq)]
    error MercuryLookup(string feedLabel, string[] feedList, string queryLabel, uint256 query, bytes extraData);
    #[derive(Debug, PartialEq, Eq)]
    error FeedLookup(string feedParamKey, string[] feeds, string timeParamKey, uint256 time, bytes extraData);
    #[derive(Debug, PartialEq, Eq)]
    error StreamsLookup(string feedParamKey, string[] feeds, string timeParamKey, uint256 time, bytes extraData);
}

pub mod v2_0 {
    use alloy::sol;

    sol! {
        #[derive(Debug)]
        struct State {
            uint32 nonce;
            uint96 ownerLinkBalance;
            uint256 expectedLinkBalance;
            uint96 totalPremium;
            uint256 numUpkeeps;
            uint32 configCount;
            uint32 latestConfigBlockNumber;
            bytes32 latestConfigDigest;
            uint32 latestEpoch;
            bool paused;
        }

        #[derive(Debug)]
        struct OnchainConfig {
            uint32 paymentPremiumPPB;
            uint32 flatFeeMicroLink;
            uint32 checkGasLimit;
            uint24 stalenessSeconds;
            uint16 gasCeilingMultiplier;
            uint96 minUpkeepSpend;
            uint32 maxPerformGas;
            uint32 maxCheckDataSize;
            uint32 maxPerformDataSize;
            uint256 fallbackGasPrice;
            uint256 fallbackLinkPrice;
            address transcoder;
            address registrar;
        }

        #[derive(Debug, PartialEq, Eq)]
        struct PerformDataWrapper {
            uint32 checkBlockNumber;
            bytes32 checkBlockhash;
            bytes performData;
        }

        #[derive(Debug, PartialEq, Eq)]
        struct Report {
            uint256 fastGasWei;
            uint256 linkNative;
            uint256[] upkeepIds;
            PerformDataWrapper[] wrappedPerformDatas;
        }

        function getState() external view returns (
            State memory state,
            OnchainConfig memory config,
            address[] memory signers,
            address[] memory transmitters,
            uint8 f
        );
        function checkUpkeep(uint256 id) external returns (
            bool upkeepNeeded,
            bytes memory performData,
            uint8 upkeepFailureReason,
            uint256 gasUsed,
            uint256 fastGasWei,
            uint256 linkNative
        );
        function mercuryCallback(uint256 id, bytes[] memory values, bytes memory extraData) external returns (
            bool upkeepNeeded,
            bytes memory performData,
            uint8 upkeepFailureReason,
            uint256 gasUsed
        );

        #[derive(Debug)]
        event UpkeepPerformed(
            uint256 indexed id,
            bool indexed success,
            uint32 checkBlockNumber,
            uint256 gasUsed,
            uint256 gasOverhead,
            uint96 totalPayment
        );
        #[derive(Debug)]
        event ReorgedUpkeepReport(uint256 indexed id);
        #[derive(Debug)]
        event StaleUpkeepReport(uint256 indexed id);
        #[derive(Debug)]
        event InsufficientFundsUpkeepReport(uint256 indexed id);
    }
}

pub mod v2_1 {
    use alloy::sol;

    sol! {
        #[derive(Debug)]
        struct State {
            uint32 nonce;
            uint96 ownerLinkBalance;
            uint256 expectedLinkBalance;
            uint96 totalPremium;
            uint256 numUpkeeps;
            uint32 configCount;
            uint32 latestConfigBlockNumber;
            bytes32 latestConfigDigest;
            uint32 latestEpoch;
            bool paused;
        }

        #[derive(Debug)]
        struct OnchainConfig {
            uint32 paymentPremiumPPB;
            uint32 flatFeeMicroLink;
            uint32 checkGasLimit;
            uint24 stalenessSeconds;
            uint16 gasCeilingMultiplier;
            uint96 minUpkeepSpend;
            uint32 maxPerformGas;
            uint32 maxCheckDataSize;
            uint32 maxPerformDataSize;
            uint32 maxRevertDataSize;
            uint256 fallbackGasPrice;
            uint256 fallbackLinkPrice;
            address transcoder;
            address[] registrars;
            address upkeepPrivilegeManager;
        }

        #[derive(Debug, PartialEq, Eq)]
        struct Report {
            uint256 fastGasWei;
            uint256 linkNative;
            uint256[] upkeepIds;
            uint256[] gasLimits;
            bytes[] triggers;
            bytes[] performDatas;
        }

        #[derive(Debug, PartialEq, Eq)]
        struct ConditionalTrigger {
            uint32 blockNum;
            bytes32 blockHash;
        }

        #[derive(Debug, PartialEq, Eq)]
        struct LogTrigger {
            bytes32 logBlockHash;
            bytes32 txHash;
            uint32 logIndex;
            uint32 blockNum;
            bytes32 blockHash;
        }

        #[derive(Debug, PartialEq, Eq)]
        struct LogTriggerConfig {
            address contractAddress;
            uint8 filterSelector;
            bytes32 topic0;
            bytes32 topic1;
            bytes32 topic2;
            bytes32 topic3;
        }

        function getState() external view returns (
            State memory state,
            OnchainConfig memory config,
            address[] memory signers,
            address[] memory transmitters,
            uint8 f
        );
        function checkUpkeep(uint256 id) external returns (
            bool upkeepNeeded,
            bytes memory performData,
            uint8 upkeepFailureReason,
            uint256 gasUsed,
            uint256 gasLimit,
            uint256 fastGasWei,
            uint256 linkNative
        );
        function checkCallback(uint256 id, bytes[] memory values, bytes memory extraData) external returns (
            bool upkeepNeeded,
            bytes memory performData,
            uint8 upkeepFailureReason,
            uint256 gasUsed
        );
        function getUpkeepPrivilegeConfig(uint256 upkeepId) external view returns (bytes memory);
        function getUpkeepTriggerConfig(uint256 upkeepId) external view returns (bytes memory);

        #[derive(Debug)]
        event UpkeepPerformed(
            uint256 indexed id,
            bool indexed success,
            uint96 totalPayment,
            uint256 gasUsed,
            uint256 gasOverhead,
            bytes trigger
        );
        #[derive(Debug)]
        event ReorgedUpkeepReport(uint256 indexed id, bytes trigger);
        #[derive(Debug)]
        event StaleUpkeepReport(uint256 indexed id, bytes trigger);
        #[derive(Debug)]
        event InsufficientFundsUpkeepReport(uint256 indexed id, bytes trigger);
    }
}
