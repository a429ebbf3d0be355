use crate::abi;
use alloy::sol_types::SolError;
use kp_upkeep::MercuryLookup;

/// Decodes an off-chain data request out of the revert data returned by a
/// target's check function.
///
/// `MercuryLookup`, `FeedLookup` and `StreamsLookup` share one argument
/// layout and only differ by selector. Any other payload returns [None].
pub fn decode_mercury_lookup(data: &[u8]) -> Option<MercuryLookup> {
    if let Ok(err) = abi::MercuryLookup::abi_decode(data, true) {
        return Some(MercuryLookup {
            feed_label: err.feedLabel,
            feeds: err.feedList,
            query_label: err.queryLabel,
            query: err.query,
            extra_data: err.extraData,
        });
    }
    if let Ok(err) = abi::FeedLookup::abi_decode(data, true) {
        return Some(MercuryLookup {
            feed_label: err.feedParamKey,
            feeds: err.feeds,
            query_label: err.timeParamKey,
            query: err.time,
            extra_data: err.extraData,
        });
    }
    if let Ok(err) = abi::StreamsLookup::abi_decode(data, true) {
        return Some(MercuryLookup {
            feed_label: err.feedParamKey,
            feeds: err.feeds,
            query_label: err.timeParamKey,
            query: err.time,
            extra_data: err.extraData,
        });
    }
    None
}
