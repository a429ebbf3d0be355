//! Plain data types describing upkeeps, the keys used to pin eligibility
//! checks to a block, and the results and reports produced around them.

mod check;
mod id;
mod info;
mod key;
mod lookup;
mod report;
mod trigger;

pub use check::{CheckResult, FailureReason, UnknownFailureReason};
pub use id::{TriggerType, UpkeepId};
pub use info::{UpkeepInfo, UpkeepState};
pub use key::{UpkeepKey, UpkeepKeyError, KEY_SEPARATOR};
pub use lookup::MercuryLookup;
pub use report::{PerformLog, StaleReason, StaleReportLog};
pub use trigger::{filters_by_selector, LogTriggerConfig};
