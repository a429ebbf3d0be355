//! Everything the keeper needs to talk to a keeper registry: contract
//! bindings, the chain RPC and log index boundaries, and [RegistryCaller]
//! which batches registry calls on top of them.

pub mod abi;
mod caller;
mod chain;
mod error;
mod lifecycle;
mod logpoller;
mod lookup;
mod version;

pub use caller::{CheckRequest, RegistryCaller, RegistryCallerConfig, SimulateRequest};
pub use chain::{AlloyChainClient, ChainClient, ContractCall};
pub use error::{BatchErrors, ChainError, LogPollerError, RegistryError};
pub use lifecycle::{decode_lifecycle, lifecycle_event_sigs, LifecycleEvent, LifecycleKind};
pub use logpoller::{ChainLog, LogFilter, LogPoller, RpcLogPoller};
pub use lookup::decode_mercury_lookup;
pub use version::{
    decode_trigger_block, CallbackOutcome, PerformedEvent, RegistryVersion, StaleEvent, UnknownRegistryVersion,
};

#[cfg(any(test, feature = "testing"))]
pub use chain::MockChainClient;
#[cfg(any(test, feature = "testing"))]
pub use logpoller::MockLogPoller;
