//! The four verification contracts, in pipeline order.
//!
//! Each contract checks one family of untrusted claims against the
//! sealed reference and emits exactly one witness (the value contract
//! additionally emits one child per action). Contracts never advance
//! agent state and never see a later contract's output. The audit
//! verifier's deep mode calls these same implementations; there is no
//! parallel re-implementation anywhere.

pub mod exec;
pub mod model;
pub mod risk;
pub mod value;

pub use exec::ExecContract;
pub use model::ModelContract;
pub use risk::RiskGate;
pub use value::{ActionEstimate, ValueContract};
