//! Hazard pointers and reference counting (HPREF): the second
//! reclamation strategy alongside [`crate::rcu`], trading grace-period
//! batching for per-node tracking so a writer can reclaim a single node
//! without waiting on unrelated readers.

pub mod engine;
pub mod list;
pub mod node;
pub mod slots;
pub mod smartptr;

pub use engine::{ContextKind, HpContext, HprefDomain};
pub use list::{HpList, ListElem};
pub use node::HpNode;
pub use smartptr::{hp_dereference_copy, Ref};

use once_cell::sync::Lazy;

/// Process-wide default HPREF domain, for callers who don't need
/// multiple independent domains (component L).
pub static DEFAULT_HPREF_DOMAIN: Lazy<HprefDomain> = Lazy::new(HprefDomain::new);
