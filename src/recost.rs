pub mod error;
pub mod orchestrator;
pub mod subplan;
pub mod substitute;
pub mod walker;

#[cfg(test)]
mod tests;

pub use error::{RecostError, RecostResult};
pub use orchestrator::Recoster;
pub use subplan::{SubplanValidityMask, pick_alternatives};
pub use substitute::{Replacement, SubstitutionEntry, SubstitutionTable};
pub use walker::{Composition, OuterContext, adjust_limit_rows_costs};
