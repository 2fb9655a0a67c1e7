pub mod normalize;
pub mod plan;

pub use normalize::{normalize, NormalizeArgs};
pub use plan::{plan, PlanArgs};
