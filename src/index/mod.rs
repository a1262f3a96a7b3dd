//! Query and index optimisation.
//!
//! [`IndexStrategy`] picks the [`QueryShape`] of each vector query,
//! [`recommend_index_params`] sizes approximate-nearest-neighbour indexes
//! and [`explain_and_advise`] turns explain plans into tuning advice.

pub mod advisor;
pub mod params;
pub mod strategy;

pub use advisor::{Recommendations, explain_and_advise};
pub use params::{
    IndexConfig, IndexKind, apply_index, recommend_index_params, recommend_ivfflat_params,
    recommend_lists,
};
pub use strategy::{APPROXIMATE_OVERFETCH, IndexStrategy, QueryShape};
