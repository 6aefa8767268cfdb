//! Streaming anomaly detection with compact random cut forests.
//!
//! A random cut forest is an ensemble of independent random cut trees. Each
//! tree maintains a time-decayed reservoir sample of the stream and organises
//! it in a binary space partition built from random axis-aligned cuts;
//! queries traverse every tree with a visitor and aggregate the per-tree
//! answers. This crate implements the column-oriented core: the compact tree
//! with its node store and bounding-box cache, the shared reference-counted
//! point store, the reservoir sampler, the traversal protocol, and the
//! forest runtime that fans updates and queries out across trees.
//!
//! ```ignore
//! use cutforest::{forest, ForestBuilder, RandomCutForest};
//!
//! let config = ForestBuilder::new(2)
//!     .sample_size(256)
//!     .number_of_trees(50)
//!     .random_seed(42)
//!     .config();
//! let mut model: Box<dyn RandomCutForest<f32>> = forest(config).unwrap();
//!
//! for (i, point) in stream.iter().enumerate() {
//!     model.update(point, i as u64).unwrap();
//! }
//! let score = model.score(&[0.5, 0.5]).unwrap();
//! ```
//!
//! ### References
//!
//! Sudipto Guha, Nina Mishra, Gourav Roy, and Okke Schrijvers. *"Robust
//! random cut forest based anomaly detection on streams."* International
//! Conference on Machine Learning, pp. 2712-2721. PMLR, 2016.

pub mod common;
pub mod config;
pub mod errors;
pub mod forest;
pub mod pointstore;
pub mod sampler;
pub mod samplerplustree;
pub mod state;
pub mod tree;
pub mod types;
mod util;
pub mod visitor;

pub use config::{ForestBuilder, ForestConfig};
pub use errors::{ForestError, Result};
pub use forest::{forest, forest_from_state, RandomCutForest};
pub use state::ForestState;
pub use util::l1_distance;
