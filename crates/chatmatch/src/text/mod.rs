//! Text canonicalization and contraction-aware variant generation.

pub mod contractions;
pub mod normalize;
pub mod variants;

pub use contractions::{ContractionRule, ContractionTable, CONTRACTIONS};
pub use normalize::{comparison_key, normalize};
pub use variants::{all_variants, expand, Direction, VariantGenerator};
