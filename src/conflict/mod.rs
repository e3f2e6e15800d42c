pub mod name;

use serde::{Deserialize, Serialize};

pub use crate::conflict::name::{
    classify_name, generate, is_conflict_copy, parse_base, ConflictName, Discriminator, MonotonicDiscriminator,
    SequenceDiscriminator,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// A conflict copy created during a run to preserve the local content of `base_path`.
pub struct ConflictRecord {
    pub base_path: String,
    pub copy_path: String,
    pub actor_tag: String,
    pub discriminator: u64,
}

impl ConflictRecord {
    pub fn new(base_path: &str, actor_tag: &str, discriminator: u64) -> Self {
        ConflictRecord {
            base_path: base_path.to_owned(),
            copy_path: generate(base_path, actor_tag, discriminator),
            actor_tag: actor_tag.to_owned(),
            discriminator,
        }
    }
}
