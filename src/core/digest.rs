use std::cmp::Ordering;

use crate::pb;

/// A claim about what a node knows of an endpoint, used to diff knowledge between two nodes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Digest {
    address: String,
    generation: i32,
    max_version: i32,
}

impl Digest {
    pub fn new(address: impl Into<String>, generation: i32, max_version: i32) -> Self {
        Self {
            address: address.into(),
            generation,
            max_version,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn generation(&self) -> i32 {
        self.generation
    }

    pub fn max_version(&self) -> i32 {
        self.max_version
    }

    /// Orders two digests by `(generation, max_version)`, ignoring the address.
    pub fn compare(&self, other: &Digest) -> Ordering {
        self.generation
            .cmp(&other.generation)
            .then(self.max_version.cmp(&other.max_version))
    }
}

impl From<&Digest> for pb::Digest {
    fn from(value: &Digest) -> Self {
        pb::Digest {
            address: value.address.clone(),
            generation: value.generation,
            max_version: value.max_version,
        }
    }
}

impl From<pb::Digest> for Digest {
    fn from(value: pb::Digest) -> Self {
        Digest::new(value.address, value.generation, value.max_version)
    }
}
