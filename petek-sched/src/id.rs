use std::hash::BuildHasher;

/// Opaque identity of a task or module, derived from its name.
///
/// The same name always hashes to the same id within and across processes,
/// so `Id::of("root")` in one place names the task registered as `"root"`
/// in another.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Id(u64);

impl Id {
    /// Derives the id of `name`.
    pub fn of(name: &str) -> Id {
        Id(foldhash::quality::FixedState::default().hash_one(name))
    }
}

impl From<&str> for Id {
    fn from(name: &str) -> Id {
        Id::of(name)
    }
}
