//! Fresh-name supply.

use serde::{Deserialize, Serialize};

/// A monotone counter producing `prefix + n` identifiers.
///
/// Each pass run owns its own supply, so every compile starts counting from
/// zero and dump-based tests are deterministic without any global state.
/// Prefixes sharing one supply (a pass that mints both `then` and `else`
/// labels, say) interleave their numbering.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Gensym {
    next: u32,
}

impl Gensym {
    pub fn new() -> Gensym {
        Gensym { next: 0 }
    }

    /// Returns `prefix` followed by the next counter value.
    pub fn fresh(&mut self, prefix: &str) -> String {
        let n = self.next;
        self.next += 1;
        format!("{}{}", prefix, n)
    }
}
