// handlers/mod.rs - Handler tiers
//
// Public handlers need no credentials. Protected handlers run behind the
// identity middleware and receive the resolved `Caller`; each operation is
// then authorized per table, so anonymous callers may still reach tables
// with public access.

pub mod protected;
pub mod public;
