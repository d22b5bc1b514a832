/// Bytes per Wasm linear-memory page.
pub const PAGE_SIZE: u64 = 65_536;

/// Maximum allowed depth of a declared sub-type chain.
///
/// Fixed so that [`crate::sub_type::matches`](crate::sub_type) stays `O(depth)`
/// and the executor's hot path never has to walk an unbounded chain.
pub const MAX_SUBTYPE_DEPTH: usize = 63;
