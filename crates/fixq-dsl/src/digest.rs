//! Stable plan digests.
//!
//! The CLI and the tests need a cheap identity for a rewritten plan so that
//! repeated rewrites of the same input can be compared at a glance:
//!
//! - algorithm: **FNV-1a 64-bit**
//! - input: the canonical printed form of the expression (`Display`)
//! - output: `"fnv1a64:<16 lowercase hex digits>"`
//!
//! This digest is **not** a security primitive.

use crate::ast::Expr;

/// Prefix used in serialized digests.
pub const PLAN_DIGEST_PREFIX: &str = "fnv1a64:";

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x00000100000001b3;

/// FNV-1a 64-bit digest over arbitrary bytes.
pub fn fnv1a64_digest_bytes(bytes: &[u8]) -> String {
    let mut hash = FNV_OFFSET_BASIS;
    for b in bytes {
        hash ^= (*b) as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }

    format!("{PLAN_DIGEST_PREFIX}{hash:016x}")
}

/// Digest of an expression's canonical printed form.
///
/// Two expressions that print identically share a digest; since the printer
/// round-trips through the parser, that coincides with structural equality.
pub fn expr_digest(expr: &Expr) -> String {
    fnv1a64_digest_bytes(expr.to_string().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expr;

    #[test]
    fn digest_has_expected_prefix_and_width() {
        let d = fnv1a64_digest_bytes(b"from p where path p");
        assert!(d.starts_with(PLAN_DIGEST_PREFIX));
        assert_eq!(d.len(), PLAN_DIGEST_PREFIX.len() + 16);
    }

    #[test]
    fn digest_ignores_layout_but_not_structure() {
        let a = parse_expr("edge (x, y)  orelse   path (y, x)").expect("parse");
        let b = parse_expr("edge (x, y) orelse path (y, x)").expect("parse");
        let c = parse_expr("edge (x, y) orelse path (x, y)").expect("parse");
        assert_eq!(expr_digest(&a), expr_digest(&b));
        assert_ne!(expr_digest(&a), expr_digest(&c));
    }
}
