//! Decides whether a client-supplied name may be used as a storage key.
//!
//! The namespace is a single flat directory, so a key must never be able to
//! address anything outside of it. Besides the `..` traversal token this also
//! rejects path separators, NUL and the degenerate names `""` and `"."`:
//! `Path::join` replaces the base entirely when handed an absolute path, and a
//! separator would reach into (or out of) subdirectories.
//!
//! Character sets are otherwise left alone; `résumé (final).pdf` is a fine key.

/// Token used to climb out of a directory.
pub const TRAVERSAL_TOKEN: &str = "..";

/// Returns `true` when `name` can be used verbatim as a file name under the
/// storage root.
pub fn is_safe(name: &str) -> bool {
    if name.is_empty() || name == "." {
        return false;
    }
    if name.contains(TRAVERSAL_TOKEN) {
        return false;
    }
    !name.chars().any(|c| matches!(c, '/' | '\\' | '\0'))
}
