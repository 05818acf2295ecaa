/// Build identity reported by `--version`, the bootstrap log event and `/metrics`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_COMMIT_HASH: &str = env!("DM_SYNC_GIT_COMMIT_HASH");
pub const VERSION_WITH_COMMIT: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "+",
    env!("DM_SYNC_GIT_COMMIT_HASH")
);

/// Short git hash for log context and metric labels; `"unknown"` outside a checkout.
pub fn short_commit_hash() -> &'static str {
    if GIT_COMMIT_HASH == "unknown" {
        return GIT_COMMIT_HASH;
    }

    let short_len = 12usize.min(GIT_COMMIT_HASH.len());
    &GIT_COMMIT_HASH[..short_len]
}

#[cfg(test)]
mod tests {
    use super::{short_commit_hash, GIT_COMMIT_HASH, VERSION, VERSION_WITH_COMMIT};

    #[test]
    fn version_with_commit_is_semver_plus_hash() {
        assert!(VERSION_WITH_COMMIT.starts_with(VERSION));
        assert!(VERSION_WITH_COMMIT.ends_with(GIT_COMMIT_HASH));
        assert_eq!(&VERSION_WITH_COMMIT[VERSION.len()..VERSION.len() + 1], "+");
    }

    #[test]
    fn short_hash_is_a_prefix_of_at_most_twelve_chars() {
        let short = short_commit_hash();
        assert!(!short.is_empty());
        assert!(short.len() <= 12 || short == "unknown");
        assert!(GIT_COMMIT_HASH.starts_with(short));
    }
}
