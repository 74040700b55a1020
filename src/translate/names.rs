//! Virtual to physical resource names.

use sha2::{Digest, Sha256};

/// Maximum length of a DNS-1123 label, the tightest name constraint among core kinds
pub const MAX_NAME_LENGTH: usize = 63;

const HASH_LENGTH: usize = 10;

/// Maps a tenant-scoped object name onto its name in the shared physical namespace
///
/// Implementations must be deterministic and injective over `(name, namespace)` pairs in
/// practice, otherwise two tenant objects would collide on the physical side.
pub trait NameMapper: Send + Sync {
    fn physical_name(&self, name: &str, namespace: &str) -> String;
}

impl<F> NameMapper for F
where
    F: Fn(&str, &str) -> String + Send + Sync,
{
    fn physical_name(&self, name: &str, namespace: &str) -> String {
        self(name, namespace)
    }
}

/// `<name>-x-<namespace>-x-<suffix>`, hashed down to 63 bytes when longer
#[derive(Debug, Clone)]
pub struct SuffixNameMapper {
    suffix: String,
}

impl SuffixNameMapper {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }
}

impl NameMapper for SuffixNameMapper {
    fn physical_name(&self, name: &str, namespace: &str) -> String {
        let full = format!("{}-x-{}-x-{}", name, namespace, self.suffix);
        safe_concat_name(&full)
    }
}

/// Shorten `name` to at most 63 bytes, keeping it unique via a hash of the full value
pub fn safe_concat_name(name: &str) -> String {
    if name.len() <= MAX_NAME_LENGTH {
        return name.to_string();
    }

    let digest = hex::encode(Sha256::digest(name.as_bytes()));
    let keep = MAX_NAME_LENGTH - HASH_LENGTH - 1;
    let mut cut = keep;
    while !name.is_char_boundary(cut) {
        cut -= 1;
    }

    format!("{}-{}", &name[..cut], &digest[..HASH_LENGTH])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_names_are_concatenated() {
        let mapper = SuffixNameMapper::new("vcluster");
        assert_eq!(
            mapper.physical_name("web", "team-a"),
            "web-x-team-a-x-vcluster"
        );
    }

    #[test]
    fn test_long_names_are_hashed_to_limit() {
        let mapper = SuffixNameMapper::new("vcluster");
        let name = "a".repeat(60);

        let physical = mapper.physical_name(&name, "team-a");
        assert_eq!(physical.len(), MAX_NAME_LENGTH);
        assert!(physical.starts_with(&"a".repeat(52)));
        assert_eq!(&physical[52..53], "-");

        // deterministic, and distinct per namespace
        assert_eq!(physical, mapper.physical_name(&name, "team-a"));
        assert_ne!(physical, mapper.physical_name(&name, "team-b"));
    }

    #[test]
    fn test_closures_are_name_mappers() {
        let mapper = |name: &str, _namespace: &str| format!("{}-x7f2", name);
        assert_eq!(mapper.physical_name("my-pod", "tenant-ns"), "my-pod-x7f2");
    }
}
