//! EdgeLB pool naming

use crate::error::SpecError;
use rand::Rng;
use regex::Regex;
use std::sync::LazyLock;

/// Maximum length of an EdgeLB pool name
pub const MAX_POOL_NAME_LENGTH: usize = 63;

/// Length of the random suffix appended at admission time
pub const RANDOM_SUFFIX_LENGTH: usize = 5;

const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

static POOL_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").expect("pool name pattern is valid")
});

/// Check a pool name against EdgeLB's naming rules.
pub fn validate_pool_name(name: &str) -> Result<(), SpecError> {
    if name.len() > MAX_POOL_NAME_LENGTH || !POOL_NAME.is_match(name) {
        return Err(SpecError::Invalid(format!(
            "\"{}\" is not a valid edgelb pool name: it must consist of lowercase alphanumeric \
             characters or '-', start and end with an alphanumeric character, and be at most {} \
             characters long",
            name, MAX_POOL_NAME_LENGTH
        )));
    }
    Ok(())
}

/// Random lowercase alphanumeric suffix for pool names.
pub fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..RANDOM_SUFFIX_LENGTH)
        .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect()
}

/// Default pool name for an object: `{cluster}--{namespace}--{name}`,
/// sanitised and truncated to a valid pool name, with `--{suffix}` appended
/// when a suffix is given.
///
/// Without a suffix the result is deterministic, which is what the controller
/// relies on for objects that never went through admission.
pub fn generate_pool_name(
    cluster_name: &str,
    namespace: &str,
    name: &str,
    suffix: Option<&str>,
) -> String {
    let base = sanitize(&format!("{}--{}--{}", cluster_name, namespace, name));
    match suffix {
        Some(suffix) => {
            let budget = MAX_POOL_NAME_LENGTH - 2 - suffix.len();
            format!("{}--{}", truncate(&base, budget), suffix)
        }
        None => truncate(&base, MAX_POOL_NAME_LENGTH).to_string(),
    }
}

fn sanitize(raw: &str) -> String {
    raw.to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect::<String>()
        .trim_matches('-')
        .to_string()
}

// `s` is ASCII after sanitize.
fn truncate(s: &str, max: usize) -> &str {
    s[..s.len().min(max)].trim_end_matches('-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_pool_name_is_deterministic() {
        let a = generate_pool_name("dev/kubernetes01", "default", "my_svc", None);
        let b = generate_pool_name("dev/kubernetes01", "default", "my_svc", None);
        assert_eq!(a, b);
        assert_eq!(a, "dev-kubernetes01--default--my-svc");
        assert!(validate_pool_name(&a).is_ok());
    }

    #[test]
    fn test_generate_pool_name_truncates() {
        let long = "x".repeat(100);
        let name = generate_pool_name("cluster", "ns", &long, None);
        assert_eq!(name.len(), MAX_POOL_NAME_LENGTH);
        assert!(validate_pool_name(&name).is_ok());

        let suffixed = generate_pool_name("cluster", "ns", &long, Some("ab12c"));
        assert_eq!(suffixed.len(), MAX_POOL_NAME_LENGTH);
        assert!(suffixed.ends_with("--ab12c"));
        assert!(validate_pool_name(&suffixed).is_ok());
    }

    #[test]
    fn test_random_suffix() {
        let suffix = random_suffix();
        assert_eq!(suffix.len(), RANDOM_SUFFIX_LENGTH);
        assert!(suffix.bytes().all(|b| SUFFIX_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_validate_pool_name() {
        assert!(validate_pool_name("pool-1").is_ok());
        assert!(validate_pool_name("-pool").is_err());
        assert!(validate_pool_name("Pool").is_err());
        assert!(validate_pool_name("pool_1").is_err());
        assert!(validate_pool_name(&"a".repeat(64)).is_err());
    }
}
