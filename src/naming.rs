//! Naming: derives the single `deployment_uid` DNS-label identity used as
//! both namespace name and Helm release name.
//!
//! Ported from the original `reconcile_naming` module's slugify/suffix
//! construction into the teacher's plain-function, regex-backed style
//! (the teacher reaches for `regex` throughout `cmd/` for text parsing).

use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;

const MAX_DNS_LABEL_LEN: usize = 63;
const RANDOM_SUFFIX_LEN: usize = 6;
const BASE_MAX_LEN: usize = MAX_DNS_LABEL_LEN - (RANDOM_SUFFIX_LEN + 1);
const BASE36_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

static DNS_LABEL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$").unwrap());
static NON_ALNUM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());
static HYPHEN_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"-+").unwrap());

#[derive(thiserror::Error, Debug, Clone)]
#[error("generated deployment_uid is not a valid DNS label")]
pub struct InvalidDeploymentUid;

pub fn is_valid_dns_label(value: &str) -> bool {
    value.len() <= MAX_DNS_LABEL_LEN && DNS_LABEL_RE.is_match(value)
}

fn slugify(value: &str) -> String {
    let lowered = value.to_lowercase();
    let replaced = NON_ALNUM_RE.replace_all(&lowered, "-");
    let collapsed = HYPHEN_RUN_RE.replace_all(&replaced, "-");
    collapsed.trim_matches('-').to_string()
}

fn generate_suffix6() -> String {
    let mut rng = rand::rng();
    (0..RANDOM_SUFFIX_LEN)
        .map(|_| BASE36_ALPHABET[rng.random_range(0..BASE36_ALPHABET.len())] as char)
        .collect()
}

fn trim_base_for_suffix(base: &str) -> String {
    let truncated: String = base.chars().take(BASE_MAX_LEN).collect();
    let trimmed = truncated.trim_matches('-');
    if trimmed.is_empty() { "dep".to_string() } else { trimmed.to_string() }
}

/// Build a `deployment_uid` from `(product_name, user_email)`: slug both,
/// join non-empty slugs with `-` (falling back to `dep`), truncate to leave
/// room for a 6-char base36 suffix, append the suffix, and validate the
/// result is a DNS label.
pub fn generate_deployment_uid(product_name: &str, user_email: &str) -> Result<String, InvalidDeploymentUid> {
    generate_deployment_uid_with_suffix(product_name, user_email, &generate_suffix6())
}

pub fn generate_deployment_uid_with_suffix(product_name: &str, user_email: &str, suffix: &str) -> Result<String, InvalidDeploymentUid> {
    let product_slug = slugify(product_name);
    let user_slug = slugify(user_email);
    let parts: Vec<&str> = [product_slug.as_str(), user_slug.as_str()].into_iter().filter(|s| !s.is_empty()).collect();
    let base = if parts.is_empty() { "dep".to_string() } else { parts.join("-") };
    let base = trim_base_for_suffix(&base);

    let deployment_uid = format!("{base}-{suffix}");
    if is_valid_dns_label(&deployment_uid) {
        Ok(deployment_uid)
    } else {
        Err(InvalidDeploymentUid)
    }
}

/// Single-identity policy: namespace name and release name are both the
/// `deployment_uid` verbatim.
pub fn namespace_name_for(deployment_uid: &str) -> &str {
    deployment_uid
}

pub fn release_name_for(deployment_uid: &str) -> &str {
    deployment_uid
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_valid_dns_label() {
        let uid = generate_deployment_uid("Hello World!", "user@example.com").unwrap();
        assert!(is_valid_dns_label(&uid));
        assert!(uid.len() <= 63);
        assert!(uid.starts_with("hello-world-user-example-com-"));
    }

    #[test]
    fn falls_back_to_dep_when_inputs_are_all_punctuation() {
        let uid = generate_deployment_uid_with_suffix("!!!", "###", "abc123").unwrap();
        assert_eq!(uid, "dep-abc123");
    }

    #[test]
    fn truncates_long_inputs_and_strips_trailing_hyphen() {
        let long_name = "a".repeat(100);
        let uid = generate_deployment_uid_with_suffix(&long_name, "", "abc123").unwrap();
        assert!(uid.len() <= 63);
        assert!(is_valid_dns_label(&uid));
    }

    #[test]
    fn namespace_and_release_names_match_uid() {
        let uid = "hello-user-abc123";
        assert_eq!(namespace_name_for(uid), uid);
        assert_eq!(release_name_for(uid), uid);
    }

    #[test]
    fn deterministic_with_fixed_suffix() {
        let a = generate_deployment_uid_with_suffix("hello", "u@example.com", "zzzzzz").unwrap();
        let b = generate_deployment_uid_with_suffix("hello", "u@example.com", "zzzzzz").unwrap();
        assert_eq!(a, b);
    }
}
