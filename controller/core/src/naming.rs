//! Session names: generation, sanitizing and validation.

use rand::Rng;
use regex::Regex;
use std::sync::LazyLock;

const DNS_LABEL_MAX_LEN: usize = 63;
const RANDOM_SUFFIX_LEN: usize = 5;

static NON_ALPHANUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[^A-Za-z0-9]+").expect("pattern must compile"));

static DNS_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("pattern must compile")
});

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid session name {name:?}: {reason}")]
pub struct InvalidName {
    name: String,
    reason: &'static str,
}

/// Replaces every run of non-alphanumeric characters with `-` and lower-cases
/// the result.
pub fn sanitize(name: &str) -> String {
    NON_ALPHANUMERIC.replace_all(name, "-").to_lowercase()
}

/// Checks that `name` may be used as a session name, i.e. that it is a
/// DNS-1123 label.
pub fn validate(name: &str) -> Result<(), InvalidName> {
    let invalid = |reason| InvalidName {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if name.len() > DNS_LABEL_MAX_LEN {
        return Err(invalid("must be no more than 63 characters"));
    }
    if !DNS_LABEL.is_match(name) {
        return Err(invalid(
            "must consist of lower case alphanumeric characters or '-', and must start and end with an alphanumeric character",
        ));
    }
    Ok(())
}

/// Generates a session name for `user`, or a random one when the user is not
/// known.
pub fn generate(user: Option<&str>) -> String {
    let suffix = random_letters(RANDOM_SUFFIX_LEN);
    let name = match user.filter(|u| !u.is_empty()) {
        Some(user) => format!("{user}-{suffix}"),
        None => suffix,
    };
    let name = sanitize(&name);
    truncate_label(name.trim_matches('-'))
}

fn random_letters(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
        .collect()
}

fn truncate_label(name: &str) -> String {
    if name.len() <= DNS_LABEL_MAX_LEN {
        return name.to_string();
    }
    name[name.len() - DNS_LABEL_MAX_LEN..]
        .trim_start_matches('-')
        .to_string()
}
