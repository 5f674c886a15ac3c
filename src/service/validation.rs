use once_cell::sync::Lazy;
use regex::Regex;

/// Two or more dot-separated labels of 1-63 alphanumerics, hyphens allowed
/// only inside a label.
static DOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+([a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?)$")
        .expect("domain pattern is valid")
});

/// Purely syntactic domain check. No DNS lookup is made.
pub fn validate_domain(input: &str) -> bool {
    let Some(captures) = DOMAIN_RE.captures(input) else {
        return false;
    };
    // top-level label must not be numeric-only
    captures
        .get(1)
        .is_some_and(|tld| !tld.as_str().chars().all(|c| c.is_ascii_digit()))
}

/// Whether the part of `email` after the `@` is exactly `domain`,
/// ignoring case. Subdomains do not match their parent.
pub fn email_matches_domain(email: &str, domain: &str) -> bool {
    if email.is_empty() || domain.is_empty() {
        return false;
    }

    let mut parts = email.split('@');
    let (Some(local), Some(email_domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    if local.is_empty() || email_domain.is_empty() {
        return false;
    }

    email_domain.to_lowercase() == domain.to_lowercase()
}
