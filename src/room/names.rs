/// Display-name rules.
///
/// Two name shapes exist in the room: anonymous names handed out by the
/// server (`Anonymous` + four decimal digits) and user-chosen names
/// (3-20 characters from `[A-Za-z0-9_-]`). The hub is responsible for
/// uniqueness; this module only covers shape.
use rand::Rng;

const ANONYMOUS_PREFIX: &str = "Anonymous";

/// Generate a fresh anonymous display name, e.g. `Anonymous0042`.
///
/// Pseudorandom, not unique — callers draw repeatedly until the name is
/// free in the federation.
pub fn anonymous_name() -> String {
    let n: u16 = rand::thread_rng().gen_range(0..10_000);
    format!("{ANONYMOUS_PREFIX}{n:04}")
}

/// True for names of the shape `Anonymous####`.
pub fn is_anonymous_name(name: &str) -> bool {
    match name.strip_prefix(ANONYMOUS_PREFIX) {
        Some(digits) => digits.len() == 4 && digits.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// Validate a user-chosen name: `^[A-Za-z0-9_-]{3,20}$`.
pub fn is_valid_username(name: &str) -> bool {
    (3..=20).contains(&name.len())
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}
