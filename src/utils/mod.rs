pub mod encryption;
pub mod errors;
pub mod html;
pub mod ratelimit;
pub mod table;

pub use errors::extract_clean_error;
pub use html::escape_html;
pub use ratelimit::rate_limit_explorer;
pub use table::Table;

/// Random lowercase hex string of `bytes` random bytes
pub fn random_hex(bytes: usize) -> String {
    use rand::RngCore;

    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Loose email sanity check: one `@` with a dotted domain and no whitespace
pub fn looks_like_email(value: &str) -> bool {
    let value = value.trim();
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}
