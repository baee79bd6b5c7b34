/// Extract clean error message from database error strings
///
/// Removes technical error codes and prefixes like:
/// "error returned from database: (code: 2067) UNIQUE constraint failed: wallet_address.network"
///
/// Returns only the meaningful error message:
/// "UNIQUE constraint failed: wallet_address.network"
pub fn extract_clean_error(error_msg: &str) -> String {
    match error_msg.strip_prefix("error returned from database:") {
        Some(rest) => {
            let rest = rest.trim();
            match rest.strip_prefix("(code:") {
                Some(coded) => coded
                    .split_once(')')
                    .map(|(_, msg)| msg.trim().to_string())
                    .unwrap_or_else(|| rest.to_string()),
                None => rest.to_string(),
            }
        }
        None => error_msg.to_string(),
    }
}
