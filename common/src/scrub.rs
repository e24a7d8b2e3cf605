//! Secret hygiene for logs: query parameters whose keys commonly carry
//! credentials never reach a log line with their values intact.

const SECRET_QUERY_KEYS: &[&str] = &["token", "access_token", "api_key", "key", "secret"];

fn is_secret_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SECRET_QUERY_KEYS.contains(&key.as_str())
}

/// Redacts the values of secret-bearing query keys in a path+query
/// string. The path itself and benign parameters pass through.
pub fn scrub_path_and_query(path_and_query: &str) -> String {
    let Some((path, query)) = path_and_query.split_once('?') else {
        return path_and_query.to_string();
    };
    let scrubbed = query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((key, _)) if is_secret_key(key) => format!("{key}=REDACTED"),
            _ => pair.to_string(),
        })
        .collect::<Vec<_>>()
        .join("&");
    format!("{path}?{scrubbed}")
}
