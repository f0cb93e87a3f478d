//! Standard security headers applied to every HTTP response.

/// `(name, value)` pairs every response carries. API responses additionally
/// get `cache_control_no_store` applied by the caller.
pub const BASE_HEADERS: &[(&str, &str)] = &[
    ("X-Content-Type-Options", "nosniff"),
    ("X-Frame-Options", "DENY"),
    ("Strict-Transport-Security", "max-age=31536000; includeSubDomains"),
    (
        "Content-Security-Policy",
        "default-src 'none'; frame-ancestors 'none'",
    ),
];

/// API responses (as opposed to static assets) must never be cached, since
/// they can carry per-caller rate-limit state and risk-scored data.
pub const CACHE_CONTROL_NO_STORE: (&str, &str) =
    ("Cache-Control", "no-store, no-cache, must-revalidate, private");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_headers_include_the_required_set() {
        let names: Vec<&str> = BASE_HEADERS.iter().map(|(name, _)| *name).collect();
        assert!(names.contains(&"X-Content-Type-Options"));
        assert!(names.contains(&"X-Frame-Options"));
        assert!(names.contains(&"Strict-Transport-Security"));
    }
}
