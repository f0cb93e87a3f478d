//! CORS origin allowlisting, driven by `ALLOWED_ORIGINS`.

#[derive(Clone, Debug, Default)]
pub struct CorsPolicy {
    allowed: Vec<String>,
}

impl CorsPolicy {
    pub fn new(allowed_origins: Vec<String>) -> Self {
        Self { allowed: allowed_origins }
    }

    /// An empty allowlist denies every cross-origin request rather than
    /// defaulting open -- `ALLOWED_ORIGINS` must be set explicitly.
    pub fn is_allowed(&self, origin: &str) -> bool {
        self.allowed.iter().any(|allowed| allowed == origin)
    }

    /// The `Access-Control-Allow-Origin` value for `origin`, if permitted.
    pub fn allow_origin_header(&self, origin: &str) -> Option<&str> {
        self.is_allowed(origin).then_some(origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allowlist_denies_everything() {
        let policy = CorsPolicy::default();
        assert!(!policy.is_allowed("https://example.com"));
    }

    #[test]
    fn exact_match_is_allowed() {
        let policy = CorsPolicy::new(vec!["https://dashboard.example.com".to_owned()]);
        assert!(policy.is_allowed("https://dashboard.example.com"));
        assert!(!policy.is_allowed("https://evil.example.com"));
    }
}
