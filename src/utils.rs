use url::Url;

/// Utility functions shared by the adapter and translators

/// Base URL for API calls: trailing slashes removed, `/v1` appended unless already present
pub fn api_base(endpoint: &Url) -> String {
    let trimmed = endpoint.as_str().trim_end_matches('/');
    if trimmed.ends_with("/v1") {
        trimmed.to_string()
    } else {
        format!("{}/v1", trimmed)
    }
}

/// Rough token estimate: one token per four characters, rounded up
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count() as u32;
    chars.div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_api_base_appends_v1() {
        assert_eq!(api_base(&url("https://llm.example.com")), "https://llm.example.com/v1");
        assert_eq!(api_base(&url("https://llm.example.com/")), "https://llm.example.com/v1");
        assert_eq!(
            api_base(&url("https://llm.example.com/proxy/")),
            "https://llm.example.com/proxy/v1"
        );
    }

    #[test]
    fn test_api_base_keeps_existing_v1() {
        assert_eq!(api_base(&url("https://llm.example.com/v1")), "https://llm.example.com/v1");
        assert_eq!(api_base(&url("https://llm.example.com/v1/")), "https://llm.example.com/v1");
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("a"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens("héllo wörld"), 3);
    }
}
