/// Turn an OpenAI-compatible base URL into its chat completions endpoint.
///
/// `https://host/v1` becomes `https://host/v1/chat/completions`; a URL that
/// already names the endpoint is returned unchanged; a bare host gets
/// `/v1/chat/completions`.
pub fn chat_completions_url(base_url: &str) -> String {
    let trimmed = base_url.trim_end_matches('/');
    if trimmed.ends_with("/chat/completions") {
        return trimmed.to_string();
    }

    match url::Url::parse(trimmed) {
        Ok(mut parsed) => {
            let path = parsed.path().trim_end_matches('/').to_string();
            if path.is_empty() {
                parsed.set_path("/v1/chat/completions");
            } else {
                parsed.set_path(&format!("{path}/chat/completions"));
            }
            parsed.to_string()
        }
        Err(_) => format!("{trimmed}/chat/completions"),
    }
}
