use crate::error::ServiceError;

pub fn chat_endpoint(base_url: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    format!("{base_url}/chat/completions")
}

pub async fn chat_text(
    client: &reqwest::Client,
    endpoint: &str,
    api_key: &str,
    model: &str,
    system: &str,
    user: &str,
    temperature: f32,
    max_tokens: u32,
) -> Result<String, ServiceError> {
    let body = serde_json::json!({
        "model": model,
        "messages": [
            { "role": "system", "content": system },
            { "role": "user", "content": user },
        ],
        "temperature": temperature,
        "max_tokens": max_tokens,
    });

    let response = client
        .post(endpoint)
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await?;

    let status = response.status();
    let raw = response.text().await?;
    if !status.is_success() {
        let message = parse_error_message(&raw).unwrap_or_else(|| raw.clone());
        return Err(ServiceError::Api {
            status: status.as_u16(),
            message,
        });
    }

    let value: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|err| ServiceError::malformed(format!("parse response body: {err}")))?;
    extract_message_content(&value)
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let message = value.get("error")?.get("message")?.as_str()?.to_owned();
    Some(message)
}

fn extract_message_content(value: &serde_json::Value) -> Result<String, ServiceError> {
    let choices = value
        .get("choices")
        .and_then(|v| v.as_array())
        .ok_or_else(|| ServiceError::malformed("missing `choices` array in response"))?;

    let mut text = String::new();
    for choice in choices {
        let Some(part) = choice
            .pointer("/message/content")
            .and_then(|v| v.as_str())
        else {
            continue;
        };
        text.push_str(part);
    }

    if text.trim().is_empty() {
        return Err(ServiceError::Empty);
    }
    Ok(text)
}

/// Models wrap JSON answers in prose or code fences; take the outermost
/// object span and let serde reject anything still malformed.
pub fn extract_json_object(text: &str) -> Result<&str, ServiceError> {
    let start = text
        .find('{')
        .ok_or_else(|| ServiceError::malformed("missing `{` in output"))?;
    let end = text
        .rfind('}')
        .ok_or_else(|| ServiceError::malformed("missing `}` in output"))?;
    if end <= start {
        return Err(ServiceError::malformed("invalid json object span"));
    }
    Ok(&text[start..=end])
}
