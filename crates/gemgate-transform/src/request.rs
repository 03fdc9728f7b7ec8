use gemgate_protocol::gemini::{
    Content, ContentRole, GenerateContentRequestBody, GenerationConfig, Part,
};
use gemgate_protocol::openai::{
    ChatCompletionMessageContent, ChatCompletionRole, ContentPart, CreateChatCompletionRequestBody,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationDefaults {
    pub temperature: f64,
    pub max_output_tokens: i64,
    pub top_p: f64,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_output_tokens: 4096,
            top_p: 0.95,
        }
    }
}

/// Builds the upstream body. Gemini has no system role on this endpoint, so
/// system and developer texts are folded into the first user turn.
pub fn transform_request(
    body: &CreateChatCompletionRequestBody,
    defaults: &GenerationDefaults,
) -> GenerateContentRequestBody {
    let mut system_texts = Vec::new();
    let mut contents = Vec::new();

    for message in &body.messages {
        let role = match message.role {
            ChatCompletionRole::System | ChatCompletionRole::Developer => {
                if let Some(content) = &message.content {
                    let text = content_text(content);
                    if !text.is_empty() {
                        system_texts.push(text);
                    }
                }
                continue;
            }
            ChatCompletionRole::User => ContentRole::User,
            ChatCompletionRole::Assistant => ContentRole::Model,
            ChatCompletionRole::Tool => continue,
        };
        let parts = message.content.as_ref().map(content_parts).unwrap_or_default();
        if parts.is_empty() {
            continue;
        }
        contents.push(Content {
            role: Some(role),
            parts,
        });
    }

    if !system_texts.is_empty() {
        merge_system_prompt(&mut contents, &system_texts.join("\n"));
    }

    let max_output_tokens = body
        .max_completion_tokens
        .or(body.max_tokens)
        .unwrap_or(defaults.max_output_tokens);
    let stop_sequences = body
        .stop
        .clone()
        .map(|stop| stop.into_vec())
        .filter(|stop| !stop.is_empty());

    GenerateContentRequestBody {
        contents,
        generation_config: Some(GenerationConfig {
            temperature: Some(body.temperature.unwrap_or(defaults.temperature)),
            max_output_tokens: Some(max_output_tokens),
            top_p: Some(body.top_p.unwrap_or(defaults.top_p)),
            stop_sequences,
        }),
    }
}

fn merge_system_prompt(contents: &mut Vec<Content>, system: &str) {
    let first_user = contents
        .iter_mut()
        .find(|content| content.role == Some(ContentRole::User));
    let Some(turn) = first_user else {
        contents.insert(
            0,
            Content {
                role: Some(ContentRole::User),
                parts: vec![Part::text(format!("[System]\n{system}"))],
            },
        );
        return;
    };
    match turn.parts.first_mut().and_then(|part| part.text.as_mut()) {
        Some(text) => *text = format!("[System]\n{system}\n\n[User]\n{text}"),
        None => turn
            .parts
            .insert(0, Part::text(format!("[System]\n{system}\n\n[User]\n"))),
    }
}

fn content_text(content: &ChatCompletionMessageContent) -> String {
    match content {
        ChatCompletionMessageContent::Text(text) => text.clone(),
        ChatCompletionMessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn content_parts(content: &ChatCompletionMessageContent) -> Vec<Part> {
    match content {
        ChatCompletionMessageContent::Text(text) if text.is_empty() => Vec::new(),
        ChatCompletionMessageContent::Text(text) => vec![Part::text(text.clone())],
        ChatCompletionMessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } if !text.is_empty() => Some(Part::text(text.clone())),
                ContentPart::ImageUrl { image_url } => parse_data_url(&image_url.url)
                    .map(|(mime_type, data)| Part::inline_data(mime_type, data)),
                _ => None,
            })
            .collect(),
    }
}

/// Splits `data:<mime>;base64,<payload>`. Remote image URLs are not fetched.
fn parse_data_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:")?;
    let (meta, data) = rest.split_once(',')?;
    let mime_type = meta.strip_suffix(";base64")?;
    if mime_type.is_empty() || data.is_empty() {
        return None;
    }
    Some((mime_type, data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_parsing() {
        assert_eq!(
            parse_data_url("data:image/jpeg;base64,/9j/4AAQ"),
            Some(("image/jpeg", "/9j/4AAQ"))
        );
        assert_eq!(parse_data_url("https://example.com/cat.png"), None);
        assert_eq!(parse_data_url("data:text/plain,hello"), None);
    }
}
