use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct SendMessageRequest<'a> {
    pub chat_id: i64,
    pub text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<&'a str>,
    pub disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub date: i64,
    pub chat: Chat,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_send_message_response() {
        let json = r#"{"ok":true,"result":{"message_id":7,"date":1700000000,"chat":{"id":-100,"type":"group"},"text":"hi"}}"#;
        let parsed: ApiResponse<Message> = serde_json::from_str(json).unwrap();
        assert!(parsed.ok);
        let message = parsed.result.unwrap();
        assert_eq!(message.message_id, 7);
        assert_eq!(message.chat.id, -100);
    }

    #[test]
    fn omits_parse_mode_when_unset() {
        let request = SendMessageRequest {
            chat_id: 1,
            text: "plain",
            parse_mode: None,
            disable_web_page_preview: true,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("parse_mode"));
    }
}
