use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::bridge::CommandResponse;
use crate::common::{BridgeError, Result};

// One JSON object per line in each direction.

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BridgeRequest {
    pub callback_id: String,
    pub action: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReplyStatus {
    Ok,
    Error,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BridgeReply {
    pub callback_id: String,
    pub status: ReplyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl BridgeReply {
    pub fn new(callback_id: impl Into<String>, response: CommandResponse) -> Self {
        let callback_id = callback_id.into();
        match response {
            CommandResponse::Ok(payload) => Self {
                callback_id,
                status: ReplyStatus::Ok,
                payload,
                code: None,
                message: None,
            },
            CommandResponse::Error { code, message } => Self {
                callback_id,
                status: ReplyStatus::Error,
                payload: None,
                code: Some(code.to_string()),
                message: Some(message),
            },
        }
    }

    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| BridgeError::Engine(format!("Failed to encode reply: {}", e)))
    }
}

pub fn parse_request(line: &str) -> Result<BridgeRequest> {
    serde_json::from_str(line)
        .map_err(|e| BridgeError::Argument(format!("malformed request: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_request_defaults_args() {
        let request = parse_request(r#"{"callbackId":"7","action":"unload"}"#).unwrap();
        assert_eq!(request.callback_id, "7");
        assert_eq!(request.action, "unload");
        assert_eq!(request.args, Value::Null);
    }

    #[test]
    fn test_parse_request_rejects_garbage() {
        let err = parse_request("not json").unwrap_err();
        assert_eq!(err.code(), "ARGUMENT_ERROR");
    }

    #[test]
    fn test_ok_reply_omits_error_fields() {
        let line = BridgeReply::new("1", CommandResponse::ok(json!([]))).to_line().unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value, json!({ "callbackId": "1", "status": "OK", "payload": [] }));
    }

    #[test]
    fn test_ack_reply_has_no_payload() {
        let line = BridgeReply::new("2", CommandResponse::ack()).to_line().unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value, json!({ "callbackId": "2", "status": "OK" }));
    }

    #[test]
    fn test_error_reply_carries_code_and_message() {
        let response = CommandResponse::from_error(&BridgeError::SessionRejected);
        let line = BridgeReply::new("3", response).to_line().unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["status"], "ERROR");
        assert_eq!(value["code"], "SESSION_REJECTED");
        assert!(value.get("payload").is_none());
    }
}
