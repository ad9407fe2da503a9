use serde_json::Value;

use crate::types::ParticipantId;

#[derive(Debug, PartialEq)]
pub enum ParsedClientMessage {
    Begin { id: ParticipantId },
    End { id: ParticipantId },
    KillerPress,
    KillerRelease,
    Restart,
    Ping { t: f64 },
}

pub fn parse_client_message(raw: &str) -> Option<ParsedClientMessage> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;
    let message_type = object.get("type")?.as_str()?;

    match message_type {
        "begin" => Some(ParsedClientMessage::Begin {
            id: parse_participant_id(object.get("id")?)?,
        }),
        "end" => Some(ParsedClientMessage::End {
            id: parse_participant_id(object.get("id")?)?,
        }),
        "killer_press" => Some(ParsedClientMessage::KillerPress),
        "killer_release" => Some(ParsedClientMessage::KillerRelease),
        "restart" => Some(ParsedClientMessage::Restart),
        "ping" => {
            let t = object.get("t")?.as_f64()?;
            if !t.is_finite() {
                return None;
            }
            Some(ParsedClientMessage::Ping { t })
        }
        _ => None,
    }
}

fn parse_participant_id(value: &Value) -> Option<ParticipantId> {
    value
        .as_u64()
        .and_then(|number| ParticipantId::try_from(number).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_begin_and_end() {
        assert_eq!(
            parse_client_message(r#"{"type":"begin","id":2}"#),
            Some(ParsedClientMessage::Begin { id: 2 })
        );
        assert_eq!(
            parse_client_message(r#"{"type":"end","id":4}"#),
            Some(ParsedClientMessage::End { id: 4 })
        );
    }

    #[test]
    fn parse_rejects_missing_or_invalid_ids() {
        assert!(parse_client_message(r#"{"type":"begin"}"#).is_none());
        assert!(parse_client_message(r#"{"type":"begin","id":-1}"#).is_none());
        assert!(parse_client_message(r#"{"type":"begin","id":1.5}"#).is_none());
        assert!(parse_client_message(r#"{"type":"end","id":"1"}"#).is_none());
        assert!(parse_client_message(r#"{"type":"end","id":4294967296}"#).is_none());
    }

    #[test]
    fn parse_killer_and_restart_messages() {
        assert_eq!(
            parse_client_message(r#"{"type":"killer_press"}"#),
            Some(ParsedClientMessage::KillerPress)
        );
        assert_eq!(
            parse_client_message(r#"{"type":"killer_release"}"#),
            Some(ParsedClientMessage::KillerRelease)
        );
        assert_eq!(
            parse_client_message(r#"{"type":"restart"}"#),
            Some(ParsedClientMessage::Restart)
        );
    }

    #[test]
    fn parse_ping_requires_finite_number() {
        assert_eq!(
            parse_client_message(r#"{"type":"ping","t":12.5}"#),
            Some(ParsedClientMessage::Ping { t: 12.5 })
        );
        assert!(parse_client_message(r#"{"type":"ping","t":"now"}"#).is_none());
    }

    #[test]
    fn parse_rejects_unknown_types_and_garbage() {
        assert!(parse_client_message(r#"{"type":"input","dir":"up"}"#).is_none());
        assert!(parse_client_message("not json").is_none());
        assert!(parse_client_message(r#"["begin", 1]"#).is_none());
    }
}
