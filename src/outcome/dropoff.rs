//! Dropoff point: where in the collection flow the caller left.

use crate::outcome::attempts::classify_topic;
use crate::records::model::{CallStatus, ConversationTurn, LeadFields};

/// Stage used when the call ended before the assistant ever spoke.
pub const STAGE_IVR: &str = "ivr";
/// Stage used when the last assistant utterance asked about no target field.
pub const STAGE_GREETING: &str = "greeting";

/// Dropoff action label, or `None` when the call completed.
///
/// ## Rules:
/// - Complete calls have no dropoff
/// - Otherwise the first missing field in collection order (name → model → email)
/// - When nothing was captured, or every field is present without the call
///   counting as complete, the last assistant utterance decides; no assistant
///   utterance at all means the caller left in the IVR
pub fn determine_dropoff(
    conversation: &[ConversationTurn],
    fields: &LeadFields,
    status: CallStatus,
) -> Option<String> {
    if status == CallStatus::Complete {
        return None;
    }

    if !fields.none_captured() {
        if let Some(missing) = fields.first_missing() {
            return Some(missing.label().to_string());
        }
    }

    Some(stage_from_last_assistant(conversation))
}

fn stage_from_last_assistant(conversation: &[ConversationTurn]) -> String {
    match conversation.iter().rev().find(|t| t.is_assistant()) {
        Some(turn) => classify_topic(&turn.content)
            .map(|field| field.label().to_string())
            .unwrap_or_else(|| STAGE_GREETING.to_string()),
        None => STAGE_IVR.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::model::{LeadField, Role};
    use chrono::Utc;

    fn turn(role: Role, text: &str) -> ConversationTurn {
        ConversationTurn::new(role, text, Utc::now())
    }

    #[test]
    fn test_missing_email_drops_at_email() {
        let mut fields = LeadFields::default();
        fields.set(LeadField::FullName, "Gulshan Mehta");
        fields.set(LeadField::CarModel, "Scorpio");
        let action = determine_dropoff(&[], &fields, CallStatus::Partial);
        assert_eq!(action.as_deref(), Some("email"));
    }

    #[test]
    fn test_first_missing_in_collection_order() {
        let mut fields = LeadFields::default();
        fields.set(LeadField::EmailId, "x@y.com");
        let action = determine_dropoff(&[], &fields, CallStatus::Partial);
        assert_eq!(action.as_deref(), Some("name"));
    }

    #[test]
    fn test_complete_has_no_dropoff() {
        let mut fields = LeadFields::default();
        for f in LeadField::ALL {
            fields.set(f, "v");
        }
        assert_eq!(determine_dropoff(&[], &fields, CallStatus::Complete), None);
    }

    #[test]
    fn test_nothing_captured_uses_last_assistant_topic() {
        let conversation = vec![
            turn(Role::Assistant, "Hi! May I know your name?"),
            turn(Role::User, "why"),
            turn(Role::Assistant, "Which car model are you considering?"),
        ];
        let action = determine_dropoff(&conversation, &LeadFields::default(), CallStatus::Partial);
        assert_eq!(action.as_deref(), Some("model"));
    }

    #[test]
    fn test_greeting_and_ivr_fallbacks() {
        let greeting = vec![turn(Role::Assistant, "Hello, thanks for calling!")];
        assert_eq!(
            determine_dropoff(&greeting, &LeadFields::default(), CallStatus::Failed).as_deref(),
            Some(STAGE_GREETING)
        );
        let silent = vec![turn(Role::User, "hello?")];
        assert_eq!(
            determine_dropoff(&silent, &LeadFields::default(), CallStatus::Failed).as_deref(),
            Some(STAGE_IVR)
        );
    }

    #[test]
    fn test_all_present_but_not_complete_scans_transcript() {
        let mut fields = LeadFields::default();
        for f in LeadField::ALL {
            fields.set(f, "v");
        }
        let conversation = vec![turn(Role::Assistant, "Please confirm your email.")];
        let action = determine_dropoff(&conversation, &fields, CallStatus::Failed);
        assert_eq!(action.as_deref(), Some("email"));
    }
}
