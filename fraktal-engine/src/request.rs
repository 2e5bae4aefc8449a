//! Inbound request shapes and their validation.

use serde::{Deserialize, Serialize};

use fraktal_core::types::validate_display_name;
use fraktal_core::{FractalId, ValidationError};

pub const MAX_PURPOSE_CHARS: usize = 2000;
pub const MAX_PERSONA_CHARS: usize = 4000;
pub const MAX_INVITEES: usize = 16;

/// Body of a create call. Missing fields default so validation can name them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateRequest {
    pub name: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub invite_participants: Vec<String>,
    pub auto_reply: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeleteOptions {
    pub delete_workspace: bool,
    pub delete_room: bool,
}

/// A create request that passed validation.
#[derive(Debug, Clone)]
pub struct CreatePlan {
    pub id: FractalId,
    pub display_name: String,
    pub purpose: Option<String>,
    pub persona: Option<String>,
    pub model: String,
    pub invitees: Vec<String>,
    pub auto_reply: bool,
}

impl CreatePlan {
    pub fn validate(request: CreateRequest, default_model: &str) -> Result<Self, ValidationError> {
        if request.id.trim().is_empty() {
            return Err(ValidationError::MissingField { field: "id" });
        }
        let id = FractalId::parse(&request.id)?;
        let display_name = validate_display_name(&request.name)?;
        let purpose = bounded_text("purpose", request.purpose, MAX_PURPOSE_CHARS)?;
        let persona = bounded_text("persona", request.persona, MAX_PERSONA_CHARS)?;

        let model = match request.model.as_deref().map(str::trim) {
            None | Some("") => default_model.to_owned(),
            Some(m) if m.chars().any(char::is_whitespace) => {
                return Err(ValidationError::Invalid {
                    field: "model",
                    reason: "must not contain whitespace".to_string(),
                })
            }
            Some(m) => m.to_owned(),
        };

        let mut invitees: Vec<String> = Vec::new();
        for raw in request.invite_participants {
            let user = raw.trim().to_owned();
            if !is_user_id(&user) {
                return Err(ValidationError::Invalid {
                    field: "inviteParticipants",
                    reason: format!("'{user}' is not a user id like @name:server"),
                });
            }
            if !invitees.contains(&user) {
                invitees.push(user);
            }
        }
        if invitees.len() > MAX_INVITEES {
            return Err(ValidationError::Invalid {
                field: "inviteParticipants",
                reason: format!("at most {MAX_INVITEES} participants"),
            });
        }

        Ok(CreatePlan {
            id,
            display_name,
            purpose,
            persona,
            model,
            invitees,
            auto_reply: request.auto_reply,
        })
    }
}

fn bounded_text(
    field: &'static str,
    text: Option<String>,
    max: usize,
) -> Result<Option<String>, ValidationError> {
    let Some(text) = text.map(|t| t.trim().to_owned()).filter(|t| !t.is_empty()) else {
        return Ok(None);
    };
    if text.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(Some(text))
}

fn is_user_id(raw: &str) -> bool {
    match raw.strip_prefix('@').and_then(|rest| rest.split_once(':')) {
        Some((local, server)) => {
            !local.is_empty() && !server.is_empty() && !raw.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn request() -> CreateRequest {
        CreateRequest {
            name: "Scout".into(),
            id: "scout".into(),
            ..CreateRequest::default()
        }
    }

    #[test]
    fn defaults_are_filled() {
        let plan = CreatePlan::validate(request(), "default-model").unwrap();
        assert_eq!(plan.model, "default-model");
        assert!(plan.invitees.is_empty());
        assert!(plan.purpose.is_none());
    }

    #[test]
    fn camel_case_body_parses() {
        let body = r#"{"name":"Scout","id":"scout","inviteParticipants":["@a:x"],"autoReply":true}"#;
        let req: CreateRequest = serde_json::from_str(body).unwrap();
        assert!(req.auto_reply);
        assert_eq!(req.invite_participants, ["@a:x"]);
    }

    #[test]
    fn duplicate_invitees_collapse() {
        let mut req = request();
        req.invite_participants = vec!["@a:x".into(), " @a:x ".into()];
        assert_eq!(CreatePlan::validate(req, "m").unwrap().invitees, ["@a:x"]);
    }

    #[rstest]
    #[case::missing_id("", "Scout", None, &[])]
    #[case::bad_id("Scout!", "Scout", None, &[])]
    #[case::missing_name("scout", "  ", None, &[])]
    #[case::spaced_model("scout", "Scout", Some("a b"), &[])]
    #[case::bad_invitee("scout", "Scout", None, &["alice"])]
    fn invalid_requests_are_rejected(
        #[case] id: &str,
        #[case] name: &str,
        #[case] model: Option<&str>,
        #[case] invitees: &[&str],
    ) {
        let req = CreateRequest {
            id: id.into(),
            name: name.into(),
            model: model.map(str::to_owned),
            invite_participants: invitees.iter().map(|s| s.to_string()).collect(),
            ..CreateRequest::default()
        };
        assert!(CreatePlan::validate(req, "m").is_err());
    }

    #[test]
    fn long_purpose_is_rejected() {
        let mut req = request();
        req.purpose = Some("x".repeat(MAX_PURPOSE_CHARS + 1));
        let err = CreatePlan::validate(req, "m").unwrap_err();
        assert!(matches!(err, ValidationError::TooLong { field: "purpose", .. }));
    }
}
