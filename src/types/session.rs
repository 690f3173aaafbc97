//! Per-request prediction session published to the UI layer

use crate::error::{ErrorKind, PipelineError};
use crate::types::classification::ClassificationResult;
use crate::types::nutrition::NutritionRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Text shown when the classifier is not confident enough.
pub const REJECTION_MESSAGE: &str = "Cannot identify this image correctly";

/// Lifecycle state of a prediction session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Idle,
    Preprocessing,
    LoadingModel,
    Inferring,
    Classified,
    LookingUpNutrition,
    Succeeded,
    Rejected,
    Failed,
}

impl SessionStatus {
    /// Whether the session has reached a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Succeeded | SessionStatus::Rejected | SessionStatus::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Preprocessing => "preprocessing",
            SessionStatus::LoadingModel => "loading_model",
            SessionStatus::Inferring => "inferring",
            SessionStatus::Classified => "classified",
            SessionStatus::LookingUpNutrition => "looking_up_nutrition",
            SessionStatus::Succeeded => "succeeded",
            SessionStatus::Rejected => "rejected",
            SessionStatus::Failed => "failed",
        }
    }
}

/// Fatal error attached to a failed session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionError {
    pub kind: ErrorKind,
    /// User-facing message
    pub message: String,
}

impl From<&PipelineError> for SessionError {
    fn from(err: &PipelineError) -> Self {
        Self {
            kind: err.kind(),
            message: err.user_message().to_string(),
        }
    }
}

/// Snapshot of one user-initiated prediction request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionSession {
    /// Unique session identifier
    pub session_id: Uuid,

    /// User who submitted the photo
    pub user_id: String,

    /// Monotonic request number; only the latest per user is ever committed
    pub sequence: u64,

    pub status: SessionStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<ClassificationResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nutrition: Option<NutritionRecord>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SessionError>,

    /// Time of the last state transition
    pub updated_at: DateTime<Utc>,
}

impl PredictionSession {
    /// Create a new idle session
    pub fn new(user_id: impl Into<String>, sequence: u64) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user_id: user_id.into(),
            sequence,
            status: SessionStatus::Idle,
            classification: None,
            nutrition: None,
            error: None,
            updated_at: Utc::now(),
        }
    }

    /// Move to `status`, stamping the transition time
    pub fn transition(&mut self, status: SessionStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Record the classification and move to `classified`
    pub fn classified(&mut self, classification: ClassificationResult) {
        self.classification = Some(classification);
        self.transition(SessionStatus::Classified);
    }

    /// Finish successfully; nutrition may be absent
    pub fn succeed(&mut self, nutrition: Option<NutritionRecord>) {
        self.nutrition = nutrition;
        self.transition(SessionStatus::Succeeded);
    }

    pub fn reject(&mut self) {
        self.transition(SessionStatus::Rejected);
    }

    pub fn fail(&mut self, err: &PipelineError) {
        self.error = Some(SessionError::from(err));
        self.transition(SessionStatus::Failed);
    }

    /// Text for the UI: the food name, the rejection notice, or the error
    /// message. `None` while the session is still running.
    pub fn display_text(&self) -> Option<String> {
        match self.status {
            SessionStatus::Succeeded => self
                .classification
                .as_ref()
                .and_then(|c| c.committed_label())
                .map(str::to_string),
            SessionStatus::Rejected => Some(REJECTION_MESSAGE.to_string()),
            SessionStatus::Failed => self.error.as_ref().map(|e| e.message.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;
    use crate::types::catalog::FoodLabel;

    fn pizza(confidence: f32, accepted: bool) -> ClassificationResult {
        ClassificationResult {
            label: "pizza".to_string(),
            food: FoodLabel::Pizza,
            index: 22,
            confidence,
            accepted,
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(SessionStatus::Succeeded.is_terminal());
        assert!(SessionStatus::Rejected.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
        assert!(!SessionStatus::Classified.is_terminal());
        assert!(!SessionStatus::Idle.is_terminal());
    }

    #[test]
    fn test_display_text() {
        let mut session = PredictionSession::new("user_1", 1);
        session.classified(pizza(0.92, true));
        assert_eq!(session.display_text(), None);
        session.succeed(None);
        assert_eq!(session.display_text().as_deref(), Some("pizza"));

        let mut session = PredictionSession::new("user_1", 2);
        session.classified(pizza(0.55, false));
        session.reject();
        assert_eq!(session.display_text().as_deref(), Some(REJECTION_MESSAGE));

        let err = PipelineError::from(DecodeError::Unreadable("truncated".into()));
        let mut session = PredictionSession::new("user_1", 3);
        session.fail(&err);
        assert_eq!(session.display_text().as_deref(), Some("Failed to process image"));
        assert_eq!(session.error.as_ref().map(|e| e.kind), Some(ErrorKind::Decode));

        assert_eq!(PredictionSession::new("user_1", 4).display_text(), None);
    }

    #[test]
    fn test_session_serialization() {
        let mut session = PredictionSession::new("user_42", 7);
        session.transition(SessionStatus::LookingUpNutrition);

        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["status"], "lookingUpNutrition");
        assert_eq!(json["userId"], "user_42");
        assert!(json.get("nutrition").is_none());

        let deserialized: PredictionSession = serde_json::from_value(json).unwrap();
        assert_eq!(deserialized.session_id, session.session_id);
        assert_eq!(deserialized.status, SessionStatus::LookingUpNutrition);
    }
}
