//! Entity drafts submitted through the pipeline and the rows read back from
//! the repository.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

pub const MAX_NAME_CHARS: usize = 120;
pub const MAX_TEXT_CHARS: usize = 2000;
pub const MAX_SCORE: i16 = 5;

/// Who may read a record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Only the owner
    #[default]
    Private,
    /// Anyone performing a read
    Public,
}

impl Visibility {
    pub fn is_public(self) -> bool {
        matches!(self, Visibility::Public)
    }
}

/// Kind of record, one table each
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Food,
    Image,
    PeerReview,
}

impl EntityKind {
    /// Backing table
    pub fn table(self) -> &'static str {
        match self {
            EntityKind::Food => "foods",
            EntityKind::Image => "images",
            EntityKind::PeerReview => "peer_reviews",
        }
    }

    /// Human label used in user-facing messages
    pub fn label(self) -> &'static str {
        match self {
            EntityKind::Food => "food",
            EntityKind::Image => "image",
            EntityKind::PeerReview => "peer review",
        }
    }

    /// Name recorded in `api_usage_records`
    pub fn api_name(self) -> &'static str {
        match self {
            EntityKind::Food => "add_food",
            EntityKind::Image => "add_image",
            EntityKind::PeerReview => "add_peer_review",
        }
    }

    /// Whether the table has a blob reference column
    pub fn accepts_file(self) -> bool {
        !matches!(self, EntityKind::PeerReview)
    }
}

/// Field-level validation failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Max file size is {max_bytes} bytes, got {size_bytes}")]
    FileTooLarge { size_bytes: u64, max_bytes: u64 },

    #[error("Invalid {field}: {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },

    #[error("A {0} cannot carry a file")]
    FileNotAccepted(&'static str),

    #[error("Missing owner id")]
    MissingOwner,
}

fn invalid(field: &'static str, message: impl Into<String>) -> ValidationError {
    ValidationError::InvalidField {
        field,
        message: message.into(),
    }
}

fn check_text(field: &'static str, value: Option<&str>) -> Result<(), ValidationError> {
    match value {
        Some(v) if v.chars().count() > MAX_TEXT_CHARS => Err(invalid(
            field,
            format!("at most {MAX_TEXT_CHARS} characters"),
        )),
        _ => Ok(()),
    }
}

fn check_score(field: &'static str, score: i16) -> Result<(), ValidationError> {
    if (0..=MAX_SCORE).contains(&score) {
        Ok(())
    } else {
        Err(invalid(field, format!("score must be between 0 and {MAX_SCORE}")))
    }
}

fn default_rating() -> i16 {
    2
}

/// Fields of a food entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodDraft {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_rating")]
    pub rating: i16,
}

/// Fields of an image entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageDraft {
    #[serde(default)]
    pub description: Option<String>,
}

/// A scored review section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoredSection {
    pub score: i16,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionalRating {
    pub score: i16,
    #[serde(default)]
    pub stood_out: String,
}

/// Review body, stored as JSON
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub presentation_score: ScoredSection,
    pub technical_score: ScoredSection,
    pub assists_peers_score: ScoredSection,
    pub documentation_score: ScoredSection,
    #[serde(default)]
    pub optional_rating: Option<OptionalRating>,
}

/// Fields of a peer review
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerReviewDraft {
    /// Reviewed user; the author when absent
    #[serde(default)]
    pub reviewee: Option<String>,
    pub review: Review,
}

/// Entity-specific fields, opaque to the pipeline apart from validation
#[derive(Debug, Clone, PartialEq)]
pub enum EntityDraft {
    Food(FoodDraft),
    Image(ImageDraft),
    PeerReview(PeerReviewDraft),
}

impl EntityDraft {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityDraft::Food(_) => EntityKind::Food,
            EntityDraft::Image(_) => EntityKind::Image,
            EntityDraft::PeerReview(_) => EntityKind::PeerReview,
        }
    }

    /// Check field constraints. Runs before any network call.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            EntityDraft::Food(food) => {
                let name_len = food.name.trim().chars().count();
                if name_len == 0 {
                    return Err(invalid("name", "must not be empty"));
                }
                if name_len > MAX_NAME_CHARS {
                    return Err(invalid(
                        "name",
                        format!("at most {MAX_NAME_CHARS} characters"),
                    ));
                }
                check_text("description", food.description.as_deref())?;
                check_score("rating", food.rating)
            }
            EntityDraft::Image(image) => check_text("description", image.description.as_deref()),
            EntityDraft::PeerReview(draft) => {
                if matches!(draft.reviewee.as_deref(), Some(r) if r.trim().is_empty()) {
                    return Err(invalid("reviewee", "must not be empty"));
                }
                let review = &draft.review;
                for (field, section) in [
                    ("presentation_score", &review.presentation_score),
                    ("technical_score", &review.technical_score),
                    ("assists_peers_score", &review.assists_peers_score),
                    ("documentation_score", &review.documentation_score),
                ] {
                    check_score(field, section.score)?;
                    check_text(field, Some(&section.comment))?;
                }
                if let Some(ref rating) = review.optional_rating {
                    check_score("optional_rating", rating.score)?;
                    check_text("optional_rating", Some(&rating.stood_out))?;
                }
                Ok(())
            }
        }
    }
}

/// A validated row ready for insertion
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntity {
    pub owner_id: String,
    pub is_public: bool,
    /// Path of a blob confirmed stored in this pipeline run
    pub blob_path: Option<String>,
    pub draft: EntityDraft,
}

/// Stored food row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FoodRecord {
    pub id: i64,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub rating: Option<i16>,
    pub image_url: Option<String>,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl FoodRecord {
    /// Visibility gate: private rows are readable only by their owner
    pub fn readable_by(&self, viewer_id: &str) -> bool {
        self.is_public || self.user_id == viewer_id
    }
}

/// Stored image row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ImageRecord {
    pub id: i64,
    pub created_by: String,
    pub description: Option<String>,
    pub filepath: Option<String>,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ImageRecord {
    pub fn readable_by(&self, viewer_id: &str) -> bool {
        self.is_public || self.created_by == viewer_id
    }
}

/// Stored peer review row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PeerReviewRecord {
    pub id: i64,
    pub created_by: String,
    pub reviewee: String,
    pub review: Json<Review>,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PeerReviewRecord {
    pub fn readable_by(&self, viewer_id: &str) -> bool {
        self.is_public || self.created_by == viewer_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn food(name: &str) -> EntityDraft {
        EntityDraft::Food(FoodDraft {
            name: name.to_string(),
            description: None,
            rating: 3,
        })
    }

    #[test]
    fn test_food_name_bounds() {
        assert!(food("Pho").validate().is_ok());
        assert!(matches!(
            food("   ").validate(),
            Err(ValidationError::InvalidField { field: "name", .. })
        ));
        assert!(food(&"a".repeat(MAX_NAME_CHARS + 1)).validate().is_err());
    }

    #[test]
    fn test_rating_bounds() {
        let draft = EntityDraft::Food(FoodDraft {
            name: "Ramen".to_string(),
            description: None,
            rating: 6,
        });
        assert!(matches!(
            draft.validate(),
            Err(ValidationError::InvalidField { field: "rating", .. })
        ));
    }

    #[test]
    fn test_peer_review_scores() {
        let mut draft = PeerReviewDraft::default();
        assert!(EntityDraft::PeerReview(draft.clone()).validate().is_ok());

        draft.review.technical_score.score = -1;
        assert!(matches!(
            EntityDraft::PeerReview(draft).validate(),
            Err(ValidationError::InvalidField {
                field: "technical_score",
                ..
            })
        ));
    }

    #[test]
    fn test_food_draft_defaults() {
        let draft: FoodDraft = serde_json::from_str(r#"{"name": "Laksa"}"#).unwrap();
        assert_eq!(draft.rating, 2);
        assert_eq!(draft.description, None);
    }

    #[test]
    fn test_visibility_defaults_private() {
        assert_eq!(Visibility::default(), Visibility::Private);
        assert_eq!(
            serde_json::from_str::<Visibility>("\"public\"").unwrap(),
            Visibility::Public
        );
    }

    #[test]
    fn test_readable_by() {
        let record = FoodRecord {
            id: 1,
            user_id: "owner".to_string(),
            name: "Nasi lemak".to_string(),
            description: None,
            rating: Some(4),
            image_url: None,
            is_public: false,
            created_at: Utc::now(),
            updated_at: None,
        };
        assert!(record.readable_by("owner"));
        assert!(!record.readable_by("someone-else"));
    }

    #[test]
    fn test_image_and_review_gates_follow_author() {
        let image = ImageRecord {
            id: 7,
            created_by: "author".to_string(),
            description: None,
            filepath: Some("images/a.jpg".to_string()),
            is_public: false,
            created_at: Utc::now(),
            updated_at: None,
        };
        assert!(image.readable_by("author"));
        assert!(!image.readable_by("someone-else"));

        let review = PeerReviewRecord {
            id: 3,
            created_by: "author".to_string(),
            reviewee: "someone-else".to_string(),
            review: Json(Review::default()),
            is_public: false,
            created_at: Utc::now(),
            updated_at: None,
        };
        // Being reviewed does not grant access to a private review
        assert!(!review.readable_by("someone-else"));
        assert!(review.readable_by("author"));
        assert!(PeerReviewRecord {
            is_public: true,
            ..review
        }
        .readable_by("anyone"));
    }
}
