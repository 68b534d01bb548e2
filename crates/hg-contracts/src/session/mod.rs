mod feedback;
mod fields;
mod image;
mod state;

pub use feedback::{normalize_rating, FeedbackRecord, FeedbackWriter};
pub use fields::ContextFields;
pub use image::{approx_payload_bytes, ImagePayload};
pub use state::{AnalysisTurn, Session, TurnKind};
