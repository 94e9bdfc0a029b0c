//! Public types for the skill mentor API
use serde::{Deserialize, Serialize};

use crate::ai::prompt::SkillGap;
use crate::openai::Message;

#[derive(Serialize, Deserialize, Debug)]
pub struct MentorRequest {
    pub messages: Vec<Message>,
    #[serde(rename = "skillGaps", default)]
    pub skill_gaps: Vec<SkillGap>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct MentorErrorResponse {
    pub error: String,
}

impl MentorErrorResponse {
    pub fn new(error: &str) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct MentorPromptsResponse {
    pub greeting: String,
    pub prompts: Vec<String>,
}
