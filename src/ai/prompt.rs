//! Reusable prompts using Handlebars for templating. Handlebars adds
//! additional security controls since it can't do much out of the box
//! without registering your own helpers. This is ideal since text
//! stored by users (like skill names) should be considered untrusted.

use std::fmt;

use anyhow::Result;
use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug)]
pub enum Prompt {
    SkillMentor,
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A skill the student is working on and how far along they are.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SkillGap {
    pub skill_name: String,
    #[serde(default)]
    pub current_level: u32,
}

impl SkillGap {
    pub fn new(skill_name: &str, current_level: u32) -> Self {
        Self {
            skill_name: skill_name.to_string(),
            current_level,
        }
    }
}

pub const GREETING: &str = "Hey! I'm your **AI Skill Mentor** 🎯

I'm here to help you learn, grow, and master your subjects. I can:

• **Explain concepts** in simple terms
• **Generate practice problems** tailored to your level
• **Identify knowledge gaps** and suggest improvements
• **Provide study roadmaps** for any topic

What would you like to learn today?";

pub const SUGGESTED_PROMPTS: &[&str] = &[
    "Explain recursion with examples",
    "Help me understand Big O notation",
    "Summarize DBMS normalization",
    "Tips for system design interviews",
];

const SKILL_MENTOR_PROMPT: &str = r"You are an AI Skill Mentor for EduMesh, a college learning platform. Your role is to:

1. **Explain Concepts**: Break down complex topics into simple, understandable parts
2. **Identify Knowledge Gaps**: Analyze what the student knows and what they need to learn
3. **Provide Free Resources**: Always include FREE learning resources like:
   - YouTube tutorials (mention specific channels like freeCodeCamp, CS50, MIT OpenCourseWare)
   - Documentation (official docs, MDN, W3Schools)
   - Free courses (Coursera free audits, Khan Academy, edX)
   - Practice platforms (LeetCode, HackerRank, GeeksforGeeks)
   - Articles and blogs (Medium, Dev.to, tutorials)

4. **Create Study Roadmaps**: Provide step-by-step learning paths
5. **Generate Practice Problems**: Offer exercises tailored to their level
{{#if skill_gaps}}

User's current skill gaps: {{#each skill_gaps}}{{skill_name}} ({{current_level}}% proficiency){{#unless @last}}, {{/unless}}{{/each}}
{{/if}}

Format your responses with:
- **Bold** for key concepts
- Bullet points for lists
- Code blocks for examples (use ``` for code)
- Emojis sparingly for engagement (🎯 📚 💡 ✅)

Always be encouraging and supportive. Focus on practical, actionable advice.";

pub fn templates<'a>() -> Handlebars<'a> {
    let mut registry = Handlebars::new();
    registry.set_strict_mode(true);
    // Prompts are plain text, not HTML
    registry.register_escape_fn(handlebars::no_escape);
    registry
        .register_template_string(&Prompt::SkillMentor.to_string(), SKILL_MENTOR_PROMPT)
        .expect("Failed to register template");
    registry
}

/// Render the mentor system prompt for a student with `skill_gaps`.
pub fn skill_mentor_prompt(skill_gaps: &[SkillGap]) -> Result<String> {
    let rendered = templates().render(
        &Prompt::SkillMentor.to_string(),
        &json!({ "skill_gaps": skill_gaps }),
    )?;
    Ok(rendered)
}
