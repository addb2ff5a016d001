//! Prompt Composer: system instructions, history and retrieved reviews.

use crate::error::CompositionError;
use crate::models::{
    AugmentedPrompt, ConversationMessage, PromptSegment, RetrievalResult, RetrievedRecord,
    SegmentKind,
};
use crate::utils::is_blank;

/// Built-in instructions for professor recommendations.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an intelligent agent designed to help students find the best professors according to their specific needs. When a student asks about professors, your role is to understand their query, retrieve relevant data about professors, and present the top 3 professors who best match their criteria. Your responses should be concise, informative, and focused on the student's request.

Guidelines for Tone:

Friendly and Supportive: Use a welcoming tone that makes students feel comfortable and valued.
Informative and Neutral: Provide accurate, unbiased information without making personal judgments.
Concise and Clear: Keep responses short and to the point, focusing on the most relevant details.

Instructions:

Understand the Query:
Identify the key elements of the student's question (e.g., subject, teaching style, rating preference).

Use the Retrieved Reviews:
Each student message may be followed by blocks starting with "Returned Results:" that list a professor, a review, a subject and a star rating. Rank the top 3 professors from these blocks based on relevance, ratings, and the query's context.

Present the Results:
Provide the names of the top 3 professors along with brief descriptions of their strengths, subject areas, and relevant ratings.
Ensure the information is accurate and directly addresses the student's needs.

Response Format:

Title: "Top 3 Professors for [Subject/Criteria]"
Professor 1:
Name: [Professor Name]
Rating: [X/5]
Summary: [Brief description highlighting strengths, teaching style, or relevant details.]
Professor 2:
Name: [Professor Name]
Rating: [X/5]
Summary: [Brief description highlighting strengths, teaching style, or relevant details.]
Professor 3:
Name: [Professor Name]
Rating: [X/5]
Summary: [Brief description highlighting strengths, teaching style, or relevant details.]

Format the response as follows:
- Start with the title.
- List each professor's information on a new line.
- Use bullet points or hyphens for each attribute (Name, Rating, Summary).
- Separate different professors with an empty line.

Maintain Neutrality:
Avoid making subjective judgments. Present the data as it is, focusing on the students' requirements.

When No Reviews Are Supplied:
If the student's message carries no "Returned Results:" blocks, no matching reviews were found. Say so plainly, then answer from general knowledge without inventing names, ratings, or reviews.

Example Response:

If a student asks for "the best Physics professors," you might respond with:

Title: "Top 3 Professors for Physics"
Professor 1:
Name: Dr. Emily Carter
Rating: 4/5
Summary: Known for clear explanations and in-depth knowledge of Quantum Mechanics.
Professor 2:
Name: Prof. James Smith
Rating: 5/5
Summary: Highly engaging and makes complex topics accessible.
Professor 3:
Name: Dr. Linda Brown
Rating: 3.5/5
Summary: Excellent for advanced topics but lectures can be fast-paced."#;

/// Heading that opens every rendered review block.
pub const RESULT_HEADING: &str = "Returned Results:";

/// Builds the [`AugmentedPrompt`] for one request. Holds only the system
/// instructions; composing is pure.
#[derive(Debug, Clone)]
pub struct PromptComposer {
    system_instructions: String,
}

impl Default for PromptComposer {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_PROMPT)
    }
}

impl PromptComposer {
    pub fn new(system_instructions: impl Into<String>) -> Self {
        Self {
            system_instructions: system_instructions.into(),
        }
    }

    /// Use `custom` when configured, else the built-in prompt.
    pub fn from_override(custom: Option<&str>) -> Self {
        match custom {
            Some(text) if !is_blank(text) => Self::new(text),
            _ => Self::default(),
        }
    }

    pub fn system_instructions(&self) -> &str {
        &self.system_instructions
    }

    pub fn compose(
        &self,
        prior: &[ConversationMessage],
        current_user_text: &str,
        retrieval: &RetrievalResult,
    ) -> Result<AugmentedPrompt, CompositionError> {
        compose(&self.system_instructions, prior, current_user_text, retrieval)
    }
}

/// Assemble instructions, prior turns and the context-augmented final turn.
///
/// Instructions come first; prior turns follow unchanged and in order; the
/// final segment is the user text, then a blank line, then one block per
/// record in ranked order. With no records the user text stands alone.
pub fn compose(
    system_instructions: &str,
    prior: &[ConversationMessage],
    current_user_text: &str,
    retrieval: &RetrievalResult,
) -> Result<AugmentedPrompt, CompositionError> {
    if is_blank(system_instructions) {
        return Err(CompositionError::EmptyInstructions);
    }
    if is_blank(current_user_text) {
        return Err(CompositionError::EmptyQuery);
    }

    let mut segments = Vec::with_capacity(prior.len() + 2);
    segments.push(PromptSegment {
        kind: SegmentKind::Instructions,
        text: system_instructions.to_string(),
    });
    segments.extend(prior.iter().map(|message| PromptSegment {
        kind: SegmentKind::History(message.role),
        text: message.content.clone(),
    }));

    let mut final_text = current_user_text.to_string();
    if !retrieval.is_empty() {
        final_text.push_str("\n\n");
        final_text.push_str(&render_context(retrieval));
    }
    segments.push(PromptSegment {
        kind: SegmentKind::Query,
        text: final_text,
    });

    Ok(AugmentedPrompt::from_segments(segments))
}

/// Render all records, separated by blank lines.
pub fn render_context(retrieval: &RetrievalResult) -> String {
    retrieval
        .iter()
        .map(render_record)
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn render_record(record: &RetrievedRecord) -> String {
    format!(
        "{RESULT_HEADING}\nProfessor: {}\nReview: {}\nSubject: {}\nStars: {}",
        record.identifier,
        record.metadata.review_text,
        record.metadata.subject,
        record.metadata.star_rating
    )
}
