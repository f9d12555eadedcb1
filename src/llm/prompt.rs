//! Prompt assembly for retrieval-grounded answers.

use super::AnswerRequest;
use std::fmt::Write as _;

/// Instructions sent as the system prompt to every provider.
pub const SYSTEM_PROMPT: &str = "You answer questions about a document using only the excerpts \
provided. Reply with a concise, self-contained answer in one or two sentences. If the excerpts \
do not contain the answer, say that the document does not specify it.";

/// Render the user turn: numbered excerpts followed by the question.
pub fn build_user_prompt(request: &AnswerRequest) -> String {
    let mut prompt = String::from("Excerpts:\n");
    if request.context.is_empty() {
        prompt.push_str("(no relevant excerpts found)\n");
    }
    for (index, excerpt) in request.context.iter().enumerate() {
        let _ = writeln!(prompt, "[{}] {}", index + 1, excerpt.trim());
    }
    let _ = write!(prompt, "\nQuestion: {}\nAnswer:", request.question.trim());
    prompt
}
