//! Grounded tutoring prompt.

/// Prompt template for explaining textbook content to a student.
///
/// The instructions bias the model toward attempting an explanation: it may
/// only answer "I don't have information" when the content is completely
/// unrelated to the question.
const PROMPT_TEMPLATE: &str = r#"You are a friendly NEET tutor. Answer the student's question using the NCERT content provided below.

=== NCERT Content ===
{context}
=== End of NCERT Content ===

Student's Question: {question}

INSTRUCTIONS:
1. Use the NCERT content above to answer the question
2. Explain in SIMPLE, everyday language (like talking to a friend)
3. Break down complex ideas into easy words
4. Use bullet points and short sentences
5. Give examples when helpful
6. If the exact answer isn't in the content but you can explain the concept from what's given, DO IT
7. Never refuse to explain when the content is even partly related to the question
8. ONLY say "I don't have information" if the content is completely unrelated to the question

Answer the question clearly and simply:"#;

/// Renders the template with the question and assembled context.
pub fn build_prompt(question: &str, context: &str) -> String {
    render(
        PROMPT_TEMPLATE,
        &[("{context}", context), ("{question}", question)],
    )
}

/// Single-pass placeholder substitution.
///
/// Substituted values are never rescanned, so a question or chunk containing a
/// literal placeholder is left as written.
fn render(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    loop {
        let next = values
            .iter()
            .filter_map(|(key, value)| rest.find(key).map(|pos| (pos, *key, *value)))
            .min_by_key(|(pos, _, _)| *pos);

        match next {
            Some((pos, key, value)) => {
                out.push_str(&rest[..pos]);
                out.push_str(value);
                rest = &rest[pos + key.len()..];
            }
            None => {
                out.push_str(rest);
                return out;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_contains_question_and_delimited_context() {
        let prompt = build_prompt(
            "What is kinetic energy?",
            "Kinetic energy is the energy an object has due to its motion.",
        );

        let start = prompt.find("=== NCERT Content ===").unwrap();
        let body = prompt
            .find("Kinetic energy is the energy an object has due to its motion.")
            .unwrap();
        let end = prompt.find("=== End of NCERT Content ===").unwrap();
        assert!(start < body && body < end);
        assert!(prompt.contains("Student's Question: What is kinetic energy?"));
    }

    #[test]
    fn prompt_keeps_answer_attempt_policy() {
        let prompt = build_prompt("q", "c");

        assert!(prompt.contains("Use the NCERT content above to answer the question"));
        assert!(prompt.contains("SIMPLE, everyday language"));
        assert!(prompt.contains("Give examples when helpful"));
        assert!(prompt.contains(
            r#"ONLY say "I don't have information" if the content is completely unrelated"#
        ));
        assert!(prompt.contains("Never refuse to explain"));
    }

    #[test]
    fn empty_context_still_renders_markers() {
        let prompt = build_prompt("What is osmosis?", "");
        assert!(prompt.contains("=== NCERT Content ===\n\n=== End of NCERT Content ==="));
        assert!(prompt.contains("What is osmosis?"));
    }

    #[test]
    fn placeholders_in_user_text_are_not_expanded() {
        let prompt = build_prompt("Explain {context} please", "chunk with {question} inside");

        assert!(prompt.contains("Student's Question: Explain {context} please"));
        assert!(prompt.contains("chunk with {question} inside"));
        assert_eq!(prompt.matches("chunk with").count(), 1);
    }
}
