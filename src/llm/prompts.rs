// Message templates sent to the dialogue engine on the listener's behalf

pub struct MessageTemplates;

impl MessageTemplates {
    /// A listener's answer to an AI-posed quiz question
    pub fn quiz_answer(question: &str, answer: &str) -> String {
        format!(
            "Quiz question: \"{}\"\nStudent's answer: \"{}\"\n\
             Tell the student whether the answer is correct, explain briefly, \
             then continue the lecture.",
            question.trim(),
            answer.trim()
        )
    }

    /// A question or remark that interrupted the lecture
    pub fn interjection(text: &str, follow_up_instruction: &str) -> String {
        let instruction = follow_up_instruction.trim();
        if instruction.is_empty() {
            return text.trim().to_string();
        }
        format!("{}\n\n({})", text.trim(), instruction)
    }

    /// First message of a session
    pub fn opening(topic: &str, language_name: &str) -> String {
        format!(
            "Start the lecture about \"{}\". Speak {} and use short, complete sentences.",
            topic.trim(),
            language_name
        )
    }
}
