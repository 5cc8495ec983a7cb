//! Prompt builders for the generation stages. Each returns the full user
//! prompt text; context assembly stays here so the pipeline and tests can
//! inspect it.

use crate::models::course::SourceDocument;

/// Uploaded text is capped before summarization (roughly 100k tokens).
pub const MAX_DOCUMENT_CHARS: usize = 300_000;

pub fn summarize_document(filename: &str, text: &str) -> String {
    let mut text = text;
    let mut truncated = false;
    if text.len() > MAX_DOCUMENT_CHARS {
        let mut cut = MAX_DOCUMENT_CHARS;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text = &text[..cut];
        truncated = true;
    }

    format!(
        "Please provide a comprehensive summary of this document titled \"{}\".\n\n\
         Include:\n\
         1. Main topics and themes\n\
         2. Key points and important concepts\n\
         3. Overall purpose/conclusion\n\n\
         Document Content:\n{}{}\n\n\
         Provide a clear, structured summary in 2-3 paragraphs.",
        filename,
        text,
        if truncated {
            "\n\n[Text truncated due to length...]"
        } else {
            ""
        }
    )
}

pub fn synthesize_modules(
    course_name: &str,
    course_description: Option<&str>,
    documents: &[SourceDocument],
) -> String {
    let context: Vec<String> = documents
        .iter()
        .filter_map(|doc| {
            doc.summary
                .as_ref()
                .map(|summary| format!("Document: {}\nSummary: {}", doc.filename, summary))
        })
        .collect();

    let materials = if context.is_empty() {
        "No course materials provided yet. Please create a comprehensive learning plan based on \
         the course name and description. Design modules that would typically be covered in this \
         type of course, including foundational concepts, intermediate topics, and advanced \
         applications."
            .to_string()
    } else {
        format!(
            "Course Materials:\n{}\n\nPlease analyze this content and create a learning plan \
             with reasonably-sized modules in a logical linear progression.",
            context.join("\n\n")
        )
    };

    format!(
        "You are a curriculum designer. Given a course and its materials, create a structured \
         learning plan by organizing the content into logical modules/topics that build on each \
         other.\n\n\
         Course Name: {}\n\
         Course Description: {}\n\n\
         {}\n\n\
         RULES:\n\
         1. Create 4-8 modules that build on each other sequentially\n\
         2. Each module should have a clear, descriptive name and detailed content from the materials\n\
         3. Start with foundational concepts and progressively build to advanced topics\n\
         4. Each module naturally builds on the knowledge from the previous module\n\
         5. The sequence should form a clear learning path from basics to mastery\n\n\
         Output your response as a JSON array of modules. Each module should have:\n\
         - \"name\": A clear, descriptive module name\n\
         - \"content\": Detailed content combining relevant information from the materials, \
         explaining key concepts\n\n\
         IMPORTANT: Only output valid JSON. Do not include any text before or after the JSON array.",
        course_name,
        course_description.unwrap_or("Not provided"),
        materials
    )
}

pub fn synthesize_questions(module_name: &str, module_content: &str) -> String {
    format!(
        "You are an educational assessment designer. Create multiple choice questions to test \
         understanding of this course module.\n\n\
         Module Name: {}\n\
         Module Content: {}\n\n\
         Please create 1-2 multiple choice questions that test the most important concepts from \
         this module.\n\n\
         RULES:\n\
         1. Create 1-2 questions (choose 1 for simpler modules, 2 for complex modules)\n\
         2. Each question should have exactly 4 answer options\n\
         3. Questions should test understanding, not just memorization\n\
         4. Make incorrect options plausible but clearly wrong to someone who understands the material\n\
         5. Focus on the most critical concepts only\n\
         6. Questions should be clear and unambiguous\n\n\
         Output your response as a JSON array of questions. Each question should have:\n\
         - \"question_text\": The question to ask\n\
         - \"options\": Array of exactly 4 answer options (strings)\n\
         - \"correct_answer_index\": Index (0-3) of the correct option\n\n\
         IMPORTANT: Only output valid JSON. Do not include any text before or after the JSON array.",
        module_name, module_content
    )
}

pub fn narration_script(module_name: &str, lesson_content: &str) -> String {
    format!(
        "You are an educational content creator. Write a clear, engaging narration script for a \
         30-60 second educational video.\n\n\
         Module: {}\n\
         Content: {}\n\n\
         Requirements:\n\
         1. Write in a friendly, conversational tone suitable for voice narration\n\
         2. Keep it concise (30-60 seconds when read aloud at normal pace)\n\
         3. Start with a hook to grab attention\n\
         4. Explain the concept clearly and simply\n\
         5. Use short sentences that flow well when spoken\n\
         6. End with a key takeaway or summary\n\
         7. Avoid complex jargon - use accessible language\n\
         8. Make it engaging and memorable\n\n\
         IMPORTANT: Only output the narration script text - no additional formatting, labels, or \
         explanations.",
        module_name, lesson_content
    )
}

pub fn tutoring_system(course_name: &str, module_name: &str, module_content: &str) -> String {
    format!(
        "You are an AI learning coach helping a student understand course material.\n\n\
         Course: {}\n\
         Module: {}\n\n\
         Module Content:\n{}\n\n\
         Your role is to:\n\
         - Help students understand the concepts covered in this module\n\
         - Answer questions clearly and concisely\n\
         - Provide examples when helpful\n\
         - Encourage critical thinking\n\
         - Be supportive and encouraging\n\n\
         IMPORTANT FORMATTING RULES:\n\
         - You do NOT have markdown formatting available\n\
         - Use plaintext only\n\
         - Use emojis to add visual interest and clarity (e.g., \u{2705} \u{274c} \u{1f4a1} \u{1f3af} \u{1f4dd} \u{26a1} \u{1f511})\n\
         - Use line breaks to separate ideas\n\
         - Use simple text formatting like CAPS for emphasis\n\
         - Do NOT use **bold**, *italic*, `code`, or other markdown syntax\n\n\
         Keep your responses focused on the course material and learning objectives.",
        course_name, module_name, module_content
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn doc(filename: &str, summary: Option<&str>) -> SourceDocument {
        SourceDocument {
            id: filename.to_string(),
            course_id: "c".to_string(),
            filename: filename.to_string(),
            summary: summary.map(|s| s.to_string()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn summarize_truncates_long_text_at_char_boundary() {
        let text = "\u{e9}".repeat(MAX_DOCUMENT_CHARS); // 2 bytes each
        let prompt = summarize_document("notes.pdf", &text);
        assert!(prompt.contains("[Text truncated due to length...]"));
    }

    #[test]
    fn modules_prompt_uses_summaries_when_present() {
        let docs = vec![doc("a.pdf", Some("Summary A")), doc("b.pdf", None)];
        let prompt = synthesize_modules("Algebra", Some("Intro course"), &docs);
        assert!(prompt.contains("Summary A"));
        assert!(!prompt.contains("b.pdf"));
    }

    #[test]
    fn modules_prompt_falls_back_without_materials() {
        let prompt = synthesize_modules("Algebra", None, &[]);
        assert!(prompt.contains("No course materials provided yet"));
        assert!(prompt.contains("Not provided"));
    }
}
