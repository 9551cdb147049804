//! Prompt text and response schema sent with every request.

use chunkline_protocol::Segment;
use serde::Serialize;
use serde_json::{Value, json};

pub const TRANSLATE_SYSTEM_PROMPT: &str = "\
You are a subtitle translator and localizer.
1. Translate meaning and intent, not word order. Use natural phrasing a native viewer would expect.
2. Keep one output item per input item. Never merge, split, drop or reorder items.
3. Copy every \"id\" and \"start\" value exactly as given.
4. Keep names, brands and technical terms consistent across the whole transcript.
5. Keep lines short enough to read at subtitle pace.
6. Output only the JSON array described by the schema.";

pub const REFINE_SYSTEM_PROMPT: &str = "\
You are a subtitle resegmenter.
1. You receive timed source segments and one continuous draft translation.
2. Slice the draft so each piece lines up with the meaning of one source segment.
3. Reuse every source \"id\" and \"start\" value. Never invent or shift timings.
4. Do not rewrite the draft beyond trimming and light punctuation.
5. Output only the JSON array described by the schema.";

#[derive(Debug, Serialize)]
struct PromptSegment<'a> {
    id: String,
    start: &'a str,
    text: &'a str,
}

fn prompt_segments<'a>(
    segments: &'a [Segment],
    id_for: impl Fn(usize) -> String,
) -> Vec<PromptSegment<'a>> {
    segments
        .iter()
        .enumerate()
        .map(|(index, segment)| PromptSegment {
            id: id_for(index),
            start: segment.start.as_str(),
            text: &segment.text,
        })
        .collect()
}

fn context_instruction(context: &str) -> String {
    if context.trim().is_empty() {
        return String::new();
    }
    format!(
        "\n\n[Previous Context (Translation Style Guide)]:\n\"{context}\"\n\
         Use the context above for consistency in tone and terminology. \
         Translate ONLY the current input below."
    )
}

/// User turn for one chunk. Chunk numbers are shown 1-based.
pub fn translate_prompt(
    chunk_index: usize,
    total_chunks: usize,
    segments: &[Segment],
    context: &str,
    target_lang: &str,
) -> String {
    let items = prompt_segments(segments, |index| format!("{chunk_index}_{index}"));
    let body = serde_json::to_string(&items).unwrap_or_else(|_| "[]".to_owned());
    format!(
        "[Chunk {}/{}]\n{}{}\n\nTranslate into \"{}\". Return valid JSON matching the schema, \
         using ONLY original \"id\" and \"start\" values from the input.",
        chunk_index + 1,
        total_chunks,
        body,
        context_instruction(context),
        target_lang
    )
}

pub fn refine_prompt(original: &[Segment], draft_text: &str) -> String {
    let items = prompt_segments(original, |index| index.to_string());
    let body = serde_json::to_string(&items).unwrap_or_else(|_| "[]".to_owned());
    format!(
        "[Original Segments]:\n{body}\n\n[Draft Translation]:\n\"{draft_text}\"\n\n\
         Slice the \"Draft Translation\" to fit the \"Original Segments\". Return valid JSON \
         matching the schema, strictly reusing original \"id\" and \"start\" values. \
         DO NOT invent new timings."
    )
}

/// JSON schema for the response: an array of `{id, start, text}`.
pub fn segment_array_schema() -> Value {
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": {
                "id": { "type": "string" },
                "start": { "type": "string" },
                "text": { "type": "string" }
            },
            "required": ["id", "start", "text"]
        }
    })
}
