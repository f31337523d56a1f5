/// Instruction block that opens every reasoning context.
pub const INITIAL_INSTRUCTION: &str = "You are a high-level reasoning system.\n\
You think step-by-step, remember experiences, and plan actions.\n\
Your job is to reason logically.\n";

/// Shown in the memory block when retrieval found nothing.
pub const NO_MEMORIES: &str = "(no prior memories)";

const REASONING_INSTRUCTION: &str = "[Provide reasoning regarding your current task in the form of a summary. \
Use the data available to you. Keep your summary short, you don't have much time. \
Don't include grammar and use small words, use as little characters as possible. \
Don't provide explanations. Don't extrapolate, use only the information you have given to come to a conclusion. \
End when completed, don't follow up with another section.]\n";

/// Assemble the full reasoning context from its sections.
pub fn compose(initial: &str, memories: &[String], summary: &str, sensors_json: &str) -> String {
    let memory = if memories.is_empty() {
        NO_MEMORIES.to_owned()
    } else {
        memories.join("\n")
    };
    format!(
        "=== INITIAL PROMPT ===\n{initial}\n\n\
         === MEMORY ===\n{memory}\n\n\
         === SHORT TERM CONTEXT ===\n{summary}\n\n\
         === SENSORS ===\n{sensors_json}\n\n\
         === REASONING ===\n{REASONING_INSTRUCTION}"
    )
}
