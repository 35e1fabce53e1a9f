use council_core::{CouncilResult, OrchestrationError};

/// Prompt length bounds, counted in characters.
pub const MIN_PROMPT_CHARS: usize = 1;
pub const MAX_PROMPT_CHARS: usize = 5000;

/// Hard cap on history page size.
pub const MAX_PAGE_SIZE: usize = 20;

/// Validate a raw prompt before it enters the pipeline.
pub fn validate_prompt(prompt: &str) -> CouncilResult<()> {
    let chars = prompt.chars().count();
    if chars < MIN_PROMPT_CHARS || prompt.trim().is_empty() {
        return Err(OrchestrationError::InvalidInput(
            "prompt must not be empty".to_string(),
        ));
    }
    if chars > MAX_PROMPT_CHARS {
        return Err(OrchestrationError::InvalidInput(format!(
            "prompt is {chars} characters, maximum is {MAX_PROMPT_CHARS}"
        )));
    }
    Ok(())
}

/// Clamp a requested history page size into the allowed range.
pub fn clamp_page_size(requested: usize) -> usize {
    requested.clamp(1, MAX_PAGE_SIZE)
}
