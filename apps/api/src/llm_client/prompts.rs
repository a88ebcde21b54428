// Shared prompt fragments.
// Each job type defines its own prompt templates in jobs/prompts.rs;
// this file holds the cross-cutting pieces.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Common instruction appended to every prompt that rewrites user content.
pub const GROUNDING_INSTRUCTION: &str = "\
    CRITICAL: Only use facts present in the material provided. \
    Do NOT invent employers, dates, metrics, degrees or certifications. \
    If the material does not support a claim, leave it out.";
