// Prompt templates for each job type.
// Placeholders in `{braces}` are replaced before sending.
// Cross-cutting fragments live in llm_client::prompts.

/// System prompt for cover letters. Output is plain text, not JSON.
pub const COVER_LETTER_SYSTEM: &str =
    "You are an expert career coach who writes concise, tailored cover letters. \
    Respond with the letter text only. \
    Do NOT add a subject line, commentary, or placeholders in square brackets.";

pub const COVER_LETTER_PROMPT_TEMPLATE: &str = r#"Write a cover letter for the position below.

Position: {position}
Company: {company_name}
Applicant: {applicant_name}

{tone_guidance}

Job description:
{job_description}

Applicant background:
{resume_summary}

Keep it under 400 words, in three to four paragraphs.
{grounding}"#;

pub const CONTENT_OPTIMIZATION_PROMPT_TEMPLATE: &str = r#"Improve the following resume {section} content so it is concise, achievement-oriented and ATS-friendly.

Content:
{content}

Target job description (may be empty):
{job_description}

Return a JSON object with this EXACT schema:
{
  "optimized_content": "the rewritten content",
  "changes": ["short description of each change"],
  "keywords_added": ["keyword"]
}
{grounding}"#;

pub const RESUME_GENERATION_PROMPT_TEMPLATE: &str = r#"Generate resume content for the target role from the profile below.

Target role: {target_role}

Target job description (may be empty):
{job_description}

Profile (JSON):
{profile}

Return a JSON object with this EXACT schema:
{
  "summary": "two to three sentence professional summary",
  "experience": [
    {"company": "...", "role": "...", "bullets": ["..."]}
  ],
  "skills": ["..."]
}
{grounding}"#;

pub const ATS_ANALYSIS_PROMPT_TEMPLATE: &str = r#"Score how well the resume below would pass an applicant tracking system for the job description.

Resume:
{resume_text}

Job description:
{job_description}

Return a JSON object with this EXACT schema:
{
  "score": 0,
  "matched_keywords": ["..."],
  "missing_keywords": ["..."],
  "formatting_issues": ["..."],
  "suggestions": ["..."]
}
"score" is an integer from 0 to 100."#;
