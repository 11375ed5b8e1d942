//! Prompt templates for candidate explanations and requirement extraction.

/// System instruction for per-candidate rationales.
pub const EXPLAIN_SYSTEM: &str = "You are an expert technical recruiter. Compare the \
     candidate against the job description using only the provided CV excerpts. Be concise and \
     factual. Return ONLY a JSON object with the keys: \"summary\" (one or two sentences), \
     \"strengths\" (array of short strings), \"gaps\" (array of short strings), \
     \"skill_match_percent\" (integer 0-100).";

/// System instruction for job-requirement extraction.
pub const REQUIREMENTS_SYSTEM: &str =
    "You extract structured hiring requirements from job descriptions. Return ONLY valid JSON.";

/// Requirement keys and what the model should put in each.
pub const REQUIREMENT_KEYS: [(&str, &str); 5] = [
    (
        "skills",
        "comma separated technologies, programming languages, frameworks required or preferred \
         (e.g., React.js, Node.js, Python, Java, AWS, Docker)",
    ),
    (
        "years_experience",
        "how many years of total or relevant experience the candidate should have",
    ),
    (
        "location",
        "where the candidate is expected to work (e.g., Noida, Pune, Remote)",
    ),
    (
        "degree_level",
        "academic degrees or qualifications required (e.g., B.Tech, MBA, Masters)",
    ),
    (
        "employment_type",
        "type of employment (e.g., Permanent, Contractual, Full-time, Part-time)",
    ),
];

/// Build the user prompt for one candidate.
///
/// `excerpts` are `(source, text)` pairs, most relevant first.
pub fn explain_prompt(
    job_description: &str,
    candidate_id: &str,
    excerpts: &[(String, String)],
) -> String {
    let mut prompt = format!(
        "Job description:\n{job_description}\n\nCandidate: {candidate_id}\n"
    );
    prompt.push_str("Candidate context (top matches):\n");
    for (source, text) in excerpts {
        prompt.push_str(&format!("\nSource: {source}\n{text}\n"));
    }
    prompt.push_str("\nReturn the structured JSON summary.");
    prompt
}

/// Build the user prompt for requirement extraction.
pub fn requirements_prompt(job_description: &str) -> String {
    let mut prompt = String::from(
        "Extract the following parameters from the description below. \
         Return as JSON with each key and value. Description for each key:\n",
    );
    for (key, description) in REQUIREMENT_KEYS {
        prompt.push_str(&format!("- {key}: {description}\n"));
    }
    prompt.push_str(&format!(
        "\nJob Description:\n{job_description}\n\n\
         Return ONLY a valid JSON object with the extracted parameters. \
         If a parameter is not found, use an empty string."
    ));
    prompt
}
