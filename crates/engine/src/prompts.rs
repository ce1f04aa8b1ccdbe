//! Prompt styles the bandit chooses between, one per arm.

/// A named prompt style. `{}` marks where the user's request lands.
#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub name: &'static str,
    pub pattern: &'static str,
}

pub static TEMPLATES: [PromptTemplate; 4] = [
    PromptTemplate {
        name: "basic",
        pattern: "Generate basic code for: {}",
    },
    PromptTemplate {
        name: "structured",
        pattern: "Generate structured code with functions and error handling for: {}",
    },
    PromptTemplate {
        name: "commented",
        pattern: "Generate code for: {} and add detailed comments for clarity",
    },
    PromptTemplate {
        name: "optimized",
        pattern: "Generate optimized code for: {}",
    },
];
