//! Prompt templates for grounded and ungrounded answers

use crate::config::GenerationConfig;
use crate::types::Metadata;

/// Prompt builder carrying the company persona
pub struct PromptBuilder {
    company_name: String,
    services: Vec<String>,
}

impl PromptBuilder {
    pub fn new(config: &GenerationConfig) -> Self {
        Self {
            company_name: config.company_name.clone(),
            services: config.services.clone(),
        }
    }

    /// System prompt for answers grounded in retrieved passages
    pub fn rag_system_prompt(&self) -> String {
        format!(
            r#"You are an AI assistant for {company}, a comprehensive IT services company. Your role is to provide helpful, accurate, and professional responses based on the provided context from our knowledge base.

Guidelines:
1. Use the provided context to answer questions accurately and comprehensively
2. Format your responses in clear, well-structured paragraphs
3. Be professional and helpful in tone
4. If the context doesn't fully answer the question, acknowledge this and offer to connect them with an expert
5. Always aim to be helpful and solution-oriented
6. Use bullet points or numbered lists when appropriate for clarity
7. End with a question or offer additional assistance when relevant

Context will be provided with each query. Base your response primarily on this context while maintaining a natural conversational flow."#,
            company = self.company_name
        )
    }

    /// User prompt with the context block, optional conversation context and the question
    pub fn rag_user_prompt(&self, query: &str, context_text: &str, extra: &Metadata) -> String {
        let mut prompt = String::new();
        prompt.push_str("Context from knowledge base:\n---\n");
        prompt.push_str(context_text);
        prompt.push_str("\n---\n\n");
        push_additional_context(&mut prompt, extra);
        prompt.push_str(&format!("User question: {}\n\n", query));
        prompt.push_str(
            "Please provide a comprehensive response based on the context above. Format your response in clear paragraphs:\n",
        );
        prompt
    }

    /// System prompt used when nothing in the knowledge base matched
    pub fn fallback_system_prompt(&self) -> String {
        let services = self
            .services
            .iter()
            .map(|s| format!("- {}", s))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            r#"You are an AI assistant for {company}, a comprehensive IT services company.

Since specific information wasn't found in our knowledge base, provide a helpful general response that:
1. Acknowledges the question
2. Provides general information about our capabilities in that area
3. Offers to connect them with a specialist for detailed information
4. Maintains a professional and helpful tone
5. Formats the response in clear paragraphs

Company services include:
{services}"#,
            company = self.company_name,
            services = services
        )
    }

    pub fn fallback_user_prompt(&self, query: &str, extra: &Metadata) -> String {
        let mut prompt = String::new();
        push_additional_context(&mut prompt, extra);
        prompt.push_str(&format!("User question: {}\n\n", query));
        prompt.push_str(&format!(
            "Since this wasn't found in our specific knowledge base, provide a helpful general response about how {} might be able to assist with this topic. Format your response in clear paragraphs:\n",
            self.company_name
        ));
        prompt
    }
}

fn push_additional_context(prompt: &mut String, extra: &Metadata) {
    if extra.is_empty() {
        return;
    }
    prompt.push_str("Additional context:\n");
    for (key, value) in extra {
        prompt.push_str(&format!("{}: {}\n", key, value));
    }
    prompt.push('\n');
}
