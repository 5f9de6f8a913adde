//! Industry research question generation.
//!
//! Produces a set of categorized, entrepreneur-oriented research questions
//! for an industry. Results are cached through an injected
//! [`QuestionStore`] keyed by the normalized industry name. When the model
//! service is missing or its reply is unusable, a fixed fallback set is
//! returned instead (and not cached, so a later call can still succeed).

use crate::brain::LlmProvider;
use crate::config::{QuestionConfig, RetryConfig};
use crate::error::LlmError;
use crate::providers::with_retry;
use crate::types::{CompletionRequest, Message, ResponseFormat};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

const SYSTEM_PROMPT: &str = "You are an expert market research consultant specializing in startup and entrepreneurial questions. \
Generate highly valuable, actionable research questions that entrepreneurs would actually want to know \
when building businesses in various industries.";

const DEFAULT_ESTIMATED_VALUE: &str = "Strategic insight for business planning";

/// Built-in context for well-known industries, keyed by normalized name.
const INDUSTRY_DESCRIPTIONS: &[(&str, &str)] = &[
    ("saas", "Software as a Service companies providing cloud-based business software solutions"),
    ("fintech", "Financial technology companies innovating in payments, lending, insurance, and wealth management"),
    ("healthcare", "Healthcare technology and services companies improving patient care and medical processes"),
    ("ecommerce", "Online retail and marketplace platforms connecting buyers and sellers"),
    ("edtech", "Education technology companies providing learning platforms and educational tools"),
    ("real-estate", "Real estate technology companies modernizing property transactions and management"),
    ("automotive", "Automotive technology companies working on electric vehicles, autonomous driving, and mobility"),
    ("content-creation", "Companies providing tools and platforms for content creators and digital media"),
    ("foodtech", "Food technology companies innovating in food production, delivery, and sustainability"),
    ("cleantech", "Clean technology companies working on renewable energy and environmental solutions"),
    ("gaming", "Gaming companies and platforms for entertainment and esports"),
    ("hr-tech", "Human resources technology companies improving talent acquisition and management"),
    ("proptech", "Property technology companies modernizing real estate and construction"),
    ("agritech", "Agriculture technology companies improving farming efficiency and sustainability"),
    ("legaltech", "Legal technology companies modernizing legal services and compliance"),
    ("insurtech", "Insurance technology companies innovating in insurance products and processes"),
    ("marketplace", "Marketplace platforms connecting different types of buyers and sellers"),
    ("cybersecurity", "Cybersecurity companies protecting digital assets and infrastructure"),
    ("blockchain", "Blockchain and cryptocurrency companies building decentralized solutions"),
    ("traveltech", "Travel technology companies improving booking, planning, and experiences"),
    ("logistics", "Logistics and supply chain technology companies optimizing transportation"),
    ("retailtech", "Retail technology companies enhancing in-store and online shopping"),
    ("martech", "Marketing technology companies improving customer acquisition and retention"),
    ("biotech", "Biotechnology companies developing medical and agricultural innovations"),
    ("spacetech", "Space technology companies working on satellite and space exploration"),
    ("robotics", "Robotics and automation companies building intelligent machines"),
    ("iot", "Internet of Things companies connecting physical devices to digital networks"),
    ("ai-ml", "Artificial Intelligence and Machine Learning companies developing intelligent systems"),
    ("vr-ar", "Virtual and Augmented Reality companies creating immersive experiences"),
    ("energy", "Energy technology companies working on power generation and distribution"),
    ("construction", "Construction technology companies modernizing building processes"),
    ("fashion", "Fashion technology companies innovating in apparel and lifestyle"),
    ("sports", "Sports technology companies enhancing athletic performance and fan experiences"),
    ("media", "Media technology companies transforming content creation and distribution"),
    ("telecom", "Telecommunications companies building communication infrastructure"),
    ("transportation", "Transportation technology companies improving mobility solutions"),
    ("real-estate-tech", "Real estate technology companies enhancing property transactions"),
    ("pharma", "Pharmaceutical technology companies developing new medicines"),
    ("banking", "Banking technology companies modernizing financial services"),
    ("insurance-tech", "Insurance technology companies innovating risk management"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionCategory {
    MarketSize,
    Competition,
    Trends,
    Challenges,
    Opportunities,
    Strategy,
    Monetization,
    Regulatory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndustryQuestion {
    pub id: String,
    pub text: String,
    pub category: QuestionCategory,
    pub estimated_value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationMetadata {
    pub model: String,
    pub temperature: f32,
    pub total_tokens: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndustryQuestions {
    pub industry: String,
    pub questions: Vec<IndustryQuestion>,
    pub generated_at: DateTime<Utc>,
    pub metadata: GenerationMetadata,
}

impl IndustryQuestions {
    pub fn is_fallback(&self) -> bool {
        self.metadata.model == "fallback"
    }
}

/// Cache of generated question sets.
pub trait QuestionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<IndustryQuestions>;
    fn put(&self, key: &str, questions: IndustryQuestions);
    fn clear(&self);
}

#[derive(Default)]
pub struct InMemoryQuestionStore {
    entries: RwLock<HashMap<String, IndustryQuestions>>,
}

impl InMemoryQuestionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl QuestionStore for InMemoryQuestionStore {
    fn get(&self, key: &str) -> Option<IndustryQuestions> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn put(&self, key: &str, questions: IndustryQuestions) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), questions);
    }

    fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Cache key and id prefix: lowercase, whitespace runs replaced by `-`.
pub fn normalize_industry(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase()
}

/// Built-in description for `industry`, or a generic one.
pub fn industry_description(industry: &str) -> String {
    let key = normalize_industry(industry);
    INDUSTRY_DESCRIPTIONS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, description)| description.to_string())
        .unwrap_or_else(|| format!("{industry} companies providing innovative solutions and services"))
}

#[derive(Debug, Deserialize)]
struct GeneratedReply {
    questions: Vec<GeneratedQuestion>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeneratedQuestion {
    text: String,
    #[serde(default)]
    category: Option<QuestionCategory>,
    #[serde(default)]
    estimated_value: Option<String>,
}

pub struct QuestionGenerator {
    provider: Option<Arc<dyn LlmProvider>>,
    config: QuestionConfig,
    retry: RetryConfig,
    store: Arc<dyn QuestionStore>,
}

impl QuestionGenerator {
    /// `provider` is `None` when no model service is configured; every
    /// request then returns the fallback set.
    pub fn new(
        provider: Option<Arc<dyn LlmProvider>>,
        config: QuestionConfig,
        retry: RetryConfig,
        store: Arc<dyn QuestionStore>,
    ) -> Self {
        let retry = retry.with_max_retries(config.max_retries);
        Self {
            provider,
            config,
            retry,
            store,
        }
    }

    /// Generate a fresh question set, bypassing the cache.
    pub async fn generate(&self, industry: &str, description: Option<&str>) -> IndustryQuestions {
        let Some(provider) = &self.provider else {
            warn!(industry, "No model service configured, using fallback questions");
            return fallback_questions(industry);
        };

        match self.request(provider.as_ref(), industry, description).await {
            Ok(questions) => {
                info!(
                    industry,
                    count = questions.questions.len(),
                    tokens = questions.metadata.total_tokens,
                    "Industry questions generated"
                );
                questions
            }
            Err(e) => {
                warn!(industry, error = %e, "Question generation failed, using fallback questions");
                fallback_questions(industry)
            }
        }
    }

    /// Cached question set for `industry`, generating it on a miss or when
    /// `use_cache` is false. Fallback sets are never cached.
    pub async fn get_or_generate(
        &self,
        industry: &str,
        description: Option<&str>,
        use_cache: bool,
    ) -> IndustryQuestions {
        let key = normalize_industry(industry);
        if use_cache && let Some(cached) = self.store.get(&key) {
            debug!(key, "Question cache hit");
            return cached;
        }

        let questions = self.generate(industry, description).await;
        if !questions.is_fallback() {
            self.store.put(&key, questions.clone());
        }
        questions
    }

    pub fn clear_cache(&self) {
        self.store.clear();
        debug!("Question cache cleared");
    }

    async fn request(
        &self,
        provider: &dyn LlmProvider,
        industry: &str,
        description: Option<&str>,
    ) -> Result<IndustryQuestions, LlmError> {
        let request = CompletionRequest {
            messages: vec![
                Message::system(SYSTEM_PROMPT),
                Message::user(build_prompt(industry, description, self.config.question_count)),
            ],
            temperature: self.config.temperature,
            max_tokens: Some(self.config.max_tokens),
            model: Some(self.config.model.clone()),
            response_format: ResponseFormat::JsonObject,
        };

        let response = with_retry(&self.retry, || provider.complete(request.clone())).await?;
        let reply: GeneratedReply = crate::brain::parse_json_reply(&response.text)?;
        let questions = process_reply(reply, industry, self.config.question_count)?;

        Ok(IndustryQuestions {
            industry: industry.to_string(),
            questions,
            generated_at: Utc::now(),
            metadata: GenerationMetadata {
                model: self.config.model.clone(),
                temperature: self.config.temperature,
                total_tokens: response.usage.total(),
            },
        })
    }
}

fn build_prompt(industry: &str, description: Option<&str>, count: usize) -> String {
    let context = description
        .map(str::to_string)
        .unwrap_or_else(|| industry_description(industry));
    format!(
        "Generate {count} high-value research questions for entrepreneurs in the {industry} industry.

Industry Context: {context}

Requirements:
1. Questions should be strategic and actionable for startup founders
2. Focus on market opportunities, competitive advantages, and growth potential
3. Include questions about market size, competition, trends, challenges, and opportunities
4. Make questions specific and measurable where possible
5. Cover different aspects: TAM/SAM/SOM, competition, monetization, regulatory, technology, customer acquisition

Return a JSON object with this exact structure:
{{
  \"questions\": [
    {{
      \"text\": \"Question text here\",
      \"category\": \"market-size|competition|trends|challenges|opportunities|strategy|monetization|regulatory\",
      \"estimatedValue\": \"Brief explanation of why this question is valuable\"
    }}
  ]
}}

Ensure questions are:
- Specific to {industry}
- Valuable for decision-making
- Measurable or answerable through research
- Strategic in nature
- Not generic or obvious"
    )
}

fn process_reply(
    reply: GeneratedReply,
    industry: &str,
    count: usize,
) -> Result<Vec<IndustryQuestion>, LlmError> {
    let key = normalize_industry(industry);
    let questions: Vec<IndustryQuestion> = reply
        .questions
        .into_iter()
        .filter(|q| !q.text.trim().is_empty())
        .take(count)
        .enumerate()
        .map(|(i, q)| IndustryQuestion {
            id: format!("{key}-q{}", i + 1),
            text: q.text.trim().to_string(),
            category: q.category.unwrap_or(QuestionCategory::Strategy),
            estimated_value: q
                .estimated_value
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_ESTIMATED_VALUE.to_string()),
        })
        .collect();

    if questions.is_empty() {
        return Err(LlmError::ResponseParse {
            message: "reply contained no questions".to_string(),
        });
    }
    Ok(questions)
}

/// The static question set used when generation is impossible.
pub fn fallback_questions(industry: &str) -> IndustryQuestions {
    let key = normalize_industry(industry);
    let name = industry.to_lowercase();
    let templates = [
        (
            format!("What is the current market size and growth potential for {name}?"),
            QuestionCategory::MarketSize,
            "Understanding market opportunity and scalability",
        ),
        (
            format!("Who are the main competitors in the {name} space and what are their strengths?"),
            QuestionCategory::Competition,
            "Competitive analysis for positioning",
        ),
        (
            format!("What are the biggest challenges facing {name} companies today?"),
            QuestionCategory::Challenges,
            "Risk assessment and problem identification",
        ),
        (
            format!("What emerging trends are shaping the future of {name}?"),
            QuestionCategory::Trends,
            "Future planning and innovation opportunities",
        ),
        (
            format!("What are the most promising opportunities in {name} for new entrants?"),
            QuestionCategory::Opportunities,
            "Market entry strategy and growth potential",
        ),
        (
            format!("How do successful {name} companies typically monetize their offerings?"),
            QuestionCategory::Monetization,
            "Revenue model analysis and optimization",
        ),
        (
            format!("What regulatory challenges affect {name} businesses?"),
            QuestionCategory::Regulatory,
            "Compliance planning and risk management",
        ),
        (
            format!("What strategic decisions should {name} startups prioritize in their first 2 years?"),
            QuestionCategory::Strategy,
            "Strategic planning and prioritization",
        ),
    ];

    IndustryQuestions {
        industry: industry.to_string(),
        questions: templates
            .into_iter()
            .enumerate()
            .map(|(i, (text, category, value))| IndustryQuestion {
                id: format!("{key}-fallback-{}", i + 1),
                text,
                category,
                estimated_value: value.to_string(),
            })
            .collect(),
        generated_at: Utc::now(),
        metadata: GenerationMetadata {
            model: "fallback".to_string(),
            temperature: 0.0,
            total_tokens: 0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::{MockFailure, MockLlmProvider};

    const REPLY: &str = r#"{"questions": [
        {"text": "How large is the SMB payroll market?", "category": "market-size", "estimatedValue": "Sizing"},
        {"text": "Which incumbents dominate payroll?", "category": "competition"},
        {"text": "What pricing models work?"}
    ]}"#;

    fn generator(mock: Arc<MockLlmProvider>) -> (QuestionGenerator, Arc<InMemoryQuestionStore>) {
        let store = Arc::new(InMemoryQuestionStore::new());
        let retry = RetryConfig {
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            jitter: false,
            ..Default::default()
        };
        let generator =
            QuestionGenerator::new(Some(mock), QuestionConfig::default(), retry, store.clone());
        (generator, store)
    }

    #[test]
    fn test_normalize_industry() {
        assert_eq!(normalize_industry("Real   Estate"), "real-estate");
        assert_eq!(normalize_industry(" SaaS "), "saas");
    }

    #[test]
    fn test_industry_description() {
        assert_eq!(INDUSTRY_DESCRIPTIONS.len(), 40);
        assert!(industry_description("Real Estate").starts_with("Real estate technology"));
        assert_eq!(
            industry_description("Pet Care"),
            "Pet Care companies providing innovative solutions and services"
        );
    }

    #[test]
    fn test_fallback_set() {
        let set = fallback_questions("Pet Care");
        assert_eq!(set.questions.len(), 8);
        assert!(set.is_fallback());
        assert_eq!(set.metadata.total_tokens, 0);
        assert_eq!(set.questions[0].id, "pet-care-fallback-1");
        assert_eq!(
            set.questions[0].text,
            "What is the current market size and growth potential for pet care?"
        );
        assert_eq!(set.questions[7].category, QuestionCategory::Strategy);
    }

    #[tokio::test]
    async fn test_generate_from_model() {
        let mock = Arc::new(MockLlmProvider::with_response(REPLY));
        let (generator, _) = generator(mock.clone());
        let set = generator.generate("HR Tech", None).await;

        assert!(!set.is_fallback());
        assert_eq!(set.questions.len(), 3);
        assert_eq!(set.questions[0].id, "hr-tech-q1");
        assert_eq!(set.questions[0].category, QuestionCategory::MarketSize);
        assert_eq!(set.questions[1].estimated_value, DEFAULT_ESTIMATED_VALUE);
        assert_eq!(set.questions[2].category, QuestionCategory::Strategy);
        assert_eq!(set.metadata.model, "gpt-4o-mini");
        assert_eq!(set.metadata.total_tokens, 150);

        let request = &mock.calls()[0];
        assert_eq!(request.response_format, ResponseFormat::JsonObject);
        assert_eq!(request.temperature, 0.7);
        assert!(request.messages[1].content.contains("Human resources technology"));
    }

    #[tokio::test]
    async fn test_unknown_category_falls_back() {
        let mock = Arc::new(MockLlmProvider::with_response(
            r#"{"questions": [{"text": "Q?", "category": "astrology"}]}"#,
        ));
        let (generator, _) = generator(mock);
        assert!(generator.generate("SaaS", None).await.is_fallback());
    }

    #[tokio::test]
    async fn test_unavailable_model_falls_back_after_retries() {
        let mock = Arc::new(MockLlmProvider::new().fail_on("", MockFailure::Unavailable));
        let (generator, store) = generator(mock.clone());
        let set = generator.get_or_generate("SaaS", None, true).await;
        assert!(set.is_fallback());
        // One attempt plus two retries.
        assert_eq!(mock.calls().len(), 3);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_no_provider_uses_fallback() {
        let generator = QuestionGenerator::new(
            None,
            QuestionConfig::default(),
            RetryConfig::default(),
            Arc::new(InMemoryQuestionStore::new()),
        );
        assert!(generator.generate("Gaming", None).await.is_fallback());
    }

    #[tokio::test]
    async fn test_cache_hit_bypass_and_clear() {
        let mock = Arc::new(MockLlmProvider::with_response(REPLY));
        let (generator, store) = generator(mock.clone());

        let first = generator.get_or_generate("Fin Tech", None, true).await;
        let second = generator.get_or_generate("fin   tech", None, true).await;
        assert_eq!(first, second);
        assert_eq!(mock.calls().len(), 1);
        assert_eq!(store.len(), 1);

        generator.get_or_generate("Fin Tech", None, false).await;
        assert_eq!(mock.calls().len(), 2);

        generator.clear_cache();
        assert!(store.is_empty());
        generator.get_or_generate("Fin Tech", None, true).await;
        assert_eq!(mock.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_explicit_description_is_used() {
        let mock = Arc::new(MockLlmProvider::with_response(REPLY));
        let (generator, _) = generator(mock.clone());
        generator
            .generate("Widgets", Some("Makers of very small widgets"))
            .await;
        assert_eq!(mock.calls_matching("Makers of very small widgets"), 1);
    }
}
