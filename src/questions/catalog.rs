use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::random::RandomSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DifficultyLevel {
    #[serde(alias = "初级")]
    Beginner,
    #[serde(alias = "中级")]
    Intermediate,
    #[serde(alias = "高级")]
    Advanced,
}

impl DifficultyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DifficultyLevel::Beginner => "beginner",
            DifficultyLevel::Intermediate => "intermediate",
            DifficultyLevel::Advanced => "advanced",
        }
    }

    /// Label shown in the practice UI
    pub fn label(&self) -> &'static str {
        match self {
            DifficultyLevel::Beginner => "初级",
            DifficultyLevel::Intermediate => "中级",
            DifficultyLevel::Advanced => "高级",
        }
    }
}

impl fmt::Display for DifficultyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DifficultyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "beginner" | "初级" => Ok(DifficultyLevel::Beginner),
            "intermediate" | "中级" => Ok(DifficultyLevel::Intermediate),
            "advanced" | "高级" => Ok(DifficultyLevel::Advanced),
            other => Err(format!("unknown difficulty level: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionData {
    pub id: String,
    pub topic: String,
    pub description: String,
    pub prompts: Vec<String>,
    pub difficulty: DifficultyLevel,
    pub category: String,
    pub tags: Vec<String>,
    /// Suggested discussion length in minutes
    pub estimated_time: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRequest {
    pub difficulty: Option<DifficultyLevel>,
    pub category: Option<String>,
    #[serde(default)]
    pub exclude_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionResponse {
    pub success: bool,
    pub data: Option<QuestionData>,
    pub message: Option<String>,
}

impl QuestionResponse {
    fn found(question: QuestionData) -> Self {
        Self {
            success: true,
            data: Some(question),
            message: Some("Question retrieved successfully".to_string()),
        }
    }

    fn failed(message: &str) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DifficultyCounts {
    pub beginner: usize,
    pub intermediate: usize,
    pub advanced: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionBankStats {
    pub total: usize,
    pub by_difficulty: DifficultyCounts,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
}

/// Read-only question list with id lookup, built once and shared.
#[derive(Debug, Clone)]
pub struct QuestionCatalog {
    questions: Vec<QuestionData>,
    by_id: HashMap<String, usize>,
}

impl QuestionCatalog {
    pub fn new(questions: Vec<QuestionData>) -> Self {
        let by_id = questions
            .iter()
            .enumerate()
            .map(|(idx, q)| (q.id.clone(), idx))
            .collect();
        Self { questions, by_id }
    }

    pub fn builtin() -> Self {
        Self::new(builtin_questions())
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn questions(&self) -> &[QuestionData] {
        &self.questions
    }

    pub fn question_by_id(&self, id: &str) -> Option<&QuestionData> {
        self.by_id.get(id).map(|&idx| &self.questions[idx])
    }

    /// Candidates for a request: exclusions always apply; when nothing
    /// matches the difficulty/category filters those filters are dropped.
    pub fn candidates(&self, request: &QuestionRequest) -> Vec<&QuestionData> {
        let not_excluded = |q: &&QuestionData| !request.exclude_ids.iter().any(|id| id == &q.id);

        let filtered: Vec<&QuestionData> = self
            .questions
            .iter()
            .filter(not_excluded)
            .filter(|q| request.difficulty.map_or(true, |d| q.difficulty == d))
            .filter(|q| request.category.as_ref().map_or(true, |c| &q.category == c))
            .collect();

        if !filtered.is_empty() {
            return filtered;
        }

        debug!("No question matches {:?}; ignoring filters", request);
        self.questions.iter().filter(not_excluded).collect()
    }

    pub fn select(&self, request: &QuestionRequest, random: &mut dyn RandomSource) -> QuestionResponse {
        let candidates = self.candidates(request);
        if candidates.is_empty() {
            warn!("Question bank exhausted ({} excluded)", request.exclude_ids.len());
            return QuestionResponse::failed("No questions available");
        }

        let picked = candidates[random.next_index(candidates.len())].clone();
        debug!("Selected question {} ({})", picked.id, picked.difficulty);
        QuestionResponse::found(picked)
    }

    pub fn stats(&self) -> QuestionBankStats {
        let mut by_difficulty = DifficultyCounts::default();
        let mut categories: Vec<String> = Vec::new();
        let mut tags: Vec<String> = Vec::new();

        for q in &self.questions {
            match q.difficulty {
                DifficultyLevel::Beginner => by_difficulty.beginner += 1,
                DifficultyLevel::Intermediate => by_difficulty.intermediate += 1,
                DifficultyLevel::Advanced => by_difficulty.advanced += 1,
            }
            if !categories.contains(&q.category) {
                categories.push(q.category.clone());
            }
            for tag in &q.tags {
                if !tags.contains(tag) {
                    tags.push(tag.clone());
                }
            }
        }

        QuestionBankStats {
            total: self.questions.len(),
            by_difficulty,
            categories,
            tags,
        }
    }
}

/// Where the question manager gets its topics from
#[async_trait::async_trait]
pub trait QuestionSource: Send + Sync {
    async fn random_question(&self, request: &QuestionRequest) -> QuestionResponse;

    /// Up to `count` distinct questions
    async fn multiple_questions(&self, count: usize, request: &QuestionRequest) -> Vec<QuestionData> {
        let mut request = request.clone();
        let mut questions = Vec::new();

        for _ in 0..count {
            let response = self.random_question(&request).await;
            match response.data {
                Some(question) if response.success => {
                    request.exclude_ids.push(question.id.clone());
                    questions.push(question);
                }
                _ => break,
            }
        }

        questions
    }
}

/// In-process bank over a shared catalog
pub struct LocalQuestionBank {
    catalog: Arc<QuestionCatalog>,
    random: Mutex<Box<dyn RandomSource>>,
}

impl LocalQuestionBank {
    pub fn new(catalog: Arc<QuestionCatalog>, random: Box<dyn RandomSource>) -> Self {
        Self {
            catalog,
            random: Mutex::new(random),
        }
    }

    pub fn catalog(&self) -> &QuestionCatalog {
        &self.catalog
    }
}

#[async_trait::async_trait]
impl QuestionSource for LocalQuestionBank {
    async fn random_question(&self, request: &QuestionRequest) -> QuestionResponse {
        match self.random.lock() {
            Ok(mut random) => self.catalog.select(request, random.as_mut()),
            Err(_) => QuestionResponse::failed("Failed to retrieve question"),
        }
    }
}

fn question(
    id: &str,
    topic: &str,
    description: &str,
    prompts: [&str; 4],
    difficulty: DifficultyLevel,
    category: &str,
    tags: &[&str],
    estimated_time: u32,
) -> QuestionData {
    QuestionData {
        id: id.to_string(),
        topic: topic.to_string(),
        description: description.to_string(),
        prompts: prompts.iter().map(|p| p.to_string()).collect(),
        difficulty,
        category: category.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        estimated_time,
    }
}

fn builtin_questions() -> Vec<QuestionData> {
    use DifficultyLevel::*;

    vec![
        question(
            "q001",
            "My Daily Routine",
            "描述您的日常生活安排",
            [
                "What time do you usually wake up and why?",
                "What is your favorite part of the day?",
                "How do you spend your weekends?",
                "What would you change about your routine?",
            ],
            Beginner,
            "lifestyle",
            &["daily life", "habits", "time management"],
            3,
        ),
        question(
            "q002",
            "Food and Cooking",
            "谈论美食和烹饪",
            [
                "What is your favorite dish and why?",
                "Do you prefer cooking at home or eating out?",
                "Describe a traditional dish from your country.",
                "What cooking skills would you like to learn?",
            ],
            Beginner,
            "lifestyle",
            &["food", "cooking", "culture"],
            4,
        ),
        question(
            "q003",
            "Hobbies and Interests",
            "分享您的兴趣爱好",
            [
                "What hobbies do you enjoy in your free time?",
                "How did you become interested in these activities?",
                "What new hobby would you like to try?",
                "How do hobbies help you relax?",
            ],
            Beginner,
            "personal",
            &["hobbies", "leisure", "personal growth"],
            3,
        ),
        question(
            "q004",
            "Technology and Society",
            "科技对社会的影响",
            [
                "How has technology changed the way we communicate?",
                "What are the advantages and disadvantages of social media?",
                "Do you think we rely too much on technology?",
                "What technological advancement excites you most?",
            ],
            Intermediate,
            "society",
            &["technology", "social media", "communication"],
            5,
        ),
        question(
            "q005",
            "Education and Learning",
            "教育和学习方式的探讨",
            [
                "What do you think about online vs traditional education?",
                "How do you prefer to learn new skills?",
                "What role should technology play in education?",
                "How has your learning style changed over the years?",
            ],
            Intermediate,
            "education",
            &["education", "learning", "skills"],
            5,
        ),
        question(
            "q006",
            "Work-Life Balance",
            "工作与生活的平衡",
            [
                "How do you maintain work-life balance?",
                "What does a perfect work environment look like to you?",
                "How has remote work changed your perspective?",
                "What career advice would you give to young people?",
            ],
            Intermediate,
            "career",
            &["work", "career", "balance", "lifestyle"],
            6,
        ),
        question(
            "q007",
            "Climate Change and Environment",
            "气候变化与环境保护",
            [
                "What actions can individuals take to combat climate change?",
                "How should governments prioritize environmental policies?",
                "What role does innovation play in environmental solutions?",
                "How do you balance economic growth with environmental protection?",
            ],
            Advanced,
            "environment",
            &["climate change", "environment", "policy", "sustainability"],
            8,
        ),
        question(
            "q008",
            "Globalization and Cultural Identity",
            "全球化与文化认同",
            [
                "How does globalization affect local cultures?",
                "Can cultural diversity coexist with global unity?",
                "What aspects of your culture are most important to preserve?",
                "How do you see the future of cultural exchange?",
            ],
            Advanced,
            "culture",
            &["globalization", "culture", "identity", "diversity"],
            7,
        ),
        question(
            "q009",
            "Artificial Intelligence and Ethics",
            "人工智能与伦理道德",
            [
                "What ethical concerns do you have about AI development?",
                "How should society regulate AI technology?",
                "What jobs do you think AI will replace or create?",
                "How can we ensure AI benefits everyone equally?",
            ],
            Advanced,
            "technology",
            &["AI", "ethics", "society", "future"],
            8,
        ),
        question(
            "q010",
            "Mental Health and Wellbeing",
            "心理健康与幸福感",
            [
                "How do you maintain good mental health?",
                "What role does community support play in wellbeing?",
                "How has society's understanding of mental health changed?",
                "What strategies help you cope with stress?",
            ],
            Intermediate,
            "health",
            &["mental health", "wellbeing", "stress", "community"],
            6,
        ),
    ]
}
