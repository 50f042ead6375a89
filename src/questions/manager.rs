use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::catalog::{DifficultyLevel, QuestionData, QuestionRequest, QuestionSource};

/// Used ids kept for exclusion before the history is trimmed
const MAX_USED_IDS: usize = 50;
/// Most recent ids kept after trimming
const TRIMMED_USED_IDS: usize = 25;

/// Topic assigned from outside the question bank
#[derive(Debug, Clone, PartialEq)]
struct ServerTopic {
    topic: String,
    prompts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionInfo {
    pub id: String,
    pub topic: String,
    pub description: String,
    pub difficulty: DifficultyLevel,
    pub category: String,
    pub tags: Vec<String>,
    pub estimated_time: u32,
    pub prompt_count: usize,
}

/// Current discussion topic and its prompts.
///
/// A server topic, when set, wins over the fetched question for both topic
/// text and prompts until `reset`.
pub struct QuestionManager {
    source: Arc<dyn QuestionSource>,
    current: Option<QuestionData>,
    server_topic: Option<ServerTopic>,
    used_ids: Vec<String>,
}

impl QuestionManager {
    pub fn new(source: Arc<dyn QuestionSource>) -> Self {
        Self {
            source,
            current: None,
            server_topic: None,
            used_ids: Vec::new(),
        }
    }

    /// Fetch a question not used recently. Keeps the current question if
    /// the bank has nothing left.
    pub async fn load_new_question(&mut self, difficulty: Option<DifficultyLevel>) -> Option<QuestionData> {
        let request = QuestionRequest {
            difficulty,
            category: None,
            exclude_ids: self.used_ids.clone(),
        };

        let response = self.source.random_question(&request).await;
        let question = match response.data {
            Some(question) if response.success => question,
            _ => {
                warn!(
                    "Failed to load question: {}",
                    response.message.as_deref().unwrap_or("no data")
                );
                return None;
            }
        };

        info!("Loaded question {}: {}", question.id, question.topic);

        self.used_ids.push(question.id.clone());
        if self.used_ids.len() > MAX_USED_IDS {
            let excess = self.used_ids.len() - TRIMMED_USED_IDS;
            self.used_ids.drain(..excess);
        }

        self.current = Some(question.clone());
        Some(question)
    }

    pub async fn load_question_by_level(&mut self, level: DifficultyLevel) -> Option<QuestionData> {
        self.load_new_question(Some(level)).await
    }

    pub fn set_server_topic(&mut self, topic: impl Into<String>, prompts: Vec<String>) {
        let topic = topic.into();
        info!("Server topic set: {} ({} prompts)", topic, prompts.len());
        self.server_topic = Some(ServerTopic { topic, prompts });
    }

    pub fn clear_server_topic(&mut self) {
        self.server_topic = None;
    }

    pub fn is_using_server_topic(&self) -> bool {
        self.server_topic.is_some()
    }

    pub fn current_question(&self) -> Option<&QuestionData> {
        self.current.as_ref()
    }

    pub fn get_current_topic(&self) -> &str {
        match (&self.server_topic, &self.current) {
            (Some(server), _) => &server.topic,
            (None, Some(question)) => &question.topic,
            (None, None) => "",
        }
    }

    pub fn get_current_description(&self) -> &str {
        self.current.as_ref().map_or("", |q| q.description.as_str())
    }

    pub fn get_current_prompts(&self) -> &[String] {
        match (&self.server_topic, &self.current) {
            (Some(server), _) => &server.prompts,
            (None, Some(question)) => &question.prompts,
            (None, None) => &[],
        }
    }

    /// Prompt at `index`, clamped into range; empty when there are no prompts
    pub fn get_prompt_by_index(&self, index: i64) -> &str {
        let prompts = self.get_current_prompts();
        if prompts.is_empty() {
            return "";
        }
        let last = prompts.len() as i64 - 1;
        &prompts[index.clamp(0, last) as usize]
    }

    /// Prompt after `current_index`, wrapping to the first
    pub fn get_next_prompt(&self, current_index: usize) -> (&str, usize) {
        let prompts = self.get_current_prompts();
        if prompts.is_empty() {
            return ("", 0);
        }
        let next = (current_index + 1) % prompts.len();
        (&prompts[next], next)
    }

    pub fn used_question_ids(&self) -> &[String] {
        &self.used_ids
    }

    pub fn clear_history(&mut self) {
        self.used_ids.clear();
    }

    /// Forget both the fetched question and any server topic
    pub fn reset(&mut self) {
        self.current = None;
        self.server_topic = None;
    }

    pub fn question_info(&self) -> Option<QuestionInfo> {
        self.current.as_ref().map(|q| QuestionInfo {
            id: q.id.clone(),
            topic: q.topic.clone(),
            description: q.description.clone(),
            difficulty: q.difficulty,
            category: q.category.clone(),
            tags: q.tags.clone(),
            estimated_time: q.estimated_time,
            prompt_count: q.prompts.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::questions::catalog::{LocalQuestionBank, QuestionCatalog};
    use crate::random::SequenceRandom;

    fn manager() -> QuestionManager {
        let bank = LocalQuestionBank::new(
            Arc::new(QuestionCatalog::builtin()),
            Box::new(SequenceRandom::constant(0.0)),
        );
        QuestionManager::new(Arc::new(bank))
    }

    #[tokio::test]
    async fn test_prompt_index_is_clamped() {
        let mut qm = manager();
        assert_eq!(qm.get_prompt_by_index(0), "");
        assert_eq!(qm.get_prompt_by_index(-3), "");

        qm.load_question_by_level(DifficultyLevel::Beginner).await.unwrap();
        let prompts = qm.get_current_prompts().to_vec();

        assert_eq!(qm.get_prompt_by_index(1), prompts[1]);
        assert_eq!(qm.get_prompt_by_index(-1), prompts[0]);
        assert_eq!(qm.get_prompt_by_index(999), prompts[prompts.len() - 1]);
    }

    #[tokio::test]
    async fn test_next_prompt_wraps() {
        let mut qm = manager();
        assert_eq!(qm.get_next_prompt(0), ("", 0));

        qm.load_new_question(None).await.unwrap();
        let first = qm.get_current_prompts()[0].clone();
        assert_eq!(qm.get_next_prompt(3), (first.as_str(), 0));
    }

    #[tokio::test]
    async fn test_server_topic_overrides_until_reset() {
        let mut qm = manager();
        qm.load_new_question(None).await.unwrap();
        qm.set_server_topic("服务器主题", vec!["服务器提示".to_string()]);

        qm.load_new_question(Some(DifficultyLevel::Advanced)).await.unwrap();
        assert_eq!(qm.get_current_topic(), "服务器主题");
        assert_eq!(qm.get_current_prompts(), ["服务器提示".to_string()]);
        assert!(qm.is_using_server_topic());

        qm.reset();
        assert_eq!(qm.get_current_topic(), "");
        assert!(qm.get_current_prompts().is_empty());
        assert!(qm.question_info().is_none());
        assert!(!qm.is_using_server_topic());
    }

    #[tokio::test]
    async fn test_used_ids_trimmed_to_most_recent() {
        let mut qm = manager();
        qm.used_ids = (0..50).map(|i| format!("old{}", i)).collect();

        let question = qm.load_new_question(None).await.unwrap();
        let used = qm.used_question_ids();
        assert_eq!(used.len(), TRIMMED_USED_IDS);
        assert_eq!(used.last(), Some(&question.id));
        assert_eq!(used.first().map(String::as_str), Some("old26"));
    }

    #[tokio::test]
    async fn test_question_info_counts_prompts() {
        let mut qm = manager();
        qm.load_question_by_level(DifficultyLevel::Advanced).await.unwrap();

        let info = qm.question_info().unwrap();
        assert_eq!(info.id, "q007");
        assert_eq!(info.prompt_count, 4);
        assert_eq!(info.estimated_time, 8);
    }
}
