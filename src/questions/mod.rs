pub mod catalog;
pub mod manager;

pub use catalog::{
    DifficultyCounts, DifficultyLevel, LocalQuestionBank, QuestionBankStats, QuestionCatalog,
    QuestionData, QuestionRequest, QuestionResponse, QuestionSource,
};
pub use manager::{QuestionInfo, QuestionManager};
