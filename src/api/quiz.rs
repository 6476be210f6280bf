//! Quiz API used by the punishment phase and the free practice mode.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ApiClient, ApiConfig, RetryPolicy};
use crate::error::Result;

/// Retries the punishment phase makes on top of the regular retry.
const PUNISHMENT_FETCH_RETRIES: u32 = 3;
const PUNISHMENT_FETCH_DELAY: Duration = Duration::from_secs(1);

/// Question ids come back as numbers or strings depending on the question bank.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuestionId {
    Number(u64),
    Text(String),
}

impl fmt::Display for QuestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// A multiple-choice question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
}

impl Question {
    /// Options paired with their letters: `('A', first)`, `('B', second)`, ...
    pub fn lettered_options(&self) -> impl Iterator<Item = (char, &str)> + '_ {
        self.options
            .iter()
            .enumerate()
            .filter_map(|(i, option)| Some((answer_letter(i)?, option.as_str())))
    }
}

/// Outcome of drawing a random question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuizDraw {
    Question(Question),
    /// The player has answered every question in the bank.
    AllCompleted { message: Option<String> },
}

/// Verdict on a submitted answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerResult {
    pub is_correct: bool,
    /// Index of the right option.
    #[serde(default)]
    pub correct_answer: Option<usize>,
    #[serde(default)]
    pub explanation: Option<String>,
}

impl AnswerResult {
    /// Letter of the right option, if the server sent one.
    pub fn correct_letter(&self) -> Option<char> {
        self.correct_answer.and_then(answer_letter)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Submission<'a> {
    question_id: &'a QuestionId,
    answer: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    player_id: Option<&'a str>,
}

/// Letter shown for an option index: `0 → 'A'`. `None` past `'Z'`.
pub fn answer_letter(index: usize) -> Option<char> {
    let offset = u8::try_from(index).ok().filter(|i| *i < 26)?;
    Some(char::from(b'A' + offset))
}

/// HTTP client for `/quiz`.
#[derive(Debug, Clone)]
pub struct QuizClient {
    api: ApiClient,
    punishment_retry: RetryPolicy,
}

impl QuizClient {
    /// # Errors
    ///
    /// Returns [`SpyError::InvalidUrl`](crate::SpyError::InvalidUrl) for an
    /// unusable base URL, or an HTTP error if the client cannot be built.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(config)?,
            punishment_retry: RetryPolicy {
                max_retries: PUNISHMENT_FETCH_RETRIES,
                delay: PUNISHMENT_FETCH_DELAY,
            },
        })
    }

    /// Override the outer retry used by [`question_for_punishment`](Self::question_for_punishment).
    #[must_use]
    pub fn with_punishment_retry(mut self, retry: RetryPolicy) -> Self {
        self.punishment_retry = retry;
        self
    }

    /// Draw a random question. With a player id, questions that player has
    /// already answered are skipped and the bank can run out.
    ///
    /// # Errors
    ///
    /// Propagates the final HTTP or decoding error.
    pub async fn random_question(&self, player_id: Option<&str>) -> Result<QuizDraw> {
        let mut url = self.api.url(&["quiz", "random"])?;
        if let Some(player_id) = player_id {
            let millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or_default();
            url.query_pairs_mut()
                .append_pair("playerId", player_id)
                .append_pair("timestamp", &millis.to_string());
        }

        let body: serde_json::Value = self
            .api
            .fetch_json("draw quiz question", || self.api.http().get(url.clone()))
            .await?;
        parse_draw(body)
    }

    /// The punishment-phase fetch: [`random_question`](Self::random_question)
    /// retried on any error, three more times one second apart by default.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt.
    pub async fn question_for_punishment(&self, player_id: &str) -> Result<QuizDraw> {
        let max_retries = self.punishment_retry.max_retries;
        let mut retry = 0;
        loop {
            match self.random_question(Some(player_id)).await {
                Ok(draw) => return Ok(draw),
                Err(e) if retry < max_retries => {
                    retry += 1;
                    warn!(retry, max_retries, "fetching punishment question failed: {e}");
                    tokio::time::sleep(self.punishment_retry.delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Submit the index of the chosen option.
    ///
    /// # Errors
    ///
    /// Propagates the final HTTP or decoding error.
    pub async fn submit_answer(
        &self,
        question_id: &QuestionId,
        answer: usize,
        player_id: Option<&str>,
    ) -> Result<AnswerResult> {
        let url = self.api.url(&["quiz", "submit"])?;
        let body = Submission {
            question_id,
            answer,
            player_id,
        };
        let result: AnswerResult = self
            .api
            .fetch_json("submit quiz answer", || {
                self.api.http().post(url.clone()).json(&body)
            })
            .await?;
        debug!(%question_id, correct = result.is_correct, "answer judged");
        Ok(result)
    }
}

fn parse_draw(body: serde_json::Value) -> Result<QuizDraw> {
    let completed = body
        .get("allCompleted")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);
    if completed {
        let message = body
            .get("message")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned);
        return Ok(QuizDraw::AllCompleted { message });
    }
    Ok(QuizDraw::Question(serde_json::from_value(body)?))
}
