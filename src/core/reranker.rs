use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

use crate::core::ranking::ScoredCandidate;
use crate::core::reasons::match_reasons;
use crate::models::{MatchResult, Order};
use crate::services::gate::Gate;
use crate::services::openai::ChatProvider;

/// Characters of tutor bio included in the prompt
pub const BIO_EXCERPT_CHARS: usize = 200;

const SYSTEM_PROMPT: &str = "You are an expert at matching students with tutors. \
Choose the best tutors for the student's order and explain each choice in one short sentence. \
Answer with a JSON array only, best tutor first: [{\"id\": <tutor id>, \"reason\": \"...\"}]";

#[derive(Debug, Deserialize)]
struct RerankPick {
    id: i64,
    #[serde(default)]
    reason: String,
}

/// Optional language-model pass over the top of the ranked list
#[derive(Clone)]
pub struct Reranker {
    chat: Arc<dyn ChatProvider>,
    gate: Gate,
    bio_excerpt_chars: usize,
}

impl Reranker {
    pub fn new(chat: Arc<dyn ChatProvider>, gate: Gate) -> Self {
        Self {
            chat,
            gate,
            bio_excerpt_chars: BIO_EXCERPT_CHARS,
        }
    }

    pub fn with_bio_excerpt_chars(mut self, chars: usize) -> Self {
        self.bio_excerpt_chars = chars;
        self
    }

    /// Ask the model to pick and explain the best `limit` candidates.
    ///
    /// Returns `None` on any failure; the caller keeps the ranker's order.
    pub async fn rerank(
        &self,
        order: &Order,
        candidates: &[ScoredCandidate],
        limit: usize,
    ) -> Option<Vec<MatchResult>> {
        if candidates.is_empty() || limit == 0 {
            return None;
        }

        let user_prompt = self.build_prompt(order, candidates, limit);
        let chat = Arc::clone(&self.chat);

        let content = match self
            .gate
            .call_with_retry("rerank", || {
                let chat = Arc::clone(&chat);
                let prompt = user_prompt.clone();
                async move { chat.complete(SYSTEM_PROMPT, &prompt).await }
            })
            .await
        {
            Ok(Some(content)) => content,
            Ok(None) => {
                tracing::warn!("Re-rank unavailable for order {}, keeping ranker order", order.id);
                return None;
            }
            Err(e) => {
                tracing::error!("Re-rank failed for order {}: {}", order.id, e);
                return None;
            }
        };

        let picks = match parse_picks(&content, candidates) {
            Ok(picks) => picks,
            Err(reason) => {
                tracing::warn!("Discarding re-rank response for order {}: {}", order.id, reason);
                return None;
            }
        };

        let results = picks
            .into_iter()
            .take(limit)
            .filter_map(|pick| {
                let candidate = candidates.iter().find(|c| c.tutor.id == pick.id)?;
                let mut reasons = Vec::new();
                let reason = pick.reason.trim();
                if !reason.is_empty() {
                    reasons.push(reason.to_string());
                }
                reasons.extend(match_reasons(order, &candidate.tutor));
                Some(MatchResult {
                    tutor: candidate.tutor.clone(),
                    score: candidate.score,
                    reasons,
                })
            })
            .collect();

        Some(results)
    }

    fn build_prompt(&self, order: &Order, candidates: &[ScoredCandidate], limit: usize) -> String {
        let format = match (order.format_online, order.format_offline) {
            (true, true) => "online or offline",
            (false, true) => "offline",
            _ => "online",
        };

        let tutors: Vec<_> = candidates
            .iter()
            .map(|c| {
                let t = &c.tutor;
                json!({
                    "id": t.id,
                    "name": t.name,
                    "bio": t.bio.chars().take(self.bio_excerpt_chars).collect::<String>(),
                    "experience_years": t.experience_years,
                    "hourly_rate": t.hourly_rate,
                    "rating": t.rating,
                    "subjects": t.subjects_display(),
                    "city": t.city,
                })
            })
            .collect();

        let payload = json!({
            "order": {
                "title": order.title,
                "description": order.description,
                "goal": order.goal_text,
                "subject": order.subject.name,
                "budget_min": order.budget_min,
                "budget_max": order.budget_max,
                "format": format,
                "city": order.city,
            },
            "tutors": tutors,
            "pick": limit,
        });

        format!(
            "Pick the {} best tutors for this order.\n{}",
            limit,
            serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string())
        )
    }
}

/// Strip an optional markdown code fence around the model output
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop the language tag line
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    body.trim_end().trim_end_matches("```").trim()
}

fn parse_picks(content: &str, candidates: &[ScoredCandidate]) -> Result<Vec<RerankPick>, String> {
    let picks: Vec<RerankPick> =
        serde_json::from_str(strip_code_fence(content)).map_err(|e| format!("invalid JSON: {}", e))?;

    if picks.is_empty() {
        return Err("empty selection".to_string());
    }

    let known: HashSet<i64> = candidates.iter().map(|c| c.tutor.id).collect();
    let mut seen = HashSet::new();
    for pick in &picks {
        if !known.contains(&pick.id) {
            return Err(format!("unknown tutor id {}", pick.id));
        }
        if !seen.insert(pick.id) {
            return Err(format!("duplicate tutor id {}", pick.id));
        }
    }

    Ok(picks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::features::extract_features;
    use crate::models::{SubjectRef, TutorCandidate};
    use crate::services::gate::{ProviderError, RetryPolicy};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct ScriptedChat {
        reply: Result<String, ProviderError>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedChat {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self { reply: Ok(reply.to_string()), prompts: Mutex::new(vec![]) })
        }

        fn failing(err: ProviderError) -> Arc<Self> {
            Arc::new(Self { reply: Err(err), prompts: Mutex::new(vec![]) })
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedChat {
        async fn complete(&self, _system_prompt: &str, user_prompt: &str) -> Result<String, ProviderError> {
            self.prompts.lock().unwrap().push(user_prompt.to_string());
            self.reply.clone()
        }
    }

    fn gate() -> Gate {
        Gate::new(RetryPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            call_timeout: Duration::from_millis(200),
        })
    }

    fn order() -> Order {
        Order {
            id: 3,
            student_id: 1,
            subject: SubjectRef { id: 1, name: "Chemistry".to_string() },
            title: "Organic chemistry".to_string(),
            description: String::new(),
            goal_text: "Pass the final exam".to_string(),
            budget_min: 0.0,
            budget_max: 2000.0,
            format_online: true,
            format_offline: false,
            city: String::new(),
            region: String::new(),
            schedule: None,
        }
    }

    fn candidates(n: i64) -> Vec<ScoredCandidate> {
        (1..=n)
            .map(|id| {
                let tutor = TutorCandidate {
                    id,
                    name: format!("Tutor {}", id),
                    bio: "b".repeat(500),
                    hourly_rate: 1000.0,
                    rating: 4.0,
                    rating_count: 5,
                    experience_years: 2,
                    city: String::new(),
                    region: String::new(),
                    is_verified: true,
                    is_active: true,
                    embedding: None,
                    subjects: vec![SubjectRef { id: 1, name: "Chemistry".to_string() }],
                    availability: None,
                };
                let features = extract_features(&order(), &tutor, None);
                ScoredCandidate { tutor, features, score: 1.0 - id as f64 * 0.1 }
            })
            .collect()
    }

    #[tokio::test]
    async fn test_rerank_reorders_and_explains() {
        let chat = ScriptedChat::replying(r#"[{"id": 3, "reason": "Strong exam track record"}, {"id": 1, "reason": "Affordable"}]"#);
        let reranker = Reranker::new(chat.clone(), gate());

        let results = reranker.rerank(&order(), &candidates(4), 2).await.unwrap();

        let ids: Vec<i64> = results.iter().map(|r| r.tutor.id).collect();
        assert_eq!(ids, vec![3, 1]);
        assert_eq!(results[0].reasons[0], "Strong exam track record");
        assert!((results[0].score - 0.7).abs() < 1e-9);

        let prompt = chat.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains(&"b".repeat(BIO_EXCERPT_CHARS)));
        assert!(!prompt.contains(&"b".repeat(BIO_EXCERPT_CHARS + 1)));
    }

    #[tokio::test]
    async fn test_fenced_response_accepted() {
        let chat = ScriptedChat::replying("```json\n[{\"id\": 2, \"reason\": \"ok\"}]\n```");
        let results = Reranker::new(chat, gate()).rerank(&order(), &candidates(3), 1).await.unwrap();
        assert_eq!(results[0].tutor.id, 2);
    }

    #[tokio::test]
    async fn test_longer_selection_truncated_to_limit() {
        let chat = ScriptedChat::replying(r#"[{"id": 2}, {"id": 1}, {"id": 3}]"#);
        let results = Reranker::new(chat, gate()).rerank(&order(), &candidates(3), 2).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_responses_rejected() {
        for reply in [
            "not json",
            "[]",
            r#"[{"id": 99, "reason": "unknown"}]"#,
            r#"[{"id": 1, "reason": "a"}, {"id": 1, "reason": "b"}]"#,
        ] {
            let reranker = Reranker::new(ScriptedChat::replying(reply), gate());
            assert!(reranker.rerank(&order(), &candidates(3), 2).await.is_none(), "{}", reply);
        }
    }

    #[tokio::test]
    async fn test_provider_failure_yields_none() {
        let retryable = Reranker::new(ScriptedChat::failing(ProviderError::RateLimited), gate());
        assert!(retryable.rerank(&order(), &candidates(3), 2).await.is_none());

        let fatal = Reranker::new(ScriptedChat::failing(ProviderError::Unauthorized("bad key".into())), gate());
        assert!(fatal.rerank(&order(), &candidates(3), 2).await.is_none());
    }
}
