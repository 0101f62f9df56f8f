//! Context Store: a bounded per-session message log, a
//! lightweight entity/relationship graph, and hash-based pseudo-embedding
//! retrieval.
//!
//! Embedding + cosine similarity uses a hash-bucket-then-sin() construction,
//! the same approach applied here to a 384-dim conversational embedding
//! instead of a cache key. Per-session locking (one `RwLock` per session,
//! one table-level lock for session lookup) replaces a single global
//! per-request lock. Cyclic context/graph/entity/relationship references
//! are flattened into two flat maps keyed by a stable string id rather
//! than parent pointers.

use crate::clock::Clock;
use crate::models::MessageRole;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

const EMBEDDING_DIM: usize = 384;
const RETRIEVAL_LIMIT: usize = 20;
const RETRIEVAL_THRESHOLD: f32 = 0.7;
const RELEVANCE_WEIGHT: f32 = 0.7;
const RECENCY_WEIGHT: f32 = 0.3;
const DEFAULT_RETRIEVAL_WINDOW: Duration = Duration::from_secs(3600);
const RELATIONSHIP_PROXIMITY_CHARS: usize = 100;
const RELATIONSHIP_STRENGTH_STEP: f32 = 0.1;
const RELATIONSHIP_STRENGTH_CAP: f32 = 1.0;

#[derive(Debug, Clone)]
pub struct ContextMessage {
    pub id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    Person,
    Company,
    Job,
    Skill,
    Location,
    Website,
}

impl EntityType {
    fn as_str(self) -> &'static str {
        match self {
            EntityType::Person => "person",
            EntityType::Company => "company",
            EntityType::Job => "job",
            EntityType::Skill => "skill",
            EntityType::Location => "location",
            EntityType::Website => "website",
        }
    }

    /// Confidence band by pattern family — the more specific/structural a regex family is, the
    /// higher its extraction confidence.
    fn base_confidence(self) -> f32 {
        match self {
            EntityType::Website => 0.9,
            EntityType::Company => 0.8,
            EntityType::Job => 0.75,
            EntityType::Person => 0.7,
            EntityType::Skill => 0.6,
            EntityType::Location => 0.5,
        }
    }
}

/// Knowledge-graph node. Key = `{type}:{lowercase(name)}`.
#[derive(Debug, Clone)]
pub struct Entity {
    pub key: String,
    pub name: String,
    pub entity_type: EntityType,
    pub mentions: u32,
    pub confidence: f32,
    pub source: &'static str,
    pub last_mentioned: DateTime<Utc>,
}

fn entity_key(entity_type: EntityType, name: &str) -> String {
    format!("{}:{}", entity_type.as_str(), name.to_lowercase())
}

/// Edge between two entities observed within [`RELATIONSHIP_PROXIMITY_CHARS`]
/// characters of each other in source text. Strength starts at
/// 0.7 and increments by 0.1 per repeated observation, capped at 1.0.
#[derive(Debug, Clone)]
pub struct Relationship {
    pub from_key: String,
    pub to_key: String,
    pub strength: f32,
}

#[derive(Debug)]
pub struct ConversationContext {
    pub session_id: String,
    pub user_id: Option<String>,
    pub messages: VecDeque<ContextMessage>,
    pub entities: HashMap<String, Entity>,
    pub relationships: Vec<Relationship>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub total_tokens: u64,
    /// The most recently classified task type for this session, set by
    /// the Orchestrator after intent classification. `None` until the
    /// first turn has been classified.
    pub current_task: Option<String>,
}

impl ConversationContext {
    fn new(session_id: String, user_id: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            session_id,
            user_id,
            messages: VecDeque::new(),
            entities: HashMap::new(),
            relationships: Vec::new(),
            created_at: now,
            last_accessed: now,
            total_tokens: 0,
            current_task: None,
        }
    }
}

/// Hash-bucket-then-sin() pseudo-embedding, 384 dimensions and
/// L2-normalized so cosine similarity behaves sanely across message
/// lengths.
fn embed(text: &str) -> Vec<f32> {
    let mut embedding = vec![0.0f32; EMBEDDING_DIM];
    for (position, word) in text.split_whitespace().enumerate() {
        let hash = word.bytes().fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
        let bucket = (hash as usize) % EMBEDDING_DIM;
        let value = ((word.len() as f32 / 10.0) + position as f32 * 0.01).sin();
        embedding[bucket] += value;
    }
    let norm: f32 = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in embedding.iter_mut() {
            *v /= norm;
        }
    }
    embedding
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|y| y * y).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

struct EntityPatterns {
    company: Regex,
    job_title: Regex,
    skill: Regex,
    location: Regex,
    person: Regex,
    website: Regex,
}

impl EntityPatterns {
    fn new() -> Self {
        Self {
            company: Regex::new(r"\b([A-Z][a-zA-Z]+(?:\s[A-Z][a-zA-Z]+)*)\s(?:Inc|LLC|Corp|Corporation|Ltd)\.?\b").unwrap(),
            job_title: Regex::new(r"\b(Software Engineer|Product Manager|Data Scientist|Director|Recruiter|Designer|Analyst)\b").unwrap(),
            skill: Regex::new(r"\b(Rust|Python|JavaScript|TypeScript|Go|Java|SQL|Kubernetes|Docker|React)\b").unwrap(),
            location: Regex::new(r"\b([A-Z][a-z]+(?:\s[A-Z][a-z]+)?,\s[A-Z]{2})\b").unwrap(),
            person: Regex::new(r"\b(?:Mr|Ms|Mrs|Dr)\.\s([A-Z][a-z]+(?:\s[A-Z][a-z]+)?)\b").unwrap(),
            website: Regex::new(r"https?://[^\s]+").unwrap(),
        }
    }

    /// Returns each match's name, type, and byte offset in `text` — the
    /// offset feeds the 100-character relationship-proximity rule.
    fn extract(&self, text: &str) -> Vec<(String, EntityType, usize)> {
        let mut found = Vec::new();
        for cap in self.company.captures_iter(text) {
            let m = cap.get(1).unwrap();
            found.push((m.as_str().to_string(), EntityType::Company, m.start()));
        }
        for cap in self.job_title.captures_iter(text) {
            let m = cap.get(1).unwrap();
            found.push((m.as_str().to_string(), EntityType::Job, m.start()));
        }
        for cap in self.skill.captures_iter(text) {
            let m = cap.get(1).unwrap();
            found.push((m.as_str().to_string(), EntityType::Skill, m.start()));
        }
        for cap in self.location.captures_iter(text) {
            let m = cap.get(1).unwrap();
            found.push((m.as_str().to_string(), EntityType::Location, m.start()));
        }
        for cap in self.person.captures_iter(text) {
            let m = cap.get(1).unwrap();
            found.push((m.as_str().to_string(), EntityType::Person, m.start()));
        }
        for m in self.website.find_iter(text) {
            found.push((m.as_str().to_string(), EntityType::Website, m.start()));
        }
        found
    }
}

/// Options accepted by [`ContextStore::retrieve_relevant`].
#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub window: Duration,
    pub exclude_system: bool,
    pub semantic_search: bool,
    pub max_messages: usize,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            window: DEFAULT_RETRIEVAL_WINDOW,
            exclude_system: false,
            semantic_search: true,
            max_messages: RETRIEVAL_LIMIT,
        }
    }
}

/// A read-only rollup handed to the Response Generator — recent turns plus the session's best-known
/// entities, without exposing the store's internal locking.
#[derive(Debug, Clone, Default)]
pub struct ContextSnapshot {
    pub recent_messages: Vec<(MessageRole, String)>,
    pub top_entities: Vec<String>,
}

pub struct ContextStore {
    sessions: DashMap<String, RwLock<ConversationContext>>,
    message_cap: usize,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    patterns: EntityPatterns,
}

impl ContextStore {
    pub fn new(message_cap: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: DashMap::new(),
            message_cap,
            ttl,
            clock,
            patterns: EntityPatterns::new(),
        }
    }

    /// Creates an empty context for `session_id` if one doesn't already
    /// exist, recording `user_id`. Idempotent.
    pub async fn ensure_session(&self, session_id: &str, user_id: Option<&str>) {
        let now = self.clock.now();
        let entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| RwLock::new(ConversationContext::new(session_id.to_string(), user_id.map(str::to_string), now)));
        if let Some(uid) = user_id {
            let mut ctx = entry.write().await;
            if ctx.user_id.is_none() {
                ctx.user_id = Some(uid.to_string());
            }
        }
    }

    /// Appends a message, trimming the oldest once `message_cap` is
    /// exceeded, and folds any extracted entities
    /// and their co-occurrence relationships into the session's knowledge
    /// graph. Non-system messages carry a computed embedding; user messages
    /// additionally drive entity/relationship extraction.
    pub async fn add_message(&self, session_id: &str, role: MessageRole, content: &str) {
        let now = self.clock.now();
        let entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| RwLock::new(ConversationContext::new(session_id.to_string(), None, now)));

        let mut ctx = entry.write().await;
        ctx.last_accessed = now;
        let embedding = if role == MessageRole::System { Vec::new() } else { embed(content) };
        ctx.total_tokens += (content.split_whitespace().count() as u64).max(1);
        ctx.messages.push_back(ContextMessage {
            id: Uuid::new_v4(),
            role,
            content: content.to_string(),
            timestamp: now,
            embedding,
        });
        while ctx.messages.len() > self.message_cap {
            ctx.messages.pop_front();
        }

        if role == MessageRole::User {
            self.extract_knowledge(&mut ctx, content, now);
        }
    }

    fn extract_knowledge(&self, ctx: &mut ConversationContext, content: &str, now: DateTime<Utc>) {
        let found = self.patterns.extract(content);
        let mut keys_with_offset: Vec<(String, usize)> = Vec::with_capacity(found.len());

        for (name, entity_type, offset) in &found {
            let key = entity_key(*entity_type, name);
            ctx.entities
                .entry(key.clone())
                .and_modify(|e| {
                    e.mentions += 1;
                    e.last_mentioned = now;
                })
                .or_insert_with(|| Entity {
                    key: key.clone(),
                    name: name.clone(),
                    entity_type: *entity_type,
                    mentions: 1,
                    confidence: entity_type.base_confidence(),
                    source: "text_extraction",
                    last_mentioned: now,
                });
            keys_with_offset.push((key, *offset));
        }

        for i in 0..keys_with_offset.len() {
            for j in (i + 1)..keys_with_offset.len() {
                let (ref key_a, offset_a) = keys_with_offset[i];
                let (ref key_b, offset_b) = keys_with_offset[j];
                if key_a == key_b {
                    continue;
                }
                let distance = offset_a.abs_diff(offset_b);
                if distance > RELATIONSHIP_PROXIMITY_CHARS {
                    continue;
                }
                let (from_key, to_key) = if key_a <= key_b { (key_a.clone(), key_b.clone()) } else { (key_b.clone(), key_a.clone()) };
                match ctx.relationships.iter_mut().find(|r| r.from_key == from_key && r.to_key == to_key) {
                    Some(rel) => rel.strength = (rel.strength + RELATIONSHIP_STRENGTH_STEP).min(RELATIONSHIP_STRENGTH_CAP),
                    None => ctx.relationships.push(Relationship { from_key, to_key, strength: 0.7 }),
                }
            }
        }
    }

    /// Ranks stored messages by `0.7 * semantic relevance + 0.3 * recency`
    /// within the requested time window, keeping only matches above
    /// `RETRIEVAL_THRESHOLD` when semantic search is requested, capped at
    /// `opts.max_messages`.
    pub async fn retrieve_relevant(&self, session_id: &str, query: &str, now: DateTime<Utc>) -> Vec<ContextMessage> {
        self.retrieve_relevant_with(session_id, Some(query), now, &RetrievalOptions::default()).await
    }

    pub async fn retrieve_relevant_with(
        &self,
        session_id: &str,
        query: Option<&str>,
        now: DateTime<Utc>,
        opts: &RetrievalOptions,
    ) -> Vec<ContextMessage> {
        let Some(entry) = self.sessions.get(session_id) else {
            return Vec::new();
        };
        let ctx = entry.read().await;
        if ctx.messages.is_empty() {
            return Vec::new();
        }

        let window = chrono::Duration::from_std(opts.window).unwrap_or(chrono::Duration::zero());
        let cutoff = now - window;
        let in_window: Vec<&ContextMessage> = ctx
            .messages
            .iter()
            .filter(|m| m.timestamp >= cutoff)
            .filter(|m| !(opts.exclude_system && m.role == MessageRole::System))
            .collect();
        if in_window.is_empty() {
            return Vec::new();
        }

        let oldest = in_window.first().map(|m| m.timestamp).unwrap_or(now);
        let span = (now - oldest).num_seconds().max(1) as f32;
        let query_embedding = query.filter(|_| opts.semantic_search).map(|q| embed(q));

        let mut scored: Vec<(f32, ContextMessage)> = in_window
            .iter()
            .map(|m| {
                let age = (now - m.timestamp).num_seconds().max(0) as f32;
                let recency = 1.0 - (age / span).min(1.0);
                let score = match &query_embedding {
                    Some(q) => RELEVANCE_WEIGHT * cosine_similarity(q, &m.embedding) + RECENCY_WEIGHT * recency,
                    None => recency,
                };
                (score, (*m).clone())
            })
            .filter(|(score, _)| query_embedding.is_none() || *score >= RETRIEVAL_THRESHOLD)
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(opts.max_messages);
        scored.into_iter().map(|(_, m)| m).collect()
    }

    /// Last `limit` messages regardless of relevance, for callers (the
    /// Response Generator) that just need recent turns rather than a
    /// semantically ranked subset.
    pub async fn recent_messages(&self, session_id: &str, limit: usize) -> Vec<ContextMessage> {
        let Some(entry) = self.sessions.get(session_id) else {
            return Vec::new();
        };
        let ctx = entry.read().await;
        ctx.messages.iter().rev().take(limit).rev().cloned().collect()
    }

    /// A read-only rollup for the Response Generator.
    pub async fn snapshot(&self, session_id: &str) -> ContextSnapshot {
        let Some(entry) = self.sessions.get(session_id) else {
            return ContextSnapshot::default();
        };
        let ctx = entry.read().await;
        let recent_messages = ctx.messages.iter().rev().take(6).rev().map(|m| (m.role, m.content.clone())).collect();
        let mut entities: Vec<&Entity> = ctx.entities.values().collect();
        entities.sort_by(|a, b| b.mentions.cmp(&a.mentions));
        let top_entities = entities.iter().take(5).map(|e| e.name.clone()).collect();
        ContextSnapshot { recent_messages, top_entities }
    }

    /// Records the most recently classified task type for `session_id`,
    /// consulted by `summarize`. A no-op if the session doesn't exist.
    pub async fn set_current_task(&self, session_id: &str, task: impl Into<String>) {
        if let Some(entry) = self.sessions.get(session_id) {
            let mut ctx = entry.write().await;
            ctx.current_task = Some(task.into());
        }
    }

    /// Plain-text rollup of a session: start time, message count, current
    /// task, last user request (first 100 chars), and top-3 entities by
    /// mentions.
    pub async fn summarize(&self, session_id: &str) -> Option<String> {
        let entry = self.sessions.get(session_id)?;
        let ctx = entry.read().await;
        let mut entities: Vec<&Entity> = ctx.entities.values().collect();
        entities.sort_by(|a, b| b.mentions.cmp(&a.mentions));
        let top: Vec<String> = entities.iter().take(3).map(|e| format!("{} ({})", e.name, e.mentions)).collect();
        let last_user_request: String = ctx
            .messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.chars().take(100).collect())
            .unwrap_or_default();
        let current_task = ctx.current_task.as_deref().unwrap_or("none");

        Some(format!(
            "session {} started {} — {} messages, current task: {}, last request: \"{}\", top entities: [{}]",
            session_id,
            ctx.created_at.to_rfc3339(),
            ctx.messages.len(),
            current_task,
            last_user_request,
            top.join(", ")
        ))
    }

    pub async fn message_count(&self, session_id: &str) -> usize {
        match self.sessions.get(session_id) {
            Some(entry) => entry.read().await.messages.len(),
            None => 0,
        }
    }

    pub async fn total_tokens(&self, session_id: &str) -> u64 {
        match self.sessions.get(session_id) {
            Some(entry) => entry.read().await.total_tokens,
            None => 0,
        }
    }

    pub async fn entity_count(&self, session_id: &str) -> usize {
        match self.sessions.get(session_id) {
            Some(entry) => entry.read().await.entities.len(),
            None => 0,
        }
    }

    pub async fn relationship_count(&self, session_id: &str) -> usize {
        match self.sessions.get(session_id) {
            Some(entry) => entry.read().await.relationships.len(),
            None => 0,
        }
    }

    /// Drops sessions whose `last_accessed` is older than the configured
    /// TTL.
    pub async fn evict_expired(&self) {
        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::zero());
        let mut expired = Vec::new();
        for entry in self.sessions.iter() {
            let ctx = entry.value().read().await;
            if now - ctx.last_accessed > ttl {
                expired.push(entry.key().clone());
            }
        }
        for key in expired {
            self.sessions.remove(&key);
        }
    }

    pub fn spawn_eviction_sweep(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60 * 60));
            loop {
                interval.tick().await;
                self.evict_expired().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    #[tokio::test]
    async fn bounded_log_trims_oldest() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let store = ContextStore::new(3, Duration::from_secs(3600), clock);
        for i in 0..5 {
            store.add_message("s1", MessageRole::User, &format!("message {i}")).await;
        }
        let entry = store.sessions.get("s1").unwrap();
        let ctx = entry.read().await;
        assert_eq!(ctx.messages.len(), 3);
        assert_eq!(ctx.messages.front().unwrap().content, "message 2");
    }

    #[tokio::test]
    async fn entity_extraction_recognizes_company_suffix() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let store = ContextStore::new(100, Duration::from_secs(3600), clock);
        store.add_message("s1", MessageRole::User, "I interviewed at Acme Corp.").await;
        assert!(store.entity_count("s1").await >= 1);
    }

    #[tokio::test]
    async fn duplicate_entity_mentions_are_deduped_by_key() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let store = ContextStore::new(100, Duration::from_secs(3600), clock);
        store.add_message("s1", MessageRole::User, "I interviewed at Acme Corp.").await;
        store.add_message("s1", MessageRole::User, "Acme Corp. called me back.").await;
        let entry = store.sessions.get("s1").unwrap();
        let ctx = entry.read().await;
        let entity = ctx.entities.get(&entity_key(EntityType::Company, "Acme Corp.")).unwrap();
        assert_eq!(entity.mentions, 2);
    }

    #[tokio::test]
    async fn co_occurring_entities_form_a_relationship() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let store = ContextStore::new(100, Duration::from_secs(3600), clock);
        store.add_message("s1", MessageRole::User, "Acme Corp. is hiring a Software Engineer").await;
        assert_eq!(store.relationship_count("s1").await, 1);
    }

    #[tokio::test]
    async fn retrieval_ranks_relevant_messages_first() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let store = ContextStore::new(100, Duration::from_secs(3600), clock.clone());
        store.add_message("s1", MessageRole::User, "Let's talk about Rust programming jobs").await;
        store.add_message("s1", MessageRole::User, "What's the weather like today").await;
        let results = store.retrieve_relevant("s1", "Rust programming jobs", clock.now()).await;
        assert!(results.iter().any(|m| m.content.contains("Rust")));
    }

    #[tokio::test]
    async fn retrieval_respects_time_window() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let store = ContextStore::new(100, Duration::from_secs(3600), clock.clone());
        store.add_message("s1", MessageRole::User, "an old message about Rust jobs").await;
        let later = clock.fixed + chrono::Duration::seconds(7200);
        let opts = RetrievalOptions { window: Duration::from_secs(3600), semantic_search: false, ..Default::default() };
        let results = store.retrieve_relevant_with("s1", None, later, &opts).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn missing_session_retrieval_is_empty() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let store = ContextStore::new(100, Duration::from_secs(3600), clock.clone());
        let results = store.retrieve_relevant("missing", "anything", clock.now()).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn summarize_includes_last_user_request() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let store = ContextStore::new(100, Duration::from_secs(3600), clock);
        store.add_message("s1", MessageRole::User, "find me software engineering jobs").await;
        let summary = store.summarize("s1").await.unwrap();
        assert!(summary.to_lowercase().contains("software"));
    }
}
