//! Append-only message log.
//!
//! Each thread gets a `<threadId>.jsonl` file under the messages
//! directory. Every persisted message is one JSON line, with an in-memory
//! write-through cache so reads never hit disk after the first load.
//! Persisting an `assistant_response_end` record triggers the billing hook
//! exactly once.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use tl_domain::config::FetchConfig;
use tl_domain::error::{Error, Result};
use tl_domain::message::{
    LlmMessage, MessageContent, MessageRecord, MessageType, ResponseEndContent, Role,
};
use tl_domain::trace::TraceEvent;

use crate::billing::BillingLedger;
use crate::threads::ThreadStore;

/// Fields of a message about to be persisted.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub message_type: MessageType,
    pub content: serde_json::Value,
    /// Distinguishes conversation content from side-channel records.
    pub is_llm_message: bool,
    pub metadata: serde_json::Value,
    pub agent_id: Option<String>,
    pub agent_version_id: Option<String>,
}

impl NewMessage {
    pub fn llm(message_type: MessageType, content: serde_json::Value) -> Self {
        Self {
            message_type,
            content,
            is_llm_message: true,
            metadata: serde_json::json!({}),
            agent_id: None,
            agent_version_id: None,
        }
    }

    pub fn side_channel(message_type: MessageType, content: serde_json::Value) -> Self {
        Self {
            is_llm_message: false,
            ..Self::llm(message_type, content)
        }
    }
}

/// Cached state of one thread's log. The generation counts appends; a
/// cold read only installs its snapshot if no append landed while the
/// file was being read.
#[derive(Default)]
struct ThreadLogCache {
    generation: u64,
    records: Option<Vec<MessageRecord>>,
}

pub struct MessageStore {
    messages_dir: PathBuf,
    threads: Arc<ThreadStore>,
    ledger: Option<Arc<dyn BillingLedger>>,
    fetch: FetchConfig,
    cache: RwLock<HashMap<String, ThreadLogCache>>,
}

impl MessageStore {
    pub fn new(data_path: &Path, threads: Arc<ThreadStore>, fetch: FetchConfig) -> Result<Self> {
        let messages_dir = data_path.join("messages");
        std::fs::create_dir_all(&messages_dir).map_err(Error::Io)?;
        Ok(Self {
            messages_dir,
            threads,
            ledger: None,
            fetch,
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn BillingLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    // ── append ──

    /// Persist one message. Writes disk first, then the cache; on an
    /// `assistant_response_end` record the billing hook runs after the save
    /// and cannot fail it.
    pub async fn append_message(&self, thread_id: &str, new: NewMessage) -> Result<MessageRecord> {
        let record = MessageRecord {
            message_id: uuid::Uuid::new_v4().to_string(),
            thread_id: thread_id.to_string(),
            message_type: new.message_type,
            content: new.content,
            is_llm_message: new.is_llm_message,
            metadata: new.metadata,
            agent_id: new.agent_id,
            agent_version_id: new.agent_version_id,
            created_at: Utc::now(),
        };

        let line = serde_json::to_string(&record)?;
        let path = self.log_path(thread_id);
        tokio::task::spawn_blocking(move || {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(Error::Io)?;
            writeln!(file, "{line}").map_err(Error::Io)?;
            Ok::<(), Error>(())
        })
        .await
        .map_err(|e| Error::Other(format!("spawn_blocking join: {e}")))??;

        {
            let mut cache = self.cache.write();
            let entry = cache.entry(thread_id.to_string()).or_default();
            entry.generation += 1;
            if let Some(records) = &mut entry.records {
                records.push(record.clone());
            }
        }

        TraceEvent::MessageAppended {
            thread_id: thread_id.to_string(),
            message_id: record.message_id.clone(),
            message_type: format!("{:?}", record.message_type),
        }
        .emit();

        self.settle_usage(&record).await;
        Ok(record)
    }

    /// Billing hook. Logs and swallows every failure.
    async fn settle_usage(&self, record: &MessageRecord) {
        if record.message_type != MessageType::AssistantResponseEnd {
            return;
        }
        let Some(ledger) = &self.ledger else {
            return;
        };
        let end: ResponseEndContent = match serde_json::from_value(record.content.clone()) {
            Ok(end) => end,
            Err(e) => {
                tracing::error!(
                    message_id = %record.message_id,
                    error = %e,
                    "unparsable assistant_response_end content, skipping deduction"
                );
                return;
            }
        };
        if end.usage.is_zero() {
            tracing::debug!(message_id = %record.message_id, "no tokens used, skipping deduction");
            return;
        }
        let Some(account_id) = self
            .threads
            .get_thread(&record.thread_id)
            .and_then(|t| t.account_id)
        else {
            tracing::warn!(
                thread_id = %record.thread_id,
                "no owning account for thread, skipping deduction"
            );
            return;
        };
        let model = end.model.as_deref().unwrap_or("unknown");

        TraceEvent::UsageRecorded {
            thread_id: record.thread_id.clone(),
            message_id: record.message_id.clone(),
            prompt_tokens: end.usage.prompt_tokens,
            completion_tokens: end.usage.completion_tokens,
            cache_read_tokens: end.usage.cache_read_input_tokens,
            cache_creation_tokens: end.usage.cache_creation_input_tokens,
        }
        .emit();

        match ledger
            .deduct(
                &account_id,
                model,
                &end.usage,
                &record.thread_id,
                &record.message_id,
            )
            .await
        {
            Ok(outcome) => {
                TraceEvent::BillingDeducted {
                    account_id,
                    cost: outcome.cost,
                    success: outcome.success,
                }
                .emit();
                if !outcome.success {
                    tracing::error!(
                        message_id = %record.message_id,
                        cost = outcome.cost,
                        "credit deduction refused"
                    );
                }
            }
            Err(e) => {
                tracing::error!(
                    message_id = %record.message_id,
                    error = %e,
                    "credit deduction failed"
                );
            }
        }
    }

    // ── fetch ──

    /// All persisted records for a thread, oldest first. Malformed lines
    /// are skipped with a warning.
    pub async fn read_records(&self, thread_id: &str) -> Result<Vec<MessageRecord>> {
        let generation = {
            let cache = self.cache.read();
            match cache.get(thread_id) {
                Some(entry) => {
                    if let Some(records) = &entry.records {
                        return Ok(records.clone());
                    }
                    entry.generation
                }
                None => 0,
            }
        };

        let path = self.log_path(thread_id);
        let tid = thread_id.to_string();
        let records = tokio::task::spawn_blocking(move || read_jsonl(&path, &tid))
            .await
            .map_err(|e| Error::Other(format!("spawn_blocking join: {e}")))??;

        {
            // Only install the snapshot if no append landed during the
            // disk read; a stale snapshot would shadow that record until
            // the next invalidation.
            let mut cache = self.cache.write();
            let entry = cache.entry(thread_id.to_string()).or_default();
            if entry.generation == generation {
                entry.records = Some(records.clone());
            }
        }
        Ok(records)
    }

    /// History in prepared-request form, oldest first: LLM-flagged records
    /// only, with `image_context` records rewritten into vision user
    /// messages. Conversion yields to the scheduler between pages so a
    /// long history does not pin the worker.
    pub async fn fetch_llm_messages(&self, thread_id: &str) -> Result<Vec<LlmMessage>> {
        let records = self.read_records(thread_id).await?;
        let total = records.len();

        let llm_records: Vec<&MessageRecord> = records.iter().filter(|r| r.is_llm_message).collect();

        let mut messages = Vec::with_capacity(llm_records.len());
        let mut skipped = 0usize;
        for page in llm_records.chunks(self.fetch.message_page_size.max(1)) {
            for record in page {
                match convert_record(record) {
                    Some(msg) => messages.push(msg),
                    None => skipped += 1,
                }
            }
            tokio::task::yield_now().await;
        }

        TraceEvent::HistoryFetched {
            thread_id: thread_id.to_string(),
            records: total,
            llm_messages: messages.len(),
            skipped_malformed: skipped,
        }
        .emit();
        Ok(messages)
    }

    /// Drop the cached log for a thread.
    pub fn invalidate_cache(&self, thread_id: &str) {
        self.cache.write().remove(thread_id);
    }

    fn log_path(&self, thread_id: &str) -> PathBuf {
        self.messages_dir.join(format!("{thread_id}.jsonl"))
    }
}

/// Reads a log line at a time so only the parsed records stay resident.
fn read_jsonl(path: &Path, thread_id: &str) -> Result<Vec<MessageRecord>> {
    use std::io::BufRead;

    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::Io(e)),
    };
    let mut records = Vec::new();
    for (line_no, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line.map_err(Error::Io)?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<MessageRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(
                    thread_id,
                    line = line_no + 1,
                    error = %e,
                    "skipping malformed message line"
                );
            }
        }
    }
    Ok(records)
}

/// One persisted record to one prepared-request message.
fn convert_record(record: &MessageRecord) -> Option<LlmMessage> {
    if record.message_type == MessageType::ImageContext {
        return convert_image_context(record);
    }
    match serde_json::from_value::<LlmMessage>(record.content.clone()) {
        Ok(mut msg) => {
            msg.message_id = Some(record.message_id.clone());
            Some(msg)
        }
        Err(e) => {
            tracing::warn!(
                message_id = %record.message_id,
                error = %e,
                "skipping unparsable message content"
            );
            None
        }
    }
}

/// Rewrite a persisted `image_context` record into a vision user message.
fn convert_image_context(record: &MessageRecord) -> Option<LlmMessage> {
    let content = &record.content;
    let Some(base64) = content.get("base64").and_then(|v| v.as_str()) else {
        tracing::warn!(
            message_id = %record.message_id,
            "image_context record missing base64 data"
        );
        return None;
    };
    let mime_type = content
        .get("mime_type")
        .and_then(|v| v.as_str())
        .unwrap_or("image/jpeg");
    let file_path = content
        .get("file_path")
        .and_then(|v| v.as_str())
        .unwrap_or("image");

    Some(LlmMessage {
        role: Role::User,
        content: MessageContent::Parts(vec![
            tl_domain::message::ContentPart::Text {
                text: format!("Here is the image from '{file_path}' that you requested to see:"),
                cache_control: None,
            },
            tl_domain::message::ContentPart::ImageUrl {
                url: format!("data:{mime_type};base64,{base64}"),
                media_type: Some(mime_type.to_string()),
            },
        ]),
        message_id: Some(record.message_id.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> MessageStore {
        let threads = Arc::new(ThreadStore::new(dir).unwrap());
        MessageStore::new(dir, threads, FetchConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn append_then_fetch_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        for i in 0..3 {
            store
                .append_message(
                    "t1",
                    NewMessage::llm(
                        MessageType::User,
                        serde_json::json!({"role": "user", "content": format!("msg {i}")}),
                    ),
                )
                .await
                .unwrap();
        }

        let messages = store.fetch_llm_messages("t1").await.unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].text(), Some("msg 0"));
        assert_eq!(messages[2].text(), Some("msg 2"));
        assert!(messages.iter().all(|m| m.message_id.is_some()));
    }

    #[tokio::test]
    async fn non_llm_records_are_excluded_from_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        store
            .append_message(
                "t1",
                NewMessage::llm(
                    MessageType::User,
                    serde_json::json!({"role": "user", "content": "hello"}),
                ),
            )
            .await
            .unwrap();
        store
            .append_message(
                "t1",
                NewMessage::side_channel(
                    MessageType::AssistantResponseEnd,
                    serde_json::json!({"usage": {"prompt_tokens": 1, "completion_tokens": 1}}),
                ),
            )
            .await
            .unwrap();

        let messages = store.fetch_llm_messages("t1").await.unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn image_context_becomes_vision_user_message() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        store
            .append_message(
                "t1",
                NewMessage::llm(
                    MessageType::ImageContext,
                    serde_json::json!({
                        "base64": "aGVsbG8=",
                        "mime_type": "image/png",
                        "file_path": "chart.png"
                    }),
                ),
            )
            .await
            .unwrap();

        let messages = store.fetch_llm_messages("t1").await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        let MessageContent::Parts(parts) = &messages[0].content else {
            panic!("expected parts");
        };
        assert!(matches!(
            &parts[1],
            tl_domain::message::ContentPart::ImageUrl { url, .. }
                if url == "data:image/png;base64,aGVsbG8="
        ));
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        store
            .append_message(
                "t1",
                NewMessage::llm(
                    MessageType::User,
                    serde_json::json!({"role": "user", "content": "ok"}),
                ),
            )
            .await
            .unwrap();

        // Corrupt the log and force a cold read.
        let path = dir.path().join("messages/t1.jsonl");
        let mut raw = std::fs::read_to_string(&path).unwrap();
        raw.push_str("{not json\n");
        std::fs::write(&path, raw).unwrap();
        store.invalidate_cache("t1");

        let messages = store.fetch_llm_messages("t1").await.unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn paged_conversion_covers_the_whole_history() {
        let dir = tempfile::tempdir().unwrap();
        let threads = Arc::new(ThreadStore::new(dir.path()).unwrap());
        let fetch = FetchConfig {
            message_page_size: 2,
        };
        let store = MessageStore::new(dir.path(), threads, fetch).unwrap();

        for i in 0..5 {
            store
                .append_message(
                    "t1",
                    NewMessage::llm(
                        MessageType::User,
                        serde_json::json!({"role": "user", "content": format!("msg {i}")}),
                    ),
                )
                .await
                .unwrap();
        }

        let messages = store.fetch_llm_messages("t1").await.unwrap();
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0].text(), Some("msg 0"));
        assert_eq!(messages[4].text(), Some("msg 4"));
    }

    #[tokio::test]
    async fn append_with_a_cold_cache_does_not_hide_older_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        store
            .append_message(
                "t1",
                NewMessage::llm(
                    MessageType::User,
                    serde_json::json!({"role": "user", "content": "first"}),
                ),
            )
            .await
            .unwrap();
        store.invalidate_cache("t1");
        store
            .append_message(
                "t1",
                NewMessage::llm(
                    MessageType::User,
                    serde_json::json!({"role": "user", "content": "second"}),
                ),
            )
            .await
            .unwrap();

        let messages = store.fetch_llm_messages("t1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text(), Some("first"));
        assert_eq!(messages[1].text(), Some("second"));
    }

    #[tokio::test]
    async fn append_racing_a_cold_read_stays_visible() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store
            .append_message(
                "t1",
                NewMessage::llm(
                    MessageType::User,
                    serde_json::json!({"role": "user", "content": "first"}),
                ),
            )
            .await
            .unwrap();
        store.invalidate_cache("t1");

        // Replay the interleaving where a cold read snapshots the file,
        // an append lands, and the reader then tries to install its
        // pre-append snapshot.
        let snapshot = read_jsonl(&store.log_path("t1"), "t1").unwrap();
        store
            .append_message(
                "t1",
                NewMessage::llm(
                    MessageType::User,
                    serde_json::json!({"role": "user", "content": "second"}),
                ),
            )
            .await
            .unwrap();
        {
            let mut cache = store.cache.write();
            let entry = cache.entry("t1".to_string()).or_default();
            if entry.generation == 0 {
                entry.records = Some(snapshot);
            }
        }

        let messages = store.fetch_llm_messages("t1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].text(), Some("second"));
    }

    #[tokio::test]
    async fn reload_from_disk_matches_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store
            .append_message(
                "t1",
                NewMessage::llm(
                    MessageType::Assistant,
                    serde_json::json!({"role": "assistant", "content": "answer"}),
                ),
            )
            .await
            .unwrap();

        let cached = store.fetch_llm_messages("t1").await.unwrap();
        store.invalidate_cache("t1");
        let cold = store.fetch_llm_messages("t1").await.unwrap();
        assert_eq!(cached, cold);
    }
}
