//! Per-agent mailboxes, broadcast, and shared context.
//!
//! The bus is a coordination primitive, not a reliable queue: dropped
//! recipients accumulate messages until explicit cleanup, and there is no
//! global total order across senders — only FIFO per (sender, recipient)
//! pair, guaranteed here by serializing all operations behind one lock.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use stagecraft_core::EntityId;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// The kind of an [`AgentMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    Response,
    Notification,
    ContextShare,
}

/// Either a single named recipient or every known agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recipient {
    Agent(EntityId),
    Broadcast,
}

/// A message exchanged between agents over the [`Bus`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: Uuid,
    pub from_agent: EntityId,
    pub to_agent: Recipient,
    pub kind: MessageKind,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<Uuid>,
}

impl AgentMessage {
    pub fn new(
        from_agent: impl Into<EntityId>,
        to_agent: Recipient,
        kind: MessageKind,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: stagecraft_core::new_id(),
            from_agent: from_agent.into(),
            to_agent,
            kind,
            payload,
            timestamp: stagecraft_core::now(),
            correlation_id: None,
        }
    }

    pub fn with_correlation(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }
}

#[derive(Debug, Clone)]
struct ContextEntry {
    owner: EntityId,
    value: serde_json::Value,
    timestamp: DateTime<Utc>,
}

/// In-process message and shared-context coordinator for multi-agent
/// collaboration.
pub struct Bus {
    known_agents: RwLock<HashSet<EntityId>>,
    mailboxes: RwLock<HashMap<EntityId, VecDeque<AgentMessage>>>,
    shared_context: RwLock<HashMap<String, ContextEntry>>,
    journal: Option<mpsc::UnboundedSender<AgentMessage>>,
}

impl Bus {
    pub fn new() -> Self {
        Self {
            known_agents: RwLock::new(HashSet::new()),
            mailboxes: RwLock::new(HashMap::new()),
            shared_context: RwLock::new(HashMap::new()),
            journal: None,
        }
    }

    /// Enable a durable append-only JSONL journal of every published
    /// message, written from a background tokio task draining an mpsc
    /// channel.
    pub fn with_journal(log_dir: PathBuf) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<AgentMessage>();

        tokio::spawn(async move {
            if let Err(e) = tokio::fs::create_dir_all(&log_dir).await {
                warn!(error = %e, "failed to create bus journal directory");
                return;
            }
            let log_file = log_dir.join("bus_journal.jsonl");

            while let Some(msg) = rx.recv().await {
                if let Ok(line) = serde_json::to_string(&msg) {
                    if let Ok(mut file) = tokio::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&log_file)
                        .await
                    {
                        use tokio::io::AsyncWriteExt;
                        let line = format!("{line}\n");
                        let _ = file.write_all(line.as_bytes()).await;
                    }
                }
            }
        });

        Self {
            known_agents: RwLock::new(HashSet::new()),
            mailboxes: RwLock::new(HashMap::new()),
            shared_context: RwLock::new(HashMap::new()),
            journal: Some(tx),
        }
    }

    /// Register an agent so it becomes a broadcast recipient and gets a mailbox.
    pub fn register_agent(&self, agent_id: impl Into<EntityId>) {
        let agent_id = agent_id.into();
        self.known_agents.write().insert(agent_id.clone());
        self.mailboxes.write().entry(agent_id).or_default();
    }

    /// Append a message to its target mailbox(es), journaling it if durability
    /// is enabled.
    pub fn publish(&self, msg: AgentMessage) {
        if let Some(journal) = &self.journal {
            let _ = journal.send(msg.clone());
        }

        match &msg.to_agent {
            Recipient::Agent(target) => {
                let mut mailboxes = self.mailboxes.write();
                mailboxes.entry(target.clone()).or_default().push_back(msg);
            }
            Recipient::Broadcast => {
                self.broadcast(msg);
                return;
            }
        }
    }

    /// Deliver a message to every known agent except the sender.
    pub fn broadcast(&self, msg: AgentMessage) {
        if let Some(journal) = &self.journal {
            let _ = journal.send(msg.clone());
        }
        let agents: Vec<EntityId> = self
            .known_agents
            .read()
            .iter()
            .filter(|a| *a != &msg.from_agent)
            .cloned()
            .collect();

        let mut mailboxes = self.mailboxes.write();
        for agent in agents {
            mailboxes.entry(agent).or_default().push_back(msg.clone());
        }
    }

    /// Drain and return all messages for an agent, removing them from its mailbox.
    pub fn subscribe(&self, agent_id: &str) -> Vec<AgentMessage> {
        let mut mailboxes = self.mailboxes.write();
        match mailboxes.get_mut(agent_id) {
            Some(mailbox) => mailbox.drain(..).collect(),
            None => Vec::new(),
        }
    }

    /// Read an agent's mailbox without removing the messages.
    pub fn peek(&self, agent_id: &str) -> Vec<AgentMessage> {
        let mailboxes = self.mailboxes.read();
        mailboxes
            .get(agent_id)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Write a value into the globally-visible shared-context map.
    /// Conflict resolution is last-writer-wins by timestamp, so a write with
    /// an older timestamp than the current entry is dropped.
    pub fn share_context(&self, from: impl Into<EntityId>, key: impl Into<String>, value: serde_json::Value) {
        let owner = from.into();
        let key = key.into();
        let now = stagecraft_core::now();

        let mut ctx = self.shared_context.write();
        let should_write = match ctx.get(&key) {
            Some(existing) => now >= existing.timestamp,
            None => true,
        };
        if should_write {
            info!(key = %key, owner = %owner, "shared context updated");
            ctx.insert(
                key,
                ContextEntry {
                    owner,
                    value,
                    timestamp: now,
                },
            );
        }
    }

    pub fn get_context(&self, key: &str) -> Option<serde_json::Value> {
        self.shared_context.read().get(key).map(|e| e.value.clone())
    }

    /// A consistent point-in-time snapshot of the full shared-context map,
    /// used by the Checkpoint Manager.
    pub fn context_snapshot(&self) -> HashMap<String, serde_json::Value> {
        self.shared_context
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect()
    }

    /// Replace the shared-context map wholesale, used when restoring a checkpoint.
    pub fn restore_context(&self, entries: HashMap<String, serde_json::Value>) {
        let now = stagecraft_core::now();
        let mut ctx = self.shared_context.write();
        ctx.clear();
        for (key, value) in entries {
            ctx.insert(
                key,
                ContextEntry {
                    owner: "checkpoint".into(),
                    value,
                    timestamp: now,
                },
            );
        }
    }

    /// Drop a mailbox entirely — explicit cleanup for an agent that will
    /// never subscribe again.
    pub fn clear_mailbox(&self, agent_id: &str) {
        self.mailboxes.write().remove(agent_id);
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared handle to a [`Bus`], cheap to clone and pass to multiple agents.
pub type SharedBus = Arc<Bus>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn notify(from: &str, to: Recipient, text: &str) -> AgentMessage {
        AgentMessage::new(from, to, MessageKind::Notification, serde_json::json!({"text": text}))
    }

    #[test]
    fn publish_and_subscribe_round_trips() {
        let bus = Bus::new();
        bus.register_agent("a");
        bus.register_agent("b");
        bus.publish(notify("a", Recipient::Agent("b".into()), "hi"));

        let msgs = bus.subscribe("b");
        assert_eq!(msgs.len(), 1);
        assert!(bus.subscribe("b").is_empty(), "subscribe drains the mailbox");
    }

    #[test]
    fn peek_does_not_drain() {
        let bus = Bus::new();
        bus.register_agent("b");
        bus.publish(notify("a", Recipient::Agent("b".into()), "hi"));

        assert_eq!(bus.peek("b").len(), 1);
        assert_eq!(bus.peek("b").len(), 1, "peek must not remove messages");
    }

    #[test]
    fn fifo_per_sender_recipient_pair() {
        let bus = Bus::new();
        bus.register_agent("b");
        bus.publish(notify("a", Recipient::Agent("b".into()), "first"));
        bus.publish(notify("a", Recipient::Agent("b".into()), "second"));

        let msgs = bus.subscribe("b");
        assert_eq!(msgs[0].payload["text"], "first");
        assert_eq!(msgs[1].payload["text"], "second");
    }

    #[test]
    fn broadcast_excludes_sender() {
        let bus = Bus::new();
        bus.register_agent("a");
        bus.register_agent("b");
        bus.register_agent("c");
        bus.broadcast(notify("a", Recipient::Broadcast, "hello all"));

        assert!(bus.peek("a").is_empty());
        assert_eq!(bus.peek("b").len(), 1);
        assert_eq!(bus.peek("c").len(), 1);
    }

    #[test]
    fn shared_context_is_globally_visible() {
        let bus = Bus::new();
        bus.share_context("agent-1", "artifact:X", serde_json::json!("value"));
        assert_eq!(bus.get_context("artifact:X"), Some(serde_json::json!("value")));
    }

    #[test]
    fn later_timestamp_wins_on_concurrent_writes() {
        let bus = Bus::new();
        bus.share_context("agent-1", "k", serde_json::json!(1));
        bus.share_context("agent-2", "k", serde_json::json!(2));
        assert_eq!(bus.get_context("k"), Some(serde_json::json!(2)));
    }

    #[test]
    fn context_snapshot_restore_round_trips() {
        let bus = Bus::new();
        bus.share_context("agent-1", "k1", serde_json::json!("v1"));
        bus.share_context("agent-1", "k2", serde_json::json!("v2"));
        let snap = bus.context_snapshot();

        let bus2 = Bus::new();
        bus2.restore_context(snap);
        assert_eq!(bus2.get_context("k1"), Some(serde_json::json!("v1")));
        assert_eq!(bus2.get_context("k2"), Some(serde_json::json!("v2")));
    }

    #[tokio::test]
    async fn durable_journal_writes_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Bus::with_journal(dir.path().to_path_buf());
        bus.register_agent("b");
        bus.publish(notify("a", Recipient::Agent("b".into()), "hi"));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let contents = tokio::fs::read_to_string(dir.path().join("bus_journal.jsonl"))
            .await
            .unwrap();
        assert!(contents.contains("\"hi\""));
    }
}
