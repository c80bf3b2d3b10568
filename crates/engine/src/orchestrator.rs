//! Iteration orchestrator: drives one iteration end to end.
//!
//! The store is the source of truth. Battles in use are cached as
//! `BattleSlot`s: the record sits behind a mutex held only while reading and
//! committing, and each agent has a gate held for the whole iteration, so two
//! calls for the same agent run one after the other while the two agents of a
//! battle still run in parallel. `reset` bumps the slot epoch; an iteration
//! that began before the reset is refused at commit.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arena_core::battle::{AgentType, Battle, BattleRecord, Iteration, preview};
use arena_core::completion::{CompletionClient, CompletionRequest, Usage, resolve_usage};
use arena_core::error::{Error, Result};
use arena_core::store::BattleStore;
use arena_core::task::{Task, TaskCatalog};
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, mpsc};
use tracing::{debug, error, info, warn};

use crate::context::strategy_for;
use crate::evaluator;
use crate::stream::{Heartbeat, IterationOutcome, IterationStream, StreamEvent, StreamFrame};

/// Cached slots beyond this are evicted when idle.
const SLOT_CACHE_CAPACITY: usize = 256;

/// Model parameters for every completion request.
#[derive(Debug, Clone)]
pub struct CompletionSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5-20250929".into(),
            temperature: 0.7,
            max_tokens: Some(4096),
        }
    }
}

struct SlotState {
    record: BattleRecord,
    epoch: u64,
}

struct BattleSlot {
    state: Mutex<SlotState>,
    traditional_gate: Arc<Mutex<()>>,
    ralph_gate: Arc<Mutex<()>>,
}

impl BattleSlot {
    fn new(record: BattleRecord) -> Self {
        Self {
            state: Mutex::new(SlotState { record, epoch: 0 }),
            traditional_gate: Arc::new(Mutex::new(())),
            ralph_gate: Arc::new(Mutex::new(())),
        }
    }

    fn gate(&self, agent_type: AgentType) -> Arc<Mutex<()>> {
        match agent_type {
            AgentType::Traditional => Arc::clone(&self.traditional_gate),
            AgentType::Ralph => Arc::clone(&self.ralph_gate),
        }
    }
}

/// An iteration that has been admitted and prepared but not yet committed.
///
/// Holds the agent's gate until it is committed or dropped.
pub struct PendingIteration {
    slot: Arc<BattleSlot>,
    _gate: OwnedMutexGuard<()>,
    battle_id: String,
    agent_type: AgentType,
    iteration_number: u32,
    epoch: u64,
    task: Task,
    request: CompletionRequest,
}

impl PendingIteration {
    pub fn battle_id(&self) -> &str {
        &self.battle_id
    }

    pub fn agent_type(&self) -> AgentType {
        self.agent_type
    }

    pub fn iteration_number(&self) -> u32 {
        self.iteration_number
    }

    pub fn request(&self) -> &CompletionRequest {
        &self.request
    }
}

/// Coordinates battles, context strategies, the completion client and the store.
pub struct Orchestrator {
    store: Arc<dyn BattleStore>,
    client: Arc<dyn CompletionClient>,
    catalog: Arc<TaskCatalog>,
    settings: CompletionSettings,
    slots: RwLock<HashMap<String, Arc<BattleSlot>>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn BattleStore>,
        client: Arc<dyn CompletionClient>,
        catalog: Arc<TaskCatalog>,
        settings: CompletionSettings,
    ) -> Self {
        Self {
            store,
            client,
            catalog,
            settings,
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &TaskCatalog {
        &self.catalog
    }

    // --- Battle lifecycle ---

    /// Create an idle battle for a known task.
    pub async fn create_battle(&self, task_id: &str) -> Result<Battle> {
        if self.catalog.get(task_id).is_none() {
            return Err(Error::TaskNotFound(task_id.to_string()));
        }

        let record = BattleRecord::new(Battle::new(task_id));
        self.store.save(&record).await?;
        let battle = record.battle.clone();
        self.cache(record).await;

        info!(battle_id = %battle.id, task_id, "Battle created");
        Ok(battle)
    }

    pub async fn get_battle(&self, battle_id: &str) -> Result<Battle> {
        let slot = self.slot(battle_id).await?;
        let state = slot.state.lock().await;
        Ok(state.record.battle.clone())
    }

    /// Flip the battle and its idle agents to running.
    pub async fn start_battle(&self, battle_id: &str) -> Result<Battle> {
        let slot = self.slot(battle_id).await?;
        let mut state = slot.state.lock().await;
        state.record.battle.start();
        self.persist(&state.record).await?;

        info!(battle_id, status = ?state.record.battle.status, "Battle started");
        Ok(state.record.battle.clone())
    }

    /// Discard all progress. In-flight iterations are refused at commit.
    pub async fn reset_battle(&self, battle_id: &str) -> Result<Battle> {
        let slot = self.slot(battle_id).await?;
        let mut state = slot.state.lock().await;
        state.record.reset();
        state.epoch += 1;
        self.persist(&state.record).await?;

        info!(battle_id, "Battle reset");
        Ok(state.record.battle.clone())
    }

    /// The most recent battles, newest first.
    pub async fn list_recent(&self, limit: usize) -> Result<Vec<Battle>> {
        Ok(self.store.list_recent(limit).await?)
    }

    // --- Iteration ---

    /// Admit and prepare the next iteration for `agent`.
    ///
    /// The battle is checked before the agent name. Waits for any iteration
    /// already running for the same agent.
    pub async fn begin(&self, battle_id: &str, agent: &str) -> Result<PendingIteration> {
        let slot = self.slot(battle_id).await?;
        let agent_type: AgentType = agent.parse()?;

        let gate = slot.gate(agent_type).lock_owned().await;

        let state = slot.state.lock().await;
        let record = &state.record;
        let task = self
            .catalog
            .get(&record.battle.task_id)
            .cloned()
            .ok_or_else(|| Error::TaskNotFound(record.battle.task_id.clone()))?;

        let iteration_number = record.battle.agent(agent_type).next_iteration_number();
        let strategy = strategy_for(agent_type);
        let messages = strategy.build(&task, &record.working, iteration_number);
        let epoch = state.epoch;
        drop(state);

        let request = CompletionRequest {
            model: self.settings.model.clone(),
            messages,
            system: strategy.system_instruction().to_string(),
            session_id: format!("{battle_id}_{agent_type}_{iteration_number}"),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };

        debug!(battle_id, agent = %agent_type, iteration = iteration_number, "Iteration admitted");

        Ok(PendingIteration {
            slot,
            _gate: gate,
            battle_id: battle_id.to_string(),
            agent_type,
            iteration_number,
            epoch,
            task,
            request,
        })
    }

    /// Run one blocking iteration.
    pub async fn iterate(&self, battle_id: &str, agent: &str) -> Result<IterationOutcome> {
        let pending = self.begin(battle_id, agent).await?;
        let started = Instant::now();

        let completion = self
            .client
            .complete(pending.request.clone())
            .await
            .map_err(|e| {
                error!(
                    battle_id,
                    agent = %pending.agent_type,
                    iteration = pending.iteration_number,
                    error = %e,
                    "Completion failed"
                );
                Error::Provider(e)
            })?;

        self.commit(pending, completion.text, completion.usage, started.elapsed())
            .await
    }

    /// Run one iteration as a stream of frames with heartbeats every `heartbeat`.
    pub fn stream_iteration(
        self: &Arc<Self>,
        pending: PendingIteration,
        heartbeat: Duration,
    ) -> IterationStream {
        let (tx, rx) = mpsc::channel(64);
        let orchestrator = Arc::clone(self);

        let driver = tokio::spawn(async move {
            let _heartbeat = Heartbeat::spawn(tx.clone(), heartbeat);
            orchestrator.drive_stream(pending, &tx).await;
        });

        IterationStream::new(rx, driver)
    }

    async fn drive_stream(&self, pending: PendingIteration, tx: &mpsc::Sender<StreamFrame>) {
        let start = StreamEvent::Start {
            iteration_number: pending.iteration_number,
            agent_type: pending.agent_type,
        };
        if !emit(tx, start).await {
            return;
        }

        let started = Instant::now();
        let mut chunks = match self.client.stream(pending.request.clone()).await {
            Ok(rx) => rx,
            Err(e) => {
                error!(battle_id = %pending.battle_id, error = %e, "Streaming completion failed");
                emit(
                    tx,
                    StreamEvent::Error {
                        message: Error::Provider(e).to_string(),
                    },
                )
                .await;
                return;
            }
        };

        let mut text = String::new();
        let mut usage = None;
        while let Some(item) = chunks.recv().await {
            match item {
                Ok(chunk) => {
                    if let Some(content) = chunk.content.filter(|c| !c.is_empty()) {
                        text.push_str(&content);
                        if !emit(tx, StreamEvent::Chunk { content }).await {
                            debug!(battle_id = %pending.battle_id, "Client went away mid-stream");
                            return;
                        }
                    }
                    if chunk.usage.is_some() {
                        usage = chunk.usage;
                    }
                    if chunk.done {
                        break;
                    }
                }
                Err(e) => {
                    error!(
                        battle_id = %pending.battle_id,
                        agent = %pending.agent_type,
                        iteration = pending.iteration_number,
                        error = %e,
                        "Stream interrupted"
                    );
                    emit(
                        tx,
                        StreamEvent::Error {
                            message: Error::Provider(e).to_string(),
                        },
                    )
                    .await;
                    return;
                }
            }
        }

        let event = match self.commit(pending, text, usage, started.elapsed()).await {
            Ok(outcome) => StreamEvent::Complete(outcome),
            Err(e) => StreamEvent::Error {
                message: e.to_string(),
            },
        };
        emit(tx, event).await;
    }

    /// Evaluate a finished completion and fold it into the battle.
    pub async fn commit(
        &self,
        pending: PendingIteration,
        response: String,
        reported_usage: Option<Usage>,
        elapsed: Duration,
    ) -> Result<IterationOutcome> {
        let PendingIteration {
            slot,
            _gate,
            battle_id,
            agent_type,
            iteration_number,
            epoch,
            task,
            request,
        } = pending;

        let strategy = strategy_for(agent_type);
        let evaluation = evaluator::evaluate(&response, &task);
        let (usage, token_source) = resolve_usage(reported_usage, &request.messages, &response);

        let iteration = Iteration {
            iteration_number,
            context_size: strategy.context_size(&request.messages, &response),
            tokens_used: u64::from(usage.total()),
            token_source,
            time_taken_ms: elapsed.as_millis() as u64,
            status: evaluation.status,
            code_snippet: evaluator::extract_snippet(&response),
            message: preview(&response),
            timestamp: Utc::now().to_rfc3339(),
        };

        let mut state = slot.state.lock().await;
        if state.epoch != epoch {
            warn!(battle_id = %battle_id, agent = %agent_type, iteration = iteration_number, "Battle reset mid-iteration; discarding result");
            return Err(Error::Superseded {
                battle_id,
                iteration_number,
            });
        }

        let SlotState { record, .. } = &mut *state;
        let expected = record.battle.agent(agent_type).next_iteration_number();
        if expected != iteration_number {
            return Err(Error::Internal(format!(
                "iteration {iteration_number} committed but {expected} was next"
            )));
        }

        let just_completed = record.battle.agent_mut(agent_type).record(iteration.clone());
        if just_completed {
            record.battle.on_agent_completed(agent_type);
        }
        strategy.record(&mut record.working, &iteration, &response);

        self.persist(record).await?;

        info!(
            battle_id = %battle_id,
            agent = %agent_type,
            iteration = iteration_number,
            status = %iteration.status,
            criteria_met = evaluation.criteria_met,
            tokens = iteration.tokens_used,
            context_size = iteration.context_size,
            "Iteration recorded"
        );
        if just_completed {
            info!(battle_id = %battle_id, agent = %agent_type, winner = ?record.battle.winner, "Agent completed");
        }

        Ok(IterationOutcome {
            iteration,
            agent_state: record.battle.agent(agent_type).clone(),
            battle_status: record.battle.status,
            winner: record.battle.winner,
        })
    }

    // --- Cache ---

    async fn slot(&self, battle_id: &str) -> Result<Arc<BattleSlot>> {
        if let Some(slot) = self.slots.read().await.get(battle_id) {
            return Ok(Arc::clone(slot));
        }

        // Load under the write lock: nothing can commit or evict in between
        let mut slots = self.slots.write().await;
        if let Some(slot) = slots.get(battle_id) {
            return Ok(Arc::clone(slot));
        }
        let record = self
            .store
            .get(battle_id)
            .await?
            .ok_or_else(|| Error::BattleNotFound(battle_id.to_string()))?;
        debug!(battle_id, "Battle loaded from store");
        Ok(insert_slot(&mut slots, record))
    }

    async fn cache(&self, record: BattleRecord) -> Arc<BattleSlot> {
        let mut slots = self.slots.write().await;
        insert_slot(&mut slots, record)
    }

    async fn persist(&self, record: &BattleRecord) -> Result<()> {
        self.store.save(record).await.map_err(|e| {
            warn!(battle_id = %record.id(), error = %e, "Store write failed; in-memory state kept");
            Error::Store(e)
        })
    }
}

fn insert_slot(
    slots: &mut HashMap<String, Arc<BattleSlot>>,
    record: BattleRecord,
) -> Arc<BattleSlot> {
    if slots.len() >= SLOT_CACHE_CAPACITY {
        // Only the map holds an idle slot, and its record is already persisted
        slots.retain(|_, slot| Arc::strong_count(slot) > 1);
    }
    let slot = slots
        .entry(record.id().to_string())
        .or_insert_with(|| Arc::new(BattleSlot::new(record)));
    Arc::clone(slot)
}

/// Send an event; `false` once the client has gone away.
async fn emit(tx: &mpsc::Sender<StreamFrame>, event: StreamEvent) -> bool {
    tx.send(StreamFrame::Event(event)).await.is_ok()
}
