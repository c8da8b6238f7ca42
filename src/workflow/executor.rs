//! Workflow executor
//!
//! Central orchestrator: drives one command through
//! find → approve → analyze → approve → negotiate → approve → purchase →
//! list → approve → complete. Owns the ledger, approval gate, job queue,
//! negotiation engine, and collaborator seams; each collaborator step runs
//! as a queue job so transient failures get the queue's retry policy, while
//! gates and ledger calls happen in the driver task. The executor is the
//! single place that decides whether a failure is fatal to a command.

use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adapters::{
    CommandParser, DealAnalyzer, ListingCreator, MessageClassifier, OpportunityFinder,
    SimulatedAnalyzer, SimulatedClassifier, SimulatedFinder, SimulatedLister, SimulatedParser,
};
use crate::approval::{ApprovalGate, Decision};
use crate::config::AppConfig;
use crate::domain::{
    ApprovalKind, BudgetSummary, Command, CommandStatus, DealAnalysis, DealVerdict, Opportunity,
    ParsedCommand, Platform, PurchasedItem, SearchParams, ThreadStatus, WorkflowStep,
};
use crate::error::{JobError, ReflipError, Result};
use crate::events::{EventBus, WorkflowEvent};
use crate::ledger::BudgetLedger;
use crate::negotiation::NegotiationEngine;
use crate::persistence::WorkflowStore;
use crate::queue::{Job, JobHandler, JobPriority, JobQueue, JobResult, QueueStatus};

pub const QUEUE_FIND: &str = "find";
pub const QUEUE_ANALYZE: &str = "analyze";
pub const QUEUE_PURCHASE: &str = "purchase";
pub const QUEUE_LIST: &str = "list";

/// Platforms every purchased item gets listed on
const DEFAULT_PLATFORMS: [Platform; 2] = [Platform::Ebay, Platform::FacebookMarketplace];

/// The external black boxes a workflow needs
pub struct Collaborators {
    pub parser: Arc<dyn CommandParser>,
    pub finder: Arc<dyn OpportunityFinder>,
    pub analyzer: Arc<dyn DealAnalyzer>,
    pub classifier: Arc<dyn MessageClassifier>,
    pub lister: Arc<dyn ListingCreator>,
}

impl Collaborators {
    /// Deterministic simulated set (dry-run mode, tests)
    pub fn simulated() -> Self {
        Self {
            parser: Arc::new(SimulatedParser),
            finder: Arc::new(SimulatedFinder::default()),
            analyzer: Arc::new(SimulatedAnalyzer),
            classifier: Arc::new(SimulatedClassifier),
            lister: Arc::new(SimulatedLister),
        }
    }
}

struct CommandEntry {
    command: RwLock<Command>,
    status_tx: watch::Sender<CommandStatus>,
}

struct ExecutorInner {
    ledger: BudgetLedger,
    gate: ApprovalGate,
    queue: Arc<JobQueue>,
    bus: EventBus,
    engine: NegotiationEngine,
    parser: Arc<dyn CommandParser>,
    commands: DashMap<Uuid, Arc<CommandEntry>>,
    store: Option<Arc<WorkflowStore>>,
}

/// Clone-friendly coordinator handle: submit commands, resolve approvals,
/// query state. Clones share all state.
#[derive(Clone)]
pub struct WorkflowExecutor {
    inner: Arc<ExecutorInner>,
}

impl WorkflowExecutor {
    /// Wire up the full engine: ledger, gate, queues + handlers, and the
    /// negotiation engine, all sharing one event bus.
    pub async fn new(
        config: &AppConfig,
        collaborators: Collaborators,
        store: Option<Arc<WorkflowStore>>,
    ) -> Self {
        let bus = EventBus::default();
        let ledger = BudgetLedger::new(config.negotiation.budget_expiry_days);
        let gate = ApprovalGate::new(
            bus.clone(),
            std::time::Duration::from_secs(config.approval.timeout_secs),
        );
        let mut job_queue = JobQueue::new(config.queue.clone());
        if let Some(store) = &store {
            job_queue = job_queue.with_store(store.clone());
        }
        let queue = Arc::new(job_queue);
        let engine = NegotiationEngine::new(bus.clone(), collaborators.classifier.clone());

        queue
            .register(
                QUEUE_FIND,
                Arc::new(FindHandler {
                    finder: collaborators.finder.clone(),
                }),
            )
            .await;
        queue
            .register(
                QUEUE_ANALYZE,
                Arc::new(AnalyzeHandler {
                    analyzer: collaborators.analyzer.clone(),
                }),
            )
            .await;
        queue
            .register(
                QUEUE_PURCHASE,
                Arc::new(PurchaseHandler {
                    ledger: ledger.clone(),
                }),
            )
            .await;
        queue
            .register(
                QUEUE_LIST,
                Arc::new(ListHandler {
                    lister: collaborators.lister.clone(),
                }),
            )
            .await;

        Self {
            inner: Arc::new(ExecutorInner {
                ledger,
                gate,
                queue,
                bus,
                engine,
                parser: collaborators.parser,
                commands: DashMap::new(),
                store,
            }),
        }
    }

    /// The shared event bus (external dashboards subscribe here)
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    // ==================== Intake ====================

    /// Parse a natural-language command, allocate its budget, and start
    /// driving it. Parse failures surface here, before anything is queued.
    pub async fn submit_command(&self, text: &str) -> Result<Uuid> {
        let params = self.inner.parser.parse(text).await?;
        self.submit_parsed(text, params).await
    }

    /// Same as `submit_command` with pre-parsed parameters
    pub async fn submit_parsed(&self, text: &str, params: ParsedCommand) -> Result<Uuid> {
        let mut command = Command::new(text);
        let budget = self.inner.ledger.create(command.id, params.budget).await?;
        command.params = Some(params);
        command.budget_id = Some(budget.id);
        let command_id = command.id;

        info!(
            command_id = %command_id,
            budget_id = %budget.id,
            budget = %budget.total,
            "command accepted"
        );

        let (status_tx, _) = watch::channel(command.status);
        self.persist_command(&command).await;
        self.persist_budget(budget.id).await;
        self.inner.commands.insert(
            command_id,
            Arc::new(CommandEntry {
                command: RwLock::new(command),
                status_tx,
            }),
        );

        let executor = self.clone();
        tokio::spawn(async move { executor.drive(command_id).await });

        Ok(command_id)
    }

    /// Driver task: runs the gated step sequence, funneling every failure
    /// through `fail_command`. Cancellation unwinds silently; the command
    /// was already failed by `cancel_command`.
    async fn drive(&self, command_id: Uuid) {
        match self.run_steps(command_id).await {
            Ok(()) => {}
            Err(ReflipError::Cancelled) => {
                debug!(command_id = %command_id, "driver stopped: command cancelled");
            }
            Err(e) => {
                self.fail_command(command_id, &e.to_string()).await;
            }
        }
    }

    async fn run_steps(&self, command_id: Uuid) -> Result<()> {
        let params = self
            .command_status(command_id)
            .await?
            .params
            .ok_or_else(|| ReflipError::Internal("command has no parsed params".to_string()))?;
        let budget_id = self
            .command_status(command_id)
            .await?
            .budget_id
            .ok_or_else(|| ReflipError::Internal("command has no budget".to_string()))?;

        // ---- find ----
        self.update(command_id, CommandStatus::Finding, WorkflowStep::Find)
            .await?;
        let search = SearchParams::from(&params);
        let ticket = self
            .inner
            .queue
            .enqueue(QUEUE_FIND, serde_json::to_value(&search)?, JobPriority::Normal)
            .await?;
        let opportunities: Vec<Opportunity> = serde_json::from_value(ticket.result().await?)?;
        self.ensure_active(command_id).await?;

        if opportunities.is_empty() {
            return Err(ReflipError::WorkflowHalted(format!(
                "no opportunities found for \"{}\"",
                search.category
            )));
        }
        for opportunity in &opportunities {
            self.inner.bus.publish(WorkflowEvent::ItemDiscovered {
                command_id,
                opportunity: opportunity.clone(),
            });
        }
        self.with_command(command_id, |c| c.items_found = opportunities.len() as u32)
            .await;

        // ---- gate: proceed with these finds? ----
        self.update(command_id, CommandStatus::Finding, WorkflowStep::ApproveFind)
            .await?;
        let decision = self
            .gated(
                command_id,
                ApprovalKind::FindItem,
                serde_json::json!({
                    "opportunities": opportunities,
                    "category": search.category,
                }),
            )
            .await?;
        self.ensure_active(command_id).await?;
        if !decision.approved {
            return Err(halted("find approval", &decision));
        }

        // ---- analyze until something is actionable ----
        self.update(command_id, CommandStatus::Finding, WorkflowStep::Analyze)
            .await?;
        let mut chosen: Option<(Opportunity, DealAnalysis)> = None;
        for opportunity in opportunities {
            let ticket = self
                .inner
                .queue
                .enqueue(
                    QUEUE_ANALYZE,
                    serde_json::to_value(&opportunity)?,
                    JobPriority::Normal,
                )
                .await?;
            let analysis: DealAnalysis = serde_json::from_value(ticket.result().await?)?;
            self.ensure_active(command_id).await?;

            debug!(
                command_id = %command_id,
                opportunity_id = %opportunity.id,
                verdict = %analysis.verdict,
                max_price = %analysis.max_price,
                "deal analyzed"
            );
            if analysis.verdict != DealVerdict::Pass {
                chosen = Some((opportunity, analysis));
                break;
            }
        }
        let Some((opportunity, analysis)) = chosen else {
            return Err(ReflipError::WorkflowHalted(
                "analyzer passed on every opportunity".to_string(),
            ));
        };

        // ---- gate: open negotiation / commit to pursuing this deal ----
        self.update(
            command_id,
            CommandStatus::Finding,
            WorkflowStep::ApproveNegotiate,
        )
        .await?;
        let decision = self
            .gated(
                command_id,
                ApprovalKind::Negotiate,
                serde_json::json!({
                    "opportunity": opportunity,
                    "analysis": analysis,
                }),
            )
            .await?;
        self.ensure_active(command_id).await?;
        if !decision.approved {
            return Err(halted("negotiation approval", &decision));
        }

        // ---- reserve the ceiling before committing to spend ----
        let ceiling = match analysis.verdict {
            DealVerdict::Buy => opportunity.asking_price,
            DealVerdict::Negotiate => analysis.max_price,
            DealVerdict::Pass => unreachable!("pass verdicts are filtered above"),
        };
        if !self.inner.ledger.can_afford(budget_id, ceiling).await?
            || !self.inner.ledger.reserve(budget_id, ceiling).await?
        {
            return Err(ReflipError::WorkflowHalted(format!(
                "insufficient budget: needed ${ceiling}"
            )));
        }

        // ---- negotiate (or take the asking price) ----
        let agreed_price = match analysis.verdict {
            DealVerdict::Buy => opportunity.asking_price,
            _ => {
                self.update(command_id, CommandStatus::Negotiating, WorkflowStep::Negotiate)
                    .await?;
                let thread_id = self
                    .inner
                    .engine
                    .start_thread(&opportunity, command_id, analysis.max_price)
                    .await?;
                let outcome = self.inner.engine.await_outcome(thread_id).await?;
                self.persist_thread(thread_id).await;
                self.ensure_active(command_id).await?;

                match (outcome.status, outcome.final_price) {
                    (ThreadStatus::Accepted, Some(price)) => {
                        // hand back the slack between the ceiling and the deal
                        if price < ceiling {
                            self.inner.ledger.release(budget_id, ceiling - price).await?;
                        }
                        price
                    }
                    (status, _) => {
                        return Err(ReflipError::WorkflowHalted(format!(
                            "negotiation ended {status}"
                        )));
                    }
                }
            }
        };

        // ---- gate: money is about to leave ----
        self.update(
            command_id,
            CommandStatus::Purchasing,
            WorkflowStep::ApprovePurchase,
        )
        .await?;
        let decision = self
            .gated(
                command_id,
                ApprovalKind::Purchase,
                serde_json::json!({
                    "opportunity": opportunity,
                    "price": agreed_price,
                }),
            )
            .await?;
        self.ensure_active(command_id).await?;
        if !decision.approved {
            return Err(halted("purchase approval", &decision));
        }

        // ---- purchase (spends the reservation) ----
        self.update(command_id, CommandStatus::Purchasing, WorkflowStep::Purchase)
            .await?;
        let ticket = self
            .inner
            .queue
            .enqueue(
                QUEUE_PURCHASE,
                serde_json::to_value(&PurchaseJob {
                    command_id,
                    budget_id,
                    opportunity: opportunity.clone(),
                    price: agreed_price,
                })?,
                JobPriority::High,
            )
            .await?;
        let item: PurchasedItem = serde_json::from_value(ticket.result().await?)?;
        self.persist_budget(budget_id).await;
        self.ensure_active(command_id).await?;
        self.with_command(command_id, |c| c.items_purchased += 1).await;
        info!(
            command_id = %command_id,
            item_id = %item.id,
            price = %item.purchase_price,
            "item purchased"
        );

        // ---- list for resale ----
        self.update(command_id, CommandStatus::Listing, WorkflowStep::List)
            .await?;
        let ticket = self
            .inner
            .queue
            .enqueue(
                QUEUE_LIST,
                serde_json::to_value(&ListJob {
                    item: item.clone(),
                    platforms: DEFAULT_PLATFORMS.to_vec(),
                })?,
                JobPriority::Normal,
            )
            .await?;
        let results: Vec<crate::domain::ListingResult> =
            serde_json::from_value(ticket.result().await?)?;
        self.ensure_active(command_id).await?;
        let listed = results.iter().filter(|r| r.success).count() as u32;
        self.with_command(command_id, |c| c.items_listed += listed).await;

        // ---- gate: keep the listings live? ----
        self.update(command_id, CommandStatus::Listing, WorkflowStep::ApproveList)
            .await?;
        let decision = self
            .gated(
                command_id,
                ApprovalKind::List,
                serde_json::json!({
                    "item": item,
                    "listings": results,
                }),
            )
            .await?;
        self.ensure_active(command_id).await?;
        if !decision.approved {
            // purchase already happened; only unreserved funds come back
            return Err(halted("listing approval", &decision));
        }

        // ---- complete ----
        self.inner.ledger.complete(budget_id).await?;
        self.persist_budget(budget_id).await;
        self.update(command_id, CommandStatus::Completed, WorkflowStep::Complete)
            .await?;
        self.inner
            .bus
            .publish(WorkflowEvent::CommandCompleted { command_id });
        info!(command_id = %command_id, "command completed");
        Ok(())
    }

    // ==================== Decision intake / control ====================

    /// The single mutation point by which an external actor affects a
    /// suspended workflow.
    pub async fn resolve_approval(
        &self,
        approval_id: Uuid,
        approved: bool,
        resolved_by: &str,
        reason: Option<String>,
    ) -> Result<()> {
        self.inner
            .gate
            .resolve(approval_id, approved, resolved_by, reason)
            .await?;
        self.persist_approval(approval_id).await;
        Ok(())
    }

    /// Cancel a command: fail it, cancel its pending approval, release
    /// reserved funds. Already-dispatched jobs run to completion but the
    /// driver ignores their results.
    pub async fn cancel_command(&self, command_id: Uuid) -> Result<()> {
        for request_id in self.inner.gate.pending_for_command(command_id).await {
            if let Err(e) = self.inner.gate.cancel(request_id).await {
                warn!(command_id = %command_id, approval_id = %request_id, error = %e, "approval cancel failed");
            }
            self.persist_approval(request_id).await;
        }
        self.fail_command(command_id, "command cancelled").await;
        Ok(())
    }

    /// Graceful shutdown: stop queue workers after in-flight jobs finish
    pub async fn shutdown(&self) {
        self.inner.queue.shutdown().await;
    }

    // ==================== Query surface ====================

    pub async fn budget_summary(&self, budget_id: Uuid) -> Result<BudgetSummary> {
        Ok(self.inner.ledger.summary(budget_id).await?)
    }

    pub async fn command_status(&self, command_id: Uuid) -> Result<Command> {
        let entry = self
            .inner
            .commands
            .get(&command_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or(ReflipError::CommandNotFound(command_id))?;
        let command = entry.command.read().await;
        Ok(command.clone())
    }

    pub async fn queue_status(&self, queue_name: &str) -> Result<QueueStatus> {
        self.inner.queue.status(queue_name).await
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<WorkflowEvent> {
        self.inner.bus.subscribe()
    }

    /// Wait until the command reaches Completed or Failed
    pub async fn await_command(&self, command_id: Uuid) -> Result<CommandStatus> {
        let entry = self
            .inner
            .commands
            .get(&command_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or(ReflipError::CommandNotFound(command_id))?;
        let mut rx = entry.status_tx.subscribe();
        loop {
            let status = *rx.borrow();
            if status.is_terminal() {
                return Ok(status);
            }
            rx.changed()
                .await
                .map_err(|_| ReflipError::Internal("command entry dropped".to_string()))?;
        }
    }

    pub fn ledger(&self) -> &BudgetLedger {
        &self.inner.ledger
    }

    pub fn gate(&self) -> &ApprovalGate {
        &self.inner.gate
    }

    pub fn engine(&self) -> &NegotiationEngine {
        &self.inner.engine
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.inner.queue
    }

    // ==================== Internals ====================

    /// Register + await an approval, persisting both sides of the gate
    async fn gated(
        &self,
        command_id: Uuid,
        kind: ApprovalKind,
        context: serde_json::Value,
    ) -> Result<Decision> {
        let (request_id, rx) = self.inner.gate.register(command_id, kind, context).await;
        self.persist_approval(request_id).await;
        let decision = self.inner.gate.await_decision(request_id, rx).await?;
        self.persist_approval(request_id).await;
        Ok(decision)
    }

    /// Transition a command's status/step, publish progress, persist
    async fn update(
        &self,
        command_id: Uuid,
        status: CommandStatus,
        step: WorkflowStep,
    ) -> Result<()> {
        let entry = self
            .inner
            .commands
            .get(&command_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or(ReflipError::CommandNotFound(command_id))?;

        let snapshot = {
            let mut command = entry.command.write().await;
            if command.status != status {
                if !command.status.can_transition_to(status) {
                    return Err(ReflipError::InvalidStateTransition {
                        from: command.status.to_string(),
                        to: status.to_string(),
                    });
                }
                command.status = status;
            }
            command.current_step = step;
            command.clone()
        };

        entry.status_tx.send_replace(status);
        self.inner.bus.publish(WorkflowEvent::CommandProgress {
            command_id,
            status,
            current_step: step,
        });
        self.persist_command(&snapshot).await;
        Ok(())
    }

    /// Terminal failure: release reserved funds, record the reason, publish.
    /// No-ops if the command is already terminal.
    async fn fail_command(&self, command_id: Uuid, reason: &str) {
        let Some(entry) = self
            .inner
            .commands
            .get(&command_id)
            .map(|e| Arc::clone(e.value()))
        else {
            return;
        };

        let snapshot = {
            let mut command = entry.command.write().await;
            if !command.status.can_transition_to(CommandStatus::Failed) {
                return;
            }
            command.status = CommandStatus::Failed;
            command.failure_reason = Some(reason.to_string());
            command.clone()
        };

        // hand back whatever was still reserved for this command
        if let Some(budget_id) = snapshot.budget_id {
            match self.inner.ledger.get(budget_id).await {
                Ok(budget) if budget.reserved > Decimal::ZERO => {
                    if let Err(e) = self.inner.ledger.release(budget_id, budget.reserved).await {
                        error!(command_id = %command_id, error = %e, "failed to release reserved funds");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!(command_id = %command_id, error = %e, "failed to read budget on failure")
                }
            }
            self.persist_budget(budget_id).await;
        }

        warn!(command_id = %command_id, reason, "command failed");
        entry.status_tx.send_replace(CommandStatus::Failed);
        self.inner.bus.publish(WorkflowEvent::CommandFailed {
            command_id,
            reason: reason.to_string(),
        });
        self.persist_command(&snapshot).await;
    }

    async fn ensure_active(&self, command_id: Uuid) -> Result<()> {
        let command = self.command_status(command_id).await?;
        if command.is_active() {
            Ok(())
        } else {
            Err(ReflipError::Cancelled)
        }
    }

    async fn with_command<F: FnOnce(&mut Command)>(&self, command_id: Uuid, f: F) {
        if let Some(entry) = self
            .inner
            .commands
            .get(&command_id)
            .map(|e| Arc::clone(e.value()))
        {
            let snapshot = {
                let mut command = entry.command.write().await;
                f(&mut command);
                command.clone()
            };
            self.persist_command(&snapshot).await;
        }
    }

    // ==================== Persistence write-through ====================

    async fn persist_command(&self, command: &Command) {
        if let Some(store) = &self.inner.store {
            if let Err(e) = store.upsert_command(command).await {
                warn!(command_id = %command.id, error = %e, "command persistence failed");
            }
        }
    }

    async fn persist_budget(&self, budget_id: Uuid) {
        if let Some(store) = &self.inner.store {
            match self.inner.ledger.get(budget_id).await {
                Ok(budget) => {
                    if let Err(e) = store.upsert_budget(&budget).await {
                        warn!(budget_id = %budget_id, error = %e, "budget persistence failed");
                    }
                }
                Err(e) => warn!(budget_id = %budget_id, error = %e, "budget snapshot failed"),
            }
        }
    }

    async fn persist_approval(&self, request_id: Uuid) {
        if let Some(store) = &self.inner.store {
            match self.inner.gate.get(request_id).await {
                Ok(request) => {
                    if let Err(e) = store.upsert_approval(&request).await {
                        warn!(approval_id = %request_id, error = %e, "approval persistence failed");
                    }
                }
                Err(e) => warn!(approval_id = %request_id, error = %e, "approval snapshot failed"),
            }
        }
    }

    async fn persist_thread(&self, thread_id: Uuid) {
        if let Some(store) = &self.inner.store {
            match self.inner.engine.snapshot(thread_id).await {
                Ok(thread) => {
                    if let Err(e) = store.upsert_thread(&thread).await {
                        warn!(thread_id = %thread_id, error = %e, "thread persistence failed");
                    }
                }
                Err(e) => warn!(thread_id = %thread_id, error = %e, "thread snapshot failed"),
            }
        }
    }
}

fn halted(gate_name: &str, decision: &Decision) -> ReflipError {
    ReflipError::WorkflowHalted(format!(
        "{gate_name} denied: {}",
        decision.reason.as_deref().unwrap_or("no reason given")
    ))
}

// ==================== Step job payloads & handlers ====================

#[derive(Debug, Serialize, Deserialize)]
struct PurchaseJob {
    command_id: Uuid,
    budget_id: Uuid,
    opportunity: Opportunity,
    price: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
struct ListJob {
    item: PurchasedItem,
    platforms: Vec<Platform>,
}

struct FindHandler {
    finder: Arc<dyn OpportunityFinder>,
}

#[async_trait::async_trait]
impl JobHandler for FindHandler {
    async fn handle(&self, job: &Job) -> JobResult {
        let params: SearchParams = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobError::invalid_input(e.to_string()))?;
        let opportunities = self.finder.find(&params).await.map_err(JobError::from)?;
        serde_json::to_value(opportunities).map_err(|e| JobError::internal(e.to_string()))
    }
}

struct AnalyzeHandler {
    analyzer: Arc<dyn DealAnalyzer>,
}

#[async_trait::async_trait]
impl JobHandler for AnalyzeHandler {
    async fn handle(&self, job: &Job) -> JobResult {
        let opportunity: Opportunity = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobError::invalid_input(e.to_string()))?;
        let analysis = self
            .analyzer
            .analyze(&opportunity)
            .await
            .map_err(JobError::from)?;
        serde_json::to_value(analysis).map_err(|e| JobError::internal(e.to_string()))
    }
}

/// Converts the reservation into spend and mints the purchased-item record.
/// There is no purchase collaborator: payment goes out through the same
/// channel the negotiation ran on, so "purchasing" here is the ledger spend
/// plus bookkeeping.
struct PurchaseHandler {
    ledger: BudgetLedger,
}

#[async_trait::async_trait]
impl JobHandler for PurchaseHandler {
    async fn handle(&self, job: &Job) -> JobResult {
        let req: PurchaseJob = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobError::invalid_input(e.to_string()))?;

        self.ledger
            .spend(req.budget_id, req.price)
            .await
            .map_err(|e| JobError::insufficient_funds(e.to_string()))?;

        let margin = req.opportunity.profit_margin;
        let fee = req.opportunity.platform_fee_rate;
        let target_resale_price =
            (req.price * (Decimal::ONE + margin) / (Decimal::ONE - fee)).round_dp(2);

        let item = PurchasedItem {
            id: Uuid::new_v4(),
            opportunity_id: req.opportunity.id,
            command_id: req.command_id,
            title: req.opportunity.title,
            purchase_price: req.price,
            target_resale_price,
            purchased_at: chrono::Utc::now(),
        };
        serde_json::to_value(item).map_err(|e| JobError::internal(e.to_string()))
    }
}

struct ListHandler {
    lister: Arc<dyn ListingCreator>,
}

#[async_trait::async_trait]
impl JobHandler for ListHandler {
    async fn handle(&self, job: &Job) -> JobResult {
        let req: ListJob = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobError::invalid_input(e.to_string()))?;
        let results = self
            .lister
            .create_listing(&req.item, &req.platforms)
            .await
            .map_err(JobError::from)?;
        serde_json::to_value(results).map_err(|e| JobError::internal(e.to_string()))
    }
}
