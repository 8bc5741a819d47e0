//! The scheduler (spec §4.4, component C4) — ties the queue, edge router,
//! execution context, credit ledger, event stream, and node executors
//! together into one run loop.
//!
//! Dispatch proceeds in batches: each tick asks `QueueState` for every
//! node that's ready (bounded by `maxConcurrentNodes`), runs that whole
//! batch concurrently, applies every result, then computes the next
//! batch. This never exceeds the concurrency cap and keeps the
//! `(depth asc, id asc)` ordering `QueueState` already guarantees, at the
//! cost of not starting a new node until its whole sibling batch settles
//! — a deliberate simplification over a rolling window.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::credits::{reservation_amount, CreditLedger, CreditService};
use crate::edge_router;
use crate::error::EngineError;
use crate::events::{EventSequencer, EventSink, ExecutionEventKind};
use crate::executor::{
    default_credit_cost, tool_name, NodeError, NodeOutput, NodeRegistry, NodeRequest, PauseContext, Signal,
};
use crate::model::{BuiltWorkflow, Node, NodeType};
use crate::snapshot::{Snapshot, SnapshotStore};

/// A cooperative, cloneable cancellation flag. Checked once per dispatch
/// batch (§5 "Cancellation") — never mid-batch, so an in-flight batch
/// always finishes before the remaining queue is marked `skipped`.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub enum ExecutionOutcome {
    Completed { context: ExecutionContext },
    Failed { context: ExecutionContext, error: EngineError },
    Paused { snapshot: Box<Snapshot> },
    Cancelled { context: ExecutionContext },
}

enum DispatchFailure {
    Node(NodeError),
    MissingExecutor,
    CreditExhausted,
}

impl fmt::Display for DispatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchFailure::Node(e) => write!(f, "{e}"),
            DispatchFailure::MissingExecutor => write!(f, "no executor registered for this node type"),
            DispatchFailure::CreditExhausted => write!(f, "insufficient credits to dispatch this node"),
        }
    }
}

enum Settle {
    Continue,
    Pause(PauseContext),
}

/// Owns the collaborators the scheduler needs but never implements
/// itself: a [`NodeRegistry`] to dispatch into, and the three external
/// trait objects (§1) for credits, events, and snapshots.
pub struct Scheduler {
    registry: Arc<NodeRegistry>,
    credit_service: Arc<dyn CreditService>,
    event_sink: Arc<dyn EventSink>,
    snapshot_store: Arc<dyn SnapshotStore>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<NodeRegistry>,
        credit_service: Arc<dyn CreditService>,
        event_sink: Arc<dyn EventSink>,
        snapshot_store: Arc<dyn SnapshotStore>,
    ) -> Self {
        Self { registry, credit_service, event_sink, snapshot_store }
    }

    /// Start a fresh execution: reserve credits, initialize the queue,
    /// and run to completion, pause, or cancellation.
    #[instrument(skip_all, fields(execution_id = %execution_id, workflow = %workflow.name))]
    pub async fn execute(
        &self,
        workflow: &BuiltWorkflow,
        execution_id: Uuid,
        inputs: HashMap<String, Value>,
        cancel: CancellationToken,
    ) -> Result<ExecutionOutcome, EngineError> {
        let reservation = reservation_amount(workflow);
        let granted = self
            .credit_service
            .reserve(execution_id, reservation)
            .await
            .map_err(EngineError::Collaborator)?;
        if !granted {
            let available = self
                .credit_service
                .available_balance(execution_id)
                .await
                .map_err(EngineError::Collaborator)?;
            return Err(EngineError::InsufficientCredits { needed: reservation, available });
        }

        let graph = workflow.to_queue_graph();
        let queue_state = queue::QueueState::initialize(&graph);
        let context = ExecutionContext::new(inputs);
        let ledger = CreditLedger::new(reservation);
        let mut sequencer = EventSequencer::new();

        info!(reservation, "execution starting");
        self.event_sink
            .publish(sequencer.next_event(execution_id, Utc::now(), ExecutionEventKind::Started))
            .await;

        self.run(workflow, &graph, execution_id, context, queue_state, ledger, sequencer, cancel)
            .await
    }

    /// Resume a previously paused execution from its snapshot (§6.4).
    /// `resume_inputs` are merged into the restored context's `inputs`
    /// before the loop re-enters — nodes the snapshot already marked
    /// terminal are never re-dispatched.
    #[instrument(skip_all, fields(execution_id = %snapshot.execution_id))]
    pub async fn resume(
        &self,
        workflow: &BuiltWorkflow,
        mut snapshot: Snapshot,
        resume_inputs: HashMap<String, Value>,
        cancel: CancellationToken,
    ) -> Result<ExecutionOutcome, EngineError> {
        snapshot.context.inputs.extend(resume_inputs);
        let graph = workflow.to_queue_graph();
        let mut sequencer = EventSequencer::new();
        let execution_id = snapshot.execution_id;

        self.event_sink
            .publish(sequencer.next_event(execution_id, Utc::now(), ExecutionEventKind::Resumed))
            .await;

        self.run(
            workflow,
            &graph,
            execution_id,
            snapshot.context,
            snapshot.queue_state,
            snapshot.ledger,
            sequencer,
            cancel,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn run(
        &self,
        workflow: &BuiltWorkflow,
        graph: &queue::Graph,
        execution_id: Uuid,
        mut context: ExecutionContext,
        mut queue_state: queue::QueueState,
        mut ledger: CreditLedger,
        mut sequencer: EventSequencer,
        cancel: CancellationToken,
    ) -> Result<ExecutionOutcome, EngineError> {
        loop {
            if cancel.is_cancelled() {
                queue_state.cancel_remaining();
                self.finalize_credits(execution_id, &ledger).await;
                // §7: cancellation's terminal event is `failed` with
                // reason `cancelled`, not a distinct event kind.
                self.event_sink
                    .publish(sequencer.next_event(
                        execution_id,
                        Utc::now(),
                        ExecutionEventKind::Failed { message: "cancelled".to_string() },
                    ))
                    .await;
                return Ok(ExecutionOutcome::Cancelled { context });
            }

            let ready = queue_state.ready_nodes(graph, workflow.max_concurrent_nodes);
            if ready.is_empty() {
                if queue_state.is_execution_complete() {
                    break;
                }
                return Err(EngineError::SchedulerStalled);
            }
            queue_state.mark_executing(&ready)?;

            let mut settled: Vec<(String, Result<NodeOutput, DispatchFailure>)> = Vec::new();
            let mut concurrent: Vec<_> = Vec::new();

            for node_id in &ready {
                let node = workflow.node(node_id).expect("ready node exists in workflow").clone();
                if node.node_type == NodeType::Loop {
                    let result =
                        self.run_loop_node(workflow, execution_id, &node, &mut context, &mut ledger, &mut sequencer)
                            .await;
                    settled.push((node_id.clone(), result));
                    continue;
                }

                if !ledger.should_allow_execution(default_credit_cost(node.node_type)) {
                    settled.push((node_id.clone(), Err(DispatchFailure::CreditExhausted)));
                    continue;
                }

                let resolved_config = context.resolve_templates(&node.config);
                self.event_sink
                    .publish(sequencer.next_event(
                        execution_id,
                        Utc::now(),
                        ExecutionEventKind::NodeStarted { node_id: node_id.clone() },
                    ))
                    .await;
                if let Some(tool) = tool_name(node.node_type) {
                    self.event_sink
                        .publish(sequencer.next_event(
                            execution_id,
                            Utc::now(),
                            ExecutionEventKind::ToolCallStarted { node_id: node_id.clone(), tool: tool.to_string() },
                        ))
                        .await;
                }
                concurrent.push(self.dispatch(execution_id, node, resolved_config));
            }

            settled.extend(futures::future::join_all(concurrent).await);
            settled.sort_by(|a, b| a.0.cmp(&b.0));

            let mut pause: Option<PauseContext> = None;
            for (node_id, result) in settled {
                let outcome = self
                    .apply_result(
                        workflow,
                        graph,
                        execution_id,
                        &mut context,
                        &mut queue_state,
                        &mut ledger,
                        &mut sequencer,
                        node_id,
                        result,
                    )
                    .await?;
                if let Settle::Pause(pause_context) = outcome {
                    pause.get_or_insert(pause_context);
                }
            }

            if let Some(pause_context) = pause {
                let snapshot = Snapshot {
                    execution_id,
                    created_at: Utc::now(),
                    context: context.clone(),
                    queue_state: queue_state.clone(),
                    ledger,
                    pause_context: pause_context.clone(),
                };
                self.snapshot_store.save(&snapshot).await.map_err(EngineError::Collaborator)?;
                self.event_sink
                    .publish(sequencer.next_event(
                        execution_id,
                        Utc::now(),
                        ExecutionEventKind::Paused {
                            node_id: pause_context.node_id.clone(),
                            reason: pause_context.reason.clone(),
                        },
                    ))
                    .await;
                return Ok(ExecutionOutcome::Paused { snapshot: Box::new(snapshot) });
            }
        }

        self.finalize_credits(execution_id, &ledger).await;
        let mut failed = queue_state.failed_ids();
        if failed.is_empty() {
            self.event_sink
                .publish(sequencer.next_event(execution_id, Utc::now(), ExecutionEventKind::Completed))
                .await;
            Ok(ExecutionOutcome::Completed { context })
        } else {
            failed.sort();
            let message = format!("{} node(s) failed: {}", failed.len(), failed.join(", "));
            self.event_sink
                .publish(sequencer.next_event(
                    execution_id,
                    Utc::now(),
                    ExecutionEventKind::Failed { message: message.clone() },
                ))
                .await;
            Ok(ExecutionOutcome::Failed {
                context,
                error: EngineError::NodeExecutionError { node_id: failed[0].clone(), message },
            })
        }
    }

    async fn dispatch(
        &self,
        execution_id: Uuid,
        node: Node,
        resolved_config: Value,
    ) -> (String, Result<NodeOutput, DispatchFailure>) {
        let node_id = node.id.clone();
        let Some(executor) = self.registry.get(node.node_type) else {
            return (node_id, Err(DispatchFailure::MissingExecutor));
        };
        let request = NodeRequest {
            execution_id,
            node_id: node_id.clone(),
            node_type: node.node_type,
            name: node.name,
            config: resolved_config,
            loop_iteration: None,
        };
        let result = executor.execute(request).await;
        (node_id, result.map_err(DispatchFailure::Node))
    }

    /// Drives every iteration of a `loop` node's body sequentially (§9).
    /// Body nodes never enter `QueueState` — they're owned entirely by
    /// this loop, which is why `BuiltWorkflow::to_queue_graph` excludes
    /// them.
    async fn run_loop_node(
        &self,
        workflow: &BuiltWorkflow,
        execution_id: Uuid,
        node: &Node,
        context: &mut ExecutionContext,
        ledger: &mut CreditLedger,
        sequencer: &mut EventSequencer,
    ) -> Result<NodeOutput, DispatchFailure> {
        let loop_ctx = workflow
            .loop_contexts
            .get(&node.id)
            .expect("a `loop`-typed node always has a LoopContext (builder invariant)");

        for iteration in 0..loop_ctx.max_iterations {
            context
                .variables
                .insert(loop_ctx.iteration_variable.clone(), json!(iteration));

            for body_id in &loop_ctx.body_node_ids {
                let body_node = workflow
                    .node(body_id)
                    .expect("loop body node ids are validated at build time")
                    .clone();

                if !ledger.should_allow_execution(default_credit_cost(body_node.node_type)) {
                    return Err(DispatchFailure::CreditExhausted);
                }

                let Some(executor) = self.registry.get(body_node.node_type) else {
                    return Err(DispatchFailure::MissingExecutor);
                };

                let resolved_config = context.resolve_templates(&body_node.config);
                let tool = tool_name(body_node.node_type);
                self.event_sink
                    .publish(sequencer.next_event(
                        execution_id,
                        Utc::now(),
                        ExecutionEventKind::NodeStarted { node_id: body_id.clone() },
                    ))
                    .await;
                if let Some(tool) = tool {
                    self.event_sink
                        .publish(sequencer.next_event(
                            execution_id,
                            Utc::now(),
                            ExecutionEventKind::ToolCallStarted { node_id: body_id.clone(), tool: tool.to_string() },
                        ))
                        .await;
                }

                let request = NodeRequest {
                    execution_id,
                    node_id: body_id.clone(),
                    node_type: body_node.node_type,
                    name: body_node.name.clone(),
                    config: resolved_config,
                    loop_iteration: Some(iteration),
                };
                let output = executor.execute(request).await.map_err(DispatchFailure::Node)?;

                ledger.accrue(body_node.node_type, output.token_usage);
                context
                    .record_loop_output(body_id, iteration, output.value.clone())
                    .map_err(|e| DispatchFailure::Node(NodeError::Fatal(e.to_string())))?;

                if let Some(tool) = tool {
                    self.event_sink
                        .publish(sequencer.next_event(
                            execution_id,
                            Utc::now(),
                            ExecutionEventKind::ToolCallCompleted { node_id: body_id.clone(), tool: tool.to_string() },
                        ))
                        .await;
                }
                self.event_sink
                    .publish(sequencer.next_event(
                        execution_id,
                        Utc::now(),
                        ExecutionEventKind::NodeCompleted { node_id: body_id.clone(), output: output.value },
                    ))
                    .await;

                if matches!(output.signal, Signal::Pause(_)) {
                    warn!(
                        node_id = %body_id,
                        "loop body requested a pause; mid-loop pause/resume is not supported, continuing"
                    );
                }
            }
        }

        Ok(NodeOutput::value(json!({ "iterations": loop_ctx.max_iterations })))
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_result(
        &self,
        workflow: &BuiltWorkflow,
        graph: &queue::Graph,
        execution_id: Uuid,
        context: &mut ExecutionContext,
        queue_state: &mut queue::QueueState,
        ledger: &mut CreditLedger,
        sequencer: &mut EventSequencer,
        node_id: String,
        result: Result<NodeOutput, DispatchFailure>,
    ) -> Result<Settle, EngineError> {
        let node = workflow.node(&node_id).expect("resolved node exists in workflow");
        let tool = tool_name(node.node_type);

        match result {
            Ok(output) => {
                context.record_output(&node_id, output.value.clone())?;
                ledger.accrue(node.node_type, output.token_usage);

                let fired = workflow
                    .outgoing_edges(&node_id)
                    .filter(|e| edge_router::fires(workflow, node, &output.value, &e.handle_type))
                    .map(|e| e.id.clone())
                    .collect();
                queue_state.resolve_node(graph, &node_id, true, &fired)?;

                self.event_sink
                    .publish(sequencer.next_event(
                        execution_id,
                        Utc::now(),
                        ExecutionEventKind::NodeCompleted { node_id: node_id.clone(), output: output.value },
                    ))
                    .await;
                if let Some(tool) = tool {
                    self.event_sink
                        .publish(sequencer.next_event(
                            execution_id,
                            Utc::now(),
                            ExecutionEventKind::ToolCallCompleted { node_id: node_id.clone(), tool: tool.to_string() },
                        ))
                        .await;
                }

                match output.signal {
                    Signal::Pause(request) => Ok(Settle::Pause(PauseContext {
                        reason: request.reason,
                        node_id: node_id.clone(),
                        paused_at: Utc::now(),
                        resume_trigger: request.resume_trigger,
                        timeout_ms: request.timeout_ms,
                        preserved_data: request.preserved_data,
                    })),
                    Signal::None => Ok(Settle::Continue),
                }
            }
            Err(failure) => {
                queue_state.resolve_node(graph, &node_id, false, &Default::default())?;
                let message = failure.to_string();
                warn!(node_id = %node_id, error = %message, "node failed");
                if let Some(tool) = tool {
                    self.event_sink
                        .publish(sequencer.next_event(
                            execution_id,
                            Utc::now(),
                            ExecutionEventKind::ToolCallCompleted { node_id: node_id.clone(), tool: tool.to_string() },
                        ))
                        .await;
                }
                self.event_sink
                    .publish(sequencer.next_event(
                        execution_id,
                        Utc::now(),
                        ExecutionEventKind::NodeFailed { node_id, message },
                    ))
                    .await;
                Ok(Settle::Continue)
            }
        }
    }

    async fn finalize_credits(&self, execution_id: Uuid, ledger: &CreditLedger) {
        if let Err(err) = self.credit_service.finalize(execution_id, ledger.reserved, ledger.accrued).await {
            warn!(%execution_id, error = %err, "failed to finalize credit ledger");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder;
    use crate::executor::{ExecuteNode, TokenUsage};
    use crate::model::{HandleType, RawEdge, RawLoopConfig, RawNode, RawWorkflowDefinition};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct EchoNode;

    #[async_trait]
    impl ExecuteNode for EchoNode {
        async fn execute(&self, request: NodeRequest) -> Result<NodeOutput, NodeError> {
            Ok(NodeOutput::value(json!({ "echoed": request.config })))
        }
    }

    struct ConditionalNode(bool);

    #[async_trait]
    impl ExecuteNode for ConditionalNode {
        async fn execute(&self, _request: NodeRequest) -> Result<NodeOutput, NodeError> {
            Ok(NodeOutput::value(json!({ "result": self.0 })))
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl ExecuteNode for AlwaysFails {
        async fn execute(&self, _request: NodeRequest) -> Result<NodeOutput, NodeError> {
            Err(NodeError::Fatal("boom".into()))
        }
    }

    struct LlmNode;

    #[async_trait]
    impl ExecuteNode for LlmNode {
        async fn execute(&self, _request: NodeRequest) -> Result<NodeOutput, NodeError> {
            Ok(NodeOutput {
                value: json!({ "text": "hi" }),
                signal: Signal::None,
                token_usage: Some(TokenUsage { input_tokens: 120, output_tokens: 30 }),
            })
        }
    }

    struct InMemoryCredits {
        balance: Mutex<i64>,
    }

    #[async_trait]
    impl CreditService for InMemoryCredits {
        async fn reserve(&self, _execution_id: Uuid, amount: i64) -> anyhow::Result<bool> {
            let mut balance = self.balance.lock().unwrap();
            if *balance >= amount {
                *balance -= amount;
                Ok(true)
            } else {
                Ok(false)
            }
        }

        async fn available_balance(&self, _execution_id: Uuid) -> anyhow::Result<i64> {
            Ok(*self.balance.lock().unwrap())
        }

        async fn finalize(&self, _execution_id: Uuid, reserved: i64, actual: i64) -> anyhow::Result<()> {
            *self.balance.lock().unwrap() += reserved - actual;
            Ok(())
        }
    }

    fn node(id: &str, ty: NodeType) -> RawNode {
        RawNode { id: id.into(), node_type: ty, name: id.into(), config: json!({}) }
    }

    fn edge(id: &str, from: &str, to: &str, handle: HandleType) -> RawEdge {
        RawEdge { id: id.into(), source: from.into(), target: to.into(), source_handle: None, target_handle: None, handle_type: handle }
    }

    fn scheduler_with(registry: NodeRegistry, balance: i64) -> Scheduler {
        Scheduler::new(
            Arc::new(registry),
            Arc::new(InMemoryCredits { balance: Mutex::new(balance) }),
            Arc::new(crate::events::NullEventSink),
            Arc::new(crate::snapshot::InMemorySnapshotStore::new()),
        )
    }

    #[tokio::test]
    async fn linear_workflow_completes_and_propagates_output() {
        let def = RawWorkflowDefinition {
            id: Uuid::new_v4(),
            name: "linear".into(),
            nodes: vec![node("trigger", NodeType::Input), node("t", NodeType::Transform), node("out", NodeType::Output)],
            edges: vec![
                edge("e1", "trigger", "t", HandleType::Default),
                edge("e2", "t", "out", HandleType::Default),
            ],
            loops: vec![],
            max_concurrent_nodes: 10,
            trigger: crate::model::TriggerKind::Manual,
        };
        let workflow = builder::build(def).unwrap();

        let mut registry = NodeRegistry::new();
        registry.register(NodeType::Input, Arc::new(EchoNode));
        registry.register(NodeType::Transform, Arc::new(EchoNode));
        registry.register(NodeType::Output, Arc::new(EchoNode));

        let scheduler = scheduler_with(registry, 1_000);
        let outcome = scheduler
            .execute(&workflow, Uuid::new_v4(), HashMap::new(), CancellationToken::new())
            .await
            .unwrap();

        match outcome {
            ExecutionOutcome::Completed { context } => {
                assert!(context.node_outputs.contains_key("out"));
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn conditional_false_branch_marks_sibling_unreachable() {
        let def = RawWorkflowDefinition {
            id: Uuid::new_v4(),
            name: "branching".into(),
            nodes: vec![
                node("trigger", NodeType::Input),
                node("cond", NodeType::Conditional),
                node("left", NodeType::Output),
                node("right", NodeType::Output),
            ],
            edges: vec![
                edge("e0", "trigger", "cond", HandleType::Default),
                edge("e1", "cond", "left", HandleType::True),
                edge("e2", "cond", "right", HandleType::False),
            ],
            loops: vec![],
            max_concurrent_nodes: 10,
            trigger: crate::model::TriggerKind::Manual,
        };
        let workflow = builder::build(def).unwrap();

        let mut registry = NodeRegistry::new();
        registry.register(NodeType::Input, Arc::new(EchoNode));
        registry.register(NodeType::Conditional, Arc::new(ConditionalNode(false)));
        registry.register(NodeType::Output, Arc::new(EchoNode));

        let scheduler = scheduler_with(registry, 1_000);
        let outcome = scheduler
            .execute(&workflow, Uuid::new_v4(), HashMap::new(), CancellationToken::new())
            .await
            .unwrap();

        match outcome {
            ExecutionOutcome::Completed { context } => {
                assert!(!context.node_outputs.contains_key("left"));
                assert!(context.node_outputs.contains_key("right"));
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fatal_node_failure_yields_failed_outcome() {
        let def = RawWorkflowDefinition {
            id: Uuid::new_v4(),
            name: "failing".into(),
            nodes: vec![node("trigger", NodeType::Input), node("boom", NodeType::Http), node("out", NodeType::Output)],
            edges: vec![
                edge("e1", "trigger", "boom", HandleType::Default),
                edge("e2", "boom", "out", HandleType::Default),
            ],
            loops: vec![],
            max_concurrent_nodes: 10,
            trigger: crate::model::TriggerKind::Manual,
        };
        let workflow = builder::build(def).unwrap();

        let mut registry = NodeRegistry::new();
        registry.register(NodeType::Input, Arc::new(EchoNode));
        registry.register(NodeType::Http, Arc::new(AlwaysFails));
        registry.register(NodeType::Output, Arc::new(EchoNode));

        let scheduler = scheduler_with(registry, 1_000);
        let outcome = scheduler
            .execute(&workflow, Uuid::new_v4(), HashMap::new(), CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(outcome, ExecutionOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn insufficient_reservation_rejects_execution_up_front() {
        let def = RawWorkflowDefinition {
            id: Uuid::new_v4(),
            name: "expensive".into(),
            nodes: vec![node("trigger", NodeType::Input), node("llm", NodeType::Llm)],
            edges: vec![edge("e1", "trigger", "llm", HandleType::Default)],
            loops: vec![],
            max_concurrent_nodes: 10,
            trigger: crate::model::TriggerKind::Manual,
        };
        let workflow = builder::build(def).unwrap();
        let mut registry = NodeRegistry::new();
        registry.register(NodeType::Input, Arc::new(EchoNode));
        registry.register(NodeType::Llm, Arc::new(LlmNode));

        let scheduler = scheduler_with(registry, 1);
        let err = scheduler
            .execute(&workflow, Uuid::new_v4(), HashMap::new(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientCredits { .. }));
    }

    #[tokio::test]
    async fn loop_node_runs_body_for_every_iteration() {
        let def = RawWorkflowDefinition {
            id: Uuid::new_v4(),
            name: "looping".into(),
            nodes: vec![
                node("trigger", NodeType::Input),
                node("loop", NodeType::Loop),
                node("body1", NodeType::Transform),
                node("out", NodeType::Output),
            ],
            edges: vec![
                edge("e1", "trigger", "loop", HandleType::Default),
                edge("e2", "loop", "body1", HandleType::Default),
                edge("e3", "body1", "loop", HandleType::Default),
                edge("e4", "loop", "out", HandleType::Default),
            ],
            loops: vec![RawLoopConfig {
                loop_node_id: "loop".into(),
                body_node_ids: vec!["body1".into()],
                max_iterations: 3,
                iteration_variable: "i".into(),
            }],
            max_concurrent_nodes: 10,
            trigger: crate::model::TriggerKind::Manual,
        };
        let workflow = builder::build(def).unwrap();

        let mut registry = NodeRegistry::new();
        registry.register(NodeType::Input, Arc::new(EchoNode));
        registry.register(NodeType::Loop, Arc::new(EchoNode));
        registry.register(NodeType::Transform, Arc::new(EchoNode));
        registry.register(NodeType::Output, Arc::new(EchoNode));

        let scheduler = scheduler_with(registry, 1_000);
        let outcome = scheduler
            .execute(&workflow, Uuid::new_v4(), HashMap::new(), CancellationToken::new())
            .await
            .unwrap();

        match outcome {
            ExecutionOutcome::Completed { context } => {
                assert!(context.node_outputs.contains_key("body1#0"));
                assert!(context.node_outputs.contains_key("body1#1"));
                assert!(context.node_outputs.contains_key("body1#2"));
                assert!(context.node_outputs.contains_key("out"));
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_skips_remaining_nodes() {
        let def = RawWorkflowDefinition {
            id: Uuid::new_v4(),
            name: "cancel-me".into(),
            nodes: vec![node("trigger", NodeType::Input), node("t", NodeType::Transform)],
            edges: vec![edge("e1", "trigger", "t", HandleType::Default)],
            loops: vec![],
            max_concurrent_nodes: 10,
            trigger: crate::model::TriggerKind::Manual,
        };
        let workflow = builder::build(def).unwrap();
        let mut registry = NodeRegistry::new();
        registry.register(NodeType::Input, Arc::new(EchoNode));
        registry.register(NodeType::Transform, Arc::new(EchoNode));

        let scheduler = scheduler_with(registry, 1_000);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = scheduler.execute(&workflow, Uuid::new_v4(), HashMap::new(), cancel).await.unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Cancelled { .. }));
    }

    struct WaitForUserNode;

    #[async_trait]
    impl ExecuteNode for WaitForUserNode {
        async fn execute(&self, _request: NodeRequest) -> Result<NodeOutput, NodeError> {
            Ok(NodeOutput {
                value: json!({ "waiting": true }),
                signal: Signal::Pause(
                    crate::executor::PauseRequest::new("awaiting approval")
                        .with_preserved_data(json!({ "variableName": "approval" })),
                ),
                token_usage: None,
            })
        }
    }

    #[tokio::test]
    async fn pause_then_resume_completes_without_rerunning_prior_nodes() {
        let def = RawWorkflowDefinition {
            id: Uuid::new_v4(),
            name: "pausing".into(),
            nodes: vec![
                node("trigger", NodeType::Input),
                node("wait", NodeType::WaitForUser),
                node("process", NodeType::Transform),
                node("out", NodeType::Output),
            ],
            edges: vec![
                edge("e1", "trigger", "wait", HandleType::Default),
                edge("e2", "wait", "process", HandleType::Default),
                edge("e3", "process", "out", HandleType::Default),
            ],
            loops: vec![],
            max_concurrent_nodes: 10,
            trigger: crate::model::TriggerKind::Manual,
        };
        let workflow = builder::build(def).unwrap();

        let mut registry = NodeRegistry::new();
        registry.register(NodeType::Input, Arc::new(EchoNode));
        registry.register(NodeType::WaitForUser, Arc::new(WaitForUserNode));
        registry.register(NodeType::Transform, Arc::new(EchoNode));
        registry.register(NodeType::Output, Arc::new(EchoNode));

        let scheduler = scheduler_with(registry, 1_000);
        let execution_id = Uuid::new_v4();
        let outcome = scheduler
            .execute(&workflow, execution_id, HashMap::new(), CancellationToken::new())
            .await
            .unwrap();

        let snapshot = match outcome {
            ExecutionOutcome::Paused { snapshot } => *snapshot,
            other => panic!("expected Paused, got {other:?}"),
        };
        assert_eq!(snapshot.pause_context.node_id, "wait");
        assert_eq!(snapshot.pause_context.reason, "awaiting approval");
        assert!(snapshot.context.node_outputs.contains_key("wait"));
        assert!(!snapshot.context.node_outputs.contains_key("process"));

        let resume_inputs = HashMap::from([("approval".to_string(), json!("yes"))]);
        let outcome = scheduler
            .resume(&workflow, snapshot, resume_inputs, CancellationToken::new())
            .await
            .unwrap();

        match outcome {
            ExecutionOutcome::Completed { context } => {
                // `wait` was never re-dispatched: its recorded output is
                // exactly what the first run produced, not a second call.
                assert_eq!(context.node_outputs["wait"], json!({ "waiting": true }));
                assert_eq!(context.inputs["approval"], json!("yes"));
                assert!(context.node_outputs.contains_key("out"));
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }
}
