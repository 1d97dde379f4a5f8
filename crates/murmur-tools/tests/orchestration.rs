//! End-to-end orchestration scenarios: a scripted provider drives the
//! agent loop against the real tool set, and the observable outbound
//! traffic is asserted.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use murmur_core::approval::ApprovalService;
use murmur_core::agent::runs::RunRegistry;
use murmur_core::bus::MessageBus;
use murmur_core::orchestrator::{Orchestrator, OrchestratorRequest};
use murmur_core::session::SessionRecorder;
use murmur_core::stores::{MemorySessionStore, MemoryTaskStore};
use murmur_core::tools::registry::{ApprovalSink, ToolRegistry};
use murmur_core::vault::MemoryVault;
use murmur_llm::error::Result as LlmResult;
use murmur_llm::provider::ChatProvider;
use murmur_llm::types::{ChatRequest, ChatResponse, ToolCall};
use murmur_tools::exec_tool::ExecTool;
use murmur_tools::request_file_tool::RequestFileTool;
use murmur_types::config::Config;
use murmur_types::event::MessageKind;

/// Provider playing back scripted responses and recording each request's
/// final user message.
struct ScriptedProvider {
    responses: Mutex<Vec<ChatResponse>>,
    user_messages: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<ChatResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses),
            user_messages: Mutex::new(Vec::new()),
        })
    }

    fn seen_user_messages(&self) -> Vec<String> {
        self.user_messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, request: ChatRequest) -> LlmResult<ChatResponse> {
        if let Some(last) = request.messages.iter().rev().find(|m| m.role == "user") {
            self.user_messages.lock().unwrap().push(last.content.clone());
        }
        let mut responses = self.responses.lock().unwrap();
        Ok(if responses.is_empty() {
            ChatResponse::text("exhausted")
        } else {
            responses.remove(0)
        })
    }
}

struct Harness {
    bus: Arc<MessageBus>,
    orchestrator: Arc<Orchestrator>,
    approvals: Arc<ApprovalService>,
    workspace: PathBuf,
}

async fn harness(provider: Arc<ScriptedProvider>) -> Harness {
    let workspace = std::env::temp_dir().join(format!("murmur-e2e-{}", uuid::Uuid::new_v4()));
    tokio::fs::create_dir_all(&workspace).await.unwrap();

    let mut config = Config::default();
    config.workspace_dir = workspace.clone();
    config.loops.executor_provider = "scripted".into();
    config.streaming.enabled = false;

    let bus = MessageBus::new();
    let tools = Arc::new(ToolRegistry::new());
    let approvals = ApprovalService::new(bus.clone());
    tools
        .set_approval_sink(approvals.clone() as Arc<dyn ApprovalSink>)
        .await;
    approvals.attach_tools(tools.clone());

    tools.register(Arc::new(ExecTool::new(workspace.clone()))).await;
    tools
        .register(Arc::new(RequestFileTool::new(bus.clone())))
        .await;

    let recorder = Arc::new(SessionRecorder::new(
        Arc::new(MemorySessionStore::default()),
        None,
    ));

    let mut providers: HashMap<String, Arc<dyn ChatProvider>> = HashMap::new();
    providers.insert("scripted".into(), provider);

    let orchestrator = Orchestrator::new(
        config,
        bus.clone(),
        Arc::new(MemoryVault::new()),
        recorder,
        tools,
        approvals.clone(),
        Arc::new(MemoryTaskStore::default()),
        Arc::new(RunRegistry::new()),
        providers,
    );

    Harness {
        bus,
        orchestrator,
        approvals,
        workspace,
    }
}

fn request(text: &str) -> OrchestratorRequest {
    OrchestratorRequest {
        provider: "slack".into(),
        chat_id: "C1".into(),
        thread_id: None,
        sender_id: "U1".into(),
        alias: "claude".into(),
        text: text.into(),
        trigger_message_id: Some("m-1".into()),
        thread_context: Vec::new(),
        from_cron: false,
    }
}

#[tokio::test]
async fn exec_path_produces_single_reply_with_command_output() {
    let provider = ScriptedProvider::new(vec![
        ChatResponse::with_tool_calls(vec![ToolCall::function(
            "call_1",
            "exec",
            serde_json::json!({"command": "echo JUST_BASH_OK"}),
        )]),
        ChatResponse::text("JUST_BASH_OK 확인했습니다"),
    ]);
    let h = harness(provider.clone()).await;

    let reply = h.orchestrator.handle(request("just-bash 경로 테스트")).await;

    assert!(reply.error.is_none(), "{:?}", reply.error);
    assert!(!reply.suppress_reply);
    assert!(reply.reply.to_uppercase().contains("JUST_BASH_OK"));

    // The tool genuinely ran: its transcript reached the second turn.
    let messages = provider.seen_user_messages();
    assert_eq!(messages.len(), 2);
    assert!(messages[1].contains("[tool:exec]"));
    assert!(messages[1].contains("JUST_BASH_OK"));

    // No stray outbound traffic (streaming off, tool is not gated).
    assert!(
        h.bus
            .consume_outbound(Some(Duration::from_millis(50)))
            .await
            .is_none()
    );

    let _ = tokio::fs::remove_dir_all(&h.workspace).await;
}

#[tokio::test]
async fn file_request_emits_file_request_and_suppresses_reply() {
    let provider = ScriptedProvider::new(vec![
        ChatResponse::with_tool_calls(vec![ToolCall::function(
            "call_1",
            "request_file",
            serde_json::json!({"prompt": "PDF 첨부해 주세요", "accept": ["pdf"]}),
        )]),
        ChatResponse::text("첨부를 기다리고 있겠습니다"),
    ]);
    let h = harness(provider).await;

    let reply = h.orchestrator.handle(request("파일 첨부 요청해줘")).await;

    // The normal reply is suppressed; the file request stands alone.
    assert!(reply.suppress_reply);

    let out = h
        .bus
        .consume_outbound(Some(Duration::from_millis(100)))
        .await
        .expect("file_request outbound expected");
    assert_eq!(out.metadata.kind, Some(MessageKind::FileRequest));
    assert!(out.content.to_uppercase().contains("[FILE_REQUEST"));

    assert!(
        h.bus
            .consume_outbound(Some(Duration::from_millis(50)))
            .await
            .is_none(),
        "no agent_reply may follow the file request"
    );

    let _ = tokio::fs::remove_dir_all(&h.workspace).await;
}

#[tokio::test]
async fn task_mode_file_request_suppresses_reply_too() {
    let provider = ScriptedProvider::new(vec![
        ChatResponse::with_tool_calls(vec![ToolCall::function(
            "call_1",
            "request_file",
            serde_json::json!({"prompt": "계약서 첨부해 주세요", "accept": ["pdf"]}),
        )]),
        ChatResponse::text("첨부를 기다리고 있겠습니다"),
    ]);
    let h = harness(provider).await;

    // "워크플로" routes this request through the task loop.
    let reply = h
        .orchestrator
        .handle(request("워크플로로 계약서 파일 받아줘"))
        .await;

    assert!(reply.suppress_reply, "task mode must honor the quiet flag");
    assert!(reply.error.is_none());

    let out = h
        .bus
        .consume_outbound(Some(Duration::from_millis(100)))
        .await
        .expect("file_request outbound expected");
    assert_eq!(out.metadata.kind, Some(MessageKind::FileRequest));
    assert!(out.content.to_uppercase().contains("[FILE_REQUEST"));

    assert!(
        h.bus
            .consume_outbound(Some(Duration::from_millis(50)))
            .await
            .is_none(),
        "the tool's outbound must be the only message for this run"
    );

    let _ = tokio::fs::remove_dir_all(&h.workspace).await;
}

#[tokio::test]
async fn approval_cycle_executes_tool_after_consent() {
    let provider = ScriptedProvider::new(vec![
        ChatResponse::with_tool_calls(vec![ToolCall::function(
            "call_1",
            "exec",
            serde_json::json!({"command": "echo APPROVED_OK > approval-ok.txt"}),
        )]),
        ChatResponse::text("승인이 필요한 작업을 요청해두었습니다"),
    ]);
    let h = harness(provider).await;

    let reply = h.orchestrator.handle(request("파일 쓰기 작업 실행해줘")).await;
    assert!(reply.error.is_none());

    // The gated call produced an approval request instead of running.
    let out = h
        .bus
        .consume_outbound(Some(Duration::from_millis(100)))
        .await
        .expect("approval_request outbound expected");
    assert_eq!(out.metadata.kind, Some(MessageKind::ApprovalRequest));
    let request_id = out
        .content
        .split("request_id:")
        .nth(1)
        .map(|s| s.trim().to_owned())
        .expect("request id embedded in message");

    assert!(
        !h.workspace.join("approval-ok.txt").exists(),
        "file must not exist before the decision"
    );

    // Human replies with a decision token.
    let consumed = h
        .approvals
        .handle_reply("slack", "C1", &format!("✅ request_id:{request_id}"))
        .await;
    assert!(consumed);

    let result = h
        .bus
        .consume_outbound(Some(Duration::from_millis(100)))
        .await
        .expect("approval_result outbound expected");
    assert_eq!(result.metadata.kind, Some(MessageKind::ApprovalResult));
    assert!(result.content.contains("승인 반영 완료"));

    let written = tokio::fs::read_to_string(h.workspace.join("approval-ok.txt"))
        .await
        .expect("approved command wrote the file");
    assert!(written.contains("APPROVED_OK"));

    let _ = tokio::fs::remove_dir_all(&h.workspace).await;
}

#[tokio::test]
async fn denied_request_never_runs_the_tool() {
    let provider = ScriptedProvider::new(vec![
        ChatResponse::with_tool_calls(vec![ToolCall::function(
            "call_1",
            "exec",
            serde_json::json!({"command": "echo NOPE > denied.txt"}),
        )]),
        ChatResponse::text("요청해두었습니다"),
    ]);
    let h = harness(provider).await;

    h.orchestrator.handle(request("위험한 작업 해줘")).await;
    let out = h
        .bus
        .consume_outbound(Some(Duration::from_millis(100)))
        .await
        .unwrap();
    let request_id = out.content.split("request_id:").nth(1).unwrap().trim();

    h.approvals
        .handle_reply("slack", "C1", &format!("❌ request_id:{request_id}"))
        .await;

    let result = h
        .bus
        .consume_outbound(Some(Duration::from_millis(100)))
        .await
        .unwrap();
    assert!(result.content.contains("거절"));
    assert!(!h.workspace.join("denied.txt").exists());

    let _ = tokio::fs::remove_dir_all(&h.workspace).await;
}

#[tokio::test]
async fn secret_placeholder_blocks_execution() {
    let provider = ScriptedProvider::new(vec![ChatResponse::text("should never run")]);
    let h = harness(provider.clone()).await;

    let reply = h
        .orchestrator
        .handle(request("deploy with {{secret:prod_key}}"))
        .await;

    assert_eq!(reply.error.as_deref(), Some("secret_resolution"));
    assert!(reply.reply.contains("prod_key"));
    assert!(
        provider.seen_user_messages().is_empty(),
        "the provider must never be invoked"
    );

    let _ = tokio::fs::remove_dir_all(&h.workspace).await;
}
