//! Slash-command router.
//!
//! An ordered list of handlers; the first whose `can_handle` accepts the
//! command wins. Replies are rendered through the chat's render profile
//! and capped before publishing as `command_reply` messages.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tracing::{debug, info};

use murmur_types::cron::{CronJob, CronPayload, CronSchedule, PayloadKind};
use murmur_types::event::{MessageKind, OutboundMessage};
use murmur_types::render::{BlockedPolicy, RenderMode};

use crate::agent::runs::RunRegistry;
use crate::bus::MessageBus;
use crate::render::{RenderProfiles, cap_reply, render_text};
use crate::stores::{DecisionRecord, DecisionStore, MemoryStore, PromiseRecord, PromiseStore};
use crate::tools::registry::ToolRegistry;
use crate::vault::SecretVault;

/// A parsed slash command in its conversation context.
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// Provider the command arrived on.
    pub provider: String,
    /// Chat it arrived in.
    pub chat_id: String,
    /// Sender id.
    pub sender_id: String,
    /// Command name without the slash, lowercased.
    pub name: String,
    /// Argument tail, original casing.
    pub args: String,
}

impl CommandContext {
    /// Parse `/name args` out of message text. `None` when the text is
    /// not a slash command.
    pub fn parse(provider: &str, chat_id: &str, sender_id: &str, text: &str) -> Option<Self> {
        let trimmed = text.trim();
        let rest = trimmed.strip_prefix('/')?;
        if rest.is_empty() || rest.starts_with(|c: char| c.is_whitespace() || c == '/') {
            return None;
        }
        let (name, args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (rest, ""),
        };
        Some(Self {
            provider: provider.to_owned(),
            chat_id: chat_id.to_owned(),
            sender_id: sender_id.to_owned(),
            name: name.to_lowercase(),
            args: args.to_owned(),
        })
    }
}

/// One command handler.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Names this handler answers to.
    fn names(&self) -> &[&str];

    /// One-line usage string for the help catalogue.
    fn usage(&self) -> &str;

    /// Whether this handler takes the command.
    fn can_handle(&self, ctx: &CommandContext) -> bool {
        self.names().contains(&ctx.name.as_str())
    }

    /// Handle the command; `None` passes it to the next handler.
    async fn handle(&self, ctx: &CommandContext) -> Option<String>;
}

/// Cron operations the command surface needs; implemented by the cron
/// service.
#[async_trait]
pub trait CronControl: Send + Sync {
    /// Create a job; returns its id.
    async fn add(
        &self,
        name: String,
        schedule: CronSchedule,
        payload: CronPayload,
        delete_after_run: bool,
    ) -> Result<String, String>;

    /// Remove a job by id. Returns whether it existed.
    async fn remove(&self, id: &str) -> bool;

    /// All registered jobs.
    async fn list(&self) -> Vec<CronJob>;
}

/// Reload hook for config / tools / skills; implemented at the wiring
/// layer.
#[async_trait]
pub trait Reloader: Send + Sync {
    /// Perform the reload, returning a human-readable count summary.
    async fn reload(&self) -> String;
}

/// The ordered command router.
pub struct CommandRouter {
    bus: Arc<MessageBus>,
    profiles: Arc<RenderProfiles>,
    handlers: Vec<Arc<dyn CommandHandler>>,
}

impl CommandRouter {
    /// Create a router with an explicit handler order.
    pub fn new(
        bus: Arc<MessageBus>,
        profiles: Arc<RenderProfiles>,
        handlers: Vec<Arc<dyn CommandHandler>>,
    ) -> Self {
        Self {
            bus,
            profiles,
            handlers,
        }
    }

    /// Handler usage lines, in routing order.
    pub fn catalogue(&self) -> Vec<String> {
        self.handlers
            .iter()
            .map(|h| h.usage().to_owned())
            .collect()
    }

    /// Try to route `text` as a slash command. Returns whether it was
    /// consumed.
    pub async fn dispatch(
        &self,
        provider: &str,
        chat_id: &str,
        sender_id: &str,
        text: &str,
        trigger_message_id: Option<&str>,
    ) -> bool {
        let Some(ctx) = CommandContext::parse(provider, chat_id, sender_id, text) else {
            return false;
        };
        debug!(command = %ctx.name, chat_id, "routing slash command");

        for handler in &self.handlers {
            if !handler.can_handle(&ctx) {
                continue;
            }
            if let Some(reply) = handler.handle(&ctx).await {
                let profile = self.profiles.get(provider, chat_id);
                let rendered = cap_reply(&render_text(&reply, &profile));
                let mut msg = OutboundMessage::new(
                    provider,
                    chat_id,
                    rendered,
                    MessageKind::CommandReply,
                );
                msg.metadata.trigger_message_id = trigger_message_id.map(String::from);
                self.bus.publish_outbound(msg);
                info!(command = %ctx.name, "command handled");
                return true;
            }
        }
        false
    }
}

// ---------------------------------------------------------------------------
// Built-in handlers
// ---------------------------------------------------------------------------

/// `/help` -- render the catalogue.
pub struct HelpHandler {
    lines: Vec<String>,
}

impl HelpHandler {
    /// Build from the usage lines of every routed handler.
    pub fn new(lines: Vec<String>) -> Self {
        Self { lines }
    }
}

#[async_trait]
impl CommandHandler for HelpHandler {
    fn names(&self) -> &[&str] {
        &["help"]
    }
    fn usage(&self) -> &str {
        "/help — 사용 가능한 명령을 보여줍니다"
    }
    async fn handle(&self, _ctx: &CommandContext) -> Option<String> {
        Some(format!("📒 명령 목록\n{}", self.lines.join("\n")))
    }
}

/// `/stop` -- cancel every active run in this chat.
pub struct StopHandler {
    runs: Arc<RunRegistry>,
}

impl StopHandler {
    pub fn new(runs: Arc<RunRegistry>) -> Self {
        Self { runs }
    }
}

#[async_trait]
impl CommandHandler for StopHandler {
    fn names(&self) -> &[&str] {
        &["stop", "cancel", "중지"]
    }
    fn usage(&self) -> &str {
        "/stop — 이 채팅의 실행 중인 작업을 모두 중지합니다"
    }
    async fn handle(&self, ctx: &CommandContext) -> Option<String> {
        let cancelled = self.runs.cancel_chat(&ctx.provider, &ctx.chat_id);
        Some(if cancelled == 0 {
            "실행 중인 작업이 없습니다.".into()
        } else {
            format!("🛑 {cancelled}개의 작업을 중지했습니다.")
        })
    }
}

/// `/render` -- read or update this chat's render profile.
pub struct RenderHandler {
    profiles: Arc<RenderProfiles>,
}

impl RenderHandler {
    pub fn new(profiles: Arc<RenderProfiles>) -> Self {
        Self { profiles }
    }
}

#[async_trait]
impl CommandHandler for RenderHandler {
    fn names(&self) -> &[&str] {
        &["render"]
    }
    fn usage(&self) -> &str {
        "/render [mode|links|images <value>] — 채팅 렌더링 설정"
    }
    async fn handle(&self, ctx: &CommandContext) -> Option<String> {
        let mut parts = ctx.args.split_whitespace();
        match (parts.next(), parts.next()) {
            (None, _) => {
                let p = self.profiles.get(&ctx.provider, &ctx.chat_id);
                Some(format!(
                    "🎨 mode={:?}, links={:?}, images={:?}",
                    p.mode, p.blocked_link_policy, p.blocked_image_policy
                ))
            }
            (Some("mode"), Some(value)) => match RenderMode::parse(value) {
                Some(mode) => {
                    self.profiles
                        .update(&ctx.provider, &ctx.chat_id, |p| p.mode = mode);
                    Some(format!("🎨 mode={mode:?}"))
                }
                None => Some("지원하지 않는 모드입니다: markdown | html | plain".into()),
            },
            (Some("links"), Some(value)) => match BlockedPolicy::parse(value) {
                Some(policy) => {
                    self.profiles
                        .update(&ctx.provider, &ctx.chat_id, |p| p.blocked_link_policy = policy);
                    Some(format!("🎨 links={policy:?}"))
                }
                None => Some("정책: indicator | text | remove".into()),
            },
            (Some("images"), Some(value)) => match BlockedPolicy::parse(value) {
                Some(policy) => {
                    self.profiles.update(&ctx.provider, &ctx.chat_id, |p| {
                        p.blocked_image_policy = policy
                    });
                    Some(format!("🎨 images={policy:?}"))
                }
                None => Some("정책: indicator | text | remove".into()),
            },
            _ => Some("사용법: /render [mode|links|images <value>]".into()),
        }
    }
}

/// `/secret` -- vault operations.
pub struct SecretHandler {
    vault: Arc<dyn SecretVault>,
}

impl SecretHandler {
    pub fn new(vault: Arc<dyn SecretVault>) -> Self {
        Self { vault }
    }
}

#[async_trait]
impl CommandHandler for SecretHandler {
    fn names(&self) -> &[&str] {
        &["secret"]
    }
    fn usage(&self) -> &str {
        "/secret list|set|get|reveal|remove|encrypt|decrypt — 시크릿 볼트"
    }
    async fn handle(&self, ctx: &CommandContext) -> Option<String> {
        let (action, rest) = match ctx.args.split_once(char::is_whitespace) {
            Some((action, rest)) => (action, rest.trim()),
            None => (ctx.args.as_str(), ""),
        };
        match action {
            "" | "list" | "status" => {
                let names = self.vault.list().await;
                Some(if names.is_empty() {
                    "🔐 저장된 시크릿이 없습니다.".into()
                } else {
                    format!("🔐 {}개: {}", names.len(), names.join(", "))
                })
            }
            "set" => match rest.split_once(char::is_whitespace) {
                Some((name, value)) => {
                    self.vault.set(name, value.trim()).await;
                    Some(format!("🔐 `{name}` 저장 완료"))
                }
                None => Some("사용법: /secret set <name> <value>".into()),
            },
            "get" => {
                let name = rest;
                Some(match self.vault.get(name).await {
                    Some(_) => format!("🔐 `{name}` = ***"),
                    None => format!("🔐 `{name}` 없음"),
                })
            }
            "reveal" => {
                let name = rest;
                Some(match self.vault.get(name).await {
                    Some(value) => format!("🔐 `{name}` = {value}"),
                    None => format!("🔐 `{name}` 없음"),
                })
            }
            "remove" => {
                let removed = self.vault.remove(rest).await;
                Some(if removed {
                    format!("🔐 `{rest}` 삭제 완료")
                } else {
                    format!("🔐 `{rest}` 없음")
                })
            }
            "encrypt" => Some(self.vault.encrypt(rest).await),
            "decrypt" => Some(match self.vault.decrypt(rest).await {
                Some(plain) => plain,
                None => "해석할 수 없는 암호문입니다.".into(),
            }),
            _ => Some("사용법: /secret list|set|get|reveal|remove|encrypt|decrypt".into()),
        }
    }
}

/// `/memory` -- memory status and search.
pub struct MemoryHandler {
    memory: Arc<dyn MemoryStore>,
}

impl MemoryHandler {
    pub fn new(memory: Arc<dyn MemoryStore>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl CommandHandler for MemoryHandler {
    fn names(&self) -> &[&str] {
        &["memory"]
    }
    fn usage(&self) -> &str {
        "/memory status|search <query> — 메모리 조회"
    }
    async fn handle(&self, ctx: &CommandContext) -> Option<String> {
        let (action, rest) = match ctx.args.split_once(char::is_whitespace) {
            Some((action, rest)) => (action, rest.trim()),
            None => (ctx.args.as_str(), ""),
        };
        match action {
            "" | "status" => {
                let longterm = self.memory.read_longterm().await.unwrap_or_default();
                let today = Utc::now().format("%Y-%m-%d").to_string();
                let daily = self.memory.read_daily(&today).await.unwrap_or_default();
                Some(format!(
                    "🧠 장기 기억 {}자 / 오늘 기록 {}줄",
                    longterm.chars().count(),
                    daily.lines().count()
                ))
            }
            "search" => {
                let hits = self.memory.search(rest, 10).await.unwrap_or_default();
                Some(if hits.is_empty() {
                    format!("🧠 `{rest}` 검색 결과 없음")
                } else {
                    format!("🧠 검색 결과\n{}", hits.join("\n"))
                })
            }
            _ => Some("사용법: /memory status|search <query>".into()),
        }
    }
}

/// `/decision` -- standing decisions.
pub struct DecisionHandler {
    decisions: Arc<dyn DecisionStore>,
}

impl DecisionHandler {
    pub fn new(decisions: Arc<dyn DecisionStore>) -> Self {
        Self { decisions }
    }
}

#[async_trait]
impl CommandHandler for DecisionHandler {
    fn names(&self) -> &[&str] {
        &["decision"]
    }
    fn usage(&self) -> &str {
        "/decision set <name> <priority> <text>|status|list — 운영 결정"
    }
    async fn handle(&self, ctx: &CommandContext) -> Option<String> {
        let mut parts = ctx.args.splitn(2, char::is_whitespace);
        let action = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("").trim();
        match action {
            "set" => {
                let mut fields = rest.splitn(3, char::is_whitespace);
                let usage = "사용법: /decision set <name> <priority> <text>";
                let Some(name) = fields.next().filter(|n| !n.is_empty()) else {
                    return Some(usage.into());
                };
                let Some(priority) = fields.next().and_then(|p| p.parse::<i32>().ok()) else {
                    return Some(usage.into());
                };
                let value = fields.next().unwrap_or("").trim();
                if value.is_empty() {
                    return Some(usage.into());
                }
                let record = DecisionRecord {
                    name: name.to_owned(),
                    value: value.to_owned(),
                    priority,
                    at: Utc::now(),
                };
                if self.decisions.set(record).await.is_err() {
                    return Some("결정을 저장하지 못했습니다.".into());
                }
                Some(format!("📌 결정 `{name}` (우선순위 {priority}) 저장"))
            }
            "" | "status" | "list" => {
                let list = self.decisions.list().await.unwrap_or_default();
                Some(if list.is_empty() {
                    "📌 등록된 결정이 없습니다.".into()
                } else {
                    let lines: Vec<String> = list
                        .iter()
                        .map(|d| format!("{}. [{}] {}", d.priority, d.name, d.value))
                        .collect();
                    format!("📌 결정 목록\n{}", lines.join("\n"))
                })
            }
            _ => Some("사용법: /decision set|status|list".into()),
        }
    }
}

/// `/promise` -- the promise ledger.
pub struct PromiseHandler {
    promises: Arc<dyn PromiseStore>,
}

impl PromiseHandler {
    pub fn new(promises: Arc<dyn PromiseStore>) -> Self {
        Self { promises }
    }
}

#[async_trait]
impl CommandHandler for PromiseHandler {
    fn names(&self) -> &[&str] {
        &["promise"]
    }
    fn usage(&self) -> &str {
        "/promise create <text>|list — 약속 관리"
    }
    async fn handle(&self, ctx: &CommandContext) -> Option<String> {
        let (action, rest) = match ctx.args.split_once(char::is_whitespace) {
            Some((action, rest)) => (action, rest.trim()),
            None => (ctx.args.as_str(), ""),
        };
        match action {
            "create" if !rest.is_empty() => {
                let record = PromiseRecord {
                    id: format!("promise-{}", uuid::Uuid::new_v4()),
                    text: rest.to_owned(),
                    to: ctx.sender_id.clone(),
                    at: Utc::now(),
                    done: false,
                };
                if self.promises.add(record).await.is_err() {
                    return Some("약속을 저장하지 못했습니다.".into());
                }
                Some(format!("🤝 약속 등록: {rest}"))
            }
            "" | "list" => {
                let list = self.promises.list().await.unwrap_or_default();
                Some(if list.is_empty() {
                    "🤝 등록된 약속이 없습니다.".into()
                } else {
                    let lines: Vec<String> = list
                        .iter()
                        .map(|p| {
                            format!(
                                "{} {} (to {})",
                                if p.done { "✅" } else { "⬜" },
                                p.text,
                                p.to
                            )
                        })
                        .collect();
                    format!("🤝 약속 목록\n{}", lines.join("\n"))
                })
            }
            _ => Some("사용법: /promise create <text>|list".into()),
        }
    }
}

/// `/cron` -- scheduled jobs.
pub struct CronHandler {
    control: Arc<dyn CronControl>,
}

impl CronHandler {
    pub fn new(control: Arc<dyn CronControl>) -> Self {
        Self { control }
    }
}

#[async_trait]
impl CommandHandler for CronHandler {
    fn names(&self) -> &[&str] {
        &["cron"]
    }
    fn usage(&self) -> &str {
        "/cron status|list|add <spec>|remove <id> — 예약 작업"
    }
    async fn handle(&self, ctx: &CommandContext) -> Option<String> {
        let (action, rest) = match ctx.args.split_once(char::is_whitespace) {
            Some((action, rest)) => (action, rest.trim()),
            None => (ctx.args.as_str(), ""),
        };
        match action {
            "" | "status" | "list" => {
                let jobs = self.control.list().await;
                Some(if jobs.is_empty() {
                    "⏰ 등록된 작업이 없습니다.".into()
                } else {
                    let lines: Vec<String> = jobs
                        .iter()
                        .map(|j| {
                            format!(
                                "{} `{}` {} next={}",
                                if j.enabled { "🟢" } else { "⚪" },
                                j.id,
                                j.name,
                                j.state
                                    .next_run_at_ms
                                    .and_then(format_ms)
                                    .unwrap_or_else(|| "-".into()),
                            )
                        })
                        .collect();
                    format!("⏰ 작업 {}개\n{}", jobs.len(), lines.join("\n"))
                })
            }
            "add" => {
                let now_ms = Utc::now().timestamp_millis();
                let Some((schedule, message)) = parse_schedule_spec(rest, now_ms) else {
                    return Some(
                        "사용법: /cron add every <dur>|at <iso>|cron <5 fields> [tz <name>] <message> 또는 `N분 후 …`"
                            .into(),
                    );
                };
                let one_shot = schedule.kind == murmur_types::cron::ScheduleKind::At;
                let payload = CronPayload {
                    kind: PayloadKind::AgentTurn,
                    message: message.clone(),
                    deliver: true,
                    channel: Some(ctx.provider.clone()),
                    to: Some(ctx.chat_id.clone()),
                };
                match self
                    .control
                    .add(message, schedule, payload, one_shot)
                    .await
                {
                    Ok(id) => Some(format!("⏰ 작업 등록: `{id}`")),
                    Err(e) => Some(format!("⏰ 등록 실패: {e}")),
                }
            }
            "remove" => Some(if self.control.remove(rest).await {
                format!("⏰ `{rest}` 삭제 완료")
            } else {
                format!("⏰ `{rest}` 없음")
            }),
            _ => Some("사용법: /cron status|list|add <spec>|remove <id>".into()),
        }
    }
}

/// `/reload` -- reload config, tools, skills.
pub struct ReloadHandler {
    reloader: Arc<dyn Reloader>,
}

impl ReloadHandler {
    pub fn new(reloader: Arc<dyn Reloader>) -> Self {
        Self { reloader }
    }
}

#[async_trait]
impl CommandHandler for ReloadHandler {
    fn names(&self) -> &[&str] {
        &["reload"]
    }
    fn usage(&self) -> &str {
        "/reload — 설정과 도구를 다시 불러옵니다"
    }
    async fn handle(&self, _ctx: &CommandContext) -> Option<String> {
        Some(self.reloader.reload().await)
    }
}

/// `/status` -- tools and providers.
pub struct StatusHandler {
    tools: Arc<ToolRegistry>,
    providers: Vec<String>,
}

impl StatusHandler {
    pub fn new(tools: Arc<ToolRegistry>, providers: Vec<String>) -> Self {
        Self { tools, providers }
    }
}

#[async_trait]
impl CommandHandler for StatusHandler {
    fn names(&self) -> &[&str] {
        &["status"]
    }
    fn usage(&self) -> &str {
        "/status — 도구와 채널 상태"
    }
    async fn handle(&self, _ctx: &CommandContext) -> Option<String> {
        let tools = self.tools.list().await;
        Some(format!(
            "🧰 도구 {}개: {}\n📡 채널: {}",
            tools.len(),
            tools.join(", "),
            self.providers.join(", ")
        ))
    }
}

// ---------------------------------------------------------------------------
// Schedule spec parsing
// ---------------------------------------------------------------------------

/// Parse a `/cron add` spec into a schedule and message.
///
/// Structured forms: `every <dur> <msg>`, `at <iso8601> <msg>`,
/// `cron <5 fields> [tz <name>] <msg>`. Natural-language forms:
/// `N분 후 <msg>`, `N시간 후 <msg>`, `오전/오후 H시 <msg>` (clock times
/// resolved in Asia/Seoul).
pub fn parse_schedule_spec(input: &str, now_ms: i64) -> Option<(CronSchedule, String)> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Some(rest) = input.strip_prefix("every ") {
        let (dur, message) = rest.split_once(char::is_whitespace)?;
        let ms = parse_duration_ms(dur)?;
        return Some((CronSchedule::every(ms), message.trim().to_owned()));
    }

    if let Some(rest) = input.strip_prefix("at ") {
        let (when, message) = rest.split_once(char::is_whitespace)?;
        let at = DateTime::parse_from_rfc3339(when).ok()?;
        return Some((
            CronSchedule::at(at.timestamp_millis()),
            message.trim().to_owned(),
        ));
    }

    if let Some(rest) = input.strip_prefix("cron ") {
        let tokens: Vec<&str> = rest.split_whitespace().collect();
        if tokens.len() < 6 {
            return None;
        }
        let expr = tokens[..5].join(" ");
        let (tz, message_tokens) = if tokens.get(5) == Some(&"tz") && tokens.len() >= 8 {
            (Some(tokens[6].to_string()), &tokens[7..])
        } else {
            (None, &tokens[5..])
        };
        if message_tokens.is_empty() {
            return None;
        }
        return Some((CronSchedule::cron(expr, tz), message_tokens.join(" ")));
    }

    // `N분 후 …` / `N시간 후 …`
    for (suffix, unit_ms) in [("분", 60_000i64), ("시간", 3_600_000i64)] {
        if let Some((head, tail)) = input.split_once(&format!("{suffix} 후"))
            && let Ok(n) = head.trim().parse::<i64>()
        {
            let message = tail.trim();
            if n > 0 && !message.is_empty() {
                return Some((
                    CronSchedule::at(now_ms + n * unit_ms),
                    message.to_owned(),
                ));
            }
        }
    }

    // `오전 H시 …` / `오후 H시 …` resolved against the Seoul clock.
    for (prefix, offset_hours) in [("오전", 0i64), ("오후", 12i64)] {
        if let Some(rest) = input.strip_prefix(prefix) {
            let rest = rest.trim_start();
            let (hour_str, tail) = rest.split_once('시')?;
            let hour: i64 = hour_str.trim().parse().ok()?;
            let message = tail.trim();
            if !(0..=12).contains(&hour) || message.is_empty() {
                return None;
            }
            let target_hour = (hour % 12) + offset_hours;
            return Some((
                CronSchedule::at(next_seoul_hour_ms(now_ms, target_hour)),
                message.to_owned(),
            ));
        }
    }

    None
}

/// Parse `90s`, `10m`, `2h`, `1h30m`, `10분`, `2시간` into milliseconds.
pub fn parse_duration_ms(s: &str) -> Option<i64> {
    let mut total = 0i64;
    let mut digits = String::new();
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let n: i64 = digits.parse().ok()?;
        digits.clear();
        let unit_ms = match c {
            's' => 1_000,
            'm' => 60_000,
            'h' => 3_600_000,
            'd' => 86_400_000,
            '분' => 60_000,
            '초' => 1_000,
            '시' => {
                // Accept 시간 as a two-char unit.
                if chars.peek() == Some(&'간') {
                    chars.next();
                }
                3_600_000
            }
            _ => return None,
        };
        total += n * unit_ms;
    }
    if !digits.is_empty() || total == 0 {
        return None;
    }
    Some(total)
}

/// The next occurrence of `hour:00` on the Seoul clock, in UTC millis.
fn next_seoul_hour_ms(now_ms: i64, hour: i64) -> i64 {
    let seoul_now = Utc
        .timestamp_millis_opt(now_ms)
        .single()
        .unwrap_or_else(Utc::now)
        + Duration::hours(9);
    let mut target = seoul_now
        .date_naive()
        .and_hms_opt(hour as u32 % 24, 0, 0)
        .unwrap_or_else(|| seoul_now.naive_utc());
    if target <= seoul_now.naive_utc() {
        target += Duration::days(1);
    }
    // Back from the Seoul wall clock to UTC.
    Utc.from_utc_datetime(&target).timestamp_millis() - Duration::hours(9).num_milliseconds()
}

fn format_ms(ms: i64) -> Option<String> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.format("%m-%d %H:%M").to_string())
}
