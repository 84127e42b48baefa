//! 采集状态机：显式转移表
//!
//! CollectionMachine 不做任何 I/O：输入 EngineEvent，输出需要执行的 Effect 列表。
//! 打开标签页、等待加载、调用页面代理、延迟等副作用由 orchestrator 执行，
//! 结果再以 EngineEvent 回灌。这样每个挂起点都是显式的，可以脱离真实浏览器与计时器单测。
//!
//! 状态：Idle → Starting → (FetchingPage | AdvancingPage | Retrying) → Finishing → Idle

use std::time::Duration;

use crate::browser::{ClickResult, OrderPage, TabEvent, TabId};
use crate::core::{
    AgentFailure, CollectionPolicy, CollectionState, FailureClass, RetryDecision, TabError,
};

/// 一轮采集的编号，用于丢弃上一轮遗留的异步结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RunId(pub u64);

/// 引擎阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Idle,
    /// 已请求打开标签页，等待首次加载
    Starting,
    /// 已向代理请求提取当前页
    FetchingPage,
    /// 游标已前进，正在点击下一页或等待其加载
    AdvancingPage,
    /// 失败后等待退避
    Retrying,
    /// 正在持久化并释放标签页
    Finishing,
}

/// 失败时需要重做的步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Extract,
    Advance,
}

/// 延迟结束后要做什么
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// 页面稳定等待结束，开始提取
    Settle,
    /// 退避结束，重做失败的步骤
    Retry(Step),
    /// 翻页间隔结束，点击下一页
    Advance,
}

/// 副作用执行结果回灌给状态机的事件
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    TabOpened(TabId),
    TabOpenFailed(TabError),
    PageLoad(Result<TabEvent, TabError>),
    Woke(Wake),
    PageExtracted(Result<OrderPage, AgentFailure>),
    NextClicked(Result<ClickResult, AgentFailure>),
}

/// 状态机要求执行的副作用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    OpenTab { url: String },
    AwaitPageLoad { tab: TabId },
    Sleep { delay: Duration, wake: Wake },
    ExtractPage { tab: TabId },
    ClickNext { tab: TabId },
    /// 将当前状态写入持久缓存（必须在内存更新之后顺序执行）
    Persist,
    /// 关闭标签页，容忍「已关闭」
    ReleaseTab { tab: TabId },
}

/// 采集状态机：持有唯一的 CollectionState
#[derive(Debug)]
pub struct CollectionMachine {
    state: CollectionState,
    phase: EnginePhase,
    policy: CollectionPolicy,
    run: RunId,
}

impl CollectionMachine {
    pub fn new(policy: CollectionPolicy) -> Self {
        Self {
            state: CollectionState::new(),
            phase: EnginePhase::Idle,
            policy,
            run: RunId::default(),
        }
    }

    pub fn state(&self) -> &CollectionState {
        &self.state
    }

    /// 仅供缓存加载/清空使用
    pub fn state_mut(&mut self) -> &mut CollectionState {
        &mut self.state
    }

    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    pub fn run_id(&self) -> RunId {
        self.run
    }

    pub fn is_collecting(&self) -> bool {
        self.state.is_collecting
    }

    pub fn policy(&self) -> &CollectionPolicy {
        &self.policy
    }

    /// Start 转移：调用方应已加载持久缓存。已在采集时返回 None。
    pub fn begin_run(&mut self, url: &str, page_limit: u32) -> Option<Vec<Effect>> {
        if self.state.is_collecting {
            return None;
        }
        self.run = RunId(self.run.0 + 1);
        // 第 1 页总是重新抓取，避免缓存窗口内新下的订单被漏掉
        if self.state.pages_cached.remove(&1).is_some() {
            tracing::debug!("Invalidated cached page 1");
        }
        self.state.reset();
        self.state.page_limit = page_limit;
        self.state.is_collecting = true;
        self.state.active_tab = None;
        self.phase = EnginePhase::Starting;
        tracing::info!(run = self.run.0, page_limit, url, "Collection starting");
        Some(vec![Effect::OpenTab { url: url.to_string() }])
    }

    /// 用户停止：采集中则立即进入 Finishing
    pub fn stop(&mut self) -> Vec<Effect> {
        if !self.state.is_collecting {
            return Vec::new();
        }
        self.finish("stopped by user")
    }

    /// Finishing 的副作用执行完毕后回到 Idle
    pub fn mark_idle(&mut self) {
        if self.phase == EnginePhase::Finishing {
            self.phase = EnginePhase::Idle;
        }
    }

    /// 处理一个事件，返回要执行的副作用
    pub fn handle(&mut self, event: EngineEvent, now_ms: i64) -> Vec<Effect> {
        if !self.state.is_collecting {
            tracing::debug!(?event, "Discarding event: not collecting");
            return Vec::new();
        }

        match event {
            EngineEvent::TabOpened(tab) => {
                self.state.active_tab = Some(tab);
                vec![Effect::AwaitPageLoad { tab }]
            }
            EngineEvent::TabOpenFailed(err) => {
                tracing::error!(error = %err, "Failed to create collection tab");
                self.finish("tab creation failed")
            }
            EngineEvent::PageLoad(Ok(TabEvent::Loaded)) => {
                tracing::debug!(page = self.state.current_page, "Tab loaded, settling");
                vec![Effect::Sleep {
                    delay: self.policy.settle_delay,
                    wake: Wake::Settle,
                }]
            }
            EngineEvent::PageLoad(Ok(TabEvent::Closed)) => {
                tracing::warn!("Collection tab was closed");
                self.state.active_tab = None;
                self.finish("tab closed")
            }
            EngineEvent::PageLoad(Err(err)) => {
                tracing::warn!(error = %err, "Waiting for page load failed");
                self.finish("tab unavailable")
            }
            EngineEvent::Woke(Wake::Settle) | EngineEvent::Woke(Wake::Retry(Step::Extract)) => {
                self.fetch_current_page()
            }
            EngineEvent::Woke(Wake::Retry(Step::Advance)) | EngineEvent::Woke(Wake::Advance) => {
                self.click_next()
            }
            EngineEvent::PageExtracted(Ok(page)) => self.on_page(page, now_ms),
            EngineEvent::PageExtracted(Err(failure)) => self.on_failure(failure, Step::Extract),
            EngineEvent::NextClicked(Ok(ClickResult { success: true })) => {
                tracing::debug!(page = self.state.current_page, "Clicked next, waiting for load");
                match self.state.active_tab {
                    Some(tab) => vec![Effect::AwaitPageLoad { tab }],
                    None => self.finish("no tab"),
                }
            }
            EngineEvent::NextClicked(Ok(ClickResult { success: false })) => {
                self.on_failure(AgentFailure::ClickRejected, Step::Advance)
            }
            EngineEvent::NextClicked(Err(failure)) => self.on_failure(failure, Step::Advance),
        }
    }

    fn fetch_current_page(&mut self) -> Vec<Effect> {
        if !self.state.within_limit() {
            tracing::info!(limit = self.state.page_limit, "Reached page limit");
            return self.finish("page limit reached");
        }

        let page = self.state.current_page;
        if let Some(has_next_page) = self.state.merge_cached_page(page) {
            tracing::info!(page, "Page already cached, skipping fetch");
            return if self.state.can_advance(has_next_page) {
                self.advance()
            } else {
                self.finish("no more pages")
            };
        }

        let Some(tab) = self.state.active_tab else {
            return self.finish("no tab");
        };
        self.phase = EnginePhase::FetchingPage;
        tracing::info!(page, "Collecting order numbers");
        vec![Effect::ExtractPage { tab }]
    }

    fn on_page(&mut self, page: OrderPage, now_ms: i64) -> Vec<Effect> {
        tracing::info!(
            page = self.state.current_page,
            count = page.order_numbers.len(),
            has_next = page.has_next_page,
            "Collected order numbers"
        );
        self.state.record_page(&page, now_ms);
        self.state.retry_count = 0;

        if self.state.can_advance(page.has_next_page) {
            let mut effects = vec![Effect::Persist];
            effects.extend(self.advance());
            effects
        } else {
            self.finish("no more pages")
        }
    }

    fn advance(&mut self) -> Vec<Effect> {
        self.state.current_page += 1;
        self.state.retry_count = 0;
        self.phase = EnginePhase::AdvancingPage;
        tracing::info!(page = self.state.current_page, "Advancing to next page");

        if self.policy.advance_delay.is_zero() {
            self.click_next()
        } else {
            vec![Effect::Sleep {
                delay: self.policy.advance_delay,
                wake: Wake::Advance,
            }]
        }
    }

    fn click_next(&mut self) -> Vec<Effect> {
        let Some(tab) = self.state.active_tab else {
            return self.finish("no tab");
        };
        self.phase = EnginePhase::AdvancingPage;
        vec![Effect::ClickNext { tab }]
    }

    fn on_failure(&mut self, failure: AgentFailure, step: Step) -> Vec<Effect> {
        if failure.class() == FailureClass::RunEnding {
            tracing::warn!(error = %failure, "Run-ending failure");
            self.state.active_tab = None;
            return self.finish("tab lost");
        }

        match self.policy.on_failure(self.state.retry_count) {
            RetryDecision::RetryAfter { attempt, delay } => {
                self.state.retry_count = attempt;
                self.phase = EnginePhase::Retrying;
                tracing::warn!(
                    error = %failure,
                    page = self.state.current_page,
                    "Retrying {:?}. Attempt {} of {}",
                    step,
                    attempt,
                    self.policy.max_retries
                );
                vec![Effect::Sleep {
                    delay,
                    wake: Wake::Retry(step),
                }]
            }
            RetryDecision::GiveUp => {
                tracing::warn!(error = %failure, page = self.state.current_page, "Max retries reached");
                self.finish("retries exhausted")
            }
        }
    }

    fn finish(&mut self, reason: &str) -> Vec<Effect> {
        self.state.is_collecting = false;
        self.phase = EnginePhase::Finishing;
        tracing::info!(
            reason,
            pages = self.state.current_page,
            orders = self.state.order_numbers.len(),
            "Collection finished"
        );

        let mut effects = vec![Effect::Persist];
        if let Some(tab) = self.state.active_tab.take() {
            effects.push(Effect::ReleaseTab { tab });
        }
        effects
    }
}
