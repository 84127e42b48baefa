//! 采集 actor：唯一持有 CollectionMachine 的长驻任务
//!
//! 主循环在两个通道之间 select：控制面调用（带 oneshot 回复）与副作用任务回灌的引擎事件。
//! 每次只处理一条消息，因此状态无需加锁。
//! 事件都带着发起它的 RunId，上一轮遗留的结果（例如停止后才返回的提取）直接丢弃。

use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::mpsc;

use crate::browser::{PageAgent, TabDriver};
use crate::cache::PersistentCache;
use crate::control::{
    ClearResponse, ClearStatus, ControlCall, ControlSurface, StartResponse, StartStatus, StopResponse,
    StopStatus,
};
use crate::core::{
    Clock, CollectionMachine, CollectionPolicy, Effect, EngineEvent, RunId, TabError,
};

/// 采集 actor 的依赖
#[derive(Clone)]
pub struct CollectorDeps {
    pub tabs: Arc<dyn TabDriver>,
    pub agent: Arc<dyn PageAgent>,
    pub cache: PersistentCache,
    pub clock: Arc<dyn Clock>,
    pub policy: CollectionPolicy,
}

/// 启动采集 actor，返回控制面句柄；所有句柄都被丢弃后 actor 收尾退出
pub fn spawn_collector(deps: CollectorDeps) -> ControlSurface {
    let (call_tx, call_rx) = mpsc::channel::<ControlCall>(32);
    let (event_tx, event_rx) = mpsc::unbounded_channel::<(RunId, EngineEvent)>();

    let collector = Collector {
        machine: CollectionMachine::new(deps.policy.clone()),
        deps,
        event_tx,
    };
    tokio::spawn(collector.run(call_rx, event_rx));

    ControlSurface::new(call_tx)
}

struct Collector {
    machine: CollectionMachine,
    deps: CollectorDeps,
    event_tx: mpsc::UnboundedSender<(RunId, EngineEvent)>,
}

impl Collector {
    async fn run(
        mut self,
        mut call_rx: mpsc::Receiver<ControlCall>,
        mut event_rx: mpsc::UnboundedReceiver<(RunId, EngineEvent)>,
    ) {
        tracing::debug!("Collector started");
        loop {
            tokio::select! {
                call = call_rx.recv() => match call {
                    Some(call) => self.on_call(call).await,
                    None => break,
                },
                Some((run, event)) = event_rx.recv() => self.on_event(run, event).await,
            }
        }

        // 控制面全部断开：结束进行中的一轮并释放标签页
        let effects = self.machine.stop();
        self.execute(effects).await;
        tracing::debug!("Collector stopped");
    }

    async fn on_call(&mut self, call: ControlCall) {
        match call {
            ControlCall::Start {
                url,
                page_limit,
                reply,
            } => {
                if self.machine.is_collecting() {
                    tracing::info!("Collection already in progress, ignoring start");
                    let _ = reply.send(StartResponse {
                        status: StartStatus::AlreadyRunning,
                    });
                    return;
                }
                self.deps.cache.load(self.machine.state_mut()).await;
                if let Some(effects) = self.machine.begin_run(&url, page_limit) {
                    self.execute(effects).await;
                }
                let _ = reply.send(StartResponse {
                    status: StartStatus::Started,
                });
            }
            ControlCall::Stop { reply } => {
                if self.machine.is_collecting() {
                    tracing::info!("Stop requested");
                }
                let effects = self.machine.stop();
                self.execute(effects).await;
                let state = self.machine.state();
                let _ = reply.send(StopResponse {
                    status: StopStatus::Stopped,
                    current_page: state.current_page,
                    order_numbers: state.order_numbers.iter().cloned().collect(),
                });
            }
            ControlCall::Progress { reply } => {
                self.deps.cache.load(self.machine.state_mut()).await;
                let _ = reply.send(self.machine.state().snapshot());
            }
            ControlCall::Clear { reply } => {
                self.deps.cache.clear(self.machine.state_mut()).await;
                let _ = reply.send(ClearResponse {
                    status: ClearStatus::CacheCleared,
                });
            }
        }
    }

    async fn on_event(&mut self, run: RunId, event: EngineEvent) {
        if run != self.machine.run_id() {
            tracing::debug!(?run, ?event, "Discarding event from previous run");
            return;
        }
        let effects = self.machine.handle(event, self.deps.clock.now_ms());
        self.execute(effects).await;
    }

    /// Persist 与 ReleaseTab 就地执行，其余副作用派生为独立任务
    async fn execute(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Persist => {
                    self.deps.cache.save(self.machine.state_mut()).await;
                }
                Effect::ReleaseTab { tab } => match self.deps.tabs.close(tab).await {
                    Ok(()) => tracing::info!(%tab, "Collection tab closed"),
                    Err(TabError::AlreadyClosed) => tracing::debug!(%tab, "Tab already closed"),
                    Err(e) => tracing::warn!(%tab, "Failed to close tab: {}", e),
                },
                other => self.spawn_effect(other),
            }
        }
        self.machine.mark_idle();
    }

    fn spawn_effect(&self, effect: Effect) {
        let tabs = self.deps.tabs.clone();
        let agent = self.deps.agent.clone();
        let clock = self.deps.clock.clone();

        let task: BoxFuture<'static, EngineEvent> = match effect {
            Effect::OpenTab { url } => async move {
                match tabs.open(&url).await {
                    Ok(tab) => EngineEvent::TabOpened(tab),
                    Err(e) => EngineEvent::TabOpenFailed(e),
                }
            }
            .boxed(),
            Effect::AwaitPageLoad { tab } => {
                async move { EngineEvent::PageLoad(tabs.wait_for_load(tab).await) }.boxed()
            }
            Effect::Sleep { delay, wake } => async move {
                clock.sleep(delay).await;
                EngineEvent::Woke(wake)
            }
            .boxed(),
            Effect::ExtractPage { tab } => {
                async move { EngineEvent::PageExtracted(agent.collect_order_numbers(tab).await) }
                    .boxed()
            }
            Effect::ClickNext { tab } => {
                async move { EngineEvent::NextClicked(agent.click_next_button(tab).await) }.boxed()
            }
            Effect::Persist | Effect::ReleaseTab { .. } => return,
        };

        let run = self.machine.run_id();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let event = task.await;
            // actor 已退出时发送失败，忽略即可
            let _ = tx.send((run, event));
        });
    }
}
