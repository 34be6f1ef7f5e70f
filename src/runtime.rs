//! 后台服务
//!
//! 一个 tokio 任务持有所有标签页的调度器。外部事件（端口连接、内容侧与弹出界面的消息、
//! 导航、标签页生命周期）从收件箱进入；翻译、语言检测与模型下载在独立任务中执行，
//! 完成后通过内部通道回到主循环。每处理完一个事件就合并广播一次状态差异。

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::backend::{DownloadProgress, LanguageDetector, TranslationBackend, TranslationModel};
use crate::config::SchedulerConfig;
use crate::error::{ErrorStats, TranslateError, TranslateResult};
use crate::scheduler::messages::{
    BackgroundMessage, ContentMessage, DetectLanguageData, PopupMessage, TranslateRequestData, TranslateResponseData,
};
use crate::scheduler::{detect_language, AbortSignal, LanguageSummary, PageScheduler, StateDiff};

/// 右键菜单命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuCommand {
    TranslateSelection,
    ShowOutboundTranslation,
}

impl From<MenuCommand> for BackgroundMessage {
    fn from(command: MenuCommand) -> Self {
        match command {
            MenuCommand::TranslateSelection => BackgroundMessage::TranslateSelection,
            MenuCommand::ShowOutboundTranslation => BackgroundMessage::ShowOutboundTranslation,
        }
    }
}

/// 进入后台服务的事件
#[derive(Debug)]
pub enum Envelope {
    ConnectContent {
        tab_id: u64,
        frame_id: u32,
        port: UnboundedSender<BackgroundMessage>,
    },
    ConnectPopup {
        tab_id: u64,
        port: UnboundedSender<StateDiff>,
    },
    DisconnectContent {
        tab_id: u64,
        frame_id: u32,
    },
    Content {
        tab_id: u64,
        frame_id: u32,
        message: ContentMessage,
    },
    Popup {
        tab_id: u64,
        message: PopupMessage,
    },
    Navigated {
        tab_id: u64,
        url: String,
    },
    TabCreated {
        tab_id: u64,
        opener: Option<u64>,
        active: bool,
    },
    TabActivated {
        tab_id: u64,
    },
    TabRemoved {
        tab_id: u64,
    },
    Command {
        tab_id: u64,
        command: MenuCommand,
    },
    Shutdown,
}

/// 后台任务完成后回到主循环的结果
enum Completion {
    Translated {
        tab_id: u64,
        frame_id: u32,
        signal: AbortSignal,
        connection: AbortSignal,
        request: TranslateRequestData,
        result: TranslateResult<String>,
    },
    Detected {
        tab_id: u64,
        result: TranslateResult<LanguageSummary>,
    },
    DownloadProgress {
        tab_id: u64,
        read: f64,
        size: f64,
    },
    ModelDownloaded {
        tab_id: u64,
        model: TranslationModel,
    },
    DownloadFinished {
        tab_id: u64,
        result: TranslateResult<()>,
    },
}

/// 向后台服务发送事件的句柄
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    sender: UnboundedSender<Envelope>,
    stats: Arc<RwLock<ErrorStats>>,
}

impl ServiceHandle {
    pub fn send(&self, envelope: Envelope) -> TranslateResult<()> {
        self.sender
            .send(envelope)
            .map_err(|_| TranslateError::ChannelClosed("后台服务已停止".to_string()))
    }

    /// 连接内容侧端口，返回后台发往该框架的消息
    pub fn connect_content(&self, tab_id: u64, frame_id: u32) -> TranslateResult<UnboundedReceiver<BackgroundMessage>> {
        let (port, receiver) = mpsc::unbounded_channel();
        self.send(Envelope::ConnectContent { tab_id, frame_id, port })?;
        Ok(receiver)
    }

    /// 连接弹出界面，返回状态差异
    pub fn connect_popup(&self, tab_id: u64) -> TranslateResult<UnboundedReceiver<StateDiff>> {
        let (port, receiver) = mpsc::unbounded_channel();
        self.send(Envelope::ConnectPopup { tab_id, port })?;
        Ok(receiver)
    }

    pub fn content(&self, tab_id: u64, frame_id: u32, message: ContentMessage) -> TranslateResult<()> {
        self.send(Envelope::Content {
            tab_id,
            frame_id,
            message,
        })
    }

    pub fn popup(&self, tab_id: u64, message: PopupMessage) -> TranslateResult<()> {
        self.send(Envelope::Popup { tab_id, message })
    }

    pub fn navigate(&self, tab_id: u64, url: &str) -> TranslateResult<()> {
        self.send(Envelope::Navigated {
            tab_id,
            url: url.to_string(),
        })
    }

    pub fn shutdown(&self) -> TranslateResult<()> {
        self.send(Envelope::Shutdown)
    }

    /// 后端操作的错误统计快照
    pub fn error_stats(&self) -> ErrorStats {
        self.stats.read().map(|stats| stats.clone()).unwrap_or_default()
    }
}

/// 一个内容侧连接；断开时只中止经由它发出的请求
struct Frame {
    port: UnboundedSender<BackgroundMessage>,
    signal: AbortSignal,
}

impl Frame {
    fn new(port: UnboundedSender<BackgroundMessage>) -> Self {
        Self {
            port,
            signal: AbortSignal::new(),
        }
    }
}

struct Tab {
    scheduler: PageScheduler,
    frames: HashMap<u32, Frame>,
}

/// 后台服务
pub struct BackgroundService {
    config: SchedulerConfig,
    backend: Arc<dyn TranslationBackend>,
    detector: Arc<dyn LanguageDetector>,
    tabs: HashMap<u64, Tab>,
    inbox: UnboundedReceiver<Envelope>,
    completions_tx: UnboundedSender<Completion>,
    completions: UnboundedReceiver<Completion>,
    stats: Arc<RwLock<ErrorStats>>,
}

impl BackgroundService {
    pub fn new(
        config: SchedulerConfig,
        backend: Arc<dyn TranslationBackend>,
        detector: Arc<dyn LanguageDetector>,
    ) -> (Self, ServiceHandle) {
        let (sender, inbox) = mpsc::unbounded_channel();
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let stats = Arc::new(RwLock::new(ErrorStats::default()));

        let service = Self {
            config,
            backend,
            detector,
            tabs: HashMap::new(),
            inbox,
            completions_tx,
            completions,
            stats: Arc::clone(&stats),
        };

        (service, ServiceHandle { sender, stats })
    }

    /// 在当前 tokio 运行时上启动
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// 主循环，收到 `Shutdown` 或所有句柄被丢弃时退出
    pub async fn run(mut self) {
        tracing::info!("后台服务启动");

        loop {
            tokio::select! {
                envelope = self.inbox.recv() => match envelope {
                    Some(Envelope::Shutdown) | None => break,
                    Some(envelope) => self.handle_envelope(envelope),
                },
                Some(completion) = self.completions.recv() => self.handle_completion(completion),
            }

            self.flush();
        }

        for tab in self.tabs.values_mut() {
            tab.scheduler.abort_generation();
        }

        if let Ok(stats) = self.stats.read() {
            tracing::info!(
                "后台服务停止：后端操作 {} 次，失败 {} 次（错误率 {:.1}%）",
                stats.total_operations,
                stats.total_errors,
                stats.error_rate() * 100.0
            );
        }
    }

    fn tab(&mut self, tab_id: u64) -> &mut Tab {
        let config = &self.config;
        self.tabs.entry(tab_id).or_insert_with(|| Tab {
            scheduler: PageScheduler::new(tab_id, config.clone()),
            frames: HashMap::new(),
        })
    }

    fn flush(&mut self) {
        for tab in self.tabs.values_mut() {
            tab.scheduler.flush();
        }
    }

    fn handle_envelope(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::ConnectContent { tab_id, frame_id, port } => {
                let observer = forward_updates(port.clone());
                let tab = self.tab(tab_id);
                tab.scheduler.subscribe(observer);
                if let Some(previous) = tab.frames.insert(frame_id, Frame::new(port)) {
                    previous.signal.abort();
                }
                tracing::debug!("标签页 {} 框架 {} 已连接", tab_id, frame_id);
            }
            Envelope::ConnectPopup { tab_id, port } => self.tab(tab_id).scheduler.subscribe(port),
            Envelope::DisconnectContent { tab_id, frame_id } => {
                if let Some(frame) = self.tabs.get_mut(&tab_id).and_then(|tab| tab.frames.remove(&frame_id)) {
                    frame.signal.abort();
                    tracing::debug!("标签页 {} 框架 {} 断开", tab_id, frame_id);
                }
            }
            Envelope::Content {
                tab_id,
                frame_id,
                message,
            } => self.handle_content(tab_id, frame_id, message),
            Envelope::Popup { tab_id, message } => self.handle_popup(tab_id, message),
            Envelope::Navigated { tab_id, url } => self.tab(tab_id).scheduler.reset(&url),
            Envelope::TabCreated { tab_id, opener, active } => {
                let inherited = opener
                    .and_then(|opener| self.tabs.get(&opener))
                    .map(|opener| opener.scheduler.state().clone());

                let tab = self.tab(tab_id);
                match inherited {
                    Some(state) => tab.scheduler.inherit(&state, active),
                    None => tab.scheduler.set_active(active),
                }
            }
            Envelope::TabActivated { tab_id } => {
                self.tab(tab_id);
                for (&id, tab) in self.tabs.iter_mut() {
                    tab.scheduler.set_active(id == tab_id);
                }
            }
            Envelope::TabRemoved { tab_id } => {
                if let Some(mut tab) = self.tabs.remove(&tab_id) {
                    tab.scheduler.abort_generation();
                    tracing::debug!("标签页 {} 已关闭", tab_id);
                }
            }
            Envelope::Command { tab_id, command } => {
                let Some(tab) = self.tabs.get(&tab_id) else {
                    return;
                };

                if !tab.scheduler.can_route_command() {
                    tracing::debug!("标签页 {} 语言对未确定，忽略命令 {:?}", tab_id, command);
                    return;
                }

                for frame in tab.frames.values() {
                    let _ = frame.port.send(command.into());
                }
            }
            Envelope::Shutdown => {}
        }
    }

    fn handle_content(&mut self, tab_id: u64, frame_id: u32, message: ContentMessage) {
        match message {
            ContentMessage::DetectLanguage(data) => {
                // 子框架的语言不代表整个页面
                if frame_id != 0 {
                    tracing::debug!("忽略子框架 {} 的语言检测请求", frame_id);
                    return;
                }
                self.tab(tab_id);
                self.spawn_detection(tab_id, data);
            }
            ContentMessage::TranslateRequest(request) => {
                let tab = self.tab(tab_id);
                let signal = tab.scheduler.begin_request();
                let connection = match tab.frames.get(&frame_id) {
                    Some(frame) => frame.signal.clone(),
                    None => {
                        tracing::debug!("标签页 {} 框架 {} 未连接，请求立即作废", tab_id, frame_id);
                        let orphan = AbortSignal::new();
                        orphan.abort();
                        orphan
                    }
                };
                self.spawn_translation(tab_id, frame_id, signal, connection, request);
            }
            ContentMessage::TranslateAbort => self.tab(tab_id).scheduler.abort(),
            ContentMessage::UpdateRequest(diff) => self.tab(tab_id).scheduler.update(diff),
        }
    }

    fn handle_popup(&mut self, tab_id: u64, message: PopupMessage) {
        match message {
            PopupMessage::TranslateStart => self.tab(tab_id).scheduler.translate(),
            PopupMessage::TranslateAbort => self.tab(tab_id).scheduler.abort(),
            PopupMessage::DownloadModels { models } => {
                self.tab(tab_id).scheduler.begin_download();
                self.spawn_download(tab_id, models);
            }
            PopupMessage::UpdateRequest(diff) => self.tab(tab_id).scheduler.update(diff),
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Translated {
                tab_id,
                frame_id,
                signal,
                connection,
                request,
                result,
            } => {
                let result = if connection.is_aborted() {
                    Err(TranslateError::Aborted)
                } else {
                    result
                };
                record_outcome(&self.stats, &result);

                let Some(tab) = self.tabs.get_mut(&tab_id) else {
                    tracing::debug!("标签页 {} 已不存在，丢弃翻译结果", tab_id);
                    return;
                };

                let Some(outcome) = tab.scheduler.complete_request(&signal, result) else {
                    return;
                };

                let response = match outcome {
                    Ok(text) => TranslateResponseData::ok(request, text),
                    Err(error) => TranslateResponseData::error(request, error),
                };

                match tab.frames.get(&frame_id) {
                    Some(frame) => {
                        if frame.port.send(BackgroundMessage::TranslateResponse(response)).is_err() {
                            tracing::debug!("标签页 {} 框架 {} 的端口已关闭", tab_id, frame_id);
                        }
                    }
                    None => tracing::debug!("标签页 {} 框架 {} 未连接", tab_id, frame_id),
                }
            }
            Completion::Detected { tab_id, result } => {
                record_outcome(&self.stats, &result);
                if let Some(tab) = self.tabs.get_mut(&tab_id) {
                    tab.scheduler.on_language_detected(result);
                }
            }
            Completion::DownloadProgress { tab_id, read, size } => {
                if let Some(tab) = self.tabs.get_mut(&tab_id) {
                    tab.scheduler.download_progress(read, size);
                }
            }
            Completion::ModelDownloaded { tab_id, model } => {
                if let Some(tab) = self.tabs.get_mut(&tab_id) {
                    tab.scheduler.model_downloaded(&model.from, &model.to);
                }
            }
            Completion::DownloadFinished { tab_id, result } => {
                record_outcome(&self.stats, &result);
                if let Some(tab) = self.tabs.get_mut(&tab_id) {
                    tab.scheduler.finish_download(result);
                }
            }
        }
    }

    fn spawn_detection(&self, tab_id: u64, data: DetectLanguageData) {
        let backend = Arc::clone(&self.backend);
        let detector = Arc::clone(&self.detector);
        let preferred = self.config.preferred_target.clone();
        let completions = self.completions_tx.clone();

        tokio::spawn(async move {
            let result = detect_language(
                &data.sample,
                &data.suggested,
                backend.as_ref(),
                detector.as_ref(),
                preferred.as_deref(),
            )
            .await;
            let _ = completions.send(Completion::Detected { tab_id, result });
        });
    }

    fn spawn_translation(
        &self,
        tab_id: u64,
        frame_id: u32,
        signal: AbortSignal,
        connection: AbortSignal,
        request: TranslateRequestData,
    ) {
        let backend = Arc::clone(&self.backend);
        let completions = self.completions_tx.clone();

        tokio::spawn(async move {
            let result = if signal.is_aborted() || connection.is_aborted() {
                Err(TranslateError::Aborted)
            } else {
                backend.translate(request.clone()).await
            };

            let _ = completions.send(Completion::Translated {
                tab_id,
                frame_id,
                signal,
                connection,
                request,
                result,
            });
        });
    }

    fn spawn_download(&self, tab_id: u64, models: Vec<TranslationModel>) {
        let backend = Arc::clone(&self.backend);
        let completions = self.completions_tx.clone();

        tokio::spawn(async move {
            let (aggregate_tx, mut aggregate) = mpsc::unbounded_channel::<(usize, DownloadProgress)>();

            let downloads: Vec<_> = models
                .into_iter()
                .enumerate()
                .map(|(index, model)| {
                    let (progress_tx, mut progress) = mpsc::unbounded_channel();
                    let aggregate_tx = aggregate_tx.clone();
                    tokio::spawn(async move {
                        while let Some(update) = progress.recv().await {
                            if aggregate_tx.send((index, update)).is_err() {
                                break;
                            }
                        }
                    });

                    let backend = Arc::clone(&backend);
                    let completions = completions.clone();
                    async move {
                        backend.download_model(model.clone(), progress_tx).await?;
                        let _ = completions.send(Completion::ModelDownloaded { tab_id, model });
                        Ok::<(), TranslateError>(())
                    }
                })
                .collect();
            drop(aggregate_tx);

            let progress_completions = completions.clone();
            let reporter = tokio::spawn(async move {
                let mut totals: HashMap<usize, DownloadProgress> = HashMap::new();
                while let Some((index, update)) = aggregate.recv().await {
                    totals.insert(index, update);
                    let read = totals.values().map(|p| p.read).sum();
                    let size = totals.values().map(|p| p.size).sum();
                    let _ = progress_completions.send(Completion::DownloadProgress { tab_id, read, size });
                }
            });

            let result = futures::future::try_join_all(downloads).await.map(|_| ());
            if let Err(error) = &result {
                tracing::error!("标签页 {} 模型下载失败: {}", tab_id, error);
            }

            // 进度在结束状态之前送达
            let _ = reporter.await;
            let _ = completions.send(Completion::DownloadFinished { tab_id, result });
        });
    }
}

fn record_outcome<T>(stats: &RwLock<ErrorStats>, result: &TranslateResult<T>) {
    if let Ok(mut stats) = stats.write() {
        stats.record(result);
    }
}

/// 把状态差异包装成发往内容侧的 `Update` 消息
fn forward_updates(port: UnboundedSender<BackgroundMessage>) -> UnboundedSender<StateDiff> {
    let (observer, mut diffs) = mpsc::unbounded_channel::<StateDiff>();

    tokio::spawn(async move {
        while let Some(diff) = diffs.recv().await {
            if port.send(BackgroundMessage::Update(diff)).is_err() {
                break;
            }
        }
    });

    observer
}
