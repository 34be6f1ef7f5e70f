// 集成测试公共模块
//
// 提供测试辅助工具和共享功能

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Semaphore;

use dom_translate::backend::{
    pseudo_translate, DownloadProgress, LanguageDetector, StaticDetector, TranslationBackend, TranslationModel,
};
use dom_translate::config::{EngineConfig, TranslateConfig};
use dom_translate::engine::{FragmentRequest, InPageTranslation};
use dom_translate::error::{TranslateError, TranslateResult};
use dom_translate::scheduler::messages::{BackgroundMessage, ContentMessage, TranslateRequestData};
use dom_translate::{BackgroundService, ContentScript, Document, NodeId, ServiceHandle};

/// 引擎与其请求通道
pub struct EngineHarness {
    pub doc: Document,
    pub engine: InPageTranslation,
    pub requests: UnboundedReceiver<FragmentRequest>,
}

impl EngineHarness {
    pub fn new(html: &str) -> Self {
        Self::with_config(html, EngineConfig::default())
    }

    pub fn with_config(html: &str, config: EngineConfig) -> Self {
        let (tx, requests) = mpsc::unbounded_channel();
        Self {
            doc: Document::parse(html),
            engine: InPageTranslation::new(config, tx),
            requests,
        }
    }

    /// 以 `<body>` 为目标启动
    pub fn start_body(&mut self, language: &str) {
        let body = self.doc.body().expect("document has a body");
        self.engine.add_element(&mut self.doc, body);
        self.engine.start(&mut self.doc, language);
    }

    pub fn drain(&mut self) -> Vec<FragmentRequest> {
        let mut requests = Vec::new();
        while let Ok(request) = self.requests.try_recv() {
            requests.push(request);
        }
        requests
    }

    pub fn find(&self, tag: &str) -> NodeId {
        self.doc
            .find_first(tag)
            .unwrap_or_else(|| panic!("no <{}> in document", tag))
    }

    pub fn tick(&mut self, now: Instant) {
        self.engine.tick(&mut self.doc, now);
    }

    pub fn body_html(&self) -> String {
        let body = self.doc.body().expect("document has a body");
        self.doc.inner_html(body)
    }
}

/// 请求文本
pub fn texts(requests: &[FragmentRequest]) -> Vec<&str> {
    requests.iter().map(|request| request.text.as_str()).collect()
}

/// 在释放许可之前挂起所有翻译请求的后端
pub struct GatedBackend {
    pub gate: Arc<Semaphore>,
    pub models: Vec<TranslationModel>,
}

impl GatedBackend {
    pub fn new(from: &str, to: &str) -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            models: vec![TranslationModel::new(from, to, true)],
        }
    }
}

impl TranslationBackend for GatedBackend {
    fn registry(&self) -> BoxFuture<'_, TranslateResult<Vec<TranslationModel>>> {
        Box::pin(async move { Ok(self.models.clone()) })
    }

    fn translate(&self, request: TranslateRequestData) -> BoxFuture<'_, TranslateResult<String>> {
        Box::pin(async move {
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| TranslateError::BackendError(e.to_string()))?;
            permit.forget();
            Ok(pseudo_translate(&request.text))
        })
    }

    fn download_model(
        &self,
        _model: TranslationModel,
        progress: UnboundedSender<DownloadProgress>,
    ) -> BoxFuture<'_, TranslateResult<()>> {
        Box::pin(async move {
            let _ = progress.send(DownloadProgress { read: 1.0, size: 1.0 });
            Ok(())
        })
    }
}

/// 对包含 `marker` 的片段延迟 `delay` 后失败，其余片段正常伪翻译
pub struct FailingBackend {
    pub marker: String,
    pub delay: Duration,
}

impl FailingBackend {
    pub fn new(marker: &str, delay: Duration) -> Self {
        Self {
            marker: marker.to_string(),
            delay,
        }
    }
}

impl TranslationBackend for FailingBackend {
    fn registry(&self) -> BoxFuture<'_, TranslateResult<Vec<TranslationModel>>> {
        Box::pin(async move { Ok(vec![TranslationModel::new("de", "en", true)]) })
    }

    fn translate(&self, request: TranslateRequestData) -> BoxFuture<'_, TranslateResult<String>> {
        Box::pin(async move {
            if !request.text.contains(&self.marker) {
                return Ok(pseudo_translate(&request.text));
            }

            tokio::time::sleep(self.delay).await;
            Err(TranslateError::BackendError("engine crashed".to_string()))
        })
    }

    fn download_model(
        &self,
        _model: TranslationModel,
        _progress: UnboundedSender<DownloadProgress>,
    ) -> BoxFuture<'_, TranslateResult<()>> {
        Box::pin(async move { Err(TranslateError::BackendError("no network".to_string())) })
    }
}

/// 内容侧会话与后台服务连在一起
pub struct PageHarness {
    pub content: ContentScript,
    pub handle: ServiceHandle,
    pub tab_id: u64,
    port: UnboundedReceiver<BackgroundMessage>,
    outbound: UnboundedReceiver<ContentMessage>,
}

impl PageHarness {
    /// 启动后台服务，导航到 `url` 并连接内容侧
    pub fn open(html: &str, url: &str, backend: Arc<dyn TranslationBackend>) -> Self {
        Self::open_with(html, url, backend, TranslateConfig::default())
    }

    pub fn open_with(
        html: &str,
        url: &str,
        backend: Arc<dyn TranslationBackend>,
        config: TranslateConfig,
    ) -> Self {
        let detector: Arc<dyn LanguageDetector> = Arc::new(StaticDetector::new("de", &["en"]));
        let (service, handle) = BackgroundService::new(config.scheduler.clone(), backend, detector);
        service.spawn();

        let tab_id = 1;
        let (tx, outbound) = mpsc::unbounded_channel();
        let content = ContentScript::new(Document::parse(html), &config, tx);
        handle.navigate(tab_id, url).expect("service running");
        let port = handle.connect_content(tab_id, 0).expect("service running");

        Self {
            content,
            handle,
            tab_id,
            port,
            outbound,
        }
    }

    /// 在两侧之间转发消息并驱动计时器，直到条件成立
    pub async fn run_until<F>(&mut self, mut done: F)
    where
        F: FnMut(&ContentScript) -> bool,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);

        while !done(&self.content) {
            assert!(tokio::time::Instant::now() < deadline, "page never reached expected state");
            self.step(Duration::from_millis(20)).await;
        }
    }

    /// 转发消息直到安静 `quiet` 这么久
    pub async fn settle(&mut self, quiet: Duration) {
        while self.step(quiet).await {}
    }

    /// 处理一条消息或一次到期的计时器；超时返回 `false`
    pub async fn step(&mut self, wait: Duration) -> bool {
        let timer = self.content.next_deadline().map(tokio::time::Instant::from_std);

        tokio::select! {
            Some(message) = self.port.recv() => {
                self.content.handle_message(message, Instant::now()).expect("content handles message");
                true
            }
            Some(message) = self.outbound.recv() => {
                self.handle.content(self.tab_id, 0, message).expect("service running");
                true
            }
            _ = tokio::time::sleep_until(timer.unwrap_or_else(tokio::time::Instant::now)), if timer.is_some() => {
                self.content.tick(Instant::now()).expect("content ticks");
                true
            }
            _ = tokio::time::sleep(wait) => false,
        }
    }

    pub fn body_text(&self) -> String {
        let doc = self.content.document();
        doc.text_content(doc.body().expect("document has a body"))
    }
}
