//! dom-translate 命令行工具
//!
//! 用伪翻译后端（把文本转成大写）完整地跑一遍页面会话与后台服务，
//! 输出翻译后的 HTML，便于观察引擎的分段与合并结果。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tokio::sync::mpsc;

use dom_translate::backend::{PseudoBackend, StaticDetector};
use dom_translate::config::{load_translate_config, ConfigManager};
use dom_translate::env::generate_env_docs;
use dom_translate::logging::init_logging;
use dom_translate::scheduler::messages::{BackgroundMessage, PopupMessage};
use dom_translate::{BackgroundService, ContentScript, Document, PageStatus, TranslateError};

const TAB_ID: u64 = 1;

/// Translate an HTML file in place with a pseudo backend.
#[derive(Parser, Debug)]
#[command(name = "dom-translate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// HTML file to translate.
    #[arg(required_unless_present = "env_docs")]
    input: Option<PathBuf>,

    /// Write the result here instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Page language.
    #[arg(long, default_value = "de")]
    from: String,

    /// Target language.
    #[arg(long, default_value = "en")]
    to: String,

    /// Configuration file (TOML or JSON).
    #[arg(short, long)]
    config: Option<String>,

    /// Write classifier verdicts into the output.
    #[arg(long)]
    debug_marks: bool,

    /// Write an example configuration file and exit.
    #[arg(long, value_name = "PATH")]
    init_config: Option<String>,

    /// Print the supported environment variables and exit.
    #[arg(long)]
    env_docs: bool,
}

#[tokio::main]
async fn main() {
    init_logging();
    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), TranslateError> {
    if args.env_docs {
        print!("{}", generate_env_docs());
        return Ok(());
    }

    if let Some(path) = &args.init_config {
        ConfigManager::generate_example_config(path)?;
        println!("Example configuration written to {}", path);
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => ConfigManager::from_file(path)?.into_config(),
        None => load_translate_config(),
    };
    if args.debug_marks {
        config.engine.debug_marks = true;
    }

    let input = args
        .input
        .as_ref()
        .ok_or_else(|| TranslateError::InvalidInput("缺少输入文件".to_string()))?;
    let html = std::fs::read_to_string(input)
        .map_err(|e| TranslateError::InvalidInput(format!("无法读取 {}: {}", input.display(), e)))?;

    let backend = Arc::new(PseudoBackend::with_pair(&args.from, &args.to));
    let detector = Arc::new(StaticDetector::new(&args.from, &[args.to.as_str()]));
    let (service, handle) = BackgroundService::new(config.scheduler.clone(), backend, detector);
    let service = service.spawn();

    let (outbound, mut requests) = mpsc::unbounded_channel();
    let mut content = ContentScript::new(Document::parse(&html), &config, outbound);
    handle.navigate(TAB_ID, &format!("file://{}", input.display()))?;
    let mut port = handle.connect_content(TAB_ID, 0)?;

    loop {
        let deadline = content.next_deadline();

        tokio::select! {
            Some(message) = port.recv() => {
                if let BackgroundMessage::Update(diff) = &message {
                    if diff.state == Some(PageStatus::TranslationAvailable) {
                        handle.popup(TAB_ID, PopupMessage::TranslateStart)?;
                    }
                }
                content.handle_message(message, Instant::now())?;
            }
            Some(message) = requests.recv() => handle.content(TAB_ID, 0, message)?,
            _ = sleep_until(deadline), if deadline.is_some() => {
                content.tick(Instant::now())?;
            }
            else => break,
        }

        if is_settled(&content) {
            break;
        }

        let state = content.state();
        match state.state {
            PageStatus::PageError | PageStatus::TranslationError | PageStatus::TranslationNotAvailable => {
                return Err(TranslateError::BackendError(
                    state.error.clone().unwrap_or_else(|| state.state.to_string()),
                ));
            }
            _ => {}
        }
    }

    handle.shutdown()?;
    let _ = service.await;

    let translated = content.document().outer_html(content.document().root());
    match &args.output {
        Some(path) => std::fs::write(path, translated)
            .map_err(|e| TranslateError::InvalidInput(format!("无法写入 {}: {}", path.display(), e)))?,
        None => println!("{}", translated),
    }

    Ok(())
}

/// 引擎已启动，且没有排队、等待或待合并的片段
fn is_settled(content: &ContentScript) -> bool {
    let engine = content.engine();
    engine.is_started() && engine.queued_count() == 0 && engine.pending_count() == 0 && engine.translated_count() == 0
}

async fn sleep_until(deadline: Option<Instant>) {
    if let Some(deadline) = deadline {
        tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
    }
}
