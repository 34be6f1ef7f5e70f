//! 页面内翻译引擎集成测试
//!
//! 覆盖分类、幂等、回滚、优先级、中止以及典型的页面变更场景

use std::time::{Duration, Instant};

use dom_translate::config::EngineConfig;
use dom_translate::dom::{Layout, Rect};
use dom_translate::engine::{FragmentOutcome, FragmentResponse, Priority};

#[allow(dead_code)]
mod common {
    include!("common/mod.rs");
}

use common::{texts, EngineHarness};

const SCENARIO: &str = r#"<body><h1 id="t">Hello</h1><p>Hello <b>world</b></p></body>"#;

const RESTART: Duration = Duration::from_millis(20);

/// 测试典型页面产生的请求
#[test]
fn test_start_produces_one_request_per_block() {
    let mut page = EngineHarness::new(SCENARIO);
    page.start_body("en");

    let requests = page.drain();
    assert_eq!(requests.len(), 2);

    assert_eq!(requests[0].text, "Hello");
    assert!(!requests[0].html);

    assert_eq!(requests[1].text, r#"Hello <b data-x-id="0">world</b>"#);
    assert!(requests[1].html);

    let h1 = page.doc.get_element_by_id("t").unwrap();
    let p = page.find("p");
    assert!(page.engine.is_pending(h1));
    assert!(page.engine.is_pending(p));
}

/// 测试插入的兄弟节点只产生一个新请求
#[test]
fn test_inserted_sibling_gets_single_request() {
    let mut page = EngineHarness::new(SCENARIO);
    page.start_body("en");
    let first = page.drain();

    let body = page.doc.body().unwrap();
    let p = page.doc.create_element("p");
    let text = page.doc.create_text("New");
    page.doc.append_child(p, text);
    page.doc.append_child(body, p);

    let now = Instant::now();
    page.tick(now);
    assert!(page.drain().is_empty(), "restart is debounced");

    page.tick(now + RESTART);
    let requests = page.drain();
    assert_eq!(texts(&requests), vec!["New"]);
    assert!(page.engine.is_pending(p));

    let pending: Vec<u64> = page.engine.pending_requests().iter().map(|(id, _)| *id).collect();
    for request in &first {
        assert!(pending.contains(&request.id), "older request {} untouched", request.id);
    }
}

/// 测试合并译文保持内联元素的身份
#[test]
fn test_response_keeps_inline_element_identity() {
    let mut page = EngineHarness::new(SCENARIO);
    page.start_body("en");
    let requests = page.drain();

    let p = page.find("p");
    let b = page.find("b");
    let now = Instant::now();

    let outcome = page.engine.enqueue_translation_response(
        FragmentResponse::ok(requests[1].id, "Bonjour <b data-x-id=0>monde</b>"),
        now,
    );
    assert_eq!(outcome, FragmentOutcome::Accepted);

    page.tick(now + Duration::from_millis(500));

    assert_eq!(page.find("b"), b);
    assert_eq!(page.doc.parent(b), Some(p));
    assert_eq!(page.doc.text_content(b), "monde");
    assert_eq!(page.doc.text_content(p), "Bonjour monde");
    assert!(page.engine.is_processed(p));
}

/// 测试接受的节点都不在排除区域内
#[test]
fn test_accepted_nodes_are_never_excluded() {
    let html = r#"<body>
        <p>Plain text</p>
        <pre><code>let x = 1;</code></pre>
        <div contenteditable="true"><p>Editable</p></div>
        <p class="notranslate">Brand</p>
        <div lang="fr"><p>Déjà traduit</p></div>
        <ul><li>One</li><li>Two <em>three</em></li></ul>
        <script>var s = "x";</script>
        <textarea>typed</textarea>
    </body>"#;

    let mut page = EngineHarness::new(html);
    page.start_body("en");
    page.drain();

    let excluded = ["code", "script", "textarea", "style"];
    for (_, node) in page.engine.pending_requests() {
        assert!(!page.doc.is_content_editable(node));
        for ancestor in std::iter::once(node).chain(page.doc.ancestors(node)) {
            if let Some(tag) = page.doc.tag_name(ancestor) {
                assert!(!excluded.contains(&tag), "accepted node inside <{}>", tag);
            }
            assert!(!page.doc.has_class(ancestor, "notranslate"));
            assert_ne!(page.doc.get_attr(ancestor, "lang"), Some("fr"));
        }
    }

    let body_text: Vec<String> = page
        .engine
        .pending_requests()
        .iter()
        .map(|(_, node)| page.doc.text_content(*node))
        .collect();
    assert!(body_text.iter().any(|text| text == "Plain text"));
    // 列表项按行内处理，整个列表作为一个片段
    assert!(body_text.iter().any(|text| text.contains("One") && text.contains("three")));
    assert!(!body_text.iter().any(|text| text.contains("Editable")));
}

/// 测试没有变更时重复遍历不会产生新请求
#[test]
fn test_walk_is_idempotent() {
    let mut page = EngineHarness::new("<html><head></head><body><h1>Hello</h1><p>World</p></body></html>");
    page.start_body("en");
    let requests = page.drain();
    assert_eq!(requests.len(), 2);

    // 等待中的节点不会被再次接受
    let html = page.doc.document_element().unwrap();
    page.engine.add_element(&mut page.doc, html);
    assert!(page.drain().is_empty());

    // 合并之后，已处理标记阻止重复提交
    let now = Instant::now();
    for request in &requests {
        page.engine
            .enqueue_translation_response(FragmentResponse::ok(request.id, request.text.to_uppercase()), now);
    }
    page.tick(now);
    assert_eq!(page.engine.translated_count(), 0);
    assert_eq!(page.engine.pending_count(), 0);

    let p = page.find("p");
    page.engine.add_element(&mut page.doc, p);
    page.tick(now + RESTART);
    assert!(page.drain().is_empty());
    assert!(page.engine.is_processed(p));
}

/// 测试启动后立即回滚得到原文
#[test]
fn test_start_then_restore_round_trips() {
    let html = r#"<html><head><title>Titel</title></head><body><h1>Hallo</h1><p>Hallo <b>Welt</b> und <a href="/x">mehr</a></p><ul><li>eins</li></ul></body></html>"#;
    let mut page = EngineHarness::new(html);
    let title = page.doc.title().unwrap();
    let before_title = page.doc.inner_html(title);
    let before_body = page.body_html();

    page.engine.add_element(&mut page.doc, title);
    page.start_body("de");
    assert!(!page.drain().is_empty());
    assert!(page.body_html().contains("data-x-id"));

    page.engine.restore(&mut page.doc);

    assert_eq!(page.doc.inner_html(title), before_title);
    assert_eq!(page.body_html(), before_body);
    assert_eq!(page.engine.pending_count(), 0);
    assert_eq!(page.engine.queued_count(), 0);
}

/// 测试合并之后回滚也得到原文
#[test]
fn test_restore_after_translation() {
    let mut page = EngineHarness::new(SCENARIO);
    let before = page.body_html();
    page.start_body("en");
    let requests = page.drain();

    let now = Instant::now();
    page.engine
        .enqueue_translation_response(FragmentResponse::ok(requests[0].id, "Bonjour"), now);
    page.engine.enqueue_translation_response(
        FragmentResponse::ok(requests[1].id, r#"<b data-x-id="0">monde</b> Bonjour"#),
        now,
    );
    page.tick(now);
    assert_ne!(page.body_html(), before);

    page.engine.restore(&mut page.doc);
    assert_eq!(page.body_html(), before);
}

/// 测试优先级由可见性与视口决定
#[test]
fn test_dispatch_priority_follows_layout() {
    let mut page = EngineHarness::new(
        "<body><p id=\"below\">Below</p><p id=\"hidden\">Hidden</p><p id=\"visible\">Visible</p><p id=\"empty\">Empty box</p></body>",
    );
    page.doc.set_viewport(Rect::new(0.0, 0.0, 800.0, 600.0));

    let below = page.doc.get_element_by_id("below").unwrap();
    let hidden = page.doc.get_element_by_id("hidden").unwrap();
    let visible = page.doc.get_element_by_id("visible").unwrap();
    let empty = page.doc.get_element_by_id("empty").unwrap();
    page.doc.set_layout(below, Layout::at(Rect::new(0.0, 900.0, 800.0, 20.0)));
    page.doc.set_layout(hidden, Layout::hidden());
    page.doc.set_layout(visible, Layout::at(Rect::new(0.0, 10.0, 800.0, 20.0)));
    page.doc.set_layout(empty, Layout::at(Rect::new(0.0, 10.0, 0.0, 0.0)));

    page.start_body("en");
    let requests = page.drain();

    let by_text: Vec<(&str, Priority)> = requests
        .iter()
        .map(|request| (request.text.as_str(), request.priority))
        .collect();
    assert_eq!(
        by_text,
        vec![
            ("Visible", Priority::InViewport),
            ("Below", Priority::OutOfViewport),
            ("Hidden", Priority::Hidden),
            ("Empty box", Priority::Hidden),
        ]
    );
}

/// 测试中止后到达的响应不修改文档
#[test]
fn test_response_after_abort_is_dropped() {
    let mut page = EngineHarness::new(SCENARIO);
    page.start_body("en");
    let requests = page.drain();
    let before = page.body_html();

    // 页面回到可翻译状态时内容侧执行回滚
    page.engine.restore(&mut page.doc);
    let restored = page.body_html();

    let now = Instant::now();
    for request in &requests {
        let outcome = page
            .engine
            .enqueue_translation_response(FragmentResponse::ok(request.id, "Bonjour"), now);
        assert_eq!(outcome, FragmentOutcome::Discarded);
    }
    page.tick(now + Duration::from_secs(1));

    assert_eq!(page.engine.pending_count(), 0);
    assert_eq!(page.engine.translated_count(), 0);
    assert_eq!(page.body_html(), restored);
    assert_eq!(restored, before.replace(r#" data-x-id="0""#, ""));
}

/// 测试删除等待中节点的子节点会重新提交父节点
#[test]
fn test_removing_child_of_pending_node_resubmits() {
    let mut page = EngineHarness::new(SCENARIO);
    page.start_body("en");
    let first = page.drain();

    let p = page.find("p");
    let b = page.find("b");
    page.doc.remove_child(p, b);

    let now = Instant::now();
    page.tick(now);
    page.tick(now + RESTART);

    let requests = page.drain();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].text.trim(), "Hello");
    assert!(!requests[0].html);

    let stale = page
        .engine
        .enqueue_translation_response(FragmentResponse::ok(first[1].id, "Bonjour <b data-x-id=\"0\">monde</b>"), now);
    assert_eq!(stale, FragmentOutcome::Discarded);
}

/// 测试调试标记写入分类结果
#[test]
fn test_debug_marks_record_verdicts() {
    let config = EngineConfig {
        debug_marks: true,
        ..Default::default()
    };
    let mut page = EngineHarness::with_config("<body><p>Hello</p><code>x</code></body>", config);
    page.start_body("en");

    let p = page.find("p");
    let code = page.find("code");
    assert!(page.doc.has_attr(p, "x-translate-verdict"));
    assert!(page.doc.has_attr(code, "x-translate-verdict"));

    page.engine.restore(&mut page.doc);
    assert!(!page.doc.has_attr(p, "x-translate-verdict"));
}
