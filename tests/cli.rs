//! 命令行工具测试

use std::fs;
use std::path::PathBuf;
use std::process::Command;

use assert_cmd::prelude::*;

fn temp_file(name: &str, content: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("dom-translate-{}-{}", std::process::id(), name));
    fs::write(&path, content).unwrap();
    path
}

/// 测试翻译文件输出伪译文
#[test]
fn test_translates_file_to_stdout() {
    let input = temp_file(
        "page.html",
        r#"<html lang="de"><head><title>Grüße</title></head><body><p>Hallo <b>Welt</b></p></body></html>"#,
    );

    let output = Command::cargo_bin("dom-translate")
        .unwrap()
        .arg(&input)
        .args(["--from", "de", "--to", "en"])
        .env("NO_COLOR", "1")
        .output()
        .unwrap();

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("HALLO "), "{}", stdout);
    assert!(stdout.contains("WELT</b>"), "{}", stdout);
    assert!(stdout.contains("GRÜSSE</title>"), "{}", stdout);

    let _ = fs::remove_file(input);
}

/// 测试写入输出文件
#[test]
fn test_writes_output_file() {
    let input = temp_file("in.html", "<body><h1>Guten Tag</h1></body>");
    let output = std::env::temp_dir().join(format!("dom-translate-{}-out.html", std::process::id()));

    Command::cargo_bin("dom-translate")
        .unwrap()
        .arg(&input)
        .arg("-o")
        .arg(&output)
        .assert()
        .success();

    let translated = fs::read_to_string(&output).unwrap();
    assert!(translated.contains("GUTEN TAG</h1>"), "{}", translated);

    let _ = fs::remove_file(input);
    let _ = fs::remove_file(output);
}

/// 测试输入文件不存在时失败
#[test]
fn test_missing_input_fails() {
    Command::cargo_bin("dom-translate")
        .unwrap()
        .arg("/nonexistent/dom-translate/page.html")
        .assert()
        .failure();
}

/// 测试生成示例配置文件
#[test]
fn test_init_config_writes_toml() {
    let path = std::env::temp_dir().join(format!("dom-translate-{}-config.toml", std::process::id()));

    Command::cargo_bin("dom-translate")
        .unwrap()
        .arg("unused.html")
        .arg("--init-config")
        .arg(&path)
        .assert()
        .success();

    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("[engine]"));
    assert!(content.contains("ui_update_interval_ms = 500"));

    let _ = fs::remove_file(path);
}

/// 测试打印环境变量说明
#[test]
fn test_env_docs_lists_variables() {
    let output = Command::cargo_bin("dom-translate")
        .unwrap()
        .arg("--env-docs")
        .output()
        .unwrap();

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("DOM_TRANSLATE_UI_UPDATE_INTERVAL_MS"), "{}", stdout);
    assert!(stdout.contains("DOM_TRANSLATE_ALWAYS_TRANSLATE"), "{}", stdout);
}
