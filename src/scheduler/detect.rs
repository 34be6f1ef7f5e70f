//! 语言对选择
//!
//! 根据检测结果、页面给出的语言提示、可用模型和用户偏好，
//! 为所有可翻译的语言对打分，得分最高的一对作为默认的 from/to。

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::backend::{DetectedLanguage, LanguageDetector, TranslationBackend, TranslationModel};
use crate::config::constants::{PIVOT_LANGUAGE, SIMILAR_LANGUAGES};
use crate::error::{TranslateError, TranslateResult};

/// 可翻译的语言对，可能经由中转语言
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguagePair {
    pub from: String,
    pub to: String,
    pub pivot: Option<String>,
    pub models: Vec<TranslationModel>,
}

/// 检测摘要
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LanguageSummary {
    pub from: Option<String>,
    pub to: Option<String>,
    pub models: Vec<LanguagePair>,
}

/// 两字母语言代码
fn primary_subtag(language: &str) -> String {
    language.chars().take(2).collect::<String>().to_ascii_lowercase()
}

/// 直接模型加上经中转语言组合出的语言对
pub fn build_pairs(models: &[TranslationModel]) -> Vec<LanguagePair> {
    let mut pairs: Vec<LanguagePair> = models
        .iter()
        .map(|model| LanguagePair {
            from: model.from.clone(),
            to: model.to.clone(),
            pivot: None,
            models: vec![model.clone()],
        })
        .collect();

    let to_pivot = models.iter().filter(|model| model.to == PIVOT_LANGUAGE);
    for first in to_pivot {
        for second in models.iter().filter(|model| model.from == PIVOT_LANGUAGE) {
            if first.from == second.to {
                continue;
            }
            pairs.push(LanguagePair {
                from: first.from.clone(),
                to: second.to.clone(),
                pivot: Some(PIVOT_LANGUAGE.to_string()),
                models: vec![first.clone(), second.clone()],
            });
        }
    }

    pairs
}

/// 页面是某种语言的可能性（0 到 1）
fn language_confidence(
    detected: &[DetectedLanguage],
    suggested: &BTreeMap<String, f64>,
) -> HashMap<String, f64> {
    let mut confidence: HashMap<String, f64> = detected
        .iter()
        .map(|detected| (detected.language.clone(), detected.percentage / 100.0))
        .collect();

    for (language, score) in suggested {
        let language = primary_subtag(language);
        let entry = confidence.entry(language).or_insert(0.0);
        *entry = entry.max(*score);
    }

    // 相近的语言容易被误判，给同组语言一半的分数
    let known: Vec<(String, f64)> = confidence.iter().map(|(l, s)| (l.clone(), *s)).collect();
    for (language, score) in known {
        for group in SIMILAR_LANGUAGES {
            if group.contains(&language.as_str()) {
                for other in group.iter() {
                    confidence.entry(other.to_string()).or_insert(score / 2.0);
                }
            }
        }
    }

    confidence
}

/// 用户希望译入某种语言的程度（0 到 1）
fn target_preference(accepted: &[String], preferred: Option<&str>) -> HashMap<String, f64> {
    let mut languages: Vec<String> = accepted.iter().map(|language| primary_subtag(language)).collect();

    if let Some(preferred) = preferred {
        languages.insert(0, preferred.to_string());
    }

    let mut unique: Vec<String> = Vec::with_capacity(languages.len());
    for language in languages {
        if !unique.contains(&language) {
            unique.push(language);
        }
    }

    let count = unique.len() as f64;
    unique
        .into_iter()
        .enumerate()
        .map(|(i, language)| (language, 1.0 - i as f64 / count))
        .collect()
}

fn score(pair: &LanguagePair, confidence: &HashMap<String, f64>, preference: &HashMap<String, f64>) -> f64 {
    let remote = pair.models.iter().filter(|model| !model.local).count() as f64;

    1.0 * confidence.get(&pair.from).copied().unwrap_or(0.0)
        + 0.5 * preference.get(&pair.to).copied().unwrap_or(0.0)
        + 0.2 * if pair.pivot.is_none() { 1.0 } else { 0.0 }
        + 0.1 / (1.0 + remote)
}

/// 为全部语言对打分并排序，最佳的一对决定默认的 from/to
pub fn select_language_pair(
    detected: &[DetectedLanguage],
    suggested: &BTreeMap<String, f64>,
    models: &[TranslationModel],
    accepted: &[String],
    preferred: Option<&str>,
) -> LanguageSummary {
    let confidence = language_confidence(detected, suggested);
    let preference = target_preference(accepted, preferred);

    let mut scored: Vec<(f64, LanguagePair)> = build_pairs(models)
        .into_iter()
        .map(|pair| (score(&pair, &confidence, &preference), pair))
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let pairs: Vec<LanguagePair> = scored.into_iter().map(|(_, pair)| pair).collect();

    LanguageSummary {
        from: pairs.first().map(|pair| pair.from.clone()),
        to: pairs.first().map(|pair| pair.to.clone()),
        models: pairs,
    }
}

/// 检测页面语言并选择语言对
pub async fn detect_language(
    sample: &str,
    suggested: &BTreeMap<String, f64>,
    backend: &dyn TranslationBackend,
    detector: &dyn LanguageDetector,
    preferred: Option<&str>,
) -> TranslateResult<LanguageSummary> {
    if sample.trim().is_empty() {
        return Err(TranslateError::DetectionError("文本样本为空".to_string()));
    }

    let (detected, models) = futures::future::try_join(detector.detect(sample.to_string()), backend.registry()).await?;
    let accepted = detector.accept_languages();

    let summary = select_language_pair(&detected, suggested, &models, &accepted, preferred);
    tracing::debug!(
        "语言检测: {:?} -> {:?}，共 {} 个语言对",
        summary.from,
        summary.to,
        summary.models.len()
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detected(language: &str, percentage: f64) -> DetectedLanguage {
        DetectedLanguage {
            language: language.to_string(),
            percentage,
        }
    }

    fn models() -> Vec<TranslationModel> {
        vec![
            TranslationModel::new("de", "en", true),
            TranslationModel::new("en", "de", true),
            TranslationModel::new("es", "en", false),
            TranslationModel::new("en", "fr", false),
        ]
    }

    #[test]
    fn test_pivot_pairs() {
        let pairs = build_pairs(&models());
        assert_eq!(pairs.len(), 4 + 3);
        assert!(pairs
            .iter()
            .any(|p| p.from == "de" && p.to == "fr" && p.pivot.as_deref() == Some("en")));
        assert!(!pairs.iter().any(|p| p.from == "de" && p.to == "de"));
    }

    #[test]
    fn test_detected_language_wins() {
        let summary = select_language_pair(
            &[detected("de", 90.0)],
            &BTreeMap::new(),
            &models(),
            &["en-US".to_string()],
            None,
        );
        assert_eq!(summary.from.as_deref(), Some("de"));
        assert_eq!(summary.to.as_deref(), Some("en"));
    }

    #[test]
    fn test_preferred_target_and_suggestions() {
        let mut suggested = BTreeMap::new();
        suggested.insert("de-AT".to_string(), 1.0);
        let models = vec![
            TranslationModel::new("de", "en", true),
            TranslationModel::new("de", "fr", true),
        ];
        let summary = select_language_pair(&[], &suggested, &models, &["en".to_string()], Some("fr"));
        assert_eq!(summary.from.as_deref(), Some("de"));
        assert_eq!(summary.to.as_deref(), Some("fr"));
    }

    #[test]
    fn test_similar_languages_get_half_score() {
        let confidence = language_confidence(&[detected("ca", 80.0)], &BTreeMap::new());
        assert_eq!(confidence.get("es").copied(), Some(0.4));
        assert_eq!(confidence.get("ca").copied(), Some(0.8));
    }

    #[test]
    fn test_local_models_preferred() {
        let local = LanguagePair {
            from: "de".into(),
            to: "en".into(),
            pivot: None,
            models: vec![TranslationModel::new("de", "en", true)],
        };
        let remote = LanguagePair {
            models: vec![TranslationModel::new("de", "en", false)],
            ..local.clone()
        };
        let empty = HashMap::new();
        assert!(score(&local, &empty, &empty) > score(&remote, &empty, &empty));
    }

    #[tokio::test]
    async fn test_empty_sample_is_error() {
        let backend = crate::backend::PseudoBackend::new(models());
        let detector = crate::backend::StaticDetector::new("de", &["en"]);
        let result = detect_language("  ", &BTreeMap::new(), &backend, &detector, None).await;
        assert!(result.is_err());
    }
}
