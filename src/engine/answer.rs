// Local answer composition and remote prompt assembly

use std::fmt::Write as _;

use crate::database::SearchResult;
use crate::morphology::IntentCategory;
use crate::search::SearchTier;

const DETAIL_CHARS: usize = 200;
const SOURCE_PREVIEW_CHARS: usize = 80;
const MAX_LISTED_SOURCES: usize = 3;
const PROMPT_DOCUMENT_CHARS: usize = 500;
const PROMPT_CONTEXT_CHARS: usize = 300;
const PROMPT_CONVERSATION_TURNS: usize = 4;
const NO_DETAILS: &str = "관련 정보를 수집하여 분석했습니다.";

const MAX_CONFIDENCE: f32 = 0.95;
const BASE_CONFIDENCE: f32 = 0.5;
const SIMILARITY_WEIGHT: f32 = 0.4;
const NO_RESULTS_CONFIDENCE: f32 = 0.3;
const DEGRADED_EMBEDDING_FACTOR: f32 = 0.9;
const REMOTE_CONFIDENCE: f32 = 0.85;
const REMOTE_NO_RESULTS_CONFIDENCE: f32 = 0.6;
pub(crate) const FAILED_REMOTE_CONFIDENCE: f32 = 0.1;

fn templates(intent: IntentCategory) -> &'static [&'static str] {
    match intent {
        IntentCategory::Performance => &[
            "성능 분석 결과를 확인했습니다. {details}",
            "시스템 성능 상태를 점검했습니다. {details}",
            "성능 최적화 방안을 제안드립니다. {details}",
        ],
        IntentCategory::Troubleshooting => &[
            "문제 해결 방안을 찾았습니다. {details}",
            "장애 원인을 분석했습니다. {details}",
            "다음 해결 단계를 권장합니다. {details}",
        ],
        IntentCategory::Monitoring => &[
            "시스템 상태를 확인했습니다. {details}",
            "모니터링 결과입니다. {details}",
            "현재 시스템 상태는 다음과 같습니다. {details}",
        ],
        IntentCategory::Security => &[
            "보안 상태를 점검했습니다. {details}",
            "보안 분석 결과입니다. {details}",
            "보안 권장사항을 제시합니다. {details}",
        ],
        IntentCategory::Analysis => &[
            "분석 결과를 정리했습니다. {details}",
            "데이터를 바탕으로 분석했습니다. {details}",
        ],
        IntentCategory::General => &[
            "요청하신 내용을 분석했습니다. {details}",
            "다음과 같은 정보를 찾았습니다. {details}",
            "관련 정보를 확인했습니다. {details}",
        ],
    }
}

/// Follow-up actions offered with a local answer
#[inline]
pub fn suggestions(intent: IntentCategory) -> Vec<String> {
    let items: &[&str] = match intent {
        IntentCategory::Performance => &["CPU 사용률 확인", "메모리 최적화", "디스크 정리"],
        IntentCategory::Troubleshooting => &["로그 확인", "서비스 재시작", "설정 검토"],
        IntentCategory::Monitoring => &["실시간 모니터링", "알림 설정", "대시보드 확인"],
        IntentCategory::Security => &["보안 패치", "접근 권한 검토", "로그 감사"],
        IntentCategory::Analysis => &["추세 비교", "기간별 지표 확인", "상세 분석"],
        IntentCategory::General => &["추가 정보 요청", "상세 분석", "관련 문서 확인"],
    };
    items.iter().map(|s| (*s).to_string()).collect()
}

fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", head.trim_end())
    } else {
        head
    }
}

/// Compose the local engine's answer from the intent template and the
/// retrieved documents. The template choice depends only on the query, so
/// equal queries get equal answers.
#[inline]
pub fn local_answer(query: &str, intent: IntentCategory, results: &[SearchResult]) -> String {
    let options = templates(intent);
    let template = options[query.chars().count() % options.len()];

    let details = results
        .first()
        .map_or_else(|| NO_DETAILS.to_string(), |top| preview(&top.content, DETAIL_CHARS));
    let mut answer = template.replace("{details}", &details);

    if results.len() > 1 {
        answer.push_str("\n\n참고 자료:");
        for result in results.iter().skip(1).take(MAX_LISTED_SOURCES) {
            let _ = write!(
                answer,
                "\n- [{}] {}",
                result.id,
                preview(&result.content, SOURCE_PREVIEW_CHARS)
            );
        }
    }

    answer
}

/// Answer assembled from retrieved context alone, used when a pinned remote
/// engine fails
#[inline]
pub fn context_only_answer(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return "원격 엔진이 응답하지 않았고 관련 문서도 찾지 못했습니다.".to_string();
    }

    let mut answer = "원격 엔진이 응답하지 않아 검색된 자료만 전달합니다.".to_string();
    for result in results.iter().take(MAX_LISTED_SOURCES) {
        let _ = write!(
            answer,
            "\n- [{}] {}",
            result.id,
            preview(&result.content, DETAIL_CHARS)
        );
    }
    answer
}

/// Prompt for the remote engine: recent conversation, retrieved documents and
/// external snippets, each bounded in size
#[inline]
pub fn build_prompt(
    query: &str,
    results: &[SearchResult],
    context: &[String],
    conversation: &[String],
) -> String {
    let mut prompt = String::from(
        "당신은 인프라 모니터링 전문가입니다. 아래 자료를 참고하여 질문에 한국어로 답하세요.\n",
    );

    if !conversation.is_empty() {
        prompt.push_str("\n[이전 대화]\n");
        let skip = conversation.len().saturating_sub(PROMPT_CONVERSATION_TURNS);
        for turn in conversation.iter().skip(skip) {
            let _ = writeln!(prompt, "- {}", preview(turn, PROMPT_CONTEXT_CHARS));
        }
    }

    if !results.is_empty() {
        prompt.push_str("\n[관련 문서]\n");
        for (index, result) in results.iter().enumerate() {
            let _ = writeln!(
                prompt,
                "{}. ({:.2}) {}",
                index + 1,
                result.similarity,
                preview(&result.content, PROMPT_DOCUMENT_CHARS)
            );
        }
    }

    if !context.is_empty() {
        prompt.push_str("\n[실시간 정보]\n");
        for snippet in context {
            let _ = writeln!(prompt, "- {}", preview(snippet, PROMPT_CONTEXT_CHARS));
        }
    }

    let _ = write!(prompt, "\n[질문]\n{}", query);
    prompt
}

fn tier_factor(tier: SearchTier) -> f32 {
    match tier {
        SearchTier::Vector => 1.0,
        SearchTier::Keyword => 0.85,
        SearchTier::Catalogue => 0.6,
    }
}

/// `min(0.95, 0.5 + top * 0.4)` scaled by the tier, 0.3 without results
#[inline]
pub fn local_confidence(top_similarity: Option<f32>, tier: SearchTier, degraded: bool) -> f32 {
    let confidence = match top_similarity {
        Some(top) => top
            .max(0.0)
            .mul_add(SIMILARITY_WEIGHT, BASE_CONFIDENCE)
            .min(MAX_CONFIDENCE)
            * tier_factor(tier),
        None => NO_RESULTS_CONFIDENCE,
    };
    if degraded {
        confidence * DEGRADED_EMBEDDING_FACTOR
    } else {
        confidence
    }
}

#[inline]
pub fn remote_confidence(has_results: bool, tier: SearchTier) -> f32 {
    if has_results {
        REMOTE_CONFIDENCE * tier_factor(tier)
    } else {
        REMOTE_NO_RESULTS_CONFIDENCE
    }
}
