use std::collections::HashMap;
use std::sync::LazyLock;

use super::{IntentCategory, PartOfSpeech, SemanticFeature};

/// Case-marking and topic particles. Matched longest-first.
pub(crate) const PARTICLES: &[&str] = &[
    "에서는", "으로는", "에게서", "으로서", "에서", "에게", "한테", "으로", "까지", "부터", "보다",
    "처럼", "마다", "이나", "이랑", "라는", "이라", "의", "을", "를", "이", "가", "은", "는", "에",
    "로", "와", "과", "도", "만",
];

/// Verbal and request endings. Matched longest-first after particles.
pub(crate) const ENDINGS: &[&str] = &[
    "해주세요", "했습니다", "합니다", "습니다", "입니다", "하세요", "주세요", "해줘요", "해줘",
    "알려줘", "보여줘", "했다", "한다", "하는", "하고", "해서", "하면", "하여", "되는", "되어",
    "됐다", "된", "한", "할", "줘", "요", "죠", "다", "하", "되",
];

use PartOfSpeech::{Noun, Verb};
use SemanticFeature::{Action, Database, Performance, Resource, Server, Status};

const VOCABULARY: &[(&str, SemanticFeature, PartOfSpeech)] = &[
    // server
    ("서버", Server, Noun),
    ("호스트", Server, Noun),
    ("노드", Server, Noun),
    ("인스턴스", Server, Noun),
    ("머신", Server, Noun),
    ("클러스터", Server, Noun),
    ("컨테이너", Server, Noun),
    ("게이트웨이", Server, Noun),
    ("server", Server, Noun),
    ("host", Server, Noun),
    ("node", Server, Noun),
    ("instance", Server, Noun),
    ("cluster", Server, Noun),
    ("container", Server, Noun),
    ("gateway", Server, Noun),
    // performance
    ("성능", Performance, Noun),
    ("사용률", Performance, Noun),
    ("사용량", Performance, Noun),
    ("속도", Performance, Noun),
    ("응답", Performance, Noun),
    ("지연", Performance, Noun),
    ("부하", Performance, Noun),
    ("처리량", Performance, Noun),
    ("performance", Performance, Noun),
    ("latency", Performance, Noun),
    ("load", Performance, Noun),
    ("throughput", Performance, Noun),
    ("usage", Performance, Noun),
    // resources
    ("cpu", Resource, Noun),
    ("메모리", Resource, Noun),
    ("디스크", Resource, Noun),
    ("네트워크", Resource, Noun),
    ("램", Resource, Noun),
    ("스토리지", Resource, Noun),
    ("대역폭", Resource, Noun),
    ("트래픽", Resource, Noun),
    ("memory", Resource, Noun),
    ("disk", Resource, Noun),
    ("network", Resource, Noun),
    ("ram", Resource, Noun),
    ("storage", Resource, Noun),
    ("bandwidth", Resource, Noun),
    ("traffic", Resource, Noun),
    // status
    ("상태", Status, Noun),
    ("정상", Status, Noun),
    ("경고", Status, Noun),
    ("위험", Status, Noun),
    ("장애", Status, Noun),
    ("오류", Status, Noun),
    ("에러", Status, Noun),
    ("다운", Status, Noun),
    ("status", Status, Noun),
    ("health", Status, Noun),
    ("healthy", Status, Noun),
    ("warning", Status, Noun),
    ("critical", Status, Noun),
    ("error", Status, Noun),
    ("down", Status, Noun),
    // actions
    ("확인", Action, Verb),
    ("분석", Action, Verb),
    ("조회", Action, Verb),
    ("재시작", Action, Verb),
    ("모니터링", Action, Verb),
    ("점검", Action, Verb),
    ("비교", Action, Verb),
    ("예측", Action, Verb),
    ("최적화", Action, Verb),
    ("check", Action, Verb),
    ("analyze", Action, Verb),
    ("restart", Action, Verb),
    ("monitor", Action, Verb),
    ("compare", Action, Verb),
    ("predict", Action, Verb),
    ("optimize", Action, Verb),
    ("show", Action, Verb),
    ("list", Action, Verb),
    // databases
    ("데이터베이스", Database, Noun),
    ("디비", Database, Noun),
    ("쿼리", Database, Noun),
    ("테이블", Database, Noun),
    ("인덱스", Database, Noun),
    ("database", Database, Noun),
    ("db", Database, Noun),
    ("query", Database, Noun),
    ("table", Database, Noun),
    ("index", Database, Noun),
    ("mysql", Database, Noun),
    ("postgres", Database, Noun),
    ("postgresql", Database, Noun),
    ("redis", Database, Noun),
    ("mongodb", Database, Noun),
];

pub(crate) static DOMAIN_VOCABULARY: LazyLock<HashMap<&'static str, (SemanticFeature, PartOfSpeech)>> =
    LazyLock::new(|| {
        VOCABULARY
            .iter()
            .map(|&(term, semantic, pos)| (term, (semantic, pos)))
            .collect()
    });

/// Terms treated as interchangeable by stem similarity.
pub(crate) const SYNONYM_GROUPS: &[&[&str]] = &[
    &["서버", "호스트", "노드", "머신", "server", "host", "node"],
    &["cpu", "프로세서", "processor"],
    &["메모리", "램", "ram", "memory"],
    &["디스크", "스토리지", "disk", "storage"],
    &["오류", "에러", "장애", "실패", "error", "failure"],
    &["확인", "조회", "점검", "체크", "check"],
    &["상태", "status", "health"],
    &["네트워크", "트래픽", "network", "traffic"],
    &["데이터베이스", "디비", "db", "database"],
    &["성능", "속도", "performance"],
];

pub(crate) const INTENT_KEYWORDS: &[(IntentCategory, &[&str])] = &[
    (
        IntentCategory::Performance,
        &[
            "성능", "cpu", "메모리", "디스크", "사용률", "사용량", "느림", "속도", "부하", "최적화",
            "performance", "memory", "disk", "slow", "latency", "load",
        ],
    ),
    (
        IntentCategory::Troubleshooting,
        &[
            "문제", "오류", "에러", "장애", "해결", "원인", "고장", "복구", "실패", "problem",
            "error", "issue", "failure", "fix",
        ],
    ),
    (
        IntentCategory::Monitoring,
        &[
            "모니터링", "상태", "확인", "점검", "체크", "감시", "조회", "monitoring", "status",
            "check", "health",
        ],
    ),
    (
        IntentCategory::Security,
        &[
            "보안", "인증", "권한", "접근", "로그인", "암호", "취약점", "security", "auth",
            "permission", "access", "login",
        ],
    ),
    (
        IntentCategory::Analysis,
        &[
            "분석", "비교", "예측", "추세", "패턴", "통계", "analyze", "analysis", "compare",
            "predict", "trend",
        ],
    ),
];
