use crate::database::{DocumentMetadata, SearchResult};

pub const CATALOGUE_SOURCE: &str = "fallback-catalogue";

const TOP_SIMILARITY: f32 = 0.6;
const RANK_STEP: f32 = 0.1;
const MIN_SIMILARITY: f32 = 0.1;

struct CatalogueEntry {
    id: &'static str,
    topic: &'static str,
    keywords: &'static [&'static str],
    content: &'static str,
}

const ENTRIES: &[CatalogueEntry] = &[
    CatalogueEntry {
        id: "catalogue-cpu",
        topic: "cpu",
        keywords: &["cpu", "사용률", "프로세서", "processor", "load", "부하", "코어"],
        content: "CPU 사용률이 지속적으로 80%를 넘으면 상위 프로세스를 확인하고, 부하 분산이나 스케일 아웃을 검토하세요. 순간적인 스파이크는 배치 작업이나 GC 때문일 수 있습니다.",
    },
    CatalogueEntry {
        id: "catalogue-memory",
        topic: "memory",
        keywords: &["메모리", "memory", "ram", "스왑", "swap", "oom", "누수", "leak"],
        content: "메모리 사용량이 계속 증가하면 누수를 의심하세요. 스왑 사용량과 OOM 킬러 로그를 확인하고, 캐시 크기와 힙 설정을 점검하세요.",
    },
    CatalogueEntry {
        id: "catalogue-disk",
        topic: "disk",
        keywords: &["디스크", "disk", "용량", "storage", "스토리지", "iops", "inode"],
        content: "디스크 사용률이 90%를 넘으면 오래된 로그와 임시 파일을 정리하세요. IOPS 포화는 쿼리 지연과 타임아웃의 흔한 원인입니다.",
    },
    CatalogueEntry {
        id: "catalogue-network",
        topic: "network",
        keywords: &["네트워크", "network", "지연", "latency", "패킷", "packet", "대역폭", "bandwidth", "timeout"],
        content: "네트워크 지연이 늘어나면 패킷 손실률과 대역폭 사용량을 확인하세요. DNS 해석과 로드밸런서 헬스체크도 함께 점검하세요.",
    },
    CatalogueEntry {
        id: "catalogue-database",
        topic: "database",
        keywords: &["데이터베이스", "database", "db", "쿼리", "query", "커넥션", "connection", "슬로우"],
        content: "데이터베이스 응답이 느리면 슬로우 쿼리 로그와 커넥션 풀 사용량을 확인하세요. 인덱스 누락과 락 경합이 대표적인 원인입니다.",
    },
    CatalogueEntry {
        id: "catalogue-logs",
        topic: "logs",
        keywords: &["로그", "log", "오류", "에러", "error", "exception", "예외", "장애"],
        content: "오류가 발생하면 해당 시점 전후의 애플리케이션 로그와 시스템 로그를 함께 확인하세요. 같은 에러가 반복되면 최근 배포와 설정 변경을 먼저 의심하세요.",
    },
    CatalogueEntry {
        id: "catalogue-server-status",
        topic: "server",
        keywords: &["서버", "server", "상태", "status", "health", "헬스", "가동", "uptime"],
        content: "서버 상태는 CPU, 메모리, 디스크, 네트워크 지표를 함께 보고 판단하세요. 헬스체크 실패가 반복되는 서버는 트래픽에서 분리한 뒤 원인을 조사하세요.",
    },
    CatalogueEntry {
        id: "catalogue-monitoring",
        topic: "monitoring",
        keywords: &["모니터링", "monitoring", "알림", "alert", "임계값", "threshold", "대시보드", "dashboard"],
        content: "알림 임계값은 평소 지표의 분포를 기준으로 정하세요. 경고와 위험 두 단계로 나누면 알림 피로를 줄일 수 있습니다.",
    },
];

/// Entries sharing at least one keyword with `query`, best overlap first,
/// at most `top_k` of them. Empty when nothing overlaps.
#[inline]
pub fn lookup(query: &str, top_k: usize) -> Vec<SearchResult> {
    let query = query.to_lowercase();

    let mut ranked: Vec<(usize, &CatalogueEntry)> = ENTRIES
        .iter()
        .map(|entry| {
            let overlap = entry
                .keywords
                .iter()
                .filter(|keyword| query.contains(**keyword))
                .count();
            (overlap, entry)
        })
        .filter(|(overlap, _)| *overlap > 0)
        .collect();
    // stable: equal overlap keeps catalogue order
    ranked.sort_by(|a, b| b.0.cmp(&a.0));

    ranked
        .into_iter()
        .take(top_k)
        .enumerate()
        .map(|(rank, (_, entry))| SearchResult {
            id: entry.id.to_string(),
            content: entry.content.to_string(),
            similarity: (rank as f32).mul_add(-RANK_STEP, TOP_SIMILARITY).max(MIN_SIMILARITY),
            metadata: DocumentMetadata {
                category: Some(entry.topic.to_string()),
                source: Some(CATALOGUE_SOURCE.to_string()),
                ..DocumentMetadata::default()
            },
        })
        .collect()
}
