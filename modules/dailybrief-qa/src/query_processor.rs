use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use tracing::debug;

use crate::models::QueryType;
use crate::vector_index::MetadataFilter;

/// Vulnerability-intent keywords, CN and EN.
const VULNERABILITY_KEYWORDS: &[&str] = &[
    // Chinese
    "漏洞",
    "安全漏洞",
    "高危漏洞",
    "严重漏洞",
    "紧急漏洞",
    "0day",
    "零日",
    "远程代码执行",
    "rce",
    "提权",
    "权限提升",
    "注入",
    "sql注入",
    "xss",
    "跨站脚本",
    "csrf",
    "缓冲区溢出",
    "内存泄漏",
    "拒绝服务",
    "dos",
    "ddos",
    // English
    "vulnerability",
    "vulnerabilities",
    "exploit",
    "exploits",
    "security flaw",
    "security issue",
    "security bug",
    "zero-day",
    "zeroday",
    "remote code execution",
    "privilege escalation",
    "injection",
    "buffer overflow",
    "denial of service",
    "critical vulnerability",
    "high severity",
];

/// source_type -> trigger keywords, checked in order.
const SOURCE_KEYWORDS: &[(&str, &[&str])] = &[
    ("arxiv", &["arxiv", "论文", "paper", "papers", "预印本"]),
    ("rss", &["rss", "博客", "blog", "blogs", "新闻", "news", "资讯"]),
    ("nvd", &["nvd", "漏洞库", "漏洞数据库", "vulnerability database"]),
    ("kev", &["kev", "已知漏洞", "known exploited", "cisa"]),
    ("blog", &["blog", "博客", "技术博客", "tech blog"]),
    ("pwc", &["pwc", "papers with code", "paperswithcode"]),
    ("huggingface", &["huggingface", "hf", "hugging face", "模型"]),
    ("dblp", &["dblp", "学术论文", "academic"]),
];

/// Relative-time keywords -> days back. 0 means "since midnight".
const TIME_KEYWORDS: &[(&str, i64)] = &[
    ("今天", 0),
    ("昨天", 1),
    ("前天", 2),
    ("这周", 7),
    ("本周", 7),
    ("上周", 14),
    ("这个月", 30),
    ("本月", 30),
    ("上个月", 60),
    ("最近", 7),
    ("近期", 14),
    ("最新", 3),
    ("today", 0),
    ("yesterday", 1),
    ("this week", 7),
    ("last week", 14),
    ("this month", 30),
    ("last month", 60),
    ("recent", 7),
    ("recently", 7),
    ("latest", 3),
];

/// Topic categories and their trigger keywords.
const TOPIC_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "AI/机器学习",
        &[
            "ai",
            "人工智能",
            "机器学习",
            "深度学习",
            "神经网络",
            "llm",
            "大模型",
            "大语言模型",
            "gpt",
            "transformer",
            "machine learning",
            "deep learning",
            "neural network",
            "artificial intelligence",
            "language model",
        ],
    ),
    (
        "安全/隐私",
        &[
            "安全",
            "隐私",
            "加密",
            "认证",
            "授权",
            "security",
            "privacy",
            "encryption",
            "authentication",
            "cybersecurity",
            "信息安全",
            "网络安全",
        ],
    ),
    (
        "系统/架构",
        &[
            "系统",
            "架构",
            "分布式",
            "微服务",
            "容器",
            "kubernetes",
            "docker",
            "云原生",
            "cloud native",
            "system",
            "architecture",
            "distributed",
        ],
    ),
];

const STOP_WORDS: &[&str] = &[
    // Chinese
    "的", "了", "是", "在", "有", "和", "与", "或", "等", "这", "那", "什么", "怎么", "如何",
    "为什么", "哪些", "请", "帮", "我", "你", "他", "她", "它", "们", "吗", "呢", "吧", "啊",
    "呀", "哦", "嗯", "关于", "相关", "有关",
    // English
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
    "do", "does", "did", "will", "would", "could", "should", "may", "might", "must", "shall",
    "can", "need", "dare", "to", "of", "in", "for", "on", "with", "at", "by", "from", "as",
    "into", "through", "during", "before", "after", "above", "below", "between", "under",
    "again", "further", "then", "once", "here", "there", "when", "where", "why", "how", "all",
    "each", "few", "more", "most", "other", "some", "such", "no", "nor", "not", "only", "own",
    "same", "so", "than", "too", "very", "just", "and", "but", "if", "or", "because", "until",
    "while", "about", "against", "any", "both", "what", "which", "who", "whom", "this", "that",
    "these", "those", "am", "i", "me", "my", "myself", "we", "our", "ours", "ourselves", "you",
    "your", "yours", "yourself", "yourselves", "he", "him", "his", "himself", "she", "her",
    "hers", "herself", "it", "its", "itself", "they", "them", "their", "theirs", "themselves",
];

/// Parse result for one user query.
#[derive(Debug, Clone)]
pub struct ParsedQuery {
    pub query_type: QueryType,
    pub keywords: Vec<String>,
    pub cve_ids: Vec<String>,
    pub source_type: Option<String>,
    pub category: Option<String>,
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub original_query: String,
}

impl ParsedQuery {
    fn general(query: &str) -> Self {
        Self {
            query_type: QueryType::General,
            keywords: Vec::new(),
            cve_ids: Vec::new(),
            source_type: None,
            category: None,
            time_range: None,
            original_query: query.to_string(),
        }
    }

    /// Metadata filter for the vector search.
    pub fn search_filter(&self) -> Option<MetadataFilter> {
        let filter = MetadataFilter {
            source_types: self.source_type.clone().map(|s| vec![s]),
            category: self.category.clone(),
        };
        (!filter.is_empty()).then_some(filter)
    }
}

/// Detects query intent and extracts keywords, CVE ids and time ranges from
/// mixed Chinese/English questions. Detection order: CVE id, vulnerability
/// keyword, source keyword, time range, topic, general.
pub struct QueryProcessor {
    cve_re: Regex,
    split_re: Regex,
    english_re: Regex,
    cjk_re: Regex,
    numeric_time_res: Vec<(Regex, i64)>,
}

impl Default for QueryProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryProcessor {
    pub fn new() -> Self {
        Self {
            cve_re: Regex::new(r"(?i)CVE-\d{4}-\d{4,}").expect("valid regex"),
            split_re: Regex::new(
                "[\\s,，.。!！?？;；:：'\"“”()（)）\\[\\]【】<>《》]+",
            )
            .expect("valid regex"),
            english_re: Regex::new(r"[A-Za-z0-9\-_]+").expect("valid regex"),
            cjk_re: Regex::new(r"[\u{4e00}-\u{9fff}]+").expect("valid regex"),
            // days multiplier per unit
            numeric_time_res: vec![
                (Regex::new(r"(\d+)\s*天[内前]?").expect("valid regex"), 1),
                (Regex::new(r"(\d+)\s*周[内前]?").expect("valid regex"), 7),
                (Regex::new(r"(\d+)\s*个?月[内前]?").expect("valid regex"), 30),
                (
                    Regex::new(r"(?:last|past)\s*(\d+)\s*days?").expect("valid regex"),
                    1,
                ),
                (
                    Regex::new(r"(?:last|past)\s*(\d+)\s*weeks?").expect("valid regex"),
                    7,
                ),
                (
                    Regex::new(r"(?:last|past)\s*(\d+)\s*months?").expect("valid regex"),
                    30,
                ),
                (
                    Regex::new(r"(\d+)\s*days?\s*(?:ago|back)").expect("valid regex"),
                    1,
                ),
            ],
        }
    }

    pub fn parse(&self, query: &str) -> ParsedQuery {
        self.parse_at(query, Utc::now())
    }

    pub fn parse_at(&self, query: &str, now: DateTime<Utc>) -> ParsedQuery {
        let query = query.trim();
        if query.is_empty() {
            return ParsedQuery::general(query);
        }

        let mut parsed = ParsedQuery::general(query);
        let lower = query.to_lowercase();

        // 1. CVE ids trump everything.
        let cve_ids = self.extract_cve_ids(query);
        if !cve_ids.is_empty() {
            parsed.query_type = QueryType::Vulnerability;
            parsed.keywords = cve_ids.clone();
            parsed.keywords.extend(self.extract_keywords(query));
            parsed.cve_ids = cve_ids;
            return parsed;
        }

        // 2. Vulnerability intent.
        if VULNERABILITY_KEYWORDS.iter().any(|k| lower.contains(k)) {
            parsed.query_type = QueryType::Vulnerability;
            parsed.keywords = self.extract_keywords(query);
            parsed.time_range = self.detect_time_range(&lower, now);
            return parsed;
        }

        // 3. Source-directed queries.
        if let Some(source_type) = detect_source_type(&lower) {
            parsed.query_type = QueryType::Source;
            parsed.source_type = Some(source_type.to_string());
            parsed.keywords = self.extract_keywords(query);
            parsed.time_range = self.detect_time_range(&lower, now);
            return parsed;
        }

        // 4. Pure time-range queries.
        if let Some(range) = self.detect_time_range(&lower, now) {
            parsed.query_type = QueryType::TimeRange;
            parsed.time_range = Some(range);
            parsed.keywords = self.extract_keywords(query);
            return parsed;
        }

        // 5. Topic queries.
        if let Some(topic) = detect_topic(&lower) {
            parsed.query_type = QueryType::Topic;
            parsed.category = Some(topic.to_string());
            parsed.keywords = self.extract_keywords(query);
            return parsed;
        }

        // 6. General.
        parsed.keywords = self.extract_keywords(query);
        debug!(query, keywords = parsed.keywords.len(), "Parsed general query");
        parsed
    }

    fn extract_cve_ids(&self, query: &str) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.cve_re
            .find_iter(query)
            .map(|m| m.as_str().to_uppercase())
            .filter(|id| seen.insert(id.clone()))
            .collect()
    }

    fn detect_time_range(
        &self,
        lower: &str,
        now: DateTime<Utc>,
    ) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        for (keyword, days) in TIME_KEYWORDS {
            if lower.contains(keyword) {
                let start = if *days == 0 {
                    now.date_naive()
                        .and_hms_opt(0, 0, 0)
                        .map(|d| d.and_utc())
                        .unwrap_or(now)
                } else {
                    now - Duration::days(*days)
                };
                return Some((start, now));
            }
        }

        for (re, unit_days) in &self.numeric_time_res {
            if let Some(caps) = re.captures(lower) {
                if let Ok(n) = caps[1].parse::<i64>() {
                    return Some((now - Duration::days(n * unit_days), now));
                }
            }
        }

        None
    }

    /// Whitespace/punctuation tokenization with CJK n-gram fallback, stop-word
    /// filtering and order-preserving case-insensitive dedup.
    pub fn extract_keywords(&self, query: &str) -> Vec<String> {
        let text = self.cve_re.replace_all(query, "");

        let mut tokens: Vec<String> = Vec::new();
        for part in self.split_re.split(&text) {
            if part.is_empty() {
                continue;
            }
            if part.is_ascii() {
                tokens.push(part.to_string());
                continue;
            }
            // Mixed text: pull out English words, then CJK runs.
            for m in self.english_re.find_iter(part) {
                tokens.push(m.as_str().to_string());
            }
            for m in self.cjk_re.find_iter(part) {
                let run: Vec<char> = m.as_str().chars().collect();
                if run.len() <= 4 {
                    tokens.push(run.iter().collect());
                } else {
                    // Overlapping 2- and 3-grams over long runs.
                    let mut i = 0;
                    while i + 2 <= run.len() {
                        tokens.push(run[i..i + 2].iter().collect());
                        i += 2;
                    }
                    let mut i = 0;
                    while i + 3 <= run.len() {
                        tokens.push(run[i..i + 3].iter().collect());
                        i += 2;
                    }
                }
            }
        }

        let mut seen = std::collections::HashSet::new();
        tokens
            .into_iter()
            .filter(|t| t.chars().count() >= 2)
            .filter(|t| !STOP_WORDS.contains(&t.to_lowercase().as_str()))
            .filter(|t| seen.insert(t.to_lowercase()))
            .collect()
    }
}

fn detect_source_type(lower: &str) -> Option<&'static str> {
    for (source_type, keywords) in SOURCE_KEYWORDS {
        if keywords.iter().any(|k| lower.contains(k)) {
            return Some(source_type);
        }
    }
    None
}

fn detect_topic(lower: &str) -> Option<&'static str> {
    for (topic, keywords) in TOPIC_KEYWORDS {
        if keywords.iter().any(|k| lower.contains(k)) {
            return Some(topic);
        }
    }
    None
}
